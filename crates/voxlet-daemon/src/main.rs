//! voxlet daemon
//!
//! One binary, two roles. The control plane owns node lifecycle and job
//! dispatch; the node role runs on the GPU instance itself, provisions
//! artifacts onto the attached volume, loads the engines, and serves the
//! health and inference routes.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use voxlet_api::{create_node_router, create_router};
use voxlet_core::{ArtifactSpec, DaemonConfig, JobKind};
use voxlet_engine::{CommandEngine, CommandEngineConfig, ReadinessSequencer};
use voxlet_node::{HttpInferenceClient, HttpNodeHealth, NodeCoordinator, RestProvider};
use voxlet_scheduler::{JobDispatcher, JobRegistry};
use voxlet_store::{HttpFetcher, VolumeCache};

/// voxlet daemon - GPU audio-node coordinator for speech synthesis and
/// transcription
#[derive(Parser, Debug)]
#[command(name = "voxletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Role to run: "control" or "node"
    #[arg(long, default_value = "control")]
    role: String,

    /// Address to bind the API server (overrides config)
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Model-runner program spawned per inference (node role)
    #[arg(long, default_value = "voxlet-runner")]
    runner: PathBuf,

    /// Accelerator device exposed to model runners (node role)
    #[arg(long)]
    device: Option<String>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

/// The two artifacts every node must hold before serving traffic
fn required_artifacts() -> Vec<ArtifactSpec> {
    vec![
        ArtifactSpec::new(
            "chatterbox-tts",
            "https://huggingface.co/ResembleAI/chatterbox/resolve/main/t3_cfg.safetensors",
        ),
        ArtifactSpec::new(
            "whisper-large-v3",
            "https://huggingface.co/Systran/faster-whisper-large-v3/resolve/main/model.bin",
        ),
    ]
}

fn init_logging(level: &str, format: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path).expect("Failed to load config"),
        None => DaemonConfig::default(),
    };
    if let Some(address) = &args.address {
        config.api.address = address.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.format);

    info!("Starting voxlet daemon v{}", env!("CARGO_PKG_VERSION"));

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .expect("Invalid address");

    let (router, coordinator) = match args.role.as_str() {
        "node" => (node_role(&args, &config).await, None),
        "control" => {
            let (router, coordinator) = control_role(&config).await;
            (router, Some(coordinator))
        }
        other => {
            eprintln!("Unknown role: {} (expected \"control\" or \"node\")", other);
            std::process::exit(1);
        }
    };

    info!(role = %args.role, "API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Explicit shutdown stops every active node; the persistent volume and
    // its artifacts stay behind
    if let Some(coordinator) = coordinator {
        info!("Stopping active nodes");
        coordinator.shutdown().await;
    }
}

/// Wait for a shutdown signal (Ctrl+C)
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install shutdown handler");
        // No signal delivery means no orderly shutdown to wait for
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Wire the node role: volume cache, engines, readiness sequencer
async fn node_role(args: &Args, config: &DaemonConfig) -> axum::Router {
    let cache = Arc::new(VolumeCache::new(
        config.volume.clone(),
        Arc::new(HttpFetcher::default()),
    ));
    cache.init().await.expect("Failed to initialize volume cache");

    let engine_config = CommandEngineConfig {
        program: args.runner.clone(),
        extra_args: Vec::new(),
        device: args.device.clone(),
    };
    let artifacts = required_artifacts();
    let engines: Vec<Arc<dyn voxlet_engine::InferenceEngine>> = vec![
        Arc::new(CommandEngine::new(
            JobKind::Synthesis,
            artifacts[0].clone(),
            engine_config.clone(),
        )),
        Arc::new(CommandEngine::new(
            JobKind::Transcription,
            artifacts[1].clone(),
            engine_config,
        )),
    ];

    let sequencer = Arc::new(ReadinessSequencer::new(cache, engines, args.device.clone()));

    // Health answers immediately; readiness flips once provision + load
    // complete
    let init = sequencer.clone();
    tokio::spawn(async move {
        if let Err(e) = init.initialize().await {
            warn!(error = %e, "Startup sequence failed");
        }
    });

    create_node_router(sequencer)
}

/// Wire the control plane: coordinator, dispatcher, sweeps
async fn control_role(config: &DaemonConfig) -> (axum::Router, Arc<NodeCoordinator>) {
    let provider = Arc::new(RestProvider::new(
        config.node.provider_url.clone(),
        config.node.api_token.clone(),
        30,
    ));
    let health = Arc::new(HttpNodeHealth::default());
    let coordinator = Arc::new(NodeCoordinator::new(config.node.clone(), provider, health));

    let registry = Arc::new(JobRegistry::new());
    let client = Arc::new(HttpInferenceClient::new(config.jobs.job_timeout_secs));
    let dispatcher = JobDispatcher::start(
        config.jobs.clone(),
        registry.clone(),
        coordinator.clone(),
        client,
    );

    let sweeper = coordinator.clone();
    let interval = config.node.idle_sweep();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for lease in sweeper.sweep_leases().await {
                warn!(
                    lease_id = %lease.id,
                    job_id = %lease.job_id,
                    "Force-released expired lease"
                );
            }
            sweeper.sweep_idle().await;
        }
    });

    let router = create_router(
        registry,
        dispatcher,
        coordinator.clone(),
        config.api.cors_enabled,
    );
    (router, coordinator)
}
