//! Process-spawning engine implementation
//!
//! Drives an external model-runner program per inference: the request is
//! written to the child's stdin as JSON and the result read back from stdout.
//! Long synthesis texts are pre-split into sentence batches so a single
//! generation never exceeds the model's speech-token window.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};
use voxlet_core::{
    batch, ArtifactSpec, JobKind, JobOutput, JobPayload, VoxletError, VoxletResult,
};

use crate::traits::InferenceEngine;

/// Configuration for a process-spawned engine
#[derive(Debug, Clone)]
pub struct CommandEngineConfig {
    /// Model-runner program to spawn per inference
    pub program: PathBuf,
    /// Additional arguments passed before `--model`
    pub extra_args: Vec<String>,
    /// Accelerator device visible to the child (CUDA_VISIBLE_DEVICES)
    pub device: Option<String>,
}

impl Default for CommandEngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("voxlet-runner"),
            extra_args: Vec::new(),
            device: None,
        }
    }
}

/// Wire format written to the child's stdin
#[derive(Debug, Serialize)]
struct RunnerInput<'a> {
    payload: &'a JobPayload,
    /// Sentence batches for synthesis, absent for transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    batches: Option<Vec<String>>,
}

/// Engine invoking an external model-runner process
pub struct CommandEngine {
    kind: JobKind,
    artifact: ArtifactSpec,
    config: CommandEngineConfig,
    loaded: AtomicBool,
    model_path: Mutex<Option<PathBuf>>,
}

impl CommandEngine {
    /// Create an engine for one job kind and its artifact
    pub fn new(kind: JobKind, artifact: ArtifactSpec, config: CommandEngineConfig) -> Self {
        Self {
            kind,
            artifact,
            config,
            loaded: AtomicBool::new(false),
            model_path: Mutex::new(None),
        }
    }

    fn build_command(&self, model_path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);

        for arg in &self.config.extra_args {
            cmd.arg(arg);
        }
        cmd.arg("--model").arg(model_path);
        cmd.arg("--task").arg(self.kind.to_string());

        if let Some(ref device) = self.config.device {
            cmd.env("CUDA_VISIBLE_DEVICES", device);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd
    }
}

#[async_trait]
impl InferenceEngine for CommandEngine {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn artifact(&self) -> ArtifactSpec {
        self.artifact.clone()
    }

    async fn load(&self, artifact_path: &Path) -> VoxletResult<()> {
        let meta = tokio::fs::metadata(artifact_path).await.map_err(|e| {
            VoxletError::Load(format!(
                "{}: artifact missing at {}: {}",
                self.artifact.name,
                artifact_path.display(),
                e
            ))
        })?;

        if meta.len() == 0 {
            return Err(VoxletError::Load(format!(
                "{}: artifact at {} is empty",
                self.artifact.name,
                artifact_path.display()
            )));
        }

        *self.model_path.lock().unwrap() = Some(artifact_path.to_path_buf());
        self.loaded.store(true, Ordering::SeqCst);

        info!(
            engine = self.name(),
            artifact = %self.artifact.name,
            path = %artifact_path.display(),
            "Engine ready"
        );

        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn infer(&self, payload: &JobPayload) -> VoxletResult<JobOutput> {
        if !self.is_loaded() {
            return Err(VoxletError::Load(format!(
                "{} engine invoked before load",
                self.kind
            )));
        }
        if payload.kind() != self.kind {
            return Err(VoxletError::Internal(format!(
                "{} engine received a {} payload",
                self.kind,
                payload.kind()
            )));
        }

        let model_path = self
            .model_path
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VoxletError::Load("engine has no model path".to_string()))?;

        let batches = match payload {
            JobPayload::Synthesis(req) => Some(batch::split_into_batches(
                &req.text,
                batch::MAX_SPEECH_TOKENS,
                req.cfg_weight,
            )),
            JobPayload::Transcription(_) => None,
        };

        let input = serde_json::to_vec(&RunnerInput { payload, batches })?;

        debug!(
            engine = self.name(),
            program = %self.config.program.display(),
            "Spawning model runner"
        );

        let mut cmd = self.build_command(&model_path);
        let mut child = cmd
            .spawn()
            .map_err(|e| VoxletError::Internal(format!("failed to spawn runner: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoxletError::Internal("runner stdin unavailable".to_string()))?;
        stdin.write_all(&input).await?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| VoxletError::Internal(format!("runner wait failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                engine = self.name(),
                status = %output.status,
                stderr = %stderr.trim(),
                "Model runner failed"
            );
            return Err(VoxletError::Internal(format!(
                "runner exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let result: JobOutput = serde_json::from_slice(&output.stdout)?;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        match self.kind {
            JobKind::Synthesis => "command-synthesis",
            JobKind::Transcription => "command-transcription",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlet_core::SynthesisRequest;

    fn synthesis_payload(text: &str) -> JobPayload {
        JobPayload::Synthesis(SynthesisRequest {
            text: text.to_string(),
            voice_ref_url: None,
            exaggeration: 0.4,
            cfg_weight: 0.35,
            language: "en".to_string(),
            output_format: "wav".to_string(),
        })
    }

    fn echo_result_config() -> CommandEngineConfig {
        // Drains stdin and prints a fixed synthesis result
        let script = concat!(
            "cat > /dev/null; ",
            r#"printf '{"kind":"synthesis","audio":[1,2,3],"sample_rate":24000,"#,
            r#""duration_seconds":1.5,"generation_time_ms":20}'"#,
        );
        CommandEngineConfig {
            program: PathBuf::from("sh"),
            extra_args: vec!["-c".to_string(), script.to_string(), "--".to_string()],
            device: None,
        }
    }

    #[tokio::test]
    async fn test_load_requires_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new(
            JobKind::Synthesis,
            ArtifactSpec::new("tts", "https://example.com/tts.bin"),
            CommandEngineConfig::default(),
        );

        let err = engine.load(&dir.path().join("missing.bin")).await.unwrap_err();
        assert!(matches!(err, VoxletError::Load(_)));
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_load_rejects_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let engine = CommandEngine::new(
            JobKind::Synthesis,
            ArtifactSpec::new("tts", "https://example.com/tts.bin"),
            CommandEngineConfig::default(),
        );
        assert!(engine.load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_infer_before_load_fails() {
        let engine = CommandEngine::new(
            JobKind::Synthesis,
            ArtifactSpec::new("tts", "https://example.com/tts.bin"),
            CommandEngineConfig::default(),
        );
        let err = engine.infer(&synthesis_payload("hi")).await.unwrap_err();
        assert!(matches!(err, VoxletError::Load(_)));
    }

    #[tokio::test]
    async fn test_infer_runs_child_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, b"weights").unwrap();

        let engine = CommandEngine::new(
            JobKind::Synthesis,
            ArtifactSpec::new("tts", "https://example.com/tts.bin"),
            echo_result_config(),
        );
        engine.load(&path).await.unwrap();

        let output = engine.infer(&synthesis_payload("One. Two. Three.")).await.unwrap();
        match output {
            JobOutput::Synthesis(result) => {
                assert_eq!(result.sample_rate, 24000);
                assert_eq!(result.audio, vec![1, 2, 3]);
            }
            _ => panic!("expected synthesis output"),
        }
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, b"weights").unwrap();

        let engine = CommandEngine::new(
            JobKind::Transcription,
            ArtifactSpec::new("whisper", "https://example.com/w.bin"),
            echo_result_config(),
        );
        engine.load(&path).await.unwrap();

        let err = engine.infer(&synthesis_payload("hi")).await.unwrap_err();
        assert!(matches!(err, VoxletError::Internal(_)));
    }
}
