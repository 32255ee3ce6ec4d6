//! Remote node health polling

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use voxlet_core::{Endpoint, HealthReport, VoxletError, VoxletResult};

/// Queries a node's externally observable health contract.
///
/// The contract is idempotent and side-effect-free, so polling is safe at any
/// frequency.
#[async_trait]
pub trait NodeHealth: Send + Sync {
    /// Fetch the node's current health report
    async fn check(&self, endpoint: &Endpoint) -> VoxletResult<HealthReport>;
}

/// HTTP implementation polling the node's `/health` route
pub struct HttpNodeHealth {
    client: reqwest::Client,
    health_path: String,
}

impl HttpNodeHealth {
    /// Create a checker with the given per-request timeout
    pub fn new(health_path: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            health_path,
        }
    }
}

impl Default for HttpNodeHealth {
    fn default() -> Self {
        Self::new("/health".to_string(), 5)
    }
}

#[async_trait]
impl NodeHealth for HttpNodeHealth {
    async fn check(&self, endpoint: &Endpoint) -> VoxletResult<HealthReport> {
        let url = format!("{}{}", endpoint.url(), self.health_path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VoxletError::NodeProvisioning(format!("health request failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(
                endpoint = %url,
                status = %response.status(),
                "Health check failed"
            );
            return Err(VoxletError::NodeProvisioning(format!(
                "health returned {}",
                response.status()
            )));
        }

        let report: HealthReport = response
            .json()
            .await
            .map_err(|e| VoxletError::NodeProvisioning(format!("health body invalid: {}", e)))?;

        debug!(endpoint = %url, status = %report.status, "Health check");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxlet_core::ReadinessState;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_check_parses_report() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ready",
                "artifacts": {"chatterbox-tts": true},
                "device": "cuda",
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let port = uri.rsplit(':').next().unwrap().parse::<u16>().unwrap();
        let endpoint = Endpoint::new("127.0.0.1".to_string(), port);

        let checker = HttpNodeHealth::default();
        let report = checker.check(&endpoint).await.unwrap();
        assert_eq!(report.status, ReadinessState::Ready);
        assert!(report.is_ready());
    }

    #[tokio::test]
    async fn test_check_maps_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let port = server.uri().rsplit(':').next().unwrap().parse::<u16>().unwrap();
        let endpoint = Endpoint::new("127.0.0.1".to_string(), port);

        let checker = HttpNodeHealth::default();
        assert!(checker.check(&endpoint).await.is_err());
    }
}
