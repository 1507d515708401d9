use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PluginError;
use crate::plugin::{AllocatedNode, AllocationStatus, HardwarePlugin};

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// A hardware plugin reached over its HTTP API.
///
/// 4xx responses are surfaced as fatal [`PluginError::Request`]; 5xx and
/// transport failures as retryable [`PluginError::Unavailable`].
pub struct HttpHardwarePlugin {
    name: String,
    base_url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpHardwarePlugin {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_DEADLINE)
            .build()
            .map_err(|e| PluginError::Internal(e.to_string()))?;
        let base_url = base_url.into();
        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, id: &str, path: &str) -> Result<T, PluginError> {
        let url = format!(
            "{}/hardware-manager/provisioning/node-allocation-requests/{}{}",
            self.base_url, id, path
        );
        debug!(plugin = %self.name, %url, "plugin query");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| PluginError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PluginError::UnknownAllocation(id.to_string()));
        }
        if status.is_server_error() {
            return Err(PluginError::Unavailable(format!("{} from {}", status, url)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PluginError::Request { status: status.as_u16(), message });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| PluginError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HardwarePlugin for HttpHardwarePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_allocation(&self, id: &str) -> Result<AllocationStatus, PluginError> {
        self.get(id, "").await
    }

    async fn query_allocated_nodes(&self, id: &str) -> Result<Vec<AllocatedNode>, PluginError> {
        self.get(id, "/allocated-nodes").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::AllocationPhase;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn decodes_allocation_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/hardware-manager/provisioning/node-allocation-requests/nar-1",
            ))
            .and(header("authorization", "Bearer sesame"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "phase": "Provisioned",
                "message": "all nodes allocated",
                "nodeNames": ["node-0"]
            })))
            .mount(&server)
            .await;

        let plugin =
            HttpHardwarePlugin::new("metal3", server.uri(), Some("sesame".into())).unwrap();
        let status = plugin.query_allocation("nar-1").await.unwrap();
        assert_eq!(status.phase, AllocationPhase::Provisioned);
        assert_eq!(status.node_names, vec!["node-0"]);
    }

    #[tokio::test]
    async fn decodes_allocated_nodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/hardware-manager/provisioning/node-allocation-requests/nar-1/allocated-nodes",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "5b1f8a9e-0d9f-4a51-9fcb-1b6ad4f2a001",
                "bmhName": "bmh-0",
                "bmhNamespace": "hardware",
                "hostname": "edge-1-node-0.example.com"
            }])))
            .mount(&server)
            .await;

        let plugin = HttpHardwarePlugin::new("metal3", server.uri(), None).unwrap();
        let nodes = plugin.query_allocated_nodes("nar-1").await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].hostname, "edge-1-node-0.example.com");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let plugin = HttpHardwarePlugin::new("metal3", server.uri(), None).unwrap();
        let err = plugin.query_allocation("nar-1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad group layout"))
            .mount(&server)
            .await;

        let plugin = HttpHardwarePlugin::new("metal3", server.uri(), None).unwrap();
        let err = plugin.query_allocation("nar-1").await.unwrap_err();
        match err {
            PluginError::Request { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad group layout");
            }
            other => panic!("expected Request, got {other}"),
        }
        assert!(!plugin
            .query_allocation("nar-1")
            .await
            .unwrap_err()
            .is_transient());
    }

    #[tokio::test]
    async fn missing_allocation_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let plugin = HttpHardwarePlugin::new("metal3", server.uri(), None).unwrap();
        let err = plugin.query_allocation("nar-9").await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownAllocation(_)));
    }
}
