use loopweave_core::WorkflowDocument;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::SyncError;
use crate::types::{ListResponse, WorkflowSummary};

const API_KEY_HEADER: &str = "X-N8N-API-KEY";

#[derive(Debug, Clone)]
pub struct N8nConfig {
    /// Server root, e.g. `http://localhost:5678`. A trailing slash is ignored.
    pub base_url: String,
    pub api_key: String,
}

impl N8nConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn workflows_url(&self) -> String {
        format!("{}/api/v1/workflows", self.base_url.trim_end_matches('/'))
    }

    fn workflow_url(&self, id: &str) -> String {
        format!("{}/{}", self.workflows_url(), id)
    }
}

/// Where workflow documents are read from and written back to.
#[allow(async_fn_in_trait)]
pub trait WorkflowBackend {
    /// Human-readable location, used in log messages.
    fn endpoint(&self) -> &str;

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, SyncError>;

    async fn fetch_workflow(&self, id: &str) -> Result<WorkflowDocument, SyncError>;

    /// Replace the remote workflow with `document`.
    async fn update_workflow(
        &self,
        id: &str,
        document: &WorkflowDocument,
    ) -> Result<(), SyncError>;
}

/// REST client for the automation platform's public API.
pub struct N8nClient {
    config: N8nConfig,
    http: reqwest::Client,
}

impl N8nClient {
    pub fn new(config: N8nConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &N8nConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(
        &self,
        method: &'static str,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<String, SyncError> {
        debug!("{} {}", method, url);
        let transport = |source| SyncError::Transport {
            url: url.to_string(),
            source,
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(SyncError::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        let body = self
            .send("GET", url, self.request(reqwest::Method::GET, url))
            .await?;
        serde_json::from_str(&body).map_err(|source| SyncError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl WorkflowBackend for N8nClient {
    fn endpoint(&self) -> &str {
        &self.config.base_url
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, SyncError> {
        let list: ListResponse = self.get_json(&self.config.workflows_url()).await?;
        let workflows = list.into_workflows();
        info!("Listed {} workflow(s)", workflows.len());
        Ok(workflows)
    }

    async fn fetch_workflow(&self, id: &str) -> Result<WorkflowDocument, SyncError> {
        let document: WorkflowDocument = self.get_json(&self.config.workflow_url(id)).await?;
        info!(
            "Fetched workflow '{}' ({} nodes)",
            document.name,
            document.nodes.len()
        );
        Ok(document)
    }

    async fn update_workflow(
        &self,
        id: &str,
        document: &WorkflowDocument,
    ) -> Result<(), SyncError> {
        let url = self.config.workflow_url(id);
        let builder = self
            .request(reqwest::Method::PUT, &url)
            .json(&document.update_body());
        self.send("PUT", &url, builder).await?;
        info!("Updated workflow '{}' ({})", document.name, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let config = N8nConfig::new("http://localhost:5678/", "key");
        assert_eq!(config.workflows_url(), "http://localhost:5678/api/v1/workflows");
        assert_eq!(
            config.workflow_url("FimIaNZ66cEz96GM"),
            "http://localhost:5678/api/v1/workflows/FimIaNZ66cEz96GM"
        );
    }

    #[test]
    fn test_status_error_keeps_raw_body() {
        let err = SyncError::Status {
            method: "PUT",
            url: "http://localhost:5678/api/v1/workflows/x".to_string(),
            status: 400,
            body: r#"{"message":"request/body must NOT have additional properties"}"#.to_string(),
        };
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("must NOT have additional properties"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) is closed on test machines; the connection is refused.
        let client = N8nClient::new(N8nConfig::new("http://127.0.0.1:9", "key"));
        let err = client.fetch_workflow("abc").await.unwrap_err();
        assert!(matches!(err, SyncError::Transport { .. }), "{err}");
        assert_eq!(err.status(), None);
    }
}
