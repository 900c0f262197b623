//! Client side of a remote workflow system.
//!
//! [`WorkflowApi`] is the narrow contract [`RemoteBackend`](super::RemoteBackend)
//! needs. [`HttpWorkflowApi`] implements it over a JSON/REST interface using
//! [`reqwest`]:
//!
//! | Call        | Request                                   |
//! |-------------|-------------------------------------------|
//! | launch      | `POST {base}/jobs`                        |
//! | status      | `GET {base}/jobs/{job}`                   |
//! | fetch       | `GET {base}/jobs/{job}/outputs/{output}`  |
//! | cancel      | `POST {base}/jobs/{job}/cancel`           |
//! | release     | `DELETE {base}/jobs/{job}`                |

use std::collections::BTreeMap;

use async_trait::async_trait;
use phylo_core::{Analysis, InputRole};
use serde::{Deserialize, Serialize};

use crate::backend::BackendError;

/// Header carrying the API key on every request.
const API_KEY_HEADER: &str = "x-api-key";

/// Status of a remote job as returned by the remote system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteJobStatus {
    /// Raw state string, e.g. `"queued"`, `"running"`, `"ok"`.
    pub state: String,
    /// Output name to remote output identifier.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[async_trait]
pub trait WorkflowApi: Send + Sync + 'static {
    /// Submit the analysis. Returns the remote job identifier.
    async fn launch(&self, analysis: &Analysis) -> Result<String, BackendError>;

    async fn status(&self, job: &str) -> Result<RemoteJobStatus, BackendError>;

    /// Download the content of one output of a finished job.
    async fn fetch_output(&self, job: &str, output: &str) -> Result<String, BackendError>;

    async fn cancel(&self, job: &str) -> Result<(), BackendError>;

    /// Delete the job and everything stored with it.
    async fn release(&self, job: &str) -> Result<(), BackendError>;
}

// ---------------------------------------------------------------------------
// HttpWorkflowApi
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LaunchFile {
    role: InputRole,
    name: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct LaunchRequest<'a> {
    analysis_id: &'a str,
    workflow: &'a str,
    bootstrap_replicates: u32,
    parameters: &'a serde_json::Value,
    files: Vec<LaunchFile>,
}

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    id: String,
}

/// JSON/REST client for one remote workflow system.
pub struct HttpWorkflowApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpWorkflowApi {
    /// * `base_url` - e.g. `https://workflows.example.org/api`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pooling).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, or turn it into
    /// [`BackendError::Api`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn launch(&self, analysis: &Analysis) -> Result<String, BackendError> {
        let mut files = Vec::with_capacity(analysis.inputs.files.len());
        for file in &analysis.inputs.files {
            let content = tokio::fs::read_to_string(&file.path).await?;
            files.push(LaunchFile {
                role: file.role,
                name: file
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                content,
            });
        }

        let body = LaunchRequest {
            analysis_id: analysis.id.as_str(),
            workflow: analysis.inputs.workflow.label(),
            bootstrap_replicates: analysis.inputs.bootstrap_replicates,
            parameters: &analysis.inputs.parameters,
            files,
        };

        let response = self
            .request(reqwest::Method::POST, "/jobs")
            .json(&body)
            .send()
            .await?;
        let launched: LaunchResponse = Self::parse_response(response).await?;
        Ok(launched.id)
    }

    async fn status(&self, job: &str) -> Result<RemoteJobStatus, BackendError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/jobs/{job}"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_output(&self, job: &str, output: &str) -> Result<String, BackendError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/jobs/{job}/outputs/{output}"))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.text().await?)
    }

    async fn cancel(&self, job: &str) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::POST, &format!("/jobs/{job}/cancel"))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn release(&self, job: &str) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/jobs/{job}"))
            .send()
            .await?;
        match Self::ensure_success(response).await {
            Ok(_) => Ok(()),
            // Already gone.
            Err(BackendError::Api { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
