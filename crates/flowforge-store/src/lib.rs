mod client;
mod protocol;

use std::time::Duration;

use async_trait::async_trait;
use flowforge_core::Graph;
use thiserror::Error;

pub use client::StoreClient;
pub use protocol::*;

pub const API_KEY_HEADER: &str = "X-N8N-API-KEY";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base of the REST API, e.g. `http://localhost:5678/api/v1`.
    pub api_url: String,
    /// Sent as `X-N8N-API-KEY`. Takes precedence over basic auth.
    pub api_key: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5678/api/v1".to_string(),
            api_key: None,
            user: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Workflow store unreachable: {0}")]
    Unreachable(String),

    #[error("Workflow store rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected workflow store response: {0}")]
    Decode(String),
}

/// Remote persistence for workflow graphs.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError>;

    async fn get(&self, id: &str) -> Result<Graph, StoreError>;

    /// Create a workflow from the structural fields of `graph`. The returned
    /// graph carries the store-assigned id.
    async fn create(&self, graph: &Graph) -> Result<Graph, StoreError>;

    /// Replace the structure of an existing workflow.
    async fn update(&self, id: &str, graph: &Graph) -> Result<Graph, StoreError>;

    async fn set_active(&self, id: &str, active: bool) -> Result<Graph, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Whether the store answers an authenticated listing request.
    async fn health_check(&self) -> bool;
}
