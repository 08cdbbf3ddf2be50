use std::time::Duration;

use async_trait::async_trait;
use flowforge_core::Graph;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::protocol::*;
use crate::{API_KEY_HEADER, StoreConfig, StoreError, WorkflowStore};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Error bodies kept in `StoreError::Rejected` are cut to this many bytes.
const MAX_ERROR_BODY: usize = 2000;

/// `WorkflowStore` over the engine's REST API.
pub struct StoreClient {
    config: StoreConfig,
    http: reqwest::Client,
}

impl StoreClient {
    pub fn new(config: StoreConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        if let Some(key) = &self.config.api_key {
            builder.header(API_KEY_HEADER, key)
        } else if let Some(user) = &self.config.user {
            builder.basic_auth(user, self.config.password.as_deref())
        } else {
            builder
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let body = self.send_raw(builder).await?;
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Send a request and return the body of a 2xx response undecoded.
    async fn send_raw(&self, builder: RequestBuilder) -> Result<String, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(describe(&e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Unreachable(describe(&e)))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Workflow store rejected request");
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl WorkflowStore for StoreClient {
    async fn list(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut workflows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut builder = self.request(Method::GET, "workflows");
            if let Some(cursor) = &cursor {
                builder = builder.query(&[("cursor", cursor)]);
            }
            let page: Page<WorkflowSummary> = self.send(builder).await?;
            workflows.extend(page.data);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(count = workflows.len(), "Listed workflows");
        Ok(workflows)
    }

    async fn get(&self, id: &str) -> Result<Graph, StoreError> {
        self.send(self.request(Method::GET, &format!("workflows/{}", id)))
            .await
    }

    async fn create(&self, graph: &Graph) -> Result<Graph, StoreError> {
        let payload = WorkflowPayload::from(graph);
        let created: Graph = self
            .send(self.request(Method::POST, "workflows").json(&payload))
            .await?;
        info!(
            id = created.id.as_deref().unwrap_or("?"),
            nodes = created.nodes.len(),
            "Created workflow '{}'",
            created.name
        );
        Ok(created)
    }

    async fn update(&self, id: &str, graph: &Graph) -> Result<Graph, StoreError> {
        let payload = WorkflowPayload::from(graph);
        let updated: Graph = self
            .send(
                self.request(Method::PUT, &format!("workflows/{}", id))
                    .json(&payload),
            )
            .await?;
        info!(id, nodes = updated.nodes.len(), "Updated workflow");
        Ok(updated)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<Graph, StoreError> {
        let graph: Graph = self
            .send(
                self.request(Method::PATCH, &format!("workflows/{}", id))
                    .json(&ActivePatch { active }),
            )
            .await?;
        info!(id, active, "Changed workflow activation");
        Ok(graph)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        // Some stores answer 204 with no body; any 2xx body is ignored.
        self.send_raw(self.request(Method::DELETE, &format!("workflows/{}", id)))
            .await?;
        info!(id, "Deleted workflow");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let builder = self
            .request(Method::GET, "workflows")
            .query(&[("limit", "1")])
            .timeout(HEALTH_TIMEOUT);
        match builder.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Workflow store health check failed: {}", describe(&e));
                false
            }
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {}", error)
    } else {
        error.to_string()
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
