mod construct;
mod enhance;
mod parse;
mod prompt;
mod repair;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use flowforge_core::{
    Graph, InferencePolicy, InferredEdge, MalformedNodeError, RepairAction, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::cache::ResponseCache;
use crate::{ChatBackend, LlmClient, LlmConfig, Message, SystemClock};

pub use construct::construct_graph;
pub use enhance::{ENHANCEMENT_TIMEOUT, Enhancement, enhance_prompt};
pub use parse::parse_oracle_response;

pub(crate) use parse::{first_json_object, parse_lenient, unparsable};
pub(crate) use prompt::{
    connection_request, connector_system_prompt, fix_request, fix_system_prompt,
    modification_system_prompt,
};
pub(crate) use repair::ask_oracle;

// ── Public types ────────────────────────────────────────────────

/// What is asked of the oracle. Downstream stages ignore the mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Interpret,
    Exact,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Interpret => "interpret",
            BuildMode::Exact => "exact",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interpret" => Ok(BuildMode::Interpret),
            "exact" => Ok(BuildMode::Exact),
            other => Err(format!("unknown build mode '{}'", other)),
        }
    }
}

/// Requested workflow complexity; selects the main oracle call's budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    pub fn timeout(&self) -> Duration {
        match self {
            Complexity::Simple => Duration::from_secs(60),
            Complexity::Medium => Duration::from_secs(120),
            Complexity::Complex => Duration::from_secs(180),
        }
    }
}

/// What to do with an oracle node record that lacks identity fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedNodePolicy {
    /// Drop the node, record a warning, keep building.
    #[default]
    Skip,
    /// Fail the whole build.
    Reject,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub mode: BuildMode,
    pub inference: InferencePolicy,
    pub malformed_nodes: MalformedNodePolicy,
    /// Run the enhancement call before the main one.
    pub enhance: bool,
    /// Apply rule-table repairs for detected defects.
    pub auto_repair: bool,
    /// Re-lay out nodes by depth after inference.
    pub relayout: bool,
    /// Extra oracle attempts with error feedback after a rejected reply.
    pub repair_attempts: usize,
    pub complexity: Complexity,
    /// Overrides the complexity budget when set.
    pub oracle_timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: BuildMode::Interpret,
            inference: InferencePolicy::default(),
            malformed_nodes: MalformedNodePolicy::Skip,
            enhance: false,
            auto_repair: true,
            relayout: false,
            repair_attempts: 0,
            complexity: Complexity::Medium,
            oracle_timeout: None,
        }
    }
}

/// The JSON object the oracle is asked to emit. Nodes and connections stay
/// raw so one malformed entry cannot sink the whole response.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleWorkflow {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub connections: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditedDefault {
    pub node_id: String,
    pub field: String,
    pub value: Value,
}

/// Everything the build changed or guessed on the oracle's behalf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildAudit {
    pub injected_defaults: Vec<AuditedDefault>,
    pub inferred_edges: Vec<InferredEdge>,
    pub repairs: Vec<RepairAction>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: Graph,
    pub audit: BuildAudit,
    pub description: Option<String>,
    pub complexity: Complexity,
    /// The oracle reply came from the response cache.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Oracle unreachable: {reason}")]
    OracleUnreachable { reason: String },

    #[error("Oracle response unparsable: {reason}")]
    OracleResponseUnparsable { raw: String, reason: String },

    #[error(transparent)]
    MalformedNode(#[from] MalformedNodeError),

    #[error("Generated graph is invalid: {0}")]
    InvalidGraph(#[from] ValidationError),

    #[error("Nodes left unconnected after inference: {}", .0.join(", "))]
    OrphanNodes(Vec<String>),
}

impl BuildError {
    /// Whether re-prompting the oracle could help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BuildError::OracleUnreachable { .. })
    }
}

// ── Builder ─────────────────────────────────────────────────────

/// Runs the oracle calls and the construction pipeline for one prompt.
pub struct GraphBuilder<'a, B, C = SystemClock> {
    backend: &'a B,
    enhancer: Option<&'a B>,
    cache: Option<&'a ResponseCache<C>>,
    options: BuildOptions,
}

impl<'a, B: ChatBackend> GraphBuilder<'a, B> {
    pub fn new(backend: &'a B, options: BuildOptions) -> Self {
        Self {
            backend,
            enhancer: None,
            cache: None,
            options,
        }
    }
}

impl<'a, B: ChatBackend, C: crate::Clock> GraphBuilder<'a, B, C> {
    /// Send the enhancement call to a different backend (usually a lighter model).
    pub fn with_enhancer(mut self, enhancer: &'a B) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_cache<C2: crate::Clock>(
        self,
        cache: &'a ResponseCache<C2>,
    ) -> GraphBuilder<'a, B, C2> {
        GraphBuilder {
            backend: self.backend,
            enhancer: self.enhancer,
            cache: Some(cache),
            options: self.options,
        }
    }

    pub async fn build(&self, prompt: &str) -> Result<BuildOutput, BuildError> {
        let options = &self.options;
        let mode = options.mode.as_str();

        if let Some(raw) = self.cache.and_then(|c| c.get(mode, prompt)) {
            let workflow = parse_oracle_response(&raw)?;
            let (graph, audit) = construct_graph(workflow.clone(), prompt, options)?;
            info!("Built workflow from cached oracle response");
            return Ok(BuildOutput {
                graph,
                audit,
                description: workflow.description,
                complexity: options.complexity,
                cached: true,
            });
        }

        let mut complexity = options.complexity;
        let mut oracle_prompt = prompt.to_string();
        let mut enhancement_warnings = Vec::new();
        if options.enhance {
            let enhancer = self.enhancer.unwrap_or(self.backend);
            let enhancement = enhance_prompt(enhancer, prompt, options.mode).await?;
            complexity = enhancement.complexity;
            oracle_prompt = enhancement.prompt;
            enhancement_warnings.extend(enhancement.warning);
        }

        let budget = options.oracle_timeout.unwrap_or_else(|| complexity.timeout());
        let messages = vec![
            Message::system(prompt::workflow_system_prompt(options.mode)),
            Message::user(oracle_prompt.as_str()),
        ];

        info!(
            mode,
            ?complexity,
            model = self.backend.model_name(),
            "Building workflow from prompt"
        );

        let ((graph, mut audit, description), raw) = repair::chat_with_repair(
            self.backend,
            "Builder",
            messages,
            options.repair_attempts,
            budget,
            |content| {
                let workflow = parse_oracle_response(content)?;
                let description = workflow.description.clone();
                let (graph, audit) = construct_graph(workflow, prompt, options)?;
                Ok((graph, audit, description))
            },
        )
        .await?;

        if let Some(cache) = self.cache {
            cache.insert(mode, prompt, raw);
        }

        if !enhancement_warnings.is_empty() {
            enhancement_warnings.append(&mut audit.warnings);
            audit.warnings = enhancement_warnings;
        }

        info!(
            "Built workflow '{}': {} nodes, {} connections, {} warnings",
            graph.name,
            graph.nodes.len(),
            graph.connections.edge_count(),
            audit.warnings.len()
        );

        Ok(BuildOutput {
            graph,
            audit,
            description,
            complexity,
            cached: false,
        })
    }
}

/// Build a graph from a prompt using the configured oracle.
pub async fn build_graph(
    prompt: &str,
    mode: BuildMode,
    config: LlmConfig,
) -> Result<BuildOutput, BuildError> {
    let oracle = LlmClient::new(config);
    let options = BuildOptions {
        mode,
        ..BuildOptions::default()
    };
    build_graph_with_backend(&oracle, prompt, &options).await
}

/// Build a graph using a given ChatBackend (for testability).
pub async fn build_graph_with_backend(
    backend: &impl ChatBackend,
    prompt: &str,
    options: &BuildOptions,
) -> Result<BuildOutput, BuildError> {
    GraphBuilder::new(backend, options.clone()).build(prompt).await
}
