mod builder;
pub mod cache;
mod client;
mod connect;
mod fixes;
mod modify;
mod types;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use builder::{
    AuditedDefault, BuildAudit, BuildError, BuildMode, BuildOptions, BuildOutput, Complexity,
    ENHANCEMENT_TIMEOUT, Enhancement, GraphBuilder, MalformedNodePolicy, OracleWorkflow, build_graph,
    build_graph_with_backend, construct_graph, enhance_prompt, parse_oracle_response,
};
pub use cache::{Clock, ResponseCache, SystemClock};
pub use client::*;
pub use connect::{CONNECT_TIMEOUT, ConnectionProposal, plan_connections_with_backend};
pub use fixes::{FIX_TIMEOUT, RepairProposal, plan_repairs_with_backend};
pub use modify::{MODIFY_TIMEOUT, ModificationPlan, plan_modification_with_backend};
pub use types::*;

/// Anything that can answer an OpenAI-style chat request.
///
/// `LlmClient` is the production implementation; tests script responses.
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    fn chat(&self, messages: Vec<Message>) -> impl Future<Output = Result<ChatResponse>> + Send;
}

/// Where a repair or connection plan comes from. The oracle is only ever
/// a proposer; rules fill in whatever it leaves unresolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    #[default]
    Rules,
    Oracle,
}

impl fmt::Display for PlanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanSource::Rules => "rules",
            PlanSource::Oracle => "oracle",
        })
    }
}

impl FromStr for PlanSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(PlanSource::Rules),
            "oracle" | "llm" => Ok(PlanSource::Oracle),
            other => Err(format!("unknown plan source '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_source_parses() {
        assert_eq!("LLM".parse::<PlanSource>().unwrap(), PlanSource::Oracle);
        assert_eq!(" rules ".parse::<PlanSource>().unwrap(), PlanSource::Rules);
        assert!("magic".parse::<PlanSource>().is_err());
        assert_eq!(PlanSource::Oracle.to_string(), "oracle");
    }
}
