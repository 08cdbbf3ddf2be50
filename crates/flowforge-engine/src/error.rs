use std::fmt;

use flowforge_core::ValidationError;
use flowforge_llm::BuildError;
use flowforge_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Oracle,
    Parse,
    Construct,
    Validate,
    Store,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Oracle => "oracle",
            Stage::Parse => "parse",
            Stage::Construct => "construct",
            Stage::Validate => "validate",
            Stage::Store => "store",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Workflow failed validation: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Modification refused as unsafe: {summary}")]
    UnsafeModification { summary: String },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Build(e) => match e {
                BuildError::OracleUnreachable { .. } => Stage::Oracle,
                BuildError::OracleResponseUnparsable { .. } => Stage::Parse,
                BuildError::MalformedNode(_) | BuildError::OrphanNodes(_) => Stage::Construct,
                BuildError::InvalidGraph(_) => Stage::Validate,
            },
            PipelineError::Store(_) => Stage::Store,
            PipelineError::Invalid(_) => Stage::Validate,
            PipelineError::UnsafeModification { .. } => Stage::Oracle,
        }
    }
}
