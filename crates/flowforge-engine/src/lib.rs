mod error;
mod pipeline;

pub use error::{PipelineError, Stage};
pub use pipeline::*;
