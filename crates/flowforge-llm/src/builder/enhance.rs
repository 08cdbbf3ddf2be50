use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use super::parse::first_json_object;
use super::prompt::enhancement_system_prompt;
use super::repair::ask_oracle;
use super::{BuildError, BuildMode, Complexity};
use crate::{ChatBackend, Message};

pub const ENHANCEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rewritten prompt plus the oracle's complexity estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Enhancement {
    pub prompt: String,
    pub complexity: Complexity,
    pub recommendations: Option<String>,
    /// Set when the reply could not be used and the original prompt stands.
    pub warning: Option<String>,
}

#[derive(Deserialize)]
struct EnhancementReply {
    #[serde(default)]
    enhanced_prompt: Option<String>,
    #[serde(default)]
    estimated_complexity: Option<String>,
    #[serde(default)]
    recommendations: Option<String>,
}

/// Ask the oracle to sharpen the prompt. An unusable reply falls back to
/// the original prompt; an unreachable oracle fails.
pub async fn enhance_prompt(
    backend: &impl ChatBackend,
    prompt: &str,
    mode: BuildMode,
) -> Result<Enhancement, BuildError> {
    let messages = vec![
        Message::system(enhancement_system_prompt(mode)),
        Message::user(prompt),
    ];

    let content = match ask_oracle(backend, "Enhancer", messages, ENHANCEMENT_TIMEOUT).await {
        Ok(content) => content,
        Err(e @ BuildError::OracleUnreachable { .. }) => return Err(e),
        Err(e) => return Ok(fallback(prompt, e.to_string())),
    };

    let reply = first_json_object(&content)
        .and_then(|v| serde_json::from_value::<EnhancementReply>(v).map_err(|e| e.to_string()));
    let reply = match reply {
        Ok(reply) => reply,
        Err(reason) => return Ok(fallback(prompt, reason)),
    };

    let enhanced = reply
        .enhanced_prompt
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    let Some(enhanced) = enhanced else {
        return Ok(fallback(prompt, "reply had no enhanced_prompt".to_string()));
    };

    let complexity = match reply.estimated_complexity.as_deref().map(str::trim) {
        Some("simple") => Complexity::Simple,
        Some("complex") => Complexity::Complex,
        _ => Complexity::Medium,
    };

    info!(?complexity, "Enhanced prompt ({} chars)", enhanced.len());

    Ok(Enhancement {
        prompt: enhanced,
        complexity,
        recommendations: reply.recommendations,
        warning: None,
    })
}

fn fallback(prompt: &str, reason: String) -> Enhancement {
    warn!("Prompt enhancement unusable, keeping original prompt: {}", reason);
    Enhancement {
        prompt: prompt.to_string(),
        complexity: Complexity::Medium,
        recommendations: None,
        warning: Some(format!("Prompt enhancement skipped: {}", reason)),
    }
}
