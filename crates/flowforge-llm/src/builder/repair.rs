use std::time::Duration;

use crate::{ChatBackend, Message};
use tracing::{debug, info};

use super::BuildError;

/// One oracle round trip under a time budget. Transport failures and
/// timeouts map to `OracleUnreachable`; an empty reply is unparsable.
pub(crate) async fn ask_oracle(
    backend: &impl ChatBackend,
    label: &str,
    messages: Vec<Message>,
    budget: Duration,
) -> Result<String, BuildError> {
    let response = tokio::time::timeout(budget, backend.chat(messages))
        .await
        .map_err(|_| BuildError::OracleUnreachable {
            reason: format!("{} call timed out after {}s", label, budget.as_secs()),
        })?
        .map_err(|e| BuildError::OracleUnreachable {
            reason: format!("{} call failed: {:#}", label, e),
        })?;

    response
        .first_text()
        .map(str::to_string)
        .ok_or_else(|| BuildError::OracleResponseUnparsable {
            raw: String::new(),
            reason: format!("{} returned no text content", label),
        })
}

/// Chat with the oracle, re-prompting with error feedback up to
/// `repair_attempts` times when `process` rejects the output.
/// Returns the processed value and the raw text it came from.
pub(crate) async fn chat_with_repair<T>(
    backend: &impl ChatBackend,
    label: &str,
    messages: Vec<Message>,
    repair_attempts: usize,
    budget: Duration,
    mut process: impl FnMut(&str) -> Result<T, BuildError>,
) -> Result<(T, String), BuildError> {
    let mut messages = messages;
    let mut last_error: Option<String> = None;

    for attempt in 0..=repair_attempts {
        if let Some(ref err) = last_error {
            info!("Repair attempt {} for {} error: {}", attempt, label, err);
            messages.push(Message::user(format!(
                "Your previous output had an error: {}\n\nPlease fix the JSON and try again. Output ONLY the corrected JSON object.",
                err
            )));
        }

        let content = ask_oracle(backend, label, messages.clone(), budget).await?;

        debug!("{} raw output (attempt {}): {}", label, attempt, content);

        messages.push(Message::assistant(content.as_str()));

        match process(&content) {
            Ok(result) => return Ok((result, content)),
            Err(e) if attempt < repair_attempts && e.is_retryable() => {
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    Err(BuildError::OracleResponseUnparsable {
        raw: String::new(),
        reason: format!("{} failed after repair attempts", label),
    })
}
