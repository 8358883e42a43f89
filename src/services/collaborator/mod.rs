use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::services::templates::Stage;

pub mod llm;

pub use llm::LlmClient;

/// Error types for collaborator calls
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Collaborator returned empty content")]
    EmptyContent,
}

/// External JSON-producing collaborator (feature extraction, reconciliation, summaries)
///
/// Given a stage, its system prompt and a rendered prompt, returns the raw
/// text answer. Parsing and validation happen in the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Collaborator: Send + Sync {
    async fn complete(&self, stage: Stage, system: &str, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Parses a collaborator answer as JSON, tolerating markdown code fences
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_json_fences(text))
}

/// Strips ```json ... ``` or ``` ... ``` code fences
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let inner = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"));

    match inner {
        Some(stripped) => stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start()),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"summary\": \"ok\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n[1, 2]\n```";
        assert_eq!(strip_json_fences(input), "[1, 2]");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        assert_eq!(strip_json_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_json_rejects_prose() {
        assert!(parse_json::<Value>("Sure! Here is the JSON you asked for").is_err());
    }
}
