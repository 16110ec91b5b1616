//! The logical summarization request and its cache fingerprint.

use serde::Serialize;

use crate::cache::fingerprint;
use crate::config::AiConfig;
use crate::error::CacheError;
use crate::summarizer::DiffDocument;

/// Bumped whenever the prompt text changes, so old summaries stop matching.
pub const PROMPT_VERSION: &str = "1";

const SYSTEM_PROMPT: &str = "You are an expert AWS infrastructure architect who explains \
infrastructure changes in plain language.";

// == Summary Request ==
/// Everything that determines the generated summary.
///
/// Only result-affecting settings live here. Timeouts, retry budgets, the
/// endpoint and credentials are left out so they never change the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRequest {
    pub diff: DiffDocument,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_version: &'static str,
}

impl SummaryRequest {
    /// Builds a request for `diff` with the generation settings of `ai`.
    pub fn new(diff: DiffDocument, ai: &AiConfig) -> Self {
        Self {
            diff,
            model: ai.model.clone(),
            temperature: ai.temperature,
            max_tokens: ai.max_tokens,
            prompt_version: PROMPT_VERSION,
        }
    }

    /// Cache key for this request: lowercase hex SHA-256 of its canonical JSON.
    pub fn fingerprint(&self) -> Result<String, CacheError> {
        fingerprint(self)
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    /// User prompt listing every change in the diff.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::from(
            "Summarize the following infrastructure changes for a pull request reviewer. \
Highlight security-sensitive, destructive and cost-relevant changes.\n\nChanges:\n",
        );
        for line in self.diff.change_lines() {
            prompt.push_str("- ");
            prompt.push_str(&line);
            prompt.push('\n');
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn diff() -> DiffDocument {
        DiffDocument::from_json_str(
            r#"{"stacks": {"S": {"resources": {"B": {"type": "AWS::S3::Bucket", "create": true}}}}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = SummaryRequest::new(diff(), &AiConfig::default())
            .fingerprint()
            .unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_operational_settings_do_not_change_fingerprint() {
        let base = AiConfig::default();
        let operational = AiConfig {
            api_key: "sk-other".to_string(),
            max_retries: 9,
            timeout: Duration::from_secs(1),
            base_url: "http://localhost:1".to_string(),
            ..AiConfig::default()
        };
        assert_eq!(
            SummaryRequest::new(diff(), &base).fingerprint().unwrap(),
            SummaryRequest::new(diff(), &operational).fingerprint().unwrap()
        );
    }

    #[test]
    fn test_model_changes_fingerprint() {
        let other = AiConfig {
            model: "gpt-4o".to_string(),
            ..AiConfig::default()
        };
        assert_ne!(
            SummaryRequest::new(diff(), &AiConfig::default())
                .fingerprint()
                .unwrap(),
            SummaryRequest::new(diff(), &other).fingerprint().unwrap()
        );
    }

    #[test]
    fn test_diff_changes_fingerprint() {
        let ai = AiConfig::default();
        assert_ne!(
            SummaryRequest::new(diff(), &ai).fingerprint().unwrap(),
            SummaryRequest::new(DiffDocument::default(), &ai)
                .fingerprint()
                .unwrap()
        );
    }

    #[test]
    fn test_field_order_in_source_json_is_irrelevant() {
        let a = DiffDocument::from_json_str(
            r#"{"stacks": {"S": {"update": true, "resources": {"R": {"type": "T", "update": true}}}}}"#,
        )
        .unwrap();
        let b = DiffDocument::from_json_str(
            r#"{"stacks": {"S": {"resources": {"R": {"update": true, "type": "T"}}, "update": true}}}"#,
        )
        .unwrap();
        let ai = AiConfig::default();
        assert_eq!(
            SummaryRequest::new(a, &ai).fingerprint().unwrap(),
            SummaryRequest::new(b, &ai).fingerprint().unwrap()
        );
    }

    #[test]
    fn test_user_prompt_lists_changes() {
        let prompt = SummaryRequest::new(diff(), &AiConfig::default()).user_prompt();
        assert!(prompt.contains("- Resource 'B' (AWS::S3::Bucket) will be created in stack 'S'"));
    }
}
