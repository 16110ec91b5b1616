//! Response DTOs for the remote APIs
//!
//! Defines the structure of incoming HTTP response bodies. Every field the
//! services may omit is defaulted so partial bodies still parse.

use serde::Deserialize;

/// Response body of a successful chat completion
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if present and not blank.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
            .filter(|content| !content.trim().is_empty())
    }
}

/// Error body returned with non-2xx statuses
///
/// `{"error": {"message": "...", "type": "...", "code": "..."}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiErrorDetail {
    /// Message, type and code joined for matching and logging.
    pub fn describe(&self) -> String {
        let mut parts = vec![self.message.as_str()];
        parts.extend(self.kind.as_deref());
        parts.extend(self.code.as_deref());
        parts.retain(|p| !p.is_empty());
        parts.join(" | ")
    }
}

/// The part of a created issue or comment we use
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedComment {
    pub id: u64,
}
