//! Request DTOs for the remote APIs
//!
//! Defines the structure of outgoing HTTP request bodies.

use serde::Serialize;

use crate::summarizer::SummaryRequest;

/// One chat message (`system` or `user`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Request body for POST `{base_url}/chat/completions`
///
/// # Fields
/// - `model`: model identifier
/// - `messages`: system prompt followed by the user prompt
/// - `temperature`: sampling temperature
/// - `max_tokens`: output length limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl From<&SummaryRequest> for ChatRequest {
    fn from(request: &SummaryRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: vec![
                ChatMessage::system(request.system_prompt()),
                ChatMessage::user(request.user_prompt()),
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

/// Request body for POST `/repos/{repo}/issues/{number}/comments`
#[derive(Debug, Clone, Serialize)]
pub struct CommentRequest<'a> {
    pub body: &'a str,
}

/// Request body for POST `/repos/{repo}/issues`
#[derive(Debug, Clone, Serialize)]
pub struct IssueRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiConfig;
    use crate::summarizer::DiffDocument;

    #[test]
    fn test_chat_request_serialize() {
        let request = SummaryRequest::new(DiffDocument::default(), &AiConfig::default());
        let body = ChatRequest::from(&request);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["max_tokens"], 500);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("Changes:"));
    }

    #[test]
    fn test_issue_request_serialize() {
        let json = serde_json::to_string(&IssueRequest {
            title: "t",
            body: "b",
        })
        .unwrap();
        assert_eq!(json, r#"{"title":"t","body":"b"}"#);
    }
}
