//! Wire models for the remote APIs
//!
//! DTOs for the chat-completions endpoint and the GitHub issues API.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ChatMessage, ChatRequest, CommentRequest, IssueRequest};
pub use responses::{
    ApiErrorBody, ApiErrorDetail, ChatChoice, ChatResponse, ChoiceMessage, CreatedComment,
    CreatedIssue,
};
