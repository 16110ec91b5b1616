//! Summarizer Module
//!
//! Turns an infrastructure diff into a summary, reusing cached results and
//! retrying the remote service when it fails transiently.

mod client;
mod diff;
mod pipeline;
mod request;

pub use client::{map_error_status, OpenAiClient, SummaryService};
pub use diff::{load_diff, ChangeKind, DiffDocument, ResourceDiff, StackDiff};
pub use pipeline::{Summarizer, SummaryReport, SummarySource, NO_CHANGES_SUMMARY};
pub use request::{SummaryRequest, PROMPT_VERSION};
