//! Posting Sink Module
//!
//! Publishes a finished summary to a pull request comment, or to a new issue
//! when the triggering event has no pull request.

use std::path::Path;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::GithubConfig;
use crate::models::{CommentRequest, CreatedComment, CreatedIssue, IssueRequest};

const ISSUE_TITLE: &str = "Infrastructure change summary";
const USER_AGENT: &str = concat!("infra-lens/", env!("CARGO_PKG_VERSION"));

// == Summary Sink ==
/// Destination for a finished summary.
#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Publishes `summary`, returning the PR or issue number it landed on.
    async fn publish(&self, summary: &str) -> anyhow::Result<Option<u64>>;
}

// == Dry Run Sink ==
/// Logs the summary instead of posting it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

#[async_trait]
impl SummarySink for DryRunSink {
    async fn publish(&self, summary: &str) -> anyhow::Result<Option<u64>> {
        info!("Dry run: not posting summary ({} bytes)", summary.len());
        Ok(None)
    }
}

/// Where a summary goes for a given event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTarget {
    /// Comment on this PR or issue
    Comment(u64),
    /// Open a new issue
    NewIssue,
    /// Nowhere to post
    Skip,
}

/// PR number of the event: `pull_request.number`, else `issue.number`.
pub fn event_number(event: &Value) -> Option<u64> {
    event
        .pointer("/pull_request/number")
        .and_then(Value::as_u64)
        .or_else(|| event.pointer("/issue/number").and_then(Value::as_u64))
}

/// Chooses the post target for an event payload.
pub fn resolve_target(event: &Value, create_issue_if_no_pr: bool) -> PostTarget {
    match event_number(event) {
        Some(number) => PostTarget::Comment(number),
        None if create_issue_if_no_pr => PostTarget::NewIssue,
        None => PostTarget::Skip,
    }
}

// == GitHub Comment Sink ==
/// Posts through the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubCommentSink {
    http: reqwest::Client,
    config: GithubConfig,
}

impl GithubCommentSink {
    pub fn new(config: GithubConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self { http, config })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.repository,
            path
        )
    }

    async fn post<B, T>(&self, url: &str, body: &B) -> anyhow::Result<T>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("GitHub API returned {} for {}: {}", status, url, text.trim());
        }
        response
            .json()
            .await
            .with_context(|| format!("unexpected response body from {}", url))
    }

    async fn comment(&self, number: u64, summary: &str) -> anyhow::Result<u64> {
        let url = self.repo_url(&format!("issues/{}/comments", number));
        let created: CreatedComment = self.post(&url, &CommentRequest { body: summary }).await?;
        info!("Posted summary comment {} on #{}", created.id, number);
        Ok(number)
    }

    async fn open_issue(&self, summary: &str) -> anyhow::Result<u64> {
        let url = self.repo_url("issues");
        let request = IssueRequest {
            title: ISSUE_TITLE,
            body: summary,
        };
        let created: CreatedIssue = self.post(&url, &request).await?;
        info!("Opened issue #{} with summary", created.number);
        Ok(created.number)
    }
}

fn read_event(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event payload {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid event payload {}", path.display()))
}

#[async_trait]
impl SummarySink for GithubCommentSink {
    async fn publish(&self, summary: &str) -> anyhow::Result<Option<u64>> {
        let event = read_event(&self.config.event_path)?;

        match resolve_target(&event, self.config.create_issue_if_no_pr) {
            PostTarget::Comment(number) => self.comment(number, summary).await.map(Some),
            PostTarget::NewIssue => self.open_issue(summary).await.map(Some),
            PostTarget::Skip => {
                warn!("Event has no pull request and issue creation is disabled; not posting");
                Ok(None)
            }
        }
    }
}
