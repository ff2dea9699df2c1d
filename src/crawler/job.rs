//! Fetch jobs and fetch results
//!
//! A [`FetchJob`] is the snapshot of a frontier item handed to the admission
//! controller; a [`FetchResult`] is what comes back after one attempt.

use crate::storage::{FrontierItem, NewFrontierItem};
use crate::UrlResult;

/// Status recorded for attempts that never produced a usable response
/// (timeouts, connection failures, proxy errors, panicking tasks)
pub const SYNTHETIC_FAILURE_STATUS: u16 = 400;

/// Body stored for responses whose content type is not text we process
pub const UNSUPPORTED_MEDIA_BODY: &str = "[onion-ripple: unsupported media]";

/// Body stored for text responses that carry an encoded media payload
pub const EMBEDDED_MEDIA_BODY: &str = "[onion-ripple: embedded media]";

/// One fetch attempt as scheduled by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    /// Full host name, subdomain labels included
    pub host: String,
    pub path: String,
    pub secure: bool,
    pub depth: u32,
    pub frontier_item_id: i64,
    /// When the job was pulled from the store (ms since epoch)
    pub scheduled_time: i64,
}

impl FetchJob {
    /// Packages a claimed frontier item as a job
    pub fn from_item(item: &FrontierItem, scheduled_time: i64) -> Self {
        Self {
            host: item.host.clone(),
            path: item.path.clone(),
            secure: item.secure,
            depth: item.depth,
            frontier_item_id: item.id,
            scheduled_time,
        }
    }

    /// The absolute URL this job fetches
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.host, self.path)
    }

    /// The frontier row this job belongs to, for persisting the outcome
    pub fn to_frontier_item(&self) -> UrlResult<NewFrontierItem> {
        NewFrontierItem::new(self.host.as_str(), self.path.as_str(), self.depth, self.secure)
    }
}

/// Outcome of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub host: String,
    pub path: String,
    /// Response text, a sentinel, or `None` for failures
    pub body: Option<String>,
    pub status_code: u16,
    pub mime_type: Option<String>,
    /// ms since epoch
    pub start_time: i64,
    /// ms since epoch
    pub end_time: i64,
    /// What went wrong, for logging only
    pub error: Option<String>,
}

impl FetchResult {
    /// A failure with a synthesized status and no body
    pub fn failure(job: &FetchJob, start_time: i64, end_time: i64, error: impl Into<String>) -> Self {
        Self {
            host: job.host.clone(),
            path: job.path.clone(),
            body: None,
            status_code: SYNTHETIC_FAILURE_STATUS,
            mime_type: None,
            start_time,
            end_time,
            error: Some(error.into()),
        }
    }

    /// True for statuses in `[200, 400)`
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    /// The body if it is page text worth storing and scanning for links
    pub fn usable_body(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.body
            .as_deref()
            .filter(|body| *body != UNSUPPORTED_MEDIA_BODY && *body != EMBEDDED_MEDIA_BODY)
    }
}
