//! HTTP fetcher implementation
//!
//! This module performs the single GET behind every fetch job:
//! - Building the HTTP client routed through the anonymizing proxy
//! - A fixed browser-like header profile
//! - Bounding the response and the body read by the fetch TTL
//! - Classifying responses by status and content type
//! - Replacing bodies that carry encoded media with a sentinel

use crate::crawler::job::{FetchJob, FetchResult, EMBEDDED_MEDIA_BODY, UNSUPPORTED_MEDIA_BODY};
use crate::storage::now_millis;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client, Proxy, Response};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::timeout;
use tracing::trace;

/// User agent shared by every request; matches the common anonymity-browser profile
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:109.0) Gecko/20100101 Firefox/115.0";

const ACCEPT_PROFILE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

const ACCEPT_LANGUAGE_PROFILE: &str = "en-US,en;q=0.5";

/// Length of an unbroken base64 run treated as an inlined payload
const EMBEDDED_RUN_THRESHOLD: usize = 1024;

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)data:[a-z]+/[a-z0-9.+-]+;base64,").expect("data URI pattern is valid")
});

/// Builds the HTTP client used by every fetch task
///
/// All traffic goes through `proxy_url`. Onion services commonly present
/// self-signed certificates, so certificate validation is off; the onion
/// address itself authenticates the service.
///
/// # Arguments
///
/// * `proxy_url` - SOCKS or HTTP proxy endpoint, e.g. `socks5h://127.0.0.1:9050`
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or client setup failure
pub fn build_http_client(proxy_url: &str) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_PROFILE));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE_PROFILE),
    );

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .proxy(Proxy::all(proxy_url)?)
        .redirect(Policy::limited(10))
        .danger_accept_invalid_certs(true)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches one job
///
/// Never fails: network errors and TTL expiry become a synthesized failure
/// result.
///
/// # Classification
///
/// | Condition | Result |
/// |-----------|--------|
/// | No response within TTL | failure, status 400 |
/// | Transport error | failure, status 400 |
/// | Status outside 200..400 | failure, real status, no body |
/// | Content type not html/xhtml/json | success, unsupported-media sentinel |
/// | Body not complete within TTL | failure, status 400 |
/// | Body carries encoded media | success, embedded-media sentinel |
/// | Otherwise | success with the body text |
pub async fn fetch(client: &Client, job: &FetchJob, ttl: Duration) -> FetchResult {
    let start_time = now_millis();

    let response = match timeout(ttl, client.get(job.url()).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            return FetchResult::failure(job, start_time, now_millis(), describe_error(&e));
        }
        Err(_) => {
            return FetchResult::failure(
                job,
                start_time,
                now_millis(),
                format!("no response within {}ms", ttl.as_millis()),
            );
        }
    };

    let status_code = response.status().as_u16();
    let mime_type = content_type(&response);

    let finish = |body: Option<String>| FetchResult {
        host: job.host.clone(),
        path: job.path.clone(),
        body,
        status_code,
        mime_type: mime_type.clone(),
        start_time,
        end_time: now_millis(),
        error: None,
    };

    // Dropping the response discards whatever body is left
    if !(200..400).contains(&status_code) {
        return finish(None);
    }

    if !mime_type.as_deref().is_some_and(is_text_media) {
        trace!(host = %job.host, path = %job.path, mime = ?mime_type, "Unsupported media");
        return finish(Some(UNSUPPORTED_MEDIA_BODY.to_string()));
    }

    let body = match timeout(ttl, read_body(response)).await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            return FetchResult::failure(job, start_time, now_millis(), describe_error(&e));
        }
        Err(_) => {
            return FetchResult::failure(
                job,
                start_time,
                now_millis(),
                format!("body not complete within {}ms", ttl.as_millis()),
            );
        }
    };

    if carries_embedded_media(&body) {
        return finish(Some(EMBEDDED_MEDIA_BODY.to_string()));
    }

    finish(Some(body))
}

async fn read_body(mut response: Response) -> Result<String, reqwest::Error> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// The lowercase media type without parameters
fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Returns true for the html, xhtml and json families
pub fn is_text_media(mime: &str) -> bool {
    matches!(mime, "text/html" | "application/xhtml+xml") || mime.contains("json")
}

/// Returns true if `text` inlines an encoded media payload
pub fn carries_embedded_media(text: &str) -> bool {
    if DATA_URI.is_match(text) {
        return true;
    }

    let mut run = 0;
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/' {
            run += 1;
            if run >= EMBEDDED_RUN_THRESHOLD {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}
