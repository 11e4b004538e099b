use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    domain::{Subject, Thread},
    http::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError},
};

const PUBLIC_DOMAIN: &str = "github.com";
const PUBLIC_API_HOST: &str = "api.github.com";
const ENTERPRISE_API_PATH: &str = "api/v3";
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";
const POLL_INTERVAL_HEADER: &str = "X-Poll-Interval";
const ACCEPT_JSON: &str = "application/vnd.github+json";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Status code carried by errors that never produced an HTTP response.
pub const TRANSPORT_FAILURE: i32 = -1;

/// Strips scheme and trailing slashes so `https://github.com/` and
/// `github.com` resolve identically.
pub fn normalize_domain(domain: &str) -> &str {
    domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

/// API root without scheme. The public site is served from its own API host;
/// enterprise installs expose the API under `/api/v3` on their own domain.
pub fn base_url(domain: &str) -> String {
    let domain = normalize_domain(domain);
    if domain == PUBLIC_DOMAIN || domain == PUBLIC_API_HOST {
        PUBLIC_API_HOST.to_owned()
    } else {
        format!("{domain}/{ENTERPRISE_API_PATH}")
    }
}

/// Web page listing all notifications for `domain`.
pub fn notifications_page(domain: &str) -> String {
    let domain = match normalize_domain(domain) {
        PUBLIC_API_HOST => PUBLIC_DOMAIN,
        other => other,
    };
    format!("https://{domain}/notifications")
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    domain: String,
    token: String,
    poll_interval: AtomicU64,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, domain: &str, token: &str) -> Self {
        Self {
            transport,
            domain: normalize_domain(domain).to_owned(),
            token: token.to_owned(),
            poll_interval: AtomicU64::new(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Minimum delay between polls requested by the server, in seconds.
    pub fn poll_interval(&self) -> u64 {
        self.poll_interval.load(Ordering::Relaxed)
    }

    pub async fn list_threads(&self, participating_only: bool) -> Result<Vec<Thread>, ApiError> {
        let url = format!(
            "https://{}/notifications?participating={participating_only}",
            base_url(&self.domain)
        );
        let response = self.send(HttpRequest::new(Method::Get, url), &[200]).await?;
        decode(&response)
    }

    pub async fn get_web_url_for_subject(&self, subject: &Subject) -> Result<String, ApiError> {
        let Some(url) = subject.url.as_deref() else {
            return Err(ApiError::new(
                TRANSPORT_FAILURE,
                format!("\"{}\" has no API location", subject.title),
            ));
        };
        let response = self.send(HttpRequest::new(Method::Get, url), &[200]).await?;
        let page: SubjectPage = decode(&response)?;
        Ok(page.html_url)
    }

    pub async fn mark_thread_as_read(&self, thread: &Thread) -> Result<(), ApiError> {
        self.send(HttpRequest::new(Method::Patch, &thread.url), &[205, 304])
            .await?;
        Ok(())
    }

    pub async fn mark_all_threads_as_read(&self, as_of: DateTime<Utc>) -> Result<(), ApiError> {
        let url = format!("https://{}/notifications", base_url(&self.domain));
        let body = serde_json::json!({
            "last_read_at": as_of.to_rfc3339_opts(SecondsFormat::Secs, true),
            "read": true,
        });
        let request = HttpRequest::new(Method::Put, url).json_body(&body);
        self.send(request, &[202, 205, 304]).await?;
        Ok(())
    }

    async fn send(&self, request: HttpRequest, valid: &[u16]) -> Result<HttpResponse, ApiError> {
        let request = request
            .header("Accept", ACCEPT_JSON)
            .header(API_VERSION_HEADER, API_VERSION)
            .header("Authorization", format!("Bearer {}", self.token));

        debug!(method = request.method.as_str(), url = %request.url, "sending request");
        let response = self
            .transport
            .send(request)
            .await
            .map_err(ApiError::transport)?;
        debug!(status = response.status, length = response.length, "response received");

        self.refresh_poll_interval(&response);

        if valid.contains(&response.status) {
            Ok(response)
        } else {
            Err(ApiError::from_response(&response))
        }
    }

    fn refresh_poll_interval(&self, response: &HttpResponse) {
        let Some(value) = response.headers.get(POLL_INTERVAL_HEADER) else {
            return;
        };
        match value.trim().parse::<u64>() {
            Ok(seconds) => {
                let previous = self.poll_interval.swap(seconds, Ordering::Relaxed);
                if previous != seconds {
                    debug!(previous, seconds, "server changed poll interval");
                }
            }
            Err(_) => debug!(value, "ignoring malformed poll interval header"),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_str(&response.body).map_err(|err| ApiError {
        status_code: i32::from(response.status),
        message: format!("Unexpected response body: {err}"),
        cause: Some(ErrorCause::Decode(err)),
    })
}

/// Turns a status name such as "Not Found" into "Not found".
fn humanize_status(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason());
    match reason {
        Some(reason) => {
            let mut chars = reason.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => format!("Unexpected status {status}"),
            }
        }
        None => format!("Unexpected status {status}"),
    }
}

#[derive(Error, Debug)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status, or [`TRANSPORT_FAILURE`] when no response arrived.
    pub status_code: i32,
    pub message: String,
    #[source]
    pub cause: Option<ErrorCause>,
}

#[derive(Error, Debug)]
pub enum ErrorCause {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn new(status_code: i32, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn transport(err: TransportError) -> Self {
        Self {
            status_code: TRANSPORT_FAILURE,
            message: err.to_string(),
            cause: Some(ErrorCause::Transport(err)),
        }
    }

    fn from_response(response: &HttpResponse) -> Self {
        let server_message = serde_json::from_str::<ErrorBody>(&response.body)
            .ok()
            .and_then(|body| body.message)
            .filter(|message| !message.is_empty());
        Self::new(
            i32::from(response.status),
            server_message.unwrap_or_else(|| humanize_status(response.status)),
        )
    }

    pub fn is_not_modified(&self) -> bool {
        self.status_code == 304
    }
}

// Response payloads ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubjectPage {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[allow(dead_code)]
    documentation_url: Option<String>,
}

// -------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------
