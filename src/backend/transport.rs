//! Transport Client
//!
//! Issues single HTTP requests against the backend and reports the outcome
//! without interpreting it. Retry policy belongs to the caller.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE};

use super::events::{ConnectorEvent, EventBus, RequestCompletion};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// Outcome of a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub url: String,
    /// Connection established and a response received
    pub ok: bool,
    /// Response status in the 2xx range
    pub status_ok: bool,
    pub status: Option<u16>,
    pub body: String,
    pub error_text: String,
}

impl TransportResponse {
    /// Transport and protocol level success
    pub fn succeeded(&self) -> bool {
        self.ok && self.status_ok
    }

    /// Diagnostic text for a failed request, empty on success
    pub fn failure_text(&self) -> String {
        if !self.ok {
            self.error_text.clone()
        } else if !self.status_ok {
            match self.status {
                Some(code) => format!("Server replied: {}", status_line(code)),
                None => "Server replied with an unknown status".to_string(),
            }
        } else {
            String::new()
        }
    }

    fn transport_error(url: &str, error_text: String) -> Self {
        Self {
            url: url.to_string(),
            ok: false,
            status_ok: false,
            status: None,
            body: String::new(),
            error_text,
        }
    }

    fn completion(&self) -> RequestCompletion {
        RequestCompletion {
            url: self.url.clone(),
            ok: self.succeeded(),
            body: self.body.clone(),
            error: self.failure_text(),
        }
    }
}

fn status_line(code: u16) -> String {
    match reqwest::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{} {}", code, reason),
        None => code.to_string(),
    }
}

/// HTTP client for the backend.
///
/// Cheap to clone; clones share the connection pool and the event bus.
#[derive(Clone)]
pub struct TransportClient {
    client: reqwest::Client,
    events: EventBus,
}

impl TransportClient {
    pub fn new(timeout: Duration, events: EventBus) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[Transport] Failed to build client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client, events }
    }

    /// Perform a request and publish its completion record.
    pub async fn fetch(&self, method: Method, url: &str) -> TransportResponse {
        log::debug!("[Transport] {} {}", method, url);

        let response = self
            .client
            .request(method.into(), url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .send()
            .await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                match response.bytes().await {
                    Ok(bytes) => TransportResponse {
                        url: url.to_string(),
                        ok: true,
                        status_ok: status.is_success(),
                        status: Some(status.as_u16()),
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                        error_text: String::new(),
                    },
                    Err(e) => TransportResponse::transport_error(url, describe(&e)),
                }
            }
            Err(e) => TransportResponse::transport_error(url, describe(&e)),
        };

        if result.succeeded() {
            log::debug!("[Transport] {} finished ({} bytes)", url, result.body.len());
        } else {
            log::warn!("[Transport] {} failed: {}", url, result.failure_text());
        }

        self.events
            .emit(ConnectorEvent::RequestFinished(result.completion()));
        result
    }

    /// Fire-and-forget request; `on_complete` runs exactly once on the runtime.
    pub fn request<F>(&self, method: Method, url: impl Into<String>, on_complete: F)
    where
        F: FnOnce(TransportResponse) + Send + 'static,
    {
        let client = self.clone();
        let url = url.into();
        tokio::spawn(async move {
            let response = client.fetch(method, &url).await;
            on_complete(response);
        });
    }
}

/// Human readable diagnostic, including the underlying cause chain
fn describe(error: &reqwest::Error) -> String {
    use std::error::Error as _;

    let mut text = if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_connect() {
        "Connection failed".to_string()
    } else {
        error.to_string()
    };

    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(ok: bool, status: Option<u16>) -> TransportResponse {
        TransportResponse {
            url: "http://127.0.0.1:1/health".to_string(),
            ok,
            status_ok: status.map(|s| (200..300).contains(&s)).unwrap_or(false),
            status,
            body: String::new(),
            error_text: if ok { String::new() } else { "Connection refused".to_string() },
        }
    }

    #[test]
    fn failure_text_prefers_transport_error() {
        assert_eq!(response(false, None).failure_text(), "Connection refused");
        assert_eq!(response(true, Some(200)).failure_text(), "");
    }

    #[test]
    fn protocol_error_mentions_status() {
        let r = response(true, Some(503));
        assert!(!r.succeeded());
        assert_eq!(r.failure_text(), "Server replied: 503 Service Unavailable");
        assert!(!r.completion().ok);
    }

    #[tokio::test]
    async fn unreachable_backend_reports_transport_failure() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let events = EventBus::new();
        let mut rx = events.subscribe();
        let client = TransportClient::new(Duration::from_secs(2), events);
        let url = format!("http://127.0.0.1:{}/health", port);

        let result = client.fetch(Method::Get, &url).await;
        assert!(!result.ok);
        assert!(!result.error_text.is_empty());

        match rx.recv().await.unwrap() {
            ConnectorEvent::RequestFinished(done) => {
                assert_eq!(done.url, url);
                assert!(!done.ok);
                assert_eq!(done.error, result.error_text);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn request_delivers_callback_once() {
        let client = TransportClient::new(Duration::from_millis(500), EventBus::new());
        let (tx, rx) = tokio::sync::oneshot::channel();
        client.request(Method::Get, "http://127.0.0.1:9/unreachable", move |r| {
            let _ = tx.send(r);
        });
        let result = rx.await.unwrap();
        assert!(!result.succeeded());
    }
}
