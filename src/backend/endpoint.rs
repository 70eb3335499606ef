//! Backend Endpoint
//!
//! Base address the HTTP strategy builds its request URLs from.

use std::fmt;

use reqwest::Url;

use super::error::ConfigError;

/// Default backend URL (matches the bundled Flask backend)
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8001";

/// Validated base address of the backend.
///
/// A connector takes its own copy at construction; there is no way to
/// change the address of a running connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    base: Url,
}

impl BackendEndpoint {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason,
        };

        let base = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;
        match base.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }
        if base.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self { base })
    }

    /// Build a full request URL for `path`, e.g. `/health`
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.base.port_or_known_default()
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base.as_str().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_without_double_slash() {
        let endpoint = BackendEndpoint::parse("http://127.0.0.1:8001/").unwrap();
        assert_eq!(endpoint.url_for("/health"), "http://127.0.0.1:8001/health");
        assert_eq!(endpoint.url_for("status"), "http://127.0.0.1:8001/status");
    }

    #[test]
    fn keeps_base_path_prefix() {
        let endpoint = BackendEndpoint::parse("http://localhost:9000/api").unwrap();
        assert_eq!(endpoint.url_for("/health"), "http://localhost:9000/api/health");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(BackendEndpoint::parse("ftp://example.com").is_err());
        assert!(BackendEndpoint::parse("not a url").is_err());
    }

    #[test]
    fn default_settings_point_at_local_backend() {
        let endpoint = crate::backend::config::BackendSettings::default()
            .endpoint()
            .unwrap();
        assert_eq!(endpoint.port(), Some(8001));
        assert_eq!(endpoint.to_string(), DEFAULT_BASE_URL);
        assert_eq!(BackendEndpoint::parse("http://127.0.0.1:9123").unwrap().port(), Some(9123));
    }
}
