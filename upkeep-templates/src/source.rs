//! Where template releases come from.
//!
//! [`ReleaseSource`] is the only network seam. [`HttpReleaseSource`] talks to
//! a GitHub-style releases API plus a raw file host:
//!
//! - `GET <api_url>/releases/latest`
//! - `GET <raw_url>/<version>/<path>`

use std::io::{self, Write};

use serde::Deserialize;

use upkeep_core::config::ReleaseConfig;
use upkeep_core::TemplateRelease;

use crate::error::TransportError;

pub trait ReleaseSource {
    fn latest_release(&self) -> Result<TemplateRelease, TransportError>;

    /// Stream `<version>/<path>` into `sink`, returning the byte count.
    fn download_file(
        &self,
        version: &str,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError>;
}

// ---------------------------------------------------------------------------
// Release JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    tarball_url: Option<String>,
    #[serde(default)]
    zipball_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Parse a `releases/latest` response body.
pub fn parse_release(body: &str) -> Result<TemplateRelease, TransportError> {
    let raw: GithubRelease =
        serde_json::from_str(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
    if raw.tag_name.trim().is_empty() {
        return Err(TransportError::Malformed("release has an empty tag_name".into()));
    }
    Ok(TemplateRelease {
        version: raw.tag_name,
        name: raw.name,
        published_at: raw.published_at,
        tarball_url: raw.tarball_url,
        zipball_url: raw.zipball_url,
        notes: raw.body,
    })
}

// ---------------------------------------------------------------------------
// HttpReleaseSource
// ---------------------------------------------------------------------------

/// Blocking HTTP source. Connect and read timeouts apply per socket
/// operation, so a stalled transfer fails instead of hanging.
pub struct HttpReleaseSource {
    agent: ureq::Agent,
    api_url: String,
    raw_url: String,
}

impl HttpReleaseSource {
    pub fn new(config: &ReleaseConfig) -> Self {
        let timeout = config.request_timeout();
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .user_agent(&config.user_agent)
            .build();
        Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            raw_url: config.raw_url.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, url: &str) -> Result<ureq::Response, TransportError> {
        tracing::debug!("GET {url}");
        self.agent.get(url).call().map_err(map_ureq_error)
    }
}

impl ReleaseSource for HttpReleaseSource {
    fn latest_release(&self) -> Result<TemplateRelease, TransportError> {
        let response = self.get(&format!("{}/releases/latest", self.api_url))?;
        let body = response.into_string().map_err(|e| map_io_error(e, None, 0))?;
        parse_release(&body)
    }

    fn download_file(
        &self,
        version: &str,
        path: &str,
        sink: &mut dyn Write,
    ) -> Result<u64, TransportError> {
        let response = self.get(&format!("{}/{version}/{path}", self.raw_url))?;
        let expected = response
            .header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        let mut reader = response.into_reader();
        let mut counting = CountingWriter { inner: sink, count: 0 };
        if let Err(e) = io::copy(&mut reader, &mut counting) {
            return Err(map_io_error(e, expected, counting.count));
        }
        let received = counting.count;
        match expected {
            Some(expected) if received < expected => {
                Err(TransportError::Truncated { expected, received })
            }
            _ => Ok(received),
        }
    }
}

struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    count: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Status(code, response) => TransportError::Status {
            code,
            text: response.status_text().to_string(),
        },
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                TransportError::Timeout
            } else {
                TransportError::Connection(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = err.source();
    }
    transport.to_string().contains("timed out")
}

fn map_io_error(err: io::Error, expected: Option<u64>, received: u64) -> TransportError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            TransportError::Truncated {
                expected: expected.unwrap_or(received),
                received,
            }
        }
        _ => TransportError::Connection(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_github_release_body() {
        let body = r#"{
            "tag_name": "v1.2.0",
            "name": "Genie 1.2",
            "published_at": "2026-03-01T10:00:00Z",
            "tarball_url": "https://example.test/t",
            "zipball_url": "https://example.test/z",
            "body": "notes",
            "draft": false
        }"#;
        let release = parse_release(body).unwrap();
        assert_eq!(release.version, "v1.2.0");
        assert_eq!(release.name.as_deref(), Some("Genie 1.2"));
        assert_eq!(release.notes.as_deref(), Some("notes"));
        assert!(release.published_at.is_some());
    }

    #[test]
    fn malformed_body_is_a_transport_error() {
        let err = parse_release("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
        let err = parse_release(r#"{"tag_name": "  "}"#).unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[test]
    fn eof_maps_to_truncation() {
        let err = map_io_error(
            io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
            Some(100),
            10,
        );
        assert_eq!(
            err,
            TransportError::Truncated {
                expected: 100,
                received: 10
            }
        );
        let err = map_io_error(io::Error::new(io::ErrorKind::TimedOut, "slow"), None, 0);
        assert_eq!(err.to_string(), "Request timeout");
    }
}
