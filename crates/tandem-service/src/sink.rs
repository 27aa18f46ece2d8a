//! Downstream notification of committed decisions.
//!
//! Forwarding is best effort: the decision is already stored when a sink is
//! notified, and nothing a sink does can change the response.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tandem_core::DecisionRecord;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid forward URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("forward URL cannot be used as a base: {0}")]
    NotABase(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub trait DecisionSink: Send + Sync {
    fn notify(&self, record: &DecisionRecord);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DecisionSink for NoopSink {
    fn notify(&self, _record: &DecisionRecord) {}
}

const ENDPOINT_PATH: [&str; 2] = ["v1", "decisions"];

/// Appends `/v1/decisions` to a base URL. A base that already ends in part
/// of that path (`/v1`, `/v1/decisions`) is not extended twice; empty
/// segments are dropped.
pub fn build_endpoint(base: &str) -> Result<Url, SinkError> {
    let mut endpoint = Url::parse(base)?;
    let path = endpoint.path().to_owned();
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let overlap = (1..=ENDPOINT_PATH.len())
        .rev()
        .find(|&n| segments.ends_with(&ENDPOINT_PATH[..n]))
        .unwrap_or(0);
    segments.truncate(segments.len() - overlap);

    endpoint
        .path_segments_mut()
        .map_err(|()| SinkError::NotABase(base.to_string()))?
        .clear()
        .extend(&segments)
        .extend(ENDPOINT_PATH);
    Ok(endpoint)
}

#[derive(Debug)]
struct Target {
    endpoint: Url,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl Target {
    fn send(&self, record: &DecisionRecord) {
        let mut req = self.client.post(self.endpoint.clone()).json(record);
        if let Some(token) = &self.token {
            req = req.header("X-Auth", token);
        }
        match req.send().and_then(reqwest::blocking::Response::error_for_status) {
            Ok(_) => tracing::debug!(
                unit_id = %record.unit_id,
                decision_index = record.decision_index,
                "decision forwarded"
            ),
            Err(err) => tracing::warn!(
                unit_id = %record.unit_id,
                decision_index = record.decision_index,
                endpoint = %self.endpoint,
                "failed to forward decision: {err}"
            ),
        }
    }
}

/// Posts each committed decision as JSON from a background thread.
#[derive(Debug)]
pub struct HttpForwarder {
    target: Arc<Target>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpForwarder {
    pub fn new(base: &str, token: Option<String>) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            target: Arc::new(Target {
                endpoint: build_endpoint(base)?,
                token,
                client,
            }),
            pending: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.target.endpoint
    }

    /// Blocks until every forward started so far has finished. Short-lived
    /// processes call this before exiting.
    pub fn wait(&self) {
        let handles = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("forwarding thread panicked");
            }
        }
    }
}

impl DecisionSink for HttpForwarder {
    fn notify(&self, record: &DecisionRecord) {
        let target = Arc::clone(&self.target);
        let record = record.clone();
        let spawned = thread::Builder::new()
            .name("tandem-forward".into())
            .spawn(move || target.send(&record));
        match spawned {
            Ok(handle) => {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.retain(|h| !h.is_finished());
                    pending.push(handle);
                }
            }
            Err(err) => tracing::warn!("could not start forwarding thread: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalised() {
        let cases = [
            ("http://localhost:3000", "http://localhost:3000/v1/decisions"),
            ("http://localhost:3000/", "http://localhost:3000/v1/decisions"),
            ("http://localhost:3000/v1", "http://localhost:3000/v1/decisions"),
            ("http://localhost:3000/v1/", "http://localhost:3000/v1/decisions"),
            (
                "http://localhost:3000/v1/decisions",
                "http://localhost:3000/v1/decisions",
            ),
            ("http://host/study/api", "http://host/study/api/v1/decisions"),
            ("http://host/decisions", "http://host/decisions/v1/decisions"),
            ("http://host//v1//", "http://host/v1/decisions"),
        ];
        for (base, expected) in cases {
            let url = build_endpoint(base).unwrap_or_else(|e| panic!("{base}: {e}"));
            assert_eq!(url.as_str(), expected, "base: {base}");
        }
    }

    #[test]
    fn unusable_bases_are_rejected() {
        assert!(matches!(build_endpoint("not a url"), Err(SinkError::Url(_))));
        assert!(matches!(
            build_endpoint("mailto:team@example.org"),
            Err(SinkError::NotABase(_))
        ));
    }
}
