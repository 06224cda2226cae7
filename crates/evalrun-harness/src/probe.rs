//! Probe requests against the compliance checker.
//!
//! The coordinator only needs a status code and a round-trip time from each
//! probe, so probing sits behind the [`Probe`] trait. [`HttpProbe`] is the
//! real implementation; tests substitute scripted probes.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HarnessError;

/// Default validation endpoint of the compliance checker.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8081/validation";

/// Default query; `{run}` is replaced with the probe index.
pub const DEFAULT_QUERY: &str = r#"SELECT * FROM "TPCW{run}"."ITEM""#;

/// Response to one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, kept for error reporting.
    pub body: String,
    /// Wall-clock round trip including reading the body.
    pub elapsed: Duration,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues one request against the system under test.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Send probe number `run` (0 is the warm-up).
    async fn send(&self, run: u64) -> Result<ProbeResponse, HarnessError>;
}

/// Classification attributes attached to every validation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeAttributes {
    pub purpose: Vec<String>,
    pub role: Vec<String>,
}

impl Default for ProbeAttributes {
    fn default() -> Self {
        Self {
            purpose: vec!["Product Improvement".to_string()],
            role: vec!["Engineer".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidationRequest<'a> {
    sql: String,
    attributes: &'a ProbeAttributes,
}

/// Probe posting validation requests over HTTP.
pub struct HttpProbe {
    inner: reqwest::Client,
    endpoint: String,
    query_template: String,
    attributes: ProbeAttributes,
}

impl HttpProbe {
    /// Create a probe for `endpoint` with the default query and attributes.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            endpoint: endpoint.into(),
            query_template: DEFAULT_QUERY.to_string(),
            attributes: ProbeAttributes::default(),
        }
    }

    /// Builder method to set the query template.
    pub fn with_query_template(mut self, template: impl Into<String>) -> Self {
        self.query_template = template.into();
        self
    }

    /// Builder method to set the classification attributes.
    pub fn with_attributes(mut self, attributes: ProbeAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    fn query(&self, run: u64) -> String {
        self.query_template.replace("{run}", &run.to_string())
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn send(&self, run: u64) -> Result<ProbeResponse, HarnessError> {
        let request = ValidationRequest {
            sql: self.query(run),
            attributes: &self.attributes,
        };
        debug!(url = %self.endpoint, run, "POST validation probe");

        let start = Instant::now();
        let response = self
            .inner
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let elapsed = start.elapsed();

        Ok(ProbeResponse {
            status,
            body,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_substitutes_run() {
        let probe = HttpProbe::new(DEFAULT_ENDPOINT);
        assert_eq!(probe.query(3), r#"SELECT * FROM "TPCW3"."ITEM""#);
    }

    #[test]
    fn test_request_payload_shape() {
        let attributes = ProbeAttributes::default();
        let request = ValidationRequest {
            sql: "SELECT 1".to_string(),
            attributes: &attributes,
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["sql"], "SELECT 1");
        assert_eq!(json["attributes"]["purpose"][0], "Product Improvement");
        assert_eq!(json["attributes"]["role"][0], "Engineer");
    }

    #[test]
    fn test_custom_query_and_attributes() {
        let probe = HttpProbe::new(DEFAULT_ENDPOINT)
            .with_query_template("SELECT {run} FROM t{run}")
            .with_attributes(ProbeAttributes {
                purpose: vec!["Research".to_string()],
                role: vec!["Analyst".to_string(), "Auditor".to_string()],
            });
        assert_eq!(probe.query(4), "SELECT 4 FROM t4");

        let request = ValidationRequest {
            sql: probe.query(0),
            attributes: &probe.attributes,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["attributes"]["purpose"][0], "Research");
        assert_eq!(json["attributes"]["role"][1], "Auditor");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_probe_error() {
        // Port 9 (discard) is closed on any sane test machine.
        let probe = HttpProbe::new("http://127.0.0.1:9/validation");
        let err = probe.send(0).await.unwrap_err();
        assert!(matches!(err, HarnessError::Probe(_)));
    }

    #[test]
    fn test_success_range() {
        let response = |status| ProbeResponse {
            status,
            body: String::new(),
            elapsed: Duration::ZERO,
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(500).is_success());
    }
}
