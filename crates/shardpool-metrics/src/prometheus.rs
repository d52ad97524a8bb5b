//! Prometheus-backed condition oracle.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ConditionOracle, OracleError};

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    warnings: Vec<String>,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

/// Evaluates conditions by running instant queries against a
/// Prometheus-compatible HTTP API. A condition is true when the query
/// returns a vector with at least one sample.
pub struct PrometheusOracle {
    client: reqwest::Client,
    base_url: String,
    headers: HashMap<String, String>,
}

impl PrometheusOracle {
    /// `base_url` is the server root, e.g. `http://prometheus:9090`.
    /// `headers` are attached to every query request (auth proxies,
    /// tenant scoping). Each request carries `timeout`.
    pub fn new(
        base_url: &str,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }
}

impl ConditionOracle for PrometheusOracle {
    async fn evaluate(&self, query: &str) -> Result<bool, OracleError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let mut req = self.client.get(&url).query(&[("query", query)]);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let body: QueryResponse = resp.json().await?;
        for warning in &body.warnings {
            warn!(%warning, "metrics backend warning");
        }
        if body.status != "success" {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: format!("query status {}", body.status),
            });
        }

        let met = condition_met(&body.data)?;
        debug!(query, met, "condition evaluated");
        Ok(met)
    }
}

/// A vector result with any samples means the condition holds.
fn condition_met(data: &QueryData) -> Result<bool, OracleError> {
    if data.result_type != "vector" {
        return Err(OracleError::UnexpectedResultType(data.result_type.clone()));
    }
    match data.result.as_array() {
        Some(samples) => Ok(!samples.is_empty()),
        None => Ok(false),
    }
}
