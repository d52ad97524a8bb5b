//! Condition oracle — opaque boolean predicates over a metrics backend.
//!
//! The controller only ever asks "is this condition true right now";
//! the oracle answers by running an instant query against a
//! Prometheus-compatible API and checking whether the result vector
//! carries any samples. Oracle errors are transient by contract and
//! feed the controller's retry path.

mod prometheus;

pub use prometheus::PrometheusOracle;

use thiserror::Error;

/// Errors from evaluating a condition. All transient; the caller
/// retries after its configured interval.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("metrics query failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metrics backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected result type {0:?} from metrics backend")]
    UnexpectedResultType(String),
}

/// An opaque boolean predicate evaluator.
pub trait ConditionOracle {
    fn evaluate(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<bool, OracleError>> + Send;
}
