//! Error types for unibench-core

use thiserror::Error;

use crate::cluster::ClusterError;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::traits::{SinkError, WorkloadError};

/// Errors surfaced by the orchestrator
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Remote data did not have the expected shape
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Control-plane transport or API failure
    #[error("cluster error: {0}")]
    Cluster(ClusterError),

    /// Data-plane failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workload setup or execution failure
    #[error("workload error: {0}")]
    Workload(#[from] WorkloadError),

    /// Result sink failure
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Orchestration error
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    /// Create an error for a required builder field that was not set
    pub fn missing_config(field: &str) -> Self {
        BenchError::Config(format!("missing required configuration: {field}"))
    }

    /// Create an orchestration error
    pub fn orchestration(msg: impl Into<String>) -> Self {
        BenchError::Orchestration(msg.into())
    }

    /// Whether this error must abort the whole suite run
    pub fn is_fatal(&self) -> bool {
        matches!(self, BenchError::Config(_) | BenchError::Timeout(_))
    }
}

impl From<ClusterError> for BenchError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Timeout { .. } => BenchError::Timeout(err.to_string()),
            ClusterError::PrimaryNotFound(_) => BenchError::DataIntegrity(err.to_string()),
            ClusterError::Config(msg) => BenchError::Config(msg),
            other => BenchError::Cluster(other),
        }
    }
}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Config(err.to_string())
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterState;

    #[test]
    fn test_cluster_timeout_is_fatal() {
        let err: BenchError = ClusterError::Timeout {
            name: "bench".into(),
            desired: ClusterState::Ready,
            attempts: 100,
        }
        .into();
        assert!(matches!(err, BenchError::Timeout(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_primary_is_data_integrity() {
        let err: BenchError = ClusterError::PrimaryNotFound("bench".into()).into();
        assert!(matches!(err, BenchError::DataIntegrity(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_api_error_stays_transport() {
        let err: BenchError = ClusterError::Api {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert!(matches!(err, BenchError::Cluster(_)));
        assert!(err.to_string().contains("boom"));
    }
}
