//! Error taxonomy for the audit pipeline.
//!
//! Corpus errors skip the whole document, service errors are scoped to a
//! single call, and aggregation errors fail the whole run.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to extract pages: {0}")]
    Extraction(String),

    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ServiceError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("reasoning service error: {0}")]
    Service(String),

    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    #[error("reasoning call cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RateLimited(_))
    }
}

/// Which reduction call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStage {
    BatchReduce { batch_index: usize },
    FinalReduce,
}

impl std::fmt::Display for AggregationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationStage::BatchReduce { batch_index } => {
                write!(f, "batch reduce #{batch_index}")
            }
            AggregationStage::FinalReduce => write!(f, "final reduce"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("aggregation failed during {stage}: {source}")]
    Aggregation {
        stage: AggregationStage,
        #[source]
        source: ServiceError,
    },

    #[error("no evaluation with supporting context survived ({failed} chunk(s) failed)")]
    NoEvaluations { failed: usize },

    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("audit cancelled")]
    Cancelled,
}
