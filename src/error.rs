//! Error types for Health Bridge

use crate::types::DataType;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while translating, querying or storing health data
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("unknown data type {0}")]
    UnknownDataType(String),

    #[error("unknown activity {0}")]
    UnknownActivity(String),

    #[error("{0} is not writeable")]
    NotWriteable(DataType),

    #[error("aggregation is not supported for {0}")]
    UnsupportedOperation(DataType),

    #[error("no basal data between {start} and {end}")]
    InsufficientBasalData {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("cannot merge {data_type} buckets: expected bucket start {expected:?}, found {found:?}")]
    BucketCompositionMismatch {
        data_type: DataType,
        expected: Option<DateTime<Utc>>,
        found: Option<DateTime<Utc>>,
    },

    #[error("{0}")]
    NativeError(String),

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid native response: {0}")]
    InvalidResponse(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
