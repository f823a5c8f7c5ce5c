use thiserror::Error;

/// Errors reported by indexing, search, fusion and normalization.
///
/// Every failure is surfaced to the caller; none of these paths fall back to
/// a zero or default score.
#[derive(Debug, Error)]
pub enum KwsError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Inconsistent timeline in '{document_id}': event at {start_time}s precedes {previous_start}s")]
    InconsistentTimeline {
        document_id: String,
        previous_start: f64,
        start_time: f64,
    },
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Unknown system: {0}")]
    UnknownSystem(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, KwsError>;
