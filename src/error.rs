use thiserror::Error;

/// Error taxonomy for the pattern archive core.
///
/// Numeric edge cases (division by zero, NaN correlation, empty outcome
/// windows) are deliberately NOT represented here: those degrade to neutral
/// values inside the computation instead of surfacing as errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Illegal timeframe change: downsampling, or a target that is not an
    /// exact integer multiple of the source. Never approximated.
    #[error("invalid timeframe conversion: {from} -> {to}: {reason}")]
    InvalidConversion {
        from: String,
        to: String,
        reason: String,
    },

    /// Too few bars for extraction or partial matching. Callers usually see
    /// this as an absent result rather than a propagated error.
    #[error("insufficient data: have {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// The vector backend or bar-fetch collaborator did not answer in time.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// The vector backend is unreachable or returned a server-side failure.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A named collection or point does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored payload is missing a field the statistics aggregation needs.
    /// Such records are skipped, not fatal.
    #[error("malformed record {id}: missing field '{field}'")]
    MalformedRecord { id: String, field: String },
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
