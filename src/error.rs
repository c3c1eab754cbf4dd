//! Error kinds surfaced by the fetch and analysis pipeline.
//!
//! Only [`ReportError::TransportFailure`], [`ReportError::InvalidWindow`] and
//! [`ReportError::UnknownName`] abort a run.
//! The other variants describe a single degraded record or metric; they are turned into
//! [`ReportWarning`](crate::models::ReportWarning)s and the run continues.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    /// Event ordering on a record is impossible (e.g. closed before it was created).
    #[error("inconsistent record {entity_id}: {detail}")]
    DataInconsistency { entity_id: String, detail: String },

    /// A ratio's denominator is absent or zero.
    #[error("baseline missing for {metric}")]
    MissingBaseline { metric: String },

    /// Query transport failed. Propagated unchanged from the query client.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Report window must be a positive number of hours.
    #[error("invalid report window: {0}h (must be > 0)")]
    InvalidWindow(i64),

    /// A report subject given as a name that resolves to no address.
    #[error("no address found for name '{0}'")]
    UnknownName(String),

    /// A subgraph record could not be parsed into a typed record.
    #[error("malformed {entity} record: {detail}")]
    MalformedRecord { entity: String, detail: String },
}

impl ReportError {
    /// True for errors that must stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::InvalidWindow(_) | Self::UnknownName(_)
        )
    }
}

impl From<reqwest::Error> for ReportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::TransportFailure(format!("query timeout: {}", e))
        } else if e.is_connect() {
            Self::TransportFailure(format!("connection error: {}", e))
        } else {
            Self::TransportFailure(e.to_string())
        }
    }
}

pub type Result<T, E = ReportError> = std::result::Result<T, E>;
