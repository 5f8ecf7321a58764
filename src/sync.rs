//! Remote sync collaborator.
//!
//! The core consumes an abstract "fetch records from a remote endpoint"
//! seam and is agnostic to its transport. A fetch failure is fatal for
//! the whole sync call: whatever individual records were committed before
//! the failure stay committed, and callers simply re-run — every retried
//! record goes back through the same idempotent precedence chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::BatchReport;
use crate::record::IncomingRecord;

/// Errors from the remote endpoint.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Could not reach the endpoint at all.
    #[error("endpoint unreachable: {message}")]
    Unreachable {
        /// Description of the transport failure.
        message: String,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned status {status}: {message}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The endpoint's error body or status text.
        message: String,
    },

    /// The payload could not be decoded into records.
    #[error("malformed payload: {message}")]
    Malformed {
        /// Description of the decode failure.
        message: String,
    },
}

impl FetchError {
    /// The HTTP status, when the failure carries one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fetches records from a remote endpoint. Implemented by the transport
/// layer (HTTP client, message queue, test stub).
pub trait RecordFetcher: Send + Sync {
    /// Fetch every record the endpoint currently offers.
    fn fetch(&self, api_url: &str, api_key: &str) -> Result<Vec<IncomingRecord>, FetchError>;
}

/// Parameters for one sync call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Endpoint to pull from.
    pub api_url: String,
    /// Credential handed to the fetcher verbatim.
    pub api_key: String,
    /// Scheduling hint recorded for the caller; the core does not
    /// schedule anything itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_frequency: Option<String>,
}

/// Outcome of a completed sync call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Per-record import outcome.
    pub batch: BatchReport,
    /// How many records the endpoint returned.
    pub total_fetched: usize,
    /// When the sync finished.
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_status() {
        let err = FetchError::Status {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.status(), Some(502));
        assert!(err.to_string().contains("502"));

        let err = FetchError::Unreachable {
            message: "dns failure".to_string(),
        };
        assert_eq!(err.status(), None);
    }
}
