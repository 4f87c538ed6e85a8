//! Error types for admission, device I/O and worker loops.

use std::time::Duration;

use thiserror::Error;

use crate::types::RequesterId;

/// Synchronous enqueue failures. Returning one of these never mutates the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The requester already holds an entry for this routine.
    #[error("{requester} is already in the queue")]
    AlreadyQueued { requester: RequesterId },

    /// Link code outside 00000000..=99999999.
    #[error("link code {code} must be in the range 00000000-99999999")]
    InvalidCode { code: i64 },

    /// The queue is at `max_queue_count`.
    #[error("queue is full ({max} entries)")]
    CapacityExceeded { max: usize },

    /// Queueing is currently disabled by the queue gate.
    #[error("queue is currently closed")]
    QueueClosed,

    /// The legality oracle refused the payload.
    #[error("payload rejected: {diagnostics}")]
    Illegal { diagnostics: String },

    /// The request carried no payload, or more than the batch limit.
    #[error("request carries {count} items, allowed 1..={max}")]
    BadBatch { count: usize, max: usize },
}

/// Failure surfaced by the remote device or a console adapter.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The link to the device dropped. Fatal to the current worker loop.
    #[error("connection lost: {0}")]
    Connection(#[from] std::io::Error),

    /// A device operation did not answer in time.
    #[error("device did not respond within {0:?}")]
    Timeout(Duration),

    /// The device reported something the session cannot interpret.
    #[error("unexpected device state: {0}")]
    Unexpected(String),
}

impl DeviceError {
    /// Connection faults abort the worker loop; everything else stays inside
    /// the session that hit it.
    pub fn is_connection(&self) -> bool {
        matches!(self, DeviceError::Connection(_) | DeviceError::Timeout(_))
    }
}

/// Reasons a worker loop stops for good.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("device failure: {0}")]
    Device(#[from] DeviceError),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid hub configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_faults_are_distinguished() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(DeviceError::from(io).is_connection());
        assert!(DeviceError::Timeout(Duration::from_secs(1)).is_connection());
        assert!(!DeviceError::Unexpected("menu".into()).is_connection());
    }

    #[test]
    fn test_admission_messages_are_user_readable() {
        let err = AdmissionError::InvalidCode { code: 100_000_000 };
        assert_eq!(
            err.to_string(),
            "link code 100000000 must be in the range 00000000-99999999"
        );
    }
}
