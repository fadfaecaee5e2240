//! Error types for the sharded access layer
//!
//! Every failed call surfaces exactly one [`Error`]. Each variant belongs to
//! one [`ErrorKind`], which is the classification callers match on:
//!
//! | Kind | Raised when |
//! |------|-------------|
//! | `Caller` | malformed query or target, rejected before any network call |
//! | `Transport` | RPC or shard failure, including partial fan-out failures |
//! | `Transaction` | commit or rollback of shard-local transactions failed |
//! | `Cancelled` | the context deadline expired or cancellation fired |
//! | `Programming` | use of a finished transaction or a closed cursor |
//! | `Internal` | setup failures not tied to a single call |
//!
//! Errors are never retried by this layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for access-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes reported by the backend routing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCode {
    /// No error
    Success,
    /// The operation was cancelled by the caller
    Cancelled,
    /// Unclassified backend failure
    UnknownError,
    /// The backend rejected the query as malformed
    BadInput,
    /// The backend deadline expired
    DeadlineExceeded,
    /// Constraint violation (duplicate key, etc.)
    IntegrityError,
    /// Caller lacks permission
    PermissionDenied,
    /// Backend ran out of a resource (pool, memory, quota)
    ResourceExhausted,
    /// The target tablet is not serving queries
    QueryNotServed,
    /// Statement required a transaction that is not open
    NotInTx,
    /// Backend invariant violated
    InternalError,
    /// Retryable failure
    TransientError,
    /// Caller is not authenticated
    Unauthenticated,
}

impl RpcCode {
    /// Stable upper-case name, matching the backend's wire enum
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcCode::Success => "SUCCESS",
            RpcCode::Cancelled => "CANCELLED",
            RpcCode::UnknownError => "UNKNOWN_ERROR",
            RpcCode::BadInput => "BAD_INPUT",
            RpcCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcCode::IntegrityError => "INTEGRITY_ERROR",
            RpcCode::PermissionDenied => "PERMISSION_DENIED",
            RpcCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcCode::QueryNotServed => "QUERY_NOT_SERVED",
            RpcCode::NotInTx => "NOT_IN_TX",
            RpcCode::InternalError => "INTERNAL_ERROR",
            RpcCode::TransientError => "TRANSIENT_ERROR",
            RpcCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelCause {
    /// Explicit cancellation through the context
    Cancelled,
    /// The context deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => write!(f, "cancelled"),
            CancelCause::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input, no network interaction happened
    Caller,
    /// RPC or shard failure
    Transport,
    /// Shard-local transaction failure
    Transaction,
    /// Deadline or explicit cancellation
    Cancelled,
    /// API misuse
    Programming,
    /// Setup failure not tied to a call
    Internal,
}

/// Classified access-layer error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum Error {
    // ==================== Caller ====================
    /// Malformed query envelope, target, or configuration
    #[error("invalid input: {reason}")]
    Caller {
        /// What was wrong
        reason: String,
    },

    // ==================== Transport ====================
    /// RPC or shard failure
    #[error("transport error [{code}]{}: {reason}", location(.keyspace, .shard))]
    Transport {
        /// Backend error code
        code: RpcCode,
        /// Keyspace the failing request targeted
        keyspace: Option<String>,
        /// Shard that failed, when known
        shard: Option<String>,
        /// Underlying cause
        reason: String,
    },

    // ==================== Transaction ====================
    /// Commit or rollback failed on one or more shards
    #[error("transaction error: {reason}")]
    Transaction {
        /// Underlying cause
        reason: String,
    },

    // ==================== Cancelled ====================
    /// Deadline expired or cancellation fired while waiting
    #[error("call {cause}")]
    Cancelled {
        /// Which signal fired
        cause: CancelCause,
    },

    // ==================== Programming ====================
    /// Misuse of a finished transaction, closed cursor, or closed connection
    #[error("programming error: {reason}")]
    Programming {
        /// What was misused
        reason: String,
    },

    // ==================== Internal ====================
    /// Setup failure (runtime construction, I/O)
    #[error("internal error: {reason}")]
    Internal {
        /// Underlying cause
        reason: String,
    },
}

fn location(keyspace: &Option<String>, shard: &Option<String>) -> String {
    match (keyspace, shard) {
        (Some(ks), Some(shard)) => format!(" {}/{}", ks, shard),
        (Some(ks), None) => format!(" {}", ks),
        (None, Some(shard)) => format!(" shard {}", shard),
        (None, None) => String::new(),
    }
}

impl Error {
    /// Create a caller error
    pub fn caller(reason: impl Into<String>) -> Self {
        Error::Caller {
            reason: reason.into(),
        }
    }

    /// Create a transport error without shard identity
    pub fn transport(code: RpcCode, reason: impl Into<String>) -> Self {
        Error::Transport {
            code,
            keyspace: None,
            shard: None,
            reason: reason.into(),
        }
    }

    /// Create a transport error attributed to one shard
    pub fn shard(
        code: RpcCode,
        keyspace: impl Into<String>,
        shard: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Transport {
            code,
            keyspace: Some(keyspace.into()),
            shard: Some(shard.into()),
            reason: reason.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(reason: impl Into<String>) -> Self {
        Error::Transaction {
            reason: reason.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(cause: CancelCause) -> Self {
        Error::Cancelled { cause }
    }

    /// Create a programming error
    pub fn programming(reason: impl Into<String>) -> Self {
        Error::Programming {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }

    /// Classify a backend error code
    ///
    /// Cancellation codes become [`ErrorKind::Cancelled`], `NotInTx` becomes
    /// [`ErrorKind::Transaction`], and everything else stays a transport
    /// error with the code retained.
    pub fn remote(
        code: RpcCode,
        keyspace: Option<String>,
        shard: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        match code {
            RpcCode::Cancelled => Error::cancelled(CancelCause::Cancelled),
            RpcCode::DeadlineExceeded => Error::cancelled(CancelCause::DeadlineExceeded),
            RpcCode::NotInTx => Error::transaction(reason),
            _ => Error::Transport {
                code,
                keyspace,
                shard,
                reason: reason.into(),
            },
        }
    }

    /// The classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Caller { .. } => ErrorKind::Caller,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Transaction { .. } => ErrorKind::Transaction,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Programming { .. } => ErrorKind::Programming,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The backend code for transport errors
    pub fn rpc_code(&self) -> Option<RpcCode> {
        match self {
            Error::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Prefix the reason with the position of a batch element
    ///
    /// The classification is unchanged. Cancellation errors carry no reason
    /// and are returned as-is.
    pub fn in_batch(self, index: usize) -> Self {
        let prefix = |reason: String| format!("batch element {}: {}", index, reason);
        match self {
            Error::Caller { reason } => Error::Caller {
                reason: prefix(reason),
            },
            Error::Transport {
                code,
                keyspace,
                shard,
                reason,
            } => Error::Transport {
                code,
                keyspace,
                shard,
                reason: prefix(reason),
            },
            Error::Transaction { reason } => Error::Transaction {
                reason: prefix(reason),
            },
            Error::Programming { reason } => Error::Programming {
                reason: prefix(reason),
            },
            Error::Internal { reason } => Error::Internal {
                reason: prefix(reason),
            },
            cancelled @ Error::Cancelled { .. } => cancelled,
        }
    }

    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::caller("x").kind(), ErrorKind::Caller);
        assert_eq!(
            Error::transport(RpcCode::UnknownError, "x").kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::transaction("x").kind(), ErrorKind::Transaction);
        assert_eq!(
            Error::cancelled(CancelCause::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(Error::programming("x").kind(), ErrorKind::Programming);
        assert_eq!(Error::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_remote_classifies_cancellation_codes() {
        let err = Error::remote(RpcCode::DeadlineExceeded, None, None, "slow");
        assert_eq!(
            err,
            Error::Cancelled {
                cause: CancelCause::DeadlineExceeded
            }
        );

        let err = Error::remote(RpcCode::Cancelled, None, None, "gone");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_remote_not_in_tx_is_transaction_error() {
        let err = Error::remote(RpcCode::NotInTx, None, None, "no tx");
        assert_eq!(err.kind(), ErrorKind::Transaction);
    }

    #[test]
    fn test_remote_keeps_code_and_identity() {
        let err = Error::remote(
            RpcCode::QueryNotServed,
            Some("user".into()),
            Some("-80".into()),
            "tablet draining",
        );
        assert_eq!(err.rpc_code(), Some(RpcCode::QueryNotServed));
        let msg = err.to_string();
        assert!(msg.contains("QUERY_NOT_SERVED"));
        assert!(msg.contains("user/-80"));
        assert!(msg.contains("tablet draining"));
    }

    #[test]
    fn test_display_without_location() {
        let err = Error::transport(RpcCode::TransientError, "connection reset");
        assert_eq!(
            err.to_string(),
            "transport error [TRANSIENT_ERROR]: connection reset"
        );
    }

    #[test]
    fn test_in_batch_prefixes_reason_and_keeps_kind() {
        let err = Error::shard(RpcCode::IntegrityError, "user", "80-", "duplicate key").in_batch(3);
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("batch element 3: duplicate key"));

        let cancelled = Error::cancelled(CancelCause::Cancelled).in_batch(1);
        assert_eq!(cancelled, Error::cancelled(CancelCause::Cancelled));
    }

    #[test]
    fn test_error_serializes() {
        let err = Error::programming("cursor closed");
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
