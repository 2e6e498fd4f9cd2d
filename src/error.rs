//! Error types for the ticket client
//!
//! Transport failures are carried as [`TransportError`] with a classified
//! [`TransportKind`]; everything the caller can observe on a search is a
//! [`TicketError`]. Configuration and tooling code uses `anyhow`.

use crate::types::{SearchId, SearchState, TicketId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type alias for configuration, metrics and CLI code
pub type Result<T> = anyhow::Result<T>;

/// Result type for a single transport call
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Classified transport status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Unavailable,
    DeadlineExceeded,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    Internal,
    Cancelled,
    Unknown,
}

impl TransportKind {
    /// Whether a caller may retry the call under a backoff policy
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TransportKind::Unavailable | TransportKind::DeadlineExceeded
        )
    }

    /// Map a gRPC status code onto the client taxonomy
    pub fn from_code(code: tonic::Code) -> Self {
        use tonic::Code;

        match code {
            Code::Unavailable => TransportKind::Unavailable,
            Code::DeadlineExceeded => TransportKind::DeadlineExceeded,
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                TransportKind::InvalidArgument
            }
            Code::PermissionDenied | Code::Unauthenticated => TransportKind::PermissionDenied,
            Code::NotFound => TransportKind::NotFound,
            Code::Internal | Code::DataLoss | Code::Unimplemented => TransportKind::Internal,
            Code::Cancelled => TransportKind::Cancelled,
            _ => TransportKind::Unknown,
        }
    }

    /// Stable label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Unavailable => "unavailable",
            TransportKind::DeadlineExceeded => "deadline_exceeded",
            TransportKind::InvalidArgument => "invalid_argument",
            TransportKind::PermissionDenied => "permission_denied",
            TransportKind::NotFound => "not_found",
            TransportKind::Internal => "internal",
            TransportKind::Cancelled => "cancelled",
            TransportKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw transport failure surfaced by the connection layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(TransportKind::DeadlineExceeded, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        Self::new(
            TransportKind::from_code(status.code()),
            status.message().to_string(),
        )
    }
}

impl From<tonic::transport::Error> for TransportError {
    fn from(err: tonic::transport::Error) -> Self {
        Self::unavailable(err.to_string())
    }
}

/// Errors visible to callers of the ticket client
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TicketError {
    #[error("Invalid search criteria: {reason}")]
    InvalidSearch { reason: String },

    #[error("Search {search_id} is already active")]
    SearchAlreadyActive { search_id: SearchId },

    #[error("Search {search_id} already finished in state {state}")]
    SearchFinished {
        search_id: SearchId,
        state: SearchState,
    },

    #[error("Unknown search: {search_id}")]
    UnknownSearch { search_id: SearchId },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{rpc} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        rpc: &'static str,
        attempts: u32,
        last: TransportError,
    },

    #[error("Assignment stream for ticket {ticket_id} closed without an assignment")]
    StreamClosed { ticket_id: TicketId },

    #[error("Search deadline of {deadline:?} elapsed")]
    TimedOut { deadline: Duration },

    #[error("Ticket {ticket_id} already has an assignment")]
    AssignmentAlreadySet { ticket_id: TicketId },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}
