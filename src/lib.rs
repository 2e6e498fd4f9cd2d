//! Match Ticket - Open Match frontend client
//!
//! This crate creates matchmaking tickets against an Open Match frontend,
//! watches them for an assignment with reconnects and backoff, and exposes
//! each search as an observable state machine.

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod search;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{Result, TicketError, TransportError, TransportKind};
pub use types::*;

// Re-export key components
pub use backoff::{Backoff, BackoffPolicy};
pub use connection::ConnectionManager;
pub use search::{
    AssignmentWatcher, SearchHandle, SearchOptions, SearchOutcome, SearchSnapshot, TicketClient,
};
pub use transport::FrontendTransport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
