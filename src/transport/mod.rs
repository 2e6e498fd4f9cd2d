//! Frontend transport
//!
//! [`FrontendTransport`] is the seam between the ticket client and the wire.
//! [`GrpcFrontend`] implements it over tonic; tests substitute scripted fakes.

pub mod grpc;
pub mod proto;

use crate::error::TransportResult;
use crate::types::{Assignment, SearchCriteria, Ticket};
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

pub use grpc::GrpcFrontend;

/// Server-streamed assignment updates for one ticket.
///
/// `Ok(None)` is an empty update (no match yet); the stream ends when the
/// backend closes it. Dropping the stream cancels the call.
pub type AssignmentStream =
    Pin<Box<dyn Stream<Item = TransportResult<Option<Assignment>>> + Send>>;

/// RPCs consumed from the matchmaking frontend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrontendTransport: Send + Sync {
    /// Create a ticket; the backend assigns its id
    async fn create_ticket(&self, criteria: &SearchCriteria) -> TransportResult<Ticket>;

    /// Fetch a ticket by id
    async fn get_ticket(&self, ticket_id: &str) -> TransportResult<Ticket>;

    /// Delete a ticket by id
    async fn delete_ticket(&self, ticket_id: &str) -> TransportResult<()>;

    /// Open the assignment watch for one ticket
    async fn watch_assignments(&self, ticket_id: &str) -> TransportResult<AssignmentStream>;
}
