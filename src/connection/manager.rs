//! Connection management for the matchmaking frontend
//!
//! [`ConnectionManager`] owns the transport for one frontend endpoint and
//! exposes unary calls and the assignment stream. It applies the per-call
//! deadline and tracks a logical [`ConnectionState`]. It never retries;
//! retry policy belongs to callers.

use crate::config::FrontendSettings;
use crate::error::{TransportError, TransportKind, TransportResult};
use crate::transport::{AssignmentStream, FrontendTransport, GrpcFrontend};
use crate::types::{ConnectionState, SearchCriteria, Ticket};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Wrapper around the frontend transport with state tracking
pub struct ConnectionManager {
    transport: Arc<dyn FrontendTransport>,
    endpoint: String,
    call_timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Wrap an existing transport
    pub fn new(
        transport: Arc<dyn FrontendTransport>,
        endpoint: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            endpoint: endpoint.into(),
            call_timeout,
            state,
        }
    }

    /// Build a gRPC-backed manager. Does not block on reachability.
    pub fn connect(settings: &FrontendSettings) -> TransportResult<Self> {
        let frontend = GrpcFrontend::new(settings)?;
        info!("Frontend channel configured for {}", settings.address);
        Ok(Self::new(
            Arc::new(frontend),
            settings.address.clone(),
            settings.call_timeout(),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn create_ticket(&self, criteria: &SearchCriteria) -> TransportResult<Ticket> {
        self.call_unary("CreateTicket", self.transport.create_ticket(criteria))
            .await
    }

    pub async fn get_ticket(&self, ticket_id: &str) -> TransportResult<Ticket> {
        self.call_unary("GetTicket", self.transport.get_ticket(ticket_id))
            .await
    }

    pub async fn delete_ticket(&self, ticket_id: &str) -> TransportResult<()> {
        self.call_unary("DeleteTicket", self.transport.delete_ticket(ticket_id))
            .await
    }

    /// Open the assignment stream for one ticket. The per-call deadline
    /// bounds only stream establishment, not its lifetime.
    pub async fn open_stream(&self, ticket_id: &str) -> TransportResult<AssignmentStream> {
        self.call_unary("WatchAssignments", self.transport.watch_assignments(ticket_id))
            .await
    }

    async fn call_unary<T, F>(&self, rpc: &'static str, call: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>>,
    {
        self.begin_call();

        let result = match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::deadline_exceeded(format!(
                "{} exceeded {:?}",
                rpc, self.call_timeout
            ))),
        };

        match &result {
            Ok(_) => debug!("{} to {} succeeded", rpc, self.endpoint),
            Err(e) => warn!("{} to {} failed: {}", rpc, self.endpoint, e),
        }
        self.finish_call(&result);
        result
    }

    fn begin_call(&self) {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                *state = ConnectionState::Connecting;
                true
            }
            _ => false,
        });
    }

    fn finish_call<T>(&self, result: &TransportResult<T>) {
        let next = match result {
            Ok(_) => ConnectionState::Connected,
            Err(e) if e.kind == TransportKind::Unavailable => ConnectionState::Failed,
            // The backend answered; the channel itself is fine.
            Err(e) if e.kind != TransportKind::DeadlineExceeded => ConnectionState::Connected,
            Err(_) => return,
        };

        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Connection to {}: {} -> {}", self.endpoint, state, next);
            *state = next;
            true
        });
    }
}
