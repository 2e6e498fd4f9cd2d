//! Test fixtures and scripted transports for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use match_ticket::error::{TransportError, TransportKind, TransportResult};
use match_ticket::transport::{AssignmentStream, FrontendTransport};
use match_ticket::types::{Assignment, SearchCriteria, Ticket};
use match_ticket::{ConnectionManager, SearchOptions, TicketClient};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};

/// One RPC as observed by the fake frontend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    CreateTicket,
    GetTicket(String),
    DeleteTicket(String),
    WatchAssignments(String),
}

/// What one WatchAssignments call yields
#[derive(Debug, Clone)]
pub struct StreamScript {
    items: Vec<TransportResult<Option<Assignment>>>,
    hold_open: bool,
}

impl StreamScript {
    /// Yield `items`, then close
    pub fn closing(items: Vec<TransportResult<Option<Assignment>>>) -> Self {
        Self {
            items,
            hold_open: false,
        }
    }

    /// Yield `items`, then stay open without further messages
    pub fn held(items: Vec<TransportResult<Option<Assignment>>>) -> Self {
        Self {
            items,
            hold_open: true,
        }
    }

    /// Empty updates followed by a real assignment
    pub fn assigns_after(empty_updates: usize, connection: &str) -> Self {
        let mut items: Vec<TransportResult<Option<Assignment>>> =
            (0..empty_updates).map(|_| Ok(None)).collect();
        items.push(Ok(Some(Assignment::new(connection))));
        Self::held(items)
    }
}

type CreateHook = Box<dyn FnOnce() + Send>;

/// Scripted Open Match frontend that records every call
#[derive(Default)]
pub struct ScriptedFrontend {
    creates: Mutex<VecDeque<TransportResult<String>>>,
    /// Runs inside the next CreateTicket call, before it replies
    on_create: Mutex<Option<CreateHook>>,
    opens: Mutex<VecDeque<TransportResult<StreamScript>>>,
    tickets: Mutex<HashMap<String, Ticket>>,
    calls: Mutex<Vec<RpcCall>>,
    closed_streams: Arc<AtomicUsize>,
}

impl ScriptedFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a CreateTicket reply that succeeds with `ticket_id`
    pub fn create_ok(self, ticket_id: &str) -> Self {
        self.push_create(Ok(ticket_id.to_string()));
        self
    }

    /// Queue a failing CreateTicket reply
    pub fn create_err(self, kind: TransportKind) -> Self {
        self.push_create(Err(TransportError::new(kind, "scripted failure")));
        self
    }

    /// Queue a WatchAssignments call that opens and plays `script`
    pub fn stream(self, script: StreamScript) -> Self {
        if let Ok(mut opens) = self.opens.lock() {
            opens.push_back(Ok(script));
        }
        self
    }

    /// Queue a WatchAssignments call that fails to open
    pub fn stream_err(self, kind: TransportKind) -> Self {
        if let Ok(mut opens) = self.opens.lock() {
            opens.push_back(Err(TransportError::new(kind, "scripted stream failure")));
        }
        self
    }

    /// Run `hook` while the next CreateTicket call is in flight
    pub fn on_create(&self, hook: impl FnOnce() + Send + 'static) {
        if let Ok(mut on_create) = self.on_create.lock() {
            *on_create = Some(Box::new(hook));
        }
    }

    fn push_create(&self, reply: TransportResult<String>) {
        if let Ok(mut creates) = self.creates.lock() {
            creates.push_back(reply);
        }
    }

    fn record(&self, call: RpcCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, matches: impl Fn(&RpcCall) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|call| *call == RpcCall::CreateTicket)
    }

    pub fn watch_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::WatchAssignments(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::DeleteTicket(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Streams dropped by the client so far
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrontendTransport for ScriptedFrontend {
    async fn create_ticket(&self, criteria: &SearchCriteria) -> TransportResult<Ticket> {
        self.record(RpcCall::CreateTicket);
        let reply = self
            .creates
            .lock()
            .ok()
            .and_then(|mut creates| creates.pop_front())
            .unwrap_or_else(|| Err(TransportError::unavailable("no scripted reply")));
        let hook = self.on_create.lock().ok().and_then(|mut hook| hook.take());
        if let Some(hook) = hook {
            hook();
        }

        let ticket = Ticket::new(reply?, criteria.clone(), Utc::now());
        if let Ok(mut tickets) = self.tickets.lock() {
            tickets.insert(ticket.id.clone(), ticket.clone());
        }
        Ok(ticket)
    }

    async fn get_ticket(&self, ticket_id: &str) -> TransportResult<Ticket> {
        self.record(RpcCall::GetTicket(ticket_id.to_string()));
        self.tickets
            .lock()
            .ok()
            .and_then(|tickets| tickets.get(ticket_id).cloned())
            .ok_or_else(|| TransportError::new(TransportKind::NotFound, "ticket not found"))
    }

    async fn delete_ticket(&self, ticket_id: &str) -> TransportResult<()> {
        self.record(RpcCall::DeleteTicket(ticket_id.to_string()));
        if let Ok(mut tickets) = self.tickets.lock() {
            tickets.remove(ticket_id);
        }
        Ok(())
    }

    async fn watch_assignments(&self, ticket_id: &str) -> TransportResult<AssignmentStream> {
        self.record(RpcCall::WatchAssignments(ticket_id.to_string()));
        let script = self
            .opens
            .lock()
            .ok()
            .and_then(|mut opens| opens.pop_front())
            .unwrap_or_else(|| Ok(StreamScript::held(Vec::new())))?;

        let inner: AssignmentStream = if script.hold_open {
            Box::pin(
                tokio_stream::iter(script.items)
                    .chain(tokio_stream::pending::<TransportResult<Option<Assignment>>>()),
            )
        } else {
            Box::pin(tokio_stream::iter(script.items))
        };

        Ok(Box::pin(TrackedStream {
            inner,
            closed: self.closed_streams.clone(),
        }))
    }
}

/// Counts drops so tests can assert a stream was closed
struct TrackedStream {
    inner: AssignmentStream,
    closed: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = TransportResult<Option<Assignment>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Options with small, deterministic delays
pub fn test_options(max_retries: u32, deadline: Option<Duration>) -> SearchOptions {
    SearchOptions {
        backoff: match_ticket::BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
        ),
        backoff_seed: Some(42),
        max_retries,
        deadline,
        watch_max_elapsed: None,
    }
}

/// Client wired to a scripted frontend
pub fn create_test_client(
    frontend: ScriptedFrontend,
    options: SearchOptions,
) -> (TicketClient, Arc<ScriptedFrontend>) {
    let frontend = Arc::new(frontend);
    let connection = ConnectionManager::new(
        frontend.clone(),
        "fake-frontend:50504",
        Duration::from_secs(1),
    );
    let client = TicketClient::new(Arc::new(connection), options)
        .expect("tests run inside a Tokio runtime");
    (client, frontend)
}

/// Let spawned tasks (such as best-effort deletes) run to completion
pub async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn session_criteria() -> SearchCriteria {
    SearchCriteria::new()
        .tag("mode.session")
        .text("region", "us-central1")
        .number("skill", 1.2)
}
