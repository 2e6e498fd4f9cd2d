//! Ticket client
//!
//! Owns every search started through it. Each search runs as one task on the
//! captured runtime: create the ticket (retrying transient failures with
//! backoff), then watch for an assignment until it arrives, the deadline
//! passes, the watcher gives up, or the caller cancels.

use super::handle::SearchHandle;
use super::state::SearchCell;
use super::watcher::{AssignmentWatcher, WatchEvent, WatchOptions};
use crate::backoff::{Backoff, BackoffPolicy};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::{TicketError, TransportError};
use crate::metrics::MetricsCollector;
use crate::types::{SearchCriteria, SearchId, SearchState, Ticket, TicketId};
use crate::utils::{current_timestamp, duration_millis, generate_search_id};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Retry and deadline settings applied to every search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub backoff: BackoffPolicy,
    /// Fixed jitter seed; a fresh OS seed is used when unset
    pub backoff_seed: Option<u64>,
    /// Retries for CreateTicket and reconnects for the watcher (0 = unbounded)
    pub max_retries: u32,
    /// Whole-search deadline, measured from `start_search`
    pub deadline: Option<Duration>,
    pub watch_max_elapsed: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            backoff_seed: None,
            max_retries: 5,
            deadline: Some(Duration::from_secs(60)),
            watch_max_elapsed: None,
        }
    }
}

impl From<&ClientConfig> for SearchOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            backoff: config.backoff_policy(),
            backoff_seed: config.backoff.seed,
            max_retries: config.search.max_reconnect_attempts,
            deadline: config.search_deadline(),
            watch_max_elapsed: config.watch_max_elapsed(),
        }
    }
}

struct SearchEntry {
    cell: Arc<SearchCell>,
    cancel: CancellationToken,
}

/// Entry point for matchmaking searches
#[derive(Clone)]
pub struct TicketClient {
    connection: Arc<ConnectionManager>,
    options: SearchOptions,
    searches: Arc<RwLock<HashMap<SearchId, SearchEntry>>>,
    runtime: Handle,
    /// Search tasks and best-effort ticket deletes
    tasks: TaskTracker,
    metrics: Arc<MetricsCollector>,
}

impl TicketClient {
    /// Create a client bound to the runtime it is constructed on
    pub fn new(
        connection: Arc<ConnectionManager>,
        options: SearchOptions,
    ) -> Result<Self, TicketError> {
        let runtime = Handle::try_current().map_err(|e| TicketError::Configuration {
            message: format!("TicketClient must be created inside a Tokio runtime: {}", e),
        })?;
        Ok(Self::with_runtime(connection, options, runtime))
    }

    /// Create a client that spawns its search tasks on `runtime`
    pub fn with_runtime(
        connection: Arc<ConnectionManager>,
        options: SearchOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            connection,
            options,
            searches: Arc::new(RwLock::new(HashMap::new())),
            runtime,
            tasks: TaskTracker::new(),
            metrics: Arc::new(MetricsCollector::default()),
        }
    }

    /// Build the gRPC connection and client from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self, TicketError> {
        let connection = ConnectionManager::connect(&config.frontend)?;
        Self::new(Arc::new(connection), SearchOptions::from(config))
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Allocate a new search in `Idle`
    pub fn new_search(&self) -> Result<SearchHandle, TicketError> {
        let search_id = generate_search_id();
        let cell = Arc::new(SearchCell::new(search_id));
        let handle = SearchHandle::new(search_id, cell.subscribe());

        let mut searches = self.searches.write().map_err(|_| TicketError::Internal {
            message: "Failed to acquire searches lock".to_string(),
        })?;
        searches.insert(
            search_id,
            SearchEntry {
                cell,
                cancel: CancellationToken::new(),
            },
        );

        debug!(search_id = %search_id, "Search allocated");
        Ok(handle)
    }

    /// Fresh handle onto an existing search
    pub fn search(&self, search_id: SearchId) -> Option<SearchHandle> {
        let searches = self.searches.read().ok()?;
        searches
            .get(&search_id)
            .map(|entry| SearchHandle::new(search_id, entry.cell.subscribe()))
    }

    /// Number of searches creating a ticket or watching
    pub fn active_searches(&self) -> usize {
        self.searches
            .read()
            .map(|searches| {
                searches
                    .values()
                    .filter(|entry| entry.cell.state().is_active())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Begin matchmaking for `handle`. Returns once the search is in
    /// `CreatingTicket`; progress is observed through the handle.
    pub fn start_search(
        &self,
        handle: &SearchHandle,
        criteria: SearchCriteria,
    ) -> Result<(), TicketError> {
        let search_id = handle.id();
        criteria.validate()?;

        let (cell, cancel) = self.entry(search_id)?;
        let started_at = current_timestamp();
        if !cell.transition(SearchState::CreatingTicket, |snapshot| {
            snapshot.started_at = Some(started_at);
        }) {
            let state = cell.state();
            return Err(if state.is_terminal() {
                TicketError::SearchFinished { search_id, state }
            } else {
                TicketError::SearchAlreadyActive { search_id }
            });
        }

        info!(search_id = %search_id, "Search started");
        self.metrics.record_search_started();

        let task = SearchTask {
            search_id,
            criteria,
            cell,
            watch_cancel: cancel.child_token(),
            cancel,
            connection: self.connection.clone(),
            options: self.options.clone(),
            metrics: self.metrics.clone(),
            runtime: self.runtime.clone(),
            tasks: self.tasks.clone(),
        };
        self.tasks.spawn_on(task.run(), &self.runtime);
        Ok(())
    }

    /// Allocate and start a search in one step
    pub fn find_match(&self, criteria: SearchCriteria) -> Result<SearchHandle, TicketError> {
        let handle = self.new_search()?;
        if let Err(e) = self.start_search(&handle, criteria) {
            self.release(&handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Cancel a search. The state flips to `Cancelled` before this returns;
    /// a known ticket is then deleted in the background. No-op for searches
    /// that are `Idle` or already finished.
    pub fn cancel_search(&self, handle: &SearchHandle) {
        let Ok((cell, cancel)) = self.entry(handle.id()) else {
            debug!(search_id = %handle.id(), "Cancel for unknown search ignored");
            return;
        };

        let mut known_ticket: Option<TicketId> = None;
        let mut started_at = None;
        let cancelled = cell.transition(SearchState::Cancelled, |snapshot| {
            // Flipped under the state lock so no call starts after `Cancelled` is visible.
            cancel.cancel();
            known_ticket = snapshot.owned_ticket_id();
            started_at = snapshot.started_at;
        });
        if !cancelled {
            debug!(
                search_id = %handle.id(),
                "Search in state {} not cancelled",
                cell.state()
            );
            return;
        }

        info!(search_id = %handle.id(), "Search cancelled");
        self.metrics
            .record_search_finished(SearchState::Cancelled, elapsed_since(started_at));

        if let Some(ticket_id) = known_ticket {
            spawn_ticket_cleanup(
                &self.tasks,
                &self.runtime,
                self.connection.clone(),
                ticket_id,
            );
        }
    }

    /// Cancel every running search, then wait for search tasks and ticket
    /// deletes to finish. Call before the runtime goes away.
    pub async fn shutdown(&self) {
        let running: Vec<SearchHandle> = self
            .searches
            .read()
            .map(|searches| {
                searches
                    .iter()
                    .filter(|(_, entry)| entry.cell.state().is_active())
                    .map(|(search_id, entry)| SearchHandle::new(*search_id, entry.cell.subscribe()))
                    .collect()
            })
            .unwrap_or_default();

        for handle in &running {
            self.cancel_search(handle);
        }

        self.tasks.close();
        self.tasks.wait().await;
        debug!(cancelled = running.len(), "Ticket client shut down");
    }

    /// Cancel if still running and forget the search
    pub fn release(&self, handle: &SearchHandle) {
        self.cancel_search(handle);
        if let Ok(mut searches) = self.searches.write() {
            searches.remove(&handle.id());
        }
    }

    /// Forget every finished search, returning how many were dropped
    pub fn prune_finished(&self) -> usize {
        let Ok(mut searches) = self.searches.write() else {
            return 0;
        };
        let before = searches.len();
        searches.retain(|_, entry| !entry.cell.state().is_terminal());
        let pruned = before - searches.len();
        if pruned > 0 {
            debug!("Pruned {} finished searches", pruned);
        }
        pruned
    }

    /// Fetch a ticket directly. Single attempt.
    pub async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, TicketError> {
        Ok(self.connection.get_ticket(ticket_id).await?)
    }

    /// Delete a ticket directly. Single attempt.
    pub async fn delete_ticket(&self, ticket_id: &str) -> Result<(), TicketError> {
        Ok(self.connection.delete_ticket(ticket_id).await?)
    }

    fn entry(
        &self,
        search_id: SearchId,
    ) -> Result<(Arc<SearchCell>, CancellationToken), TicketError> {
        let searches = self.searches.read().map_err(|_| TicketError::Internal {
            message: "Failed to acquire searches lock".to_string(),
        })?;
        searches
            .get(&search_id)
            .map(|entry| (entry.cell.clone(), entry.cancel.clone()))
            .ok_or(TicketError::UnknownSearch { search_id })
    }
}

fn elapsed_since(started_at: Option<DateTime<Utc>>) -> Duration {
    started_at
        .and_then(|started| (Utc::now() - started).to_std().ok())
        .unwrap_or_default()
}

fn spawn_ticket_cleanup(
    tasks: &TaskTracker,
    runtime: &Handle,
    connection: Arc<ConnectionManager>,
    ticket_id: TicketId,
) {
    tasks.spawn_on(
        async move {
            match connection.delete_ticket(&ticket_id).await {
                Ok(()) => info!(ticket_id = %ticket_id, "Ticket deleted"),
                Err(e) => warn!(ticket_id = %ticket_id, "Failed to delete ticket: {}", e),
            }
        },
        runtime,
    );
}

enum Halt {
    Cancelled,
    Failed(TicketError),
}

enum Finish {
    Assigned(Ticket),
    Failed {
        ticket_id: Option<TicketId>,
        error: TicketError,
    },
    TimedOut(Duration),
    /// `orphan` is a ticket created after the cancel was observed
    Cancelled { orphan: Option<TicketId> },
}

struct SearchTask {
    search_id: SearchId,
    criteria: SearchCriteria,
    cell: Arc<SearchCell>,
    cancel: CancellationToken,
    watch_cancel: CancellationToken,
    connection: Arc<ConnectionManager>,
    options: SearchOptions,
    metrics: Arc<MetricsCollector>,
    runtime: Handle,
    tasks: TaskTracker,
}

impl SearchTask {
    async fn run(self) {
        let finish = match self.options.deadline {
            Some(deadline) => match timeout(deadline, self.drive()).await {
                Ok(finish) => finish,
                Err(_) => Finish::TimedOut(deadline),
            },
            None => self.drive().await,
        };

        // Stops the watcher, which closes its stream.
        self.watch_cancel.cancel();

        match finish {
            Finish::Assigned(ticket) => {
                let ticket_id = ticket.id.clone();
                let mut started_at = None;
                if self.cell.transition(SearchState::Assigned, |snapshot| {
                    started_at = snapshot.started_at;
                    snapshot.ticket = Some(ticket);
                }) {
                    info!(search_id = %self.search_id, ticket_id = %ticket_id, "Search assigned");
                    self.metrics
                        .record_search_finished(SearchState::Assigned, elapsed_since(started_at));
                }
            }
            Finish::Failed { ticket_id, error } => {
                self.finish_unmatched(SearchState::Failed, error, ticket_id);
            }
            Finish::TimedOut(deadline) => {
                let ticket_id = self.cell.snapshot().owned_ticket_id();
                self.finish_unmatched(
                    SearchState::TimedOut,
                    TicketError::TimedOut { deadline },
                    ticket_id,
                );
            }
            Finish::Cancelled { orphan } => {
                if let Some(ticket_id) = orphan {
                    self.cleanup(ticket_id);
                }
            }
        }
    }

    fn finish_unmatched(
        &self,
        state: SearchState,
        error: TicketError,
        ticket_id: Option<TicketId>,
    ) {
        let mut started_at = None;
        let reported = error.to_string();
        if !self.cell.transition(state, |snapshot| {
            started_at = snapshot.started_at;
            snapshot.error = Some(error);
        }) {
            return;
        }

        warn!(search_id = %self.search_id, "Search ended {}: {}", state, reported);
        self.metrics
            .record_search_finished(state, elapsed_since(started_at));

        if let Some(ticket_id) = ticket_id {
            self.cleanup(ticket_id);
        }
    }

    fn cleanup(&self, ticket_id: TicketId) {
        spawn_ticket_cleanup(
            &self.tasks,
            &self.runtime,
            self.connection.clone(),
            ticket_id,
        );
    }

    async fn drive(&self) -> Finish {
        let ticket = match self.create_ticket().await {
            Ok(ticket) => ticket,
            Err(Halt::Cancelled) => return Finish::Cancelled { orphan: None },
            Err(Halt::Failed(error)) => {
                return Finish::Failed {
                    ticket_id: None,
                    error,
                }
            }
        };

        let ticket_id = ticket.id.clone();
        let watching = ticket.clone();
        if !self.cell.transition(SearchState::Watching, |snapshot| {
            snapshot.ticket = Some(watching);
        }) {
            // Cancelled while the create call was in flight.
            return Finish::Cancelled {
                orphan: Some(ticket_id),
            };
        }

        let mut events = AssignmentWatcher::new(
            ticket_id.clone(),
            self.connection.clone(),
            self.options.backoff,
            WatchOptions {
                max_reconnects: self.options.max_retries,
                max_elapsed: self.options.watch_max_elapsed,
            },
            self.watch_cancel.clone(),
        )
        .with_backoff(self.backoff())
        .with_metrics(self.metrics.clone())
        .spawn();

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Finish::Cancelled { orphan: None },
            event = events.next() => event,
        };

        match event {
            Some(WatchEvent::Assignment(assignment)) => {
                let mut ticket = ticket;
                match ticket.assign(assignment) {
                    Ok(()) => Finish::Assigned(ticket),
                    Err(error) => Finish::Failed {
                        ticket_id: Some(ticket_id),
                        error,
                    },
                }
            }
            Some(WatchEvent::StreamError(e)) => Finish::Failed {
                ticket_id: Some(ticket_id),
                error: TicketError::Transport(e),
            },
            Some(WatchEvent::StreamClosed) => Finish::Failed {
                ticket_id: Some(ticket_id.clone()),
                error: TicketError::StreamClosed { ticket_id },
            },
            None => Finish::Cancelled { orphan: None },
        }
    }

    async fn create_ticket(&self) -> Result<Ticket, Halt> {
        let mut backoff = self.backoff();
        let mut retries: u32 = 0;

        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                attempt = self.connection.create_ticket(&self.criteria) => attempt,
            };

            let error: TransportError = match attempt {
                Ok(created) => {
                    info!(
                        search_id = %self.search_id,
                        ticket_id = %created.id,
                        attempt = retries + 1,
                        "Ticket created"
                    );
                    return Ok(Ticket::new(
                        created.id,
                        self.criteria.clone(),
                        created.created_at,
                    ));
                }
                Err(e) => e,
            };

            self.metrics.record_rpc_error("CreateTicket", error.kind);
            if !error.is_retryable() {
                error!(search_id = %self.search_id, "CreateTicket rejected: {}", error);
                return Err(Halt::Failed(TicketError::Transport(error)));
            }

            retries += 1;
            if self.options.max_retries != 0 && retries > self.options.max_retries {
                error!(
                    search_id = %self.search_id,
                    attempt = retries,
                    "CreateTicket retries exhausted: {}",
                    error
                );
                return Err(Halt::Failed(TicketError::RetriesExhausted {
                    rpc: "CreateTicket",
                    attempts: retries,
                    last: error,
                }));
            }

            let delay = backoff.next_delay();
            warn!(
                search_id = %self.search_id,
                attempt = retries,
                delay_ms = duration_millis(delay),
                "CreateTicket failed, retrying: {}",
                error
            );
            self.metrics.record_rpc_retry("CreateTicket");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Halt::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::from_seed(self.options.backoff, self.options.backoff_seed)
    }
}
