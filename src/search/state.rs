//! Per-search state cell
//!
//! Every search publishes a [`SearchSnapshot`] through a watch channel. All
//! writes go through [`SearchCell::transition`], which applies an edge only
//! if the state machine allows it, so observers see a monotonic history with
//! no duplicates even when cancellation races the search task.

use crate::error::TicketError;
use crate::types::{Assignment, SearchId, SearchState, Ticket, TicketId};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

/// Everything a caller can observe about one search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSnapshot {
    pub search_id: SearchId,
    pub state: SearchState,
    /// Every state entered so far, starting with `Idle`
    pub history: Vec<SearchState>,
    /// Set once a ticket id exists
    pub ticket: Option<Ticket>,
    /// Set when the search ends `Failed` or `TimedOut`
    pub error: Option<TicketError>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SearchSnapshot {
    fn new(search_id: SearchId) -> Self {
        Self {
            search_id,
            state: SearchState::Idle,
            history: vec![SearchState::Idle],
            ticket: None,
            error: None,
            started_at: None,
        }
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket.as_ref().map(|ticket| ticket.id.as_str())
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.ticket.as_ref().and_then(Ticket::assignment)
    }

    pub fn owned_ticket_id(&self) -> Option<TicketId> {
        self.ticket_id().map(str::to_string)
    }
}

pub(crate) struct SearchCell {
    tx: watch::Sender<SearchSnapshot>,
}

impl SearchCell {
    pub(crate) fn new(search_id: SearchId) -> Self {
        let (tx, _) = watch::channel(SearchSnapshot::new(search_id));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.tx.subscribe()
    }

    pub(crate) fn state(&self) -> SearchState {
        self.tx.borrow().state
    }

    pub(crate) fn snapshot(&self) -> SearchSnapshot {
        self.tx.borrow().clone()
    }

    /// Move to `next` and apply `update`, atomically. Returns false, leaving
    /// the snapshot untouched, if the edge is not allowed from the current state.
    pub(crate) fn transition(
        &self,
        next: SearchState,
        update: impl FnOnce(&mut SearchSnapshot),
    ) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if !snapshot.state.can_transition_to(next) {
                debug!(
                    search_id = %snapshot.search_id,
                    "Ignoring transition {} -> {}",
                    snapshot.state,
                    next
                );
                return false;
            }
            debug!(
                search_id = %snapshot.search_id,
                "Search transition {} -> {}",
                snapshot.state,
                next
            );
            snapshot.state = next;
            snapshot.history.push(next);
            update(snapshot);
            true
        })
    }
}
