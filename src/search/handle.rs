//! Caller-side view of one search

use super::state::SearchSnapshot;
use crate::error::TicketError;
use crate::types::{Assignment, SearchId, SearchState, TicketId};
use tokio::sync::watch;

/// How a search ended
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Matched(Assignment),
    Cancelled,
    TimedOut,
    Failed(TicketError),
}

impl SearchOutcome {
    fn from_snapshot(snapshot: &SearchSnapshot) -> Option<Self> {
        match snapshot.state {
            SearchState::Assigned => snapshot.assignment().cloned().map(SearchOutcome::Matched),
            SearchState::Cancelled => Some(SearchOutcome::Cancelled),
            SearchState::TimedOut => Some(SearchOutcome::TimedOut),
            SearchState::Failed => Some(SearchOutcome::Failed(
                snapshot
                    .error
                    .clone()
                    .unwrap_or(TicketError::Internal {
                        message: "search failed without a recorded error".to_string(),
                    }),
            )),
            _ => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, SearchOutcome::Matched(_))
    }
}

/// Handle to one search, issued by `TicketClient`.
///
/// Clones share the search but keep their own position in the transition
/// history, so each clone sees every transition exactly once.
#[derive(Debug, Clone)]
pub struct SearchHandle {
    id: SearchId,
    rx: watch::Receiver<SearchSnapshot>,
    seen: usize,
}

impl SearchHandle {
    pub(crate) fn new(id: SearchId, rx: watch::Receiver<SearchSnapshot>) -> Self {
        Self { id, rx, seen: 0 }
    }

    pub fn id(&self) -> SearchId {
        self.id
    }

    pub fn state(&self) -> SearchState {
        self.rx.borrow().state
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.rx.borrow().clone()
    }

    pub fn ticket_id(&self) -> Option<TicketId> {
        self.rx.borrow().owned_ticket_id()
    }

    /// The resolved assignment, once `Assigned`
    pub fn assignment(&self) -> Option<Assignment> {
        self.rx.borrow().assignment().cloned()
    }

    pub fn history(&self) -> Vec<SearchState> {
        self.rx.borrow().history.clone()
    }

    /// Next state in order, waiting if none is pending.
    /// Returns `None` once the terminal state has been delivered.
    pub async fn next_transition(&mut self) -> Option<SearchState> {
        loop {
            {
                let snapshot = self.rx.borrow_and_update();
                if let Some(state) = snapshot.history.get(self.seen).copied() {
                    self.seen += 1;
                    return Some(state);
                }
                if snapshot.state.is_terminal() {
                    return None;
                }
            }

            if self.rx.changed().await.is_err() {
                // Sender gone; deliver whatever is left.
                let snapshot = self.rx.borrow();
                let state = snapshot.history.get(self.seen).copied();
                if state.is_some() {
                    self.seen += 1;
                }
                return state;
            }
        }
    }

    /// Wait for a terminal state and return the final snapshot
    pub async fn wait_terminal(&mut self) -> SearchSnapshot {
        let finished = self
            .rx
            .wait_for(|snapshot| snapshot.state.is_terminal())
            .await
            .map(|snapshot| snapshot.clone())
            .ok();
        finished.unwrap_or_else(|| self.rx.borrow().clone())
    }

    /// Wait for the search to end and report how
    pub async fn outcome(&mut self) -> SearchOutcome {
        let snapshot = self.wait_terminal().await;
        SearchOutcome::from_snapshot(&snapshot).unwrap_or_else(|| {
            SearchOutcome::Failed(TicketError::Internal {
                message: format!("search ended in non-terminal state {}", snapshot.state),
            })
        })
    }
}
