//! Common types used throughout the ticket client

use crate::error::TicketError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Opaque ticket identifier assigned by the backend
pub type TicketId = String;

/// Client-side identifier for one search handle
pub type SearchId = Uuid;

/// A single matchable attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchValue {
    Number(f64),
    Text(String),
}

impl From<f64> for SearchValue {
    fn from(value: f64) -> Self {
        SearchValue::Number(value)
    }
}

impl From<i64> for SearchValue {
    fn from(value: i64) -> Self {
        SearchValue::Number(value as f64)
    }
}

impl From<&str> for SearchValue {
    fn from(value: &str) -> Self {
        SearchValue::Text(value.to_string())
    }
}

impl From<String> for SearchValue {
    fn from(value: String) -> Self {
        SearchValue::Text(value)
    }
}

/// What a ticket is matched on. Set once when the ticket is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub tags: Vec<String>,
    pub attributes: BTreeMap<String, SearchValue>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set a numeric attribute
    pub fn number(mut self, key: impl Into<String>, value: f64) -> Self {
        self.attributes
            .insert(key.into(), SearchValue::Number(value));
        self
    }

    /// Set a string attribute
    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.into(), SearchValue::Text(value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.attributes.is_empty()
    }

    /// Numeric attributes, as sent in the backend's `double_args`
    pub fn numbers(&self) -> impl Iterator<Item = (&str, f64)> {
        self.attributes.iter().filter_map(|(key, value)| match value {
            SearchValue::Number(n) => Some((key.as_str(), *n)),
            SearchValue::Text(_) => None,
        })
    }

    /// String attributes, as sent in the backend's `string_args`
    pub fn texts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().filter_map(|(key, value)| match value {
            SearchValue::Text(s) => Some((key.as_str(), s.as_str())),
            SearchValue::Number(_) => None,
        })
    }

    /// Reject criteria the backend could not match on
    pub fn validate(&self) -> Result<(), TicketError> {
        if self.is_empty() {
            return Err(TicketError::InvalidSearch {
                reason: "criteria must contain at least one tag or attribute".to_string(),
            });
        }

        if let Some(tag) = self.tags.iter().find(|t| t.trim().is_empty()) {
            return Err(TicketError::InvalidSearch {
                reason: format!("blank tag {:?}", tag),
            });
        }

        for (key, value) in &self.attributes {
            if key.trim().is_empty() {
                return Err(TicketError::InvalidSearch {
                    reason: "attribute keys cannot be blank".to_string(),
                });
            }
            if let SearchValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(TicketError::InvalidSearch {
                        reason: format!("attribute {} is not a finite number", key),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Where a ticket's owner should go to join its match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Connection endpoint, usually `host:port`
    pub connection: String,
    /// Side-channel data attached by the director
    pub extensions: BTreeMap<String, Vec<u8>>,
}

impl Assignment {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// The backend streams empty assignments until a match is made
    pub fn is_empty(&self) -> bool {
        self.connection.is_empty()
    }

    pub fn host(&self) -> &str {
        crate::utils::split_connection(&self.connection).0
    }

    pub fn port(&self) -> Option<u16> {
        crate::utils::split_connection(&self.connection).1
    }
}

/// A matchmaking request record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub criteria: SearchCriteria,
    pub created_at: DateTime<Utc>,
    assignment: Option<Assignment>,
}

impl Ticket {
    pub fn new(id: impl Into<TicketId>, criteria: SearchCriteria, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            criteria,
            created_at,
            assignment: None,
        }
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        self.assignment.as_ref()
    }

    /// Record the assignment. A ticket is assigned at most once.
    pub fn assign(&mut self, assignment: Assignment) -> Result<(), TicketError> {
        if self.assignment.is_some() {
            return Err(TicketError::AssignmentAlreadySet {
                ticket_id: self.id.clone(),
            });
        }
        self.assignment = Some(assignment);
        Ok(())
    }
}

/// State of the logical connection to the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle of one search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchState {
    Idle,
    CreatingTicket,
    Watching,
    Assigned,
    Cancelled,
    TimedOut,
    Failed,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SearchState::Assigned
                | SearchState::Cancelled
                | SearchState::TimedOut
                | SearchState::Failed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, SearchState::CreatingTicket | SearchState::Watching)
    }

    /// Edges of the search state machine
    pub fn can_transition_to(self, next: SearchState) -> bool {
        use SearchState::*;

        matches!(
            (self, next),
            (Idle, CreatingTicket)
                | (CreatingTicket, Watching)
                | (CreatingTicket, Failed)
                | (CreatingTicket, Cancelled)
                | (CreatingTicket, TimedOut)
                | (Watching, Assigned)
                | (Watching, TimedOut)
                | (Watching, Failed)
                | (Watching, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchState::Idle => "idle",
            SearchState::CreatingTicket => "creating_ticket",
            SearchState::Watching => "watching",
            SearchState::Assigned => "assigned",
            SearchState::Cancelled => "cancelled",
            SearchState::TimedOut => "timed_out",
            SearchState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SearchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchState::Idle => write!(f, "Idle"),
            SearchState::CreatingTicket => write!(f, "CreatingTicket"),
            SearchState::Watching => write!(f, "Watching"),
            SearchState::Assigned => write!(f, "Assigned"),
            SearchState::Cancelled => write!(f, "Cancelled"),
            SearchState::TimedOut => write!(f, "TimedOut"),
            SearchState::Failed => write!(f, "Failed"),
        }
    }
}
