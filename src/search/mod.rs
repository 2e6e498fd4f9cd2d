//! Search lifecycle
//!
//! A search moves through `Idle -> CreatingTicket -> Watching` and ends in
//! exactly one of `Assigned`, `TimedOut`, `Failed` or `Cancelled`.

pub mod client;
pub mod handle;
pub mod state;
pub mod watcher;

pub use client::{SearchOptions, TicketClient};
pub use handle::{SearchHandle, SearchOutcome};
pub use state::SearchSnapshot;
pub use watcher::{AssignmentWatcher, WatchEvent, WatchEvents, WatchOptions};
