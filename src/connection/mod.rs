//! Connection layer for the matchmaking frontend

pub mod manager;

pub use manager::ConnectionManager;
