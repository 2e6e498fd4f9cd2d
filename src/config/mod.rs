//! Configuration management for the ticket client
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values.

pub mod client;

// Re-export commonly used types
pub use client::{
    validate_config, BackoffSettings, ClientConfig, FrontendSettings, SearchSettings,
    ServiceSettings, TransportSecurity,
};
