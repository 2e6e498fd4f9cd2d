//! Command-line entry point for the match-ticket client
//!
//! Creates one ticket against the configured Open Match frontend, waits for
//! an assignment and prints the outcome as JSON. Ctrl+C cancels the search
//! and deletes the ticket.

use anyhow::{anyhow, Result};
use clap::Parser;
use match_ticket::config::{validate_config, ClientConfig, TransportSecurity};
use match_ticket::{SearchCriteria, SearchOutcome, SearchState, TicketClient};
use serde_json::json;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Match Ticket - Open Match frontend client
#[derive(Parser)]
#[command(
    name = "match-ticket",
    version,
    about = "Create an Open Match ticket and wait for its assignment",
    long_about = "match-ticket creates a matchmaking ticket on an Open Match frontend, watches \
                 the assignment stream with reconnects and exponential backoff, and prints the \
                 resulting game server connection as JSON."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Frontend address override
    #[arg(long, value_name = "HOST:PORT", help = "Override Open Match frontend address")]
    frontend: Option<String>,

    /// Use TLS with the default root store
    #[arg(long, help = "Connect to the frontend over TLS")]
    tls: bool,

    /// Search deadline override
    #[arg(long, value_name = "SECONDS", help = "Override search deadline (0 = none)")]
    deadline: Option<u64>,

    /// Retry cap override
    #[arg(
        long,
        value_name = "COUNT",
        help = "Override retry and reconnect cap (0 = unbounded)"
    )]
    max_retries: Option<u32>,

    /// Tags to match on
    #[arg(long = "tag", value_name = "TAG")]
    tags: Vec<String>,

    /// Numeric attributes as key=value
    #[arg(long = "number", value_name = "KEY=VALUE")]
    numbers: Vec<String>,

    /// Text attributes as key=value
    #[arg(long = "text", value_name = "KEY=VALUE")]
    texts: Vec<String>,

    /// Region used when no criteria are given
    #[arg(long, default_value = "us-central1")]
    region: String,

    /// Print Prometheus metrics after the search
    #[arg(long, help = "Print collected metrics after the search ends")]
    print_metrics: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(long, help = "Validate configuration and exit without creating a ticket")]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

fn split_pair<'a>(raw: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim(), value.trim()))
        .ok_or_else(|| anyhow!("--{} expects key=value, got {}", flag, raw))
}

/// Build search criteria from CLI flags
fn build_criteria(args: &Args) -> Result<SearchCriteria> {
    if args.tags.is_empty() && args.numbers.is_empty() && args.texts.is_empty() {
        return Ok(SearchCriteria::new()
            .tag("mode.session")
            .text("region", args.region.clone()));
    }

    let mut criteria = SearchCriteria::new();
    for tag in &args.tags {
        criteria = criteria.tag(tag.clone());
    }
    for raw in &args.numbers {
        let (key, value) = split_pair(raw, "number")?;
        let value: f64 = value
            .parse()
            .map_err(|_| anyhow!("Invalid number for {}: {}", key, value))?;
        criteria = criteria.number(key, value);
    }
    for raw in &args.texts {
        let (key, value) = split_pair(raw, "text")?;
        criteria = criteria.text(key, value);
    }

    criteria.validate()?;
    Ok(criteria)
}

/// Display startup banner with client information
fn display_startup_banner(config: &ClientConfig, criteria: &SearchCriteria) {
    info!("Match Ticket client v{}", match_ticket::VERSION);
    info!("   Frontend: {}", config.frontend.address);
    info!(
        "   Security: {}",
        match config.frontend.security {
            TransportSecurity::Plaintext => "plaintext",
            TransportSecurity::Tls { .. } => "tls",
        }
    );
    info!("   Deadline: {}s", config.search.deadline_seconds);
    info!("   Retry cap: {}", config.search.max_reconnect_attempts);
    info!("   Tags: {:?}", criteria.tags);
}

/// Load and merge configuration from environment, file and CLI arguments
fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = if let Some(config_path) = &args.config {
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(frontend) = &args.frontend {
        config.frontend.address = frontend.clone();
    }

    if args.tls && config.frontend.security == TransportSecurity::Plaintext {
        config.frontend.security = TransportSecurity::Tls {
            ca_certificate: None,
            domain_name: None,
        };
    }

    if let Some(deadline) = args.deadline {
        config.search.deadline_seconds = deadline;
    }

    if let Some(max_retries) = args.max_retries {
        config.search.max_reconnect_attempts = max_retries;
    }

    validate_config(&config)?;
    Ok(config)
}

fn outcome_json(outcome: &SearchOutcome, ticket_id: Option<String>) -> serde_json::Value {
    match outcome {
        SearchOutcome::Matched(assignment) => json!({
            "status": SearchState::Assigned.as_str(),
            "ticket_id": ticket_id,
            "connection": assignment.connection,
            "host": assignment.host(),
            "port": assignment.port(),
        }),
        SearchOutcome::TimedOut => json!({
            "status": SearchState::TimedOut.as_str(),
            "ticket_id": ticket_id,
        }),
        SearchOutcome::Cancelled => json!({
            "status": SearchState::Cancelled.as_str(),
            "ticket_id": ticket_id,
        }),
        SearchOutcome::Failed(e) => json!({
            "status": SearchState::Failed.as_str(),
            "ticket_id": ticket_id,
            "error": e.to_string(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let criteria = build_criteria(&args).unwrap_or_else(|e| {
        error!("Invalid search criteria: {}", e);
        std::process::exit(2);
    });

    display_startup_banner(&config, &criteria);

    if args.dry_run {
        info!("Dry run completed - configuration is valid");
        return Ok(());
    }

    let client = TicketClient::from_config(&config)?;
    let mut handle = client.find_match(criteria)?;
    info!(search_id = %handle.id(), "Waiting for assignment (Ctrl+C to cancel)");

    let finished = tokio::select! {
        outcome = handle.outcome() => Some(outcome),
        _ = signal::ctrl_c() => None,
    };

    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            warn!("Received Ctrl+C, cancelling search");
            client.cancel_search(&handle);
            handle.outcome().await
        }
    };

    // Ticket deletes run in the background; give them one call timeout.
    let cleanup_window = client.connection().call_timeout();
    if tokio::time::timeout(cleanup_window, client.shutdown())
        .await
        .is_err()
    {
        warn!("Ticket cleanup did not finish within {:?}", cleanup_window);
    }

    let ticket_id = handle.ticket_id();
    println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome, ticket_id))?);

    if args.print_metrics {
        print!("{}", client.metrics().render()?);
    }

    if outcome.is_matched() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
