//! replay-bench: replay a recorded byte stream against a framed-protocol server
//!
//! Each iteration opens one connection, streams the source file to the server
//! as protocol frames and decodes whatever the server sends back. The protocol
//! has no end-of-response marker, so a session ends once the server has been
//! quiet for the idle timeout.
//!
//! Features:
//! - Batched iterations with a hard cap on simultaneous connections
//! - Send/receive byte counts and durations, summed over all iterations
//! - Optional dump of every frame, with SHA-256 of received blobs
//! - Local discard server when no server address is given
//! - Configuration via CLI arguments or TOML file

mod address;
mod config;
mod debug;
mod error;
mod protocol;
mod scheduler;
mod server;
mod session;
mod stats;

use chrono::Local;
use human_repr::HumanCount;
use std::net::SocketAddr;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::ReplayError;
use server::DiscardServer;
use session::SessionPlayer;
use stats::{AggregateStats, Report};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(config).await {
        error!(error = %e, "Replay failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), ReplayError> {
    let source_len = config.validate_source()?;

    info!(
        file = %config.file.display(),
        size = %source_len.human_count_bytes(),
        server = config.server.as_deref().unwrap_or("<local discard>"),
        iterations = config.iterations,
        max_concurrency = config.max_concurrency,
        idle_timeout_ms = config.idle_timeout.as_millis() as u64,
        "Starting replay"
    );

    let started_at = Local::now();
    let stats = match config.server.as_deref() {
        Some(server) => {
            let address = address::resolve(server, config.default_port).await?;
            replay(&config, address).await?
        }
        None => {
            let server = DiscardServer::start().await.map_err(|e| {
                ReplayError::Config(format!("failed to start discard server: {e}"))
            })?;
            let (outcome, accepted) = replay_discarding(&config, server).await;
            debug!(accepted, "Discard server connections");
            outcome?
        }
    };

    if config.verbose {
        let report = Report {
            started_at,
            iterations: config.iterations,
            max_concurrency: config.max_concurrency,
            stats,
        };
        println!("{report}");
    } else {
        println!(
            "{} {} {} {}",
            stats.bytes_sent, stats.bytes_received, stats.send_duration_ms, stats.receive_duration_ms
        );
    }

    Ok(())
}

/// Run every iteration against `address` and fold the results.
async fn replay(config: &Config, address: SocketAddr) -> Result<AggregateStats, ReplayError> {
    let player = SessionPlayer::new(&config.file, address, config.session_options());
    let verbose = config.verbose;

    scheduler::run(config.iterations, config.max_concurrency, |iteration| {
        let player = &player;
        async move {
            let result = player.play().await?;
            if verbose {
                println!(
                    "#{iteration}: sent {} in {} ms, received {} in {} ms",
                    result.bytes_sent.human_count_bytes(),
                    result.send_duration_ms,
                    result.bytes_received.human_count_bytes(),
                    result.receive_duration_ms
                );
            }
            Ok::<_, ReplayError>(result)
        }
    })
    .await
}

/// Replay against a local discard server, stopping it whatever the outcome.
/// Also returns how many connections the server accepted.
async fn replay_discarding(
    config: &Config,
    server: DiscardServer,
) -> (Result<AggregateStats, ReplayError>, u64) {
    let outcome = replay(config, server.connect_addr()).await;
    let accepted = server.connections_accepted();
    server.stop().await;
    (outcome, accepted)
}
