//! Log Forwarder - batches stdin lines and ships them to a destination
//!
//! Every line read from standard input becomes one log unit. Units are
//! batched into buffers of at most `LOG_FORWARDER_CAPACITY` bytes, sealed
//! at least every `LOG_FORWARDER_PERIOD_SECS`, and delivered in order to the
//! configured destination.
//!
//! ## Configuration
//!
//! See [`log_forwarder::config::Config`] for the full list of
//! `LOG_FORWARDER_*` variables. `RUST_LOG` sets the logging filter
//! (default: info). Logs go to stderr so they never mix with the stdout
//! destination.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use log_forwarder::batch::{BatchSender, Batcher};
use log_forwarder::config::{Config, DestinationKind};
use log_forwarder::diagnostics::{default_diagnostics, SharedDiagnostics};
use log_forwarder::forward::{forward, Destination};
use log_forwarder::metadata::{Ec2Client, Ec2Config, LogEvent};

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting log forwarder...");

    let mut config = match Config::from_env() {
        Ok(config) => {
            info!(
                destination = ?config.destination,
                capacity = config.capacity,
                period_secs = config.period.as_secs(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let diagnostics = default_diagnostics();

    if config.destination == DestinationKind::Http && config.metadata.is_none() {
        config.metadata = metadata_override(&config, diagnostics.clone()).await;
    }

    let destination = match Destination::from_config(&config, diagnostics.clone()) {
        Ok(destination) => {
            info!(destination = destination.name(), "Forwarder initialized");
            destination
        }
        Err(e) => {
            error!(error = %e, "Failed to create forwarder");
            std::process::exit(1);
        }
    };

    let (sender, batcher) = Batcher::spawn(config.batch_config().with_diagnostics(diagnostics));
    let (buffers, batch_handle) = batcher.into_parts();

    // Reader task owns the only sender; when it ends the batcher drains
    let reader = tokio::spawn(read_lines(sender));
    let reader_abort = reader.abort_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, draining...");
                reader_abort.abort();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
    });

    let delivered = forward(buffers, &destination).await;

    match batch_handle.await {
        Ok(stats) => {
            info!(
                buffers = delivered,
                units_received = stats.units_received,
                units_dropped = stats.units_dropped,
                "Log forwarder stopped"
            );
        }
        Err(e) => {
            warn!(error = %e, "Batcher task panicked during shutdown");
        }
    }

    // A blocking stdin read would otherwise hold up runtime shutdown
    std::process::exit(0);
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Send every stdin line to the batcher until EOF or the batcher closes.
async fn read_lines(sender: BatchSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    let mut lines_read: u64 = 0;

    loop {
        match lines.next_segment().await {
            Ok(Some(line)) => {
                if sender.send(line).await.is_err() {
                    warn!("Batcher closed, reader stopping");
                    break;
                }
                lines_read += 1;
            }
            Ok(None) => {
                info!(lines_read = lines_read, "Reached end of input");
                break;
            }
            Err(e) => {
                error!(error = %e, "Failed to read from stdin");
                break;
            }
        }
    }
}

/// Build the metadata override header from the host context.
///
/// Returns `None` when there is no context to report.
async fn metadata_override(config: &Config, diagnostics: SharedDiagnostics) -> Option<String> {
    let mut event = LogEvent::new();

    if let Some(hostname) = &config.hostname {
        event = event.with_hostname(hostname.clone());
    }

    if config.ec2_metadata {
        let ec2_config = Ec2Config {
            diagnostics: Some(diagnostics),
            ..Ec2Config::default()
        };
        match Ec2Client::new(ec2_config) {
            Ok(client) => client.add_ec2_metadata(&mut event).await,
            Err(e) => warn!(error = %e, "Failed to create EC2 metadata client"),
        }
    }

    if event.context.is_none() {
        return None;
    }

    match event.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to serialize metadata");
            None
        }
    }
}
