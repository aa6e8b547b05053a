use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colibri_ws::model::message::EndpointMessage;
use colibri_ws::util::init_log;
use colibri_ws::{ChannelObserver, ClientConfig, ColibriChannelClient};
use parking_lot::Mutex;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "colibri-ws")]
#[command(version)]
#[command(about = "Colibri signaling-channel client", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a channel to the bridge and log its events until it closes
    Connect {
        /// Colibri WebSocket URL handed out by the bridge
        #[arg(long, env = "COLIBRI_WS_URL")]
        url: String,

        /// Endpoint id of this participant
        #[arg(long, env = "COLIBRI_ENDPOINT_ID")]
        endpoint_id: String,

        /// Seconds to wait for the WebSocket to open
        #[arg(long, default_value = "10")]
        connect_timeout_secs: u64,

        /// Verbose logging
        #[arg(short, long, action)]
        verbose: bool,
    },
}

/// Logs every channel event and signals `main` once the channel closes.
struct LoggingObserver {
    closed: Mutex<Option<mpsc::Sender<(u16, String)>>>,
}

impl ChannelObserver for LoggingObserver {
    fn on_connected(&self) {
        info!("Channel ready");
    }

    fn on_disconnected(&self, code: u16, reason: &str) {
        if let Some(closed) = self.closed.lock().take() {
            let _ = closed.send((code, reason.to_string()));
        }
    }

    fn on_endpoint_message(&self, message: &EndpointMessage) {
        info!(
            "Endpoint message from {}: {}",
            message.from.as_deref().unwrap_or("<bridge>"),
            serde_json::Value::Object(message.payload.clone())
        );
    }

    fn on_dominant_speaker_changed(&self, endpoint: &str) {
        info!("Dominant speaker: {}", endpoint);
    }

    fn on_connectivity_status_changed(&self, endpoint: &str, active: bool) {
        info!("Endpoint {} active: {}", endpoint, active);
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Command::Connect {
            url,
            endpoint_id,
            connect_timeout_secs,
            verbose,
        } => {
            init_log(if verbose { "debug" } else { "info" });
            let config = ClientConfig::new(url, endpoint_id)
                .with_connect_timeout(Duration::from_secs(connect_timeout_secs));
            run(config)
        }
    }
}

fn run(config: ClientConfig) -> Result<ExitCode> {
    let (closed_tx, closed_rx) = mpsc::channel();
    let observer = Arc::new(LoggingObserver {
        closed: Mutex::new(Some(closed_tx)),
    });

    let client = ColibriChannelClient::new(config);
    client.add_observer(&observer);

    if !client.connect() {
        return Ok(ExitCode::FAILURE);
    }

    let (code, reason) = closed_rx
        .recv()
        .context("observer dropped before the channel closed")?;
    info!("Channel closed ({} - {}), exiting", code, reason);

    client.disconnect();
    Ok(ExitCode::SUCCESS)
}
