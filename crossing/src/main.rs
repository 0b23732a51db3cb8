use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod identity;

use crossing_cse as cse;
use crossing_relay as relay;
use crossing_util as util;

use crate::cse::{
    Cse, CseConfig, Directory, HttpTransport, LinkEvent, ProvisionError, Session,
    start_session,
};
use crate::identity::load_identity;
use crate::relay::{RelayHandle, start_relay};
use crate::util::config::StoredConfig;
use crate::util::dirs::config_dir;
use crate::util::store::Store;

/// How long to wait for the lights to switch to red on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();

    // Create a new configuration store instance
    let config_store = Store::new(config_dir());
    let config = load_identity(&cli, &config_store).await?;

    let cse = Cse::new(HttpTransport::new(&config), config);
    if cli.deregister {
        deregister(cse).await?;
        // the next start registers from scratch
        config_store
            .delete("/", CseConfig::default_name())
            .await?;
        return Ok(());
    }

    start_controller(cse, cli.relay_path).await
}

/// Find whatever this device has on the CSE and delete it
#[instrument(skip_all, err)]
async fn deregister(cse: Cse<HttpTransport>) -> Result<(), ProvisionError> {
    let directory = Directory::new(cse);
    directory.discover_existing().await?;
    directory.deregister().await?;
    info!("device removed from the CSE");
    Ok(())
}

type RelayStream = (
    Box<dyn AsyncRead + Unpin + Send>,
    Box<dyn AsyncWrite + Unpin + Send>,
);

async fn open_relay(path: Option<PathBuf>) -> std::io::Result<RelayStream> {
    match path {
        Some(path) => {
            let device = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .await?;
            debug!("relaying through {}", path.display());
            let (reader, writer) = tokio::io::split(device);
            Ok((Box::new(reader), Box::new(writer)))
        }
        None => {
            debug!("relaying through stdin/stdout");
            Ok((Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout())))
        }
    }
}

#[instrument(name = "crossing", skip_all, err)]
async fn start_controller(
    cse: Cse<HttpTransport>,
    relay_path: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let (reader, writer) = open_relay(relay_path).await?;

    // Set-up channels for link status, local changes and rendering
    let (link_tx, link_rx) = mpsc::channel(8);
    let (local_tx, local_rx) = mpsc::channel(32);
    let (relay_handle, renders) = RelayHandle::channel();

    let session = Session::new(cse, relay_handle);
    let mut session_task = tokio::spawn(start_session(session, link_rx, local_rx));
    let mut relay_task = tokio::spawn(start_relay(reader, writer, renders, local_tx));

    // The process only starts once the network is up
    link_tx.send(LinkEvent::Established).await?;

    let mut relay_stopped = false;
    tokio::select! {
        res = &mut relay_task => {
            relay_stopped = true;
            if let Err(e) = res? {
                warn!("relay stopped: {e}");
            }
        }
        res = &mut session_task => {
            res?;
            return Ok(());
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutting down");
        }
    }

    // Show red before leaving
    if link_tx.send(LinkEvent::Lost).await.is_ok() {
        drop(link_tx);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut session_task).await.is_err() {
            warn!("session did not stop in time");
            session_task.abort();
        }
        if !relay_stopped && tokio::time::timeout(SHUTDOWN_GRACE, &mut relay_task).await.is_err() {
            relay_task.abort();
        }
    }

    Ok(())
}
