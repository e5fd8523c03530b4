// # ddns-relayd - DDNS Relay Daemon
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add coordination, DNS or retry logic here
// - All relay logic MUST be in ddns-relay-core
// - Configuration is via environment variables ONLY
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the store, provider and notifier
// 4. Running the update front door, the queue dispatcher and the lock watchdog
// 5. Shutting all of them down on SIGINT/SIGTERM
//
// ## Configuration
//
// - `DDNS_RELAY_CONFIG`: Path to the JSON relay configuration
// - `DDNS_RELAY_CONFIG_JSON`: Inline JSON configuration (if no path is given)
// - `DDNS_RELAY_CLOUDFLARE_TOKEN`: Overrides `provider.api_token`
// - `DDNS_RELAY_STORE_PATH`: Overrides the store with a file store at this path
// - `DDNS_RELAY_WEBHOOK_URL`: Overrides the notifier with a webhook
// - `DDNS_RELAY_DISCORD_ID` and `DDNS_RELAY_DISCORD_TOKEN`: Overrides the notifier
//   with a Discord webhook
// - `DDNS_RELAY_LISTEN`: Listen address (default `0.0.0.0:8080`)
// - `DDNS_RELAY_LOG_LEVEL`: trace, debug, info, warn or error (default `info`)
// - `DDNS_MODE=dry-run`: Look records up but never write them
//
// ## Example
//
// ```bash
// export DDNS_RELAY_CONFIG=/etc/ddns-relay/config.json
// export DDNS_RELAY_CLOUDFLARE_TOKEN=your_token
// export DDNS_RELAY_STORE_PATH=/var/lib/ddns-relay/store.json
//
// ddns-relayd
// ```

mod config;
mod listener;

use anyhow::Result;
use config::DaemonConfig;
use ddns_relay_cloudflare::CloudflareProvider;
use ddns_relay_core::traits::{DurableStore, LogNotifier, Notifier};
use ddns_relay_core::{
    DispatcherEvent, FileStore, FrontDoor, LockWatchdog, MemoryStore, NotifierConfig,
    QueueDispatcher, StoreConfig, UpdateCoordinator,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// How long in-flight drains may take to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum RelayExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<RelayExitCode> for ExitCode {
    fn from(code: RelayExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match DaemonConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return RelayExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return RelayExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return RelayExitCode::ConfigError.into();
    }

    info!("Starting ddns-relayd");
    info!(
        "Configuration loaded: {} name(s), provider {:?}",
        config.relay.names.len(),
        config.relay.provider
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return RelayExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            RelayExitCode::RuntimeError
        } else {
            RelayExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon until a shutdown signal
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let relay = config.relay;

    let store: Arc<dyn DurableStore> = match &relay.store {
        StoreConfig::Memory => {
            warn!("Using the in-memory store: pending updates are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::File { path } => {
            info!("Using file store at {}", path);
            Arc::new(FileStore::new(path).await?)
        }
    };

    let provider = Arc::new(CloudflareProvider::new(&relay.provider)?);
    let notifier = build_notifier(&relay.notifier)?;

    let coordinator = Arc::new(UpdateCoordinator::new(
        store.clone(),
        provider,
        notifier.clone(),
        &relay.coordinator,
    ));
    let front_door = Arc::new(FrontDoor::new(
        relay.names.clone(),
        coordinator.pending().clone(),
    ));
    let (dispatcher, events) =
        QueueDispatcher::new(store.clone(), coordinator.clone(), &relay.coordinator);
    let watchdog = LockWatchdog::new(
        coordinator.lock().clone(),
        notifier,
        relay.coordinator.lock_alert_after(),
        relay.coordinator.watchdog_interval(),
    );

    let tcp = tokio::net::TcpListener::bind(config.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let event_log = tokio::spawn(log_events(events));
    let server = tokio::spawn(listener::serve(tcp, front_door, shutdown_rx.clone()));
    let watchdog_task = {
        let shutdown = stopped(shutdown_rx.clone());
        tokio::spawn(async move { watchdog.run_with_shutdown(shutdown).await })
    };
    let mut dispatcher_task = {
        let shutdown = stopped(shutdown_rx);
        tokio::spawn(async move { dispatcher.run_with_shutdown(shutdown).await })
    };

    info!("Relay ready");

    let signal = tokio::select! {
        signal = wait_for_shutdown() => signal?,
        // The dispatcher only returns early on a fatal store error
        finished = &mut dispatcher_task => {
            let _ = shutdown_tx.send(true);
            finished??;
            anyhow::bail!("Queue dispatcher stopped unexpectedly");
        }
    };
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down, waiting for in-flight drains");

    let _ = shutdown_tx.send(true);
    let _ = server.await;
    let _ = watchdog_task.await;

    match tokio::time::timeout(SHUTDOWN_GRACE, dispatcher_task).await {
        Ok(joined) => joined??,
        Err(_) => anyhow::bail!(
            "In-flight drains did not finish within {:?}; unacknowledged requests will be redelivered",
            SHUTDOWN_GRACE
        ),
    }

    let _ = event_log.await;
    info!("Shutdown complete");
    Ok(())
}

fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config {
        NotifierConfig::Log => Ok(Arc::new(LogNotifier)),
        #[cfg(feature = "webhook")]
        NotifierConfig::Webhook { url } => {
            info!("Posting drain summaries to a webhook");
            Ok(Arc::new(ddns_relay_webhook::WebhookNotifier::new(
                url.clone(),
            )?))
        }
        #[cfg(feature = "webhook")]
        NotifierConfig::Discord { id, token } => {
            info!("Posting drain summaries to Discord webhook {}", id);
            Ok(Arc::new(ddns_relay_webhook::WebhookNotifier::discord(
                id, token,
            )?))
        }
        #[cfg(not(feature = "webhook"))]
        NotifierConfig::Webhook { .. } | NotifierConfig::Discord { .. } => {
            anyhow::bail!(
                "Webhook notifier configured but ddns-relayd was built without the webhook feature"
            )
        }
    }
}

/// Resolves once the shutdown flag is set (or its sender is gone)
async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Log dispatcher events until the dispatcher drops its sender
async fn log_events(mut events: mpsc::Receiver<DispatcherEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatcherEvent::Drained {
                id,
                settled,
                retry,
                continuation,
            } => info!(
                "Drain {} finished: {} settled, {} to retry, {:?}",
                id, settled, retry, continuation
            ),
            DispatcherEvent::Failed {
                id,
                deliveries,
                error,
            } => warn!(
                "Drain {} failed on delivery {}: {}",
                id, deliveries, error
            ),
            DispatcherEvent::Abandoned {
                id,
                deliveries,
                error,
            } => error!(
                "Drain {} abandoned after {} deliveries: {}",
                id, deliveries, error
            ),
            other => debug!("Dispatcher event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
