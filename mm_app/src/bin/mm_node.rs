use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mm_app::cli;
use mm_app::config_loader;
use mm_app::ipc_config;
use mm_app::shutdown_handler;
use mm_app::time_utils;
use mm_ipc::EventDispatcher;
use mm_ipc::IpcError;
use mm_ipc::Message;
use mm_ipc::Node;
use mm_ipc::SpokeClient;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Hub side collaborator: log spoke heartbeats with their transit delay
fn register_heartbeat_logger(dispatcher: &EventDispatcher) {
    dispatcher.register(ipc_config::HEARTBEAT_OP, |data| {
        let ts = data["ts"].as_u64().ok_or_else(|| anyhow::anyhow!("heartbeat without ts"))?;
        let seq = data["seq"].as_u64().unwrap_or_default();
        debug!("Heartbeat seq={seq} delay={}ms", time_utils::elapsed_since_ms(ts));
        Ok(())
    });
}

/// Spoke side: send a heartbeat every interval until shutdown
fn spawn_heartbeats(client: SpokeClient, running: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(ipc_config::HEARTBEAT_INTERVAL_MS));
        let mut sequence = 0u64;

        while running.load(Ordering::Relaxed) {
            interval.tick().await;

            let message = match Message::new(ipc_config::HEARTBEAT_OP, json!({"ts": time_utils::unix_timestamp_ms(), "seq": sequence})) {
                Ok(message) => message,
                Err(err) => {
                    warn!("Failed to build heartbeat: {err}");
                    break;
                }
            };

            match client.send(&message) {
                Ok(()) => sequence = sequence.wrapping_add(1),
                Err(IpcError::NotConnected) => debug!("Hub not connected, skipping heartbeat"),
                Err(err) => warn!("Failed to send heartbeat: {err}"),
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // CRITICAL: Keep guard alive for entire application lifetime
    let _guard = mm_app::tracing_setup::init("mm_node", ipc_config::LOG_DIR, tracing::Level::INFO, true);

    let config_path = cli::get_config_path(ipc_config::DEFAULT_CONFIG_PATH);
    let role_config = config_loader::load_role_config_or_default(&config_path);
    info!("Starting node with socket {}", role_config.socket_path().display());

    let dispatcher = Arc::new(EventDispatcher::new());
    register_heartbeat_logger(&dispatcher);

    let node = Node::start(role_config, Arc::clone(&dispatcher)).await?;
    info!("Node running as {}", node.role());

    let running = Arc::new(AtomicBool::new(true));
    shutdown_handler::setup(Arc::clone(&running))?;

    let heartbeat_handle = node.as_spoke().map(|client| spawn_heartbeats(client.clone(), Arc::clone(&running)));

    shutdown_handler::wait(&running, Duration::from_millis(ipc_config::SHUTDOWN_POLL_INTERVAL_MS)).await;

    if let Some(handle) = heartbeat_handle {
        handle.abort();
    }
    node.shutdown().await?;

    info!("Shutdown complete");
    Ok(())
}
