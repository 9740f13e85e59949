//! Hub side of the transport.
//!
//! Binds a Unix socket, accepts spokes, registers each one when its `welcome`
//! arrives and forwards every other message to the [`EventDispatcher`].
//! Messages sent before the handshake are forwarded too; registration only
//! affects routing.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rapidhash::RapidHashMap;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::READ_BUFFER_SIZE;
use crate::codec::FrameBuffer;
use crate::config::HubConfig;
use crate::dispatcher::EventDispatcher;
use crate::errors::IpcError;
use crate::errors::Result;
use crate::message::Message;
use crate::message::Welcome;
use crate::registry::ConnectionId;
use crate::registry::MembershipRegistry;
use crate::registry::SpokeRecord;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

struct ConnectionTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct HubShared {
    registry: Mutex<MembershipRegistry>,
    connections: Mutex<RapidHashMap<ConnectionId, ConnectionTasks>>,
    dispatcher: Arc<EventDispatcher>,
    next_connection_id: AtomicU64,
    max_frame_len: usize,
}

/// Listening hub. Dropping it stops every task; [`Hub::shutdown`] also removes the socket file.
pub struct Hub {
    socket_path: PathBuf,
    shared: Arc<HubShared>,
    accept_handle: JoinHandle<()>,
}

impl Hub {
    /// Binds the socket and starts accepting spokes. Must run inside a tokio runtime.
    ///
    /// A leftover socket file from an unclean shutdown is removed first. Failure
    /// to bind is returned; the hub is unusable without its socket.
    pub fn bind(config: HubConfig, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        let socket_path = config.socket_path;
        remove_stale_socket(&socket_path);

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                UnixListener::from_std(listener)
            })
            .map_err(|source| IpcError::BindFailed { path: socket_path.clone(), source })?;

        info!("Hub listening on {}", socket_path.display());

        let shared = Arc::new(HubShared {
            registry: Mutex::new(MembershipRegistry::new()),
            connections: Mutex::new(RapidHashMap::default()),
            dispatcher,
            next_connection_id: AtomicU64::new(1),
            max_frame_len: config.max_frame_len,
        });

        let accept_handle = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        Ok(Self { socket_path, shared, accept_handle })
    }

    /// Spoke owning the market (`BTC-USD`) or index (`BTCIDX`), first registered wins
    pub fn find_spoke_for(&self, identifier: &str) -> Option<SpokeRecord> {
        self.shared.registry.lock().find_spoke_for(identifier).cloned()
    }

    /// Sends a message to the spoke owning `identifier`
    pub fn send_to(&self, identifier: &str, message: &Message) -> Result<()> {
        let spoke = self.find_spoke_for(identifier).ok_or_else(|| IpcError::NoRoute(identifier.to_string()))?;
        spoke.send(message)
    }

    /// Sends a message to every registered spoke, returning how many accepted it
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        let spokes = self.spokes();
        let mut delivered = 0;
        for spoke in &spokes {
            match spoke.send(message) {
                Ok(()) => delivered += 1,
                Err(IpcError::NotConnected) => debug!("Spoke {} went away before broadcast", spoke.connection_id),
                Err(err) => return Err(err),
            }
        }
        Ok(delivered)
    }

    /// Snapshot of registered spokes in registry order
    pub fn spokes(&self) -> Vec<SpokeRecord> {
        self.shared.registry.lock().iter().cloned().collect()
    }

    /// Registered spokes, i.e. connections that completed the handshake
    pub fn spoke_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Open connections, registered or not
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Path the hub is listening on
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stops accepting, drops every connection and removes the socket file
    pub fn shutdown(self) {
        self.stop_tasks();

        let removed = std::mem::take(&mut *self.shared.registry.lock()).len();

        if let Err(err) = std::fs::remove_file(&self.socket_path) {
            warn!("Failed to remove socket {}: {err}", self.socket_path.display());
        }

        info!("Hub on {} shut down ({removed} spokes dropped)", self.socket_path.display());
    }

    fn stop_tasks(&self) {
        self.accept_handle.abort();

        let connections: Vec<ConnectionTasks> = self.shared.connections.lock().drain().map(|(_, tasks)| tasks).collect();
        for tasks in connections {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").field("socket_path", &self.socket_path).field("spokes", &self.spoke_count()).finish_non_exhaustive()
    }
}

/// Removes a socket file left behind by a previous hub. Errors mean "absent".
fn remove_stale_socket(path: &Path) {
    match std::fs::symlink_metadata(path) {
        Ok(_) => match std::fs::remove_file(path) {
            Ok(()) => info!("Removed stale socket {}", path.display()),
            Err(err) => warn!("Failed to remove stale socket {}: {err}", path.display()),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not inspect socket path {}: {err}", path.display()),
    }
}

async fn accept_loop(listener: UnixListener, shared: Arc<HubShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed);
                info!("Spoke connection {id} accepted");
                spawn_connection(&shared, id, stream);
            }
            Err(err) => {
                error!("Accept error: {err}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

fn spawn_connection(shared: &Arc<HubShared>, id: ConnectionId, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Bytes>();

    // Held while spawning so the reader cannot release before it is tracked
    let mut connections = shared.connections.lock();
    let writer = tokio::spawn(write_loop(Arc::clone(shared), id, write_half, outbound_rx));
    let reader = tokio::spawn(read_loop(Arc::clone(shared), id, read_half, outbound_tx));
    connections.insert(id, ConnectionTasks { reader, writer });
}

async fn read_loop(shared: Arc<HubShared>, id: ConnectionId, mut reader: OwnedReadHalf, outbound: UnboundedSender<Bytes>) {
    let mut frames = FrameBuffer::with_max_frame_len(shared.max_frame_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut registered = false;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("Spoke connection {id} closed by peer");
                break;
            }
            Ok(n) => {
                for message in frames.feed(&buf[..n]) {
                    shared.handle_message(id, message, &outbound, &mut registered);
                }
            }
            Err(err) => {
                warn!("Read error on spoke connection {id}: {err}");
                break;
            }
        }
    }

    shared.release(id);
}

async fn write_loop(shared: Arc<HubShared>, id: ConnectionId, mut writer: OwnedWriteHalf, mut outbound: UnboundedReceiver<Bytes>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = writer.write_all(&frame).await {
            warn!("Write error on spoke connection {id}: {err}");
            shared.release(id);
            return;
        }
    }
}

impl HubShared {
    fn handle_message(&self, id: ConnectionId, message: Message, outbound: &UnboundedSender<Bytes>, registered: &mut bool) {
        if !message.is_welcome() {
            self.dispatcher.dispatch(&message);
            return;
        }

        if *registered {
            warn!("Ignoring repeated welcome on spoke connection {id}");
            return;
        }

        match Welcome::from_message(&message) {
            Ok(welcome) => {
                info!("Spoke {id} registered: markets={:?} indexes={:?}", welcome.markets, welcome.indexes);
                self.registry.lock().add(SpokeRecord::new(id, welcome, outbound.clone()));
                *registered = true;
            }
            Err(err) => warn!("Invalid welcome on spoke connection {id}: {err}"),
        }
    }

    /// Drops the spoke record and both tasks of a connection, whichever side failed
    fn release(&self, id: ConnectionId) {
        if self.registry.lock().remove(id).is_some() {
            info!("Spoke {id} deregistered");
        }
        if let Some(tasks) = self.connections.lock().remove(&id) {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}
