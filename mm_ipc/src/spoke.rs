//! Spoke side of the transport.
//!
//! Keeps one outbound connection to the hub. After every connect the client
//! sends its `welcome`, then forwards every decoded message to the
//! [`EventDispatcher`]. Any close or error schedules a single reconnection
//! after a fixed delay; only [`SpokeClient::close`] stops it.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::READ_BUFFER_SIZE;
use crate::codec;
use crate::codec::FrameBuffer;
use crate::config::SpokeConfig;
use crate::dispatcher::EventDispatcher;
use crate::errors::IpcError;
use crate::errors::Result;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

enum WriteCommand {
    Frame(Bytes),
    /// Half-close the socket and report when the shutdown completed
    Shutdown(oneshot::Sender<std::io::Result<()>>),
}

struct Connection {
    generation: u64,
    outbound: UnboundedSender<WriteCommand>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Inner {
    state: ConnectionState,
    connection: Option<Connection>,
    reconnect_timer: Option<JoinHandle<()>>,
    // Bumped per connection so a stale reader cannot tear down its successor
    generation: u64,
}

struct Shared {
    config: SpokeConfig,
    dispatcher: Arc<EventDispatcher>,
    inner: Mutex<Inner>,
    connect_attempts: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

/// Cheap to clone; clones share the same connection
#[derive(Clone)]
pub struct SpokeClient {
    shared: Arc<Shared>,
}

impl SpokeClient {
    /// Creates a disconnected client; call [`SpokeClient::connect`] to start
    pub fn new(config: SpokeConfig, dispatcher: Arc<EventDispatcher>) -> Self {
        let inner = Inner { state: ConnectionState::Disconnected, connection: None, reconnect_timer: None, generation: 0 };
        Self {
            shared: Arc::new(Shared {
                config,
                dispatcher,
                inner: Mutex::new(inner),
                connect_attempts: AtomicU64::new(0),
                reconnects_scheduled: AtomicU64::new(0),
            }),
        }
    }

    /// Opens the connection to the hub and sends the handshake.
    ///
    /// A no-op while connected or connecting. On failure a reconnection is
    /// scheduled before the error is returned.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => {
                    warn!("Already connected to hub, ignoring connect");
                    return Ok(());
                }
                ConnectionState::Closing | ConnectionState::Closed => {
                    warn!("Spoke client is closed, ignoring connect");
                    return Err(IpcError::Closed);
                }
                ConnectionState::Disconnected => inner.state = ConnectionState::Connecting,
            }
        }

        self.shared.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let path = &self.shared.config.socket_path;

        match UnixStream::connect(path).await {
            Ok(stream) => self.on_connected(stream),
            Err(source) => {
                warn!("Failed to connect to hub at {}: {source}", path.display());
                {
                    let mut inner = self.shared.inner.lock();
                    if inner.state == ConnectionState::Connecting {
                        inner.state = ConnectionState::Disconnected;
                    }
                }
                self.schedule_reconnect();
                Err(IpcError::ConnectFailed { path: path.clone(), source })
            }
        }
    }

    fn on_connected(&self, stream: UnixStream) -> Result<()> {
        let config = &self.shared.config;
        let welcome = codec::encode(&Message::welcome(&config.markets, &config.indexes))?;
        let (read_half, write_half) = stream.into_split();

        let mut inner = self.shared.inner.lock();
        if inner.state != ConnectionState::Connecting {
            debug!("Client closed while connecting, dropping new connection");
            return Err(IpcError::Closed);
        }

        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }

        inner.generation += 1;
        let generation = inner.generation;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Queued first so the hub sees the handshake before anything else
        let _ = outbound_tx.send(WriteCommand::Frame(welcome));

        let writer = tokio::spawn(self.clone().write_loop(write_half, outbound_rx, generation));
        let reader = tokio::spawn(self.clone().read_loop(read_half, generation));

        inner.connection = Some(Connection { generation, outbound: outbound_tx, reader, writer });
        inner.state = ConnectionState::Connected;

        info!("Connected to hub at {} (markets={:?} indexes={:?})", config.socket_path.display(), config.markets, config.indexes);
        Ok(())
    }

    async fn read_loop(self, mut reader: OwnedReadHalf, generation: u64) {
        let mut frames = FrameBuffer::with_max_frame_len(self.shared.config.max_frame_len);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("Hub closed the connection");
                    break;
                }
                Ok(n) => {
                    for message in frames.feed(&buf[..n]) {
                        self.shared.dispatcher.dispatch(&message);
                    }
                }
                Err(err) => {
                    warn!("Read error from hub: {err}");
                    break;
                }
            }
        }

        self.handle_disconnect(generation);
    }

    async fn write_loop(self, mut writer: OwnedWriteHalf, mut commands: UnboundedReceiver<WriteCommand>, generation: u64) {
        while let Some(command) = commands.recv().await {
            match command {
                WriteCommand::Frame(frame) => {
                    if let Err(err) = writer.write_all(&frame).await {
                        warn!("Write error to hub: {err}");
                        break;
                    }
                }
                WriteCommand::Shutdown(ack) => {
                    let _ = ack.send(writer.shutdown().await);
                    return;
                }
            }
        }

        self.handle_disconnect(generation);
    }

    /// Tears down the connection of `generation` and schedules a reconnect.
    ///
    /// Called by whichever of the reader or writer fails first. Ignored when a
    /// newer connection has already replaced it.
    fn handle_disconnect(&self, generation: u64) {
        {
            let mut inner = self.shared.inner.lock();
            let current = inner.connection.as_ref().is_some_and(|connection| connection.generation == generation);
            if !current {
                return;
            }

            // Both halves go so the socket is released before reconnecting
            if let Some(connection) = inner.connection.take() {
                connection.reader.abort();
                connection.writer.abort();
            }

            match inner.state {
                ConnectionState::Closing | ConnectionState::Closed => return,
                _ => inner.state = ConnectionState::Disconnected,
            }
        }

        self.schedule_reconnect();
    }

    /// Arms the reconnection timer unless one is already pending
    fn schedule_reconnect(&self) {
        let mut inner = self.shared.inner.lock();
        if matches!(inner.state, ConnectionState::Closing | ConnectionState::Closed) {
            return;
        }
        if inner.reconnect_timer.as_ref().is_some_and(|timer| !timer.is_finished()) {
            debug!("Reconnect already pending");
            return;
        }

        let delay = self.shared.config.reconnect_delay();
        self.shared.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
        info!("Reconnecting to hub in {delay:?}");

        let client = self.clone();
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.shared.inner.lock().reconnect_timer = None;
            if let Err(err) = client.connect().await {
                debug!("Reconnect attempt failed: {err}");
            }
        }));
    }

    /// Queues a message for the hub
    pub fn send(&self, message: &Message) -> Result<()> {
        let frame = codec::encode(message)?;
        let inner = self.shared.inner.lock();
        let connection = inner.connection.as_ref().ok_or(IpcError::NotConnected)?;
        connection.outbound.send(WriteCommand::Frame(frame)).map_err(|_| IpcError::NotConnected)
    }

    /// Ends the connection gracefully and stops reconnecting for good.
    ///
    /// Waits until the socket's write side has been shut down.
    pub async fn close(&self) -> Result<()> {
        let connection = {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Closed {
                return Ok(());
            }
            inner.state = ConnectionState::Closing;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            inner.connection.take()
        };

        let mut result = Ok(());
        if let Some(connection) = connection {
            let (ack_tx, ack_rx) = oneshot::channel();
            if connection.outbound.send(WriteCommand::Shutdown(ack_tx)).is_ok() {
                match ack_rx.await {
                    Ok(Ok(())) => debug!("Hub connection ended"),
                    Ok(Err(err)) => result = Err(IpcError::Io(err)),
                    Err(_) => debug!("Writer exited before shutdown"),
                }
            }
            connection.reader.abort();
            connection.writer.abort();
        }

        self.shared.inner.lock().state = ConnectionState::Closed;
        info!("Spoke client closed");
        result
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// True while a connection to the hub is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while a reconnection timer is armed and has not fired
    pub fn has_pending_reconnect(&self) -> bool {
        self.shared.inner.lock().reconnect_timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    /// Connection attempts made so far, manual and timer driven
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }

    /// Reconnection timers armed so far
    pub fn reconnects_scheduled(&self) -> u64 {
        self.shared.reconnects_scheduled.load(Ordering::Relaxed)
    }

    /// Config the client was built with
    pub fn config(&self) -> &SpokeConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for SpokeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpokeClient")
            .field("socket_path", &self.shared.config.socket_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
