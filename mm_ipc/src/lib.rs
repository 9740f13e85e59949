//! Local hub/spoke transport for the market-data pipeline.
//!
//! A hub binds a Unix socket; spokes connect, announce the markets and indexes
//! they own with a `welcome` message, then exchange `#`-delimited JSON frames.
//! Decoded messages are handed to an [`EventDispatcher`] keyed by their `op`.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod hub;
pub mod message;
pub mod node;
pub mod registry;
pub mod spoke;

pub use codec::FrameBuffer;
pub use config::HubConfig;
pub use config::RoleConfig;
pub use config::SpokeConfig;
pub use dispatcher::EventDispatcher;
pub use errors::IpcError;
pub use errors::Result;
pub use hub::Hub;
pub use message::Message;
pub use message::Welcome;
pub use node::Node;
pub use registry::MembershipRegistry;
pub use registry::SpokeRecord;
pub use spoke::ConnectionState;
pub use spoke::SpokeClient;

/// Default socket path shared by hub and spokes
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mm_ipc.sock";

/// Default fixed delay between reconnection attempts in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Size of the per-connection socket read buffer
pub const READ_BUFFER_SIZE: usize = 64 * 1024;
