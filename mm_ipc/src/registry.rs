use std::collections::BTreeSet;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::codec;
use crate::errors::IpcError;
use crate::errors::Result;
use crate::message::Message;
use crate::message::Welcome;

/// Separator between base and quote in a market identifier (`BTC-USD`).
/// Identifiers without it are index names.
pub const MARKET_SEPARATOR: char = '-';

/// Hub-assigned identity of an accepted connection
pub type ConnectionId = u64;

/// A spoke that completed its handshake, with what it owns
#[derive(Debug, Clone)]
pub struct SpokeRecord {
    pub connection_id: ConnectionId,
    pub markets: BTreeSet<String>,
    pub indexes: BTreeSet<String>,
    outbound: UnboundedSender<Bytes>,
}

impl SpokeRecord {
    pub fn new(connection_id: ConnectionId, welcome: Welcome, outbound: UnboundedSender<Bytes>) -> Self {
        Self {
            connection_id,
            markets: welcome.markets.into_iter().collect(),
            indexes: welcome.indexes.into_iter().collect(),
            outbound,
        }
    }

    /// Whether this spoke owns the market or index named by `identifier`
    pub fn owns(&self, identifier: &str) -> bool {
        if identifier.contains(MARKET_SEPARATOR) { self.markets.contains(identifier) } else { self.indexes.contains(identifier) }
    }

    /// Queues a message for this spoke's connection
    pub fn send(&self, message: &Message) -> Result<()> {
        let frame = codec::encode(message)?;
        self.outbound.send(frame).map_err(|_| IpcError::NotConnected)
    }
}

/// Connected spokes in handshake-completion order
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    spokes: Vec<SpokeRecord>,
}

impl MembershipRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a spoke that just completed its handshake
    pub fn add(&mut self, record: SpokeRecord) {
        self.spokes.push(record);
    }

    /// Removes the record for a connection, if it registered
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<SpokeRecord> {
        let position = self.spokes.iter().position(|spoke| spoke.connection_id == connection_id)?;
        Some(self.spokes.remove(position))
    }

    /// True when the connection completed its handshake and is still open
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.spokes.iter().any(|spoke| spoke.connection_id == connection_id)
    }

    /// First registered spoke owning the market (`BTC-USD`) or index (`BTCIDX`)
    pub fn find_spoke_for(&self, identifier: &str) -> Option<&SpokeRecord> {
        self.spokes.iter().find(|spoke| spoke.owns(identifier))
    }

    /// Records in handshake order
    pub fn iter(&self) -> impl Iterator<Item = &SpokeRecord> {
        self.spokes.iter()
    }

    /// Number of registered spokes
    pub fn len(&self) -> usize {
        self.spokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spokes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn record(id: ConnectionId, markets: &[&str], indexes: &[&str]) -> (SpokeRecord, UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let welcome = Welcome {
            markets: markets.iter().map(|m| m.to_string()).collect(),
            indexes: indexes.iter().map(|i| i.to_string()).collect(),
        };
        (SpokeRecord::new(id, welcome, tx), rx)
    }

    #[test]
    fn test_find_by_market() {
        let mut registry = MembershipRegistry::new();
        registry.add(record(1, &["ETH-USD"], &[]).0);
        registry.add(record(2, &["BTC-USD", "SOL-USD"], &[]).0);

        assert_eq!(registry.find_spoke_for("BTC-USD").map(|s| s.connection_id), Some(2));
        assert!(registry.find_spoke_for("DOGE-USD").is_none());
    }

    #[test]
    fn test_identifier_without_separator_checks_indexes() {
        let mut registry = MembershipRegistry::new();
        // A market set holding the bare name must not match
        registry.add(record(1, &["idxname"], &[]).0);
        registry.add(record(2, &["BTC-USD"], &["idxname"]).0);

        assert_eq!(registry.find_spoke_for("idxname").map(|s| s.connection_id), Some(2));
    }

    #[test]
    fn test_first_registered_wins() {
        let mut registry = MembershipRegistry::new();
        registry.add(record(7, &["BTC-USD"], &[]).0);
        registry.add(record(3, &["BTC-USD"], &[]).0);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_spoke_for("BTC-USD").map(|s| s.connection_id), Some(7));

        registry.remove(7);
        assert_eq!(registry.find_spoke_for("BTC-USD").map(|s| s.connection_id), Some(3));
    }

    #[test]
    fn test_remove_by_connection() {
        let mut registry = MembershipRegistry::new();
        registry.add(record(1, &["BTC-USD"], &[]).0);

        assert!(registry.remove(2).is_none());
        assert!(registry.contains(1));
        assert_eq!(registry.remove(1).map(|s| s.connection_id), Some(1));
        assert!(registry.is_empty());
        assert!(registry.find_spoke_for("BTC-USD").is_none());
    }

    #[test]
    fn test_send_queues_encoded_frame() {
        let (spoke, mut rx) = record(1, &["BTC-USD"], &[]);
        spoke.send(&Message::new("fetch", json!({"market": "BTC-USD"})).unwrap()).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame[..], &br#"{"op":"fetch","data":{"market":"BTC-USD"}}#"#[..]);

        drop(rx);
        let result = spoke.send(&Message::new("fetch", json!(null)).unwrap());
        assert!(matches!(result, Err(IpcError::NotConnected)));
    }
}
