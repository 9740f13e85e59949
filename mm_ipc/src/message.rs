use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::errors::IpcError;
use crate::errors::Result;

/// Operation name of the handshake a spoke sends right after connecting
pub const WELCOME_OP: &str = "welcome";

/// A single unit of the wire protocol: an operation name and an opaque payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub op: String,
    #[serde(default)]
    pub data: Value,
}

impl Message {
    /// Creates a message, rejecting an empty op
    pub fn new(op: impl Into<String>, data: Value) -> Result<Self> {
        let op = op.into();
        if op.is_empty() {
            return Err(IpcError::EmptyOp);
        }
        Ok(Self { op, data })
    }

    /// Builds the handshake message for a spoke
    pub fn welcome(markets: &[String], indexes: &[String]) -> Self {
        let welcome = Welcome { markets: markets.to_vec(), indexes: indexes.to_vec() };
        Self { op: WELCOME_OP.to_string(), data: serde_json::json!(welcome) }
    }

    pub fn is_welcome(&self) -> bool {
        self.op == WELCOME_OP
    }
}

/// Handshake payload: what a spoke declares it owns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl Welcome {
    pub fn from_message(message: &Message) -> Result<Self> {
        Ok(Welcome::deserialize(&message.data)?)
    }
}
