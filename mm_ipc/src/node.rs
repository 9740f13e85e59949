use std::sync::Arc;

use tracing::info;
use tracing::warn;

use crate::config::RoleConfig;
use crate::dispatcher::EventDispatcher;
use crate::errors::Result;
use crate::hub::Hub;
use crate::spoke::SpokeClient;

/// The transport endpoint of one process, chosen once from its role
#[derive(Debug)]
pub enum Node {
    Hub(Hub),
    Spoke(SpokeClient),
}

impl Node {
    /// Builds and starts the endpoint for `config`.
    ///
    /// A hub that cannot bind is an error. A spoke that cannot reach the hub yet
    /// is not: it keeps retrying in the background.
    pub async fn start(config: RoleConfig, dispatcher: Arc<EventDispatcher>) -> Result<Self> {
        match config {
            RoleConfig::Hub(config) => {
                let hub = Hub::bind(config, dispatcher)?;
                Ok(Node::Hub(hub))
            }
            RoleConfig::Spoke(config) => {
                let client = SpokeClient::new(config, dispatcher);
                if let Err(err) = client.connect().await {
                    warn!("Hub not reachable yet, will retry: {err}");
                }
                Ok(Node::Spoke(client))
            }
        }
    }

    /// `"hub"` or `"spoke"`
    pub fn role(&self) -> &'static str {
        match self {
            Node::Hub(_) => "hub",
            Node::Spoke(_) => "spoke",
        }
    }

    /// The hub, when running as one
    pub fn as_hub(&self) -> Option<&Hub> {
        match self {
            Node::Hub(hub) => Some(hub),
            Node::Spoke(_) => None,
        }
    }

    /// The spoke client, when running as one
    pub fn as_spoke(&self) -> Option<&SpokeClient> {
        match self {
            Node::Spoke(client) => Some(client),
            Node::Hub(_) => None,
        }
    }

    /// Shuts the hub down or closes the spoke's connection
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down {} node", self.role());
        match self {
            Node::Hub(hub) => {
                hub.shutdown();
                Ok(())
            }
            Node::Spoke(client) => client.close().await,
        }
    }
}
