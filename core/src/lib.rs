// OpenAgents Core Library
// Event-driven multi-agent collaboration core

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod gateway;
pub mod mods;
pub mod registry;
pub mod subscription;
pub mod system_events;
pub mod telemetry;
pub mod transport;
pub mod value;

pub use client::AgentClient;
pub use config::NetworkConfig;
pub use envelope::{agent_reply_topic, Envelope, ThreadTopicKind};
pub use error::{CoreError, Result};
pub use event::{Event, EventResponse, SourceType, Visibility};
pub use gateway::{EventGateway, GatewayStats, NetworkApi};
pub use mods::{Mod, ModRegistry};
pub use registry::{AgentRegistry, ChannelRegistry};
pub use subscription::{Subscription, SubscriptionIndex, SubscriptionRequest};
pub use transport::{LoopbackTransport, TransportAdapter};
pub use value::{Value, ValueMap};

/// A fully wired event core: gateway plus whatever mods were registered at
/// construction. Replaces the upstream global network singleton — callers
/// hold an explicit `Network` value and pass it (or its gateway) to every
/// component they construct.
pub struct Network {
    pub gateway: std::sync::Arc<EventGateway>,
}

impl Network {
    /// Builds a network from `config` with no mods registered yet; call
    /// `gateway.register_mod` before agents start emitting events that
    /// depend on one.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            gateway: EventGateway::new(config),
        }
    }

    pub fn client(&self, agent_id: impl Into<String>) -> AgentClient {
        AgentClient::new(std::sync::Arc::clone(&self.gateway), agent_id)
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}
