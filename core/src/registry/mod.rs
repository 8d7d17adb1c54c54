//! Agent and channel registries: the gateway's two authoritative indices
//! of "who is connected" and "who belongs where".

pub mod agent;
pub mod channel;

pub use agent::AgentRegistry;
pub use channel::ChannelRegistry;
