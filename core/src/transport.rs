//! Transport adapter contract: the boundary between this crate and
//! whatever wire protocol carries events to and from agents. No codec or
//! socket lives here — those are external collaborators — but an
//! in-process `LoopbackTransport` reference implementation is provided for
//! tests, grounded on the agent runtime's forwarder-task bridging pattern.

use crate::error::Result;
use crate::event::Event;
use crate::gateway::EventGateway;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Implemented by a real wire adapter (WebSocket, gRPC, HTTP long-poll).
/// `send_outbound` is called once per event an agent emits; `drain_inbound`
/// is polled continuously by the transport's own event loop to get events
/// to push to the wire. Transport failures must never propagate into the
/// gateway: a disconnected agent's mailbox simply keeps accumulating.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn send_outbound(&self, event: Event) -> Result<()>;
    async fn drain_inbound(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event>;
}

/// In-process transport that wires an `mpsc` channel directly into
/// `EventGateway::process_event`, standing in for a real wire adapter in
/// integration tests — mirrors the agent runtime's forwarder task without
/// the pub/sub bridge it uses to get there.
pub struct LoopbackTransport {
    gateway: Arc<EventGateway>,
    inbound_tx: mpsc::Sender<Event>,
}

impl LoopbackTransport {
    pub fn new(gateway: Arc<EventGateway>) -> Self {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Event>(1024);
        let gw = Arc::clone(&gateway);
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                if let Err(err) = gw.process_event(event).await {
                    tracing::warn!(error = %err, "loopback transport dropped an invalid event");
                }
            }
        });
        Self { gateway, inbound_tx }
    }

    /// Queues `event` to be processed by the gateway, simulating an
    /// incoming wire message.
    pub async fn inject(&self, event: Event) -> Result<()> {
        self.inbound_tx
            .send(event)
            .await
            .map_err(|_| {
                crate::error::CoreError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "loopback closed",
                ))
            })
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn send_outbound(&self, event: Event) -> Result<()> {
        self.inject(event).await
    }

    async fn drain_inbound(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event> {
        self.gateway.poll(agent_id, max, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::subscription::SubscriptionRequest;
    use crate::value::ValueMap;

    #[tokio::test]
    async fn loopback_delivers_injected_event_to_subscriber() {
        let gateway = EventGateway::new(NetworkConfig::default());
        gateway.register_agent("agent:b", ValueMap::new(), None, false).await.unwrap();
        gateway
            .subscribe(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["agent.direct_message.sent".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();

        let transport = LoopbackTransport::new(Arc::clone(&gateway));
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .build()
            .unwrap();
        transport.send_outbound(event).await.unwrap();

        let received = transport
            .drain_inbound("agent:b", 10, Duration::from_millis(200))
            .await;
        assert_eq!(received.len(), 1);
    }
}
