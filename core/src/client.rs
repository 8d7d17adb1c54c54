//! Thin reference agent client bound to a gateway, grounded on the
//! collaborator's `request_reply`/`fanout_fanin` choreography — the pure
//! event-core composition every orchestration mod would otherwise
//! reimplement, lifted up to a shared helper.

use crate::envelope::Envelope;
use crate::event::{Event, EventResponse, SourceType};
use crate::gateway::EventGateway;
use crate::subscription::SubscriptionRequest;
use crate::value::ValueMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A thin, gateway-bound client used by this crate's own tests and by any
/// in-process agent. A transport-attached SDK would implement the same
/// operations against [`crate::gateway::NetworkApi`] over the wire instead.
pub struct AgentClient {
    gateway: Arc<EventGateway>,
    agent_id: String,
}

impl AgentClient {
    pub fn new(gateway: Arc<EventGateway>, agent_id: impl Into<String>) -> Self {
        Self {
            gateway,
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn register(&self, metadata: ValueMap) -> crate::error::Result<()> {
        self.gateway
            .register_agent(&self.agent_id, metadata, None, false)
            .await
    }

    /// Like [`AgentClient::register`], but for a reconnect: either
    /// `credential` must match the one this agent originally registered
    /// with, or `force_reconnect` must be set, to take over from a prior
    /// registration still on file.
    pub async fn reconnect(
        &self,
        metadata: ValueMap,
        credential: Option<&str>,
        force_reconnect: bool,
    ) -> crate::error::Result<()> {
        self.gateway
            .register_agent(&self.agent_id, metadata, credential, force_reconnect)
            .await
    }

    pub async fn unregister(&self) -> crate::error::Result<()> {
        self.gateway.unregister_agent(&self.agent_id).await
    }

    pub fn subscribe(&self, request: SubscriptionRequest) -> crate::error::Result<String> {
        self.gateway.subscribe(&self.agent_id, request)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.gateway.unsubscribe(subscription_id)
    }

    pub async fn poll(&self, max: usize, timeout: Duration) -> Vec<Event> {
        self.gateway.poll(&self.agent_id, max, timeout).await
    }

    /// Emits `event`, overwriting its `source_id` to this client's agent id
    /// so callers can't spoof another agent's identity.
    pub async fn emit(&self, mut event: Event, timeout: Duration) -> crate::error::Result<EventResponse> {
        event.source_id = self.agent_id.clone();
        self.gateway.emit(event, timeout).await
    }

    /// Emits an event carrying a fresh thread and awaits the first reply
    /// whose `response_to` correlates back to it. The in-flight slot is
    /// registered before the event is dispatched, so a handler that
    /// replies synchronously within the same call stack can't race ahead
    /// of the wait. Returns the actual reply event when one was emitted
    /// separately (`response_to`-linked); returns `None` only on timeout —
    /// a mod answering inline has no such event and is surfaced through
    /// [`AgentClient::emit`] instead.
    pub async fn request_reply(
        &self,
        event_name: &str,
        payload: ValueMap,
        timeout: Duration,
    ) -> crate::error::Result<Option<Event>> {
        let thread_id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::new(thread_id, self.agent_id.clone());
        let mut metadata = ValueMap::new();
        envelope.apply_to_metadata(&mut metadata);

        let event = Event::builder(event_name, &self.agent_id)
            .source_type(SourceType::Agent)
            .payload(payload)
            .metadata(metadata)
            .requires_response(true)
            .build()?;

        match self.gateway.emit_with_reply(event, timeout).await {
            Ok((_, reply)) => Ok(reply),
            Err(crate::error::CoreError::TimeoutError(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Emits `event_name` to each of `targets` (as distinct destination
    /// agents) and collects up to `first_k` correlated replies within
    /// `timeout`, recomputing the remaining budget after each reply.
    pub async fn fanout_fanin(
        &self,
        targets: &[&str],
        event_name: &str,
        payload: ValueMap,
        first_k: usize,
        timeout: Duration,
    ) -> crate::error::Result<Vec<EventResponse>> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        for target in targets {
            if collected.len() >= first_k || Instant::now() >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = Event::builder(event_name, &self.agent_id)
                .destination(*target)
                .payload(payload.clone())
                .requires_response(true)
                .build()?;
            if let Ok(response) = self.gateway.emit(event, remaining).await {
                collected.push(response);
            }
        }
        Ok(collected)
    }
}
