//! The event gateway: single entry point for every event in the system.
//! Grounded on the upstream `EventBus.emit_event` orchestration (history,
//! mod dispatch, subscriber fan-out) and on the collaborator's
//! subscribe-before-publish pattern for race-free response correlation.

use crate::config::NetworkConfig;
use crate::error::{CoreError, Result};
use crate::event::{Event, EventResponse, SourceType, Visibility};
use crate::mods::{Mod, ModRegistry};
use crate::registry::{AgentRegistry, ChannelRegistry};
use crate::subscription::{SubscriptionIndex, SubscriptionRequest};
use crate::system_events;
use crate::value::ValueMap;
use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// Snapshot of gateway-wide counters, mirroring the upstream
/// `get_stats()` diagnostic.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStats {
    pub event_count: u64,
    pub agent_count: usize,
    pub channel_count: usize,
    pub subscription_count: usize,
    pub mod_count: usize,
    pub in_flight_count: usize,
}

/// Central router. Every event passes through [`EventGateway::process_event`]
/// exactly once. Holds one lock-free-per-bucket structure per concern
/// (subscriptions, agents, channels, in-flight responses) rather than a
/// single global lock, per the fine-grained locking requirement.
pub struct EventGateway {
    config: NetworkConfig,
    pub subscriptions: SubscriptionIndex,
    pub agents: AgentRegistry,
    pub channels: ChannelRegistry,
    pub mods: ModRegistry,
    in_flight: DashMap<String, oneshot::Sender<(EventResponse, Option<Event>)>>,
    history: AsyncMutex<VecDeque<Event>>,
    event_count: std::sync::atomic::AtomicU64,
    events_total: Counter<u64>,
    metrics: crate::telemetry::MetricsCollector,
}

impl EventGateway {
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        let meter = global::meter("openagents.gateway");
        Arc::new(Self {
            agents: AgentRegistry::with_backpressure_threshold(
                config.queue_capacity,
                config.backpressure_threshold,
            ),
            subscriptions: SubscriptionIndex::new(),
            channels: ChannelRegistry::new(),
            mods: ModRegistry::new(),
            in_flight: DashMap::new(),
            history: AsyncMutex::new(VecDeque::with_capacity(config.history_size.min(1024))),
            event_count: std::sync::atomic::AtomicU64::new(0),
            events_total: meter.u64_counter("openagents.gateway.events_total").init(),
            metrics: crate::telemetry::MetricsCollector::new(),
            config,
        })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Rolling latency/throughput/error-rate snapshot across every event
    /// this gateway has processed.
    pub fn metrics(&self) -> crate::telemetry::Metrics {
        self.metrics.get_metrics()
    }

    pub async fn register_mod(&self, m: Arc<dyn Mod>) -> Result<()> {
        self.mods.register_mod(m).await
    }

    /// Registers an agent and broadcasts `system.agent.registered`.
    ///
    /// A duplicate `agent_id` fails with `DuplicateRegistration` unless
    /// `force_reconnect` is set or `credential` matches the one the agent
    /// registered with originally.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        metadata: ValueMap,
        credential: Option<&str>,
        force_reconnect: bool,
    ) -> Result<()> {
        self.agents
            .register(agent_id, metadata, credential, force_reconnect)?;
        self.mods.notify_agent_registered(agent_id).await;
        let notice = Event::builder("system.agent.registered", "system:system")
            .source_type(SourceType::System)
            .visibility(Visibility::Network)
            .payload(crate::value_map! { "agent_id" => agent_id })
            .build()?;
        self.process_event(notice).await?;
        Ok(())
    }

    /// Unregisters an agent, cascading: drops its subscriptions, removes it
    /// from every channel, drops its mailbox, then broadcasts
    /// `system.agent.unregistered`.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<()> {
        if !self.agents.is_registered(agent_id) {
            return Err(CoreError::UnknownAgent(agent_id.to_string()));
        }
        self.subscriptions.remove_for_agent(agent_id);
        self.channels.remove_agent(agent_id);
        self.agents.unregister(agent_id);
        self.mods.notify_agent_unregistered(agent_id).await;
        let notice = Event::builder("system.agent.unregistered", "system:system")
            .source_type(SourceType::System)
            .visibility(Visibility::Network)
            .payload(crate::value_map! { "agent_id" => agent_id })
            .build()?;
        self.process_event(notice).await?;
        Ok(())
    }

    pub fn subscribe(&self, agent_id: &str, request: SubscriptionRequest) -> Result<String> {
        if !self.agents.is_registered(agent_id) {
            return Err(CoreError::UnknownAgent(agent_id.to_string()));
        }
        self.subscriptions.add(agent_id, request)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id)
    }

    /// Registers an in-flight slot for `event_id` before dispatch begins,
    /// so a mod handler that itself emits the correlated reply (possibly
    /// recursively, within the same call stack) can resolve it. Returns the
    /// receiver half for the caller to await.
    fn begin_wait(&self, event_id: &str) -> oneshot::Receiver<(EventResponse, Option<Event>)> {
        let (tx, rx) = oneshot::channel();
        self.in_flight.insert(event_id.to_string(), tx);
        rx
    }

    fn cancel_wait(&self, event_id: &str) {
        self.in_flight.remove(event_id);
    }

    /// Central dispatch: validate, record history, run mod handlers,
    /// correlate with any pending response, fan out to matching
    /// subscribers. Returns the immediate response — either a mod's
    /// aggregate answer or a bare acknowledgement for events nobody
    /// answers synchronously.
    #[tracing::instrument(skip(self, event), fields(event_name = %event.event_name, event_id = %event.event_id))]
    pub async fn process_event(&self, event: Event) -> Result<EventResponse> {
        let started = std::time::Instant::now();
        let result = self.process_event_inner(event).await;
        self.metrics
            .record_event(started.elapsed(), result.is_ok());
        result
    }

    async fn process_event_inner(&self, event: Event) -> Result<EventResponse> {
        event.validate()?;

        {
            let mut history = self.history.lock().await;
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        self.event_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.events_total
            .add(1, &[KeyValue::new("event_name", event.event_name.clone())]);

        let reserved = system_events::reserved_response(self, &event);

        let aggregate = if let Some(response) = reserved {
            Some(response)
        } else if system_events::is_reserved(&event.event_name) {
            // Defense in depth: every reserved name is handled above. If a
            // new one is ever added without a matching arm there, it still
            // must never fall through to mod dispatch.
            None
        } else if event.relevant_mod.is_some() {
            let responses = self.mods.dispatch(&event).await;
            if responses.is_empty() {
                None
            } else {
                Some(EventResponse::merge(responses))
            }
        } else {
            None
        };

        // A follow-up event answering an earlier `requires_response` event:
        // resolve that event's in-flight slot with a response derived from
        // this one (or the mod's aggregate, if this event itself went
        // through a mod).
        if let Some(response_to) = &event.response_to {
            if let Some((_, sender)) = self.in_flight.remove(response_to) {
                let response = aggregate.clone().unwrap_or_else(|| {
                    EventResponse::ok_with_data(
                        event.text_representation.clone().unwrap_or_default(),
                        event.payload.clone(),
                    )
                });
                let _ = sender.send((response, Some(event.clone())));
            }
        }

        // This event itself required a response and a mod answered it
        // synchronously within this same call. There is no separate reply
        // event here — the mod answered inline, not by emitting one.
        if event.requires_response {
            if let Some(response) = &aggregate {
                if let Some((_, sender)) = self.in_flight.remove(&event.event_id) {
                    let _ = sender.send((response.clone(), None));
                }
            }
        }

        let channels = &self.channels;
        let agents = &self.agents;
        for subscription in self
            .subscriptions
            .matching(&event, |agent_id| channels.get_agent_channels(agent_id))
        {
            agents.enqueue(&subscription.agent_id, event.clone());
        }

        Ok(aggregate.unwrap_or_else(|| EventResponse::ok("accepted")))
    }

    /// Emits `event` and, if it requires a response, awaits it for up to
    /// `timeout`. The in-flight slot is registered before `process_event`
    /// runs so a same-stack mod reply can never race ahead of it.
    pub async fn emit(&self, event: Event, timeout: Duration) -> Result<EventResponse> {
        self.emit_with_reply(event, timeout)
            .await
            .map(|(response, _)| response)
    }

    /// Like [`EventGateway::emit`], but also returns the actual
    /// `response_to`-linked reply event when the answer arrived that way
    /// (as opposed to a mod answering synchronously in the same call, in
    /// which case there is no separate event and this is `None`).
    pub async fn emit_with_reply(
        &self,
        event: Event,
        timeout: Duration,
    ) -> Result<(EventResponse, Option<Event>)> {
        if !event.requires_response {
            return self.process_event(event).await.map(|r| (r, None));
        }
        let event_id = event.event_id.clone();
        let rx = self.begin_wait(&event_id);
        let immediate = self.process_event(event).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Ok((immediate, None)),
            Err(_) => {
                self.cancel_wait(&event_id);
                Err(CoreError::TimeoutError(event_id))
            }
        }
    }

    pub async fn poll(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event> {
        self.agents.poll(agent_id, max, timeout).await
    }

    /// Recent events, most recent last, optionally filtered by name pattern.
    pub async fn history(&self, limit: usize, pattern: Option<&str>) -> Vec<Event> {
        let history = self.history.lock().await;
        let mut selected: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| pattern.map(|p| e.matches_pattern(p)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    pub async fn stats(&self) -> GatewayStats {
        GatewayStats {
            event_count: self.event_count.load(std::sync::atomic::Ordering::Relaxed),
            agent_count: self.agents.len(),
            channel_count: self.channels.list_channels().len(),
            subscription_count: self.subscriptions.len(),
            mod_count: self.mods.mod_names().len(),
            in_flight_count: self.in_flight.len(),
        }
    }
}

/// The transport-facing RPC surface, implemented directly by the gateway
/// (no wire framing) per the External Interfaces contract.
#[async_trait]
pub trait NetworkApi {
    async fn register_agent(
        &self,
        agent_id: &str,
        metadata: ValueMap,
        credential: Option<&str>,
        force_reconnect: bool,
    ) -> Result<()>;
    async fn unregister_agent(&self, agent_id: &str) -> Result<()>;
    async fn process_event(&self, event: Event) -> Result<EventResponse>;
    async fn poll_events(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event>;
    fn subscribe(&self, agent_id: &str, request: SubscriptionRequest) -> Result<String>;
    fn unsubscribe(&self, subscription_id: &str) -> bool;
}

#[async_trait]
impl NetworkApi for EventGateway {
    async fn register_agent(
        &self,
        agent_id: &str,
        metadata: ValueMap,
        credential: Option<&str>,
        force_reconnect: bool,
    ) -> Result<()> {
        EventGateway::register_agent(self, agent_id, metadata, credential, force_reconnect).await
    }

    async fn unregister_agent(&self, agent_id: &str) -> Result<()> {
        EventGateway::unregister_agent(self, agent_id).await
    }

    async fn process_event(&self, event: Event) -> Result<EventResponse> {
        EventGateway::process_event(self, event).await
    }

    async fn poll_events(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event> {
        EventGateway::poll(self, agent_id, max, timeout).await
    }

    fn subscribe(&self, agent_id: &str, request: SubscriptionRequest) -> Result<String> {
        EventGateway::subscribe(self, agent_id, request)
    }

    fn unsubscribe(&self, subscription_id: &str) -> bool {
        EventGateway::unsubscribe(self, subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueMap;

    fn gateway() -> Arc<EventGateway> {
        EventGateway::new(NetworkConfig::default())
    }

    // S1: direct delivery
    #[tokio::test]
    async fn direct_message_delivered_only_to_destination() {
        let gw = gateway();
        gw.register_agent("agent:a", ValueMap::new(), None, false).await.unwrap();
        gw.register_agent("agent:b", ValueMap::new(), None, false).await.unwrap();
        gw.subscribe(
            "agent:b",
            SubscriptionRequest {
                event_patterns: vec!["agent.direct_message.sent".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .payload(crate::event::text_payload("hi"))
            .build()
            .unwrap();
        gw.process_event(event).await.unwrap();

        let b_events = gw.poll("agent:b", 10, Duration::from_millis(50)).await;
        assert_eq!(b_events.len(), 1);
        let a_events = gw.poll("agent:a", 10, Duration::from_millis(20)).await;
        assert!(a_events.is_empty());
    }

    // S2: channel fan-out
    #[tokio::test]
    async fn channel_post_delivered_to_all_members() {
        let gw = gateway();
        for id in ["agent:a", "agent:b", "agent:c"] {
            gw.register_agent(id, ValueMap::new(), None, false).await.unwrap();
            gw.channels.add_member("#general", id);
            gw.subscribe(
                id,
                SubscriptionRequest {
                    event_patterns: vec!["channel.*".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let event = Event::builder("channel.message.posted", "agent:a")
            .channel("#general")
            .payload(crate::event::text_payload("hello"))
            .build()
            .unwrap();
        gw.process_event(event).await.unwrap();

        for id in ["agent:a", "agent:b", "agent:c"] {
            let events = gw.poll(id, 10, Duration::from_millis(50)).await;
            assert_eq!(events.len(), 1, "{id} should have received the post");
        }
    }

    // S3: mod-only invisibility
    #[tokio::test]
    async fn mod_only_event_invisible_to_wildcard_subscriber() {
        use crate::mods::Mod;
        use async_trait::async_trait;

        struct EchoMod;
        #[async_trait]
        impl Mod for EchoMod {
            fn name(&self) -> &str {
                "openagents.mods.project.default"
            }
            fn bindings(&self) -> Vec<String> {
                vec!["project.creation.requested".to_string()]
            }
            async fn handle(&self, _event: &Event) -> Result<EventResponse> {
                Ok(EventResponse::ok("created"))
            }
        }

        let gw = gateway();
        gw.register_agent("agent:x", ValueMap::new(), None, false).await.unwrap();
        gw.subscribe(
            "agent:x",
            SubscriptionRequest {
                event_patterns: vec!["*".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        gw.register_mod(Arc::new(EchoMod)).await.unwrap();

        let event = Event::builder("project.creation.requested", "mod:caller")
            .relevant_mod("openagents.mods.project.default")
            .build()
            .unwrap();
        let response = gw.process_event(event).await.unwrap();
        assert!(response.success);

        let events = gw.poll("agent:x", 10, Duration::from_millis(20)).await;
        assert!(events.is_empty());
    }

    // S4: request/response
    #[tokio::test]
    async fn emit_returns_mod_response_synchronously() {
        use crate::mods::Mod;
        use async_trait::async_trait;

        struct ListingMod;
        #[async_trait]
        impl Mod for ListingMod {
            fn name(&self) -> &str {
                "openagents.mods.system.listing"
            }
            fn bindings(&self) -> Vec<String> {
                vec!["demo.agent.list".to_string()]
            }
            async fn handle(&self, _event: &Event) -> Result<EventResponse> {
                Ok(EventResponse::ok("listed"))
            }
        }

        let gw = gateway();
        gw.register_mod(Arc::new(ListingMod)).await.unwrap();
        gw.register_agent("agent:a", ValueMap::new(), None, false).await.unwrap();

        let event = Event::builder("demo.agent.list", "agent:a")
            .relevant_mod("openagents.mods.system.listing")
            .requires_response(true)
            .build()
            .unwrap();
        let response = gw.emit(event, Duration::from_secs(1)).await.unwrap();
        assert!(response.success);
        assert_eq!(gw.stats().await.in_flight_count, 0);
    }

    // S5: timeout
    #[tokio::test]
    async fn emit_times_out_when_nobody_answers() {
        let gw = gateway();
        gw.register_agent("agent:a", ValueMap::new(), None, false).await.unwrap();
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:nobody")
            .requires_response(true)
            .build()
            .unwrap();
        let err = gw
            .emit(event, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::TimeoutError(_)));
        assert_eq!(gw.stats().await.in_flight_count, 0);
    }

    // S6: invalid name rejected
    #[tokio::test]
    async fn process_event_rejects_events_built_with_invalid_wire_data() {
        let gw = gateway();
        let mut event = Event::builder("agent.direct_message.sent", "agent:a")
            .build()
            .unwrap();
        event.event_name = "event".to_string();
        let before = gw.history(10, None).await.len();
        let err = gw.process_event(event).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert_eq!(gw.history(10, None).await.len(), before);
    }

    // S7: queue overflow
    #[tokio::test]
    async fn overflowing_queue_drops_newest_and_keeps_capacity_count() {
        let config = NetworkConfig {
            queue_capacity: 5,
            ..NetworkConfig::default()
        };
        let gw = EventGateway::new(config);
        gw.register_agent("agent:b", ValueMap::new(), None, false).await.unwrap();
        gw.subscribe(
            "agent:b",
            SubscriptionRequest {
                event_patterns: vec!["*".to_string()],
                ..Default::default()
            },
        )
        .unwrap();
        for _ in 0..20 {
            let event = Event::builder("agent.direct_message.sent", "agent:a")
                .destination("agent:b")
                .build()
                .unwrap();
            gw.process_event(event).await.unwrap();
        }
        let events = gw.poll("agent:b", 100, Duration::from_millis(50)).await;
        assert_eq!(events.len(), 5);
    }

    // S8: unregister cascades
    #[tokio::test]
    async fn unregister_cascades_subscriptions_and_channel_membership() {
        let gw = gateway();
        gw.register_agent("agent:a", ValueMap::new(), None, false).await.unwrap();
        let sub_id = gw
            .subscribe(
                "agent:a",
                SubscriptionRequest {
                    event_patterns: vec!["x.*".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        gw.channels.add_member("#c", "agent:a");

        gw.unregister_agent("agent:a").await.unwrap();

        assert!(!gw.unsubscribe(&sub_id));
        assert!(!gw.channels.get_members("#c").contains("agent:a"));
        assert!(!gw.agents.is_registered("agent:a"));
    }

    #[tokio::test]
    async fn metrics_reflect_processed_events() {
        let gw = gateway();
        gw.register_agent("agent:a", ValueMap::new(), None, false)
            .await
            .unwrap();
        for _ in 0..3 {
            let event = Event::builder("agent.direct_message.sent", "agent:a")
                .destination("agent:a")
                .payload(crate::event::text_payload("hi"))
                .build()
                .unwrap();
            gw.process_event(event).await.unwrap();
        }
        let metrics = gw.metrics();
        // register_agent itself drives one more process_event call (the
        // `system.agent.registered` notice), so 3 posts + 1 notice.
        assert_eq!(metrics.total_events, 4);
        assert_eq!(metrics.error_rate, 0.0);
    }

    #[tokio::test]
    async fn registering_an_agent_against_a_reserved_name_via_a_mod_is_impossible() {
        let gw = gateway();
        gw.register_agent("agent:a", ValueMap::new(), None, false)
            .await
            .unwrap();
        let event = Event::builder(crate::system_events::AGENT_REGISTER, "agent:a")
            .visibility(Visibility::Network)
            .requires_response(true)
            .build()
            .unwrap();
        let response = gw.emit(event, Duration::from_secs(1)).await.unwrap();
        assert!(!response.success);
    }
}
