//! Agent registry: tracks connected agents and their bounded inbound
//! queues, grounded on the per-agent mailbox pattern in the agent runtime
//! (bounded `mpsc`, drop-on-overflow) but without its forwarder-task
//! machinery — queue delivery here is driven directly by
//! [`crate::gateway::EventGateway`], not by a pub/sub bridge.

use crate::event::Event;
use crate::value::ValueMap;
use dashmap::DashMap;
use opentelemetry::metrics::{Counter, UpDownCounter};
use opentelemetry::{global, KeyValue};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

struct AgentEntry {
    metadata: ValueMap,
    credential: Option<String>,
    last_seen: AtomicI64,
    sender: mpsc::Sender<Event>,
    receiver: Mutex<mpsc::Receiver<Event>>,
}

/// Tracks connected agents and delivers events to their bounded FIFO
/// mailboxes. `enqueue` never blocks the caller; overflow drops the newest
/// event and is recorded as a metric, never an error.
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentEntry>>,
    queue_capacity: usize,
    backpressure_threshold: f64,
    registered_gauge: UpDownCounter<i64>,
    enqueued_counter: Counter<u64>,
    dropped_counter: Counter<u64>,
    backpressure_counter: Counter<u64>,
}

impl AgentRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_backpressure_threshold(queue_capacity, 0.8)
    }

    /// `backpressure_threshold` is the fraction of `queue_capacity` (in
    /// `[0.0, 1.0]`) at which `enqueue` starts logging a backpressure
    /// warning and bumping a metric, ahead of the mailbox actually filling
    /// up and dropping events.
    pub fn with_backpressure_threshold(queue_capacity: usize, backpressure_threshold: f64) -> Self {
        let meter = global::meter("openagents.agent_registry");
        Self {
            agents: DashMap::new(),
            queue_capacity,
            backpressure_threshold,
            registered_gauge: meter
                .i64_up_down_counter("openagents.agent_registry.registered")
                .init(),
            enqueued_counter: meter
                .u64_counter("openagents.agent_registry.enqueued_total")
                .init(),
            dropped_counter: meter
                .u64_counter("openagents.agent_registry.dropped_total")
                .init(),
            backpressure_counter: meter
                .u64_counter("openagents.agent_registry.backpressure_total")
                .init(),
        }
    }

    /// Registers a new agent with its own bounded mailbox.
    ///
    /// If `agent_id` is already connected, the registration fails with
    /// `DuplicateRegistration` unless `force_reconnect` is set or
    /// `credential` matches the credential the agent registered with
    /// originally — either case tears down the prior mailbox (dropping
    /// whatever was still queued) and replaces it with a fresh one.
    pub fn register(
        &self,
        agent_id: &str,
        metadata: ValueMap,
        credential: Option<&str>,
        force_reconnect: bool,
    ) -> crate::error::Result<()> {
        if let Some(existing) = self.agents.get(agent_id) {
            let credential_matches = match (&existing.credential, credential) {
                (Some(stored), Some(offered)) => stored == offered,
                _ => false,
            };
            if !force_reconnect && !credential_matches {
                return Err(crate::error::CoreError::DuplicateRegistration(
                    agent_id.to_string(),
                ));
            }
            drop(existing);
            self.agents.remove(agent_id);
            self.registered_gauge.add(-1, &[]);
            tracing::info!(agent_id, force_reconnect, "reconnecting already-registered agent");
        }
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.agents.insert(
            agent_id.to_string(),
            Arc::new(AgentEntry {
                metadata,
                credential: credential.map(str::to_string),
                last_seen: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
                sender,
                receiver: Mutex::new(receiver),
            }),
        );
        self.registered_gauge.add(1, &[]);
        Ok(())
    }

    /// Drops the agent and its mailbox. Returns false if it wasn't
    /// registered.
    pub fn unregister(&self, agent_id: &str) -> bool {
        if self.agents.remove(agent_id).is_some() {
            self.registered_gauge.add(-1, &[]);
            true
        } else {
            false
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn touch(&self, agent_id: &str) {
        if let Some(entry) = self.agents.get(agent_id) {
            entry
                .last_seen
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    pub fn metadata(&self, agent_id: &str) -> Option<ValueMap> {
        self.agents.get(agent_id).map(|e| e.metadata.clone())
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Places `event` on `agent_id`'s mailbox without blocking. Silently
    /// drops (recording a metric) if the agent is unknown or its mailbox
    /// is full — both are local conditions per the error taxonomy.
    pub fn enqueue(&self, agent_id: &str, event: Event) {
        let Some(entry) = self.agents.get(agent_id) else {
            return;
        };
        let label = [KeyValue::new("agent_id", agent_id.to_string())];
        match entry.sender.try_send(event) {
            Ok(()) => {
                self.enqueued_counter.add(1, &label);
                let used = self.queue_capacity.saturating_sub(entry.sender.capacity());
                let fill = used as f64 / self.queue_capacity.max(1) as f64;
                if fill >= self.backpressure_threshold {
                    self.backpressure_counter.add(1, &label);
                    tracing::warn!(agent_id, used, capacity = self.queue_capacity, "agent mailbox under backpressure");
                }
            }
            Err(_) => {
                self.dropped_counter.add(1, &label);
                tracing::warn!(agent_id, "agent mailbox full, dropping newest event");
            }
        }
    }

    /// Waits up to `timeout` for at least one event, then drains up to
    /// `max` more without waiting further. Returns an empty vec for an
    /// unknown agent or on timeout with nothing delivered.
    pub async fn poll(&self, agent_id: &str, max: usize, timeout: Duration) -> Vec<Event> {
        let Some(entry) = self.agents.get(agent_id).map(|e| Arc::clone(&e)) else {
            return Vec::new();
        };
        let mut receiver = entry.receiver.lock().await;
        let mut out = Vec::new();
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(event)) => out.push(event),
            Ok(None) | Err(_) => return out,
        }
        while out.len() < max.max(1) {
            match receiver.try_recv() {
                Ok(event) => out.push(event),
                Err(_) => break,
            }
        }
        out
    }
}
