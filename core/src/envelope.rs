//! Thread/correlation metadata conventions layered on top of
//! [`crate::event::Event::metadata`], used by [`crate::client::AgentClient`]'s
//! collaboration helpers (`request_reply`, `fanout_fanin`).
//!
//! The gateway's own response correlation (see `gateway.rs`) keys strictly
//! on `event_id`/`response_to` and doesn't need any of this; `Envelope` is
//! for mods and clients that want thread-scoped broadcast/reply topics on
//! top of that.

use crate::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};

/// Reserved metadata keys for thread & correlation semantics.
pub mod keys {
    pub const THREAD_ID: &str = "thread_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const SENDER: &str = "sender";
    pub const REPLY_TO: &str = "reply_to";
    pub const TTL: &str = "ttl";
    pub const HOP_COUNT: &str = "hop";
    pub const TIMESTAMP_MS: &str = "ts";
}

/// Topic conventions for thread-scoped communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadTopicKind {
    Broadcast,
    Reply,
}

impl ThreadTopicKind {
    pub fn topic(self, thread_id: &str) -> String {
        match self {
            ThreadTopicKind::Broadcast => format!("thread.{thread_id}.broadcast"),
            ThreadTopicKind::Reply => format!("thread.{thread_id}.reply"),
        }
    }
}

/// Per-agent private reply channel name, mirrored in `EventGateway::subscribe`.
pub fn agent_reply_topic(agent_id: &str) -> String {
    format!("agent.{agent_id}.reply")
}

/// Coordination metadata that rides inside [`crate::event::Event::metadata`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub thread_id: String,
    pub correlation_id: String,
    pub sender: String,
    pub reply_to: String,
    pub ttl: i32,
    pub hop: u32,
    pub timestamp_ms: i64,
}

impl Envelope {
    pub fn new(thread_id: impl Into<String>, sender: impl Into<String>) -> Self {
        let thread_id = thread_id.into();
        let sender = sender.into();
        Self {
            reply_to: ThreadTopicKind::Reply.topic(&thread_id),
            correlation_id: thread_id.clone(),
            thread_id,
            sender,
            ttl: 16,
            hop: 0,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Populates from a metadata map, falling back to `fallback_event_id`
    /// for `thread_id` when absent so every event has a thread identity.
    pub fn from_metadata(meta: &ValueMap, fallback_event_id: &str) -> Self {
        let get_str = |k: &str| meta.get(k).and_then(Value::as_str).map(str::to_string);
        let thread_id = get_str(keys::THREAD_ID).unwrap_or_else(|| fallback_event_id.to_string());
        let correlation_id = get_str(keys::CORRELATION_ID).unwrap_or_else(|| thread_id.clone());
        let sender = get_str(keys::SENDER).unwrap_or_default();
        let reply_to =
            get_str(keys::REPLY_TO).unwrap_or_else(|| ThreadTopicKind::Reply.topic(&thread_id));
        let ttl = meta.get(keys::TTL).and_then(Value::as_i64).unwrap_or(16) as i32;
        let hop = meta.get(keys::HOP_COUNT).and_then(Value::as_i64).unwrap_or(0) as u32;
        let timestamp_ms = meta
            .get(keys::TIMESTAMP_MS)
            .and_then(Value::as_i64)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        Self {
            thread_id,
            correlation_id,
            sender,
            reply_to,
            ttl,
            hop,
            timestamp_ms,
        }
    }

    pub fn apply_to_metadata(&self, meta: &mut ValueMap) {
        meta.insert(keys::THREAD_ID.into(), Value::from(self.thread_id.clone()));
        meta.insert(
            keys::CORRELATION_ID.into(),
            Value::from(self.correlation_id.clone()),
        );
        meta.insert(keys::SENDER.into(), Value::from(self.sender.clone()));
        meta.insert(keys::REPLY_TO.into(), Value::from(self.reply_to.clone()));
        meta.insert(keys::TTL.into(), Value::from(self.ttl as i64));
        meta.insert(keys::HOP_COUNT.into(), Value::from(self.hop as i64));
        meta.insert(keys::TIMESTAMP_MS.into(), Value::from(self.timestamp_ms));
    }

    pub fn from_event(evt: &crate::event::Event) -> Self {
        Self::from_metadata(&evt.metadata, &evt.event_id)
    }

    pub fn attach_to_event(&self, evt: &mut crate::event::Event) {
        self.apply_to_metadata(&mut evt.metadata);
    }

    /// Increments hop count and decrements ttl. Returns whether the message
    /// is still within its hop budget (`ttl > 0`).
    pub fn next_hop(&mut self) -> bool {
        self.hop = self.hop.saturating_add(1);
        if self.ttl > 0 {
            self.ttl -= 1;
        }
        self.ttl > 0
    }

    pub fn broadcast_topic(&self) -> String {
        ThreadTopicKind::Broadcast.topic(&self.thread_id)
    }

    pub fn reply_topic(&self) -> String {
        ThreadTopicKind::Reply.topic(&self.thread_id)
    }
}
