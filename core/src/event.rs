//! The [`Event`] type: the single message shape that flows through the
//! entire event core, and the validation/visibility rules it carries.

use crate::error::{CoreError, Result};
use crate::value::{Value, ValueMap};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// `domain.entity.action`-shaped names, lowercase, at least two dotted parts.
static EVENT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)+$").unwrap());

/// Names that carry no semantic meaning and are rejected outright, even
/// though they'd otherwise pass the grammar above (e.g. `event.name`).
const FORBIDDEN_NAMES: &[&str] = &[
    "event", "message", "test", "temp", "tmp", "placeholder", "unknown", "default", "generic",
    "sample", "example", "transport.message", "base.event", "system.event",
];

const MIN_EVENT_NAME_LEN: usize = 3;

/// Who originated an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Agent,
    Mod,
    System,
}

/// Access-control label governing which agents an event fans out to.
/// See the visibility decision table in the gateway for the full matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Network,
    Channel,
    Direct,
    Restricted,
    ModOnly,
}

impl Default for Visibility {
    /// `Network` doubles as the "not yet decided" sentinel: [`EventBuilder`]
    /// only auto-derives a narrower visibility when the caller left it at
    /// this default. An explicitly chosen `Network` is indistinguishable
    /// from the sentinel, which matches the upstream behavior this is
    /// ported from.
    fn default() -> Self {
        Visibility::Network
    }
}

/// An immutable record of one interaction. The only inter-component message
/// type in the system: agent-to-agent messages, channel posts, mod
/// invocations, and responses are all `Event`s distinguished by `event_name`
/// and `visibility`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_name: String,
    pub timestamp: i64,
    pub source_id: String,
    pub source_type: SourceType,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relevant_mod: Option<String>,

    #[serde(default)]
    pub requires_response: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_to: Option<String>,

    #[serde(default)]
    pub payload: ValueMap,
    #[serde(default)]
    pub metadata: ValueMap,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text_representation: Option<String>,

    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allowed_agents: Option<BTreeSet<String>>,
}

impl Event {
    /// Starts building an event. `event_name` and `source_id` are required
    /// up front because every other invariant is checked against them.
    pub fn builder(event_name: impl Into<String>, source_id: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_name, source_id)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.len() < MIN_EVENT_NAME_LEN || !EVENT_NAME_RE.is_match(name) {
            return Err(CoreError::ValidationError(format!(
                "event_name '{name}' does not match the required `domain.entity.action` grammar"
            )));
        }
        if FORBIDDEN_NAMES.contains(&name) {
            return Err(CoreError::ValidationError(format!(
                "event_name '{name}' is a placeholder name and carries no semantic meaning"
            )));
        }
        Ok(())
    }

    /// Re-validates an event that didn't necessarily come through
    /// [`EventBuilder`] — e.g. one deserialized off the wire. Checked by
    /// the gateway at the top of `process_event` so a malformed event
    /// never reaches history, mod dispatch, or fan-out.
    pub fn validate(&self) -> Result<()> {
        Self::validate_name(&self.event_name)?;
        if self.source_id.is_empty() {
            return Err(CoreError::ValidationError(
                "source_id must not be empty".to_string(),
            ));
        }
        if self.visibility == Visibility::Restricted
            && self
                .allowed_agents
                .as_ref()
                .map(|a| a.is_empty())
                .unwrap_or(true)
        {
            return Err(CoreError::ValidationError(
                "restricted visibility requires a non-empty allowed_agents set".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if `pattern` matches this event's name: exact match,
    /// the wildcard `*`, or a `prefix.*` match.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if pattern == self.event_name {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return self.event_name == prefix || self.event_name.starts_with(&format!("{prefix}."));
        }
        false
    }

    /// Visibility decision table (see gateway docs for the authoritative
    /// copy): decides whether `agent_id`, a member of `agent_channels`,
    /// may observe this event.
    pub fn is_visible_to(&self, agent_id: &str, agent_channels: &BTreeSet<String>) -> bool {
        if agent_id == self.source_id {
            return !matches!(self.visibility, Visibility::ModOnly);
        }
        match self.visibility {
            Visibility::Public | Visibility::Network => true,
            Visibility::Direct => self.destination_id.as_deref() == Some(agent_id),
            Visibility::Channel => self
                .target_channel
                .as_deref()
                .map(|c| agent_channels.contains(c))
                .unwrap_or(false),
            Visibility::Restricted => self
                .allowed_agents
                .as_ref()
                .map(|allowed| allowed.contains(agent_id))
                .unwrap_or(false),
            Visibility::ModOnly => false,
        }
    }
}

/// Builder enforcing construction-time invariants and the
/// explicit-visibility-wins precedence rule documented in `SPEC_FULL.md`.
pub struct EventBuilder {
    event_name: String,
    source_id: String,
    source_type: SourceType,
    destination_id: Option<String>,
    target_channel: Option<String>,
    relevant_mod: Option<String>,
    requires_response: bool,
    response_to: Option<String>,
    payload: ValueMap,
    metadata: ValueMap,
    text_representation: Option<String>,
    visibility: Option<Visibility>,
    allowed_agents: Option<BTreeSet<String>>,
}

impl EventBuilder {
    fn new(event_name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            source_id: source_id.into(),
            source_type: SourceType::Agent,
            destination_id: None,
            target_channel: None,
            relevant_mod: None,
            requires_response: false,
            response_to: None,
            payload: ValueMap::new(),
            metadata: ValueMap::new(),
            text_representation: None,
            visibility: None,
            allowed_agents: None,
        }
    }

    pub fn source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn destination(mut self, agent_id: impl Into<String>) -> Self {
        self.destination_id = Some(agent_id.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.target_channel = Some(channel.into());
        self
    }

    pub fn relevant_mod(mut self, mod_name: impl Into<String>) -> Self {
        self.relevant_mod = Some(mod_name.into());
        self
    }

    pub fn requires_response(mut self, requires_response: bool) -> Self {
        self.requires_response = requires_response;
        self
    }

    pub fn response_to(mut self, event_id: impl Into<String>) -> Self {
        self.response_to = Some(event_id.into());
        self
    }

    pub fn payload(mut self, payload: ValueMap) -> Self {
        self.payload = payload;
        self
    }

    pub fn metadata(mut self, metadata: ValueMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text_representation = Some(text.into());
        self
    }

    /// Explicitly sets visibility. An explicit value always wins over the
    /// auto-derivation that would otherwise run in [`Self::build`].
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn allowed_agents(mut self, agents: BTreeSet<String>) -> Self {
        self.allowed_agents = Some(agents);
        self
    }

    pub fn build(self) -> Result<Event> {
        Event::validate_name(&self.event_name)?;
        if self.source_id.is_empty() {
            return Err(CoreError::ValidationError(
                "source_id must not be empty".to_string(),
            ));
        }

        // Auto-derive visibility only when the caller left it unset. An
        // explicitly supplied visibility (even one equal to the default)
        // always wins, even if targeting fields are also present.
        let visibility = self.visibility.unwrap_or_else(|| {
            if self.destination_id.is_some() {
                Visibility::Direct
            } else if self.target_channel.is_some() {
                Visibility::Channel
            } else if self.relevant_mod.is_some() {
                Visibility::ModOnly
            } else {
                Visibility::Network
            }
        });

        if visibility == Visibility::Restricted
            && self.allowed_agents.as_ref().map(|a| a.is_empty()).unwrap_or(true)
        {
            return Err(CoreError::ValidationError(
                "restricted visibility requires a non-empty allowed_agents set".to_string(),
            ));
        }

        Ok(Event {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_name: self.event_name,
            timestamp: chrono::Utc::now().timestamp_millis(),
            source_id: self.source_id,
            source_type: self.source_type,
            destination_id: self.destination_id,
            target_channel: self.target_channel,
            relevant_mod: self.relevant_mod,
            requires_response: self.requires_response,
            response_to: self.response_to,
            payload: self.payload,
            metadata: self.metadata,
            text_representation: self.text_representation,
            visibility,
            allowed_agents: self.allowed_agents,
        })
    }
}

/// Result of a mod handler processing an event, or the gateway's aggregate
/// of several handlers' responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: ValueMap,
}

impl EventResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: ValueMap::new(),
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: ValueMap) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: ValueMap::new(),
        }
    }

    /// Combines several handler responses into one: the first failure wins,
    /// otherwise `data` from every handler is merged in registration order.
    pub fn merge(responses: Vec<EventResponse>) -> EventResponse {
        if let Some(failure) = responses.iter().find(|r| !r.success) {
            return failure.clone();
        }
        let mut merged = ValueMap::new();
        let mut messages = Vec::new();
        for r in &responses {
            merged.extend(r.data.clone());
            if !r.message.is_empty() {
                messages.push(r.message.clone());
            }
        }
        EventResponse {
            success: true,
            message: messages.join("; "),
            data: merged,
        }
    }
}

/// Shorthand for the common case of a single `text` payload field.
pub fn text_payload(text: impl Into<String>) -> ValueMap {
    let mut m = ValueMap::new();
    m.insert("text".to_string(), Value::from(text.into()));
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_single_part_names() {
        let err = Event::builder("message", "agent:a").build().unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn rejects_forbidden_names_even_if_well_formed() {
        let err = Event::builder("system.event", "agent:a").build().unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn accepts_well_formed_names() {
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .build()
            .unwrap();
        assert_eq!(event.event_name, "agent.direct_message.sent");
    }

    #[test]
    fn auto_derives_direct_visibility_from_destination() {
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .build()
            .unwrap();
        assert_eq!(event.visibility, Visibility::Direct);
    }

    #[test]
    fn auto_derives_channel_visibility_from_target_channel() {
        let event = Event::builder("channel.message.posted", "agent:a")
            .channel("#general")
            .build()
            .unwrap();
        assert_eq!(event.visibility, Visibility::Channel);
    }

    #[test]
    fn auto_derives_mod_only_visibility_from_relevant_mod() {
        let event = Event::builder("project.creation.requested", "agent:a")
            .relevant_mod("openagents.mods.project.default")
            .build()
            .unwrap();
        assert_eq!(event.visibility, Visibility::ModOnly);
    }

    #[test]
    fn explicit_visibility_wins_over_targeting_fields() {
        let mut allowed = BTreeSet::new();
        allowed.insert("agent:c".to_string());
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .visibility(Visibility::Restricted)
            .allowed_agents(allowed)
            .build()
            .unwrap();
        assert_eq!(event.visibility, Visibility::Restricted);
    }

    #[test]
    fn restricted_requires_allowed_agents() {
        let err = Event::builder("agent.direct_message.sent", "agent:a")
            .visibility(Visibility::Restricted)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn mod_only_invisible_to_other_agents() {
        let event = Event::builder("project.creation.requested", "mod:project")
            .source_type(SourceType::Mod)
            .relevant_mod("openagents.mods.project.default")
            .build()
            .unwrap();
        let channels = BTreeSet::new();
        assert!(!event.is_visible_to("agent:x", &channels));
    }

    #[test]
    fn source_always_sees_its_own_non_mod_only_event() {
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .build()
            .unwrap();
        let channels = BTreeSet::new();
        assert!(event.is_visible_to("agent:a", &channels));
    }

    #[test]
    fn pattern_matching_supports_wildcard_and_prefix() {
        let event = Event::builder("channel.message.posted", "agent:a")
            .channel("#general")
            .build()
            .unwrap();
        assert!(event.matches_pattern("*"));
        assert!(event.matches_pattern("channel.message.posted"));
        assert!(event.matches_pattern("channel.*"));
        assert!(!event.matches_pattern("channel.reaction.*"));
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .payload(text_payload("hi"))
            .build()
            .unwrap();
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_name, event.event_name);
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.visibility, event.visibility);
    }

    #[test]
    fn merge_takes_first_failure() {
        let responses = vec![EventResponse::ok("a"), EventResponse::fail("b"), EventResponse::ok("c")];
        let merged = EventResponse::merge(responses);
        assert!(!merged.success);
        assert_eq!(merged.message, "b");
    }
}
