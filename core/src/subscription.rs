//! Subscription index: maps event-name patterns and filters to the agents
//! that want delivery, grounded on the topic/capability index pattern in
//! the agent directory and the `matches_event` logic of the upstream
//! `EventSubscription` model.

use crate::event::Event;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// A standing interest in some subset of events, owned by one agent.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub agent_id: String,
    pub event_patterns: Vec<String>,
    pub mod_filter: Option<String>,
    pub channel_filter: Option<String>,
    pub agent_filter: Option<BTreeSet<String>>,
    pub is_active: bool,
}

impl Subscription {
    /// Returns true if `event` should be delivered to this subscription's
    /// owner, given that owner's current channel membership. Visibility is
    /// checked first since it's cheapest to short-circuit on.
    pub fn matches_event(&self, event: &Event, agent_channels: &BTreeSet<String>) -> bool {
        if !self.is_active {
            return false;
        }
        if !event.is_visible_to(&self.agent_id, agent_channels) {
            return false;
        }
        if !self
            .event_patterns
            .iter()
            .any(|p| event.matches_pattern(p))
        {
            return false;
        }
        if let Some(mod_filter) = &self.mod_filter {
            if event.relevant_mod.as_deref() != Some(mod_filter.as_str()) {
                return false;
            }
        }
        if let Some(channel_filter) = &self.channel_filter {
            if event.target_channel.as_deref() != Some(channel_filter.as_str()) {
                return false;
            }
        }
        if let Some(agent_filter) = &self.agent_filter {
            if !agent_filter.contains(&event.source_id) {
                return false;
            }
        }
        true
    }
}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id() -> String {
    format!("sub-{}", NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Request to create a subscription, separate from the stored [`Subscription`]
/// so callers don't have to know how subscription ids are minted.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRequest {
    pub event_patterns: Vec<String>,
    pub mod_filter: Option<String>,
    pub channel_filter: Option<String>,
    pub agent_filter: Option<BTreeSet<String>>,
}

/// Lock-free-per-bucket index from subscription id to [`Subscription`],
/// plus a secondary index from agent id to the subscriptions it owns so
/// `remove_for_agent` doesn't need a full scan.
#[derive(Default)]
pub struct SubscriptionIndex {
    by_id: DashMap<String, Subscription>,
    by_agent: DashMap<String, BTreeSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. At least one pattern is required; returns the
    /// assigned id.
    pub fn add(&self, agent_id: &str, request: SubscriptionRequest) -> crate::error::Result<String> {
        if request.event_patterns.is_empty() {
            return Err(crate::error::CoreError::ValidationError(
                "subscription requires at least one event pattern".to_string(),
            ));
        }
        let subscription_id = next_subscription_id();
        let subscription = Subscription {
            subscription_id: subscription_id.clone(),
            agent_id: agent_id.to_string(),
            event_patterns: request.event_patterns,
            mod_filter: request.mod_filter,
            channel_filter: request.channel_filter,
            agent_filter: request.agent_filter,
            is_active: true,
        };
        self.by_id.insert(subscription_id.clone(), subscription);
        self.by_agent
            .entry(agent_id.to_string())
            .or_default()
            .insert(subscription_id.clone());
        Ok(subscription_id)
    }

    /// Removes a subscription by id. Returns false (no state change) if it
    /// didn't exist, satisfying the no-op-unsubscribe invariant.
    pub fn remove(&self, subscription_id: &str) -> bool {
        match self.by_id.remove(subscription_id) {
            Some((_, subscription)) => {
                if let Some(mut owned) = self.by_agent.get_mut(&subscription.agent_id) {
                    owned.remove(subscription_id);
                }
                true
            }
            None => false,
        }
    }

    /// Removes every subscription owned by `agent_id`, used when an agent
    /// unregisters. Returns the count removed.
    pub fn remove_for_agent(&self, agent_id: &str) -> usize {
        let Some((_, owned)) = self.by_agent.remove(agent_id) else {
            return 0;
        };
        for subscription_id in &owned {
            self.by_id.remove(subscription_id);
        }
        owned.len()
    }

    /// Yields every active subscription matching `event`, given a closure
    /// resolving an agent's current channel membership. Deterministic and
    /// side-effect-free per the contract in `SPEC_FULL.md`.
    pub fn matching<'a>(
        &'a self,
        event: &'a Event,
        channels_of: impl Fn(&str) -> BTreeSet<String> + 'a,
    ) -> impl Iterator<Item = Subscription> + 'a {
        self.by_id.iter().filter_map(move |entry| {
            let subscription = entry.value();
            let channels = channels_of(&subscription.agent_id);
            if subscription.matches_event(event, &channels) {
                Some(subscription.clone())
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn for_agent(&self, agent_id: &str) -> Vec<Subscription> {
        self.by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).map(|s| s.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn channels_empty(_: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn matches_exact_and_wildcard_patterns() {
        let index = SubscriptionIndex::new();
        index
            .add(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["agent.direct_message.sent".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        let event = Event::builder("agent.direct_message.sent", "agent:a")
            .destination("agent:b")
            .build()
            .unwrap();
        let matches: Vec<_> = index.matching(&event, channels_empty).collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].agent_id, "agent:b");
    }

    #[test]
    fn prefix_pattern_matches_subtree() {
        let index = SubscriptionIndex::new();
        index
            .add(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["channel.*".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        let mut channels = BTreeSet::new();
        channels.insert("#general".to_string());
        let event = Event::builder("channel.message.posted", "agent:a")
            .channel("#general")
            .build()
            .unwrap();
        let matches: Vec<_> = index.matching(&event, |_| channels.clone()).collect();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn visibility_excludes_non_member_from_channel_event() {
        let index = SubscriptionIndex::new();
        index
            .add(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["channel.*".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        let event = Event::builder("channel.message.posted", "agent:a")
            .channel("#general")
            .build()
            .unwrap();
        let matches: Vec<_> = index.matching(&event, channels_empty).collect();
        assert!(matches.is_empty());
    }

    #[test]
    fn remove_for_agent_drops_all_their_subscriptions() {
        let index = SubscriptionIndex::new();
        index
            .add(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["x.*".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(index.remove_for_agent("agent:b"), 1);
        assert!(index.is_empty());
        assert_eq!(index.remove_for_agent("agent:b"), 0);
    }

    #[test]
    fn removing_unknown_subscription_is_a_no_op() {
        let index = SubscriptionIndex::new();
        assert!(!index.remove("does-not-exist"));
        assert!(index.is_empty());
    }

    #[test]
    fn mod_filter_restricts_matches() {
        let index = SubscriptionIndex::new();
        index
            .add(
                "agent:b",
                SubscriptionRequest {
                    event_patterns: vec!["*".to_string()],
                    mod_filter: Some("openagents.mods.project.default".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let event = Event::builder("project.creation.requested", "agent:a")
            .visibility(crate::event::Visibility::Public)
            .relevant_mod("openagents.mods.other")
            .build()
            .unwrap();
        let matches: Vec<_> = index.matching(&event, channels_empty).collect();
        assert!(matches.is_empty());
    }
}
