//! Channel registry: the sole source of truth for agent/channel membership,
//! grounded on the bidirectional topic index in the agent directory and on
//! `Workspace.create_channel`'s create-on-demand lifecycle.

use dashmap::DashMap;
use std::collections::BTreeSet;

/// Named, mutable sets of agent ids. Channels are created on first use by
/// `add_member` and live until explicitly removed (or until they empty out
/// via `remove_member`, at the implementation's discretion — this registry
/// keeps empty channels around since `system.channel.list` should still be
/// able to report a channel that was created but has no members yet).
#[derive(Default)]
pub struct ChannelRegistry {
    members_of: DashMap<String, BTreeSet<String>>,
    channels_of: DashMap<String, BTreeSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty channel. Returns false if it already existed.
    pub fn create_channel(&self, name: &str) -> bool {
        if self.members_of.contains_key(name) {
            return false;
        }
        self.members_of.insert(name.to_string(), BTreeSet::new());
        true
    }

    /// Removes a channel and drops it from every member's reverse index.
    /// Returns false if it didn't exist.
    pub fn remove_channel(&self, name: &str) -> bool {
        let Some((_, members)) = self.members_of.remove(name) else {
            return false;
        };
        for agent_id in members {
            if let Some(mut channels) = self.channels_of.get_mut(&agent_id) {
                channels.remove(name);
            }
        }
        true
    }

    /// Adds `agent_id` to `name`, creating the channel on demand.
    pub fn add_member(&self, name: &str, agent_id: &str) {
        self.members_of
            .entry(name.to_string())
            .or_default()
            .insert(agent_id.to_string());
        self.channels_of
            .entry(agent_id.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Removes `agent_id` from `name`. Returns false if either side of the
    /// membership wasn't present; the channel itself is left in place even
    /// if it becomes empty.
    pub fn remove_member(&self, name: &str, agent_id: &str) -> bool {
        let removed_from_channel = self
            .members_of
            .get_mut(name)
            .map(|mut members| members.remove(agent_id))
            .unwrap_or(false);
        if let Some(mut channels) = self.channels_of.get_mut(agent_id) {
            channels.remove(name);
        }
        removed_from_channel
    }

    /// Removes `agent_id` from every channel it belongs to. Used when an
    /// agent unregisters, to preserve the bidirectional invariant.
    pub fn remove_agent(&self, agent_id: &str) {
        let Some((_, channels)) = self.channels_of.remove(agent_id) else {
            return;
        };
        for channel in channels {
            if let Some(mut members) = self.members_of.get_mut(&channel) {
                members.remove(agent_id);
            }
        }
    }

    pub fn get_members(&self, name: &str) -> BTreeSet<String> {
        self.members_of.get(name).map(|m| m.clone()).unwrap_or_default()
    }

    pub fn get_agent_channels(&self, agent_id: &str) -> BTreeSet<String> {
        self.channels_of
            .get(agent_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.members_of.contains_key(name)
    }

    pub fn list_channels(&self) -> Vec<String> {
        self.members_of.iter().map(|e| e.key().clone()).collect()
    }
}
