//! Per-network channel state
//!
//! A [`ChannelStore`] maps case-insensitive channel names to the derived state
//! the bouncer tracks for them: topic, modes and the member roster.

use crate::modes::ModeList;
use crate::userlist::UserList;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived state of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    /// Network the channel lives on
    pub network: String,
    /// Channel name as the server spelled it
    pub name: String,
    /// Member roster
    #[serde(rename = "userlist")]
    pub users: UserList,
    /// Current topic
    pub topic: String,
    /// Who set the topic
    #[serde(rename = "topicsetby")]
    pub topic_set_by: String,
    /// When the topic was set (unix seconds)
    #[serde(rename = "topicsetat")]
    pub topic_set_at: i64,
    /// Channel and member modes
    pub modes: ModeList,
    /// Set while a NAMES reply sequence is being received
    #[serde(skip)]
    pub receiving_names: bool,
}

impl ChannelData {
    /// Create empty state for a channel
    pub fn new(network: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            name: name.into(),
            users: UserList::new(),
            topic: String::new(),
            topic_set_by: String::new(),
            topic_set_at: 0,
            modes: ModeList::new(),
            receiving_names: false,
        }
    }

    /// Merge one page of a NAMES reply.
    ///
    /// The first page of a sequence replaces the roster; later pages are
    /// merged. Prefixed names also record their privilege as a mode.
    pub fn receive_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.receiving_names {
            self.users.clear();
            self.receiving_names = true;
        }

        let page = UserList::from_names(names);
        for member in page.members() {
            if let Some(prefix) = member.privilege.prefix() {
                self.modes.add_mode(prefix, &member.name);
            }
        }
        self.users.merge(page.names());
    }

    /// Finish a NAMES reply sequence
    pub fn end_names(&mut self) {
        self.receiving_names = false;
        self.refresh_prefixes();
        self.users.sort();
    }

    /// Re-derive every roster prefix from the mode list
    pub fn refresh_prefixes(&mut self) {
        let names: Vec<String> = self.users.members().iter().map(|m| m.name.clone()).collect();
        for name in names {
            if let Some(prefix) = self.modes.prefix_of(&name) {
                self.users.set_prefix(&name, Some(prefix));
            }
        }
    }

    /// Re-derive the roster prefix of one member after a mode change
    pub fn sync_member_prefix(&mut self, name: &str) {
        let prefix = self.modes.prefix_of(name);
        if self.users.set_prefix(name, prefix) {
            self.users.sort();
        }
    }

    /// Record a member joining
    pub fn add_member(&mut self, name: &str) {
        self.users.merge([name]);
        self.users.sort();
    }

    /// Record a member leaving, forgetting their modes
    pub fn remove_member(&mut self, name: &str) -> bool {
        self.modes.remove_target(name);
        self.users.remove(name)
    }

    /// Record a member changing nickname
    pub fn rename_member(&mut self, old: &str, new: &str) -> bool {
        if !self.users.rename(old, new) {
            return false;
        }
        self.modes.rename_target(old, new);
        self.users.sort();
        true
    }

    /// Whether the member is on the roster
    pub fn has_member(&self, name: &str) -> bool {
        self.users.contains(name).is_some()
    }

    /// Set the topic and its metadata
    pub fn set_topic(&mut self, topic: &str, set_by: &str, set_at: i64) {
        self.topic = topic.to_string();
        self.topic_set_by = set_by.to_string();
        self.topic_set_at = set_at;
    }
}

/// Case-insensitive channel map for one network
#[derive(Debug, Clone, Default)]
pub struct ChannelStore {
    network: String,
    channels: HashMap<String, ChannelData>,
}

/// Normalize a channel name into its map key
pub fn channel_key(name: &str) -> String {
    name.to_lowercase()
}

impl ChannelStore {
    /// Create an empty store for a network
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            channels: HashMap::new(),
        }
    }

    /// Network this store belongs to
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Look up a channel
    pub fn get(&self, name: &str) -> Option<&ChannelData> {
        self.channels.get(&channel_key(name))
    }

    /// Look up a channel for mutation
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ChannelData> {
        self.channels.get_mut(&channel_key(name))
    }

    /// Look up a channel, creating empty state for it first if needed
    pub fn get_or_insert(&mut self, name: &str) -> &mut ChannelData {
        let network = self.network.clone();
        self.channels
            .entry(channel_key(name))
            .or_insert_with(|| ChannelData::new(network, name))
    }

    /// Insert or replace channel state.
    ///
    /// State belonging to another network is rejected and the store is left
    /// unchanged; returns whether the value was stored.
    pub fn put(&mut self, data: ChannelData) -> bool {
        if data.network != self.network {
            return false;
        }
        self.channels.insert(channel_key(&data.name), data);
        true
    }

    /// Remove a channel
    pub fn remove(&mut self, name: &str) -> Option<ChannelData> {
        self.channels.remove(&channel_key(name))
    }

    /// Whether the channel is tracked
    pub fn has(&self, name: &str) -> bool {
        self.channels.contains_key(&channel_key(name))
    }

    /// Visit every channel
    pub fn for_each(&self, mut visit: impl FnMut(&ChannelData)) {
        for data in self.channels.values() {
            visit(data);
        }
    }

    /// Iterate over every channel
    pub fn iter(&self) -> impl Iterator<Item = &ChannelData> {
        self.channels.values()
    }

    /// Iterate mutably over every channel
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelData> {
        self.channels.values_mut()
    }

    /// Original-case names of every channel, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.values().map(|c| c.name.clone()).collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    /// Number of tracked channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are tracked
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
