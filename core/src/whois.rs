//! WHOIS reply aggregation
//!
//! A WHOIS answer arrives as several numeric replies followed by a terminating
//! `318`. Each partial reply fills in the fields it owns on a pending record
//! keyed by nickname; the session reads and drops the record once the
//! terminator is seen.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Accumulated identity information for one nickname
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisData {
    pub nick: String,
    pub user: String,
    pub host: String,
    #[serde(rename = "realname")]
    pub real_name: String,
    pub server: String,
    #[serde(rename = "serverinfo")]
    pub server_info: String,
    /// Channel name to the member's prefix string in it
    pub channels: BTreeMap<String, String>,
    /// Away message, when the user is away
    pub away: Option<String>,
    /// Idle time in seconds
    pub idle: u64,
    /// Sign-on time (unix seconds), zero when unknown
    pub signon: i64,
    #[serde(rename = "isoperator")]
    pub operator: bool,
    #[serde(rename = "issecure")]
    pub secure: bool,
}

impl WhoisData {
    /// Create an empty record for a nickname
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            ..Self::default()
        }
    }

    /// Apply a 311 user reply
    pub fn set_user_info(&mut self, user: &str, host: &str, real_name: &str) {
        self.user = user.to_string();
        self.host = host.to_string();
        self.real_name = real_name.to_string();
    }

    /// Apply a 312 server reply
    pub fn set_server(&mut self, server: &str, info: &str) {
        self.server = server.to_string();
        self.server_info = info.to_string();
    }

    /// Apply a 317 idle reply
    pub fn set_idle(&mut self, idle: u64, signon: i64) {
        self.idle = idle;
        self.signon = signon;
    }

    /// Apply one 319 channel list, entries like `@#rust +#chat #lounge`
    pub fn add_channels(&mut self, list: &str) {
        for entry in list.split_whitespace() {
            let (prefixes, channel) = split_member_prefix(entry);
            if !channel.is_empty() {
                self.channels.insert(channel.to_string(), prefixes.to_string());
            }
        }
    }
}

/// Split `@+#chan` into its privilege runes and the channel name.
///
/// `&` and `+` are both privilege runes and channel types; they count as a
/// rune only when another channel type character follows.
fn split_member_prefix(entry: &str) -> (&str, &str) {
    for (i, c) in entry.char_indices() {
        match c {
            '~' | '@' | '%' => continue,
            '&' | '+' if entry[i + 1..].starts_with(['#', '&', '!', '+']) => continue,
            _ => return entry.split_at(i),
        }
    }
    (entry, "")
}

/// Pending WHOIS records for one network
#[derive(Debug, Clone, Default)]
pub struct WhoisStore {
    records: HashMap<String, WhoisData>,
}

fn whois_key(nick: &str) -> String {
    nick.to_lowercase()
}

impl WhoisStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record for a nickname, creating a pending one if absent
    pub fn get_whois_data(&mut self, nick: &str) -> &mut WhoisData {
        self.records
            .entry(whois_key(nick))
            .or_insert_with(|| WhoisData::new(nick))
    }

    /// Get the record for a nickname only if one is pending
    pub fn get_whois_data_if_exists(&mut self, nick: &str) -> Option<&mut WhoisData> {
        self.records.get_mut(&whois_key(nick))
    }

    /// Drop the record for a nickname
    pub fn remove_whois_data(&mut self, nick: &str) -> Option<WhoisData> {
        self.records.remove(&whois_key(nick))
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are pending
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create() {
        let mut store = WhoisStore::new();
        assert!(store.get_whois_data_if_exists("carol").is_none());

        store.get_whois_data("carol").set_idle(42, 1_700_000_000);
        assert_eq!(store.get_whois_data("Carol").idle, 42);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_starts_fresh() {
        let mut store = WhoisStore::new();
        store.get_whois_data("carol").set_idle(42, 0);
        let record = store.remove_whois_data("carol").unwrap();
        assert_eq!(record.idle, 42);
        assert_eq!(record.nick, "carol");

        let fresh = store.get_whois_data("carol").clone();
        assert_eq!(fresh, WhoisData::new("carol"));
    }

    #[test]
    fn test_channel_list_parsing() {
        let mut data = WhoisData::new("carol");
        data.add_channels("@#rust +#chat #lounge ~&local @+#both");
        assert_eq!(data.channels.get("#rust").map(String::as_str), Some("@"));
        assert_eq!(data.channels.get("#chat").map(String::as_str), Some("+"));
        assert_eq!(data.channels.get("#lounge").map(String::as_str), Some(""));
        assert_eq!(data.channels.get("&local").map(String::as_str), Some("~"));
        assert_eq!(data.channels.get("#both").map(String::as_str), Some("@+"));
    }
}
