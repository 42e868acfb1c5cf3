//! Channel member roster with privilege ordering
//!
//! Servers deliver member lists in arbitrary batches and with a single
//! privilege prefix rune glued to each nickname (`@dave`, `+erin`). The roster
//! keeps the privilege and the bare name as separate fields and only renders
//! the prefix when the list is presented to a client.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Channel privilege levels, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    #[default]
    None = 0,
    Voice = 1,
    HalfOp = 2,
    Operator = 3,
    Admin = 4,
    Owner = 5,
}

impl Privilege {
    /// Privilege for a roster prefix rune, `None` for anything else
    pub fn from_prefix(prefix: char) -> Self {
        match prefix {
            '~' => Privilege::Owner,
            '&' => Privilege::Admin,
            '@' => Privilege::Operator,
            '%' => Privilege::HalfOp,
            '+' => Privilege::Voice,
            _ => Privilege::None,
        }
    }

    /// Privilege for a channel mode, given either as a prefix rune or a mode letter
    pub fn from_mode(mode: char) -> Self {
        match mode {
            'q' => Privilege::Owner,
            'a' => Privilege::Admin,
            'o' => Privilege::Operator,
            'h' => Privilege::HalfOp,
            'v' => Privilege::Voice,
            other => Privilege::from_prefix(other),
        }
    }

    /// Privilege for a numeric level, levels above 5 clamp to owner
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Privilege::None,
            1 => Privilege::Voice,
            2 => Privilege::HalfOp,
            3 => Privilege::Operator,
            4 => Privilege::Admin,
            _ => Privilege::Owner,
        }
    }

    /// Numeric level, 0 for no privilege
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Prefix rune shown in front of the member name
    pub fn prefix(self) -> Option<char> {
        match self {
            Privilege::Owner => Some('~'),
            Privilege::Admin => Some('&'),
            Privilege::Operator => Some('@'),
            Privilege::HalfOp => Some('%'),
            Privilege::Voice => Some('+'),
            Privilege::None => None,
        }
    }

    /// Human readable name of the level
    pub fn name(self) -> &'static str {
        match self {
            Privilege::Owner => "owner",
            Privilege::Admin => "admin",
            Privilege::Operator => "operator",
            Privilege::HalfOp => "half-op",
            Privilege::Voice => "voice",
            Privilege::None => "",
        }
    }
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Member {
    /// Privilege in the channel
    pub privilege: Privilege,
    /// Bare nickname
    pub name: String,
}

impl Member {
    /// Create a member entry
    pub fn new(name: impl Into<String>, privilege: Privilege) -> Self {
        Self {
            privilege,
            name: name.into(),
        }
    }

    /// Parse a roster entry that may carry one leading prefix rune
    pub fn parse(entry: &str) -> Self {
        let mut chars = entry.chars();
        match chars.next().map(Privilege::from_prefix) {
            Some(privilege) if privilege != Privilege::None => Self::new(chars.as_str(), privilege),
            _ => Self::new(entry, Privilege::None),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.privilege.prefix() {
            Some(prefix) => write!(f, "{}{}", prefix, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<String> for Member {
    fn from(entry: String) -> Self {
        Member::parse(&entry)
    }
}

impl From<Member> for String {
    fn from(member: Member) -> Self {
        member.to_string()
    }
}

impl Ord for Member {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher privilege first, then case-insensitive text
        other
            .privilege
            .cmp(&self.privilege)
            .then_with(|| self.to_string().to_lowercase().cmp(&other.to_string().to_lowercase()))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered roster of one channel, at most one entry per bare name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserList {
    members: Vec<Member>,
}

impl UserList {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from raw entries, merging them in order
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        list.merge(names);
        list
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Entries in their current order
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Entries rendered with their prefix runes
    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(Member::to_string).collect()
    }

    /// Find an entry by bare name or by its exact prefixed form.
    ///
    /// A bare name matches regardless of the stored privilege; a prefixed
    /// name only matches an entry holding that same privilege.
    pub fn contains(&self, name: &str) -> Option<usize> {
        let wanted = Member::parse(name);
        self.members.iter().position(|member| {
            member.name == wanted.name
                && (wanted.privilege == Privilege::None || member.privilege == wanted.privilege)
        })
    }

    /// Privilege of the member with the given bare name
    pub fn privilege_of(&self, name: &str) -> Option<Privilege> {
        self.position_of(name).map(|index| self.members[index].privilege)
    }

    /// Replace the prefix of an entry in place.
    ///
    /// An unknown prefix rune (or none) clears the privilege. Returns whether
    /// an entry for the name existed; the roster is untouched otherwise.
    pub fn set_prefix(&mut self, name: &str, prefix: Option<char>) -> bool {
        let privilege = prefix.map(Privilege::from_prefix).unwrap_or_default();
        self.set_privilege(name, privilege)
    }

    /// Replace the privilege of an entry in place
    pub fn set_privilege(&mut self, name: &str, privilege: Privilege) -> bool {
        let bare = Member::parse(name).name;
        match self.position_of(&bare) {
            Some(index) => {
                self.members[index].privilege = privilege;
                true
            }
            None => false,
        }
    }

    /// Append entries not already on the roster.
    ///
    /// Incoming order is kept, empty strings are skipped and entries whose
    /// bare name is already present are left exactly as they are.
    pub fn merge<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if name.is_empty() {
                continue;
            }
            let member = Member::parse(name);
            if member.name.is_empty() || self.position_of(&member.name).is_some() {
                continue;
            }
            self.members.push(member);
        }
    }

    /// Remove a member by bare or prefixed name
    pub fn remove(&mut self, name: &str) -> bool {
        let bare = Member::parse(name).name;
        match self.position_of(&bare) {
            Some(index) => {
                self.members.remove(index);
                true
            }
            None => false,
        }
    }

    /// Rename a member, keeping its privilege and position
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let bare = Member::parse(old).name;
        match self.position_of(&bare) {
            Some(index) => {
                self.members[index].name = new.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.members.clear();
    }

    /// Whether entry `i` sorts before entry `j`
    pub fn less(&self, i: usize, j: usize) -> bool {
        self.members[i] < self.members[j]
    }

    /// Sort by privilege, then case-insensitively by name
    pub fn sort(&mut self) {
        self.members.sort();
    }

    fn position_of(&self, bare: &str) -> Option<usize> {
        self.members.iter().position(|member| member.name == bare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_ordering_beats_insertion_order() {
        let mut list = UserList::from_names(["+erin", "dave", "~owner", "@bob", "%hal", "&adm"]);
        list.sort();
        assert_eq!(list.names(), vec!["~owner", "&adm", "@bob", "%hal", "+erin", "dave"]);

        let mut reversed = UserList::from_names(["dave", "%hal", "&adm", "@bob", "~owner", "+erin"]);
        reversed.sort();
        assert_eq!(reversed.names(), list.names());
    }

    #[test]
    fn test_equal_level_sorts_case_insensitively() {
        let mut list = UserList::from_names(["@Zed", "@alice", "@Bob", "carol", "Alan"]);
        list.sort();
        assert_eq!(list.names(), vec!["@alice", "@Bob", "@Zed", "Alan", "carol"]);
        assert!(list.less(0, 1));
        assert!(!list.less(4, 3));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let incoming = ["@bob", "carol", "", "dave", "carol"];
        let mut once = UserList::new();
        once.merge(incoming);
        let mut twice = once.clone();
        twice.merge(incoming);
        assert_eq!(once, twice);
        assert_eq!(once.names(), vec!["@bob", "carol", "dave"]);
    }

    #[test]
    fn test_merge_leaves_existing_entries_untouched() {
        let mut list = UserList::from_names(["dave", "@bob"]);
        list.merge(["+dave", "bob", "erin"]);
        assert_eq!(list.names(), vec!["dave", "@bob", "erin"]);
    }

    #[test]
    fn test_contains_matches_bare_or_exact_prefixed() {
        let list = UserList::from_names(["alice", "@bob"]);
        assert_eq!(list.contains("bob"), Some(1));
        assert_eq!(list.contains("@bob"), Some(1));
        assert_eq!(list.contains("+bob"), None);
        assert_eq!(list.contains("alice"), Some(0));
        assert_eq!(list.contains("mallory"), None);
    }

    #[test]
    fn test_set_prefix() {
        let mut list = UserList::from_names(["alice", "@bob"]);
        assert!(list.set_prefix("alice", Some('+')));
        assert!(list.set_prefix("@bob", Some('x')));
        assert_eq!(list.names(), vec!["+alice", "bob"]);
        assert!(list.set_prefix("bob", None));
        assert_eq!(list.privilege_of("bob"), Some(Privilege::None));
    }

    #[test]
    fn test_set_prefix_missing_name_is_noop() {
        let mut list = UserList::from_names(["alice", "@bob"]);
        let before = list.clone();
        assert!(!list.set_prefix("mallory", Some('@')));
        assert_eq!(list, before);
    }

    #[test]
    fn test_remove_and_rename() {
        let mut list = UserList::from_names(["@alice", "bob"]);
        assert!(list.rename("alice", "alicia"));
        assert_eq!(list.names(), vec!["@alicia", "bob"]);
        assert!(list.remove("@alicia"));
        assert!(!list.remove("alicia"));
        assert_eq!(list.names(), vec!["bob"]);
    }

    #[test]
    fn test_privilege_mapping() {
        assert_eq!(Privilege::from_mode('o'), Privilege::Operator);
        assert_eq!(Privilege::from_mode('@'), Privilege::Operator);
        assert_eq!(Privilege::from_mode('k'), Privilege::None);
        assert_eq!(Privilege::from_level(5).prefix(), Some('~'));
        assert_eq!(Privilege::HalfOp.name(), "half-op");
        assert_eq!(Privilege::Voice.level(), 1);
    }

    #[test]
    fn test_serializes_as_prefixed_strings() {
        let list = UserList::from_names(["@bob", "carol"]);
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["@bob","carol"]"#);
        let back: UserList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, list);
    }
}
