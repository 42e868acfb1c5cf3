//! Channel mode tracking

use crate::userlist::Privilege;
use serde::{Deserialize, Serialize};

/// A channel mode and its target.
///
/// An empty target marks a channel-wide flag; otherwise the target is the
/// member nickname the mode applies to. Member privilege modes are stored as
/// their prefix rune (`@` rather than `o`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    pub mode: char,
    #[serde(default)]
    pub target: String,
}

/// Set of (mode, target) pairs for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeList {
    modes: Vec<Mode>,
}

/// One parsed change out of a MODE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub adding: bool,
    pub mode: char,
    pub argument: Option<String>,
}

/// Channel modes that always take an argument
const LIST_MODES: &[char] = &['b', 'e', 'I', 'k'];
/// Channel modes that take an argument only when set
const SET_ONLY_MODES: &[char] = &['l', 'f', 'j'];

impl ModeList {
    /// Create an empty mode list
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored modes
    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    /// Number of stored modes
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether no modes are stored
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Check for an exact (mode, target) pair
    pub fn has_mode(&self, mode: char, target: &str) -> bool {
        self.modes.iter().any(|m| m.mode == mode && m.target == target)
    }

    /// Add a pair unless already present
    pub fn add_mode(&mut self, mode: char, target: &str) {
        if !self.has_mode(mode, target) {
            self.modes.push(Mode {
                mode,
                target: target.to_string(),
            });
        }
    }

    /// Remove a pair if present
    pub fn remove_mode(&mut self, mode: char, target: &str) {
        self.modes.retain(|m| !(m.mode == mode && m.target == target));
    }

    /// Highest privilege prefix any mode grants the member
    pub fn prefix_of(&self, user: &str) -> Option<char> {
        self.privilege_of(user).prefix()
    }

    /// Highest privilege any mode grants the member
    pub fn privilege_of(&self, user: &str) -> Privilege {
        self.modes
            .iter()
            .filter(|m| m.target == user)
            .map(|m| Privilege::from_mode(m.mode))
            .max()
            .unwrap_or_default()
    }

    /// Drop every mode targeting a member
    pub fn remove_target(&mut self, user: &str) {
        self.modes.retain(|m| m.target != user);
    }

    /// Move every mode from one member nickname to another
    pub fn rename_target(&mut self, old: &str, new: &str) {
        for mode in self.modes.iter_mut().filter(|m| m.target == old) {
            mode.target = new.to_string();
        }
        // A rename onto an existing target may have produced duplicates
        let mut seen = Vec::with_capacity(self.modes.len());
        self.modes.retain(|m| {
            if seen.contains(m) {
                false
            } else {
                seen.push(m.clone());
                true
            }
        });
    }

    /// Channel-wide flags as a `+abc` string
    pub fn flags_string(&self) -> String {
        let mut flags: Vec<char> = self
            .modes
            .iter()
            .filter(|m| m.target.is_empty())
            .map(|m| m.mode)
            .collect();
        flags.sort_unstable();
        flags.dedup();
        format!("+{}", flags.into_iter().collect::<String>())
    }

    /// Apply a parsed change set, returning the members whose privilege moved
    pub fn apply(&mut self, changes: &[ModeChange]) -> Vec<String> {
        let mut touched = Vec::new();
        for change in changes {
            let is_member_mode = Privilege::from_mode(change.mode) != Privilege::None;
            let (mode, target) = if is_member_mode {
                let Some(target) = change.argument.clone() else {
                    continue;
                };
                let prefix = Privilege::from_mode(change.mode).prefix().unwrap_or(change.mode);
                (prefix, target)
            } else if LIST_MODES.contains(&change.mode) {
                // Ban/exception/invite lists and keys are not tracked
                continue;
            } else {
                (change.mode, String::new())
            };

            if change.adding {
                self.add_mode(mode, &target);
            } else {
                self.remove_mode(mode, &target);
            }

            if is_member_mode && !target.is_empty() && !touched.contains(&target) {
                touched.push(target);
            }
        }
        touched
    }
}

/// Parse a channel MODE string and its arguments into individual changes
pub fn parse_mode_changes(modes: &str, arguments: &[String]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut args = arguments.iter();
    let mut adding = true;

    for mode in modes.chars() {
        match mode {
            '+' => adding = true,
            '-' => adding = false,
            mode => {
                let takes_argument = Privilege::from_mode(mode) != Privilege::None
                    || LIST_MODES.contains(&mode)
                    || (adding && SET_ONLY_MODES.contains(&mode));
                let argument = if takes_argument {
                    args.next().cloned()
                } else {
                    None
                };
                changes.push(ModeChange {
                    adding,
                    mode,
                    argument,
                });
            }
        }
    }

    changes
}
