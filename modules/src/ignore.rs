//! Ignore list script
//!
//! Cancels inbound messages whose sender matches one of the configured nick
//! masks. `*` matches any run of characters and `?` a single one; matching
//! ignores case.

use ircbnc_core::{Direction, Error, Event, Hook, Result, ScriptConfig};
use regex::RegexSet;
use serde::Deserialize;
use tracing::debug;

/// Hook type name
pub const IGNORE: &str = "ignore";

#[derive(Debug, Default, Deserialize)]
struct IgnoreSettings {
    #[serde(default)]
    masks: Vec<String>,
}

pub struct IgnoreHook {
    masks: Vec<String>,
    set: RegexSet,
}

impl IgnoreHook {
    pub fn new(masks: Vec<String>) -> Result<Self> {
        let patterns: Vec<String> = masks.iter().map(|m| mask_to_pattern(m)).collect();
        let set = RegexSet::new(&patterns).map_err(|e| Error::Hook(format!("Invalid ignore mask: {}", e)))?;
        Ok(Self { masks, set })
    }

    pub fn from_config(config: &ScriptConfig) -> Result<Self> {
        let settings: IgnoreSettings = toml::Value::Table(config.settings.clone())
            .try_into()
            .map_err(|e| Error::Hook(format!("Invalid settings for script {}: {}", config.name, e)))?;
        Self::new(settings.masks)
    }

    pub fn masks(&self) -> &[String] {
        &self.masks
    }

    /// Whether a nick is on the list
    pub fn is_ignored(&self, nick: &str) -> bool {
        !nick.is_empty() && self.set.is_match(nick)
    }
}

fn mask_to_pattern(mask: &str) -> String {
    let mut pattern = String::from("(?i)^");
    for c in mask.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    pattern
}

impl Hook for IgnoreHook {
    fn name(&self) -> &str {
        IGNORE
    }

    fn run(&self, event: &mut Event) -> Result<()> {
        if event.direction != Direction::Inbound || event.message.own_msg {
            return Ok(());
        }
        if self.is_ignored(&event.message.sender) {
            debug!(network = %event.session.network, sender = %event.message.sender, "Ignoring message");
            event.cancel();
        }
        Ok(())
    }
}

impl std::fmt::Debug for IgnoreHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreHook").field("masks", &self.masks).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ircbnc_core::{Message, MessageKind, SessionInfo};

    fn event(direction: Direction, sender: &str) -> Event {
        Event::new(
            Message::new("libera", "#rust", sender, MessageKind::Privmsg, "hello"),
            direction,
            SessionInfo {
                owner: "alice".to_string(),
                network: "libera".to_string(),
                nick: "alice".to_string(),
            },
        )
    }

    #[test]
    fn test_wildcards() {
        let hook = IgnoreHook::new(vec!["spam*".to_string(), "b?b".to_string(), "[x]".to_string()]).unwrap();
        assert!(hook.is_ignored("spambot"));
        assert!(hook.is_ignored("SPAM"));
        assert!(hook.is_ignored("bob"));
        assert!(!hook.is_ignored("bobby"));
        assert!(hook.is_ignored("[x]"));
        assert!(!hook.is_ignored("x"));
        assert!(!hook.is_ignored(""));
    }

    #[test]
    fn test_only_inbound_is_cancelled() {
        let mut config = ScriptConfig::new("ignore", IGNORE);
        config.settings = "masks = [\"troll\"]".parse::<toml::Table>().unwrap();
        let hook = IgnoreHook::from_config(&config).unwrap();

        let mut inbound = event(Direction::Inbound, "Troll");
        hook.run(&mut inbound).unwrap();
        assert!(inbound.cancelled);

        let mut outbound = event(Direction::Outbound, "troll");
        hook.run(&mut outbound).unwrap();
        assert!(!outbound.cancelled);
    }

    #[test]
    fn test_empty_list() {
        let hook = IgnoreHook::from_config(&ScriptConfig::new("ignore", IGNORE)).unwrap();
        assert!(hook.masks().is_empty());
        let mut e = event(Direction::Inbound, "anyone");
        hook.run(&mut e).unwrap();
        assert!(!e.cancelled);
    }
}
