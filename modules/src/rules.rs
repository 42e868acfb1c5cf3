//! Rule scripts
//!
//! A rules script is an ordered list of match/action pairs read from the
//! script settings:
//!
//! ```toml
//! [[users.scripts]]
//! name = "bots"
//! type = "rules"
//!
//! [[users.scripts.settings.rules]]
//! direction = "inbound"
//! sender = "(?i)^.*bot$"
//! set_network = "archive"
//! ```
//!
//! Every rule whose conditions all hold is applied in order, unless an
//! earlier matching rule has `stop = true`.

use ircbnc_core::{Direction, Error, Event, Hook, MessageKind, Result, ScriptConfig};
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

/// Hook type name
pub const RULES: &str = "rules";

#[derive(Debug, Default, Deserialize)]
struct RulesSettings {
    #[serde(default)]
    rules: Vec<RuleSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSettings {
    direction: Option<Direction>,
    command: Option<String>,
    channel: Option<String>,
    sender: Option<String>,
    body: Option<String>,
    #[serde(default)]
    cancel: bool,
    #[serde(rename = "set_network")]
    network: Option<String>,
    set_channel: Option<String>,
    set_command: Option<String>,
    replace: Option<String>,
    #[serde(default)]
    with: String,
    #[serde(default)]
    stop: bool,
}

/// Conditions a message has to meet
#[derive(Debug, Default)]
pub struct Matcher {
    pub direction: Option<Direction>,
    pub command: Option<MessageKind>,
    /// Compared without regard to case
    pub channel: Option<String>,
    pub sender: Option<Regex>,
    pub body: Option<Regex>,
}

impl Matcher {
    pub fn matches(&self, event: &Event) -> bool {
        let message = &event.message;
        if self.direction.map_or(false, |d| d != event.direction) {
            return false;
        }
        if let Some(command) = self.command {
            if message.command != Some(command) {
                return false;
            }
        }
        if let Some(ref channel) = self.channel {
            if !channel.eq_ignore_ascii_case(&message.channel) {
                return false;
            }
        }
        if let Some(ref sender) = self.sender {
            if !sender.is_match(&message.sender) {
                return false;
            }
        }
        if let Some(ref body) = self.body {
            if !body.is_match(&message.body) {
                return false;
            }
        }
        true
    }
}

/// What to do with a matching message
#[derive(Debug)]
pub enum Action {
    Cancel,
    SetNetwork(String),
    SetChannel(String),
    /// `None` neuters the message
    SetCommand(Option<MessageKind>),
    Replace { pattern: Regex, with: String },
}

impl Action {
    fn apply(&self, event: &mut Event) {
        match self {
            Action::Cancel => event.cancel(),
            Action::SetNetwork(network) => event.message.network = network.clone(),
            Action::SetChannel(channel) => event.message.channel = channel.clone(),
            Action::SetCommand(command) => event.message.command = *command,
            Action::Replace { pattern, with } => {
                let replaced = pattern.replace_all(&event.message.body, with.as_str()).into_owned();
                event.message.body = replaced;
            }
        }
    }
}

#[derive(Debug)]
pub struct Rule {
    pub matcher: Matcher,
    pub actions: Vec<Action>,
    /// Skip the remaining rules once this one matched
    pub stop: bool,
}

/// Hook applying a list of rules
#[derive(Debug, Default)]
pub struct RulesHook {
    rules: Vec<Rule>,
}

impl RulesHook {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Compile the rules of a script description
    pub fn from_config(config: &ScriptConfig) -> Result<Self> {
        let settings: RulesSettings = toml::Value::Table(config.settings.clone())
            .try_into()
            .map_err(|e| Error::Hook(format!("Invalid settings for script {}: {}", config.name, e)))?;

        let mut rules = Vec::with_capacity(settings.rules.len());
        for (index, rule) in settings.rules.into_iter().enumerate() {
            let rule = compile(rule).map_err(|e| Error::Hook(format!("Script {} rule {}: {}", config.name, index + 1, e)))?;
            rules.push(rule);
        }
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

fn compile(settings: RuleSettings) -> std::result::Result<Rule, String> {
    let regex = |pattern: &str| Regex::new(pattern).map_err(|e| e.to_string());
    let command = |name: &str| name.parse::<MessageKind>().map_err(|e| e.to_string());

    let matcher = Matcher {
        direction: settings.direction,
        command: settings.command.as_deref().map(command).transpose()?,
        channel: settings.channel,
        sender: settings.sender.as_deref().map(regex).transpose()?,
        body: settings.body.as_deref().map(regex).transpose()?,
    };

    let mut actions = Vec::new();
    if let Some(pattern) = settings.replace {
        actions.push(Action::Replace {
            pattern: regex(&pattern)?,
            with: settings.with,
        });
    }
    if let Some(channel) = settings.set_channel {
        actions.push(Action::SetChannel(channel));
    }
    if let Some(name) = settings.set_command {
        let kind = if name.is_empty() { None } else { Some(command(&name)?) };
        actions.push(Action::SetCommand(kind));
    }
    if let Some(network) = settings.network {
        actions.push(Action::SetNetwork(network));
    }
    if settings.cancel {
        actions.push(Action::Cancel);
    }
    if actions.is_empty() {
        return Err("rule has no action".to_string());
    }

    Ok(Rule {
        matcher,
        actions,
        stop: settings.stop,
    })
}

impl Hook for RulesHook {
    fn name(&self) -> &str {
        RULES
    }

    fn run(&self, event: &mut Event) -> Result<()> {
        for rule in &self.rules {
            if !rule.matcher.matches(event) {
                continue;
            }
            trace!(network = %event.session.network, channel = %event.message.channel, "Rule matched");
            for action in &rule.actions {
                action.apply(event);
            }
            if rule.stop || event.cancelled {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ircbnc_core::{Message, SessionInfo};

    fn script(settings: &str) -> ScriptConfig {
        let mut config = ScriptConfig::new("test", RULES);
        config.settings = settings.parse::<toml::Table>().unwrap();
        config
    }

    fn event(direction: Direction, channel: &str, sender: &str, body: &str) -> Event {
        Event::new(
            Message::new("libera", channel, sender, MessageKind::Privmsg, body),
            direction,
            SessionInfo {
                owner: "alice".to_string(),
                network: "libera".to_string(),
                nick: "alice".to_string(),
            },
        )
    }

    #[test]
    fn test_cancel_by_sender() {
        let hook = RulesHook::from_config(&script(
            r#"
            [[rules]]
            sender = "^spam"
            cancel = true
            "#,
        ))
        .unwrap();

        let mut spam = event(Direction::Inbound, "#rust", "spambot", "buy now");
        hook.run(&mut spam).unwrap();
        assert!(spam.cancelled);

        let mut fine = event(Direction::Inbound, "#rust", "bob", "hello");
        hook.run(&mut fine).unwrap();
        assert!(!fine.cancelled);
    }

    #[test]
    fn test_direction_and_channel_conditions() {
        let hook = RulesHook::from_config(&script(
            r##"
            [[rules]]
            direction = "outbound"
            channel = "#Secret"
            set_channel = "#public"
            "##,
        ))
        .unwrap();

        let mut inbound = event(Direction::Inbound, "#secret", "bob", "hi");
        hook.run(&mut inbound).unwrap();
        assert_eq!(inbound.message.channel, "#secret");

        let mut outbound = event(Direction::Outbound, "#secret", "alice", "hi");
        hook.run(&mut outbound).unwrap();
        assert_eq!(outbound.message.channel, "#public");
    }

    #[test]
    fn test_replace_and_command() {
        let hook = RulesHook::from_config(&script(
            r#"
            [[rules]]
            command = "privmsg"
            replace = "(?i)password: \\S+"
            with = "password: ***"
            set_command = "notice"
            "#,
        ))
        .unwrap();

        let mut e = event(Direction::Outbound, "#rust", "alice", "my password: hunter2 ok");
        hook.run(&mut e).unwrap();
        assert_eq!(e.message.body, "my password: *** ok");
        assert_eq!(e.message.command, Some(MessageKind::Notice));
    }

    #[test]
    fn test_empty_command_neuters() {
        let hook = RulesHook::from_config(&script(
            r#"
            [[rules]]
            body = "^!"
            set_command = ""
            "#,
        ))
        .unwrap();

        let mut e = event(Direction::Inbound, "#rust", "bob", "!help");
        hook.run(&mut e).unwrap();
        assert_eq!(e.message.command, None);
        assert!(!e.cancelled);
    }

    #[test]
    fn test_set_network_and_stop() {
        let hook = RulesHook::from_config(&script(
            r#"
            [[rules]]
            sender = "bot$"
            set_network = "archive"
            stop = true

            [[rules]]
            cancel = true
            "#,
        ))
        .unwrap();

        let mut bot = event(Direction::Inbound, "#rust", "newsbot", "headline");
        hook.run(&mut bot).unwrap();
        assert_eq!(bot.message.network, "archive");
        assert!(!bot.cancelled);

        let mut other = event(Direction::Inbound, "#rust", "bob", "hello");
        hook.run(&mut other).unwrap();
        assert!(other.cancelled);
    }

    #[test]
    fn test_invalid_settings() {
        let bad_regex = script("[[rules]]\nsender = \"(\"\ncancel = true\n");
        assert!(matches!(RulesHook::from_config(&bad_regex), Err(Error::Hook(_))));

        let no_action = script("[[rules]]\nsender = \"bob\"\n");
        assert!(RulesHook::from_config(&no_action).is_err());

        let bad_command = script("[[rules]]\ncommand = \"shout\"\ncancel = true\n");
        assert!(RulesHook::from_config(&bad_command).is_err());

        let unknown_field = script("[[rules]]\ncancle = true\n");
        assert!(RulesHook::from_config(&unknown_field).is_err());
    }

    #[test]
    fn test_empty_settings() {
        let hook = RulesHook::from_config(&ScriptConfig::new("noop", RULES)).unwrap();
        assert!(hook.rules().is_empty());
    }
}
