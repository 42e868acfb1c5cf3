//! Hook scripts run over every message passing through a session
//!
//! Hooks are attached either to a single network session or to the user (global
//! scripts). For each pipeline pass the session scripts run first, then the
//! global ones, in the order they were attached.

use crate::message::Message;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Which way a message is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the network towards the user
    Inbound,
    /// From the user towards the network
    Outbound,
}

/// Read-only view of the session a hook runs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub owner: String,
    pub network: String,
    pub nick: String,
}

/// A message wrapped for one pass through the hook chain
#[derive(Debug, Clone)]
pub struct Event {
    pub message: Message,
    pub cancelled: bool,
    pub direction: Direction,
    pub session: SessionInfo,
}

impl Event {
    /// Wrap a message
    pub fn new(message: Message, direction: Direction, session: SessionInfo) -> Self {
        Self {
            message,
            cancelled: false,
            direction,
            session,
        }
    }

    /// Cancel the message; it will not be committed or dispatched
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// A compiled hook.
///
/// Hooks run synchronously on the session's task and must not block for
/// long; a slow hook delays only its own session.
pub trait Hook: Send + Sync {
    /// Hook type name
    fn name(&self) -> &str;

    /// Inspect and possibly mutate, cancel or redirect the event
    fn run(&self, event: &mut Event) -> Result<()>;
}

/// Persisted description of an attached script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Unique name; attaching a script with an existing name replaces it
    pub name: String,
    /// Script type understood by the hook factory
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific settings
    #[serde(default)]
    pub settings: toml::Table,
}

impl ScriptConfig {
    /// Create a script description without settings
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            settings: toml::Table::new(),
        }
    }
}

/// An attached script: its description plus the compiled hook
#[derive(Clone)]
pub struct Script {
    pub config: ScriptConfig,
    pub hook: Arc<dyn Hook>,
}

impl Script {
    /// Pair a description with a compiled hook
    pub fn new(config: ScriptConfig, hook: Arc<dyn Hook>) -> Self {
        Self { config, hook }
    }

    /// Script name
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.config.name)
            .field("type", &self.config.kind)
            .finish()
    }
}

/// Builds hooks from script descriptions
pub trait HookFactory: Send + Sync {
    /// Compile a script description
    fn build(&self, config: &ScriptConfig) -> Result<Arc<dyn Hook>>;

    /// Compile a description into an attachable script
    fn script(&self, config: ScriptConfig) -> Result<Script> {
        let hook = self.build(&config)?;
        Ok(Script::new(config, hook))
    }
}

/// Factory that knows no script types
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl HookFactory for NoHooks {
    fn build(&self, config: &ScriptConfig) -> Result<Arc<dyn Hook>> {
        Err(Error::Hook(format!("Unknown script type: {}", config.kind)))
    }
}

/// How a pass through the chain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every hook ran; check `Event::cancelled`
    Completed,
    /// A hook moved the message to another configured network
    Redirected(String),
}

/// Insert a script, replacing one with the same name. Returns whether it was new.
pub fn upsert_script(scripts: &mut Vec<Script>, script: Script) -> bool {
    match scripts.iter_mut().find(|s| s.name() == script.name()) {
        Some(existing) => {
            *existing = script;
            false
        }
        None => {
            scripts.push(script);
            true
        }
    }
}

/// Remove a script by name. Returns whether one was removed.
pub fn remove_script(scripts: &mut Vec<Script>, name: &str) -> bool {
    let before = scripts.len();
    scripts.retain(|s| s.name() != name);
    scripts.len() != before
}

/// Run session scripts then global scripts over an event.
///
/// A hook error is logged and the chain moves on. After each hook the
/// network field is checked: a network the owner has aborts the chain with
/// [`ChainOutcome::Redirected`]; any other value is reset to the session's
/// own network.
pub fn run_chain<'a, I>(scripts: I, event: &mut Event, has_network: impl Fn(&str) -> bool) -> ChainOutcome
where
    I: IntoIterator<Item = &'a Script>,
{
    for script in scripts {
        if let Err(e) = script.hook.run(event) {
            warn!(
                owner = %event.session.owner,
                network = %event.session.network,
                script = %script.name(),
                "Hook failed: {}",
                e
            );
        }

        if event.message.network != event.session.network {
            if has_network(&event.message.network) {
                trace!(
                    from = %event.session.network,
                    to = %event.message.network,
                    "Message redirected by {}",
                    script.name()
                );
                return ChainOutcome::Redirected(event.message.network.clone());
            }
            event.message.network = event.session.network.clone();
        }
    }
    ChainOutcome::Completed
}
