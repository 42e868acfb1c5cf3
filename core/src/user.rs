//! Bouncer users
//!
//! A [`User`] owns its network sessions, the scripts that run on all of them
//! and the sending half of its delivery queue.

use crate::config::{NetworkConfig, UserConfig};
use crate::context::BouncerContext;
use crate::hook::{remove_script, upsert_script, Script, ScriptConfig};
use crate::message::{ClientUpdate, MessageKind};
use crate::session::{NetworkSession, SessionStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One bouncer user
pub struct User {
    name: String,
    email: RwLock<String>,
    /// Sessions in configuration order
    networks: RwLock<Vec<Arc<NetworkSession>>>,
    /// Global scripts, run after each session's own scripts
    scripts: RwLock<Vec<Script>>,
    delivery: mpsc::Sender<ClientUpdate>,
    context: BouncerContext,
    created_at: DateTime<Utc>,
}

impl User {
    /// Create a user without networks.
    ///
    /// Returns the user and the receiving end of its delivery queue.
    pub fn new(name: &str, email: &str, context: BouncerContext) -> (Arc<Self>, mpsc::Receiver<ClientUpdate>) {
        let (delivery, updates) = mpsc::channel(context.settings.delivery_buffer.max(1));
        let user = Arc::new(Self {
            name: name.to_string(),
            email: RwLock::new(email.to_string()),
            networks: RwLock::new(Vec::new()),
            scripts: RwLock::new(Vec::new()),
            delivery,
            context,
            created_at: Utc::now(),
        });
        (user, updates)
    }

    /// Create a user with its scripts and networks from configuration
    pub fn from_config(config: &UserConfig, context: BouncerContext) -> Result<(Arc<Self>, mpsc::Receiver<ClientUpdate>)> {
        let (user, updates) = Self::new(&config.name, &config.email, context);
        for script in &config.scripts {
            user.add_global_script(script.clone())?;
        }
        for network in &config.networks {
            user.add_network(network.clone())?;
        }
        Ok((user, updates))
    }

    /// Login name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> String {
        self.email.read().clone()
    }

    pub fn set_email(&self, email: &str) {
        *self.email.write() = email.to_string();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Look up a session by network name, ignoring case
    pub fn get_network(&self, name: &str) -> Option<Arc<NetworkSession>> {
        self.networks
            .read()
            .iter()
            .find(|n| n.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// All sessions in configuration order
    pub fn networks(&self) -> Vec<Arc<NetworkSession>> {
        self.networks.read().clone()
    }

    /// Add a network. The session is created but not opened.
    pub fn add_network(self: &Arc<Self>, config: NetworkConfig) -> Result<Arc<NetworkSession>> {
        if self.get_network(&config.name).is_some() {
            return Err(Error::Network(format!("User {} already has network {}", self.name, config.name)));
        }
        let session = Arc::new(NetworkSession::new(
            config,
            Arc::downgrade(self),
            &self.name,
            self.context.clone(),
        )?);
        self.networks.write().push(session.clone());
        info!(owner = %self.name, network = %session.name(), "Network added");
        Ok(session)
    }

    /// Remove a network, tearing its connection down
    pub async fn remove_network(&self, name: &str) -> bool {
        let removed = {
            let mut networks = self.networks.write();
            let index = networks.iter().position(|n| n.name().eq_ignore_ascii_case(name));
            index.map(|i| networks.remove(i))
        };
        let Some(session) = removed else {
            return false;
        };
        session.mark_removed();
        session.force_disconnect().await;
        info!(owner = %self.name, network = %session.name(), "Network removed");
        true
    }

    /// Snapshot of the global scripts in run order
    pub fn global_scripts(&self) -> Vec<Script> {
        self.scripts.read().clone()
    }

    /// Attach a global script, replacing one with the same name. Returns whether it was new.
    pub fn add_global_script(&self, config: ScriptConfig) -> Result<bool> {
        let script = self.context.hooks.script(config)?;
        Ok(upsert_script(&mut self.scripts.write(), script))
    }

    /// Detach a global script by name
    pub fn remove_global_script(&self, name: &str) -> bool {
        remove_script(&mut self.scripts.write(), name)
    }

    /// Push an update onto the delivery queue, waiting for room
    pub async fn deliver(&self, update: ClientUpdate) {
        if self.delivery.send(update).await.is_err() {
            warn!(owner = %self.name, "Delivery queue closed, update dropped");
        }
    }

    /// Run a command typed by the user on one of their networks
    pub async fn handle_command(&self, network: &str, channel: &str, command: &str, body: &str) -> Result<()> {
        let session = self
            .get_network(network)
            .ok_or_else(|| Error::Network(format!("Unknown network {}", network)))?;
        let kind: MessageKind = command.parse()?;
        session.send_message(channel, kind, body).await
    }

    /// Open every network configured to connect on startup
    pub async fn connect_all(&self) {
        for session in self.networks() {
            let autoconnect = session.state.lock().await.config.autoconnect;
            if !autoconnect || session.status() == SessionStatus::Removed {
                continue;
            }
            if let Err(e) = session.open().await {
                warn!(owner = %self.name, network = %session.name(), "Failed to open network: {}", e);
            }
        }
    }

    /// Gracefully disconnect every network
    pub async fn disconnect_all(&self) {
        for session in self.networks() {
            if let Err(e) = session.disconnect().await {
                warn!(owner = %self.name, network = %session.name(), "Failed to disconnect: {}", e);
            }
        }
    }

    /// Configuration to persist
    pub async fn save(&self) -> UserConfig {
        let mut networks = Vec::new();
        for session in self.networks() {
            networks.push(session.save().await);
        }
        UserConfig {
            name: self.name.clone(),
            email: self.email(),
            scripts: self.scripts.read().iter().map(|s| s.config.clone()).collect(),
            networks,
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("networks", &self.networks.read().len())
            .finish()
    }
}
