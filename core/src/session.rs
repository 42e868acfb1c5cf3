//! Network sessions
//!
//! A [`NetworkSession`] is one (user, network) pair: the protocol connection,
//! the channel and WHOIS state derived from it and the scripts attached to it.
//! All mutation of that state happens under a single async lock, so inbound
//! lines of one session are processed strictly one at a time while different
//! sessions run in parallel.

use crate::channel::{ChannelData, ChannelStore};
use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionEvent};
use crate::context::BouncerContext;
use crate::hook::{remove_script, upsert_script, Script, ScriptConfig, SessionInfo};
use crate::message::{ClientUpdate, ListedChannel, MessageKind};
use crate::protocol::Line;
use crate::user::User;
use crate::whois::{WhoisData, WhoisStore};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Capacity of the queue between a connection and its session
const EVENT_QUEUE: usize = 256;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created from configuration, never opened
    Configured,
    /// Transport opening or registration in progress
    Connecting,
    /// Registered with the server
    Connected,
    /// Transport closed
    Disconnected,
    /// Network entry deleted; the session can not be reopened
    Removed,
}

/// Snapshot of a session's connection settings for clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetData {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tls: bool,
    pub user: String,
    pub realname: String,
    pub nick: String,
    pub connected: bool,
}

/// State guarded by the session lock
pub(crate) struct SessionState {
    /// Connection settings; `nick` tracks the live nickname
    pub(crate) config: NetworkConfig,
    pub(crate) channels: ChannelStore,
    pub(crate) whois: WhoisStore,
    pub(crate) scripts: Vec<Script>,
    /// Result of the last completed LIST
    pub(crate) channel_list: Vec<ListedChannel>,
    /// LIST entries received so far
    pub(crate) pending_list: Option<Vec<ListedChannel>>,
}

impl SessionState {
    /// Whether `name` is our own live nickname
    pub(crate) fn is_own_nick(&self, name: &str) -> bool {
        !name.is_empty() && name.eq_ignore_ascii_case(&self.config.nick)
    }
}

/// Whether a target names a channel rather than a nickname
pub fn is_channel_name(name: &str) -> bool {
    name.starts_with(['#', '&', '!', '+'])
}

/// One live or reconnecting connection of a user
pub struct NetworkSession {
    pub(crate) name: String,
    pub(crate) owner: Weak<User>,
    pub(crate) owner_name: String,
    pub(crate) context: BouncerContext,
    pub(crate) state: Mutex<SessionState>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    status: RwLock<SessionStatus>,
    /// Local port registered with the ident registry, 0 when none
    ident_port: AtomicU16,
    /// Bumped on every open so stale event loops stop
    generation: AtomicU64,
}

impl NetworkSession {
    /// Build a session from its configuration
    pub(crate) fn new(config: NetworkConfig, owner: Weak<User>, owner_name: &str, context: BouncerContext) -> Result<Self> {
        let scripts = config
            .scripts
            .iter()
            .cloned()
            .map(|script| context.hooks.script(script))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            owner,
            owner_name: owner_name.to_string(),
            context,
            state: Mutex::new(SessionState {
                channels: ChannelStore::new(config.name.clone()),
                config,
                whois: WhoisStore::new(),
                scripts,
                channel_list: Vec::new(),
                pending_list: None,
            }),
            connection: RwLock::new(None),
            status: RwLock::new(SessionStatus::Configured),
            ident_port: AtomicU16::new(0),
            generation: AtomicU64::new(0),
        })
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning user
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Current lifecycle state
    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        let mut current = self.status.write();
        if *current != SessionStatus::Removed {
            *current = status;
        }
    }

    pub(crate) fn mark_removed(&self) {
        *self.status.write() = SessionStatus::Removed;
    }

    /// Protocol handle, if the session was opened
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    /// Whether the transport is up
    pub fn is_connected(&self) -> bool {
        self.connection().map_or(false, |c| c.is_connected())
    }

    pub(crate) fn require_connection(&self) -> Result<Arc<dyn Connection>> {
        self.connection()
            .filter(|c| c.is_connected())
            .ok_or_else(|| Error::Connection(format!("Network {} is not connected", self.name)))
    }

    /// Local port currently registered for ident, 0 when none
    pub fn ident_port(&self) -> u16 {
        self.ident_port.load(Ordering::SeqCst)
    }

    pub(crate) fn session_info(&self, state: &SessionState) -> SessionInfo {
        SessionInfo {
            owner: self.owner_name.clone(),
            network: self.name.clone(),
            nick: state.config.nick.clone(),
        }
    }

    /// Hand an update to the owning user's delivery queue
    pub(crate) async fn deliver(&self, update: ClientUpdate) {
        match self.owner.upgrade() {
            Some(owner) => owner.deliver(update).await,
            None => debug!(network = %self.name, "Owner gone, dropping update"),
        }
    }

    /// Create the protocol connection, start processing its events and connect.
    ///
    /// Channels saved in the configuration are seeded into the channel store
    /// and joined once the server welcomes us.
    pub async fn open(self: &Arc<Self>) -> Result<()> {
        if self.status() == SessionStatus::Removed {
            return Err(Error::Network(format!("Network {} was removed", self.name)));
        }
        if self.is_connected() {
            debug!(owner = %self.owner_name, network = %self.name, "Session already open");
            return Ok(());
        }

        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        let params = {
            let mut state = self.state.lock().await;
            let saved = state.config.channels.clone();
            for channel in saved {
                state.channels.get_or_insert(&channel);
            }
            state.config.connect_params()
        };

        let connection = self.context.connector.create(params, events_tx);
        *self.connection.write() = Some(connection);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(Self::event_loop(Arc::downgrade(self), events, generation));

        self.connect().await
    }

    async fn event_loop(session: Weak<Self>, mut events: mpsc::Receiver<ConnectionEvent>, generation: u64) {
        while let Some(event) = events.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            if session.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            session.handle_event(event).await;
        }
    }

    /// Open the wire connection and register the ident mapping
    pub async fn connect(&self) -> Result<()> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::Connection(format!("Network {} was never opened", self.name)))?;
        if connection.is_connected() {
            return Err(Error::Connection(format!("Network {} is already connected", self.name)));
        }

        // A port still held belongs to a transport that is gone
        self.release_ident();
        self.set_status(SessionStatus::Connecting);
        if let Err(e) = connection.connect().await {
            error!(owner = %self.owner_name, network = %self.name, "Connection failed: {}", e);
            self.set_status(SessionStatus::Disconnected);
            return Err(e);
        }
        info!(owner = %self.owner_name, network = %self.name, "Connected");

        let port = connection
            .local_addr()
            .and_then(|addr| addr.rsplit(':').next().and_then(|port| port.parse::<u16>().ok()));
        match port {
            Some(port) => {
                self.context.ident.register(port, &self.owner_name);
                self.ident_port.store(port, Ordering::SeqCst);
            }
            None => warn!(
                owner = %self.owner_name,
                network = %self.name,
                "Could not determine local port, ident unavailable"
            ),
        }
        Ok(())
    }

    /// Release the ident mapping if one is held
    pub(crate) fn release_ident(&self) {
        let port = self.ident_port.swap(0, Ordering::SeqCst);
        if port != 0 {
            self.context.ident.unregister(port);
        }
    }

    /// Send QUIT if connected; the server closes the transport
    pub async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.connection().filter(|c| c.is_connected()) else {
            return Ok(());
        };
        let result = connection.quit(&self.context.settings.quit_message).await;
        self.release_ident();
        result
    }

    /// Tear the transport down without a goodbye
    pub async fn force_disconnect(&self) {
        if let Some(connection) = self.connection() {
            connection.disconnect().await;
        }
        self.release_ident();
        self.set_status(SessionStatus::Disconnected);
    }

    /// Live nickname
    pub async fn nick(&self) -> String {
        self.state.lock().await.config.nick.clone()
    }

    /// Change nickname.
    ///
    /// While connected the change goes through the outbound pipeline and the
    /// server's confirmation updates local state; otherwise only the local
    /// nickname changes.
    pub async fn set_nick(&self, nick: &str) -> Result<()> {
        if self.is_connected() {
            let current = self.nick().await;
            return self.send_message(&current, MessageKind::Nick, nick).await;
        }
        self.state.lock().await.config.nick = nick.to_string();
        Ok(())
    }

    /// Change the real name used on the next connect
    pub async fn set_realname(&self, realname: &str) {
        self.state.lock().await.config.realname = realname.to_string();
    }

    /// Send a raw protocol line
    pub async fn send_raw(&self, raw: &str) -> Result<()> {
        let line = Line::parse(raw)?;
        self.require_connection()?.send_line(line).await
    }

    /// Drop the stored history of one channel
    pub async fn clear_channel(&self, channel: &str) -> Result<()> {
        self.context.store.clear_channel(&self.owner_name, &self.name, channel).await
    }

    /// Attach a script, replacing one with the same name. Returns whether it was new.
    pub async fn add_script(&self, config: ScriptConfig) -> Result<bool> {
        let script = self.context.hooks.script(config)?;
        Ok(upsert_script(&mut self.state.lock().await.scripts, script))
    }

    /// Detach a script by name
    pub async fn remove_script(&self, name: &str) -> bool {
        remove_script(&mut self.state.lock().await.scripts, name)
    }

    /// Names of the attached scripts, in run order
    pub async fn script_names(&self) -> Vec<String> {
        self.state.lock().await.scripts.iter().map(|s| s.name().to_string()).collect()
    }

    /// Names of every tracked channel and conversation
    pub async fn active_channels(&self) -> Vec<String> {
        self.state.lock().await.channels.names()
    }

    /// Channels of the network as returned by the last LIST
    pub async fn all_channels(&self) -> Vec<ListedChannel> {
        self.state.lock().await.channel_list.clone()
    }

    /// Snapshot of one channel
    pub async fn channel_data(&self, channel: &str) -> Option<ChannelData> {
        self.state.lock().await.channels.get(channel).cloned()
    }

    /// Connection settings and state for clients
    pub async fn net_data(&self) -> NetData {
        let state = self.state.lock().await;
        NetData {
            name: self.name.clone(),
            address: state.config.address.clone(),
            port: state.config.port,
            tls: state.config.tls,
            user: state.config.user.clone(),
            realname: state.config.realname.clone(),
            nick: state.config.nick.clone(),
            connected: self.is_connected(),
        }
    }

    /// WHOIS record for a nickname, created empty if none is pending
    pub async fn get_whois_data(&self, nick: &str) -> WhoisData {
        self.state.lock().await.whois.get_whois_data(nick).clone()
    }

    /// WHOIS record for a nickname if one is pending
    pub async fn get_whois_data_if_exists(&self, nick: &str) -> Option<WhoisData> {
        self.state.lock().await.whois.get_whois_data_if_exists(nick).cloned()
    }

    /// Drop the WHOIS record for a nickname
    pub async fn remove_whois_data(&self, nick: &str) -> Option<WhoisData> {
        self.state.lock().await.whois.remove_whois_data(nick)
    }

    /// Configuration to persist: live nickname, joined channels and scripts
    pub async fn save(&self) -> NetworkConfig {
        let state = self.state.lock().await;
        let mut config = state.config.clone();
        config.channels = state
            .channels
            .names()
            .into_iter()
            .filter(|name| is_channel_name(name))
            .collect();
        config.scripts = state.scripts.iter().map(|s| s.config.clone()).collect();
        config
    }
}

impl std::fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSession")
            .field("owner", &self.owner_name)
            .field("network", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
