//! Inbound protocol event handling
//!
//! Each line from the server updates the derived channel and WHOIS state
//! and, for events users see, feeds the inbound message pipeline. A line is
//! handled completely under the session lock before the next one is looked
//! at.

use crate::connection::ConnectionEvent;
use crate::message::{ClientUpdate, ListedChannel, MessageKind};
use crate::modes::parse_mode_changes;
use crate::numeric::NumericReply;
use crate::pipeline::Redirect;
use crate::protocol::{parse_ctcp, Command, Line};
use crate::session::{is_channel_name, NetworkSession, SessionState, SessionStatus};
use crate::Result;
use tracing::{debug, info, warn};

/// Pseudo-channel collecting server text without a dedicated home
pub const RAW_CHANNEL: &str = "*raw";

/// Remember the first failure of a loop that keeps going
fn keep_first_error(result: &mut Result<()>, outcome: Result<()>) {
    if result.is_ok() {
        *result = outcome;
    }
}

impl NetworkSession {
    /// Process one event from the connection.
    ///
    /// The session's event loop calls this for every event in arrival order.
    pub async fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Line(line) => {
                let mut redirects = Vec::new();
                {
                    let mut state = self.state.lock().await;
                    if let Err(e) = self.handle_line(&mut state, &line, &mut redirects).await {
                        warn!(
                            owner = %self.owner_name,
                            network = %self.name,
                            "Error handling {}: {}",
                            line.command,
                            e
                        );
                    }
                }
                self.dispatch_redirects(redirects, 0).await;
            }
            ConnectionEvent::Disconnected { reason, transport } => {
                self.handle_disconnected(&reason, transport).await
            }
        }
    }

    async fn handle_disconnected(&self, reason: &str, transport: u64) {
        // A reconnect already replaced the transport this event is about
        if self.connection().map(|c| c.transport_id()) != Some(transport) {
            debug!(owner = %self.owner_name, network = %self.name, "Ignoring close of an old transport: {}", reason);
            return;
        }
        info!(owner = %self.owner_name, network = %self.name, "Disconnected: {}", reason);
        self.release_ident();
        if self.status() == SessionStatus::Removed {
            return;
        }
        self.set_status(SessionStatus::Disconnected);

        let mut redirects = Vec::new();
        {
            let mut state = self.state.lock().await;
            let server = state.config.address.clone();
            for channel in state.channels.names() {
                if let Err(e) = self
                    .receive_locked(&mut state, &channel, &server, MessageKind::Disconnect, reason, &mut redirects)
                    .await
                {
                    warn!(network = %self.name, "Failed to record disconnect in {}: {}", channel, e);
                }
            }
        }
        self.dispatch_redirects(redirects, 0).await;
        self.deliver(ClientUpdate::NetworkState {
            network: self.name.clone(),
            connected: false,
        })
        .await;
    }

    async fn handle_line(&self, state: &mut SessionState, line: &Line, redirects: &mut Vec<Redirect>) -> Result<()> {
        let nick = line.source_nick();

        match &line.command {
            Command::PrivMsg | Command::Notice => {
                let sender = if nick.is_empty() { line.source() } else { nick };
                let text = line.param(1);
                let (kind, body) = match parse_ctcp(text) {
                    Some(("ACTION", action)) => (MessageKind::Action, action),
                    _ if line.command == Command::Notice => (MessageKind::Notice, text),
                    _ => (MessageKind::Privmsg, text),
                };
                self.receive_locked(state, line.param(0), sender, kind, body, redirects)
                    .await
            }
            Command::Invite => {
                self.receive_locked(state, line.param(1), nick, MessageKind::Invite, line.param(0), redirects)
                    .await
            }
            Command::Join => {
                let channel = line.param(0);
                if state.is_own_nick(nick) {
                    state.channels.get_or_insert(channel);
                } else if let Some(data) = state.channels.get_mut(channel) {
                    data.add_member(nick);
                }
                self.receive_locked(state, channel, nick, MessageKind::Join, "", redirects)
                    .await
            }
            Command::Part => {
                let channel = line.param(0);
                if state.is_own_nick(nick) {
                    state.channels.remove(channel);
                } else if let Some(data) = state.channels.get_mut(channel) {
                    data.remove_member(nick);
                }
                self.receive_locked(state, channel, nick, MessageKind::Part, line.param(1), redirects)
                    .await
            }
            Command::Kick => {
                let channel = line.param(0);
                let target = line.param(1);
                if state.is_own_nick(target) {
                    state.channels.remove(channel);
                } else if let Some(data) = state.channels.get_mut(channel) {
                    data.remove_member(target);
                }
                let body = format!("{}:{}", target, line.param(2));
                self.receive_locked(state, channel, nick, MessageKind::Kick, &body, redirects)
                    .await
            }
            Command::Mode => self.handle_mode(state, line, redirects).await,
            Command::Topic => {
                let channel = line.param(0);
                let topic = line.param(1);
                if let Some(data) = state.channels.get_mut(channel) {
                    data.set_topic(topic, nick, chrono::Utc::now().timestamp());
                }
                self.receive_locked(state, channel, nick, MessageKind::Topic, topic, redirects)
                    .await
            }
            Command::Nick => {
                let new_nick = line.param(0);
                if state.is_own_nick(nick) {
                    state.config.nick = new_nick.to_string();
                }
                let mut affected = Vec::new();
                for data in state.channels.iter_mut() {
                    if data.rename_member(nick, new_nick) {
                        affected.push(data.name.clone());
                    }
                }
                let mut result = Ok(());
                for channel in affected {
                    let sent = self
                        .receive_locked(state, &channel, nick, MessageKind::Nick, new_nick, redirects)
                        .await;
                    keep_first_error(&mut result, sent);
                }
                result
            }
            Command::Quit => {
                let mut affected = Vec::new();
                for data in state.channels.iter_mut() {
                    if data.remove_member(nick) {
                        affected.push(data.name.clone());
                    }
                }
                let mut result = Ok(());
                for channel in affected {
                    let sent = self
                        .receive_locked(state, &channel, nick, MessageKind::Quit, line.param(0), redirects)
                        .await;
                    keep_first_error(&mut result, sent);
                }
                result
            }
            Command::Numeric(code) => match NumericReply::from_code(*code) {
                Some(reply) => self.handle_numeric(state, reply, line, redirects).await,
                None => self.receive_raw(state, line, redirects).await,
            },
            // Answered by the connection itself
            Command::Ping | Command::Pong => Ok(()),
            _ => self.receive_raw(state, line, redirects).await,
        }
    }

    async fn handle_mode(&self, state: &mut SessionState, line: &Line, redirects: &mut Vec<Redirect>) -> Result<()> {
        let target = line.param(0);
        let body = line.params.get(1..).unwrap_or_default().join(" ");

        if is_channel_name(target) {
            if let Some(data) = state.channels.get_mut(target) {
                let arguments = line.params.get(2..).unwrap_or_default();
                let changes = parse_mode_changes(line.param(1), arguments);
                for member in data.modes.apply(&changes) {
                    data.sync_member_prefix(&member);
                }
            }
        }

        // User modes land in the own-nick query, filed under the sender
        self.receive_locked(state, target, line.source(), MessageKind::Mode, &body, redirects)
            .await
    }

    async fn handle_numeric(
        &self,
        state: &mut SessionState,
        reply: NumericReply,
        line: &Line,
        redirects: &mut Vec<Redirect>,
    ) -> Result<()> {
        match reply {
            NumericReply::RplWelcome => {
                if !line.param(0).is_empty() {
                    state.config.nick = line.param(0).to_string();
                }
                self.set_status(SessionStatus::Connected);
                self.deliver(ClientUpdate::NetworkState {
                    network: self.name.clone(),
                    connected: true,
                })
                .await;

                let channels = state.channels.names();
                let text = format!("Connected to {}", state.config.address);
                let mut result = Ok(());
                for channel in &channels {
                    let marked = self
                        .receive_locked(state, channel, line.source(), MessageKind::Connect, &text, redirects)
                        .await;
                    keep_first_error(&mut result, marked);
                }

                let connection = self.require_connection()?;
                for channel in channels.iter().filter(|c| is_channel_name(c)) {
                    keep_first_error(&mut result, connection.join(channel).await);
                }
                result
            }
            NumericReply::RplInviting => {
                let own = state.config.nick.clone();
                self.receive_locked(state, line.param(2), &own, MessageKind::Invite, line.param(1), redirects)
                    .await
            }
            NumericReply::ErrUserOnChannel => {
                let body = format!("{} {}", line.param(1), line.param(3));
                self.receive_locked(state, line.param(2), line.source(), MessageKind::Raw, &body, redirects)
                    .await
            }
            NumericReply::ErrChanOpPrivsNeeded => {
                self.receive_locked(state, line.param(1), line.source(), MessageKind::Raw, line.param(2), redirects)
                    .await
            }
            NumericReply::RplNameReply => {
                if let Some(data) = state.channels.get_mut(line.param(2)) {
                    data.receive_names(line.param(3).split_whitespace());
                }
                Ok(())
            }
            NumericReply::RplEndOfNames => {
                if let Some(data) = state.channels.get_mut(line.param(1)) {
                    data.end_names();
                    let snapshot = data.clone();
                    self.deliver(ClientUpdate::ChannelData(snapshot)).await;
                }
                Ok(())
            }
            NumericReply::RplList => {
                let entry = ListedChannel {
                    name: line.param(1).to_string(),
                    users: line.param(2).parse().unwrap_or(0),
                    topic: line.param(3).to_string(),
                };
                state.pending_list.get_or_insert_with(Vec::new).push(entry);
                Ok(())
            }
            NumericReply::RplListEnd => {
                state.channel_list = state.pending_list.take().unwrap_or_default();
                self.deliver(ClientUpdate::ChannelList {
                    network: self.name.clone(),
                    channels: state.channel_list.clone(),
                })
                .await;
                Ok(())
            }
            NumericReply::RplChannelModeIs => {
                if let Some(data) = state.channels.get_mut(line.param(1)) {
                    let arguments = line.params.get(3..).unwrap_or_default();
                    data.modes.apply(&parse_mode_changes(line.param(2), arguments));
                }
                Ok(())
            }
            NumericReply::RplTopic => {
                if let Some(data) = state.channels.get_mut(line.param(1)) {
                    data.topic = line.param(2).to_string();
                    let snapshot = data.clone();
                    self.deliver(ClientUpdate::ChannelData(snapshot)).await;
                }
                Ok(())
            }
            NumericReply::RplTopicWhoTime => {
                if let Some(data) = state.channels.get_mut(line.param(1)) {
                    data.topic_set_by = line.param(2).to_string();
                    data.topic_set_at = line.param(3).parse().unwrap_or(0);
                    let snapshot = data.clone();
                    self.deliver(ClientUpdate::ChannelData(snapshot)).await;
                }
                Ok(())
            }
            NumericReply::RplAway => {
                let target = line.param(1);
                let text = line.param(2);
                match state.whois.get_whois_data_if_exists(target) {
                    Some(data) => {
                        data.away = Some(text.to_string());
                        Ok(())
                    }
                    None => {
                        let body = format!("{} is away: {}", target, text);
                        self.receive_locked(state, target, target, MessageKind::Raw, &body, redirects)
                            .await
                    }
                }
            }
            NumericReply::RplWhoisUser => {
                state
                    .whois
                    .get_whois_data(line.param(1))
                    .set_user_info(line.param(2), line.param(3), line.param(5));
                Ok(())
            }
            NumericReply::RplWhoisServer => {
                state
                    .whois
                    .get_whois_data(line.param(1))
                    .set_server(line.param(2), line.param(3));
                Ok(())
            }
            NumericReply::RplWhoisOperator => {
                state.whois.get_whois_data(line.param(1)).operator = true;
                Ok(())
            }
            NumericReply::RplWhoisIdle => {
                let idle = line.param(2).parse().unwrap_or(0);
                let signon = line.param(3).parse().unwrap_or(0);
                state.whois.get_whois_data(line.param(1)).set_idle(idle, signon);
                Ok(())
            }
            NumericReply::RplWhoisChannels => {
                state.whois.get_whois_data(line.param(1)).add_channels(line.param(2));
                Ok(())
            }
            NumericReply::RplWhoisSecure | NumericReply::RplWhoisSecureLegacy => {
                state.whois.get_whois_data(line.param(1)).secure = true;
                Ok(())
            }
            NumericReply::RplEndOfWhois => {
                if let Some(data) = state.whois.remove_whois_data(line.param(1)) {
                    self.deliver(ClientUpdate::Whois(data)).await;
                } else {
                    debug!(network = %self.name, "End of WHOIS for {} without replies", line.param(1));
                }
                Ok(())
            }
            NumericReply::ErrNicknameInUse => self.receive_raw(state, line, redirects).await,
        }
    }

    /// File a line without dedicated handling in the raw pseudo-channel
    async fn receive_raw(&self, state: &mut SessionState, line: &Line, redirects: &mut Vec<Redirect>) -> Result<()> {
        let body = match line.command {
            // Skip our own nick, the first parameter of every numeric
            Command::Numeric(code) => format!("{:03} {}", code, line.params.get(1..).unwrap_or_default().join(" ")),
            _ => line.to_string(),
        };
        self.receive_locked(state, RAW_CHANNEL, line.source(), MessageKind::Raw, body.trim_end(), redirects)
            .await
    }
}
