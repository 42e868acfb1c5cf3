//! Message pipeline of a network session
//!
//! Inbound: protocol event → canonical [`Message`] → hook chain → commit.
//! Outbound: client command → hook chain → split → wire dispatch (and commit
//! for chat messages).
//!
//! When a hook moves a message to another network of the same user the
//! current pass ends and the message is replayed on that session once the
//! current session's lock has been released.

use crate::hook::{run_chain, ChainOutcome, Direction, Event};
use crate::message::{ClientUpdate, Message, MessageKind};
use crate::protocol::{Command, Line};
use crate::session::{NetworkSession, SessionState};
use crate::split::split_body;
use crate::Result;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, trace, warn};

/// Pseudo-channels used by servers for registration chatter
const IGNORED_TARGETS: &[&str] = &["AUTH", "*"];

/// Redirect chains longer than this are dropped
const MAX_REDIRECT_HOPS: u8 = 4;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message a hook moved to another network
#[derive(Debug, Clone)]
pub(crate) struct Redirect {
    network: String,
    direction: Direction,
    channel: String,
    sender: String,
    command: MessageKind,
    body: String,
}

impl Redirect {
    fn from_event(network: String, event: &Event) -> Option<Self> {
        if event.cancelled {
            return None;
        }
        Some(Self {
            network,
            direction: event.direction,
            channel: event.message.channel.clone(),
            sender: event.message.sender.clone(),
            command: event.message.command?,
            body: event.message.body.clone(),
        })
    }
}

impl NetworkSession {
    /// Process an event received from the network
    pub async fn receive_message(&self, channel: &str, sender: &str, command: MessageKind, body: &str) -> Result<()> {
        self.receive_with_hops(channel, sender, command, body, 0).await
    }

    /// Process a command issued by the user
    pub async fn send_message(&self, channel: &str, command: MessageKind, body: &str) -> Result<()> {
        self.send_with_hops(channel, command, body, 0).await
    }

    async fn receive_with_hops(&self, channel: &str, sender: &str, command: MessageKind, body: &str, hops: u8) -> Result<()> {
        let mut redirects = Vec::new();
        let result = {
            let mut state = self.state.lock().await;
            self.receive_locked(&mut state, channel, sender, command, body, &mut redirects)
                .await
        };
        self.dispatch_redirects(redirects, hops).await;
        result
    }

    async fn send_with_hops(&self, channel: &str, command: MessageKind, body: &str, hops: u8) -> Result<()> {
        let mut redirects = Vec::new();
        let result = {
            let mut state = self.state.lock().await;
            self.send_locked(&mut state, channel, command, body, &mut redirects).await
        };
        self.dispatch_redirects(redirects, hops).await;
        result
    }

    /// Replay redirected messages on their target sessions
    pub(crate) fn dispatch_redirects(&self, redirects: Vec<Redirect>, hops: u8) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if redirects.is_empty() {
                return;
            }
            let Some(owner) = self.owner.upgrade() else {
                return;
            };

            for redirect in redirects {
                if hops >= MAX_REDIRECT_HOPS {
                    warn!(
                        owner = %self.owner_name,
                        network = %self.name,
                        "Dropping message redirected too many times"
                    );
                    continue;
                }
                let Some(target) = owner.get_network(&redirect.network) else {
                    continue;
                };
                let result = match redirect.direction {
                    Direction::Inbound => {
                        target
                            .receive_with_hops(&redirect.channel, &redirect.sender, redirect.command, &redirect.body, hops + 1)
                            .await
                    }
                    Direction::Outbound => {
                        target
                            .send_with_hops(&redirect.channel, redirect.command, &redirect.body, hops + 1)
                            .await
                    }
                };
                if let Err(e) = result {
                    warn!(
                        owner = %self.owner_name,
                        from = %self.name,
                        to = %redirect.network,
                        "Redirected message failed: {}",
                        e
                    );
                }
            }
        })
    }

    /// Run session scripts then the owner's global scripts
    fn run_hooks(&self, state: &SessionState, event: &mut Event) -> ChainOutcome {
        let owner = self.owner.upgrade();
        let global = owner.as_ref().map(|o| o.global_scripts()).unwrap_or_default();
        let has_network = |network: &str| {
            !network.eq_ignore_ascii_case(&self.name)
                && owner.as_ref().map_or(false, |o| o.get_network(network).is_some())
        };
        run_chain(state.scripts.iter().chain(global.iter()), event, has_network)
    }

    /// Inbound path, called with the session lock held
    pub(crate) async fn receive_locked(
        &self,
        state: &mut SessionState,
        channel: &str,
        sender: &str,
        command: MessageKind,
        body: &str,
        redirects: &mut Vec<Redirect>,
    ) -> Result<()> {
        if IGNORED_TARGETS.contains(&channel) {
            trace!(network = %self.name, "Ignoring {} for {}", command, channel);
            return Ok(());
        }

        let own_msg = state.is_own_nick(sender) || (command == MessageKind::Nick && state.is_own_nick(body));
        let mut channel = channel.to_string();

        // Private messages are filed under the other party's name
        if state.is_own_nick(&channel) && !sender.is_empty() {
            channel = sender.to_string();
            if !state.channels.has(sender) {
                state.channels.get_or_insert(sender);
            }
        }

        let message = Message::new(&self.name, channel, sender, command, body).own(own_msg);
        let mut event = Event::new(message, Direction::Inbound, self.session_info(state));
        if let ChainOutcome::Redirected(network) = self.run_hooks(state, &mut event) {
            redirects.extend(Redirect::from_event(network, &event));
            return Ok(());
        }
        if event.cancelled {
            trace!(network = %self.name, "Inbound message cancelled by hook");
            return Ok(());
        }

        self.commit(event.message).await
    }

    /// Outbound path, called with the session lock held
    pub(crate) async fn send_locked(
        &self,
        state: &mut SessionState,
        channel: &str,
        command: MessageKind,
        body: &str,
        redirects: &mut Vec<Redirect>,
    ) -> Result<()> {
        let max = self.context.settings.max_line_length;
        let chat = matches!(command, MessageKind::Privmsg | MessageKind::Action | MessageKind::Notice);
        let mut queue = VecDeque::new();
        if chat && body.contains(['\r', '\n']) {
            // Every line typed is a message of its own
            for text in body.split(['\r', '\n']).filter(|text| !text.is_empty()) {
                queue.push_back((channel.to_string(), command, text.to_string(), true));
            }
        } else {
            queue.push_back((channel.to_string(), command, body.to_string(), true));
        }
        let mut first_error = None;

        while let Some((channel, command, body, may_split)) = queue.pop_front() {
            let message = Message::new(&self.name, channel, state.config.nick.clone(), command, body).own(true);
            let mut event = Event::new(message, Direction::Outbound, self.session_info(state));
            if let ChainOutcome::Redirected(network) = self.run_hooks(state, &mut event) {
                redirects.extend(Redirect::from_event(network, &event));
                continue;
            }
            if event.cancelled {
                trace!(network = %self.name, "Outbound message cancelled by hook");
                continue;
            }

            let message = event.message;
            let Some(kind) = message.command else {
                trace!(network = %self.name, "Outbound message without command dropped");
                continue;
            };

            // Each piece runs through the hooks again on its own
            if may_split && message.body.len() > max {
                for piece in split_body(&message.body, max).into_iter().rev() {
                    queue.push_front((message.channel.clone(), kind, piece.to_string(), false));
                }
                continue;
            }

            // One failed piece must not swallow the rest
            if let Err(e) = self.dispatch(message, kind).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Put an outbound message on the wire, committing chat messages
    async fn dispatch(&self, message: Message, kind: MessageKind) -> Result<()> {
        // `*` targets are bouncer-local conversations: nothing is sent or kept
        if message.channel.starts_with('*') {
            trace!(network = %self.name, "Not sending {} to local target {}", kind, message.channel);
            return Ok(());
        }

        match kind {
            MessageKind::Privmsg | MessageKind::Action | MessageKind::Notice => {
                let connection = self.require_connection()?;
                match kind {
                    MessageKind::Action => connection.action(&message.channel, &message.body).await?,
                    MessageKind::Notice => connection.notice(&message.channel, &message.body).await?,
                    _ => connection.privmsg(&message.channel, &message.body).await?,
                }
                self.commit(message).await
            }
            MessageKind::Topic
            | MessageKind::Join
            | MessageKind::Part
            | MessageKind::Nick
            | MessageKind::Whois
            | MessageKind::Invite
            | MessageKind::Kick
            | MessageKind::Mode
            | MessageKind::Raw => {
                let connection = self.require_connection()?;
                let channel = message.channel.as_str();
                let body = message.body.as_str();
                match kind {
                    MessageKind::Topic => connection.topic(channel, body).await,
                    MessageKind::Join => connection.join(channel).await,
                    MessageKind::Part => connection.part(channel, body).await,
                    MessageKind::Nick => connection.set_nick(body).await,
                    MessageKind::Whois => connection.whois(if body.is_empty() { channel } else { body }).await,
                    MessageKind::Invite => connection.invite(body, channel).await,
                    MessageKind::Kick => {
                        let (target, reason) = body.split_once(':').unwrap_or((body, ""));
                        let mut params = vec![channel.to_string(), target.trim().to_string()];
                        if !reason.is_empty() {
                            params.push(reason.to_string());
                        }
                        connection.send_line(Line::new(Command::Kick, params)).await
                    }
                    MessageKind::Mode => {
                        let mut params = vec![channel.to_string()];
                        params.extend(body.split_whitespace().map(str::to_string));
                        connection.send_line(Line::new(Command::Mode, params)).await
                    }
                    _ => connection.send_line(Line::parse(body)?).await,
                }
            }
            MessageKind::Quit | MessageKind::Connect | MessageKind::Disconnect => {
                debug!(network = %self.name, "{} can not be sent", kind);
                Ok(())
            }
        }
    }

    /// Persist a finished message and deliver it.
    ///
    /// Delivery happens even when persisting fails; the store error is
    /// returned afterwards.
    pub(crate) async fn commit(&self, mut message: Message) -> Result<()> {
        if message.command.is_none() || message.channel.is_empty() {
            trace!(network = %self.name, "Dropping message without command or channel");
            return Ok(());
        }

        match self.context.preview.get_preview(&message.body).await {
            Ok(preview) => message.preview = preview,
            Err(e) => debug!(network = %self.name, "Preview failed: {}", e),
        }

        let stored = self.context.store.insert(&self.owner_name, &message).await;
        if let Ok(id) = stored {
            message.id = Some(id);
        }

        self.deliver(ClientUpdate::Message(message)).await;

        stored.map(|_| ()).map_err(|e| {
            error!(owner = %self.owner_name, network = %self.name, "Failed to persist message: {}", e);
            e
        })
    }
}
