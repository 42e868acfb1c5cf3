//! Canonical chat messages and client updates
//!
//! Every protocol event that reaches a user is normalized into a [`Message`]
//! before it runs through the hook chain, gets persisted and is delivered.

use crate::channel::ChannelData;
use crate::preview::Preview;
use crate::whois::WhoisData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of a canonical message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Privmsg,
    Notice,
    Action,
    Join,
    Part,
    Kick,
    Mode,
    Topic,
    Nick,
    Quit,
    Invite,
    Whois,
    /// Server text without a dedicated representation
    Raw,
    /// Marker written when a session finishes registration
    Connect,
    /// Marker written when a session loses its connection
    Disconnect,
}

impl MessageKind {
    /// Wire-independent lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Privmsg => "privmsg",
            MessageKind::Notice => "notice",
            MessageKind::Action => "action",
            MessageKind::Join => "join",
            MessageKind::Part => "part",
            MessageKind::Kick => "kick",
            MessageKind::Mode => "mode",
            MessageKind::Topic => "topic",
            MessageKind::Nick => "nick",
            MessageKind::Quit => "quit",
            MessageKind::Invite => "invite",
            MessageKind::Whois => "whois",
            MessageKind::Raw => "raw",
            MessageKind::Connect => "connect",
            MessageKind::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "privmsg" | "msg" => MessageKind::Privmsg,
            "notice" => MessageKind::Notice,
            "action" | "me" => MessageKind::Action,
            "join" => MessageKind::Join,
            "part" => MessageKind::Part,
            "kick" => MessageKind::Kick,
            "mode" => MessageKind::Mode,
            "topic" => MessageKind::Topic,
            "nick" => MessageKind::Nick,
            "quit" => MessageKind::Quit,
            "invite" => MessageKind::Invite,
            "whois" => MessageKind::Whois,
            "raw" => MessageKind::Raw,
            "connect" => MessageKind::Connect,
            "disconnect" => MessageKind::Disconnect,
            other => return Err(crate::Error::Parse(format!("Unknown message kind: {}", other))),
        };
        Ok(kind)
    }
}

/// One chat or event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier assigned by the store on commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub network: String,
    pub channel: String,
    /// Unix seconds
    pub timestamp: i64,
    pub sender: String,
    /// `None` once a hook has neutered the message
    pub command: Option<MessageKind>,
    pub body: String,
    /// Set for the bouncer user's own actions
    #[serde(rename = "ownmsg")]
    pub own_msg: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

impl Message {
    /// Create an uncommitted message stamped with the current time
    pub fn new(
        network: impl Into<String>,
        channel: impl Into<String>,
        sender: impl Into<String>,
        command: MessageKind,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            network: network.into(),
            channel: channel.into(),
            timestamp: chrono::Utc::now().timestamp(),
            sender: sender.into(),
            command: Some(command),
            body: body.into(),
            own_msg: false,
            preview: None,
        }
    }

    /// Mark the message as the bouncer user's own action
    pub fn own(mut self, own_msg: bool) -> Self {
        self.own_msg = own_msg;
        self
    }

    /// Whether the store has assigned an identifier
    pub fn is_committed(&self) -> bool {
        self.id.is_some()
    }
}

/// Everything pushed onto a user's delivery queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientUpdate {
    /// A committed message
    Message(Message),
    /// Fresh state for one channel
    ChannelData(ChannelData),
    /// A completed WHOIS lookup
    Whois(WhoisData),
    /// Result of a channel LIST
    ChannelList {
        network: String,
        channels: Vec<ListedChannel>,
    },
    /// A session connected or disconnected
    NetworkState { network: String, connected: bool },
}

/// One entry of a LIST reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedChannel {
    pub name: String,
    pub users: u32,
    pub topic: String,
}
