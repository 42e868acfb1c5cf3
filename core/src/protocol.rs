//! IRC protocol line parsing and serialization
//!
//! This module implements the client side of the RFC 1459 line format: the
//! bouncer parses every line an upstream server sends into a [`Line`] and
//! serializes the commands it issues the same way.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// CTCP delimiter byte
pub const CTCP_DELIM: char = '\x01';

/// Line prefix (server or user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick!user@host)
    User {
        nick: String,
        user: String,
        host: String,
    },
}

impl Prefix {
    /// Parse a prefix without its leading colon
    pub fn parse(prefix: &str) -> Self {
        match prefix.split_once('!') {
            Some((nick, rest)) => {
                let (user, host) = rest.split_once('@').unwrap_or((rest, ""));
                Prefix::User {
                    nick: nick.to_string(),
                    user: user.to_string(),
                    host: host.to_string(),
                }
            }
            // Bare nicknames show up in some server-generated lines
            None if !prefix.contains('.') => Prefix::User {
                nick: prefix.to_string(),
                user: String::new(),
                host: String::new(),
            },
            None => Prefix::Server(prefix.to_string()),
        }
    }

    /// The nickname or server name this prefix names
    pub fn name(&self) -> &str {
        match self {
            Prefix::Server(name) => name,
            Prefix::User { nick, .. } => nick,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } if user.is_empty() && host.is_empty() => {
                write!(f, "{}", nick)
            }
            Prefix::User { nick, user, host } => write!(f, "{}!{}@{}", nick, user, host),
        }
    }
}

/// Protocol commands the bouncer sends or reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Pass,
    Nick,
    User,
    Quit,
    Join,
    Part,
    Mode,
    Topic,
    Names,
    List,
    Invite,
    Kick,
    PrivMsg,
    Notice,
    Whois,
    Ping,
    Pong,
    Error,
    Away,
    /// Three-digit numeric reply
    Numeric(u16),
    /// Anything else
    Other(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Pass => "PASS",
            Command::Nick => "NICK",
            Command::User => "USER",
            Command::Quit => "QUIT",
            Command::Join => "JOIN",
            Command::Part => "PART",
            Command::Mode => "MODE",
            Command::Topic => "TOPIC",
            Command::Names => "NAMES",
            Command::List => "LIST",
            Command::Invite => "INVITE",
            Command::Kick => "KICK",
            Command::PrivMsg => "PRIVMSG",
            Command::Notice => "NOTICE",
            Command::Whois => "WHOIS",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Error => "ERROR",
            Command::Away => "AWAY",
            Command::Numeric(code) => return write!(f, "{:03}", code),
            Command::Other(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        if s.len() == 3 && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = s.parse() {
                return Command::Numeric(code);
            }
        }

        match s.to_uppercase().as_str() {
            "PASS" => Command::Pass,
            "NICK" => Command::Nick,
            "USER" => Command::User,
            "QUIT" => Command::Quit,
            "JOIN" => Command::Join,
            "PART" => Command::Part,
            "MODE" => Command::Mode,
            "TOPIC" => Command::Topic,
            "NAMES" => Command::Names,
            "LIST" => Command::List,
            "INVITE" => Command::Invite,
            "KICK" => Command::Kick,
            "PRIVMSG" => Command::PrivMsg,
            "NOTICE" => Command::Notice,
            "WHOIS" => Command::Whois,
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "ERROR" => Command::Error,
            "AWAY" => Command::Away,
            other => Command::Other(other.to_string()),
        }
    }
}

/// One protocol line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Optional prefix (server or user)
    pub prefix: Option<Prefix>,
    /// Command or numeric
    pub command: Command,
    /// Parameters, the last one may contain spaces
    pub params: Vec<String>,
}

impl Line {
    /// Create a new line without a prefix
    pub fn new(command: Command, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
        }
    }

    /// Create a new line with prefix
    pub fn with_prefix(prefix: Prefix, command: Command, params: Vec<String>) -> Self {
        Self {
            prefix: Some(prefix),
            command,
            params,
        }
    }

    /// Parse a protocol line (without the trailing CRLF)
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut rest = input.trim_end_matches(['\r', '\n']).trim_start();

        // IRCv3 message tags are not used by the bouncer
        if rest.starts_with('@') {
            rest = match rest.split_once(' ') {
                Some((_, after)) => after.trim_start(),
                None => "",
            };
        }

        if rest.is_empty() {
            return Err(crate::Error::Parse("Empty line".to_string()));
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, after) = stripped
                .split_once(' ')
                .ok_or_else(|| crate::Error::Parse("Prefix without command".to_string()))?;
            rest = after.trim_start();
            Some(Prefix::parse(prefix))
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, after)) => (command, after),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(crate::Error::Parse("No command found".to_string()));
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Ok(Line {
            prefix,
            command: Command::from(command),
            params,
        })
    }

    /// Nickname of the sender, empty for server lines
    pub fn source_nick(&self) -> &str {
        match &self.prefix {
            Some(Prefix::User { nick, .. }) => nick,
            _ => "",
        }
    }

    /// Name of the sender, nickname or server
    pub fn source(&self) -> &str {
        self.prefix.as_ref().map(|p| p.name()).unwrap_or("")
    }

    /// Parameter at `index`, empty when absent
    pub fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or("")
    }

    /// Last parameter, empty when there are none
    pub fn trailing(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }

        write!(f, "{}", self.command)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let param = wire_safe(param);
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }

        Ok(())
    }
}

/// A parameter with line breaks turned into spaces and NULs removed
fn wire_safe(param: &str) -> Cow<'_, str> {
    if !param.contains(['\r', '\n', '\0']) {
        return Cow::Borrowed(param);
    }
    Cow::Owned(
        param
            .chars()
            .filter(|&c| c != '\0')
            .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
            .collect(),
    )
}

/// Wrap text as a CTCP ACTION body
pub fn ctcp_action(text: &str) -> String {
    format!("{}ACTION {}{}", CTCP_DELIM, text, CTCP_DELIM)
}

/// Split a CTCP body into its command and argument
pub fn parse_ctcp(body: &str) -> Option<(&str, &str)> {
    let inner = body.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    Some(inner.split_once(' ').unwrap_or((inner, "")))
}
