//! IRC Bouncer Core
//!
//! This crate provides the network session and message-routing engine of a
//! multi-user IRC bouncer: persistent upstream connections, canonical message
//! normalization, the hook pipeline, channel and WHOIS state tracking, and the
//! collaborators (store, ident, previews) those sessions rely on.

pub mod bouncer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod handlers;
pub mod hook;
pub mod ident;
pub mod message;
pub mod modes;
pub mod numeric;
pub mod pipeline;
pub mod preview;
pub mod protocol;
pub mod session;
pub mod split;
pub mod store;
pub mod testing;
pub mod user;
pub mod userlist;
pub mod whois;

pub use bouncer::{Bouncer, UserUpdates};
pub use channel::{ChannelData, ChannelStore};
pub use config::{BouncerConfig, Config, NetworkConfig, UserConfig};
pub use connection::{ConnectParams, Connection, ConnectionEvent, Connector, IrcConnection, TcpConnector};
pub use context::BouncerContext;
pub use error::{Error, Result};
pub use hook::{Direction, Event, Hook, HookFactory, Script, ScriptConfig, SessionInfo};
pub use ident::{IdentRegistry, IdentServer};
pub use message::{ClientUpdate, ListedChannel, Message, MessageKind};
pub use modes::{Mode, ModeList};
pub use numeric::NumericReply;
pub use preview::{NoPreview, Preview, PreviewService};
pub use protocol::{Command, Line, Prefix};
pub use session::{NetData, NetworkSession, SessionStatus};
pub use store::{FileStore, MemoryStore, MessageStore};
pub use user::User;
pub use userlist::{Member, Privilege, UserList};
pub use whois::{WhoisData, WhoisStore};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};
