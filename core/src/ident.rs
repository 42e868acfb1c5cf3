//! Ident (RFC 1413) support
//!
//! Every connected session registers its local port with the process-wide
//! [`IdentRegistry`] so the upstream server's ident query resolves to the
//! owning user's name. [`IdentServer`] answers those queries.

use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Local port to owner name mapping shared by all sessions
#[derive(Debug, Default)]
pub struct IdentRegistry {
    ports: DashMap<u16, String>,
}

impl IdentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a local port to an owner name
    pub fn register(&self, port: u16, owner: &str) {
        debug!(port, owner, "Registered ident mapping");
        self.ports.insert(port, owner.to_string());
    }

    /// Drop the mapping of a local port
    pub fn unregister(&self, port: u16) -> Option<String> {
        debug!(port, "Released ident mapping");
        self.ports.remove(&port).map(|(_, owner)| owner)
    }

    /// Owner registered for a local port
    pub fn lookup(&self, port: u16) -> Option<String> {
        self.ports.get(&port).map(|owner| owner.clone())
    }

    /// Number of registered ports
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether no ports are registered
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Parse an ident query line `<local-port> , <remote-port>`
pub fn parse_query(line: &str) -> Option<(u16, u16)> {
    let (local, remote) = line.trim().split_once(',')?;
    let local = local.trim().parse().ok()?;
    let remote = remote.trim().parse().ok()?;
    Some((local, remote))
}

/// Build the response line for a query
pub fn format_response(local: u16, remote: u16, owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!("{}, {} : USERID : UNIX : {}\r\n", local, remote, owner),
        None => format!("{}, {} : ERROR : NO-USER\r\n", local, remote),
    }
}

/// Ident responder backed by an [`IdentRegistry`]
pub struct IdentServer {
    registry: Arc<IdentRegistry>,
    listener: TcpListener,
}

impl IdentServer {
    /// Bind the responder
    pub async fn bind(addr: &str, port: u16, registry: Arc<IdentRegistry>) -> Result<Self> {
        let listener = TcpListener::bind((addr, port)).await?;
        info!("Ident responder listening on {}", listener.local_addr()?);
        Ok(Self { registry, listener })
    }

    /// Address the responder listens on
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept queries until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::answer(stream, registry).await {
                            debug!("Ident query from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Ident accept failed: {}", e);
                }
            }
        }
    }

    async fn answer(stream: TcpStream, registry: Arc<IdentRegistry>) -> Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut line = String::new();

        let read = tokio::time::timeout(Duration::from_secs(10), reader.read_line(&mut line)).await;
        if !matches!(read, Ok(Ok(n)) if n > 0) {
            return Ok(());
        }

        let response = match parse_query(&line) {
            Some((local, remote)) => {
                let owner = registry.lookup(local);
                format_response(local, remote, owner.as_deref())
            }
            None => "0, 0 : ERROR : INVALID-PORT\r\n".to_string(),
        };
        write.write_all(response.as_bytes()).await?;
        Ok(())
    }
}
