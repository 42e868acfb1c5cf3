//! In-process connections for tests
//!
//! [`RecordingConnector`] hands out [`RecordingConnection`]s that never touch
//! the network: every line a session sends is recorded, and tests push
//! server lines into the session with [`RecordingConnection::inject`].

use crate::connection::{ConnectParams, Connection, ConnectionEvent, Connector};
use crate::protocol::{Command, Line, Prefix};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connector recording every connection it creates
pub struct RecordingConnector {
    connections: Mutex<Vec<Arc<RecordingConnection>>>,
    local_addr: RwLock<Option<String>>,
}

impl RecordingConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            local_addr: RwLock::new(Some("127.0.0.1:40000".to_string())),
        })
    }

    /// Local address reported by connections created from now on
    pub fn set_local_addr(&self, addr: Option<&str>) {
        *self.local_addr.write() = addr.map(str::to_string);
    }

    /// Most recently created connection
    pub fn last(&self) -> Option<Arc<RecordingConnection>> {
        self.connections.lock().last().cloned()
    }

    /// Every connection created so far
    pub fn connections(&self) -> Vec<Arc<RecordingConnection>> {
        self.connections.lock().clone()
    }
}

impl Connector for RecordingConnector {
    fn create(&self, params: ConnectParams, events: mpsc::Sender<ConnectionEvent>) -> Arc<dyn Connection> {
        let connection = Arc::new(RecordingConnection::new(params, events, self.local_addr.read().clone()));
        self.connections.lock().push(connection.clone());
        connection
    }
}

/// Connection that records what it is asked to send
pub struct RecordingConnection {
    params: ConnectParams,
    events: mpsc::Sender<ConnectionEvent>,
    nick: RwLock<String>,
    local_addr: Option<String>,
    connected: AtomicBool,
    transport_id: AtomicU64,
    fail_connect: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingConnection {
    pub fn new(params: ConnectParams, events: mpsc::Sender<ConnectionEvent>, local_addr: Option<String>) -> Self {
        Self {
            nick: RwLock::new(params.nick.clone()),
            params,
            events,
            local_addr,
            connected: AtomicBool::new(false),
            transport_id: AtomicU64::new(0),
            fail_connect: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Parameters the connection was created with
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Make the next `connect` fail
    pub fn fail_next_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Lines sent so far, serialized
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Forget the recorded lines
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Deliver a server line to the session
    pub async fn inject(&self, raw: &str) -> Result<()> {
        let line = Line::parse(raw)?;
        match &line.command {
            Command::Numeric(1) if !line.param(0).is_empty() => {
                *self.nick.write() = line.param(0).to_string();
            }
            Command::Nick => {
                let own = matches!(&line.prefix, Some(Prefix::User { nick, .. }) if *nick == *self.nick.read());
                if own {
                    *self.nick.write() = line.param(0).to_string();
                }
            }
            _ => {}
        }
        self.events
            .send(ConnectionEvent::Line(line))
            .await
            .map_err(|_| Error::Connection("Session stopped listening".to_string()))
    }

    /// Simulate the server closing the connection
    pub async fn close(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .events
                .send(ConnectionEvent::Disconnected {
                    reason: reason.to_string(),
                    transport: self.transport_id(),
                })
                .await;
        }
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.swap(false, Ordering::SeqCst) {
            return Err(Error::Connection("Connection refused".to_string()));
        }
        self.transport_id.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        if let Some(ref password) = self.params.password {
            self.sent.lock().push(format!("PASS {}", password));
        }
        self.sent.lock().push(format!("NICK {}", self.nick.read()));
        self.sent.lock().push(
            Line::new(
                Command::User,
                vec![
                    self.params.user.clone(),
                    "0".to_string(),
                    "*".to_string(),
                    self.params.realname.clone(),
                ],
            )
            .to_string(),
        );
        Ok(())
    }

    async fn send_line(&self, line: Line) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::Connection("Not connected".to_string()));
        }
        self.sent.lock().push(line.to_string());
        Ok(())
    }

    async fn quit(&self, reason: &str) -> Result<()> {
        self.send_line(Line::new(Command::Quit, vec![reason.to_string()])).await?;
        self.close("Quit").await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.close("Disconnected").await;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport_id(&self) -> u64 {
        self.transport_id.load(Ordering::SeqCst)
    }

    fn nick(&self) -> String {
        self.nick.read().clone()
    }

    fn local_addr(&self) -> Option<String> {
        self.local_addr.clone().filter(|_| self.is_connected())
    }
}
