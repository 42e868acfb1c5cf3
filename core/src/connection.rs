//! Upstream IRC connections
//!
//! A [`Connection`] is the protocol handle a network session drives. The
//! session never touches sockets: it issues commands through this trait and
//! receives every inbound line as a [`ConnectionEvent`] on the channel it
//! handed to the [`Connector`].

use crate::protocol::{ctcp_action, Command, Line, Prefix};
use crate::numeric::NumericReply;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::{rustls, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Longest inbound line accepted, tags included
const MAX_LINE_BYTES: usize = 8192;

/// Everything needed to open an upstream connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub address: String,
    pub port: u16,
    pub tls: bool,
    pub nick: String,
    pub user: String,
    pub realname: String,
    pub password: Option<String>,
}

/// Something that happened on an upstream connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A line received from the server
    Line(Line),
    /// The transport with the given serial number closed
    Disconnected { reason: String, transport: u64 },
}

/// Protocol handle for one upstream connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open the transport and start registration
    async fn connect(&self) -> Result<()>;

    /// Queue a line for the server
    async fn send_line(&self, line: Line) -> Result<()>;

    /// Send QUIT and let the server close the connection
    async fn quit(&self, reason: &str) -> Result<()>;

    /// Tear the transport down immediately
    async fn disconnect(&self);

    /// Whether the transport is open
    fn is_connected(&self) -> bool;

    /// Serial number of the current transport, bumped by every `connect`
    fn transport_id(&self) -> u64;

    /// Nickname the server currently knows us by
    fn nick(&self) -> String;

    /// Local socket address as `ip:port`, when connected
    fn local_addr(&self) -> Option<String>;

    async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send_line(Line::new(Command::PrivMsg, vec![target.to_string(), text.to_string()]))
            .await
    }

    async fn action(&self, target: &str, text: &str) -> Result<()> {
        self.privmsg(target, &ctcp_action(text)).await
    }

    async fn notice(&self, target: &str, text: &str) -> Result<()> {
        self.send_line(Line::new(Command::Notice, vec![target.to_string(), text.to_string()]))
            .await
    }

    async fn topic(&self, channel: &str, topic: &str) -> Result<()> {
        self.send_line(Line::new(Command::Topic, vec![channel.to_string(), topic.to_string()]))
            .await
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.send_line(Line::new(Command::Join, vec![channel.to_string()])).await
    }

    async fn part(&self, channel: &str, reason: &str) -> Result<()> {
        let mut params = vec![channel.to_string()];
        if !reason.is_empty() {
            params.push(reason.to_string());
        }
        self.send_line(Line::new(Command::Part, params)).await
    }

    async fn set_nick(&self, nick: &str) -> Result<()> {
        self.send_line(Line::new(Command::Nick, vec![nick.to_string()])).await
    }

    async fn whois(&self, nick: &str) -> Result<()> {
        self.send_line(Line::new(Command::Whois, vec![nick.to_string()])).await
    }

    async fn invite(&self, nick: &str, channel: &str) -> Result<()> {
        self.send_line(Line::new(Command::Invite, vec![nick.to_string(), channel.to_string()]))
            .await
    }
}

/// Builds protocol handles for network sessions
pub trait Connector: Send + Sync {
    fn create(&self, params: ConnectParams, events: mpsc::Sender<ConnectionEvent>) -> Arc<dyn Connection>;
}

/// Connector for real TCP/TLS connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn create(&self, params: ConnectParams, events: mpsc::Sender<ConnectionEvent>) -> Arc<dyn Connection> {
        Arc::new(IrcConnection::new(params, events))
    }
}

/// Byte stream of an upstream connection (TCP or TLS)
trait IrcStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> IrcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Live transport state, shared with the reader and writer tasks
struct Transport {
    writer: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    local_addr: String,
}

struct Shared {
    params: ConnectParams,
    events: mpsc::Sender<ConnectionEvent>,
    nick: RwLock<String>,
    registered: AtomicBool,
    connected: AtomicBool,
    transport_id: AtomicU64,
    transport: Mutex<Option<Transport>>,
}

impl Shared {
    fn send_raw(&self, line: String) -> Result<()> {
        let transport = self.transport.lock();
        let transport = transport
            .as_ref()
            .ok_or_else(|| Error::Connection("Not connected".to_string()))?;
        trace!(network = %self.params.address, ">> {}", line);
        transport
            .writer
            .send(line)
            .map_err(|_| Error::Connection("Connection writer closed".to_string()))
    }

    /// Connection-level handling done before a line is handed to the session
    fn observe(&self, line: &Line) {
        match line.command {
            Command::Ping => {
                let pong = Line::new(Command::Pong, line.params.clone());
                if let Err(e) = self.send_raw(pong.to_string()) {
                    warn!("Failed to answer PING: {}", e);
                }
            }
            Command::Numeric(code) => match NumericReply::from_code(code) {
                Some(NumericReply::RplWelcome) => {
                    self.registered.store(true, Ordering::SeqCst);
                    if !line.param(0).is_empty() {
                        *self.nick.write() = line.param(0).to_string();
                    }
                }
                Some(NumericReply::ErrNicknameInUse) if !self.registered.load(Ordering::SeqCst) => {
                    let retry = format!("{}_", self.nick.read());
                    debug!("Nickname in use, retrying as {}", retry);
                    *self.nick.write() = retry.clone();
                    if let Err(e) = self.send_raw(Line::new(Command::Nick, vec![retry]).to_string()) {
                        warn!("Failed to retry nickname: {}", e);
                    }
                }
                _ => {}
            },
            Command::Nick => {
                let own = matches!(&line.prefix, Some(Prefix::User { nick, .. }) if *nick == *self.nick.read());
                if own && !line.param(0).is_empty() {
                    *self.nick.write() = line.param(0).to_string();
                }
            }
            _ => {}
        }
    }
}

/// IRC client connection over TCP, optionally wrapped in TLS
pub struct IrcConnection {
    shared: Arc<Shared>,
}

impl IrcConnection {
    /// Create an unconnected handle
    pub fn new(params: ConnectParams, events: mpsc::Sender<ConnectionEvent>) -> Self {
        let nick = params.nick.clone();
        Self {
            shared: Arc::new(Shared {
                params,
                events,
                nick: RwLock::new(nick),
                registered: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                transport_id: AtomicU64::new(0),
                transport: Mutex::new(None),
            }),
        }
    }

    async fn open_stream(&self) -> Result<(Box<dyn IrcStream>, String)> {
        let params = &self.shared.params;
        let tcp = TcpStream::connect((params.address.as_str(), params.port))
            .await
            .map_err(|e| Error::Connection(format!("Connect to {}:{} failed: {}", params.address, params.port, e)))?;
        let local_addr = tcp.local_addr()?.to_string();

        if !params.tls {
            return Ok((Box::new(tcp), local_addr));
        }

        let server_name = rustls::ServerName::try_from(params.address.as_str())
            .map_err(|e| Error::Connection(format!("Invalid TLS server name {}: {}", params.address, e)))?;
        let tls = tls_connector()
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {}", params.address, e)))?;
        Ok((Box::new(tls), local_addr))
    }

    fn register(&self) -> Result<()> {
        let params = &self.shared.params;
        if let Some(ref password) = params.password {
            self.shared.send_raw(Line::new(Command::Pass, vec![password.clone()]).to_string())?;
        }
        self.shared
            .send_raw(Line::new(Command::Nick, vec![self.shared.nick.read().clone()]).to_string())?;
        self.shared.send_raw(
            Line::new(
                Command::User,
                vec![params.user.clone(), "0".to_string(), "*".to_string(), params.realname.clone()],
            )
            .to_string(),
        )
    }
}

fn tls_connector() -> TlsConnector {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    let config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn write_loop<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if let Err(e) = writer.write_all(format!("{}\r\n", line).as_bytes()).await {
            error!("Error writing to server: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>, cancel: CancellationToken, transport: u64)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(512);
    // Set while skipping the rest of an overlong line
    let mut discarding = false;
    let reason = loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            _ = cancel.cancelled() => break "Disconnected".to_string(),
            read = limited.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break "Connection closed by server".to_string(),
            Ok(_) => {
                let complete = buf.last() == Some(&b'\n');
                if discarding {
                    discarding = !complete;
                    continue;
                }
                if !complete && buf.len() >= MAX_LINE_BYTES {
                    warn!(network = %shared.params.address, "Dropping line longer than {} bytes", MAX_LINE_BYTES);
                    discarding = true;
                    continue;
                }

                // Servers relay whatever encoding users type
                let text = String::from_utf8_lossy(&buf);
                let text = text.trim_end_matches(['\r', '\n']);
                if text.is_empty() {
                    continue;
                }
                trace!(network = %shared.params.address, "<< {}", text);
                let line = match Line::parse(text) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Error parsing line from {}: {}", shared.params.address, e);
                        continue;
                    }
                };
                shared.observe(&line);
                if shared.events.send(ConnectionEvent::Line(line)).await.is_err() {
                    break "Session closed".to_string();
                }
            }
            Err(e) => break format!("Read error: {}", e),
        }
    };

    cancel.cancel();
    {
        // A reconnect may already have installed a fresh transport
        let mut current = shared.transport.lock();
        if current.as_ref().map_or(false, |t| t.cancel.is_cancelled()) {
            current.take();
        }
    }
    if shared.transport_id.load(Ordering::SeqCst) != transport {
        debug!(network = %shared.params.address, "Replaced transport ended: {}", reason);
        return;
    }
    shared.registered.store(false, Ordering::SeqCst);
    if shared.connected.swap(false, Ordering::SeqCst) {
        info!(network = %shared.params.address, "Connection ended: {}", reason);
        let _ = shared
            .events
            .send(ConnectionEvent::Disconnected { reason, transport })
            .await;
    }
}

#[async_trait]
impl Connection for IrcConnection {
    async fn connect(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Err(Error::Connection("Already connected".to_string()));
        }

        let (stream, local_addr) = self.open_stream().await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, lines) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let transport = self.shared.transport_id.fetch_add(1, Ordering::SeqCst) + 1;

        *self.shared.transport.lock() = Some(Transport {
            writer,
            cancel: cancel.clone(),
            local_addr,
        });
        self.shared.registered.store(false, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(write_loop(write_half, lines, cancel.clone()));
        tokio::spawn(read_loop(read_half, self.shared.clone(), cancel, transport));

        info!(
            "Connected to {}:{}{}",
            self.shared.params.address,
            self.shared.params.port,
            if self.shared.params.tls { " (TLS)" } else { "" }
        );
        self.register()
    }

    async fn send_line(&self, line: Line) -> Result<()> {
        self.shared.send_raw(line.to_string())
    }

    async fn quit(&self, reason: &str) -> Result<()> {
        self.shared
            .send_raw(Line::new(Command::Quit, vec![reason.to_string()]).to_string())
    }

    async fn disconnect(&self) {
        if let Some(transport) = self.shared.transport.lock().take() {
            transport.cancel.cancel();
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn transport_id(&self) -> u64 {
        self.shared.transport_id.load(Ordering::SeqCst)
    }

    fn nick(&self) -> String {
        self.shared.nick.read().clone()
    }

    fn local_addr(&self) -> Option<String> {
        self.shared.transport.lock().as_ref().map(|t| t.local_addr.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn params(port: u16) -> ConnectParams {
        ConnectParams {
            address: "127.0.0.1".to_string(),
            port,
            tls: false,
            nick: "alice".to_string(),
            user: "alice".to_string(),
            realname: "Alice".to_string(),
            password: Some("secret".to_string()),
        }
    }

    #[tokio::test]
    async fn test_registration_ping_and_nick_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, mut events) = mpsc::channel(16);
        let conn = IrcConnection::new(params(port), events_tx);

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = tokio::io::split(socket);
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();
            for _ in 0..3 {
                received.push(lines.next_line().await.unwrap().unwrap());
            }
            write.write_all(b":srv 433 * alice :Nickname is already in use\r\n").await.unwrap();
            received.push(lines.next_line().await.unwrap().unwrap());
            write.write_all(b"PING :token\r\n").await.unwrap();
            received.push(lines.next_line().await.unwrap().unwrap());
            write.write_all(b":srv 001 alice_ :Welcome\r\n").await.unwrap();
            received
        });

        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert!(conn.local_addr().is_some());

        let received = server.await.unwrap();
        assert_eq!(received[0], "PASS secret");
        assert_eq!(received[1], "NICK alice");
        assert_eq!(received[2], "USER alice 0 * Alice");
        assert_eq!(received[3], "NICK alice_");
        assert_eq!(received[4], "PONG token");

        // 433, PING, 001 are all forwarded after being observed
        let mut seen = Vec::new();
        while seen.len() < 3 {
            match events.recv().await.unwrap() {
                ConnectionEvent::Line(line) => seen.push(line.command),
                ConnectionEvent::Disconnected { .. } => break,
            }
        }
        assert_eq!(seen, vec![Command::Numeric(433), Command::Ping, Command::Numeric(1)]);
        assert_eq!(conn.nick(), "alice_");

        // The server task is gone, so the stream ends
        match events.recv().await.unwrap() {
            ConnectionEvent::Disconnected { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!conn.is_connected());
    }

    async fn next_line(events: &mut mpsc::Receiver<ConnectionEvent>) -> Line {
        match events.recv().await.unwrap() {
            ConnectionEvent::Line(line) => line,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_latin1_text_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, mut events) = mpsc::channel(16);
        let conn = IrcConnection::new(params(port), events_tx);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b":bob!b@h PRIVMSG #chat :caf\xe9\r\n:bob!b@h PRIVMSG #chat :still here\r\n")
                .await
                .unwrap();
            socket
        });

        conn.connect().await.unwrap();
        let _socket = server.await.unwrap();

        let line = next_line(&mut events).await;
        assert_eq!(line.param(1), "caf\u{fffd}");
        let line = next_line(&mut events).await;
        assert_eq!(line.param(1), "still here");
        assert!(conn.is_connected());
        assert_eq!(conn.transport_id(), 1);
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (events_tx, mut events) = mpsc::channel(16);
        let conn = IrcConnection::new(params(port), events_tx);

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut flood = b":bob!b@h PRIVMSG #chat :".to_vec();
            flood.extend(std::iter::repeat(b'x').take(MAX_LINE_BYTES * 2));
            flood.extend_from_slice(b"\r\n:bob!b@h PRIVMSG #chat :short\r\n");
            socket.write_all(&flood).await.unwrap();
            socket
        });

        conn.connect().await.unwrap();
        let _socket = server.await.unwrap();

        let line = next_line(&mut events).await;
        assert_eq!(line.param(1), "short");
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let (events_tx, _events) = mpsc::channel(1);
        let conn = IrcConnection::new(params(1), events_tx);
        assert!(conn.privmsg("#rust", "hi").await.is_err());
        assert_eq!(conn.nick(), "alice");
    }
}
