//! Integration tests for network sessions driven by server lines

use ircbnc_core::testing::{RecordingConnection, RecordingConnector};
use ircbnc_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

fn network(name: &str, channels: &[&str]) -> NetworkConfig {
    NetworkConfig {
        name: name.to_string(),
        nick: "alice".to_string(),
        user: "alice".to_string(),
        realname: "Alice".to_string(),
        password: Some("secret".to_string()),
        address: "irc.example.org".to_string(),
        port: 6697,
        tls: true,
        autoconnect: true,
        channels: channels.iter().map(|c| c.to_string()).collect(),
        scripts: Vec::new(),
    }
}

struct Harness {
    user: Arc<User>,
    session: Arc<NetworkSession>,
    updates: mpsc::Receiver<ClientUpdate>,
    connector: Arc<RecordingConnector>,
    store: Arc<MemoryStore>,
    ident: Arc<IdentRegistry>,
}

impl Harness {
    fn new(channels: &[&str]) -> Self {
        let connector = RecordingConnector::new();
        let store = Arc::new(MemoryStore::new());
        let ident = Arc::new(IdentRegistry::new());
        let context = BouncerContext::new(BouncerConfig::default())
            .with_connector(connector.clone())
            .with_store(store.clone())
            .with_ident(ident.clone());
        let (user, updates) = User::new("alice", "", context);
        let session = user.add_network(network("libera", channels)).unwrap();
        Self {
            user,
            session,
            updates,
            connector,
            store,
            ident,
        }
    }

    async fn open(&self) -> Arc<RecordingConnection> {
        self.session.open().await.unwrap();
        let connection = self.connector.last().unwrap();
        connection.clear_sent();
        connection
    }

    /// Handle a server line on the calling task
    async fn feed(&self, raw: &str) {
        let line = Line::parse(raw).unwrap();
        self.session.handle_event(ConnectionEvent::Line(line)).await;
    }

    /// Wait for the next update the session delivers
    async fn next_update(&mut self) -> ClientUpdate {
        timeout(Duration::from_secs(5), self.updates.recv())
            .await
            .expect("timed out waiting for update")
            .expect("delivery queue closed")
    }

    fn drain(&mut self) -> Vec<ClientUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            updates.push(update);
        }
        updates
    }
}

#[tokio::test]
async fn test_open_registers_and_claims_ident() {
    let h = Harness::new(&[]);
    assert_eq!(h.session.status(), SessionStatus::Configured);

    h.session.open().await.unwrap();
    let connection = h.connector.last().unwrap();
    assert_eq!(connection.params().address, "irc.example.org");
    assert_eq!(connection.params().port, 6697);
    assert!(connection.params().tls);
    assert_eq!(
        connection.sent(),
        vec![
            "PASS secret".to_string(),
            "NICK alice".to_string(),
            "USER alice 0 * Alice".to_string(),
        ]
    );
    assert_eq!(h.session.status(), SessionStatus::Connecting);
    assert_eq!(h.session.ident_port(), 40000);
    assert_eq!(h.ident.lookup(40000).as_deref(), Some("alice"));

    // Opening twice reuses the live connection
    h.session.open().await.unwrap();
    assert_eq!(h.connector.connections().len(), 1);
}

#[tokio::test]
async fn test_missing_local_address_skips_ident() {
    let h = Harness::new(&[]);
    h.connector.set_local_addr(None);
    h.session.open().await.unwrap();
    assert_eq!(h.session.ident_port(), 0);
    assert!(h.ident.is_empty());
}

#[tokio::test]
async fn test_failed_connect() {
    let h = Harness::new(&[]);
    h.session.open().await.unwrap();
    let first = h.connector.last().unwrap();
    first.close("reset").await;

    // A fresh connection is created by the next open
    h.connector.set_local_addr(Some("127.0.0.1:40001"));
    h.session.open().await.unwrap();
    let second = h.connector.last().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    second.close("reset").await;
    second.fail_next_connect();
    assert_err!(h.session.connect().await);
    assert_eq!(h.session.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_welcome_joins_saved_channels() {
    let mut h = Harness::new(&["#rust", "#tokio"]);
    let connection = h.open().await;

    h.feed(":irc.example.org 001 alice_ :Welcome to the network").await;

    assert_eq!(h.session.status(), SessionStatus::Connected);
    assert_eq!(h.session.nick().await, "alice_");
    assert_eq!(
        connection.sent(),
        vec!["JOIN #rust".to_string(), "JOIN #tokio".to_string()]
    );

    let updates = h.drain();
    assert!(matches!(
        updates.first(),
        Some(ClientUpdate::NetworkState { connected: true, .. })
    ));
    let markers: Vec<_> = h
        .store
        .messages("alice")
        .into_iter()
        .filter(|m| m.command == Some(MessageKind::Connect))
        .map(|m| m.channel)
        .collect();
    assert_eq!(markers, vec!["#rust".to_string(), "#tokio".to_string()]);
}

#[tokio::test]
async fn test_join_names_part() {
    let mut h = Harness::new(&[]);
    h.open().await;

    h.feed(":alice!a@host JOIN #chat").await;
    assert!(h.session.channel_data("#chat").await.is_some());

    h.feed(":irc.example.org 353 alice = #chat :@carol +bob").await;
    h.feed(":irc.example.org 353 alice = #chat :alice").await;
    h.feed(":irc.example.org 366 alice #chat :End of /NAMES list.").await;

    let data = h.session.channel_data("#CHAT").await.unwrap();
    assert_eq!(data.users.len(), 3);
    assert_eq!(data.users.privilege_of("carol"), Some(Privilege::Operator));
    assert_eq!(data.users.privilege_of("bob"), Some(Privilege::Voice));
    assert_eq!(data.users.members()[0].name, "carol");
    assert!(h
        .drain()
        .iter()
        .any(|u| matches!(u, ClientUpdate::ChannelData(d) if d.name == "#chat" && d.users.len() == 3)));

    h.feed(":dave!d@host JOIN #chat").await;
    assert!(h.session.channel_data("#chat").await.unwrap().has_member("dave"));

    h.feed(":bob!b@host PART #chat :bye").await;
    let data = h.session.channel_data("#chat").await.unwrap();
    assert!(!data.has_member("bob"));
    assert!(!data.modes.has_mode('+', "bob"));

    h.feed(":alice!a@host PART #chat").await;
    assert!(h.session.channel_data("#chat").await.is_none());

    let kinds: Vec<_> = h.store.messages("alice").into_iter().filter_map(|m| m.command).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::Join, MessageKind::Join, MessageKind::Part, MessageKind::Part]
    );
}

#[tokio::test]
async fn test_mode_before_names_sets_prefix() {
    let h = Harness::new(&[]);
    h.open().await;
    h.feed(":alice!a@host JOIN #chat").await;

    h.feed(":carol!c@host MODE #chat +o dave").await;
    h.feed(":irc.example.org 353 alice = #chat :dave").await;
    h.feed(":irc.example.org 366 alice #chat :End of /NAMES list.").await;

    let data = h.session.channel_data("#chat").await.unwrap();
    assert_eq!(data.modes.prefix_of("dave"), Some('@'));
    assert_eq!(data.users.privilege_of("dave"), Some(Privilege::Operator));

    h.feed(":carol!c@host MODE #chat -o dave").await;
    let data = h.session.channel_data("#chat").await.unwrap();
    assert_eq!(data.modes.prefix_of("dave"), None);
    assert_eq!(data.users.privilege_of("dave"), Some(Privilege::None));

    let modes: Vec<_> = h
        .store
        .messages("alice")
        .into_iter()
        .filter(|m| m.command == Some(MessageKind::Mode))
        .map(|m| m.body)
        .collect();
    assert_eq!(modes, vec!["+o dave".to_string(), "-o dave".to_string()]);
}

#[tokio::test]
async fn test_nick_and_quit_follow_members() {
    let h = Harness::new(&[]);
    h.open().await;
    h.feed(":alice!a@host JOIN #a").await;
    h.feed(":alice!a@host JOIN #b").await;
    h.feed(":irc.example.org 353 alice = #a :alice bob").await;
    h.feed(":irc.example.org 366 alice #a :End").await;
    h.feed(":irc.example.org 353 alice = #b :alice bob").await;
    h.feed(":irc.example.org 366 alice #b :End").await;

    h.feed(":bob!b@host NICK robert").await;
    for channel in ["#a", "#b"] {
        let data = h.session.channel_data(channel).await.unwrap();
        assert!(data.has_member("robert"));
        assert!(!data.has_member("bob"));
    }

    h.feed(":robert!b@host QUIT :gone").await;
    assert!(!h.session.channel_data("#a").await.unwrap().has_member("robert"));

    let stored = h.store.messages("alice");
    assert_eq!(stored.iter().filter(|m| m.command == Some(MessageKind::Nick)).count(), 2);
    assert_eq!(stored.iter().filter(|m| m.command == Some(MessageKind::Quit)).count(), 2);

    h.feed(":alice!a@host NICK alicia").await;
    assert_eq!(h.session.nick().await, "alicia");
}

#[tokio::test]
async fn test_whois_flow() {
    let mut h = Harness::new(&[]);
    h.open().await;

    let pending = h.session.get_whois_data("carol").await;
    assert_eq!(pending.nick, "carol");
    assert_eq!(pending.idle, 0);

    h.feed(":irc.example.org 311 alice carol ~c host.example * :Carol C").await;
    h.feed(":irc.example.org 319 alice carol :@#ops +#chat #lobby").await;
    h.feed(":irc.example.org 317 alice carol 42 1700000000 :seconds idle, signon time").await;

    let partial = h.session.get_whois_data_if_exists("carol").await.unwrap();
    assert_eq!(partial.idle, 42);
    assert_eq!(partial.user, "~c");

    h.feed(":irc.example.org 318 alice carol :End of /WHOIS list.").await;
    let whois = h
        .drain()
        .into_iter()
        .find_map(|u| match u {
            ClientUpdate::Whois(data) => Some(data),
            _ => None,
        })
        .unwrap();
    assert_eq!(whois.idle, 42);
    assert_eq!(whois.signon, 1_700_000_000);
    assert_eq!(whois.real_name, "Carol C");
    assert_eq!(whois.channels.len(), 3);

    assert!(h.session.get_whois_data_if_exists("carol").await.is_none());
    assert_eq!(h.session.get_whois_data("carol").await.idle, 0);
    assert!(h.session.remove_whois_data("carol").await.is_some());
}

#[tokio::test]
async fn test_topic_and_list() {
    let mut h = Harness::new(&[]);
    h.open().await;
    h.feed(":alice!a@host JOIN #chat").await;

    h.feed(":irc.example.org 332 alice #chat :Welcome all").await;
    h.feed(":irc.example.org 333 alice #chat carol 1700000000").await;
    let data = h.session.channel_data("#chat").await.unwrap();
    assert_eq!(data.topic, "Welcome all");
    assert_eq!(data.topic_set_by, "carol");
    assert_eq!(data.topic_set_at, 1_700_000_000);

    h.feed(":carol!c@host TOPIC #chat :Changed").await;
    assert_eq!(h.session.channel_data("#chat").await.unwrap().topic, "Changed");

    h.drain();
    h.feed(":irc.example.org 322 alice #chat 12 :Changed").await;
    h.feed(":irc.example.org 322 alice #rust 900 :Rust").await;
    h.feed(":irc.example.org 323 alice :End of /LIST").await;

    let listed = h.session.all_channels().await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[1].users, 900);
    assert!(h
        .drain()
        .iter()
        .any(|u| matches!(u, ClientUpdate::ChannelList { channels, .. } if channels.len() == 2)));
}

#[tokio::test]
async fn test_unhandled_lines_go_to_raw_channel() {
    let h = Harness::new(&[]);
    h.open().await;

    h.feed(":irc.example.org 372 alice :- Message of the day").await;
    h.feed(":irc.example.org 433 alice alice :Nickname is already in use").await;

    let stored = h.store.messages("alice");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|m| m.channel == "*raw" && m.command == Some(MessageKind::Raw)));
    assert_eq!(stored[0].body, "372 - Message of the day");
}

#[tokio::test]
async fn test_event_loop_processes_injected_lines() {
    let mut h = Harness::new(&[]);
    let connection = h.open().await;

    connection
        .inject(":bob!b@host PRIVMSG alice :\u{1}ACTION waves\u{1}")
        .await
        .unwrap();

    match h.next_update().await {
        ClientUpdate::Message(message) => {
            assert_eq!(message.channel, "bob");
            assert_eq!(message.command, Some(MessageKind::Action));
            assert_eq!(message.body, "waves");
        }
        other => panic!("unexpected update: {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_ignores_close_of_previous_transport() {
    let mut h = Harness::new(&[]);
    let connection = h.open().await;
    connection.close("drop").await;

    // Reconnect before the session has seen the close
    assert_ok!(h.session.connect().await);
    connection.inject(":srv 001 alice :Welcome").await.unwrap();

    loop {
        if let ClientUpdate::NetworkState { connected, .. } = h.next_update().await {
            assert!(connected);
            break;
        }
    }
    assert!(h.session.is_connected());
    assert_eq!(h.session.status(), SessionStatus::Connected);
    assert_eq!(h.session.ident_port(), 40000);
    assert_eq!(h.ident.lookup(40000).as_deref(), Some("alice"));
    assert_eq!(h.ident.len(), 1);
}

#[tokio::test]
async fn test_reopen_releases_previous_ident_port() {
    let h = Harness::new(&[]);
    let first = h.open().await;
    first.close("drop").await;

    h.connector.set_local_addr(Some("127.0.0.1:40001"));
    h.session.open().await.unwrap();
    assert_eq!(h.ident.lookup(40000), None);
    assert_eq!(h.ident.lookup(40001).as_deref(), Some("alice"));

    h.session.force_disconnect().await;
    assert!(h.ident.is_empty());
    assert_eq!(h.session.ident_port(), 0);
}

#[tokio::test]
async fn test_connect_while_connected_fails() {
    let h = Harness::new(&[]);
    h.open().await;
    assert_err!(h.session.connect().await);
    assert_eq!(h.ident.lookup(40000).as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_disconnect_writes_markers_and_releases_ident() {
    let mut h = Harness::new(&[]);
    let connection = h.open().await;
    h.feed(":alice!a@host JOIN #chat").await;
    h.drain();
    assert_eq!(h.ident.len(), 1);

    connection.close("Connection reset by peer").await;

    let mut marker = None;
    loop {
        match h.next_update().await {
            ClientUpdate::Message(message) => marker = Some(message),
            ClientUpdate::NetworkState { connected, .. } => {
                assert!(!connected);
                break;
            }
            _ => {}
        }
    }
    let marker = marker.unwrap();
    assert_eq!(marker.channel, "#chat");
    assert_eq!(marker.command, Some(MessageKind::Disconnect));
    assert_eq!(marker.body, "Connection reset by peer");

    assert!(h.ident.is_empty());
    assert_eq!(h.session.ident_port(), 0);
    assert_eq!(h.session.status(), SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_graceful_disconnect_sends_quit() {
    let h = Harness::new(&[]);
    let connection = h.open().await;

    assert_ok!(h.session.disconnect().await);
    assert_eq!(connection.sent(), vec!["QUIT ircbnc".to_string()]);
    assert!(h.ident.is_empty());

    // Nothing to do once disconnected
    assert_ok!(h.session.disconnect().await);
}

#[tokio::test]
async fn test_remove_network() {
    let h = Harness::new(&["#chat"]);
    let connection = h.open().await;

    assert!(h.user.remove_network("LIBERA").await);
    assert!(!connection.is_connected());
    assert_eq!(h.session.status(), SessionStatus::Removed);
    assert!(h.ident.is_empty());
    assert!(h.user.get_network("libera").is_none());
    assert_err!(h.session.open().await);
    assert!(!h.user.remove_network("libera").await);
}

#[tokio::test]
async fn test_nick_change_while_offline() {
    let h = Harness::new(&[]);
    assert_ok!(h.session.set_nick("alicia").await);
    assert_eq!(h.session.nick().await, "alicia");
    assert_eq!(h.session.net_data().await.nick, "alicia");
    assert!(!h.session.net_data().await.connected);
}

#[tokio::test]
async fn test_nick_change_while_online_waits_for_server() {
    let h = Harness::new(&[]);
    let connection = h.open().await;

    assert_ok!(h.session.set_nick("alicia").await);
    assert_eq!(connection.sent(), vec!["NICK alicia".to_string()]);
    assert_eq!(h.session.nick().await, "alice");
}

#[tokio::test]
async fn test_save_keeps_channels_and_scripts() {
    let h = Harness::new(&["#saved"]);
    h.open().await;
    h.feed(":alice!a@host JOIN #chat").await;
    h.feed(":bob!b@host PRIVMSG alice :psst").await;

    let saved = h.session.save().await;
    assert_eq!(saved.channels, vec!["#chat".to_string(), "#saved".to_string()]);
    assert_eq!(saved.password.as_deref(), Some("secret"));

    let user = h.user.save().await;
    assert_eq!(user.name, "alice");
    assert_eq!(user.networks.len(), 1);
}

#[test]
fn test_clear_channel_without_runtime_setup() {
    let h = Harness::new(&[]);
    tokio_test::block_on(async {
        h.session
            .receive_message("#chat", "bob", MessageKind::Privmsg, "one")
            .await
            .unwrap();
        h.session
            .receive_message("#other", "bob", MessageKind::Privmsg, "two")
            .await
            .unwrap();
        assert_ok!(h.session.clear_channel("#chat").await);
    });
    let stored = h.store.messages("alice");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].channel, "#other");
}
