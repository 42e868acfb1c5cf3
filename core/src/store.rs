//! Message persistence
//!
//! The pipeline commits every finished message through a [`MessageStore`],
//! which assigns the message its identifier. Identifiers are positive, unique
//! per owner and increase in commit order.

use crate::message::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Durable message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return its new identifier
    async fn insert(&self, owner: &str, message: &Message) -> Result<i64>;

    /// Drop every stored message of one channel
    async fn clear_channel(&self, owner: &str, network: &str, channel: &str) -> Result<()>;
}

fn same_channel(message: &Message, network: &str, channel: &str) -> bool {
    message.network == network && message.channel.eq_ignore_ascii_case(channel)
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    messages: DashMap<String, Vec<Message>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed messages of one owner, in commit order
    pub fn messages(&self, owner: &str) -> Vec<Message> {
        self.messages.get(owner).map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, owner: &str, message: &Message) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = message.clone();
        stored.id = Some(id);
        self.messages.entry(owner.to_string()).or_default().push(stored);
        Ok(id)
    }

    async fn clear_channel(&self, owner: &str, network: &str, channel: &str) -> Result<()> {
        if let Some(mut messages) = self.messages.get_mut(owner) {
            messages.retain(|m| !same_channel(m, network, channel));
        }
        Ok(())
    }
}

/// File name stem for an owner: lower-case letters, digits, `-` and `_`
/// are kept, every other byte becomes `%xx`
fn owner_stem(owner: &str) -> String {
    let mut stem = String::with_capacity(owner.len());
    for byte in owner.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => stem.push(byte as char),
            _ => stem.push_str(&format!("%{:02x}", byte)),
        }
    }
    stem
}

/// Store writing one JSON document per line into `<dir>/<owner>.jsonl`.
///
/// Clearing a channel records the highest identifier handed out in
/// `<dir>/<owner>.last`, so identifiers are never reused after a restart.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Last identifier handed out per owner, loaded lazily
    last_ids: Mutex<HashMap<String, i64>>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create {}: {}", dir.display(), e)))?;
        info!("Message store at {}", dir.display());
        Ok(Self {
            dir,
            last_ids: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, owner: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", owner_stem(owner)))
    }

    fn mark_path(&self, owner: &str) -> PathBuf {
        self.dir.join(format!("{}.last", owner_stem(owner)))
    }

    /// Highest identifier ever handed out for an owner
    async fn resume_id(&self, owner: &str) -> Result<i64> {
        let stored = self.load(owner).await?.iter().filter_map(|m| m.id).max().unwrap_or(0);
        let path = self.mark_path(owner);
        let mark = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|e| Error::Store(format!("Corrupt id mark {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::Store(format!("Failed to read {}: {}", path.display(), e))),
        };
        let last = stored.max(mark);
        debug!(owner, "Resuming message ids after {}", last);
        Ok(last)
    }

    /// Every message stored for an owner
    pub async fn load(&self, owner: &str) -> Result<Vec<Message>> {
        let path = self.path_for(owner);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Store(format!("Failed to open {}: {}", path.display(), e))),
        };

        let mut lines = BufReader::new(file).lines();
        let mut messages = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            messages.push(serde_json::from_str(&line)?);
        }
        Ok(messages)
    }

    async fn write_all(&self, owner: &str, messages: &[Message]) -> Result<()> {
        let mut content = String::new();
        for message in messages {
            content.push_str(&serde_json::to_string(message)?);
            content.push('\n');
        }
        tokio::fs::write(self.path_for(owner), content).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn insert(&self, owner: &str, message: &Message) -> Result<i64> {
        let mut last_ids = self.last_ids.lock().await;
        let last = match last_ids.get(owner) {
            Some(&last) => last,
            None => self.resume_id(owner).await?,
        };

        let id = last + 1;
        let mut stored = message.clone();
        stored.id = Some(id);
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(owner))
            .await
            .map_err(|e| Error::Store(format!("Failed to open log for {}: {}", owner, e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        last_ids.insert(owner.to_string(), id);
        Ok(id)
    }

    async fn clear_channel(&self, owner: &str, network: &str, channel: &str) -> Result<()> {
        // Hold the id lock so no insert interleaves with the rewrite
        let mut last_ids = self.last_ids.lock().await;
        let mut messages = self.load(owner).await?;
        let before = messages.len();
        messages.retain(|m| !same_channel(m, network, channel));
        if messages.len() == before {
            return Ok(());
        }

        let last = match last_ids.get(owner) {
            Some(&last) => last,
            None => self.resume_id(owner).await?,
        };
        tokio::fs::write(self.mark_path(owner), last.to_string())
            .await
            .map_err(|e| Error::Store(format!("Failed to record last id for {}: {}", owner, e)))?;
        last_ids.insert(owner.to_string(), last);
        self.write_all(owner, &messages).await
    }
}
