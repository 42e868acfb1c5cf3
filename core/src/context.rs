//! Shared collaborators handed to every user and session

use crate::config::BouncerConfig;
use crate::connection::{Connector, TcpConnector};
use crate::hook::{HookFactory, NoHooks};
use crate::ident::IdentRegistry;
use crate::preview::{NoPreview, PreviewService};
use crate::store::{MemoryStore, MessageStore};
use std::sync::Arc;

/// Process-wide services a network session depends on
#[derive(Clone)]
pub struct BouncerContext {
    pub store: Arc<dyn MessageStore>,
    pub preview: Arc<dyn PreviewService>,
    pub ident: Arc<IdentRegistry>,
    pub connector: Arc<dyn Connector>,
    pub hooks: Arc<dyn HookFactory>,
    pub settings: BouncerConfig,
}

impl BouncerContext {
    /// Context with in-memory persistence, no previews and no script types
    pub fn new(settings: BouncerConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            preview: Arc::new(NoPreview),
            ident: Arc::new(IdentRegistry::new()),
            connector: Arc::new(TcpConnector),
            hooks: Arc::new(NoHooks),
            settings,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewService>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_ident(mut self, ident: Arc<IdentRegistry>) -> Self {
        self.ident = ident;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn HookFactory>) -> Self {
        self.hooks = hooks;
        self
    }
}

impl std::fmt::Debug for BouncerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BouncerContext")
            .field("settings", &self.settings)
            .field("ident_ports", &self.ident.len())
            .finish()
    }
}
