//! Bouncer root object

use crate::config::{Config, UserConfig};
use crate::context::BouncerContext;
use crate::message::ClientUpdate;
use crate::user::User;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Delivery queue of one user, handed to the front-end relay
pub type UserUpdates = (String, mpsc::Receiver<ClientUpdate>);

/// All users and the services they share
#[derive(Debug)]
pub struct Bouncer {
    context: BouncerContext,
    users: RwLock<Vec<Arc<User>>>,
}

impl Bouncer {
    /// Create a bouncer without users
    pub fn new(context: BouncerContext) -> Self {
        Self {
            context,
            users: RwLock::new(Vec::new()),
        }
    }

    /// Create a bouncer and every configured user.
    ///
    /// The context's settings are replaced by the configuration's. Returns
    /// the delivery queue of each user alongside.
    pub fn from_config(config: &Config, mut context: BouncerContext) -> Result<(Self, Vec<UserUpdates>)> {
        config.validate()?;
        context.settings = config.bouncer.clone();
        let bouncer = Self::new(context);
        let mut queues = Vec::with_capacity(config.users.len());
        for user in &config.users {
            let (user, updates) = bouncer.add_user(user)?;
            queues.push((user.name().to_string(), updates));
        }
        Ok((bouncer, queues))
    }

    /// Shared services
    pub fn context(&self) -> &BouncerContext {
        &self.context
    }

    /// Add a user from configuration
    pub fn add_user(&self, config: &UserConfig) -> Result<(Arc<User>, mpsc::Receiver<ClientUpdate>)> {
        if self.user(&config.name).is_some() {
            return Err(Error::Config(format!("User {} already exists", config.name)));
        }
        let (user, updates) = User::from_config(config, self.context.clone())?;
        self.users.write().push(user.clone());
        info!(user = %config.name, networks = config.networks.len(), "User loaded");
        Ok((user, updates))
    }

    /// Remove a user, force-disconnecting all of their networks
    pub async fn remove_user(&self, name: &str) -> bool {
        let removed = {
            let mut users = self.users.write();
            let index = users.iter().position(|u| u.name() == name);
            index.map(|i| users.remove(i))
        };
        let Some(user) = removed else {
            return false;
        };
        for session in user.networks() {
            user.remove_network(session.name()).await;
        }
        true
    }

    /// Look up a user by name
    pub fn user(&self, name: &str) -> Option<Arc<User>> {
        self.users.read().iter().find(|u| u.name() == name).cloned()
    }

    /// All users
    pub fn users(&self) -> Vec<Arc<User>> {
        self.users.read().clone()
    }

    /// Open every autoconnect network of every user
    pub async fn connect_all(&self) {
        for user in self.users() {
            user.connect_all().await;
        }
    }

    /// Current configuration, including joined channels and scripts
    pub async fn save(&self) -> Config {
        let mut users = Vec::new();
        for user in self.users() {
            users.push(user.save().await);
        }
        Config {
            bouncer: self.context.settings.clone(),
            users,
        }
    }

    /// Disconnect every network gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down");
        for user in self.users() {
            user.disconnect_all().await;
        }
    }
}
