//! IRC Bouncer Modules
//!
//! This crate provides the script types sessions can attach and the HTTP
//! link preview service.

pub mod ignore;
pub mod preview;
pub mod rules;

pub use ignore::IgnoreHook;
pub use preview::HttpPreview;
pub use rules::RulesHook;

use ircbnc_core::{Error, Hook, HookFactory, Result, ScriptConfig};
use std::sync::Arc;

/// Hook factory for the built-in script types
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptRegistry;

impl ScriptRegistry {
    /// Script types this registry can build
    pub fn kinds(&self) -> &'static [&'static str] {
        &[rules::RULES, ignore::IGNORE]
    }
}

impl HookFactory for ScriptRegistry {
    fn build(&self, config: &ScriptConfig) -> Result<Arc<dyn Hook>> {
        match config.kind.as_str() {
            rules::RULES => Ok(Arc::new(RulesHook::from_config(config)?)),
            ignore::IGNORE => Ok(Arc::new(IgnoreHook::from_config(config)?)),
            other => Err(Error::Hook(format!("Unknown script type: {}", other))),
        }
    }
}
