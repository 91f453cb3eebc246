//! Server integration.
//!
//! [`HooksPlugin`] installs the [`HooksManager`] API and the [`HooksConfig`]
//! global, and ties the server lifecycle to system events.
//!
//! # Lifecycle
//!
//! - **`build()`** inserts [`HooksConfig`] and [`HooksManager`], then
//!   registers the hooks queued with [`HooksPlugin::with_hook`]. Plugins
//!   depending on `HooksPlugin` register their own hooks in their `build()`.
//! - **`ready()`** fires `server_startup`.
//! - **`cleanup()`** fires `before_server_shutdown`, then `server_shutdown`.
//!
//! # Example
//!
//! ```
//! use ripple_hooks::hook::FnHook;
//! use ripple_hooks::manager::HooksManager;
//! use ripple_hooks::plugin::HooksPlugin;
//! use ripple_system::server::Server;
//!
//! let mut server = Server::new();
//! server.add_plugins(
//!     HooksPlugin::default()
//!         .with_disabled_categories(["email"])
//!         .with_hook(FnHook::new("boot", &["server_startup"], |_cx| Ok(()))),
//! );
//! server.finish();
//! assert!(server.api::<HooksManager>().is_some());
//! ```

use std::sync::Arc;

use ripple_system::plugin::Plugin;
use ripple_system::resource::GlobalResource;
use ripple_system::server::Server;

use crate::events::Event;
use crate::hook::Hook;
use crate::manager::HooksManager;

// ─────────────────────────────────────────────────────────────────────────────
// HooksConfig Resource
// ─────────────────────────────────────────────────────────────────────────────

/// Hook engine configuration.
///
/// Read by every new [`Transaction`](crate::transaction::Transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HooksConfig {
    /// Whether dispatch caches which hooks can be skipped per
    /// `(event, rtype, etype)`.
    pub pruning: bool,
    /// Categories disabled when a transaction opens.
    pub disabled_categories: Vec<String>,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            pruning: true,
            disabled_categories: Vec::new(),
        }
    }
}

impl GlobalResource for HooksConfig {}

// ─────────────────────────────────────────────────────────────────────────────
// HooksPlugin
// ─────────────────────────────────────────────────────────────────────────────

/// Installs the hook engine.
///
/// # APIs Provided
///
/// | API | Description |
/// |-----|-------------|
/// | [`HooksManager`] | Hook registry and dispatcher |
///
/// # Resources Provided
///
/// | Resource | Scope | Description |
/// |----------|-------|-------------|
/// | [`HooksConfig`] | Global | Engine configuration (read-only) |
#[derive(Clone, Default)]
pub struct HooksPlugin {
    config: HooksConfig,
    hooks: Vec<Arc<dyn Hook>>,
}

impl HooksPlugin {
    /// Enables or disables pruning.
    #[must_use]
    pub fn with_pruning(mut self, enabled: bool) -> Self {
        self.config.pruning = enabled;
        self
    }

    /// Disables categories in every new transaction.
    #[must_use]
    pub fn with_disabled_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .disabled_categories
            .extend(categories.into_iter().map(Into::into));
        self
    }

    /// Queues a hook registered at build time.
    #[must_use]
    pub fn with_hook(mut self, hook: impl Hook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Returns the configuration the plugin installs.
    #[must_use]
    pub fn config(&self) -> &HooksConfig {
        &self.config
    }
}

fn fire_lifecycle(server: &Server, event: Event) {
    let Some(hooks) = server.api::<HooksManager>() else {
        tracing::warn!(event = %event, "hooks manager missing, lifecycle event not fired");
        return;
    };
    if let Err(err) = hooks.call_system_hooks(event) {
        tracing::error!(event = %event, error = %err, "lifecycle hook failed");
    }
}

impl Plugin for HooksPlugin {
    fn build(&self, server: &mut Server) {
        let hooks = HooksManager::with_config(self.config.clone());
        for hook in &self.hooks {
            if let Err(err) = hooks.register_arc(Arc::clone(hook)) {
                panic!("HooksPlugin: {err}");
            }
        }
        tracing::debug!(
            hooks = self.hooks.len(),
            pruning = self.config.pruning,
            "hooks manager installed"
        );
        server.insert_global(self.config.clone());
        server.insert_api(hooks);
    }

    fn ready(&self, server: &mut Server) {
        let Some(hooks) = server.api::<HooksManager>() else {
            return;
        };
        if let Err(err) = hooks.call_system_hooks(Event::ServerStartup) {
            panic!("server_startup hook failed: {err}");
        }
    }

    fn cleanup(&self, server: &mut Server) {
        fire_lifecycle(server, Event::BeforeServerShutdown);
        fire_lifecycle(server, Event::ServerShutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{FnHook, HookError};
    use parking_lot::Mutex;

    fn journaled(journal: &Arc<Mutex<Vec<String>>>, events: &[&'static str]) -> FnHook {
        let journal = Arc::clone(journal);
        FnHook::new("lifecycle", events, move |cx| {
            journal.lock().push(cx.event().to_string());
            Ok(())
        })
    }

    #[test]
    fn build_installs_config_and_manager() {
        let mut server = Server::new();
        server.add_plugins(
            HooksPlugin::default()
                .with_pruning(false)
                .with_disabled_categories(["email"]),
        );
        server.finish();

        let config = server.get_global::<HooksConfig>().unwrap();
        assert!(!config.pruning);
        assert_eq!(config.disabled_categories, vec!["email"]);
        let hooks = server.api::<HooksManager>().unwrap();
        assert_eq!(hooks.config(), &*config);
    }

    #[test]
    fn lifecycle_fires_system_events() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut server = Server::new();
        server.add_plugins(HooksPlugin::default().with_hook(journaled(
            &journal,
            &["server_startup", "before_server_shutdown", "server_shutdown"],
        )));
        server.finish();
        server.cleanup();

        assert_eq!(
            *journal.lock(),
            vec!["server_startup", "before_server_shutdown", "server_shutdown"]
        );
    }

    #[test]
    #[should_panic(expected = "declares an unknown event")]
    fn invalid_hook_aborts_build() {
        let mut server = Server::new();
        server.add_plugins(
            HooksPlugin::default().with_hook(FnHook::new("typo", &["server_starup"], |_| Ok(()))),
        );
        server.finish();
    }

    #[test]
    #[should_panic(expected = "server_startup hook failed")]
    fn failing_startup_hook_aborts_startup() {
        let mut server = Server::new();
        server.add_plugins(HooksPlugin::default().with_hook(FnHook::new(
            "broken",
            &["server_startup"],
            |_| Err(HookError::failed("no database")),
        )));
        server.finish();
    }
}
