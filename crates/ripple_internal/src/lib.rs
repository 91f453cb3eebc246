//! # ripple Internal Library
//!
//! Re-exports the core ripple crates for convenience, and bundles their
//! plugins.

/// Layer 1: Build-phase framework.
pub use ripple_system;

/// Layer 2: Hook and operation engine.
pub use ripple_hooks;

/// Layer 1: Infrastructure plugins.
pub use ripple_core_plugins;

use ripple_core_plugins::TracingPlugin;
use ripple_hooks::HooksPlugin;
use ripple_system::plugin::{PluginGroup, PluginGroupBuilder};

/// Default plugins for most ripple applications.
///
/// Includes:
/// - [`TracingPlugin`] - Logging and observability
/// - [`HooksPlugin`] - The hook engine, with default configuration
///
/// # Example
///
/// ```no_run
/// use ripple_internal::DefaultPlugins;
/// use ripple_system::plugin::PluginGroup;
/// use ripple_system::server::Server;
///
/// Server::new()
///     .add_plugins(DefaultPlugins.build())
///     .run();
/// ```
///
/// # Customization
///
/// Swap in a configured hooks plugin:
///
/// ```no_run
/// use ripple_internal::DefaultPlugins;
/// use ripple_hooks::HooksPlugin;
/// use ripple_system::plugin::PluginGroup;
/// use ripple_system::server::Server;
///
/// Server::new()
///     .add_plugins(DefaultPlugins.build().disable::<HooksPlugin>())
///     .add_plugins(HooksPlugin::default().with_disabled_categories(["email"]))
///     .run();
/// ```
pub struct DefaultPlugins;

impl PluginGroup for DefaultPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::new()
            .add(TracingPlugin::default())
            .add(HooksPlugin::default())
    }
}

/// Minimal plugins for headless or testing scenarios.
///
/// Includes only [`HooksPlugin`]; no subscriber is installed.
pub struct MinimalPlugins;

impl PluginGroup for MinimalPlugins {
    fn build(self) -> PluginGroupBuilder {
        PluginGroupBuilder::new().add(HooksPlugin::default())
    }
}

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::{DefaultPlugins, MinimalPlugins};
    pub use ripple_core_plugins::{TracingConfig, TracingFormat, TracingPlugin};
    pub use ripple_hooks::prelude::*;
    pub use ripple_system::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_hooks::HooksManager;
    use ripple_system::server::Server;

    #[test]
    fn minimal_plugins_install_the_engine() {
        let mut server = Server::new();
        server.add_plugins(MinimalPlugins.build());
        server.finish();
        assert!(server.api::<HooksManager>().is_some());
    }

    #[test]
    fn default_plugins_can_swap_the_hooks_plugin() {
        let mut server = Server::new();
        server
            .add_plugins(DefaultPlugins.build().disable::<HooksPlugin>())
            .add_plugins(HooksPlugin::default().with_pruning(false));
        server.finish();
        let hooks = server.api::<HooksManager>().unwrap();
        assert!(!hooks.config().pruning);
    }
}
