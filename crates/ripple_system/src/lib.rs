//! The foundational build-time framework for ripple (Layer 1).
//!
//! `ripple_system` provides the primitives used to assemble an engine
//! before any transaction runs:
//!
//! - [`api`] - API trait for capability registration
//! - [`plugin`] - Plugin trait for extensible functionality
//! - [`resource`] - Global, server-lifetime state
//! - [`server`] - Server runtime for plugin orchestration
//!
//! # Architecture
//!
//! - **Layer 1** (`ripple_system`): build-phase primitives (this crate)
//! - **Layer 2** (`ripple_hooks`): hook and operation engine
//! - **Layer 1** (`ripple_core_plugins`): infrastructure plugins (tracing)
//!
//! # Example
//!
//! ```
//! use ripple_system::plugin::Plugin;
//! use ripple_system::server::Server;
//! use ripple_system::resource::GlobalResource;
//!
//! #[derive(Default)]
//! struct StoreConfig { read_only: bool }
//! impl GlobalResource for StoreConfig {}
//!
//! struct StorePlugin;
//!
//! impl Plugin for StorePlugin {
//!     fn build(&self, server: &mut Server) {
//!         server.insert_global(StoreConfig::default());
//!     }
//! }
//!
//! Server::new()
//!     .add_plugins(StorePlugin)
//!     .run();
//! ```

/// API trait for capability registration.
pub mod api;

/// Plugin trait for extensible functionality.
pub mod plugin;

/// Global resource container.
pub mod resource;

/// Server runtime for plugin orchestration.
pub mod server;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::api::*;
    pub use crate::plugin::*;
    pub use crate::resource::*;
    pub use crate::server::*;
}
