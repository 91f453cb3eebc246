//! Core infrastructure plugins for ripple.
//!
//! - [`TracingPlugin`] - Logging and observability via the `tracing` crate
//!
//! # Example
//!
//! ```
//! use ripple_system::server::Server;
//! use ripple_core_plugins::TracingPlugin;
//! use tracing::Level;
//!
//! Server::new()
//!     .add_plugins(TracingPlugin::default().with_level(Level::DEBUG))
//!     .run();
//! ```
//!
//! # Architecture
//!
//! This crate is part of Layer 1 infrastructure:
//!
//! - **Layer 1** (`ripple_system`, `ripple_core_plugins`): Core primitives and infrastructure
//! - **Layer 2** (`ripple_hooks`): Hook and operation engine

mod tracing_plugin;

pub use tracing_plugin::{TracingConfig, TracingFormat, TracingPlugin};
