//! API trait for capability registration.
//!
//! APIs are build-time registries that plugins use to expose capabilities
//! to other plugins and to the code that later drives transactions. The
//! hook registry (`HooksManager` in `ripple_hooks`) is the main example:
//! plugins register hooks into it while the server builds, and transactions
//! read from it afterwards.
//!
//! # API vs Global Resource
//!
//! | Aspect | API | Global resource |
//! |--------|-----|-----------------|
//! | **Purpose** | Registries populated by plugins | Plain configuration values |
//! | **Access method** | `server.api::<A>()` | `server.get_global::<T>()` |
//! | **Mutation** | Interior mutability during build | Replaced wholesale |
//!
//! # Interior Mutability Pattern
//!
//! APIs that accept registrations use interior mutability so that
//! `server.api::<MyAPI>()` can hand out `&MyAPI`:
//!
//! ```ignore
//! pub struct MyAPI {
//!     data: RwLock<HashMap<String, Value>>,
//! }
//!
//! impl API for MyAPI {}
//!
//! impl MyAPI {
//!     pub fn register(&self, key: &str, value: Value) {
//!         self.data.write().insert(key.into(), value);
//!     }
//! }
//! ```

/// Marker trait for capability APIs.
///
/// # Usage in Plugins
///
/// ```ignore
/// impl Plugin for HooksPlugin {
///     fn build(&self, server: &mut Server) {
///         server.insert_api(HooksManager::default());
///     }
/// }
///
/// impl Plugin for AuditPlugin {
///     fn dependencies(&self) -> Vec<PluginId> {
///         vec![PluginId::of::<HooksPlugin>()]
///     }
///
///     fn build(&self, server: &mut Server) {
///         if let Some(hooks) = server.api::<HooksManager>() {
///             hooks.register(AuditHook::default()).ok();
///         }
///     }
/// }
/// ```
pub trait API: Send + Sync + 'static {}
