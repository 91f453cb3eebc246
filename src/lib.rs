//! A transactional hook and operation engine for entity/relation data layers.
//!

pub use ripple_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use ripple_internal::prelude::*;
}
