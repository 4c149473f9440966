//! Backend abstraction layer
//!
//! Provides the traits the scheduler drives and the types both backends share.

pub mod headless;
pub mod traits;
pub mod types;

// Vulkan backend is only available on native platforms
#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub mod vulkan;

pub use traits::*;
pub use types::*;
