//! Frame Graph - a per-frame GPU pass scheduler
//!
//! Passes declare the resources they read and write; each frame the scheduler
//! orders them, records the layout and access transitions between them, chains
//! their submissions with semaphores and keeps several frames in flight.
//!
//! Two backends are provided:
//! - **Headless**: records every command and submission without a GPU, for
//!   tests and tooling
//! - **Vulkan**: wraps already-created objects via ash (native only, `vulkan`
//!   feature)
//!
//! # Features
//! - Topological ordering of passes with cycle detection
//! - Barrier resolution driven by a pure access policy table
//! - Semaphore chaining between passes and per-slot frame fences
//! - Hierarchical ownership of every GPU object, disposed child first
//!
//! # Example
//!
//! ```ignore
//! let ctx = GpuContext::new(device, SchedulerConfig::default())?;
//! let mut graph = RenderGraph::new(&ctx)?;
//!
//! let mut lighting = Pass::new(&ctx, PassDescriptor::compute("lighting"))?;
//! lighting.add_dependencies([Dependency::new("hdr", &hdr, AccessType::COMPUTE_SHADER_WRITE)])?;
//! lighting.set_execute_callback(|encoder| {
//!     encoder.resolve_barriers()?;
//!     encoder.dispatch(80, 45, 1)
//! });
//!
//! let mut composite = Pass::new(&ctx, PassDescriptor::graphics("composite").presentable())?;
//! composite.add_dependencies([
//!     Dependency::new("hdr", &hdr, AccessType::FRAGMENT_SHADER_READ),
//!     Dependency::new("backbuffer", &backbuffer, AccessType::RENDER_TARGET_WRITE | AccessType::PRESENT),
//! ])?;
//!
//! graph.add_pass(lighting)?;
//! let composite = graph.add_pass(composite)?;
//! graph.present(composite)?;
//!
//! let mut scheduler = FrameScheduler::new(&ctx, presenter)?;
//! loop {
//!     scheduler.render(&mut graph)?;
//! }
//! ```

pub mod arena;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod render_graph;
pub mod scheduler;
pub mod sync;

pub use arena::{ArenaNode, GpuObject, OwnershipArena};
pub use backend::headless::{HeadlessDevice, HeadlessPresenter};
pub use backend::traits::{BackendError, BackendResult, GpuDevice, Presenter};
pub use config::{SchedulerConfig, MAX_FRAMES_IN_FLIGHT};
pub use context::GpuContext;
pub use error::{GraphStructureError, SchedulerError};
pub use render_graph::{
    AccessPolicy, AccessPolicyTable, AccessType, BarrierResolver, Buffer, Dependency, FrameCursor,
    Pass, PassDescriptor, PassEncoder, PassId, PassKind, PassState, RenderGraph, Resource,
    ResourceId, ResourcePayload, Texture,
};
pub use scheduler::{FrameReport, FrameScheduler};
pub use sync::{FenceSet, SemaphoreSet};

#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub use backend::vulkan::{VulkanDevice, VulkanPresenter, VulkanQueue};
