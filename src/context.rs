//! Explicit GPU context passed to every component constructor

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::{ArenaNode, GpuObject, OwnershipArena};
use crate::backend::traits::GpuDevice;
use crate::backend::types::DeviceLimits;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::render_graph::pass::PassId;
use crate::render_graph::resource::ResourceId;

#[derive(Debug, Default)]
struct IdCounters {
    resources: AtomicU64,
    passes: AtomicU32,
}

/// Device, configuration and ownership arena shared by a scheduler and
/// everything it schedules.
///
/// Cloning is cheap and yields a handle to the same context. Independent
/// contexts share nothing.
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<dyn GpuDevice>,
    config: SchedulerConfig,
    limits: DeviceLimits,
    arena: Arc<Mutex<OwnershipArena>>,
    ids: Arc<IdCounters>,
}

impl GpuContext {
    pub fn new(device: Arc<dyn GpuDevice>, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let limits = device.limits();
        log::info!(
            "GpuContext: {} with {} frames in flight",
            device.name(),
            config.frames_in_flight
        );
        Ok(Self {
            device,
            config,
            limits,
            arena: Arc::new(Mutex::new(OwnershipArena::new())),
            ids: Arc::default(),
        })
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        ResourceId(self.ids.resources.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_pass_id(&self) -> PassId {
        PassId(self.ids.passes.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether `other` is a handle to this same context
    pub fn same_context(&self, other: &GpuContext) -> bool {
        Arc::ptr_eq(&self.arena, &other.arena)
    }

    pub fn root_owner(&self) -> ArenaNode {
        self.arena.lock().root()
    }

    /// Create an owner node under `parent`, or under the root when `None`
    pub fn create_owner(&self, parent: Option<ArenaNode>, label: &str) -> Result<ArenaNode, SchedulerError> {
        let mut arena = self.arena.lock();
        let parent = parent.unwrap_or_else(|| arena.root());
        arena.create_node(parent, label)
    }

    pub fn register(&self, owner: ArenaNode, object: GpuObject) -> Result<(), SchedulerError> {
        self.arena.lock().register(owner, object)
    }

    pub fn reparent(&self, node: ArenaNode, new_parent: ArenaNode) -> Result<(), SchedulerError> {
        self.arena.lock().reparent(node, new_parent)
    }

    /// Dispose an owner node and everything below it
    pub fn dispose(&self, owner: ArenaNode) -> Result<(), SchedulerError> {
        self.arena.lock().dispose(owner, self.device.as_ref())
    }

    /// Run `f` with the arena locked
    pub fn with_arena<R>(&self, f: impl FnOnce(&OwnershipArena) -> R) -> R {
        f(&self.arena.lock())
    }
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("device", &self.device.name())
            .field("config", &self.config)
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;

    #[test]
    fn test_rejects_invalid_config() {
        let device = Arc::new(HeadlessDevice::new());
        let result = GpuContext::new(device, SchedulerConfig::default().with_frames_in_flight(0));
        assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = GpuContext::new(Arc::new(HeadlessDevice::new()), SchedulerConfig::default()).unwrap();
        let b = GpuContext::new(Arc::new(HeadlessDevice::new()), SchedulerConfig::default()).unwrap();
        assert_eq!(a.next_pass_id(), b.next_pass_id());

        assert!(!a.same_context(&b));
        assert!(a.same_context(&a.clone()));

        let owner = a.create_owner(None, "pass").unwrap();
        assert!(a.with_arena(|arena| arena.contains(owner)));
        assert!(!b.with_arena(|arena| arena.contains(owner)));
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = GpuContext::new(Arc::new(HeadlessDevice::new()), SchedulerConfig::default()).unwrap();
        let clone = ctx.clone();
        let first = ctx.next_resource_id();
        let second = clone.next_resource_id();
        assert_ne!(first, second);
    }
}
