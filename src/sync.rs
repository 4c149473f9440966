//! GPU synchronization primitives, one per frame-in-flight slot.
//!
//! Semaphores order GPU work and are never inspected by the CPU. Fences are
//! the CPU's view of completion and gate reuse of a slot's recording state.

use crate::arena::{ArenaNode, GpuObject};
use crate::backend::traits::BackendError;
use crate::backend::types::{FenceHandle, SemaphoreHandle};
use crate::context::GpuContext;
use crate::error::SchedulerError;

fn slot_error(frame_index: usize, frames_in_flight: usize) -> SchedulerError {
    SchedulerError::InvalidFrameIndex {
        frame_index,
        frames_in_flight,
    }
}

/// One semaphore per frame-in-flight slot
#[derive(Debug, Clone)]
pub struct SemaphoreSet {
    semaphores: Vec<SemaphoreHandle>,
}

impl SemaphoreSet {
    pub fn new(ctx: &GpuContext, owner: ArenaNode, label: &str) -> Result<Self, SchedulerError> {
        let mut semaphores = Vec::with_capacity(ctx.frames_in_flight());
        for slot in 0..ctx.frames_in_flight() {
            let semaphore = ctx.device().create_semaphore(&format!("{label}[{slot}]"))?;
            ctx.register(owner, GpuObject::Semaphore(semaphore))?;
            semaphores.push(semaphore);
        }
        Ok(Self { semaphores })
    }

    pub fn get(&self, frame_index: usize) -> Result<SemaphoreHandle, SchedulerError> {
        self.semaphores
            .get(frame_index)
            .copied()
            .ok_or_else(|| slot_error(frame_index, self.semaphores.len()))
    }

    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    pub fn as_slice(&self) -> &[SemaphoreHandle] {
        &self.semaphores
    }
}

/// One fence per frame-in-flight slot
#[derive(Debug, Clone)]
pub struct FenceSet {
    fences: Vec<FenceHandle>,
}

impl FenceSet {
    /// Create the fences, signaled when `signaled` is set so the first wait
    /// on each slot returns immediately.
    pub fn new(
        ctx: &GpuContext,
        owner: ArenaNode,
        label: &str,
        signaled: bool,
    ) -> Result<Self, SchedulerError> {
        let mut fences = Vec::with_capacity(ctx.frames_in_flight());
        for slot in 0..ctx.frames_in_flight() {
            let fence = ctx
                .device()
                .create_fence(signaled, &format!("{label}[{slot}]"))?;
            ctx.register(owner, GpuObject::Fence(fence))?;
            fences.push(fence);
        }
        Ok(Self { fences })
    }

    pub fn get(&self, frame_index: usize) -> Result<FenceHandle, SchedulerError> {
        self.fences
            .get(frame_index)
            .copied()
            .ok_or_else(|| slot_error(frame_index, self.fences.len()))
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Block until the slot's fence signals, bounded by the configured timeout
    pub fn wait(&self, ctx: &GpuContext, frame_index: usize) -> Result<(), SchedulerError> {
        let fence = self.get(frame_index)?;
        ctx.device()
            .wait_for_fence(fence, ctx.config().wait_timeout)
            .map_err(|err| match err {
                BackendError::Timeout => {
                    log::error!("FenceSet: frame slot {frame_index} did not complete in time");
                    SchedulerError::WaitTimedOut(format!("frame slot {frame_index} fence"))
                }
                other => other.into(),
            })
    }

    pub fn reset(&self, ctx: &GpuContext, frame_index: usize) -> Result<(), SchedulerError> {
        ctx.device().reset_fence(self.get(frame_index)?)?;
        Ok(())
    }

    pub fn wait_all(&self, ctx: &GpuContext) -> Result<(), SchedulerError> {
        for frame_index in 0..self.fences.len() {
            self.wait(ctx, frame_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;
    use crate::config::SchedulerConfig;
    use std::sync::Arc;

    fn context(frames_in_flight: usize) -> (Arc<HeadlessDevice>, GpuContext) {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = GpuContext::new(
            device.clone(),
            SchedulerConfig::default().with_frames_in_flight(frames_in_flight),
        )
        .unwrap();
        (device, ctx)
    }

    #[test]
    fn test_one_semaphore_per_slot() {
        let (device, ctx) = context(3);
        let owner = ctx.create_owner(None, "pass").unwrap();
        let set = SemaphoreSet::new(&ctx, owner, "finished").unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(device.semaphore_label(set.get(2).unwrap()).unwrap(), "finished[2]");
        assert!(matches!(
            set.get(3),
            Err(SchedulerError::InvalidFrameIndex { frame_index: 3, .. })
        ));

        ctx.dispose(owner).unwrap();
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_fence_wait_and_reset() {
        let (device, ctx) = context(2);
        let owner = ctx.create_owner(None, "frames").unwrap();
        let fences = FenceSet::new(&ctx, owner, "frame", true).unwrap();
        fences.wait_all(&ctx).unwrap();

        fences.reset(&ctx, 1).unwrap();
        assert!(!device.is_fence_signaled(fences.get(1).unwrap()));
        assert!(matches!(
            fences.wait(&ctx, 1),
            Err(SchedulerError::WaitTimedOut(_))
        ));
        fences.wait(&ctx, 0).unwrap();
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let (device, ctx) = context(2);
        device.set_fail_creations(true);
        let owner = ctx.create_owner(None, "pass").unwrap();
        assert!(matches!(
            SemaphoreSet::new(&ctx, owner, "finished"),
            Err(SchedulerError::Backend(BackendError::ResourceCreationFailed(_)))
        ));
    }
}
