//! Per-frame driver for a render graph.
//!
//! Each [`FrameScheduler::render`] call:
//!
//! 1. walks the graph from its presenting pass and checks every dependency
//!    against the access policy, so structural errors and unsupported access
//!    kinds surface before any GPU work is issued
//! 2. waits on the current slot's frame fence, which bounds how far the CPU
//!    runs ahead of the GPU
//! 3. acquires a presentable target, signaling the slot's frame-start
//!    semaphore, and resets the fence
//! 4. records and submits every pass in walk order; each pass waits on the
//!    previous pass's finished semaphore and only the last one signals the
//!    fence
//! 5. presents with the presenting pass's finished semaphore and advances the
//!    frame index
//!
//! Errors are not retried. A failed frame leaves the scheduler in an
//! unspecified state and rendering should stop.

use crate::arena::ArenaNode;
use crate::backend::traits::{BackendError, Presenter};
use crate::backend::types::SemaphoreHandle;
use crate::context::GpuContext;
use crate::error::{GraphStructureError, SchedulerError};
use crate::render_graph::access::AccessPolicyTable;
use crate::render_graph::barrier::BarrierResolver;
use crate::render_graph::graph::RenderGraph;
use crate::render_graph::pass::PassId;
use crate::render_graph::resource::FrameCursor;
use crate::sync::{FenceSet, SemaphoreSet};

/// What a completed [`FrameScheduler::render`] call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame-in-flight slot the frame was recorded into
    pub frame_index: usize,
    /// Presentable target the frame was presented to
    pub target_index: u32,
    /// Passes in submission order, ending with the presenting pass
    pub pass_order: Vec<PassId>,
}

/// Drives a render graph through frames in flight
pub struct FrameScheduler {
    ctx: GpuContext,
    owner: ArenaNode,
    presenter: Box<dyn Presenter>,
    resolver: BarrierResolver,
    frame_start: SemaphoreSet,
    frame_fences: FenceSet,
    frame_index: usize,
    frames_rendered: u64,
}

impl FrameScheduler {
    pub fn new(ctx: &GpuContext, presenter: Box<dyn Presenter>) -> Result<Self, SchedulerError> {
        let owner = ctx.create_owner(None, "frame_scheduler")?;
        let frame_start = SemaphoreSet::new(ctx, owner, "frame_start")?;
        // Signaled so the first wait on every slot returns immediately
        let frame_fences = FenceSet::new(ctx, owner, "frame", true)?;

        log::info!(
            "FrameScheduler: {} frames in flight, {} presentable targets",
            ctx.frames_in_flight(),
            presenter.target_count()
        );
        Ok(Self {
            ctx: ctx.clone(),
            owner,
            presenter,
            resolver: BarrierResolver::default(),
            frame_start,
            frame_fences,
            frame_index: 0,
            frames_rendered: 0,
        })
    }

    /// Replace the access policy used for barrier resolution
    pub fn with_policy(mut self, policy: AccessPolicyTable) -> Self {
        self.resolver = BarrierResolver::new(policy);
        self
    }

    /// Slot the next [`FrameScheduler::render`] call records into
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn resolver(&self) -> &BarrierResolver {
        &self.resolver
    }

    pub fn presenter(&self) -> &dyn Presenter {
        self.presenter.as_ref()
    }

    pub fn presenter_mut(&mut self) -> &mut dyn Presenter {
        self.presenter.as_mut()
    }

    pub fn frame_start_semaphore(&self, frame_index: usize) -> Result<SemaphoreHandle, SchedulerError> {
        self.frame_start.get(frame_index)
    }

    /// Record, submit and present one frame of `graph`
    pub fn render(&mut self, graph: &mut RenderGraph) -> Result<FrameReport, SchedulerError> {
        let terminal = graph
            .terminal()
            .ok_or(GraphStructureError::NoPresentingPass)?;
        let order = graph.walk(terminal)?;
        for &id in &order {
            let pass = graph
                .pass(id)
                .ok_or(GraphStructureError::UnknownPass(id.index()))?;
            self.resolver.validate(pass.name(), pass.dependencies())?;
        }

        let frame_index = self.frame_index;
        self.frame_fences.wait(&self.ctx, frame_index)?;
        graph.mark_frame_finished(frame_index);

        let frame_start = self.frame_start.get(frame_index)?;
        let target_index = self
            .presenter
            .acquire_next_target(frame_start, self.ctx.config().wait_timeout)
            .map_err(|err| match err {
                BackendError::Timeout => {
                    SchedulerError::WaitTimedOut("presentable target acquisition".to_string())
                }
                other => other.into(),
            })?;
        self.frame_fences.reset(&self.ctx, frame_index)?;

        log::debug!(
            "FrameScheduler: frame {} slot {} target {} ({} passes)",
            self.frames_rendered,
            frame_index,
            target_index,
            order.len()
        );

        let cursor = FrameCursor::with_target(frame_index, target_index);
        let fence = self.frame_fences.get(frame_index)?;
        let mut wait = vec![frame_start];
        for (position, &id) in order.iter().enumerate() {
            let pass = graph
                .pass_mut(id)
                .ok_or(GraphStructureError::UnknownPass(id.index()))?;
            pass.set_wait_semaphores(frame_index, &wait)?;
            pass.record(cursor, &self.resolver)?;

            let is_last = position + 1 == order.len();
            pass.submit(frame_index, is_last.then_some(fence))?;
            wait = vec![pass.finished_semaphore(frame_index)?];
        }

        let present_wait = graph
            .pass(terminal)
            .ok_or(GraphStructureError::UnknownPass(terminal.index()))?
            .finished_semaphore(frame_index)?;
        self.presenter.present(present_wait, target_index)?;

        self.frame_index = (frame_index + 1) % self.ctx.frames_in_flight();
        self.frames_rendered += 1;
        Ok(FrameReport {
            frame_index,
            target_index,
            pass_order: order,
        })
    }

    /// Block until the device is idle and mark every slot of `graph`
    /// finished, making it safe to dispose.
    pub fn wait_idle(&mut self, graph: &mut RenderGraph) -> Result<(), SchedulerError> {
        self.ctx.device().wait_idle()?;
        for frame_index in 0..self.ctx.frames_in_flight() {
            graph.mark_frame_finished(frame_index);
        }
        Ok(())
    }

    /// Dispose the frame semaphores and fences
    pub fn dispose(self) -> Result<(), SchedulerError> {
        log::info!(
            "FrameScheduler: disposing after {} frames",
            self.frames_rendered
        );
        self.ctx.dispose(self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, HeadlessPresenter};
    use crate::backend::types::Extent2D;
    use crate::config::SchedulerConfig;
    use crate::render_graph::pass::{Pass, PassDescriptor};
    use std::sync::Arc;

    fn setup(frames_in_flight: usize) -> (Arc<HeadlessDevice>, GpuContext, FrameScheduler) {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = GpuContext::new(
            device.clone(),
            SchedulerConfig::default().with_frames_in_flight(frames_in_flight),
        )
        .unwrap();
        let presenter = HeadlessPresenter::new(device.clone(), 3, Extent2D::new(64, 64));
        let scheduler = FrameScheduler::new(&ctx, Box::new(presenter)).unwrap();
        (device, ctx, scheduler)
    }

    #[test]
    fn test_no_presenting_pass() {
        let (device, ctx, mut scheduler) = setup(2);
        let mut graph = RenderGraph::new(&ctx).unwrap();
        graph
            .add_pass(Pass::new(&ctx, PassDescriptor::graphics("main")).unwrap())
            .unwrap();

        assert!(matches!(
            scheduler.render(&mut graph),
            Err(SchedulerError::GraphStructure(GraphStructureError::NoPresentingPass))
        ));
        assert!(device.submissions().is_empty());
        assert_eq!(scheduler.frame_index(), 0);
    }

    #[test]
    fn test_single_pass_frame() {
        let (device, ctx, mut scheduler) = setup(2);
        let mut graph = RenderGraph::new(&ctx).unwrap();
        let main = graph
            .add_pass(Pass::new(&ctx, PassDescriptor::graphics("main").presentable()).unwrap())
            .unwrap();
        graph.present(main).unwrap();

        let report = scheduler.render(&mut graph).unwrap();
        assert_eq!(report.frame_index, 0);
        assert_eq!(report.target_index, 0);
        assert_eq!(report.pass_order, vec![main]);

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(
            submissions[0].wait_semaphores,
            vec![scheduler.frame_start_semaphore(0).unwrap()]
        );
        assert!(submissions[0].fence.is_some());

        let presents = device.presents();
        assert_eq!(
            presents[0].wait_semaphore,
            graph.pass(main).unwrap().finished_semaphore(0).unwrap()
        );
        assert_eq!(scheduler.frame_index(), 1);
    }

    #[test]
    fn test_dispose_everything() {
        let (device, ctx, mut scheduler) = setup(2);
        let mut graph = RenderGraph::new(&ctx).unwrap();
        let main = graph
            .add_pass(Pass::new(&ctx, PassDescriptor::graphics("main").presentable()).unwrap())
            .unwrap();
        graph.present(main).unwrap();
        scheduler.render(&mut graph).unwrap();

        scheduler.wait_idle(&mut graph).unwrap();
        graph.dispose().unwrap();
        scheduler.dispose().unwrap();
        assert_eq!(device.live_objects(), 0);
    }
}
