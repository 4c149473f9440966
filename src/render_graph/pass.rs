//! Render pass definitions for the render graph.
//!
//! A [`Pass`] is one schedulable unit of GPU work. It owns one command
//! context and one finished semaphore per frame-in-flight slot, and tracks a
//! separate state machine per slot:
//!
//! ```text
//! Created -> Recording -> (Rendering, graphics only) -> Recorded -> Submitted -> Finished
//! ```
//!
//! Recording goes through a [`PassEncoder`], which carries the frame being
//! recorded so no call depends on state left behind by an earlier one.

use std::fmt;

use crate::arena::{ArenaNode, GpuObject};
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::SchedulerError;
use crate::render_graph::barrier::BarrierResolver;
use crate::render_graph::dependency::Dependency;
use crate::render_graph::resource::{FrameCursor, PassRef};
use crate::sync::SemaphoreSet;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Bracketed draws into render targets
    Graphics,
    /// Compute dispatches
    Compute,
}

impl PassKind {
    pub fn queue(self) -> QueueKind {
        match self {
            Self::Graphics => QueueKind::Graphics,
            Self::Compute => QueueKind::Compute,
        }
    }

    pub fn pipeline_kind(self) -> PipelineKind {
        match self {
            Self::Graphics => PipelineKind::Graphics,
            Self::Compute => PipelineKind::Compute,
        }
    }
}

/// Per-slot lifecycle of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassState {
    Created,
    Recording,
    Rendering,
    Recorded,
    Submitted,
    Finished,
}

/// Construction parameters for a [`Pass`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDescriptor {
    pub name: String,
    pub kind: PassKind,
    /// Whether the pass may be marked as a render graph's presenting pass
    pub root_capable: bool,
}

impl PassDescriptor {
    pub fn graphics(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PassKind::Graphics,
            root_capable: false,
        }
    }

    pub fn compute(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PassKind::Compute,
            root_capable: false,
        }
    }

    pub fn presentable(mut self) -> Self {
        self.root_capable = true;
        self
    }
}

/// Application-supplied recording of a pass's commands
pub type ExecuteCallback =
    Box<dyn FnMut(&mut PassEncoder<'_>) -> Result<(), SchedulerError> + Send>;

#[derive(Debug)]
struct FrameSlot {
    context: CommandContextHandle,
    state: PassState,
    wait_semaphores: Vec<SemaphoreHandle>,
    barriers_resolved: bool,
}

/// One schedulable unit of GPU work
pub struct Pass {
    id: PassId,
    name: String,
    kind: PassKind,
    root_capable: bool,
    ctx: GpuContext,
    owner: ArenaNode,
    slots: Vec<FrameSlot>,
    finished: SemaphoreSet,
    dependencies: Vec<Dependency>,
    execute: Option<ExecuteCallback>,
}

impl Pass {
    /// Create a pass with its per-slot command contexts and semaphores,
    /// owned by a new arena node under the context root.
    pub fn new(ctx: &GpuContext, desc: PassDescriptor) -> Result<Self, SchedulerError> {
        let owner = ctx.create_owner(None, &desc.name)?;
        let (slots, finished) = match Self::create_slots(ctx, owner, &desc) {
            Ok(created) => created,
            Err(err) => {
                log::error!("Pass '{}': creation failed: {}", desc.name, err);
                ctx.dispose(owner)?;
                return Err(err);
            }
        };

        log::info!("Pass '{}': created ({:?})", desc.name, desc.kind);
        Ok(Self {
            id: ctx.next_pass_id(),
            name: desc.name,
            kind: desc.kind,
            root_capable: desc.root_capable,
            ctx: ctx.clone(),
            owner,
            slots,
            finished,
            dependencies: Vec::new(),
            execute: None,
        })
    }

    fn create_slots(
        ctx: &GpuContext,
        owner: ArenaNode,
        desc: &PassDescriptor,
    ) -> Result<(Vec<FrameSlot>, SemaphoreSet), SchedulerError> {
        let mut slots = Vec::with_capacity(ctx.frames_in_flight());
        for slot in 0..ctx.frames_in_flight() {
            let context = ctx
                .device()
                .create_command_context(desc.kind.queue(), &format!("{}[{}]", desc.name, slot))?;
            ctx.register(owner, GpuObject::CommandContext(context))?;
            slots.push(FrameSlot {
                context,
                state: PassState::Created,
                wait_semaphores: Vec::new(),
                barriers_resolved: false,
            });
        }
        let finished = SemaphoreSet::new(ctx, owner, &format!("{}.finished", desc.name))?;
        Ok((slots, finished))
    }

    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn is_root_capable(&self) -> bool {
        self.root_capable
    }

    /// Arena node owning this pass's GPU objects
    pub fn owner(&self) -> ArenaNode {
        self.owner
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn state(&self, frame_index: usize) -> Result<PassState, SchedulerError> {
        Ok(self.slot(frame_index)?.state)
    }

    /// Append dependencies.
    ///
    /// Dependencies are fixed once any frame slot has started recording.
    pub fn add_dependencies(
        &mut self,
        dependencies: impl IntoIterator<Item = Dependency>,
    ) -> Result<(), SchedulerError> {
        if self.slots.iter().any(|slot| slot.state != PassState::Created) {
            return Err(SchedulerError::InvalidPassOperation {
                pass: self.name.clone(),
                reason: "dependencies cannot change after recording has started".to_string(),
            });
        }
        self.dependencies.extend(dependencies);
        Ok(())
    }

    pub fn set_execute_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut PassEncoder<'_>) -> Result<(), SchedulerError> + Send + 'static,
    {
        self.execute = Some(Box::new(callback));
    }

    pub fn has_execute_callback(&self) -> bool {
        self.execute.is_some()
    }

    /// Semaphores the next submission of `frame_index` waits on
    pub fn set_wait_semaphores(
        &mut self,
        frame_index: usize,
        semaphores: &[SemaphoreHandle],
    ) -> Result<(), SchedulerError> {
        let slot = self.slot_mut(frame_index)?;
        slot.wait_semaphores.clear();
        slot.wait_semaphores.extend_from_slice(semaphores);
        Ok(())
    }

    pub fn wait_semaphores(&self, frame_index: usize) -> Result<&[SemaphoreHandle], SchedulerError> {
        Ok(&self.slot(frame_index)?.wait_semaphores)
    }

    /// Semaphores signaled by this pass's submissions, one per slot
    pub fn finished_semaphores(&self) -> &SemaphoreSet {
        &self.finished
    }

    pub fn finished_semaphore(&self, frame_index: usize) -> Result<SemaphoreHandle, SchedulerError> {
        self.finished.get(frame_index)
    }

    /// Start recording `frame`, resetting that slot's command context.
    ///
    /// Re-recording a slot that was recorded but not submitted is allowed.
    /// Recording a slot whose last submission has not been observed to
    /// finish is rejected.
    pub fn start_recording<'a>(
        &'a mut self,
        frame: FrameCursor,
        resolver: &'a BarrierResolver,
    ) -> Result<PassEncoder<'a>, SchedulerError> {
        let name = self.name.clone();
        let device = self.ctx.device();
        let slot = self
            .slots
            .get_mut(frame.frame_index)
            .ok_or(SchedulerError::InvalidFrameIndex {
                frame_index: frame.frame_index,
                frames_in_flight: self.ctx.frames_in_flight(),
            })?;
        match slot.state {
            PassState::Created | PassState::Recorded | PassState::Finished => {}
            PassState::Recording | PassState::Rendering => {
                log::warn!(
                    "Pass '{}': restarting slot {} mid-recording",
                    name,
                    frame.frame_index
                );
            }
            PassState::Submitted => {
                return Err(SchedulerError::InvalidPassState {
                    pass: name,
                    actual: slot.state,
                    expected: "Created, Recorded or Finished",
                })
            }
        }

        device.begin_commands(slot.context)?;
        slot.state = PassState::Recording;
        slot.barriers_resolved = false;
        log::trace!("Pass '{}': recording slot {}", name, frame.frame_index);

        Ok(PassEncoder {
            pass: self,
            resolver,
            frame,
        })
    }

    /// Record `frame` by running the execute callback between
    /// [`Pass::start_recording`] and [`PassEncoder::end_recording`].
    ///
    /// Without a callback the pass only resolves its barriers.
    pub fn record(
        &mut self,
        frame: FrameCursor,
        resolver: &BarrierResolver,
    ) -> Result<(), SchedulerError> {
        let mut callback = self.execute.take();
        let result = self.record_with(frame, resolver, callback.as_mut());
        if self.execute.is_none() {
            self.execute = callback;
        }
        result
    }

    fn record_with(
        &mut self,
        frame: FrameCursor,
        resolver: &BarrierResolver,
        callback: Option<&mut ExecuteCallback>,
    ) -> Result<(), SchedulerError> {
        let mut encoder = self.start_recording(frame, resolver)?;
        match callback {
            Some(callback) => (*callback)(&mut encoder)?,
            None => {
                log::debug!("Pass '{}': no execute callback", encoder.pass.name);
                encoder.resolve_barriers()?;
            }
        }
        if encoder.state()? != PassState::Recorded {
            encoder.end_recording()?;
        }
        Ok(())
    }

    /// Submit the recorded commands of `frame_index`.
    ///
    /// Waits on the slot's wait semaphores, signals its finished semaphore
    /// and, when given, `fence`.
    pub fn submit(
        &mut self,
        frame_index: usize,
        fence: Option<FenceHandle>,
    ) -> Result<(), SchedulerError> {
        let signal = [self.finished.get(frame_index)?];
        let queue = self.kind.queue();
        let device = self.ctx.device();
        let slot = self
            .slots
            .get_mut(frame_index)
            .ok_or(SchedulerError::InvalidFrameIndex {
                frame_index,
                frames_in_flight: self.ctx.frames_in_flight(),
            })?;
        if slot.state != PassState::Recorded {
            return Err(SchedulerError::InvalidPassState {
                pass: self.name.clone(),
                actual: slot.state,
                expected: "Recorded",
            });
        }

        device.submit(
            queue,
            &Submission {
                command_context: slot.context,
                wait_semaphores: &slot.wait_semaphores,
                signal_semaphores: &signal,
                fence,
            },
        )?;
        slot.state = PassState::Submitted;
        log::debug!(
            "Pass '{}': submitted slot {} (waits {}, fence {})",
            self.name,
            frame_index,
            slot.wait_semaphores.len(),
            fence.is_some()
        );
        Ok(())
    }

    /// Block until this pass's queue drains.
    ///
    /// Only for explicit synchronous boundaries; the per-frame path relies on
    /// the frame fence instead.
    pub fn wait_for_finish(&mut self, frame_index: usize) -> Result<(), SchedulerError> {
        self.slot(frame_index)?;
        self.ctx.device().wait_queue_idle(self.kind.queue())?;
        self.mark_finished(frame_index);
        Ok(())
    }

    pub(crate) fn mark_finished(&mut self, frame_index: usize) {
        if let Some(slot) = self.slots.get_mut(frame_index) {
            if slot.state == PassState::Submitted {
                slot.state = PassState::Finished;
            }
        }
    }

    /// Dispose the pass's command contexts and semaphores.
    ///
    /// The caller must make sure no submission of this pass is still pending.
    pub fn dispose(self) -> Result<(), SchedulerError> {
        log::info!("Pass '{}': disposing", self.name);
        self.ctx.dispose(self.owner)
    }

    pub(crate) fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub(crate) fn pass_ref(&self) -> PassRef {
        PassRef {
            id: self.id,
            kind: self.kind,
        }
    }

    fn slot(&self, frame_index: usize) -> Result<&FrameSlot, SchedulerError> {
        self.slots
            .get(frame_index)
            .ok_or(SchedulerError::InvalidFrameIndex {
                frame_index,
                frames_in_flight: self.slots.len(),
            })
    }

    fn slot_mut(&mut self, frame_index: usize) -> Result<&mut FrameSlot, SchedulerError> {
        let frames_in_flight = self.slots.len();
        self.slots
            .get_mut(frame_index)
            .ok_or(SchedulerError::InvalidFrameIndex {
                frame_index,
                frames_in_flight,
            })
    }
}

impl fmt::Debug for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("root_capable", &self.root_capable)
            .field("dependencies", &self.dependencies)
            .field("slots", &self.slots)
            .finish()
    }
}

/// Command recording for one frame slot of a pass
pub struct PassEncoder<'a> {
    pass: &'a mut Pass,
    resolver: &'a BarrierResolver,
    frame: FrameCursor,
}

impl<'a> PassEncoder<'a> {
    pub fn frame(&self) -> FrameCursor {
        self.frame
    }

    pub fn frame_index(&self) -> usize {
        self.frame.frame_index
    }

    /// Presentable target acquired for this frame, if any
    pub fn target_index(&self) -> Option<u32> {
        self.frame.target_index
    }

    pub fn pass_name(&self) -> &str {
        &self.pass.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.pass.dependencies
    }

    pub fn device_limits(&self) -> &DeviceLimits {
        self.pass.ctx.limits()
    }

    pub fn state(&self) -> Result<PassState, SchedulerError> {
        self.pass.state(self.frame.frame_index)
    }

    /// Record the transitions this pass's dependencies need.
    ///
    /// Must run before any draw or dispatch; calling it again in the same
    /// recording does nothing.
    pub fn resolve_barriers(&mut self) -> Result<(), SchedulerError> {
        self.expect_state(&[PassState::Recording], "Recording")?;
        if self.slot()?.barriers_resolved {
            log::trace!("Pass '{}': barriers already resolved", self.pass.name);
            return Ok(());
        }
        let transitions = self.resolver.resolve(
            self.pass.pass_ref(),
            &self.pass.name,
            &self.pass.dependencies,
            self.frame,
        )?;
        let context = self.slot()?.context;
        if !transitions.is_empty() {
            self.pass.ctx.device().cmd_transitions(context, &transitions);
        }
        log::trace!(
            "Pass '{}': {} transitions for {} dependencies",
            self.pass.name,
            transitions.len(),
            self.pass.dependencies.len()
        );
        self.pass.slot_mut(self.frame.frame_index)?.barriers_resolved = true;
        Ok(())
    }

    pub fn start_rendering(
        &mut self,
        target: &RenderTarget,
        clear: Option<ClearValue>,
    ) -> Result<(), SchedulerError> {
        self.expect_kind(PassKind::Graphics, "start_rendering")?;
        self.expect_state(&[PassState::Recording], "Recording")?;
        self.expect_barriers()?;
        let max = self.pass.ctx.limits().max_color_attachments as usize;
        if target.color.len() > max {
            return self.operation_error(format!(
                "{} color attachments exceed the device limit of {}",
                target.color.len(),
                max
            ));
        }
        let context = self.slot()?.context;
        self.pass
            .ctx
            .device()
            .cmd_begin_rendering(context, target, clear.as_ref());
        self.set_state(PassState::Rendering)
    }

    pub fn end_rendering(&mut self) -> Result<(), SchedulerError> {
        self.expect_kind(PassKind::Graphics, "end_rendering")?;
        self.expect_state(&[PassState::Rendering], "Rendering")?;
        let context = self.slot()?.context;
        self.pass.ctx.device().cmd_end_rendering(context);
        self.set_state(PassState::Recording)
    }

    pub fn set_draw_buffers(&mut self, buffers: &DrawBuffers) -> Result<(), SchedulerError> {
        self.expect_kind(PassKind::Graphics, "set_draw_buffers")?;
        self.expect_state(&[PassState::Recording, PassState::Rendering], "Recording")?;
        let context = self.slot()?.context;
        self.pass.ctx.device().cmd_bind_draw_buffers(context, buffers);
        Ok(())
    }

    pub fn set_shader_program(&mut self, program: &ShaderProgram) -> Result<(), SchedulerError> {
        if program.kind != self.pass.kind.pipeline_kind() {
            return self.operation_error(format!(
                "{:?} program bound to a {:?} pass",
                program.kind, self.pass.kind
            ));
        }
        self.expect_state(&[PassState::Recording, PassState::Rendering], "Recording")?;
        let context = self.slot()?.context;
        self.pass.ctx.device().cmd_bind_program(context, program);
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> Result<(), SchedulerError> {
        self.expect_kind(PassKind::Graphics, "draw_indexed")?;
        self.expect_state(&[PassState::Rendering], "Rendering")?;
        self.expect_barriers()?;
        let context = self.slot()?.context;
        self.pass
            .ctx
            .device()
            .cmd_draw_indexed(context, index_count, instance_count);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), SchedulerError> {
        self.expect_kind(PassKind::Compute, "dispatch")?;
        self.expect_state(&[PassState::Recording], "Recording")?;
        self.expect_barriers()?;
        let max = self.pass.ctx.limits().max_compute_work_group_count;
        if x > max[0] || y > max[1] || z > max[2] {
            return self.operation_error(format!(
                "dispatch ({x}, {y}, {z}) exceeds the work group limit {max:?}"
            ));
        }
        let context = self.slot()?.context;
        self.pass.ctx.device().cmd_dispatch(context, x, y, z);
        Ok(())
    }

    /// Close the command context.
    ///
    /// Barriers that were never resolved are resolved here so resource
    /// provenance stays correct, and dependencies headed for presentation
    /// are moved into the present layout.
    pub fn end_recording(&mut self) -> Result<(), SchedulerError> {
        if self.state()? == PassState::Rendering {
            return Err(SchedulerError::InvalidPassState {
                pass: self.pass.name.clone(),
                actual: PassState::Rendering,
                expected: "Recording (end rendering first)",
            });
        }
        self.expect_state(&[PassState::Recording], "Recording")?;
        if !self.slot()?.barriers_resolved {
            if !self.pass.dependencies.is_empty() {
                log::warn!(
                    "Pass '{}': barriers were not resolved during recording",
                    self.pass.name
                );
            }
            self.resolve_barriers()?;
        }

        let release = self.resolver.release_for_present(
            &self.pass.name,
            &self.pass.dependencies,
            self.frame,
        )?;
        let context = self.slot()?.context;
        let device = self.pass.ctx.device();
        if !release.is_empty() {
            device.cmd_transitions(context, &release);
        }
        device.end_commands(context)?;
        self.set_state(PassState::Recorded)
    }

    fn slot(&self) -> Result<&FrameSlot, SchedulerError> {
        self.pass.slot(self.frame.frame_index)
    }

    fn set_state(&mut self, state: PassState) -> Result<(), SchedulerError> {
        self.pass.slot_mut(self.frame.frame_index)?.state = state;
        Ok(())
    }

    fn expect_state(&self, allowed: &[PassState], expected: &'static str) -> Result<(), SchedulerError> {
        let actual = self.state()?;
        if allowed.contains(&actual) {
            Ok(())
        } else {
            Err(SchedulerError::InvalidPassState {
                pass: self.pass.name.clone(),
                actual,
                expected,
            })
        }
    }

    fn expect_kind(&self, kind: PassKind, operation: &str) -> Result<(), SchedulerError> {
        if self.pass.kind == kind {
            Ok(())
        } else {
            self.operation_error(format!(
                "{operation} is not available on a {:?} pass",
                self.pass.kind
            ))
        }
    }

    fn expect_barriers(&self) -> Result<(), SchedulerError> {
        if self.pass.dependencies.is_empty() || self.slot()?.barriers_resolved {
            Ok(())
        } else {
            Err(SchedulerError::BarriersNotResolved(self.pass.name.clone()))
        }
    }

    fn operation_error<T>(&self, reason: String) -> Result<T, SchedulerError> {
        Err(SchedulerError::InvalidPassOperation {
            pass: self.pass.name.clone(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, RecordedCommand};
    use crate::config::SchedulerConfig;
    use crate::render_graph::access::AccessType;
    use crate::render_graph::resource::Resource;
    use std::sync::Arc;

    fn context() -> (Arc<HeadlessDevice>, GpuContext) {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = GpuContext::new(device.clone(), SchedulerConfig::default()).unwrap();
        (device, ctx)
    }

    fn program(kind: PipelineKind) -> ShaderProgram {
        ShaderProgram {
            kind,
            pipeline: PipelineHandle::from_raw(1),
            layout: PipelineLayoutHandle::from_raw(2),
            resource_sets: vec![ResourceSetHandle::from_raw(3)],
        }
    }

    fn submitted_commands(device: &HeadlessDevice, label: &str) -> Vec<RecordedCommand> {
        device
            .submissions()
            .into_iter()
            .find(|s| s.label == label)
            .map(|s| s.commands)
            .unwrap()
    }

    #[test]
    fn test_failed_creation_releases_partial_objects() {
        let (device, ctx) = context();
        // Both command contexts and the first semaphore succeed
        device.fail_creations_after(3);

        assert!(matches!(
            Pass::new(&ctx, PassDescriptor::graphics("broken")),
            Err(SchedulerError::Backend(_))
        ));
        assert_eq!(device.live_objects(), 0);
        assert!(ctx.with_arena(|arena| arena.children(arena.root()).is_empty()));
    }

    #[test]
    fn test_state_machine() {
        let (device, ctx) = context();
        let mut pass = Pass::new(&ctx, PassDescriptor::compute("blur")).unwrap();
        let resolver = BarrierResolver::default();
        assert_eq!(pass.state(0).unwrap(), PassState::Created);

        let mut encoder = pass.start_recording(FrameCursor::new(0), &resolver).unwrap();
        encoder.set_shader_program(&program(PipelineKind::Compute)).unwrap();
        encoder.dispatch(8, 8, 1).unwrap();
        encoder.end_recording().unwrap();
        assert_eq!(pass.state(0).unwrap(), PassState::Recorded);
        assert_eq!(pass.state(1).unwrap(), PassState::Created);

        pass.submit(0, None).unwrap();
        assert_eq!(pass.state(0).unwrap(), PassState::Submitted);
        assert!(matches!(
            pass.start_recording(FrameCursor::new(0), &resolver),
            Err(SchedulerError::InvalidPassState { .. })
        ));

        pass.wait_for_finish(0).unwrap();
        assert_eq!(pass.state(0).unwrap(), PassState::Finished);
        assert_eq!(
            submitted_commands(&device, "blur[0]"),
            vec![
                RecordedCommand::BindProgram(program(PipelineKind::Compute)),
                RecordedCommand::Dispatch { x: 8, y: 8, z: 1 },
            ]
        );
    }

    #[test]
    fn test_submit_requires_recorded() {
        let (_device, ctx) = context();
        let mut pass = Pass::new(&ctx, PassDescriptor::graphics("main")).unwrap();
        assert!(matches!(
            pass.submit(0, None),
            Err(SchedulerError::InvalidPassState {
                actual: PassState::Created,
                ..
            })
        ));
    }

    #[test]
    fn test_graphics_only_operations() {
        let (_device, ctx) = context();
        let mut pass = Pass::new(&ctx, PassDescriptor::compute("cull")).unwrap();
        let resolver = BarrierResolver::default();
        let mut encoder = pass.start_recording(FrameCursor::new(0), &resolver).unwrap();
        assert!(matches!(
            encoder.draw_indexed(3, 1),
            Err(SchedulerError::InvalidPassOperation { .. })
        ));
        assert!(matches!(
            encoder.set_shader_program(&program(PipelineKind::Graphics)),
            Err(SchedulerError::InvalidPassOperation { .. })
        ));
    }

    #[test]
    fn test_draw_requires_rendering_and_end_requires_closed_rendering() {
        let (_device, ctx) = context();
        let mut pass = Pass::new(&ctx, PassDescriptor::graphics("main")).unwrap();
        let resolver = BarrierResolver::default();
        let target = RenderTarget {
            color: vec![ImageViewHandle::from_raw(9)],
            depth: None,
            extent: Extent2D::new(32, 32),
        };

        let mut encoder = pass.start_recording(FrameCursor::new(1), &resolver).unwrap();
        assert!(matches!(
            encoder.draw_indexed(3, 1),
            Err(SchedulerError::InvalidPassState { .. })
        ));
        encoder.start_rendering(&target, Some(ClearValue::default())).unwrap();
        encoder.draw_indexed(3, 1).unwrap();
        assert!(matches!(
            encoder.end_recording(),
            Err(SchedulerError::InvalidPassState {
                actual: PassState::Rendering,
                ..
            })
        ));
        encoder.end_rendering().unwrap();
        encoder.end_recording().unwrap();
        assert_eq!(pass.state(1).unwrap(), PassState::Recorded);
    }

    #[test]
    fn test_work_before_barriers_is_rejected() {
        let (device, ctx) = context();
        let buffer = Resource::from_fn(&ctx, "particles", 1, |_, _| Ok(device.create_buffer(256)))
            .unwrap();
        let mut pass = Pass::new(&ctx, PassDescriptor::compute("simulate")).unwrap();
        pass.add_dependencies([Dependency::new(
            "particles",
            &buffer,
            AccessType::COMPUTE_SHADER_WRITE,
        )])
        .unwrap();
        let resolver = BarrierResolver::default();

        let mut encoder = pass.start_recording(FrameCursor::new(0), &resolver).unwrap();
        assert!(matches!(
            encoder.dispatch(1, 1, 1),
            Err(SchedulerError::BarriersNotResolved(_))
        ));
        encoder.resolve_barriers().unwrap();
        encoder.resolve_barriers().unwrap();
        encoder.dispatch(1, 1, 1).unwrap();
        encoder.end_recording().unwrap();

        assert_eq!(buffer.outbound_from(), Some(pass.pass_ref()));
        assert!(pass.add_dependencies(Vec::new()).is_err());
    }

    #[test]
    fn test_dispatch_checks_limits() {
        let device = Arc::new(HeadlessDevice::with_limits(DeviceLimits {
            max_compute_work_group_count: [16, 16, 1],
            max_color_attachments: 1,
        }));
        let ctx = GpuContext::new(device, SchedulerConfig::default()).unwrap();
        let mut pass = Pass::new(&ctx, PassDescriptor::compute("big")).unwrap();
        let resolver = BarrierResolver::default();
        let mut encoder = pass.start_recording(FrameCursor::new(0), &resolver).unwrap();
        assert!(encoder.dispatch(16, 16, 1).is_ok());
        assert!(matches!(
            encoder.dispatch(17, 1, 1),
            Err(SchedulerError::InvalidPassOperation { .. })
        ));
    }

    #[test]
    fn test_record_runs_callback_and_keeps_it() {
        let (device, ctx) = context();
        let mut pass = Pass::new(&ctx, PassDescriptor::compute("tick")).unwrap();
        pass.set_execute_callback(|encoder| {
            encoder.resolve_barriers()?;
            encoder.dispatch(encoder.frame_index() as u32 + 1, 1, 1)
        });
        let resolver = BarrierResolver::default();

        for frame_index in 0..2 {
            pass.record(FrameCursor::new(frame_index), &resolver).unwrap();
            pass.submit(frame_index, None).unwrap();
        }
        assert!(pass.has_execute_callback());
        assert_eq!(
            submitted_commands(&device, "tick[1]"),
            vec![RecordedCommand::Dispatch { x: 2, y: 1, z: 1 }]
        );
    }

    #[test]
    fn test_dispose_releases_objects() {
        let (device, ctx) = context();
        let pass = Pass::new(&ctx, PassDescriptor::graphics("main")).unwrap();
        // One command context and one finished semaphore per slot
        assert_eq!(device.live_objects(), 4);
        pass.dispose().unwrap();
        assert_eq!(device.live_objects(), 0);
    }
}
