//! Headless backend for testing and tooling.
//!
//! This backend performs no GPU work. It records every command, submission and
//! presentation so scheduling decisions can be inspected, and it simulates the
//! GPU completing each submission immediately: signal semaphores and fences
//! become signaled as soon as `submit` returns. Waiting on a semaphore that was
//! never signaled is rejected, which makes broken semaphore chains visible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::{Buffer, Texture};

/// A command captured by the headless backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Transition(Transition),
    BeginRendering {
        target: RenderTarget,
        clear: Option<ClearValue>,
    },
    EndRendering,
    BindProgram(ShaderProgram),
    BindDrawBuffers(DrawBuffers),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
}

/// A submission as seen by the simulated queue
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub queue: QueueKind,
    pub context: CommandContextHandle,
    pub label: String,
    pub wait_semaphores: Vec<SemaphoreHandle>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    pub fence: Option<FenceHandle>,
    pub commands: Vec<RecordedCommand>,
}

impl SubmissionRecord {
    /// Transitions recorded in this submission, in order
    pub fn transitions(&self) -> Vec<Transition> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Transition(transition) => Some(*transition),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub wait_semaphore: SemaphoreHandle,
    pub target_index: u32,
}

/// Kind of object destroyed through the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    CommandContext,
    Semaphore,
    Fence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyedObject {
    pub kind: ObjectKind,
    pub label: String,
}

#[derive(Debug)]
struct ContextState {
    label: String,
    queue: QueueKind,
    recording: bool,
    commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
struct SyncState {
    label: String,
    signaled: bool,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    contexts: HashMap<u64, ContextState>,
    semaphores: HashMap<u64, SyncState>,
    fences: HashMap<u64, SyncState>,
    submissions: Vec<SubmissionRecord>,
    presents: Vec<PresentRecord>,
    destroyed: Vec<DestroyedObject>,
    /// Object creations still allowed to succeed; `None` is unlimited
    creation_budget: Option<usize>,
    fail_submissions: bool,
    stalled: bool,
}

impl HeadlessState {
    fn take_creation(&mut self) -> bool {
        match &mut self.creation_budget {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Headless GPU device
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
    limits: DeviceLimits,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            state: Mutex::default(),
            limits,
        }
    }

    /// Make every subsequent object creation fail
    pub fn set_fail_creations(&self, fail: bool) {
        self.state.lock().creation_budget = fail.then_some(0);
    }

    /// Let `count` more object creations succeed, then fail the rest
    pub fn fail_creations_after(&self, count: usize) {
        self.state.lock().creation_budget = Some(count);
    }

    /// Make every subsequent submission fail
    pub fn set_fail_submissions(&self, fail: bool) {
        self.state.lock().fail_submissions = fail;
    }

    /// Simulate a hung GPU: submissions are accepted and ordered but their
    /// fences never signal
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Create a texture with fresh image and view handles
    pub fn create_texture(&self, aspect: ImageAspect, extent: Extent2D) -> Texture {
        let mut state = self.state.lock();
        let image = ImageHandle(state.allocate_id());
        let view = ImageViewHandle(state.allocate_id());
        Texture {
            image,
            view,
            aspect,
            extent,
        }
    }

    /// Create a buffer with a fresh handle
    pub fn create_buffer(&self, size: u64) -> Buffer {
        let mut state = self.state.lock();
        Buffer {
            buffer: BufferHandle(state.allocate_id()),
            size,
        }
    }

    /// All submissions so far, in queue order
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().submissions.clone()
    }

    /// Remove and return the submissions recorded so far
    pub fn take_submissions(&self) -> Vec<SubmissionRecord> {
        std::mem::take(&mut self.state.lock().submissions)
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.lock().presents.clone()
    }

    pub fn destroyed(&self) -> Vec<DestroyedObject> {
        self.state.lock().destroyed.clone()
    }

    /// Number of command contexts, semaphores and fences still alive
    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        state.contexts.len() + state.semaphores.len() + state.fences.len()
    }

    pub fn semaphore_label(&self, semaphore: SemaphoreHandle) -> Option<String> {
        self.state
            .lock()
            .semaphores
            .get(&semaphore.0)
            .map(|s| s.label.clone())
    }

    pub fn is_semaphore_signaled(&self, semaphore: SemaphoreHandle) -> bool {
        self.state
            .lock()
            .semaphores
            .get(&semaphore.0)
            .is_some_and(|s| s.signaled)
    }

    pub fn is_fence_signaled(&self, fence: FenceHandle) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence.0)
            .is_some_and(|f| f.signaled)
    }

    fn signal_semaphore(&self, semaphore: SemaphoreHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .semaphores
            .get_mut(&semaphore.0)
            .ok_or_else(|| BackendError::Internal(format!("unknown semaphore {semaphore:?}")))?;
        if entry.signaled {
            return Err(BackendError::Internal(format!(
                "semaphore '{}' signaled twice without a wait",
                entry.label
            )));
        }
        entry.signaled = true;
        Ok(())
    }

    fn consume_semaphore(&self, semaphore: SemaphoreHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        match state.semaphores.get_mut(&semaphore.0) {
            Some(entry) if entry.signaled => {
                entry.signaled = false;
                Ok(())
            }
            Some(entry) => Err(BackendError::PresentFailed(format!(
                "semaphore '{}' is never signaled",
                entry.label
            ))),
            None => Err(BackendError::PresentFailed(format!(
                "unknown semaphore {semaphore:?}"
            ))),
        }
    }

    fn record(&self, context: CommandContextHandle, command: RecordedCommand) {
        let mut state = self.state.lock();
        match state.contexts.get_mut(&context.0) {
            Some(ctx) if ctx.recording => {
                log::trace!("HeadlessDevice: [{}] {:?}", ctx.label, command);
                ctx.commands.push(command);
            }
            Some(ctx) => {
                log::error!(
                    "HeadlessDevice: command recorded into closed context '{}'",
                    ctx.label
                );
            }
            None => log::error!("HeadlessDevice: unknown command context {context:?}"),
        }
    }
}

impl GpuDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "Headless Backend"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_context(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> BackendResult<CommandContextHandle> {
        let mut state = self.state.lock();
        if !state.take_creation() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "command context '{label}'"
            )));
        }
        let id = state.allocate_id();
        state.contexts.insert(
            id,
            ContextState {
                label: label.to_string(),
                queue,
                recording: false,
                commands: Vec::new(),
            },
        );
        log::trace!("HeadlessDevice: created command context '{label}' on {queue:?}");
        Ok(CommandContextHandle(id))
    }

    fn destroy_command_context(&self, context: CommandContextHandle) {
        let mut state = self.state.lock();
        if let Some(ctx) = state.contexts.remove(&context.0) {
            state.destroyed.push(DestroyedObject {
                kind: ObjectKind::CommandContext,
                label: ctx.label,
            });
        }
    }

    fn begin_commands(&self, context: CommandContextHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ctx = state.contexts.get_mut(&context.0).ok_or_else(|| {
            BackendError::CommandRecordingFailed(format!("unknown command context {context:?}"))
        })?;
        ctx.commands.clear();
        ctx.recording = true;
        Ok(())
    }

    fn end_commands(&self, context: CommandContextHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let ctx = state.contexts.get_mut(&context.0).ok_or_else(|| {
            BackendError::CommandRecordingFailed(format!("unknown command context {context:?}"))
        })?;
        if !ctx.recording {
            return Err(BackendError::CommandRecordingFailed(format!(
                "command context '{}' is not recording",
                ctx.label
            )));
        }
        ctx.recording = false;
        Ok(())
    }

    fn create_semaphore(&self, label: &str) -> BackendResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        if !state.take_creation() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "semaphore '{label}'"
            )));
        }
        let id = state.allocate_id();
        state.semaphores.insert(
            id,
            SyncState {
                label: label.to_string(),
                signaled: false,
            },
        );
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if let Some(entry) = state.semaphores.remove(&semaphore.0) {
            state.destroyed.push(DestroyedObject {
                kind: ObjectKind::Semaphore,
                label: entry.label,
            });
        }
    }

    fn create_fence(&self, signaled: bool, label: &str) -> BackendResult<FenceHandle> {
        let mut state = self.state.lock();
        if !state.take_creation() {
            return Err(BackendError::ResourceCreationFailed(format!("fence '{label}'")));
        }
        let id = state.allocate_id();
        state.fences.insert(
            id,
            SyncState {
                label: label.to_string(),
                signaled,
            },
        );
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if let Some(entry) = state.fences.remove(&fence.0) {
            state.destroyed.push(DestroyedObject {
                kind: ObjectKind::Fence,
                label: entry.label,
            });
        }
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> BackendResult<()> {
        let state = self.state.lock();
        let entry = state
            .fences
            .get(&fence.0)
            .ok_or_else(|| BackendError::Internal(format!("unknown fence {fence:?}")))?;
        if entry.signaled {
            return Ok(());
        }
        // Nothing can signal the fence later: all work completes inside `submit`.
        log::error!(
            "HeadlessDevice: fence '{}' will never be signaled (timeout {:?})",
            entry.label,
            timeout
        );
        Err(BackendError::Timeout)
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| BackendError::Internal(format!("unknown fence {fence:?}")))?;
        entry.signaled = false;
        Ok(())
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.fail_submissions {
            return Err(BackendError::SubmissionFailed("submission rejected".into()));
        }

        let (label, commands) = {
            let ctx = state
                .contexts
                .get(&submission.command_context.0)
                .ok_or_else(|| {
                    BackendError::SubmissionFailed(format!(
                        "unknown command context {:?}",
                        submission.command_context
                    ))
                })?;
            if ctx.recording {
                return Err(BackendError::SubmissionFailed(format!(
                    "command context '{}' is still recording",
                    ctx.label
                )));
            }
            if ctx.queue != queue {
                return Err(BackendError::SubmissionFailed(format!(
                    "command context '{}' belongs to the {:?} queue",
                    ctx.label, ctx.queue
                )));
            }
            (ctx.label.clone(), ctx.commands.clone())
        };

        for semaphore in submission.wait_semaphores {
            match state.semaphores.get(&semaphore.0) {
                Some(entry) if entry.signaled => {}
                Some(entry) => {
                    return Err(BackendError::SubmissionFailed(format!(
                        "'{label}' waits on semaphore '{}' which is never signaled",
                        entry.label
                    )))
                }
                None => {
                    return Err(BackendError::SubmissionFailed(format!(
                        "'{label}' waits on unknown semaphore {semaphore:?}"
                    )))
                }
            }
        }
        if let Some(fence) = submission.fence {
            match state.fences.get(&fence.0) {
                Some(entry) if entry.signaled => {
                    return Err(BackendError::SubmissionFailed(format!(
                        "fence '{}' is already signaled",
                        entry.label
                    )))
                }
                Some(_) => {}
                None => {
                    return Err(BackendError::SubmissionFailed(format!(
                        "unknown fence {fence:?}"
                    )))
                }
            }
        }

        for semaphore in submission.wait_semaphores {
            if let Some(entry) = state.semaphores.get_mut(&semaphore.0) {
                entry.signaled = false;
            }
        }
        for semaphore in submission.signal_semaphores {
            if let Some(entry) = state.semaphores.get_mut(&semaphore.0) {
                entry.signaled = true;
            }
        }
        if !state.stalled {
            if let Some(fence) = submission.fence {
                if let Some(entry) = state.fences.get_mut(&fence.0) {
                    entry.signaled = true;
                }
            }
        }

        log::trace!(
            "HeadlessDevice: submitted '{}' to {:?} ({} commands)",
            label,
            queue,
            commands.len()
        );
        state.submissions.push(SubmissionRecord {
            queue,
            context: submission.command_context,
            label,
            wait_semaphores: submission.wait_semaphores.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence: submission.fence,
            commands,
        });
        Ok(())
    }

    fn wait_queue_idle(&self, _queue: QueueKind) -> BackendResult<()> {
        Ok(())
    }

    fn wait_idle(&self) -> BackendResult<()> {
        Ok(())
    }

    fn cmd_transitions(&self, context: CommandContextHandle, transitions: &[Transition]) {
        for transition in transitions {
            self.record(context, RecordedCommand::Transition(*transition));
        }
    }

    fn cmd_begin_rendering(
        &self,
        context: CommandContextHandle,
        target: &RenderTarget,
        clear: Option<&ClearValue>,
    ) {
        self.record(
            context,
            RecordedCommand::BeginRendering {
                target: target.clone(),
                clear: clear.copied(),
            },
        );
    }

    fn cmd_end_rendering(&self, context: CommandContextHandle) {
        self.record(context, RecordedCommand::EndRendering);
    }

    fn cmd_bind_program(&self, context: CommandContextHandle, program: &ShaderProgram) {
        self.record(context, RecordedCommand::BindProgram(program.clone()));
    }

    fn cmd_bind_draw_buffers(&self, context: CommandContextHandle, buffers: &DrawBuffers) {
        self.record(context, RecordedCommand::BindDrawBuffers(*buffers));
    }

    fn cmd_draw_indexed(&self, context: CommandContextHandle, index_count: u32, instance_count: u32) {
        self.record(
            context,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, context: CommandContextHandle, x: u32, y: u32, z: u32) {
        self.record(context, RecordedCommand::Dispatch { x, y, z });
    }
}

/// Headless presentation layer cycling through a fixed set of targets
#[derive(Debug)]
pub struct HeadlessPresenter {
    device: Arc<HeadlessDevice>,
    targets: Vec<Texture>,
    extent: Extent2D,
    next_target: u32,
}

impl HeadlessPresenter {
    pub fn new(device: Arc<HeadlessDevice>, target_count: usize, extent: Extent2D) -> Self {
        let targets = (0..target_count)
            .map(|_| device.create_texture(ImageAspect::Color, extent))
            .collect();
        Self {
            device,
            targets,
            extent,
            next_target: 0,
        }
    }

    /// Textures backing the presentable targets, in target-index order
    pub fn targets(&self) -> &[Texture] {
        &self.targets
    }
}

impl Presenter for HeadlessPresenter {
    fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn target_extent(&self) -> Extent2D {
        self.extent
    }

    fn acquire_next_target(
        &mut self,
        signal: SemaphoreHandle,
        _timeout: Option<Duration>,
    ) -> BackendResult<u32> {
        if self.targets.is_empty() {
            return Err(BackendError::AcquireFailed("no presentable targets".into()));
        }
        let index = self.next_target;
        self.next_target = (self.next_target + 1) % self.targets.len() as u32;
        self.device
            .signal_semaphore(signal)
            .map_err(|e| BackendError::AcquireFailed(e.to_string()))?;
        log::trace!("HeadlessPresenter: acquired target {index}");
        Ok(index)
    }

    fn present(&mut self, wait: SemaphoreHandle, target_index: u32) -> BackendResult<()> {
        if target_index as usize >= self.targets.len() {
            return Err(BackendError::PresentFailed(format!(
                "target index {target_index} out of range"
            )));
        }
        self.device.consume_semaphore(wait)?;
        self.device.state.lock().presents.push(PresentRecord {
            wait_semaphore: wait,
            target_index,
        });
        log::trace!("HeadlessPresenter: presented target {target_index}");
        Ok(())
    }
}
