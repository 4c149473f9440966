//! Core backend abstraction traits
//!
//! [`GpuDevice`] is the object/pipeline layer and [`Presenter`] the
//! presentation layer. Device bootstrap, allocation and pipeline construction
//! happen outside this crate; implementations only wrap already-created
//! objects.

use crate::backend::types::*;
use std::time::Duration;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create {0}")]
    ResourceCreationFailed(String),
    #[error("Queue submission rejected: {0}")]
    SubmissionFailed(String),
    #[error("Failed to record commands: {0}")]
    CommandRecordingFailed(String),
    #[error("Failed to acquire next target: {0}")]
    AcquireFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Presentation target is out of date")]
    OutOfDate,
    #[error("Wait timed out")]
    Timeout,
    #[error("Device lost")]
    DeviceLost,
    #[error("Unsupported device configuration: {0}")]
    Unsupported(String),
    #[error("Internal backend error: {0}")]
    Internal(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The object/pipeline layer consumed by the scheduler.
///
/// Recording methods (`cmd_*`) are infallible; a backend that cannot find the
/// command context logs the problem and drops the command, and the failure
/// surfaces at [`GpuDevice::end_commands`] or submission.
pub trait GpuDevice: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    fn limits(&self) -> DeviceLimits;

    // Command-recording contexts

    fn create_command_context(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> BackendResult<CommandContextHandle>;

    fn destroy_command_context(&self, context: CommandContextHandle);

    /// Reset the context and begin recording into it
    fn begin_commands(&self, context: CommandContextHandle) -> BackendResult<()>;

    /// Close the context; it may be submitted afterwards
    fn end_commands(&self, context: CommandContextHandle) -> BackendResult<()>;

    // Synchronization primitives

    fn create_semaphore(&self, label: &str) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    fn create_fence(&self, signaled: bool, label: &str) -> BackendResult<FenceHandle>;

    fn destroy_fence(&self, fence: FenceHandle);

    /// Block until the fence is signaled. `None` waits without bound.
    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> BackendResult<()>;

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()>;

    // Queues

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> BackendResult<()>;

    fn wait_queue_idle(&self, queue: QueueKind) -> BackendResult<()>;

    fn wait_idle(&self) -> BackendResult<()>;

    // Command recording

    fn cmd_transitions(&self, context: CommandContextHandle, transitions: &[Transition]);

    fn cmd_begin_rendering(
        &self,
        context: CommandContextHandle,
        target: &RenderTarget,
        clear: Option<&ClearValue>,
    );

    fn cmd_end_rendering(&self, context: CommandContextHandle);

    /// Bind the pipeline and its resource sets
    fn cmd_bind_program(&self, context: CommandContextHandle, program: &ShaderProgram);

    fn cmd_bind_draw_buffers(&self, context: CommandContextHandle, buffers: &DrawBuffers);

    fn cmd_draw_indexed(&self, context: CommandContextHandle, index_count: u32, instance_count: u32);

    fn cmd_dispatch(&self, context: CommandContextHandle, x: u32, y: u32, z: u32);
}

/// The presentation layer consumed by the scheduler
pub trait Presenter: Send {
    /// Number of presentable targets
    fn target_count(&self) -> usize;

    fn target_extent(&self) -> Extent2D;

    /// Acquire the next presentable target, signaling `signal` once it is
    /// ready. This is the only call that waits on display readiness.
    fn acquire_next_target(
        &mut self,
        signal: SemaphoreHandle,
        timeout: Option<Duration>,
    ) -> BackendResult<u32>;

    /// Queue `target_index` for presentation once `wait` is signaled
    fn present(&mut self, wait: SemaphoreHandle, target_index: u32) -> BackendResult<()>;
}
