//! Backend-neutral handle and command types
//!
//! Handles are opaque 64-bit values. Backends choose what the value means: the
//! Vulkan backend stores raw `vk` handles, the headless backend stores its own
//! counters.

use bitflags::bitflags;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Wrap a raw backend value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw backend value.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

gpu_handle!(
    /// Handle to a command-recording context (a command pool plus one primary buffer)
    CommandContextHandle
);
gpu_handle!(
    /// Handle to a GPU-only ordering signal
    SemaphoreHandle
);
gpu_handle!(
    /// Handle to a CPU-observable completion signal
    FenceHandle
);
gpu_handle!(
    /// Handle to an image
    ImageHandle
);
gpu_handle!(
    /// Handle to an image view
    ImageViewHandle
);
gpu_handle!(
    /// Handle to a buffer
    BufferHandle
);
gpu_handle!(
    /// Handle to a graphics or compute pipeline
    PipelineHandle
);
gpu_handle!(
    /// Handle to a pipeline layout
    PipelineLayoutHandle
);
gpu_handle!(
    /// Handle to a bound descriptor/resource set
    ResourceSetHandle
);

/// Queue a pass submits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
}

/// Internal memory arrangement of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined (initial state, or discarded)
    #[default]
    Undefined,
    /// Storage image access
    General,
    ColorAttachment,
    DepthAttachment,
    DepthReadOnly,
    ShaderReadOnly,
    PresentSrc,
}

/// Which aspect of an image a barrier covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
    DepthStencil,
}

impl ImageAspect {
    pub fn is_depth(self) -> bool {
        matches!(self, ImageAspect::Depth | ImageAspect::DepthStencil)
    }
}

bitflags! {
    /// Pipeline stages a barrier or semaphore wait refers to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const VERTEX_SHADER = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const EARLY_FRAGMENT_TESTS = 1 << 3;
        const LATE_FRAGMENT_TESTS = 1 << 4;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 5;
        const COMPUTE_SHADER = 1 << 6;
        const TRANSFER = 1 << 7;
        const BOTTOM_OF_PIPE = 1 << 8;
        const ALL_COMMANDS = 1 << 9;
    }
}

bitflags! {
    /// Memory access kinds made available/visible by a barrier
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const COLOR_ATTACHMENT_READ = 1 << 2;
        const COLOR_ATTACHMENT_WRITE = 1 << 3;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 5;
        const TRANSFER_READ = 1 << 6;
        const TRANSFER_WRITE = 1 << 7;
        const MEMORY_READ = 1 << 8;
        const MEMORY_WRITE = 1 << 9;
    }
}

/// The GPU object a transition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierTarget {
    Image { image: ImageHandle, aspect: ImageAspect },
    Buffer { buffer: BufferHandle },
}

/// A layout/access-mask transition emitted into a command context.
///
/// Layouts are ignored for buffer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub target: BarrierTarget,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessMask,
    pub dst_access: AccessMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Attachments a graphics pass renders into
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    pub color: Vec<ImageViewHandle>,
    pub depth: Option<ImageViewHandle>,
    pub extent: Extent2D,
}

/// Clear values applied when rendering starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValue {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for ClearValue {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        }
    }
}

/// Bind point of a shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// A pipeline together with the resource sets bound alongside it.
///
/// Pipelines and descriptor sets are built by the pipeline layer; this type
/// only carries their handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub kind: PipelineKind,
    pub pipeline: PipelineHandle,
    pub layout: PipelineLayoutHandle,
    pub resource_sets: Vec<ResourceSetHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

/// Vertex and index buffers for indexed draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBuffers {
    pub vertex: BufferHandle,
    pub vertex_offset: u64,
    pub index: BufferHandle,
    pub index_offset: u64,
    pub index_type: IndexType,
}

/// One queue submission
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_context: CommandContextHandle,
    /// Waited on at all stages before the work begins
    pub wait_semaphores: &'a [SemaphoreHandle],
    pub signal_semaphores: &'a [SemaphoreHandle],
    pub fence: Option<FenceHandle>,
}

/// Physical-device limits the scheduler validates against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_compute_work_group_count: [u32; 3],
    pub max_color_attachments: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        // Minimums guaranteed by the Vulkan specification
        Self {
            max_compute_work_group_count: [65535, 65535, 65535],
            max_color_attachments: 4,
        }
    }
}
