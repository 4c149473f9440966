//! Type conversions between scheduler types and Vulkan types.

use ash::vk;
use ash::vk::Handle;

use crate::backend::types::*;

/// Convert an image layout to the Vulkan layout.
pub fn convert_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Convert pipeline stages to Vulkan stage flags.
pub fn convert_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();

    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        result |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::VERTEX_SHADER) {
        result |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::EARLY_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::LATE_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        result |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::COMPUTE_SHADER) {
        result |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        result |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    if stages.contains(PipelineStages::ALL_COMMANDS) {
        result |= vk::PipelineStageFlags::ALL_COMMANDS;
    }

    result
}

/// Convert an access mask to Vulkan access flags.
pub fn convert_access(access: AccessMask) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if access.contains(AccessMask::SHADER_READ) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessMask::SHADER_WRITE) {
        result |= vk::AccessFlags::SHADER_WRITE;
    }
    if access.contains(AccessMask::COLOR_ATTACHMENT_READ) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
    }
    if access.contains(AccessMask::COLOR_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessMask::DEPTH_STENCIL_ATTACHMENT_READ) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if access.contains(AccessMask::DEPTH_STENCIL_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if access.contains(AccessMask::TRANSFER_READ) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessMask::TRANSFER_WRITE) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if access.contains(AccessMask::MEMORY_READ) {
        result |= vk::AccessFlags::MEMORY_READ;
    }
    if access.contains(AccessMask::MEMORY_WRITE) {
        result |= vk::AccessFlags::MEMORY_WRITE;
    }

    result
}

pub fn convert_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
        ImageAspect::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

pub fn convert_index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn convert_bind_point(kind: PipelineKind) -> vk::PipelineBindPoint {
    match kind {
        PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Convert an optional timeout to the nanosecond value Vulkan waits take.
pub fn convert_timeout(timeout: Option<std::time::Duration>) -> u64 {
    timeout
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(u64::MAX)
}

impl DeviceLimits {
    /// Read the limits the scheduler validates against from Vulkan properties.
    pub fn from_vk(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            max_compute_work_group_count: limits.max_compute_work_group_count,
            max_color_attachments: limits.max_color_attachments,
        }
    }
}

macro_rules! vk_handle_conversions {
    ($($ours:ident => $theirs:ty),* $(,)?) => {
        $(
            impl From<$theirs> for $ours {
                fn from(handle: $theirs) -> Self {
                    Self::from_raw(handle.as_raw())
                }
            }

            impl From<$ours> for $theirs {
                fn from(handle: $ours) -> Self {
                    <$theirs>::from_raw(handle.raw())
                }
            }
        )*
    };
}

vk_handle_conversions!(
    SemaphoreHandle => vk::Semaphore,
    FenceHandle => vk::Fence,
    ImageHandle => vk::Image,
    ImageViewHandle => vk::ImageView,
    BufferHandle => vk::Buffer,
    PipelineHandle => vk::Pipeline,
    PipelineLayoutHandle => vk::PipelineLayout,
    ResourceSetHandle => vk::DescriptorSet,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_conversion_combines_flags() {
        let stages = PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS;
        assert_eq!(
            convert_stages(stages),
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
    }

    #[test]
    fn test_handle_roundtrip() {
        let image = vk::Image::from_raw(12345);
        let ours = ImageHandle::from(image);
        assert_eq!(ours.raw(), 12345);
        assert_eq!(vk::Image::from(ours), image);
    }

    #[test]
    fn test_unbounded_timeout() {
        assert_eq!(convert_timeout(None), u64::MAX);
        assert_eq!(
            convert_timeout(Some(std::time::Duration::from_millis(2))),
            2_000_000
        );
    }
}
