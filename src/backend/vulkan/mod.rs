//! Vulkan backend implementation using ash
//!
//! Wraps a device, queues and swapchain created by the application. Requires
//! Vulkan 1.3 (dynamic rendering). Semaphores, fences and GPU resources are
//! stored as raw `vk` handles inside the backend-neutral handle types; only
//! command contexts need a lookup table because each one owns a pool and a
//! buffer.

pub mod conversion;

use std::collections::HashMap;
use std::time::Duration;

use ash::khr::swapchain;
use ash::vk;
use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::Texture;
use conversion::*;

/// A queue and the family it was created from
#[derive(Debug, Clone, Copy)]
pub struct VulkanQueue {
    pub queue: vk::Queue,
    pub family_index: u32,
}

fn check_queue_families(
    graphics: VulkanQueue,
    compute: VulkanQueue,
    concurrent: bool,
) -> BackendResult<()> {
    if concurrent || graphics.family_index == compute.family_index {
        return Ok(());
    }
    Err(BackendError::Unsupported(format!(
        "compute family {} differs from graphics family {}; \
         resources need concurrent sharing (VulkanDevice::new_concurrent)",
        compute.family_index, graphics.family_index
    )))
}

struct VkCommandContext {
    label: String,
    queue: QueueKind,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

/// Vulkan implementation of [`GpuDevice`]
pub struct VulkanDevice {
    device: ash::Device,
    graphics_queue: VulkanQueue,
    compute_queue: VulkanQueue,
    limits: DeviceLimits,
    contexts: Mutex<HashMap<u64, VkCommandContext>>,
    next_context_id: Mutex<u64>,
}

impl VulkanDevice {
    /// Wrap an existing device whose compute and graphics work share one
    /// queue family.
    ///
    /// `compute_queue` may be the graphics queue itself. Barriers never
    /// transfer queue family ownership, so a compute queue from another
    /// family is rejected; use [`VulkanDevice::new_concurrent`] for that.
    pub fn new(
        device: ash::Device,
        graphics_queue: VulkanQueue,
        compute_queue: VulkanQueue,
        limits: DeviceLimits,
    ) -> BackendResult<Self> {
        check_queue_families(graphics_queue, compute_queue, false)?;
        Ok(Self::wrap(device, graphics_queue, compute_queue, limits))
    }

    /// Wrap an existing device with a compute queue from a separate family.
    ///
    /// Every image and buffer passed through a render graph must be created
    /// with `vk::SharingMode::CONCURRENT` over both families (see
    /// [`VulkanDevice::queue_family_indices`]). With exclusive sharing the
    /// contents are undefined once another family touches them.
    pub fn new_concurrent(
        device: ash::Device,
        graphics_queue: VulkanQueue,
        compute_queue: VulkanQueue,
        limits: DeviceLimits,
    ) -> Self {
        Self::wrap(device, graphics_queue, compute_queue, limits)
    }

    fn wrap(
        device: ash::Device,
        graphics_queue: VulkanQueue,
        compute_queue: VulkanQueue,
        limits: DeviceLimits,
    ) -> Self {
        log::info!(
            "VulkanDevice: graphics family {}, compute family {}",
            graphics_queue.family_index,
            compute_queue.family_index
        );
        Self {
            device,
            graphics_queue,
            compute_queue,
            limits,
            contexts: Mutex::new(HashMap::new()),
            next_context_id: Mutex::new(0),
        }
    }

    /// Distinct queue families in use, for `vk::SharingMode::CONCURRENT`
    /// resource creation
    pub fn queue_family_indices(&self) -> Vec<u32> {
        let mut families = vec![self.graphics_queue.family_index];
        if self.compute_queue.family_index != self.graphics_queue.family_index {
            families.push(self.compute_queue.family_index);
        }
        families
    }

    /// Get the Vulkan device
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn queue(&self, kind: QueueKind) -> VulkanQueue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
        }
    }

    /// Look up the command buffer of a context
    fn command_buffer(&self, context: CommandContextHandle) -> Option<vk::CommandBuffer> {
        let buffer = self.contexts.lock().get(&context.0).map(|c| c.buffer);
        if buffer.is_none() {
            log::error!("VulkanDevice: unknown command context {context:?}");
        }
        buffer
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &str {
        "Vulkan Backend"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_command_context(
        &self,
        queue: QueueKind,
        label: &str,
    ) -> BackendResult<CommandContextHandle> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue(queue).family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }.map_err(|e| {
            BackendError::ResourceCreationFailed(format!("command pool '{label}': {e}"))
        })?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = match unsafe { self.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { self.device.destroy_command_pool(pool, None) };
                return Err(BackendError::ResourceCreationFailed(format!(
                    "command buffer '{label}': {e}"
                )));
            }
        };

        let id = {
            let mut next = self.next_context_id.lock();
            *next += 1;
            *next
        };
        self.contexts.lock().insert(
            id,
            VkCommandContext {
                label: label.to_string(),
                queue,
                pool,
                buffer,
            },
        );
        log::trace!("VulkanDevice: created command context '{label}' on {queue:?}");
        Ok(CommandContextHandle(id))
    }

    fn destroy_command_context(&self, context: CommandContextHandle) {
        if let Some(ctx) = self.contexts.lock().remove(&context.0) {
            unsafe {
                // Destroying the pool frees its command buffer.
                self.device.destroy_command_pool(ctx.pool, None);
            }
        }
    }

    fn begin_commands(&self, context: CommandContextHandle) -> BackendResult<()> {
        let (pool, buffer) = self
            .contexts
            .lock()
            .get(&context.0)
            .map(|c| (c.pool, c.buffer))
            .ok_or_else(|| {
                BackendError::CommandRecordingFailed(format!("unknown command context {context:?}"))
            })?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))?;
            self.device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn end_commands(&self, context: CommandContextHandle) -> BackendResult<()> {
        let buffer = self.command_buffer(context).ok_or_else(|| {
            BackendError::CommandRecordingFailed(format!("unknown command context {context:?}"))
        })?;
        unsafe { self.device.end_command_buffer(buffer) }
            .map_err(|e| BackendError::CommandRecordingFailed(e.to_string()))
    }

    fn create_semaphore(&self, label: &str) -> BackendResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&info, None) }
            .map(SemaphoreHandle::from)
            .map_err(|e| BackendError::ResourceCreationFailed(format!("semaphore '{label}': {e}")))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device.destroy_semaphore(semaphore.into(), None) };
    }

    fn create_fence(&self, signaled: bool, label: &str) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
            .map(FenceHandle::from)
            .map_err(|e| BackendError::ResourceCreationFailed(format!("fence '{label}': {e}")))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(fence.into(), None) };
    }

    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> BackendResult<()> {
        let fences = [vk::Fence::from(fence)];
        match unsafe {
            self.device
                .wait_for_fences(&fences, true, convert_timeout(timeout))
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(BackendError::Timeout),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(BackendError::DeviceLost),
            Err(e) => Err(BackendError::Internal(format!("fence wait: {e}"))),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        unsafe { self.device.reset_fences(&[fence.into()]) }
            .map_err(|e| BackendError::Internal(format!("fence reset: {e}")))
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> BackendResult<()> {
        let (buffer, context_queue) = self
            .contexts
            .lock()
            .get(&submission.command_context.0)
            .map(|c| (c.buffer, c.queue))
            .ok_or_else(|| {
                BackendError::SubmissionFailed(format!(
                    "unknown command context {:?}",
                    submission.command_context
                ))
            })?;
        if context_queue != queue {
            return Err(BackendError::SubmissionFailed(format!(
                "command context recorded for {context_queue:?} submitted to {queue:?}"
            )));
        }

        let wait_semaphores: Vec<vk::Semaphore> = submission
            .wait_semaphores
            .iter()
            .map(|&s| s.into())
            .collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signal_semaphores
            .iter()
            .map(|&s| s.into())
            .collect();
        let command_buffers = [buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let fence = submission
            .fence
            .map(vk::Fence::from)
            .unwrap_or_else(vk::Fence::null);

        unsafe {
            self.device
                .queue_submit(self.queue(queue).queue, &[submit_info], fence)
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::SubmissionFailed(other.to_string()),
        })
    }

    fn wait_queue_idle(&self, queue: QueueKind) -> BackendResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue(queue).queue) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::Internal(other.to_string()),
        })
    }

    fn wait_idle(&self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::Internal(other.to_string()),
        })
    }

    fn cmd_transitions(&self, context: CommandContextHandle, transitions: &[Transition]) {
        let Some(cmd) = self.command_buffer(context) else {
            return;
        };
        if transitions.is_empty() {
            return;
        }

        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();
        let mut image_barriers = Vec::new();
        let mut buffer_barriers = Vec::new();

        for transition in transitions {
            src_stages |= convert_stages(transition.src_stages);
            dst_stages |= convert_stages(transition.dst_stages);

            match transition.target {
                BarrierTarget::Image { image, aspect } => {
                    image_barriers.push(
                        vk::ImageMemoryBarrier::default()
                            .old_layout(convert_layout(transition.old_layout))
                            .new_layout(convert_layout(transition.new_layout))
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(image.into())
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: convert_aspect(aspect),
                                base_mip_level: 0,
                                level_count: vk::REMAINING_MIP_LEVELS,
                                base_array_layer: 0,
                                layer_count: vk::REMAINING_ARRAY_LAYERS,
                            })
                            .src_access_mask(convert_access(transition.src_access))
                            .dst_access_mask(convert_access(transition.dst_access)),
                    );
                }
                BarrierTarget::Buffer { buffer } => {
                    buffer_barriers.push(
                        vk::BufferMemoryBarrier::default()
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer.into())
                            .offset(0)
                            .size(vk::WHOLE_SIZE)
                            .src_access_mask(convert_access(transition.src_access))
                            .dst_access_mask(convert_access(transition.dst_access)),
                    );
                }
            }
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn cmd_begin_rendering(
        &self,
        context: CommandContextHandle,
        target: &RenderTarget,
        clear: Option<&ClearValue>,
    ) {
        let Some(cmd) = self.command_buffer(context) else {
            return;
        };

        let load_op = if clear.is_some() {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let clear = clear.copied().unwrap_or_default();

        let color_attachments: Vec<vk::RenderingAttachmentInfo> = target
            .color
            .iter()
            .map(|&view| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(view.into())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear.color,
                        },
                    })
            })
            .collect();

        let depth_attachment = target.depth.map(|view| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view.into())
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: clear.depth,
                        stencil: 0,
                    },
                })
        });

        let extent = vk::Extent2D {
            width: target.extent.width,
            height: target.extent.height,
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device.cmd_begin_rendering(cmd, &rendering_info);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
    }

    fn cmd_end_rendering(&self, context: CommandContextHandle) {
        if let Some(cmd) = self.command_buffer(context) {
            unsafe { self.device.cmd_end_rendering(cmd) };
        }
    }

    fn cmd_bind_program(&self, context: CommandContextHandle, program: &ShaderProgram) {
        let Some(cmd) = self.command_buffer(context) else {
            return;
        };
        let bind_point = convert_bind_point(program.kind);
        let sets: Vec<vk::DescriptorSet> =
            program.resource_sets.iter().map(|&s| s.into()).collect();

        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, bind_point, program.pipeline.into());
            if !sets.is_empty() {
                self.device.cmd_bind_descriptor_sets(
                    cmd,
                    bind_point,
                    program.layout.into(),
                    0,
                    &sets,
                    &[],
                );
            }
        }
    }

    fn cmd_bind_draw_buffers(&self, context: CommandContextHandle, buffers: &DrawBuffers) {
        let Some(cmd) = self.command_buffer(context) else {
            return;
        };
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                cmd,
                0,
                &[buffers.vertex.into()],
                &[buffers.vertex_offset],
            );
            self.device.cmd_bind_index_buffer(
                cmd,
                buffers.index.into(),
                buffers.index_offset,
                convert_index_type(buffers.index_type),
            );
        }
    }

    fn cmd_draw_indexed(&self, context: CommandContextHandle, index_count: u32, instance_count: u32) {
        if let Some(cmd) = self.command_buffer(context) {
            unsafe {
                self.device
                    .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0)
            };
        }
    }

    fn cmd_dispatch(&self, context: CommandContextHandle, x: u32, y: u32, z: u32) {
        if let Some(cmd) = self.command_buffer(context) {
            unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let contexts = self.contexts.get_mut();
        if !contexts.is_empty() {
            log::warn!(
                "VulkanDevice: {} command contexts were never disposed",
                contexts.len()
            );
            unsafe {
                self.device.device_wait_idle().ok();
                for (_, ctx) in contexts.drain() {
                    log::debug!("VulkanDevice: destroying leaked context '{}'", ctx.label);
                    self.device.destroy_command_pool(ctx.pool, None);
                }
            }
        }
    }
}

/// Vulkan implementation of [`Presenter`] over an existing swapchain
pub struct VulkanPresenter {
    swapchain_fn: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    present_queue: vk::Queue,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    extent: Extent2D,
}

impl VulkanPresenter {
    /// Wrap a swapchain. `image_views[i]` must view `images[i]`.
    pub fn new(
        swapchain_fn: swapchain::Device,
        swapchain: vk::SwapchainKHR,
        present_queue: vk::Queue,
        images: Vec<vk::Image>,
        image_views: Vec<vk::ImageView>,
        extent: vk::Extent2D,
    ) -> BackendResult<Self> {
        if images.len() != image_views.len() {
            return Err(BackendError::Internal(format!(
                "{} swapchain images but {} views",
                images.len(),
                image_views.len()
            )));
        }
        Ok(Self {
            swapchain_fn,
            swapchain,
            present_queue,
            images,
            image_views,
            extent: Extent2D::new(extent.width, extent.height),
        })
    }

    /// Textures for the swapchain images, in target-index order
    pub fn textures(&self) -> Vec<Texture> {
        self.images
            .iter()
            .zip(&self.image_views)
            .map(|(&image, &view)| Texture {
                image: image.into(),
                view: view.into(),
                aspect: ImageAspect::Color,
                extent: self.extent,
            })
            .collect()
    }
}

impl Presenter for VulkanPresenter {
    fn target_count(&self) -> usize {
        self.images.len()
    }

    fn target_extent(&self) -> Extent2D {
        self.extent
    }

    fn acquire_next_target(
        &mut self,
        signal: SemaphoreHandle,
        timeout: Option<Duration>,
    ) -> BackendResult<u32> {
        let result = unsafe {
            self.swapchain_fn.acquire_next_image(
                self.swapchain,
                convert_timeout(timeout),
                signal.into(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("VulkanPresenter: swapchain is suboptimal");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(BackendError::OutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(BackendError::Timeout),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(BackendError::DeviceLost),
            Err(e) => Err(BackendError::AcquireFailed(e.to_string())),
        }
    }

    fn present(&mut self, wait: SemaphoreHandle, target_index: u32) -> BackendResult<()> {
        let wait_semaphores = [vk::Semaphore::from(wait)];
        let swapchains = [self.swapchain];
        let image_indices = [target_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe {
            self.swapchain_fn
                .queue_present(self.present_queue, &present_info)
        } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("VulkanPresenter: swapchain is suboptimal");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(BackendError::OutOfDate),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(BackendError::DeviceLost),
            Err(e) => Err(BackendError::PresentFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn queue(family_index: u32) -> VulkanQueue {
        VulkanQueue {
            queue: vk::Queue::null(),
            family_index,
        }
    }

    #[test]
    fn test_shared_family_is_accepted() {
        assert!(check_queue_families(queue(0), queue(0), false).is_ok());
    }

    #[test]
    fn test_separate_compute_family_needs_concurrent_sharing() {
        assert!(matches!(
            check_queue_families(queue(0), queue(2), false),
            Err(BackendError::Unsupported(_))
        ));
        assert!(check_queue_families(queue(0), queue(2), true).is_ok());
    }
}
