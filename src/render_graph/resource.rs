//! Per-frame resources tracked by the render graph

use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::SchedulerError;
use crate::render_graph::pass::{PassId, PassKind};

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

/// The pass that last wrote a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassRef {
    pub id: PassId,
    pub kind: PassKind,
}

/// Which frame a recording call refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCursor {
    /// Frame-in-flight slot
    pub frame_index: usize,
    /// Presentable target acquired for this frame, if any
    pub target_index: Option<u32>,
}

impl FrameCursor {
    pub fn new(frame_index: usize) -> Self {
        Self {
            frame_index,
            target_index: None,
        }
    }

    pub fn with_target(frame_index: usize, target_index: u32) -> Self {
        Self {
            frame_index,
            target_index: Some(target_index),
        }
    }
}

/// How a resource's payload is selected for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceIndexing {
    /// One group of `logical_count` elements per frame-in-flight slot
    FrameSlot,
    /// One element per presentable target, selected by the acquired index
    PresentTarget,
}

/// A GPU texture: image, default view and the aspect barriers cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Texture {
    pub image: ImageHandle,
    pub view: ImageViewHandle,
    pub aspect: ImageAspect,
    pub extent: Extent2D,
}

/// A GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Buffer {
    pub buffer: BufferHandle,
    pub size: u64,
}

/// Payload types a [`Resource`] can hold
pub trait ResourcePayload: Send + Sync + 'static {
    /// The object barriers for this element apply to, or `None` when the
    /// element needs no synchronization.
    fn barrier_target(&self) -> Option<BarrierTarget>;
}

impl ResourcePayload for Texture {
    fn barrier_target(&self) -> Option<BarrierTarget> {
        Some(BarrierTarget::Image {
            image: self.image,
            aspect: self.aspect,
        })
    }
}

impl ResourcePayload for Buffer {
    fn barrier_target(&self) -> Option<BarrierTarget> {
        Some(BarrierTarget::Buffer {
            buffer: self.buffer,
        })
    }
}

/// An element of a resource that needs a barrier this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedTarget {
    /// Index into the resource's payload
    pub element: usize,
    pub target: BarrierTarget,
}

#[derive(Debug)]
struct ResourceState {
    outbound_from: Option<PassRef>,
    layouts: Vec<ImageLayout>,
}

/// A typed, mutable cell wrapping per-frame GPU objects.
///
/// The payload holds `frames_in_flight × logical_count` elements for
/// frame-slot resources and one element per target for present-target
/// resources. Alongside the payload the resource records which pass last
/// wrote it and the current layout of every element.
#[derive(Debug)]
pub struct Resource<T> {
    id: ResourceId,
    name: String,
    indexing: ResourceIndexing,
    frames_in_flight: usize,
    logical_count: usize,
    payload: RwLock<Vec<T>>,
    state: Mutex<ResourceState>,
}

impl<T: ResourcePayload> Resource<T> {
    /// Create a frame-slot resource.
    ///
    /// `payload` is laid out slot-major: elements
    /// `[slot * logical_count .. (slot + 1) * logical_count]` belong to one
    /// frame-in-flight slot.
    pub fn new(
        ctx: &GpuContext,
        name: &str,
        payload: Vec<T>,
    ) -> Result<Arc<Self>, SchedulerError> {
        let frames = ctx.frames_in_flight();
        if payload.is_empty() || payload.len() % frames != 0 {
            return Err(SchedulerError::InvalidResource {
                resource: name.to_string(),
                reason: format!(
                    "payload of {} elements does not cover {} frames in flight",
                    payload.len(),
                    frames
                ),
            });
        }
        let logical_count = payload.len() / frames;
        Ok(Self::build(
            ctx,
            name,
            ResourceIndexing::FrameSlot,
            logical_count,
            payload,
        ))
    }

    /// Create a frame-slot resource by calling `create(slot, index)` for
    /// every element.
    pub fn from_fn<F>(
        ctx: &GpuContext,
        name: &str,
        logical_count: usize,
        mut create: F,
    ) -> Result<Arc<Self>, SchedulerError>
    where
        F: FnMut(usize, usize) -> Result<T, SchedulerError>,
    {
        let mut payload = Vec::with_capacity(ctx.frames_in_flight() * logical_count);
        for slot in 0..ctx.frames_in_flight() {
            for index in 0..logical_count {
                payload.push(create(slot, index)?);
            }
        }
        Self::new(ctx, name, payload)
    }

    /// Create a resource indexed by the acquired presentable target
    pub fn present_targets(
        ctx: &GpuContext,
        name: &str,
        targets: Vec<T>,
    ) -> Result<Arc<Self>, SchedulerError> {
        if targets.is_empty() {
            return Err(SchedulerError::InvalidResource {
                resource: name.to_string(),
                reason: "no presentable targets".to_string(),
            });
        }
        Ok(Self::build(
            ctx,
            name,
            ResourceIndexing::PresentTarget,
            1,
            targets,
        ))
    }

    fn build(
        ctx: &GpuContext,
        name: &str,
        indexing: ResourceIndexing,
        logical_count: usize,
        payload: Vec<T>,
    ) -> Arc<Self> {
        log::debug!(
            "Resource '{}': {} elements, {:?}",
            name,
            payload.len(),
            indexing
        );
        Arc::new(Self {
            id: ctx.next_resource_id(),
            name: name.to_string(),
            indexing,
            frames_in_flight: ctx.frames_in_flight(),
            logical_count,
            state: Mutex::new(ResourceState {
                outbound_from: None,
                layouts: vec![ImageLayout::Undefined; payload.len()],
            }),
            payload: RwLock::new(payload),
        })
    }

    /// The payload elements for the given frame
    pub fn get(
        &self,
        frame: FrameCursor,
    ) -> Result<MappedRwLockReadGuard<'_, [T]>, SchedulerError> {
        let range = self.element_range(frame)?;
        Ok(RwLockReadGuard::map(self.payload.read(), |payload| {
            &payload[range]
        }))
    }

    /// Replace the payload (for example after a resize).
    ///
    /// The element count must not change. Tracked layouts reset to
    /// `Undefined`; the last writer is kept.
    pub fn replace(&self, payload: Vec<T>) -> Result<(), SchedulerError> {
        let mut current = self.payload.write();
        if payload.len() != current.len() {
            return Err(SchedulerError::InvalidResource {
                resource: self.name.clone(),
                reason: format!(
                    "replacement has {} elements, expected {}",
                    payload.len(),
                    current.len()
                ),
            });
        }
        *current = payload;
        self.state
            .lock()
            .layouts
            .iter_mut()
            .for_each(|layout| *layout = ImageLayout::Undefined);
        Ok(())
    }
}

impl<T> Resource<T> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexing(&self) -> ResourceIndexing {
        self.indexing
    }

    pub fn logical_count(&self) -> usize {
        self.logical_count
    }

    pub fn outbound_from(&self) -> Option<PassRef> {
        self.state.lock().outbound_from
    }

    pub fn set_outbound_from(&self, pass: PassRef) {
        self.state.lock().outbound_from = Some(pass);
    }

    /// Current tracked layout of a payload element
    pub fn layout(&self, element: usize) -> ImageLayout {
        self.state
            .lock()
            .layouts
            .get(element)
            .copied()
            .unwrap_or_default()
    }

    fn element_range(&self, frame: FrameCursor) -> Result<std::ops::Range<usize>, SchedulerError> {
        let len = self.payload.read().len();
        let start = match self.indexing {
            ResourceIndexing::FrameSlot => {
                if frame.frame_index >= self.frames_in_flight {
                    return Err(SchedulerError::InvalidFrameIndex {
                        frame_index: frame.frame_index,
                        frames_in_flight: self.frames_in_flight,
                    });
                }
                frame.frame_index * self.logical_count
            }
            ResourceIndexing::PresentTarget => {
                let target = frame.target_index.ok_or_else(|| SchedulerError::InvalidResource {
                    resource: self.name.clone(),
                    reason: "no presentable target acquired for this frame".to_string(),
                })?;
                target as usize
            }
        };
        let end = start + self.logical_count;
        if end > len {
            return Err(SchedulerError::InvalidResource {
                resource: self.name.clone(),
                reason: format!("elements {start}..{end} out of range ({len})"),
            });
        }
        Ok(start..end)
    }
}

/// Type-erased view of a resource used by dependencies and barrier
/// resolution
pub trait TrackedResource: Send + Sync {
    fn id(&self) -> ResourceId;

    fn name(&self) -> &str;

    fn outbound_from(&self) -> Option<PassRef>;

    fn set_outbound_from(&self, pass: PassRef);

    /// Elements of this frame that need barriers
    fn barrier_targets(&self, frame: FrameCursor) -> Result<Vec<TrackedTarget>, SchedulerError>;

    fn layout(&self, element: usize) -> ImageLayout;

    fn set_layout(&self, element: usize, layout: ImageLayout);
}

impl<T: ResourcePayload> TrackedResource for Resource<T> {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn outbound_from(&self) -> Option<PassRef> {
        Resource::outbound_from(self)
    }

    fn set_outbound_from(&self, pass: PassRef) {
        Resource::set_outbound_from(self, pass);
    }

    fn barrier_targets(&self, frame: FrameCursor) -> Result<Vec<TrackedTarget>, SchedulerError> {
        let range = self.element_range(frame)?;
        let payload = self.payload.read();
        Ok(range
            .filter_map(|element| {
                payload[element]
                    .barrier_target()
                    .map(|target| TrackedTarget { element, target })
            })
            .collect())
    }

    fn layout(&self, element: usize) -> ImageLayout {
        Resource::layout(self, element)
    }

    fn set_layout(&self, element: usize, layout: ImageLayout) {
        if let Some(slot) = self.state.lock().layouts.get_mut(element) {
            *slot = layout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;
    use crate::config::SchedulerConfig;

    fn context(frames_in_flight: usize) -> (Arc<HeadlessDevice>, GpuContext) {
        let device = Arc::new(HeadlessDevice::new());
        let config = SchedulerConfig {
            frames_in_flight,
            ..Default::default()
        };
        let ctx = GpuContext::new(device.clone(), config).unwrap();
        (device, ctx)
    }

    #[test]
    fn test_payload_must_cover_frames() {
        let (device, ctx) = context(2);
        let buffers = vec![device.create_buffer(16); 3];
        assert!(matches!(
            Resource::new(&ctx, "odd", buffers),
            Err(SchedulerError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_get_returns_slot_elements() {
        let (device, ctx) = context(2);
        let resource = Resource::from_fn(&ctx, "gbuffer", 2, |_, _| {
            Ok(device.create_texture(ImageAspect::Color, Extent2D::new(8, 8)))
        })
        .unwrap();
        assert_eq!(resource.logical_count(), 2);

        let slot0: Vec<Texture> = resource.get(FrameCursor::new(0)).unwrap().to_vec();
        let slot1: Vec<Texture> = resource.get(FrameCursor::new(1)).unwrap().to_vec();
        assert_eq!(slot0.len(), 2);
        assert_eq!(slot1.len(), 2);
        assert_ne!(slot0[0], slot1[0]);
        assert!(resource.get(FrameCursor::new(2)).is_err());
    }

    #[test]
    fn test_present_targets_use_target_index() {
        let (device, ctx) = context(2);
        let targets: Vec<Texture> = (0..3)
            .map(|_| device.create_texture(ImageAspect::Color, Extent2D::new(8, 8)))
            .collect();
        let resource = Resource::present_targets(&ctx, "swapchain", targets.clone()).unwrap();

        assert!(resource.get(FrameCursor::new(0)).is_err());
        let picked = resource.get(FrameCursor::with_target(0, 2)).unwrap()[0];
        assert_eq!(picked, targets[2]);
    }

    #[test]
    fn test_outbound_from_starts_empty() {
        let (device, ctx) = context(1);
        let resource = Resource::new(&ctx, "buffer", vec![device.create_buffer(4)]).unwrap();
        assert_eq!(resource.outbound_from(), None);

        let writer = PassRef {
            id: PassId(7),
            kind: PassKind::Compute,
        };
        resource.set_outbound_from(writer);
        assert_eq!(resource.outbound_from(), Some(writer));
    }

    #[test]
    fn test_replace_resets_layouts() {
        let (device, ctx) = context(1);
        let resource = Resource::new(
            &ctx,
            "color",
            vec![device.create_texture(ImageAspect::Color, Extent2D::new(4, 4))],
        )
        .unwrap();
        TrackedResource::set_layout(resource.as_ref(), 0, ImageLayout::General);
        assert_eq!(resource.layout(0), ImageLayout::General);

        resource
            .replace(vec![device.create_texture(ImageAspect::Color, Extent2D::new(8, 8))])
            .unwrap();
        assert_eq!(resource.layout(0), ImageLayout::Undefined);
        assert!(resource.replace(Vec::new()).is_err());
    }
}
