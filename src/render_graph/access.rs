//! Access kinds a dependency may declare and the policy mapping them to
//! layouts, stages and access masks

use crate::backend::types::*;
use crate::render_graph::pass::PassKind;
use bitflags::bitflags;

bitflags! {
    /// How a pass uses a resource.
    ///
    /// Flags are listed in resolution order: when several are set, barrier
    /// resolution honors the first one (see [`AccessType::primary`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessType: u32 {
        const RENDER_TARGET_READ = 1 << 0;
        const RENDER_TARGET_WRITE = 1 << 1;
        const RENDER_TARGET_DEPTH_WRITE = 1 << 2;
        const FRAGMENT_SHADER_READ = 1 << 3;
        const FRAGMENT_SHADER_WRITE = 1 << 4;
        const COMPUTE_SHADER_READ = 1 << 5;
        const COMPUTE_SHADER_READ_DEPTH = 1 << 6;
        const COMPUTE_SHADER_WRITE = 1 << 7;
        const PRESENT = 1 << 8;
    }
}

impl AccessType {
    /// Kinds that modify the resource
    pub const WRITES: Self = Self::RENDER_TARGET_WRITE
        .union(Self::RENDER_TARGET_DEPTH_WRITE)
        .union(Self::FRAGMENT_SHADER_WRITE)
        .union(Self::COMPUTE_SHADER_WRITE);

    /// The kind honored during barrier resolution
    pub fn primary(self) -> Option<AccessType> {
        self.iter().next()
    }

    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITES)
    }
}

/// Destination state for one access kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    pub layout: ImageLayout,
    pub stages: PipelineStages,
    pub access: AccessMask,
}

impl AccessPolicy {
    pub const fn new(layout: ImageLayout, stages: PipelineStages, access: AccessMask) -> Self {
        Self {
            layout,
            stages,
            access,
        }
    }
}

/// Pure mapping from access kind to destination state.
///
/// The standard table leaves `RENDER_TARGET_READ` and `FRAGMENT_SHADER_WRITE`
/// unmapped: resolving them fails with an unsupported-transition error unless
/// an application registers a policy with [`AccessPolicyTable::with_policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicyTable {
    entries: Vec<(AccessType, AccessPolicy)>,
}

impl AccessPolicyTable {
    /// A table with no mappings
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn standard() -> Self {
        Self::empty()
            .with_policy(
                AccessType::RENDER_TARGET_WRITE,
                AccessPolicy::new(
                    ImageLayout::ColorAttachment,
                    PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                    AccessMask::COLOR_ATTACHMENT_WRITE,
                ),
            )
            .with_policy(
                AccessType::RENDER_TARGET_DEPTH_WRITE,
                AccessPolicy::new(
                    ImageLayout::DepthAttachment,
                    PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
                    AccessMask::DEPTH_STENCIL_ATTACHMENT_READ
                        | AccessMask::DEPTH_STENCIL_ATTACHMENT_WRITE,
                ),
            )
            .with_policy(
                AccessType::FRAGMENT_SHADER_READ,
                AccessPolicy::new(
                    ImageLayout::ShaderReadOnly,
                    PipelineStages::FRAGMENT_SHADER,
                    AccessMask::SHADER_READ,
                ),
            )
            .with_policy(
                AccessType::COMPUTE_SHADER_READ,
                AccessPolicy::new(
                    ImageLayout::ShaderReadOnly,
                    PipelineStages::COMPUTE_SHADER,
                    AccessMask::SHADER_READ,
                ),
            )
            .with_policy(
                AccessType::COMPUTE_SHADER_READ_DEPTH,
                AccessPolicy::new(
                    ImageLayout::DepthReadOnly,
                    PipelineStages::COMPUTE_SHADER,
                    AccessMask::SHADER_READ,
                ),
            )
            .with_policy(
                AccessType::COMPUTE_SHADER_WRITE,
                AccessPolicy::new(
                    ImageLayout::General,
                    PipelineStages::COMPUTE_SHADER,
                    AccessMask::SHADER_WRITE,
                ),
            )
            .with_policy(
                AccessType::PRESENT,
                AccessPolicy::new(
                    ImageLayout::PresentSrc,
                    PipelineStages::BOTTOM_OF_PIPE,
                    AccessMask::empty(),
                ),
            )
    }

    /// Add or replace the policy for a single access kind.
    ///
    /// `kind` must be exactly one flag; combined flags are ignored with a
    /// warning.
    pub fn with_policy(mut self, kind: AccessType, policy: AccessPolicy) -> Self {
        if kind.bits().count_ones() != 1 {
            log::warn!("AccessPolicyTable: ignoring policy for combined access {kind:?}");
            return self;
        }
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = policy,
            None => self.entries.push((kind, policy)),
        }
        self
    }

    pub fn lookup(&self, kind: AccessType) -> Option<AccessPolicy> {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, policy)| *policy)
    }

    /// First-match resolution: the primary kind of `access` and its policy.
    ///
    /// Returns `None` when the mask is empty or its primary kind is unmapped.
    pub fn destination(&self, access: AccessType) -> Option<(AccessType, AccessPolicy)> {
        let primary = access.primary()?;
        self.lookup(primary).map(|policy| (primary, policy))
    }
}

impl Default for AccessPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Source stages and access of the pass that last wrote a resource.
///
/// With no prior writer there is nothing to make visible, so the scope is
/// top-of-pipe with no access.
pub fn writer_scope(
    writer: Option<PassKind>,
    target: &BarrierTarget,
) -> (PipelineStages, AccessMask) {
    match (writer, target) {
        (None, _) => (PipelineStages::TOP_OF_PIPE, AccessMask::empty()),
        (Some(PassKind::Compute), _) => (PipelineStages::COMPUTE_SHADER, AccessMask::SHADER_WRITE),
        (Some(PassKind::Graphics), BarrierTarget::Image { aspect, .. }) if aspect.is_depth() => (
            PipelineStages::LATE_FRAGMENT_TESTS,
            AccessMask::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (Some(PassKind::Graphics), BarrierTarget::Image { .. }) => (
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            AccessMask::COLOR_ATTACHMENT_WRITE,
        ),
        (Some(PassKind::Graphics), BarrierTarget::Buffer { .. }) => {
            (PipelineStages::FRAGMENT_SHADER, AccessMask::SHADER_WRITE)
        }
    }
}
