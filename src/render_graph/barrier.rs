//! Barrier resolution for a pass's dependencies.
//!
//! The resolver is a stateless strategy: given the pass, its dependencies and
//! the current frame it computes the transitions to record, using the access
//! policy table for the destination state and the kind of the resource's last
//! writer for the source state. Resolution also does the bookkeeping that
//! follows a barrier: element layouts are updated and write dependencies record
//! the pass as the resource's new writer.

use crate::backend::types::*;
use crate::error::SchedulerError;
use crate::render_graph::access::{writer_scope, AccessPolicy, AccessPolicyTable, AccessType};
use crate::render_graph::dependency::Dependency;
use crate::render_graph::resource::{FrameCursor, PassRef};

#[derive(Debug, Clone, Default)]
pub struct BarrierResolver {
    policy: AccessPolicyTable,
}

impl BarrierResolver {
    pub fn new(policy: AccessPolicyTable) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AccessPolicyTable {
        &self.policy
    }

    /// Check that every dependency's access mask has a policy.
    ///
    /// Depends only on the dependencies and the policy table, so a whole
    /// frame can be checked before any of it is recorded.
    pub fn validate(&self, pass_name: &str, dependencies: &[Dependency]) -> Result<(), SchedulerError> {
        for dependency in dependencies {
            self.destination(pass_name, dependency)?;
        }
        Ok(())
    }

    fn destination(
        &self,
        pass_name: &str,
        dependency: &Dependency,
    ) -> Result<(AccessType, AccessPolicy), SchedulerError> {
        self.policy
            .destination(dependency.access())
            .ok_or_else(|| SchedulerError::UnsupportedTransition {
                pass: pass_name.to_string(),
                dependency: dependency.name().to_string(),
                access: dependency.access(),
            })
    }

    /// Compute the transitions `pass` needs before touching its dependencies.
    ///
    /// Every dependency is validated before any state changes, so an
    /// unsupported access kind leaves all resources untouched.
    pub fn resolve(
        &self,
        pass: PassRef,
        pass_name: &str,
        dependencies: &[Dependency],
        frame: FrameCursor,
    ) -> Result<Vec<Transition>, SchedulerError> {
        let mut planned = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let (kind, policy) = self.destination(pass_name, dependency)?;
            let targets = dependency.resource().barrier_targets(frame)?;
            planned.push((dependency, kind, policy, targets));
        }

        let mut transitions = Vec::new();
        for (dependency, kind, policy, targets) in planned {
            let resource = dependency.resource();
            let writer = resource.outbound_from();

            for tracked in targets {
                let old_layout = resource.layout(tracked.element);
                // An image element still in Undefined was never written, even
                // if another slot's element of the same resource was.
                let written = match tracked.target {
                    BarrierTarget::Image { .. } if old_layout == ImageLayout::Undefined => None,
                    _ => writer.map(|w| w.kind),
                };
                let (src_stages, src_access) = writer_scope(written, &tracked.target);
                let new_layout = match tracked.target {
                    BarrierTarget::Image { .. } => policy.layout,
                    BarrierTarget::Buffer { .. } => ImageLayout::Undefined,
                };

                // Nothing to make visible and nothing to reinterpret.
                if old_layout == new_layout && writer.is_none() {
                    continue;
                }

                log::trace!(
                    "BarrierResolver: '{}' {} ({:?}) {:?} -> {:?}",
                    pass_name,
                    resource.name(),
                    kind,
                    old_layout,
                    new_layout
                );
                transitions.push(Transition {
                    target: tracked.target,
                    old_layout,
                    new_layout,
                    src_stages,
                    dst_stages: policy.stages,
                    src_access,
                    dst_access: policy.access,
                });
                resource.set_layout(tracked.element, new_layout);
            }

            if dependency.is_write() {
                resource.set_outbound_from(pass);
            }
        }

        Ok(transitions)
    }

    /// Transitions moving present dependencies into the present layout after
    /// the pass's own commands.
    ///
    /// Only dependencies that combine `PRESENT` with another kind need this:
    /// a dependency that is only `PRESENT` already reached the present layout
    /// in [`BarrierResolver::resolve`].
    pub fn release_for_present(
        &self,
        pass_name: &str,
        dependencies: &[Dependency],
        frame: FrameCursor,
    ) -> Result<Vec<Transition>, SchedulerError> {
        let Some(present) = self.policy.lookup(AccessType::PRESENT) else {
            return Ok(Vec::new());
        };

        let mut transitions = Vec::new();
        for dependency in dependencies {
            let access = dependency.access();
            if !access.contains(AccessType::PRESENT) || access == AccessType::PRESENT {
                continue;
            }
            let (kind, used) = self.destination(pass_name, dependency)?;

            let resource = dependency.resource();
            for tracked in resource.barrier_targets(frame)? {
                if !matches!(tracked.target, BarrierTarget::Image { .. }) {
                    continue;
                }
                let old_layout = resource.layout(tracked.element);
                if old_layout == present.layout {
                    continue;
                }
                log::trace!(
                    "BarrierResolver: '{}' releases {} ({:?}) for present",
                    pass_name,
                    resource.name(),
                    kind
                );
                transitions.push(Transition {
                    target: tracked.target,
                    old_layout,
                    new_layout: present.layout,
                    src_stages: used.stages,
                    dst_stages: present.stages,
                    src_access: used.access,
                    dst_access: present.access,
                });
                resource.set_layout(tracked.element, present.layout);
            }
        }

        Ok(transitions)
    }
}
