//! Declared edges between passes and resources

use std::fmt;
use std::sync::Arc;

use crate::render_graph::access::AccessType;
use crate::render_graph::resource::{Resource, ResourceId, ResourcePayload, TrackedResource};

/// A named {resource, access} edge declared by a pass.
///
/// Immutable once created; cloning shares the underlying resource.
#[derive(Clone)]
pub struct Dependency {
    name: String,
    resource: Arc<dyn TrackedResource>,
    access: AccessType,
}

impl Dependency {
    pub fn new<T: ResourcePayload>(
        name: &str,
        resource: &Arc<Resource<T>>,
        access: AccessType,
    ) -> Self {
        Self {
            name: name.to_string(),
            resource: resource.clone(),
            access,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &Arc<dyn TrackedResource> {
        &self.resource
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource.id()
    }

    pub fn access(&self) -> AccessType {
        self.access
    }

    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("resource", &self.resource.name())
            .field("access", &self.access)
            .finish()
    }
}
