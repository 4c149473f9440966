//! Hierarchical ownership of GPU-backed objects.
//!
//! Every object created through a [`crate::GpuContext`] is registered under an
//! owner node. Disposing a node disposes its children first, newest child
//! first, and then the node's own objects in reverse registration order.

use std::fmt;

use slotmap::{new_key_type, SlotMap};

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::error::SchedulerError;

new_key_type! {
    /// Key of a node in the [`OwnershipArena`]
    pub struct ArenaNode;
}

/// Callback disposing an object the device does not know how to destroy
pub type DisposeFn = Box<dyn FnOnce(&dyn GpuDevice) + Send>;

/// An object owned by an arena node
pub enum GpuObject {
    CommandContext(CommandContextHandle),
    Semaphore(SemaphoreHandle),
    Fence(FenceHandle),
    /// Application-created object (images, buffers, pipelines)
    External { label: String, dispose: DisposeFn },
}

impl GpuObject {
    pub fn external(label: &str, dispose: impl FnOnce(&dyn GpuDevice) + Send + 'static) -> Self {
        Self::External {
            label: label.to_string(),
            dispose: Box::new(dispose),
        }
    }

    fn dispose(self, device: &dyn GpuDevice) {
        match self {
            Self::CommandContext(handle) => device.destroy_command_context(handle),
            Self::Semaphore(handle) => device.destroy_semaphore(handle),
            Self::Fence(handle) => device.destroy_fence(handle),
            Self::External { label, dispose } => {
                log::trace!("OwnershipArena: disposing external object '{label}'");
                dispose(device)
            }
        }
    }
}

impl fmt::Debug for GpuObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandContext(handle) => f.debug_tuple("CommandContext").field(handle).finish(),
            Self::Semaphore(handle) => f.debug_tuple("Semaphore").field(handle).finish(),
            Self::Fence(handle) => f.debug_tuple("Fence").field(handle).finish(),
            Self::External { label, .. } => f.debug_struct("External").field("label", label).finish(),
        }
    }
}

#[derive(Debug)]
struct NodeData {
    label: String,
    parent: Option<ArenaNode>,
    children: Vec<ArenaNode>,
    objects: Vec<GpuObject>,
}

/// Tree of owner nodes, rooted at a node that lives as long as the arena
#[derive(Debug)]
pub struct OwnershipArena {
    nodes: SlotMap<ArenaNode, NodeData>,
    root: ArenaNode,
}

impl Default for OwnershipArena {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipArena {
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(NodeData {
            label: "root".to_string(),
            parent: None,
            children: Vec::new(),
            objects: Vec::new(),
        });
        Self { nodes, root }
    }

    pub fn root(&self) -> ArenaNode {
        self.root
    }

    pub fn contains(&self, node: ArenaNode) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn label(&self, node: ArenaNode) -> Option<&str> {
        self.nodes.get(node).map(|data| data.label.as_str())
    }

    pub fn parent(&self, node: ArenaNode) -> Option<ArenaNode> {
        self.nodes.get(node).and_then(|data| data.parent)
    }

    /// Children in creation order
    pub fn children(&self, node: ArenaNode) -> &[ArenaNode] {
        self.nodes
            .get(node)
            .map(|data| data.children.as_slice())
            .unwrap_or_default()
    }

    pub fn object_count(&self, node: ArenaNode) -> usize {
        self.nodes.get(node).map_or(0, |data| data.objects.len())
    }

    pub fn create_node(&mut self, parent: ArenaNode, label: &str) -> Result<ArenaNode, SchedulerError> {
        if !self.nodes.contains_key(parent) {
            return Err(SchedulerError::Arena(parent));
        }
        let node = self.nodes.insert(NodeData {
            label: label.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            objects: Vec::new(),
        });
        self.nodes[parent].children.push(node);
        Ok(node)
    }

    pub fn register(&mut self, node: ArenaNode, object: GpuObject) -> Result<(), SchedulerError> {
        let data = self.nodes.get_mut(node).ok_or(SchedulerError::Arena(node))?;
        data.objects.push(object);
        Ok(())
    }

    /// Move `node` under `new_parent`, making it the newest child there.
    ///
    /// Moving a node under itself or one of its descendants is rejected.
    pub fn reparent(&mut self, node: ArenaNode, new_parent: ArenaNode) -> Result<(), SchedulerError> {
        if node == self.root || !self.nodes.contains_key(node) {
            return Err(SchedulerError::Arena(node));
        }
        if !self.nodes.contains_key(new_parent) {
            return Err(SchedulerError::Arena(new_parent));
        }
        let mut ancestor = Some(new_parent);
        while let Some(current) = ancestor {
            if current == node {
                return Err(SchedulerError::Arena(new_parent));
            }
            ancestor = self.nodes[current].parent;
        }

        if let Some(old_parent) = self.nodes[node].parent {
            self.nodes[old_parent].children.retain(|&child| child != node);
        }
        self.nodes[new_parent].children.push(node);
        self.nodes[node].parent = Some(new_parent);
        Ok(())
    }

    /// Dispose `node`, its descendants and every object they own.
    ///
    /// Disposing the root releases everything but keeps the root itself so
    /// the arena stays usable.
    pub fn dispose(&mut self, node: ArenaNode, device: &dyn GpuDevice) -> Result<(), SchedulerError> {
        if !self.nodes.contains_key(node) {
            return Err(SchedulerError::Arena(node));
        }
        if let Some(parent) = self.nodes[node].parent {
            self.nodes[parent].children.retain(|&child| child != node);
        }
        self.dispose_subtree(node, device);
        Ok(())
    }

    fn dispose_subtree(&mut self, node: ArenaNode, device: &dyn GpuDevice) {
        let children = std::mem::take(&mut self.nodes[node].children);
        for child in children.into_iter().rev() {
            self.dispose_subtree(child, device);
        }

        let objects = std::mem::take(&mut self.nodes[node].objects);
        log::debug!(
            "OwnershipArena: disposing '{}' ({} objects)",
            self.nodes[node].label,
            objects.len()
        );
        for object in objects.into_iter().rev() {
            object.dispose(device);
        }

        if node != self.root {
            self.nodes.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, ObjectKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispose_children_in_reverse_creation_order() {
        let device = HeadlessDevice::new();
        let mut arena = OwnershipArena::new();
        let parent = arena.create_node(arena.root(), "parent").unwrap();
        for label in ["first", "second", "third"] {
            let child = arena.create_node(parent, label).unwrap();
            let semaphore = device.create_semaphore(label).unwrap();
            arena.register(child, GpuObject::Semaphore(semaphore)).unwrap();
        }
        let fence = device.create_fence(true, "parent-fence").unwrap();
        arena.register(parent, GpuObject::Fence(fence)).unwrap();

        arena.dispose(parent, &device).unwrap();

        let labels: Vec<String> = device.destroyed().into_iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["third", "second", "first", "parent-fence"]);
        assert!(!arena.contains(parent));
        assert!(arena.children(arena.root()).is_empty());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_objects_dispose_in_reverse_registration_order() {
        let device = HeadlessDevice::new();
        let mut arena = OwnershipArena::new();
        let node = arena.create_node(arena.root(), "pass").unwrap();
        let context = device
            .create_command_context(QueueKind::Graphics, "ctx")
            .unwrap();
        let semaphore = device.create_semaphore("sem").unwrap();
        arena.register(node, GpuObject::CommandContext(context)).unwrap();
        arena.register(node, GpuObject::Semaphore(semaphore)).unwrap();

        arena.dispose(node, &device).unwrap();
        let kinds: Vec<ObjectKind> = device.destroyed().into_iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![ObjectKind::Semaphore, ObjectKind::CommandContext]);
    }

    #[test]
    fn test_external_objects_and_root_survives() {
        let device = HeadlessDevice::new();
        let mut arena = OwnershipArena::new();
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        arena
            .register(
                arena.root(),
                GpuObject::external("texture", move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        arena.dispose(arena.root(), &device).unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(arena.contains(arena.root()));
        assert_eq!(arena.object_count(arena.root()), 0);
    }

    #[test]
    fn test_reparent() {
        let mut arena = OwnershipArena::new();
        let graph = arena.create_node(arena.root(), "graph").unwrap();
        let pass = arena.create_node(arena.root(), "pass").unwrap();

        arena.reparent(pass, graph).unwrap();
        assert_eq!(arena.parent(pass), Some(graph));
        assert_eq!(arena.children(arena.root()), &[graph]);
        assert_eq!(arena.children(graph), &[pass]);

        assert!(arena.reparent(graph, pass).is_err());
        assert!(arena.reparent(arena.root(), graph).is_err());
    }

    #[test]
    fn test_unknown_node_is_an_error() {
        let device = HeadlessDevice::new();
        let mut arena = OwnershipArena::new();
        let node = arena.create_node(arena.root(), "gone").unwrap();
        arena.dispose(node, &device).unwrap();
        assert!(matches!(arena.dispose(node, &device), Err(SchedulerError::Arena(_))));
        assert!(arena.create_node(node, "orphan").is_err());
    }
}
