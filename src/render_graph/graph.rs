//! Render graph definition and ordering

use std::collections::{BTreeSet, HashMap};

use crate::arena::ArenaNode;
use crate::context::GpuContext;
use crate::error::{GraphStructureError, SchedulerError};
use crate::render_graph::pass::*;
use crate::render_graph::resource::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Passes in registration order plus the one pass that presents
#[derive(Debug)]
pub struct RenderGraph {
    ctx: GpuContext,
    owner: ArenaNode,
    passes: Vec<Pass>,
    terminal: Option<PassId>,
}

impl RenderGraph {
    pub fn new(ctx: &GpuContext) -> Result<Self, SchedulerError> {
        Ok(Self {
            ctx: ctx.clone(),
            owner: ctx.create_owner(None, "render_graph")?,
            passes: Vec::new(),
            terminal: None,
        })
    }

    /// Register a pass; its GPU objects are now owned by the graph
    pub fn add_pass(&mut self, pass: Pass) -> Result<PassId, SchedulerError> {
        if !self.ctx.same_context(pass.context()) {
            return Err(SchedulerError::InvalidPassOperation {
                pass: pass.name().to_string(),
                reason: "pass was created with a different GpuContext".to_string(),
            });
        }
        if self.position(pass.id()).is_some() {
            return Err(SchedulerError::InvalidPassOperation {
                pass: pass.name().to_string(),
                reason: "pass is already part of this render graph".to_string(),
            });
        }
        self.ctx.reparent(pass.owner(), self.owner)?;
        let id = pass.id();
        log::debug!("RenderGraph: added pass '{}'", pass.name());
        self.passes.push(pass);
        Ok(id)
    }

    pub fn add_passes(
        &mut self,
        passes: impl IntoIterator<Item = Pass>,
    ) -> Result<Vec<PassId>, SchedulerError> {
        passes.into_iter().map(|pass| self.add_pass(pass)).collect()
    }

    /// Mark `id` as the presenting pass.
    ///
    /// Marking the current terminal again is a no-op.
    pub fn present(&mut self, id: PassId) -> Result<(), SchedulerError> {
        let pass = self
            .pass(id)
            .ok_or(GraphStructureError::UnknownPass(id.index()))?;
        if !pass.is_root_capable() {
            return Err(GraphStructureError::NotRootCapable(pass.name().to_string()).into());
        }
        match self.terminal {
            Some(current) if current == id => Ok(()),
            Some(current) => {
                let name = self.pass(current).map_or("?", Pass::name);
                Err(GraphStructureError::TerminalAlreadySet(name.to_string()).into())
            }
            None => {
                log::debug!("RenderGraph: '{}' presents", pass.name());
                self.terminal = Some(id);
                Ok(())
            }
        }
    }

    pub fn terminal(&self) -> Option<PassId> {
        self.terminal
    }

    pub fn pass(&self, id: PassId) -> Option<&Pass> {
        self.passes.iter().find(|pass| pass.id() == id)
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut Pass> {
        self.passes.iter_mut().find(|pass| pass.id() == id)
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Execution order ending at `target`.
    ///
    /// A pass's producers are, per dependency, the last pass registered
    /// before it that writes the same resource. Reads with no earlier writer
    /// fall back to the last writer registered after it. Writes additionally
    /// follow the reads of the previous write. Passes `target` does not
    /// transitively depend on are culled. Any cycle in the graph, reachable
    /// from `target` or not, is an error.
    pub fn walk(&self, target: PassId) -> Result<Vec<PassId>, SchedulerError> {
        let target_index = self
            .position(target)
            .ok_or(GraphStructureError::UnknownPass(target.index()))?;

        let producers = self.producers();
        self.detect_cycle(&producers)?;

        let mut visited = vec![false; self.passes.len()];
        let mut order = Vec::with_capacity(self.passes.len());
        Self::visit(target_index, &producers, &mut visited, &mut order);

        if order.len() < self.passes.len() {
            let culled: Vec<&str> = self
                .passes
                .iter()
                .enumerate()
                .filter(|(index, _)| !visited[*index])
                .map(|(_, pass)| pass.name())
                .collect();
            log::warn!(
                "RenderGraph: culling passes unreachable from '{}': {:?}",
                self.passes[target_index].name(),
                culled
            );
        }

        Ok(order.into_iter().map(|index| self.passes[index].id()).collect())
    }

    /// Record that `frame_index`'s submissions have completed
    pub(crate) fn mark_frame_finished(&mut self, frame_index: usize) {
        for pass in &mut self.passes {
            pass.mark_finished(frame_index);
        }
    }

    /// Dispose every pass's GPU objects.
    ///
    /// The caller must make sure no submission is still pending.
    pub fn dispose(self) -> Result<(), SchedulerError> {
        log::info!("RenderGraph: disposing {} passes", self.passes.len());
        self.ctx.dispose(self.owner)
    }

    fn position(&self, id: PassId) -> Option<usize> {
        self.passes.iter().position(|pass| pass.id() == id)
    }

    fn producers(&self) -> Vec<BTreeSet<usize>> {
        // Per resource, every (pass index, is_write) access in registration order
        let mut accesses: HashMap<ResourceId, Vec<(usize, bool)>> = HashMap::new();
        for (index, pass) in self.passes.iter().enumerate() {
            for dependency in pass.dependencies() {
                accesses
                    .entry(dependency.resource_id())
                    .or_default()
                    .push((index, dependency.is_write()));
            }
        }

        let mut producers = vec![BTreeSet::new(); self.passes.len()];
        for (consumer, pass) in self.passes.iter().enumerate() {
            for dependency in pass.dependencies() {
                let Some(uses) = accesses.get(&dependency.resource_id()) else {
                    continue;
                };
                let earlier: Vec<(usize, bool)> = uses
                    .iter()
                    .copied()
                    .filter(|(index, _)| *index < consumer)
                    .collect();
                let last_writer = earlier
                    .iter()
                    .filter(|(_, write)| *write)
                    .map(|(index, _)| *index)
                    .last();

                match last_writer {
                    Some(writer) => {
                        producers[consumer].insert(writer);
                    }
                    None if !dependency.is_write() => {
                        if let Some(writer) = uses
                            .iter()
                            .filter(|(index, write)| *write && *index != consumer)
                            .map(|(index, _)| *index)
                            .last()
                        {
                            producers[consumer].insert(writer);
                        }
                    }
                    None => {}
                }

                if dependency.is_write() {
                    let readers = earlier
                        .iter()
                        .filter(|(index, write)| !*write && last_writer.is_some_and(|w| *index > w))
                        .map(|(index, _)| *index);
                    producers[consumer].extend(readers);
                }
            }
            producers[consumer].remove(&consumer);
        }
        producers
    }

    fn detect_cycle(&self, producers: &[BTreeSet<usize>]) -> Result<(), SchedulerError> {
        let mut marks = vec![Mark::Unvisited; self.passes.len()];
        let mut stack = Vec::new();
        for start in 0..self.passes.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(cycle) = Self::find_cycle(start, producers, &mut marks, &mut stack) {
                    let passes: Vec<String> = cycle
                        .into_iter()
                        .map(|index| self.passes[index].name().to_string())
                        .collect();
                    log::error!("RenderGraph: dependency cycle {passes:?}");
                    return Err(GraphStructureError::Cycle { passes }.into());
                }
            }
        }
        Ok(())
    }

    fn find_cycle(
        node: usize,
        producers: &[BTreeSet<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        stack.push(node);
        for &producer in &producers[node] {
            match marks[producer] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&index| index == producer)?;
                    let mut cycle = stack[start..].to_vec();
                    // Stack runs consumer -> producer; report in execution order
                    cycle.reverse();
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = Self::find_cycle(producer, producers, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    fn visit(
        node: usize,
        producers: &[BTreeSet<usize>],
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        visited[node] = true;
        for &producer in &producers[node] {
            if !visited[producer] {
                Self::visit(producer, producers, visited, order);
            }
        }
        order.push(node);
    }
}
