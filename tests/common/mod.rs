//! Shared fixtures for scheduler integration tests.
//!
//! Everything runs on the headless backend, which records commands,
//! submissions and presents and rejects waits on unsignaled semaphores.

#![allow(dead_code)]

use std::sync::Arc;

use frame_graph::backend::headless::SubmissionRecord;
use frame_graph::backend::types::*;
use frame_graph::{
    AccessType, Dependency, FrameScheduler, GpuContext, HeadlessDevice, HeadlessPresenter, Pass,
    PassDescriptor, PassId, RenderGraph, Resource, SchedulerConfig, Texture,
};

pub const TARGET_COUNT: usize = 3;
pub const EXTENT: Extent2D = Extent2D {
    width: 128,
    height: 72,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// Headless device, context and presenter targets for one test
pub struct TestContext {
    pub device: Arc<HeadlessDevice>,
    pub ctx: GpuContext,
    pub targets: Vec<Texture>,
    presenter: Option<HeadlessPresenter>,
}

impl TestContext {
    pub fn new(frames_in_flight: usize) -> Self {
        Self::with_config(SchedulerConfig::default().with_frames_in_flight(frames_in_flight))
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        init_logging();
        let device = Arc::new(HeadlessDevice::new());
        let ctx = GpuContext::new(device.clone(), config).expect("valid config");
        let presenter = HeadlessPresenter::new(device.clone(), TARGET_COUNT, EXTENT);
        let targets = presenter.targets().to_vec();
        Self {
            device,
            ctx,
            targets,
            presenter: Some(presenter),
        }
    }

    /// Scheduler presenting to this context's targets. Can be called once.
    pub fn scheduler(&mut self) -> FrameScheduler {
        let presenter = self.presenter.take().expect("scheduler already created");
        FrameScheduler::new(&self.ctx, Box::new(presenter)).expect("scheduler")
    }

    pub fn color_texture(&self, name: &str) -> Arc<Resource<Texture>> {
        Resource::from_fn(&self.ctx, name, 1, |_, _| {
            Ok(self.device.create_texture(ImageAspect::Color, EXTENT))
        })
        .expect("texture resource")
    }

    pub fn backbuffer(&self) -> Arc<Resource<Texture>> {
        Resource::present_targets(&self.ctx, "backbuffer", self.targets.clone())
            .expect("backbuffer resource")
    }

    pub fn compute_pass(&self, name: &str, dependencies: Vec<Dependency>) -> Pass {
        let mut pass = Pass::new(&self.ctx, PassDescriptor::compute(name)).expect("pass");
        pass.add_dependencies(dependencies).expect("dependencies");
        pass.set_execute_callback(|encoder| {
            encoder.resolve_barriers()?;
            encoder.dispatch(8, 8, 1)
        });
        pass
    }

    pub fn graphics_pass(&self, desc: PassDescriptor, dependencies: Vec<Dependency>) -> Pass {
        let mut pass = Pass::new(&self.ctx, desc).expect("pass");
        pass.add_dependencies(dependencies).expect("dependencies");
        pass.set_execute_callback(|encoder| {
            encoder.resolve_barriers()?;
            let target = RenderTarget {
                color: vec![ImageViewHandle::from_raw(u64::MAX)],
                depth: None,
                extent: EXTENT,
            };
            encoder.start_rendering(&target, Some(ClearValue::default()))?;
            encoder.draw_indexed(6, 1)?;
            encoder.end_rendering()
        });
        pass
    }

    pub fn submission<'a>(&self, submissions: &'a [SubmissionRecord], label: &str) -> &'a SubmissionRecord {
        submissions
            .iter()
            .find(|s| s.label == label)
            .unwrap_or_else(|| panic!("no submission labelled {label}"))
    }
}

// ============================================================================
// Scenario A
// ============================================================================

/// A compute pass writing a texture that a presenting graphics pass samples
pub struct ScenarioA {
    pub graph: RenderGraph,
    pub compute: PassId,
    pub graphics: PassId,
    pub texture: Arc<Resource<Texture>>,
    pub backbuffer: Arc<Resource<Texture>>,
}

impl ScenarioA {
    pub fn build(test: &TestContext) -> Self {
        let texture = test.color_texture("lighting");
        let backbuffer = test.backbuffer();

        let compute = test.compute_pass(
            "compute",
            vec![Dependency::new("lighting", &texture, AccessType::COMPUTE_SHADER_WRITE)],
        );
        let graphics = test.graphics_pass(
            PassDescriptor::graphics("graphics").presentable(),
            vec![
                Dependency::new("lighting", &texture, AccessType::FRAGMENT_SHADER_READ),
                Dependency::new(
                    "backbuffer",
                    &backbuffer,
                    AccessType::RENDER_TARGET_WRITE | AccessType::PRESENT,
                ),
            ],
        );

        let mut graph = RenderGraph::new(&test.ctx).expect("graph");
        let ids = graph.add_passes([compute, graphics]).expect("passes");
        graph.present(ids[1]).expect("present");

        Self {
            graph,
            compute: ids[0],
            graphics: ids[1],
            texture,
            backbuffer,
        }
    }
}
