//! Render graph structure tests: ordering, presenting pass rules, cycles and
//! culling.

mod common;

use rstest::rstest;

use common::{ScenarioA, TestContext};
use frame_graph::{
    AccessType, Dependency, GraphStructureError, PassDescriptor, PassId, RenderGraph,
    SchedulerError,
};

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_scenario_a_walk() {
    let test = TestContext::new(2);
    let scenario = ScenarioA::build(&test);
    let order = scenario.graph.walk(scenario.graphics).unwrap();
    assert_eq!(order, vec![scenario.compute, scenario.graphics]);
}

/// Registration order must not matter: every writer of a resource precedes
/// the passes reading it.
#[rstest]
#[case::in_order(&[0, 1, 2, 3])]
#[case::reversed(&[3, 2, 1, 0])]
#[case::shuffled(&[2, 0, 3, 1])]
fn test_writers_precede_readers(#[case] registration: &[usize]) {
    let test = TestContext::new(2);
    let depth = test.color_texture("depth");
    let ao = test.color_texture("ao");
    let backbuffer = test.backbuffer();

    let mut passes = vec![
        Some(test.compute_pass(
            "depth_prepass",
            vec![Dependency::new("depth", &depth, AccessType::COMPUTE_SHADER_WRITE)],
        )),
        Some(test.compute_pass(
            "ssao",
            vec![
                Dependency::new("depth", &depth, AccessType::COMPUTE_SHADER_READ),
                Dependency::new("ao", &ao, AccessType::COMPUTE_SHADER_WRITE),
            ],
        )),
        Some(test.compute_pass(
            "ao_debug",
            vec![Dependency::new("ao", &ao, AccessType::COMPUTE_SHADER_READ)],
        )),
        Some(test.graphics_pass(
            PassDescriptor::graphics("composite").presentable(),
            vec![
                Dependency::new("ao", &ao, AccessType::FRAGMENT_SHADER_READ),
                Dependency::new(
                    "backbuffer",
                    &backbuffer,
                    AccessType::RENDER_TARGET_WRITE | AccessType::PRESENT,
                ),
            ],
        )),
    ];

    let mut graph = RenderGraph::new(&test.ctx).unwrap();
    let mut ids: Vec<Option<PassId>> = vec![None; passes.len()];
    for &index in registration {
        let pass = passes[index].take().unwrap();
        ids[index] = Some(graph.add_pass(pass).unwrap());
    }
    let ids: Vec<PassId> = ids.into_iter().map(Option::unwrap).collect();
    graph.present(ids[3]).unwrap();

    let order = graph.walk(ids[3]).unwrap();
    let position = |id: PassId| order.iter().position(|p| *p == id);
    assert_eq!(order.last(), Some(&ids[3]));
    assert!(position(ids[0]).unwrap() < position(ids[1]).unwrap());
    assert!(position(ids[1]).unwrap() < position(ids[3]).unwrap());
}

// ============================================================================
// Presenting Pass
// ============================================================================

#[test]
fn test_present_requires_root_capable_pass() {
    let test = TestContext::new(2);
    let mut graph = RenderGraph::new(&test.ctx).unwrap();
    let plain = graph
        .add_pass(test.compute_pass("plain", Vec::new()))
        .unwrap();

    assert!(matches!(
        graph.present(plain),
        Err(SchedulerError::GraphStructure(GraphStructureError::NotRootCapable(ref name))) if name == "plain"
    ));
    assert_eq!(graph.terminal(), None);
}

#[test]
fn test_only_one_presenting_pass() {
    let test = TestContext::new(2);
    let mut scenario = ScenarioA::build(&test);
    let other = scenario
        .graph
        .add_pass(test.graphics_pass(PassDescriptor::graphics("overlay").presentable(), Vec::new()))
        .unwrap();

    assert!(matches!(
        scenario.graph.present(other),
        Err(SchedulerError::GraphStructure(GraphStructureError::TerminalAlreadySet(_)))
    ));
    assert_eq!(scenario.graph.terminal(), Some(scenario.graphics));
}

// ============================================================================
// Cycles and Culling
// ============================================================================

/// X reads what only Y writes and Y reads what only X writes
#[test]
fn test_scenario_b_cycle_is_rejected_before_submission() {
    let mut test = TestContext::new(2);
    let mut scheduler = test.scheduler();
    let from_x = test.color_texture("from_x");
    let from_y = test.color_texture("from_y");
    let backbuffer = test.backbuffer();

    let x = test.graphics_pass(
        PassDescriptor::graphics("x").presentable(),
        vec![
            Dependency::new("from_y", &from_y, AccessType::FRAGMENT_SHADER_READ),
            Dependency::new("from_x", &from_x, AccessType::RENDER_TARGET_WRITE),
            Dependency::new("backbuffer", &backbuffer, AccessType::PRESENT),
        ],
    );
    let y = test.compute_pass(
        "y",
        vec![
            Dependency::new("from_x", &from_x, AccessType::COMPUTE_SHADER_READ),
            Dependency::new("from_y", &from_y, AccessType::COMPUTE_SHADER_WRITE),
        ],
    );

    let mut graph = RenderGraph::new(&test.ctx).unwrap();
    let ids = graph.add_passes([x, y]).unwrap();
    graph.present(ids[0]).unwrap();

    match graph.walk(ids[0]) {
        Err(SchedulerError::GraphStructure(GraphStructureError::Cycle { passes })) => {
            let mut passes = passes;
            passes.sort();
            assert_eq!(passes, vec!["x".to_string(), "y".to_string()]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }

    assert!(matches!(
        scheduler.render(&mut graph),
        Err(SchedulerError::GraphStructure(GraphStructureError::Cycle { .. }))
    ));
    assert!(test.device.submissions().is_empty());
    assert_eq!(scheduler.frame_index(), 0);
}

#[test]
fn test_unreachable_passes_are_not_submitted() {
    let mut test = TestContext::new(2);
    let mut scheduler = test.scheduler();
    let mut scenario = ScenarioA::build(&test);
    let scratch = test.color_texture("scratch");
    scenario
        .graph
        .add_pass(test.compute_pass(
            "unused",
            vec![Dependency::new("scratch", &scratch, AccessType::COMPUTE_SHADER_WRITE)],
        ))
        .unwrap();

    let report = scheduler.render(&mut scenario.graph).unwrap();
    assert_eq!(report.pass_order, vec![scenario.compute, scenario.graphics]);
    assert!(test
        .device
        .submissions()
        .iter()
        .all(|s| !s.label.starts_with("unused")));
    assert_eq!(scratch.outbound_from(), None);
}

#[test]
fn test_walk_of_foreign_pass_fails() {
    let test = TestContext::new(2);
    let scenario = ScenarioA::build(&test);
    let mut other = RenderGraph::new(&test.ctx).unwrap();
    let foreign = other
        .add_pass(test.compute_pass("foreign", Vec::new()))
        .unwrap();

    assert!(matches!(
        scenario.graph.walk(foreign),
        Err(SchedulerError::GraphStructure(GraphStructureError::UnknownPass(_)))
    ));
}
