//! Scheduler error types.

use thiserror::Error;

use crate::arena::ArenaNode;
use crate::backend::traits::BackendError;
use crate::render_graph::access::AccessType;
use crate::render_graph::pass::PassState;

/// Errors in how passes are wired into a render graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphStructureError {
    #[error("Pass '{0}' cannot be presented: it was not created as presentable")]
    NotRootCapable(String),
    #[error("Render graph already presents pass '{0}'")]
    TerminalAlreadySet(String),
    #[error("Render graph has no presenting pass")]
    NoPresentingPass,
    #[error("Pass {0} is not part of this render graph")]
    UnknownPass(u32),
    #[error("Render graph contains a cycle through passes {passes:?}")]
    Cycle { passes: Vec<String> },
}

/// Errors returned by scheduling operations.
///
/// Nothing retries. Any of these during [`crate::FrameScheduler::render`]
/// means the frame was abandoned and the application should stop rendering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    GraphStructure(#[from] GraphStructureError),
    #[error("Pass '{pass}': no barrier policy for dependency '{dependency}' ({access:?})")]
    UnsupportedTransition {
        pass: String,
        dependency: String,
        access: AccessType,
    },
    #[error("Pass '{pass}' is {actual:?}, expected {expected}")]
    InvalidPassState {
        pass: String,
        actual: PassState,
        expected: &'static str,
    },
    #[error("Pass '{pass}': {reason}")]
    InvalidPassOperation { pass: String, reason: String },
    #[error("Pass '{0}' issued GPU work before resolving its barriers")]
    BarriersNotResolved(String),
    #[error("Timed out waiting for {0}")]
    WaitTimedOut(String),
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    #[error("Resource '{resource}': {reason}")]
    InvalidResource { resource: String, reason: String },
    #[error("Frame index {frame_index} out of range for {frames_in_flight} frames in flight")]
    InvalidFrameIndex {
        frame_index: usize,
        frames_in_flight: usize,
    },
    #[error("Unknown ownership node {0:?}")]
    Arena(ArenaNode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::from(GraphStructureError::Cycle {
            passes: vec!["a".into(), "b".into()],
        });
        assert_eq!(
            err.to_string(),
            "Render graph contains a cycle through passes [\"a\", \"b\"]"
        );

        let err = SchedulerError::from(BackendError::DeviceLost);
        assert_eq!(err.to_string(), "Device lost");

        let err = SchedulerError::InvalidFrameIndex {
            frame_index: 3,
            frames_in_flight: 2,
        };
        assert_eq!(
            err.to_string(),
            "Frame index 3 out of range for 2 frames in flight"
        );
    }
}
