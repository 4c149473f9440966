//! Render Graph System
//!
//! Passes declare the resources they touch through dependencies; the graph
//! orders them so every read follows the write it depends on, and the barrier
//! resolver turns each dependency into the layout and access transitions the
//! GPU needs.

pub mod access;
pub mod barrier;
pub mod dependency;
pub mod graph;
pub mod pass;
pub mod resource;

pub use access::*;
pub use barrier::*;
pub use dependency::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
