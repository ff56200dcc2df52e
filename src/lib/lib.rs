#![warn(missing_docs)]

//! Shader node-graph compiler: turns a graph of GLSL-producing nodes into
//! per-stage shader source, by parsing each node's program, mangling its
//! identifiers into a private namespace, grafting upstream nodes' code into
//! strategy-discovered splice points, and merging everyone's declaration
//! sections into one deduplicated program.

pub mod compile;
pub mod context;
pub mod engine;
pub mod glsl;
pub mod graph;
pub mod mangle;
pub mod nodelib;
pub mod sections;
pub mod strategy;

pub use compile::{compile, compile_stage, StagePrograms};
pub use engine::{Engine, TextCache};
pub use graph::{Edge, Graph, IdGenerator, Node, NodeId, Stage};
pub use sections::{MergeOptions, ShaderSections};
