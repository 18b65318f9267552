//! Code Runner - sandboxed multi-language execution engine
//!
//! Takes untrusted source code, a language and a list of dependency tokens,
//! builds a throwaway container image for the submission and runs it once
//! under memory, process, network and wall-clock limits.

pub mod config;
pub mod context;
pub mod core;
pub mod deps;
pub mod engine;
pub mod sandbox;

pub use crate::config::{get_config, init_config, EngineConfig};
pub use crate::core::{
    CombinedOutput, EngineError, ExecutionResult, FaultClass, Language, RunStatus, RuntimeFault,
};
pub use crate::engine::Engine;
pub use crate::sandbox::{DockerRuntime, IsolationRuntime, Limits};
