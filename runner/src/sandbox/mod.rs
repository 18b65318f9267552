//! Sandbox module - Isolation runtime
//!
//! Turns an assembled [`BuildContext`] into an image, runs it once in a
//! resource-bounded container and captures the output. It handles:
//! - Base image caching per language (`images`)
//! - Submission image builds with stage attribution (`builder`)
//! - Container run with memory, process, network and wall-clock limits
//! - Unconditional teardown of the container and image (`handle`)
//!
//! The sandbox module does NOT:
//! - Resolve dependencies or write build contexts
//! - Merge output for the boundary layer

pub mod archive;
pub mod builder;
pub mod docker;
pub mod handle;
pub mod images;

use async_trait::async_trait;
use std::time::Duration;

use crate::context::BuildContext;
use crate::core::{EngineError, ExecutionResult};

// Re-exports for convenience
pub use builder::{BuildLog, BuildOutcome};
pub use docker::{client, DockerRuntime};
pub use handle::IsolationHandle;
pub use images::{
    build_base_images, clean_base_images, ensure_base_image, list_base_images, BaseImageInfo,
    BaseImageStatus,
};

/// Resource limits of one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Memory ceiling in bytes (swap included)
    pub memory_bytes: u64,
    /// Wall-clock limit of the run
    pub wall_clock: Duration,
    /// Wall-clock limit of the image build
    pub build_timeout: Duration,
    pub network_enabled: bool,
    /// Maximum number of processes
    pub pids_limit: i64,
    /// Bytes captured per output stream
    pub output_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_bytes: 128 * 1024 * 1024,
            wall_clock: Duration::from_secs(30),
            build_timeout: Duration::from_secs(300),
            network_enabled: false,
            pids_limit: 64,
            output_limit: 1024 * 1024,
        }
    }
}

/// Backend that builds and runs one assembled submission
#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    /// Whether submission recipes should start FROM the cached base image
    fn layered(&self) -> bool {
        false
    }

    /// Build, run and tear down the sandbox for `context`
    async fn execute(
        &self,
        context: &BuildContext,
        limits: &Limits,
    ) -> Result<ExecutionResult, EngineError>;
}
