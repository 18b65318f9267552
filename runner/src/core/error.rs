//! Engine error taxonomy
//!
//! A user program that runs and exits non-zero is not an error; it is an
//! [`ExecutionResult`](crate::core::ExecutionResult). Everything here aborts
//! the pipeline after the build context and sandbox have been torn down.

use std::time::Duration;
use thiserror::Error;

use crate::context::BuildStage;

/// Which side of the service a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Caused by the submission (client-error response)
    Client,
    /// Caused by the service itself (server-error response)
    Server,
}

/// Pipeline phase that exceeded its wall-clock budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Building the shared per-language base image
    BaseImage,
    /// Building the submission image
    Build,
    Run,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::BaseImage => write!(f, "base image"),
            TimeoutPhase::Build => write!(f, "build"),
            TimeoutPhase::Run => write!(f, "run"),
        }
    }
}

/// Infrastructure faults of the sandbox backend
#[derive(Debug, Error)]
pub enum RuntimeFault {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),
    #[error("sandbox API error: {0}")]
    Api(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Dependency `{token}` could not be resolved: {reason}")]
    DependencyResolutionFailed { token: String, reason: String },

    #[error("Failed to assemble build context: {0}")]
    AssemblyFailed(#[source] std::io::Error),

    #[error("Image build failed during {stage} stage")]
    BuildFailed { stage: BuildStage, logs: String },

    #[error("Program did not finish within {limit:?} ({phase} phase)")]
    Timeout { phase: TimeoutPhase, limit: Duration },

    #[error(transparent)]
    Runtime(#[from] RuntimeFault),
}

impl EngineError {
    pub fn dependency(token: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::DependencyResolutionFailed {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Classify the failure for the boundary layer
    ///
    /// Build stages that only run operator-controlled instructions (the base
    /// recipe, the context copy and configured assets) fail on the service
    /// side. Dependency installs fail on the submission side.
    pub fn class(&self) -> FaultClass {
        match self {
            EngineError::UnsupportedLanguage(_) | EngineError::DependencyResolutionFailed { .. } => {
                FaultClass::Client
            }
            EngineError::BuildFailed { stage, .. } => match stage {
                BuildStage::DependencyInstall | BuildStage::Compile => FaultClass::Client,
                BuildStage::Base | BuildStage::Context | BuildStage::Assets => FaultClass::Server,
            },
            EngineError::Timeout { phase, .. } => match phase {
                TimeoutPhase::Build | TimeoutPhase::Run => FaultClass::Client,
                TimeoutPhase::BaseImage => FaultClass::Server,
            },
            EngineError::AssemblyFailed(_) | EngineError::Runtime(_) => FaultClass::Server,
        }
    }

    /// Whether retrying the same submission may succeed
    pub fn is_retriable(&self) -> bool {
        self.class() == FaultClass::Server
    }

    /// User-facing message, including captured build logs where available
    pub fn user_message(&self) -> String {
        match self {
            EngineError::BuildFailed { stage, logs } if !logs.is_empty() => {
                format!("Image build failed during {} stage:\n{}", stage, logs)
            }
            EngineError::Timeout {
                phase: TimeoutPhase::BaseImage,
                ..
            } => "The sandbox image for this language is not ready yet, please retry".to_string(),
            EngineError::Timeout { limit, .. } => {
                format!("Your program did not finish within {} seconds", limit.as_secs())
            }
            other => other.to_string(),
        }
    }
}
