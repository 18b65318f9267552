//! Submission results
//!
//! A program that finished, even unsuccessfully, is a result and not an
//! error. These types are what the boundary layer renders.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the sandboxed program finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Program ran and exited with the given code
    Exited(i64),
    /// Source failed to compile; the compiler's output is in stderr
    CompileError,
    /// Program was killed for exceeding the memory ceiling
    MemoryLimitExceeded,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Exited(code) => write!(f, "exited({})", code),
            RunStatus::CompileError => write!(f, "compile_error"),
            RunStatus::MemoryLimitExceeded => write!(f, "memory_limit_exceeded"),
        }
    }
}

/// Appended to combined output when a stream hit the capture limit
pub const TRUNCATION_NOTICE: &str = "\n[output truncated]\n";

/// Captured result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    pub status: RunStatus,
    /// At least one stream was cut at the output limit
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn exited(exit_code: i64, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            status: RunStatus::Exited(exit_code),
            truncated: false,
        }
    }

    /// Check if the program exited with code 0
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Exited(0))
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout followed by stderr, as the boundary layer renders it
    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout_lossy();
        combined.push_str(&self.stderr_lossy());
        if self.truncated {
            combined.push_str(TRUNCATION_NOTICE);
        }
        combined
    }
}

/// Boundary-facing form of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedOutput {
    pub combined_output: String,
    pub exit_code: i64,
}

impl From<&ExecutionResult> for CombinedOutput {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            combined_output: result.combined_output(),
            exit_code: result.exit_code,
        }
    }
}
