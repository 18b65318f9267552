//! Core types shared by every stage of the pipeline
//!
//! - Language registry and typed command templates
//! - Execution result model
//! - Engine error taxonomy

pub mod command;
pub mod error;
pub mod languages;
pub mod outcome;

pub use command::{to_exec_form, Arg, CommandSlots, CommandTemplate, Slot};
pub use error::{EngineError, FaultClass, RuntimeFault, TimeoutPhase};
pub use languages::{supported_languages, Language, LanguageSpec, SANDBOX_WORKDIR};
pub use outcome::{CombinedOutput, ExecutionResult, RunStatus};
