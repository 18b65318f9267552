//! Execution engine
//!
//! Public entry point. One call drives a submission through
//! lookup -> resolve -> assemble -> isolate and returns either the captured
//! result of the program or the first error. The build context is removed
//! before `execute` returns, whatever the outcome.

use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::config::EngineConfig;
use crate::context::assemble;
use crate::core::{CombinedOutput, EngineError, ExecutionResult, Language};
use crate::deps::DependencyResolver;
use crate::sandbox::{DockerRuntime, IsolationRuntime};

/// Sandboxed multi-language execution engine
pub struct Engine<R: IsolationRuntime> {
    config: EngineConfig,
    resolver: DependencyResolver,
    runtime: R,
}

impl Engine<DockerRuntime> {
    /// Engine backed by the local Docker daemon
    pub fn docker(config: EngineConfig) -> Self {
        let runtime = DockerRuntime::new(config.base_image_cache);
        Self::new(config, runtime)
    }
}

impl<R: IsolationRuntime> Engine<R> {
    pub fn new(config: EngineConfig, runtime: R) -> Self {
        let resolver = match &config.dependency_root {
            Some(root) => DependencyResolver::new(root.clone()),
            None => DependencyResolver::from_current_dir(),
        };
        Self {
            config,
            resolver,
            runtime,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Run `code` written in `language` with the given dependency tokens.
    ///
    /// A program that exits non-zero, fails to compile or runs out of memory
    /// is still `Ok`; `Err` means the submission never produced a result.
    pub async fn execute(
        &self,
        language: &str,
        code: &[u8],
        deps: &[String],
    ) -> Result<ExecutionResult, EngineError> {
        let span = info_span!("submission", language = %language, submission_id = field::Empty);
        self.run(language, code, deps).instrument(span).await
    }

    /// [`execute`](Self::execute) with stdout and stderr merged for display
    pub async fn execute_combined(
        &self,
        language: &str,
        code: &[u8],
        deps: &[String],
    ) -> Result<CombinedOutput, EngineError> {
        let result = self.execute(language, code, deps).await?;
        Ok(CombinedOutput::from(&result))
    }

    async fn run(
        &self,
        language: &str,
        code: &[u8],
        deps: &[String],
    ) -> Result<ExecutionResult, EngineError> {
        let language = Language::lookup(language).inspect_err(|e| warn!("Rejected submission: {}", e))?;
        let manifest = self.resolver.resolve(deps, language)?;

        let options = self.config.assembly_options(language, self.runtime.layered());
        let context = assemble(language, code, &manifest, &options)?;
        Span::current().record("submission_id", context.id());

        let result = self.runtime.execute(&context, &self.config.limits()).await;
        context.close();

        match &result {
            Ok(r) => info!("Submission finished with {}", r.status),
            Err(e) => warn!("Submission failed: {}", e),
        }
        result
    }
}
