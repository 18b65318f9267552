//! Docker isolation runtime
//!
//! Per submission state machine:
//! `ImageResolving -> ImageBuilding -> ContainerRunning -> OutputCaptured -> Torndown`
//!
//! A failure at any point jumps straight to `Torndown`; the container and the
//! submission image are removed on every path.

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::context::{BuildContext, BuildStage};
use crate::core::{
    EngineError, ExecutionResult, Language, RunStatus, RuntimeFault, TimeoutPhase, SANDBOX_WORKDIR,
};
use crate::sandbox::builder::{build_image, BuildOutcome};
use crate::sandbox::handle::IsolationHandle;
use crate::sandbox::{archive, images, IsolationRuntime, Limits};

/// Process-wide Docker client
static DOCKER: OnceCell<Docker> = OnceCell::const_new();

/// Get the Docker client, connecting and pinging the daemon on first use
pub async fn client() -> Result<&'static Docker, EngineError> {
    DOCKER
        .get_or_try_init(|| async {
            let docker = Docker::connect_with_local_defaults()
                .map_err(|e| RuntimeFault::Unavailable(e.to_string()))?;
            docker
                .ping()
                .await
                .map_err(|e| RuntimeFault::Unavailable(e.to_string()))?;
            info!("Connected to Docker daemon");
            Ok(docker)
        })
        .await
}

/// Map a Docker API error to an infrastructure fault
pub(crate) fn runtime_fault(e: DockerError) -> EngineError {
    let fault = match e {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeFault::ImageNotFound(message),
        e @ DockerError::IOError { .. } => RuntimeFault::Unavailable(e.to_string()),
        other => RuntimeFault::Api(other.to_string()),
    };
    EngineError::Runtime(fault)
}

/// Whether the error is a 404 from the daemon
pub(crate) fn is_not_found(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Unique tag of a submission image
pub fn submission_tag(language: Language, submission_id: &str) -> String {
    format!("code-runner-{}-{}", language.id(), submission_id)
}

/// Docker-backed [`IsolationRuntime`]
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    layered: bool,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self { layered: true }
    }
}

impl DockerRuntime {
    /// With `layered`, submission images build FROM a cached base image
    pub fn new(layered: bool) -> Self {
        Self { layered }
    }

    async fn run_pipeline(
        &self,
        docker: &Docker,
        context: &BuildContext,
        limits: &Limits,
        handle: &mut IsolationHandle,
    ) -> Result<ExecutionResult, EngineError> {
        let language = context.language();

        // ImageResolving
        if self.layered {
            let status = images::ensure_base_image(docker, language, limits.build_timeout).await?;
            debug!("Base image for {} is {:?}", language, status);
        }

        // ImageBuilding
        let tar = archive::pack_dir(context.path()).map_err(EngineError::AssemblyFailed)?;
        handle.mark_image_built();
        if let BuildOutcome::Failed(log) =
            build_image(docker, handle.image_tag(), tar, limits.build_timeout).await?
        {
            let stage = log
                .current_step()
                .and_then(|step| context.recipe().stage_of_step(step))
                .unwrap_or(BuildStage::Base);

            if stage == BuildStage::Compile {
                let step = log.current_step().unwrap_or_default();
                info!("Compilation failed for submission {}", context.id());
                return Ok(ExecutionResult {
                    stdout: Vec::new(),
                    stderr: log.step_output(step).into_bytes(),
                    exit_code: log.exit_code().unwrap_or(1),
                    status: RunStatus::CompileError,
                    truncated: false,
                });
            }

            return Err(EngineError::BuildFailed {
                stage,
                logs: log.text(),
            });
        }

        // ContainerRunning
        let argv = language.spec().run_argv();
        debug!("Running {:?} for submission {}", argv, context.id());

        let memory = i64::try_from(limits.memory_bytes).unwrap_or(i64::MAX);
        let body = ContainerCreateBody {
            image: Some(handle.image_tag().to_string()),
            cmd: Some(argv),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            network_disabled: Some(!limits.network_enabled),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                memory: Some(memory),
                memory_swap: Some(memory),
                pids_limit: Some(limits.pids_limit),
                network_mode: (!limits.network_enabled).then(|| "none".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(format!("{}-run", handle.image_tag())),
            ..Default::default()
        };

        let container = docker
            .create_container(Some(options), body)
            .await
            .map_err(runtime_fault)?;
        handle.set_container(container.id.clone());

        docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
            .map_err(runtime_fault)?;
        info!("Started container {} for submission {}", container.id, context.id());

        let mut wait = docker.wait_container(&container.id, None::<WaitContainerOptions>);
        let exit_code = match tokio::time::timeout(limits.wall_clock, wait.next()).await {
            Err(_) => {
                warn!(
                    "Submission {} exceeded {:?}, killing container {}",
                    context.id(),
                    limits.wall_clock,
                    container.id
                );
                if let Err(e) = docker
                    .kill_container(
                        &container.id,
                        Some(KillContainerOptions {
                            signal: "SIGKILL".to_string(),
                        }),
                    )
                    .await
                {
                    warn!("Failed to kill container {}: {}", container.id, e);
                }
                return Err(EngineError::Timeout {
                    phase: TimeoutPhase::Run,
                    limit: limits.wall_clock,
                });
            }
            Ok(Some(Ok(response))) => response.status_code,
            Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => code,
            Ok(Some(Err(e))) => return Err(runtime_fault(e)),
            Ok(None) => {
                return Err(EngineError::Runtime(RuntimeFault::Api(
                    "container wait stream ended unexpectedly".to_string(),
                )))
            }
        };

        // OutputCaptured
        let (stdout, stderr) = collect_logs(docker, &container.id, limits.output_limit).await?;
        let truncated = stdout.truncated || stderr.truncated;
        if truncated {
            warn!(
                "Output of submission {} truncated at {} bytes per stream",
                context.id(),
                limits.output_limit
            );
        }
        let inspect = docker
            .inspect_container(&container.id, None::<InspectContainerOptions>)
            .await
            .map_err(runtime_fault)?;
        let oom_killed = inspect
            .state
            .and_then(|state| state.oom_killed)
            .unwrap_or(false);

        let status = if oom_killed {
            info!("Submission {} exceeded the memory limit", context.id());
            RunStatus::MemoryLimitExceeded
        } else {
            RunStatus::Exited(exit_code)
        };

        info!(
            "Submission {} finished: {} ({} bytes stdout, {} bytes stderr)",
            context.id(),
            status,
            stdout.data.len(),
            stderr.data.len()
        );

        Ok(ExecutionResult {
            stdout: stdout.data,
            stderr: stderr.data,
            exit_code,
            status,
            truncated,
        })
    }
}

/// Output stream that keeps at most `limit` bytes
#[derive(Debug)]
struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Read the demultiplexed output of a stopped container, bounded per stream
async fn collect_logs(
    docker: &Docker,
    container_id: &str,
    limit: usize,
) -> Result<(CappedBuffer, CappedBuffer), EngineError> {
    let mut stream = docker.logs(
        container_id,
        Some(LogsOptions {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );

    let mut stdout = CappedBuffer::new(limit);
    let mut stderr = CappedBuffer::new(limit);
    while let Some(chunk) = stream.next().await {
        match chunk.map_err(runtime_fault)? {
            LogOutput::StdOut { message } | LogOutput::Console { message } => stdout.push(&message),
            LogOutput::StdErr { message } => stderr.push(&message),
            LogOutput::StdIn { .. } => {}
        }
        if stdout.truncated && stderr.truncated {
            break;
        }
    }
    Ok((stdout, stderr))
}

#[async_trait]
impl IsolationRuntime for DockerRuntime {
    fn layered(&self) -> bool {
        self.layered
    }

    async fn execute(
        &self,
        context: &BuildContext,
        limits: &Limits,
    ) -> Result<ExecutionResult, EngineError> {
        let docker = client().await?;
        let mut handle = IsolationHandle::new(
            docker.clone(),
            submission_tag(context.language(), context.id()),
        );

        let result = self.run_pipeline(docker, context, limits, &mut handle).await;

        // Torndown
        handle.teardown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_tags_are_unique_and_valid() {
        let a = submission_tag(Language::Python, "0f3c9a");
        let b = submission_tag(Language::Python, "7e21d4");
        assert_eq!(a, "code-runner-python-0f3c9a");
        assert_ne!(a, b);
        assert!(!a.contains(':'));
    }

    #[test]
    fn test_capped_buffer_keeps_prefix() {
        let mut buffer = CappedBuffer::new(8);
        buffer.push(b"hello ");
        assert!(!buffer.truncated);
        buffer.push(b"world");
        buffer.push(b"again");
        assert_eq!(buffer.data, b"hello wo");
        assert!(buffer.truncated);

        let mut exact = CappedBuffer::new(4);
        exact.push(b"abcd");
        assert!(!exact.truncated);
        exact.push(b"");
        assert!(!exact.truncated);
    }

    #[test]
    fn test_not_found_maps_to_image_not_found() {
        let err = runtime_fault(DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such image".to_string(),
        });
        assert!(matches!(
            err,
            EngineError::Runtime(RuntimeFault::ImageNotFound(_))
        ));

        let err = runtime_fault(DockerError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        });
        assert!(matches!(err, EngineError::Runtime(RuntimeFault::Api(_))));
    }
}
