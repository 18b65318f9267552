//! Image builds
//!
//! Streams a tar build context to the daemon and follows the classic
//! builder's `Step N/M : ...` headers, so a failed build can be attributed
//! to the recipe instruction (and therefore the [`BuildStage`]) that broke.
//!
//! [`BuildStage`]: crate::context::BuildStage

use bollard::query_parameters::BuildImageOptionsBuilder;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{EngineError, TimeoutPhase};
use crate::sandbox::docker::runtime_fault;

/// Captured output of one image build
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    /// Complete lines, tagged with the step they were printed under
    lines: Vec<(usize, String)>,
    /// Incomplete trailing line of the last chunk
    pending: String,
    current_step: usize,
    error: Option<String>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one `stream` chunk from the daemon
    pub fn push_stream(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            self.push_line(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn push_line(&mut self, line: &str) {
        if let Some(step) = parse_step_header(line) {
            self.current_step = step;
        }
        self.lines.push((self.current_step, line.to_string()));
    }

    /// Flush a trailing partial line
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.push_line(line.trim_end());
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.finish();
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 1-based step the builder was executing last (None before the first step)
    pub fn current_step(&self) -> Option<usize> {
        (self.current_step > 0).then_some(self.current_step)
    }

    /// Output printed by the command of `step`, without builder chatter
    pub fn step_output(&self, step: usize) -> String {
        let mut out = String::new();
        for (_, line) in self.lines.iter().filter(|(s, _)| *s == step) {
            if is_builder_chatter(line) {
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Whole build log, followed by the failure message if any
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (_, line) in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        if let Some(error) = &self.error {
            out.push_str(error);
            out.push('\n');
        }
        out
    }

    /// Exit code of the failed RUN instruction, if the daemon reported one
    pub fn exit_code(&self) -> Option<i64> {
        let error = self.error.as_deref()?;
        let (_, code) = error.rsplit_once("non-zero code:")?;
        code.trim().parse().ok()
    }
}

/// Parse `Step 3/7 : RUN ...` into 3
fn parse_step_header(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("Step ")?;
    let (counter, _) = rest.split_once(" :")?;
    let (step, _total) = counter.split_once('/')?;
    step.trim().parse().ok()
}

fn is_builder_chatter(line: &str) -> bool {
    line.starts_with("Step ")
        || line.starts_with(" ---> ")
        || line.starts_with("Removing intermediate container")
        || line.starts_with("Successfully ")
        || line.starts_with("The command '")
}

/// Result of an image build that reached the daemon
#[derive(Debug)]
pub enum BuildOutcome {
    Built,
    Failed(BuildLog),
}

/// Build `tag` from a tar context, bounded by `timeout`
pub async fn build_image(
    docker: &Docker,
    tag: &str,
    context_tar: Vec<u8>,
    timeout: Duration,
) -> Result<BuildOutcome, EngineError> {
    let options = BuildImageOptionsBuilder::default()
        .dockerfile("Dockerfile")
        .t(tag)
        .rm(true)
        .forcerm(true)
        .build();

    info!("Building image {}", tag);
    let stream = docker.build_image(options, None, Some(bollard::body_full(Bytes::from(context_tar))));
    let mut stream = std::pin::pin!(stream);
    let mut log = BuildLog::new();

    let consumed = tokio::time::timeout(timeout, async {
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(chunk) = info.stream {
                        log.push_stream(&chunk);
                    }
                    if let Some(detail) = info.error_detail {
                        log.set_error(detail.message.unwrap_or_default());
                        return Ok(false);
                    }
                }
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    log.set_error(error);
                    return Ok(false);
                }
                Err(e) => return Err(runtime_fault(e)),
            }
        }
        Ok(true)
    })
    .await;

    match consumed {
        Err(_) => {
            info!("Image build {} exceeded {:?}", tag, timeout);
            Err(EngineError::Timeout {
                phase: TimeoutPhase::Build,
                limit: timeout,
            })
        }
        Ok(Err(e)) => Err(e),
        Ok(Ok(true)) => {
            debug!("Image {} built", tag);
            Ok(BuildOutcome::Built)
        }
        Ok(Ok(false)) => {
            log.finish();
            info!(
                "Image build {} failed at step {:?}: {}",
                tag,
                log.current_step(),
                log.error().unwrap_or("")
            );
            Ok(BuildOutcome::Failed(log))
        }
    }
}
