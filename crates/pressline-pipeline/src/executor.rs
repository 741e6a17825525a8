//! Runs one request as a chain of stage processes.
//!
//! # Design
//! - Stages are admitted and spawned in order; a stage may start while earlier ones still run.
//! - Every pipe end and file handle is owned by exactly one `Stdio`, moved into one
//!   `Command`, and closed in the parent when that command is dropped after spawn.
//! - Each stage is awaited in its own task holding its admission permit, so a slot
//!   frees the moment its process exits.
//! - A single `nop` stage is copied in-process under the `nop` slot.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use pressline_events::{Event, EventBus};
use pressline_protocol::{CompletionNotice, Request, RequestKind, Transformation};
use pressline_telemetry::Metrics;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::catalog::Catalog;
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{TaskHandle, TaskRegistry};

/// Byte counts reported for a successful pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Size of the source file.
    pub bytes_input: u64,
    /// Size of the destination file once every stage exited.
    pub bytes_output: u64,
}

/// Aggregate result of one execution.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Every stage exited successfully.
    Done(PipelineSummary),
    /// The pipeline was rejected or a stage failed.
    Failed(PipelineError),
}

impl PipelineOutcome {
    /// Whether every stage succeeded.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Metrics and log label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }

    /// Notice sent to the requesting client.
    #[must_use]
    pub fn to_notice(&self) -> CompletionNotice {
        match self {
            Self::Done(summary) => CompletionNotice::Done {
                bytes_input: summary.bytes_input,
                bytes_output: summary.bytes_output,
            },
            Self::Failed(err) => CompletionNotice::Failed {
                reason: err.reason(),
            },
        }
    }
}

struct StageExit {
    stage: usize,
    transformation: Transformation,
    status: io::Result<ExitStatus>,
}

/// Executes requests against the shared catalog and admission controller.
#[derive(Clone)]
pub struct PipelineExecutor {
    catalog: Arc<Catalog>,
    admission: Arc<AdmissionController>,
    registry: Arc<TaskRegistry>,
    events: EventBus,
    metrics: Metrics,
}

impl PipelineExecutor {
    /// Wire an executor to its collaborators.
    #[must_use]
    pub const fn new(
        catalog: Arc<Catalog>,
        admission: Arc<AdmissionController>,
        registry: Arc<TaskRegistry>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            catalog,
            admission,
            registry,
            events,
            metrics,
        }
    }

    /// Shared admission controller.
    #[must_use]
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Shared task registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Check a request and resolve its stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidPipeline`] when the request is not a
    /// process-file request, has no stages or paths, names an unknown stage
    /// code, or uses a transformation whose maximum is 0.
    pub fn validate(&self, request: &Request) -> PipelineResult<Vec<Transformation>> {
        if request.kind != RequestKind::ProcessFile {
            return Err(PipelineError::invalid(
                "not_process_file",
                Some(request.kind.as_str().to_string()),
            ));
        }
        if request.stages.is_empty() {
            return Err(PipelineError::invalid("no_stages", None));
        }
        if request.input_path.as_os_str().is_empty() || request.output_path.as_os_str().is_empty()
        {
            return Err(PipelineError::invalid("missing_path", None));
        }

        let stages = request
            .stages
            .iter()
            .map(|&code| {
                Transformation::from_code(code).ok_or_else(|| {
                    PipelineError::invalid("unknown_transformation", Some(code.to_string()))
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        // Stages beyond capacity wait for upstream slots; only a zero maximum can never be admitted.
        if let Some(&transformation) = stages
            .iter()
            .find(|&&stage| self.admission.maximum(stage) == 0)
        {
            return Err(PipelineError::invalid(
                "no_capacity",
                Some(format!("{transformation} has maximum 0")),
            ));
        }
        Ok(stages)
    }

    /// Run `request` to completion and report the aggregate outcome.
    ///
    /// Never fails as a whole: every error is folded into
    /// [`PipelineOutcome::Failed`].
    pub async fn execute(&self, task_id: Uuid, request: &Request) -> PipelineOutcome {
        let span = info_span!("pipeline", task_id = %task_id, sender = request.sender);
        async {
            self.metrics.pipeline_started();
            let outcome = match self.run(task_id, request).await {
                Ok(summary) => PipelineOutcome::Done(summary),
                Err(err) => PipelineOutcome::Failed(err),
            };
            self.metrics.pipeline_finished();
            self.metrics.inc_pipeline(outcome.label());

            match &outcome {
                PipelineOutcome::Done(summary) => {
                    info!(
                        bytes_input = summary.bytes_input,
                        bytes_output = summary.bytes_output,
                        "pipeline completed"
                    );
                    self.events.publish(Event::PipelineCompleted {
                        task_id,
                        bytes_input: summary.bytes_input,
                        bytes_output: summary.bytes_output,
                    });
                }
                PipelineOutcome::Failed(err) => {
                    warn!(error = %err, reason = %err.reason(), "pipeline failed");
                    self.events.publish(Event::PipelineFailed {
                        task_id,
                        message: err.reason(),
                    });
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, task_id: Uuid, request: &Request) -> PipelineResult<PipelineSummary> {
        let stages = self.validate(request)?;
        let handle = self.registry.register(
            task_id,
            request.sender,
            &stages,
            &request.input_path,
            &request.output_path,
        );

        let input = File::open(&request.input_path)
            .await
            .map_err(|source| PipelineError::io("open input", &request.input_path, source))?;
        let bytes_input = input
            .metadata()
            .await
            .map_err(|source| PipelineError::io("stat input", &request.input_path, source))?
            .len();
        let output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&request.output_path)
            .await
            .map_err(|source| PipelineError::io("open output", &request.output_path, source))?;

        if stages == [Transformation::Nop] {
            self.copy_through(&handle, input, output, &request.output_path)
                .await?;
        } else {
            let input = input.into_std().await;
            let output = output.into_std().await;
            self.run_stages(&handle, &stages, input, output).await?;
        }

        let bytes_output = tokio::fs::metadata(&request.output_path)
            .await
            .map_err(|source| PipelineError::io("stat output", &request.output_path, source))?
            .len();
        Ok(PipelineSummary {
            bytes_input,
            bytes_output,
        })
    }

    async fn admit(
        &self,
        handle: &TaskHandle,
        stage: usize,
        transformation: Transformation,
    ) -> PipelineResult<AdmissionPermit> {
        let permit = self
            .admission
            .await_admit(transformation)
            .await
            .map_err(|_| PipelineError::AdmissionClosed {
                stage,
                transformation,
            })?;
        debug!(stage, %transformation, "stage admitted");
        self.events.publish(Event::StageAdmitted {
            task_id: handle.task_id(),
            stage,
            transformation,
        });
        Ok(permit)
    }

    async fn copy_through(
        &self,
        handle: &TaskHandle,
        mut input: File,
        mut output: File,
        output_path: &Path,
    ) -> PipelineResult<()> {
        let permit = self.admit(handle, 0, Transformation::Nop).await?;
        self.metrics.stage_started(Transformation::Nop.name());
        let copied = async {
            tokio::io::copy(&mut input, &mut output).await?;
            output.flush().await
        }
        .await;
        drop(permit);

        let status = if copied.is_ok() { "success" } else { "failure" };
        self.metrics.stage_exited(Transformation::Nop.name(), status);
        self.events.publish(Event::StageExited {
            task_id: handle.task_id(),
            stage: 0,
            transformation: Transformation::Nop,
            success: copied.is_ok(),
        });
        copied.map_err(|source| PipelineError::io("copy", output_path, source))
    }

    async fn run_stages(
        &self,
        handle: &TaskHandle,
        stages: &[Transformation],
        input: std::fs::File,
        output: std::fs::File,
    ) -> PipelineResult<()> {
        // stdins[i] feeds stage i; stdouts[i] drains it. Pipe i connects stdouts[i] to stdins[i + 1].
        let mut stdins = vec![Stdio::from(input)];
        let mut stdouts = Vec::with_capacity(stages.len());
        for _ in 1..stages.len() {
            let (reader, writer) =
                io::pipe().map_err(|source| PipelineError::io("create pipe", "", source))?;
            stdouts.push(Stdio::from(writer));
            stdins.push(Stdio::from(reader));
        }
        stdouts.push(Stdio::from(output));

        let mut running: JoinSet<StageExit> = JoinSet::new();
        let mut failures = Vec::new();
        let wiring = stdins.into_iter().zip(stdouts);
        for (stage, (&transformation, (stdin, stdout))) in stages.iter().zip(wiring).enumerate() {
            let permit = match self.admit(handle, stage, transformation).await {
                Ok(permit) => permit,
                Err(err) => {
                    failures.push(err);
                    break;
                }
            };
            match self.spawn_stage(transformation, stdin, stdout) {
                Ok(child) => {
                    if let Some(pid) = child.id() {
                        handle.record_pid(pid);
                        debug!(stage, %transformation, pid, "stage spawned");
                    }
                    self.metrics.stage_started(transformation.name());
                    running.spawn(self.supervise(handle.task_id(), stage, child, permit));
                }
                Err(source) => {
                    failures.push(PipelineError::Spawn {
                        stage,
                        transformation,
                        path: self.catalog.executable_path(transformation),
                        source,
                    });
                    break;
                }
            }
        }
        // Breaking out of the loop drops the unspawned ends so upstream stages see a closed pipe.

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(exit) => {
                    if let Some(err) = exit_failure(exit) {
                        failures.push(err);
                    }
                }
                Err(source) => failures.push(PipelineError::StageTask { source }),
            }
        }
        primary_failure(failures).map_or(Ok(()), Err)
    }

    fn spawn_stage(
        &self,
        transformation: Transformation,
        stdin: Stdio,
        stdout: Stdio,
    ) -> io::Result<Child> {
        let mut command = Command::new(self.catalog.executable_path(transformation));
        command
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        command.spawn()
    }

    fn supervise(
        &self,
        task_id: Uuid,
        stage: usize,
        mut child: Child,
        permit: AdmissionPermit,
    ) -> impl Future<Output = StageExit> + Send + 'static {
        let metrics = self.metrics.clone();
        let events = self.events.clone();
        async move {
            let transformation = permit.transformation();
            let status = child.wait().await;
            drop(permit);

            let label = match &status {
                Ok(status) if status.success() => "success",
                Ok(status) if status.signal().is_some() => "signal",
                _ => "failure",
            };
            metrics.stage_exited(transformation.name(), label);
            events.publish(Event::StageExited {
                task_id,
                stage,
                transformation,
                success: label == "success",
            });
            debug!(stage, %transformation, status = label, "stage exited");
            StageExit {
                stage,
                transformation,
                status,
            }
        }
        .in_current_span()
    }
}

fn exit_failure(exit: StageExit) -> Option<PipelineError> {
    let StageExit {
        stage,
        transformation,
        status,
    } = exit;
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => Some(PipelineError::StageFailed {
            stage,
            transformation,
            code: status.code(),
            signal: status.signal(),
        }),
        Err(source) => Some(PipelineError::Wait {
            stage,
            transformation,
            source,
        }),
    }
}

/// Pick the failure reported to the client.
///
/// Spawn and admission failures end the loop and are the root cause of any
/// broken pipes upstream, so they win. Otherwise the lowest-indexed stage that
/// did not die of `SIGPIPE` is reported, falling back to the lowest index.
fn primary_failure(failures: Vec<PipelineError>) -> Option<PipelineError> {
    failures.into_iter().min_by_key(|err| {
        let rank = match err {
            PipelineError::Spawn { .. } | PipelineError::AdmissionClosed { .. } => 0,
            err if err.is_broken_pipe() => 2,
            _ => 1,
        };
        (rank, err.stage().unwrap_or(usize::MAX))
    })
}
