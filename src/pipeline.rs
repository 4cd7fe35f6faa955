//! Fail-fast stage pipelines over ccore invocations.
//!
//! A [`Stage`] knows how to build one ccore command from the parameters it is
//! handed, which log that command writes, and which phrase in the log proves
//! success. A [`Pipeline`] runs stages strictly in order, threads each stage's
//! output artifact into the next stage's input, and stops at the first stage
//! that fails. Failures come back as data in a [`PipelineVerdict`].
use crate::command::CommandSpec;
use crate::context::HarnessContext;
use crate::failure::StageFailure;
use crate::invoker::{Invocation, Invoke};
use crate::logscan::{inspect_log, LogReport};
use crate::util::remove_stale_file;
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Parameters visible to a stage's command builder.
#[derive(Debug, Clone, Default)]
pub struct StageParams {
    input: Option<PathBuf>,
}

impl StageParams {
    pub fn with_input(input: impl Into<PathBuf>) -> Self {
        Self {
            input: Some(input.into()),
        }
    }

    /// The artifact produced by the previous stage, or the pipeline's seed input.
    pub fn input(&self) -> Result<&Path> {
        self.input
            .as_deref()
            .ok_or_else(|| anyhow!("no input artifact threaded into this stage"))
    }
}

type BuildCommand = Box<dyn Fn(&StageParams) -> Result<CommandSpec>>;

pub struct Stage {
    name: String,
    log_path: PathBuf,
    build: BuildCommand,
    sentinel: Option<String>,
    output: Option<PathBuf>,
    requires_input: bool,
    clears_output: bool,
}

impl Stage {
    /// `build` must point the command's `-l` at `log_path`.
    pub fn new(
        name: impl Into<String>,
        log_path: impl Into<PathBuf>,
        build: impl Fn(&StageParams) -> Result<CommandSpec> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            log_path: log_path.into(),
            build: Box::new(build),
            sentinel: None,
            output: None,
            requires_input: false,
            clears_output: false,
        }
    }

    /// Require `phrase` in the log for the stage to pass.
    pub fn sentinel(mut self, phrase: impl Into<String>) -> Self {
        self.sentinel = Some(phrase.into());
        self
    }

    /// Declare the artifact this stage writes; it becomes the next stage's input.
    pub fn produces(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Fail before launching when the threaded input does not exist.
    pub fn requires_input(mut self) -> Self {
        self.requires_input = true;
        self
    }

    /// Delete the declared output before running so a stale copy cannot survive.
    pub fn clears_output(mut self) -> Self {
        self.clears_output = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation: Option<Invocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineVerdict {
    pub pipeline: String,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_stage: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
}

impl PipelineVerdict {
    pub fn passed(&self) -> bool {
        self.failing_stage.is_none()
    }

    pub fn cancelled(&self) -> bool {
        self.failure.as_ref().is_some_and(StageFailure::is_cancelled)
    }

    pub fn marker_count(&self) -> usize {
        self.stages
            .iter()
            .filter_map(|stage| stage.log.as_ref())
            .map(|log| log.marker_lines.len())
            .sum()
    }

    /// The output artifact of the last stage that declared one.
    pub fn final_output(&self) -> Option<&Path> {
        self.stages
            .iter()
            .rev()
            .find_map(|stage| stage.output.as_deref())
    }
}

pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn execute(
        &self,
        ctx: &HarnessContext,
        invoker: &dyn Invoke,
        params: StageParams,
    ) -> PipelineVerdict {
        let mut params = params;
        let mut records = Vec::with_capacity(self.stages.len());
        tracing::info!(pipeline = %self.name, stages = self.stages.len(), "pipeline start");

        for (index, stage) in self.stages.iter().enumerate() {
            let mut record = StageRecord {
                index,
                name: stage.name.clone(),
                invocation: None,
                log: None,
                output: stage.output.clone(),
                passed: false,
            };
            let result = run_stage(ctx, invoker, stage, &params, &mut record);
            records.push(record);
            if let Err(failure) = result {
                tracing::warn!(
                    pipeline = %self.name,
                    stage = %stage.name,
                    index,
                    %failure,
                    "stage failed"
                );
                return PipelineVerdict {
                    pipeline: self.name.clone(),
                    stages: records,
                    failing_stage: Some(index),
                    failure: Some(failure),
                };
            }
            tracing::info!(pipeline = %self.name, stage = %stage.name, index, "stage passed");
            if let Some(output) = &stage.output {
                params.input = Some(output.clone());
            }
        }

        PipelineVerdict {
            pipeline: self.name.clone(),
            stages: records,
            failing_stage: None,
            failure: None,
        }
    }
}

fn run_stage(
    ctx: &HarnessContext,
    invoker: &dyn Invoke,
    stage: &Stage,
    params: &StageParams,
    record: &mut StageRecord,
) -> std::result::Result<(), StageFailure> {
    if ctx.cancel.is_cancelled() {
        return Err(StageFailure::Cancelled);
    }

    remove_stale_file(&stage.log_path).map_err(|err| StageFailure::LaunchFailure {
        reason: format!("{err:#}"),
    })?;
    if stage.clears_output {
        if let Some(output) = &stage.output {
            remove_stale_file(output).map_err(|err| StageFailure::LaunchFailure {
                reason: format!("{err:#}"),
            })?;
        }
    }

    if stage.requires_input {
        let input = params.input().map_err(|err| StageFailure::InvalidCommand {
            reason: err.to_string(),
        })?;
        if !input.exists() {
            return Err(StageFailure::MissingArtifact {
                path: input.display().to_string(),
            });
        }
    }

    let command = (stage.build)(params)
        .and_then(|spec| spec.build(&ctx.ccore))
        .map_err(|err| StageFailure::InvalidCommand {
            reason: format!("{err:#}"),
        })?;

    let invocation = invoker.invoke(&command);
    let failure = invocation.failure();
    record.invocation = Some(invocation);
    if let Some(failure) = failure {
        return Err(failure);
    }

    let log = inspect_log(&stage.log_path, stage.sentinel.as_deref());
    let verdict = match stage.sentinel.as_deref() {
        Some(_) if !log.exists => Err(StageFailure::MissingArtifact {
            path: log.path.clone(),
        }),
        Some(sentinel) if !log.sentinel_found => Err(StageFailure::SentinelMissing {
            sentinel: sentinel.to_string(),
            log: log.path.clone(),
        }),
        _ => Ok(()),
    };
    record.log = Some(log);
    verdict?;
    record.passed = true;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeInvoker, FakeRun};
    use super::*;
    use crate::cancel::CancelToken;
    use crate::command::{Flag, Verb};
    use std::fs;

    const COPIED: &str = "Successfully copied database";

    fn context(temp: &Path) -> HarnessContext {
        HarnessContext::new(
            PathBuf::from("/opt/ccore/bin/ccore"),
            temp.to_path_buf(),
            CancelToken::manual(),
        )
    }

    fn copy_stage(temp: &Path, n: usize) -> Stage {
        let log = temp.join(format!("copy{n}.log"));
        let output = temp.join(format!("copy{n}.cfdb"));
        let log_for_build = log.clone();
        let output_for_build = output.clone();
        Stage::new(format!("copy{n}"), log, move |params| {
            Ok(CommandSpec::new(Verb::CopyDb)
                .path_flag(Flag::Log, &log_for_build)
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Output, &output_for_build))
        })
        .sentinel(COPIED)
        .produces(output)
    }

    #[test]
    fn stages_after_a_failure_are_never_invoked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("chain")
            .stage(copy_stage(temp.path(), 1))
            .stage(copy_stage(temp.path(), 2))
            .stage(copy_stage(temp.path(), 3))
            .stage(copy_stage(temp.path(), 4));
        let invoker = FakeInvoker::new(vec![
            FakeRun::ok(COPIED),
            FakeRun::exit(1),
            FakeRun::ok(COPIED),
            FakeRun::ok(COPIED),
        ]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(!verdict.passed());
        assert_eq!(verdict.failing_stage, Some(1));
        assert_eq!(verdict.failure, Some(StageFailure::NonzeroExit { code: 1 }));
        assert_eq!(invoker.call_count(), 2);
        assert_eq!(verdict.stages.len(), 2);
    }

    #[test]
    fn outputs_thread_into_the_next_stage_input() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("chain")
            .stage(copy_stage(temp.path(), 1))
            .stage(copy_stage(temp.path(), 2));
        let invoker = FakeInvoker::new(vec![FakeRun::ok(COPIED), FakeRun::ok(COPIED)]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(verdict.passed());
        assert_eq!(verdict.final_output(), Some(temp.path().join("copy2.cfdb").as_path()));
        let calls = invoker.calls.borrow();
        assert_eq!(
            testing::arg_after(&calls[0], "-i"),
            Some(PathBuf::from("/data/a.pgn"))
        );
        assert_eq!(
            testing::arg_after(&calls[1], "-i"),
            Some(temp.path().join("copy1.cfdb"))
        );
    }

    #[test]
    fn warning_without_sentinel_fails_despite_zero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker = FakeInvoker::new(vec![FakeRun::ok("WRN unrelated\n")]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert_eq!(verdict.failing_stage, Some(0));
        assert!(matches!(
            verdict.failure,
            Some(StageFailure::SentinelMissing { .. })
        ));
        assert_eq!(verdict.marker_count(), 1);
    }

    #[test]
    fn error_marker_with_sentinel_still_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker =
            FakeInvoker::new(vec![FakeRun::ok("ERR disk full\nSuccessfully copied database\n")]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(verdict.passed());
        assert_eq!(verdict.marker_count(), 1);
        assert!(verdict.stages[0].passed);
    }

    #[test]
    fn missing_log_with_required_sentinel_is_missing_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker = FakeInvoker::new(vec![FakeRun {
            log: None,
            exit_code: 0,
            writes: Vec::new(),
        }]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert_eq!(
            verdict.failure,
            Some(StageFailure::MissingArtifact {
                path: temp.path().join("copy1.log").display().to_string(),
            })
        );
    }

    #[test]
    fn stale_log_from_a_previous_run_is_deleted_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        fs::write(temp.path().join("copy1.log"), COPIED).expect("write stale log");
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker = FakeInvoker::new(vec![FakeRun {
            log: None,
            exit_code: 0,
            writes: Vec::new(),
        }]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(!verdict.passed());
        assert!(!temp.path().join("copy1.log").exists());
    }

    #[test]
    fn stage_without_sentinel_is_judged_by_exit_code_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let log = temp.path().join("ccore.log");
        let log_for_build = log.clone();
        let pipeline = Pipeline::new("passthrough").stage(Stage::new("copy", log, move |_| {
            Ok(CommandSpec::new(Verb::CopyDb).path_flag(Flag::Log, &log_for_build))
        }));
        let invoker = FakeInvoker::new(vec![FakeRun {
            log: None,
            exit_code: 0,
            writes: Vec::new(),
        }]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::default());

        assert!(verdict.passed());
        assert_eq!(verdict.stages[0].log.as_ref().map(|log| log.exists), Some(false));
    }

    #[test]
    fn missing_required_input_fails_before_launch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1).requires_input());
        let invoker = FakeInvoker::new(vec![FakeRun::ok(COPIED)]);
        let missing = temp.path().join("absent.pgn");

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input(&missing));

        assert_eq!(invoker.call_count(), 0);
        assert_eq!(
            verdict.failure,
            Some(StageFailure::MissingArtifact {
                path: missing.display().to_string(),
            })
        );
    }

    #[test]
    fn invalid_command_fails_the_stage_without_launching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker = FakeInvoker::new(vec![FakeRun::ok(COPIED)]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::default());

        assert_eq!(invoker.call_count(), 0);
        assert!(matches!(
            verdict.failure,
            Some(StageFailure::InvalidCommand { .. })
        ));
    }

    #[test]
    fn cancelled_context_stops_before_the_next_stage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        ctx.cancel.cancel();
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1));
        let invoker = FakeInvoker::new(vec![FakeRun::ok(COPIED)]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(verdict.cancelled());
        assert_eq!(invoker.call_count(), 0);
    }

    #[test]
    fn clears_output_removes_previous_artifact() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = context(temp.path());
        let output = temp.path().join("copy1.cfdb");
        fs::write(&output, "stale").expect("write stale output");
        let pipeline = Pipeline::new("copy").stage(copy_stage(temp.path(), 1).clears_output());
        let invoker = FakeInvoker::new(vec![FakeRun::exit(2)]);

        let verdict = pipeline.execute(&ctx, &invoker, StageParams::with_input("/data/a.pgn"));

        assert!(!verdict.passed());
        assert!(!output.exists());
    }
}
