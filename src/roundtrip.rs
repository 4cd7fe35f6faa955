//! Database round trip: PGN to CFDB and back, checked against a direct copy.
//!
//! Three legs run against one PGN source, each a `copydb` followed by a
//! `validatedb` of the copy:
//!
//! 1. PGN to `copydb1.cfdb`
//! 2. `copydb1.cfdb` back to `copydb1.pgn`
//! 3. the original PGN straight to `copydb2.pgn`
//!
//! The two PGN renderings must then match line for line.
use crate::command::{CommandSpec, Flag, Switch, Verb};
use crate::context::HarnessContext;
use crate::invoker::Invoke;
use crate::linediff::{compare_files, Hunk, DEFAULT_CONTEXT};
use crate::pipeline::{Pipeline, PipelineVerdict, Stage, StageParams};
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const COPY_SENTINEL: &str = "Successfully copied database";
pub const VALIDATE_SENTINEL: &str = "Database is valid";

/// Source used when no input is given, relative to the test directory.
pub const DEFAULT_INPUT: &str = "pgn/Kramnik.pgn";

/// One copy-then-validate leg writing `output`.
///
/// Logs go to `copy<cycle>.log` and `validate<cycle>.log` in `temp_dir`.
pub fn copy_and_validate(cycle: usize, output: &Path, temp_dir: &Path) -> Pipeline {
    let copy_log = temp_dir.join(format!("copy{cycle}.log"));
    let validate_log = temp_dir.join(format!("validate{cycle}.log"));

    let copy = {
        let log = copy_log.clone();
        let target = output.to_path_buf();
        Stage::new(format!("copy{cycle}"), copy_log, move |params| {
            Ok(CommandSpec::new(Verb::CopyDb)
                .switch(Switch::Quiet)
                .switch(Switch::DebugLog)
                .path_flag(Flag::Log, &log)
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Output, &target))
        })
        .sentinel(COPY_SENTINEL)
        .requires_input()
        .produces(output.to_path_buf())
        .clears_output()
    };

    let validate = {
        let log = validate_log.clone();
        Stage::new(format!("validate{cycle}"), validate_log, move |params| {
            Ok(CommandSpec::new(Verb::ValidateDb)
                .switch(Switch::Quiet)
                .switch(Switch::DebugLog)
                .path_flag(Flag::Log, &log)
                .path_flag(Flag::Input, params.input()?))
        })
        .sentinel(VALIDATE_SENTINEL)
        .requires_input()
    };

    Pipeline::new(format!("leg{cycle}")).stage(copy).stage(validate)
}

/// Where a round trip reads and writes.
#[derive(Debug, Clone)]
pub struct RoundTripPlan {
    pub input: PathBuf,
    pub indexed_copy: PathBuf,
    pub derived: PathBuf,
    pub direct: PathBuf,
}

impl RoundTripPlan {
    pub fn in_temp_dir(input: PathBuf, temp_dir: &Path) -> Self {
        Self {
            input,
            indexed_copy: temp_dir.join("copydb1.cfdb"),
            derived: temp_dir.join("copydb1.pgn"),
            direct: temp_dir.join("copydb2.pgn"),
        }
    }

    /// `--input` if given, else the stock PGN under the test directory.
    pub fn resolve(ctx: &HarnessContext, input: Option<PathBuf>) -> Result<Self> {
        let input = match input {
            Some(input) => input,
            None => ctx.test_fixture(DEFAULT_INPUT, "--input")?,
        };
        Ok(Self::in_temp_dir(input, &ctx.temp_dir))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundTripOutcome {
    Equivalent,
    StageFailed { leg: usize },
    MissingOutput { path: String },
    Inequivalent { hunks: Vec<Hunk> },
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripVerdict {
    pub input: PathBuf,
    pub derived: PathBuf,
    pub direct: PathBuf,
    pub legs: Vec<PipelineVerdict>,
    pub outcome: RoundTripOutcome,
}

impl RoundTripVerdict {
    pub fn passed(&self) -> bool {
        self.outcome == RoundTripOutcome::Equivalent
    }

    pub fn cancelled(&self) -> bool {
        self.legs.iter().any(PipelineVerdict::cancelled)
    }
}

pub fn check_round_trip(
    ctx: &HarnessContext,
    invoker: &dyn Invoke,
    plan: &RoundTripPlan,
) -> Result<RoundTripVerdict> {
    let legs = [
        (&plan.input, &plan.indexed_copy),
        (&plan.indexed_copy, &plan.derived),
        (&plan.input, &plan.direct),
    ];
    let mut verdict = RoundTripVerdict {
        input: plan.input.clone(),
        derived: plan.derived.clone(),
        direct: plan.direct.clone(),
        legs: Vec::with_capacity(legs.len()),
        outcome: RoundTripOutcome::Equivalent,
    };

    for (idx, (input, output)) in legs.into_iter().enumerate() {
        let cycle = idx + 1;
        tracing::info!(
            leg = cycle,
            input = %input.display(),
            output = %output.display(),
            "round trip leg"
        );
        let pipeline = copy_and_validate(cycle, output, &ctx.temp_dir);
        let leg = pipeline.execute(ctx, invoker, StageParams::with_input(input));
        let passed = leg.passed();
        verdict.legs.push(leg);
        if !passed {
            verdict.outcome = RoundTripOutcome::StageFailed { leg: cycle };
            return Ok(verdict);
        }
    }

    for path in [&plan.derived, &plan.direct] {
        if !path.is_file() {
            verdict.outcome = RoundTripOutcome::MissingOutput {
                path: path.display().to_string(),
            };
            return Ok(verdict);
        }
    }

    let hunks = compare_files(&plan.derived, &plan.direct, DEFAULT_CONTEXT)?;
    if hunks.is_empty() {
        tracing::info!(input = %plan.input.display(), "round trip renderings are identical");
    } else {
        tracing::warn!(
            hunks = hunks.len(),
            derived = %plan.derived.display(),
            direct = %plan.direct.display(),
            "round trip renderings differ"
        );
        for hunk in &hunks {
            tracing::debug!(
                derived = ?hunk.left_range(),
                direct = ?hunk.right_range(),
                "differing lines"
            );
        }
        verdict.outcome = RoundTripOutcome::Inequivalent { hunks };
    }
    Ok(verdict)
}
