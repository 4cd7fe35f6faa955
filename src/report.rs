//! Human and JSON renderings of harness verdicts.
use crate::differential::{SessionOutcome, SessionReport};
use crate::linediff::render_unified;
use crate::pipeline::PipelineVerdict;
use crate::roundtrip::{RoundTripOutcome, RoundTripVerdict};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

pub const VERDICT_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct VerdictEnvelope<'a, T: Serialize> {
    schema_version: u32,
    command: &'a str,
    passed: bool,
    verdict: &'a T,
}

pub fn verdict_json<T: Serialize>(command: &str, passed: bool, verdict: &T) -> Result<String> {
    let envelope = VerdictEnvelope {
        schema_version: VERDICT_SCHEMA_VERSION,
        command,
        passed,
        verdict,
    };
    serde_json::to_string_pretty(&envelope).context("serialize verdict")
}

pub fn render_pipeline(verdict: &PipelineVerdict) -> String {
    let mut out = String::new();
    for stage in &verdict.stages {
        let status = if stage.passed { "ok" } else { "FAILED" };
        let _ = writeln!(out, "{} [{}] {status}", verdict.pipeline, stage.name);
        if let Some(invocation) = &stage.invocation {
            let exit = match invocation.exit_code() {
                Some(code) if !invocation.succeeded() => format!(", exit {code}"),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "  command: {} ({} ms{exit})",
                invocation.command, invocation.duration_ms
            );
        }
        if let Some(log) = stage.log.as_ref().filter(|log| log.has_marker()) {
            for marker in &log.marker_lines {
                let _ = writeln!(out, "  {}:{}: {}", log.path, marker.line_number, marker.text);
            }
        }
    }
    match (&verdict.failing_stage, &verdict.failure) {
        (Some(index), Some(failure)) => {
            let name = verdict
                .stages
                .get(*index)
                .map(|stage| stage.name.as_str())
                .unwrap_or("?");
            let _ = writeln!(
                out,
                "{}: stage {index} ({name}) failed: {failure}",
                verdict.pipeline
            );
        }
        _ => {
            let _ = write!(out, "{}: passed", verdict.pipeline);
            if let Some(output) = verdict.final_output() {
                let _ = write!(out, ", output {}", output.display());
            }
            match verdict.marker_count() {
                0 => {}
                1 => {
                    let _ = write!(out, " (1 marker line)");
                }
                n => {
                    let _ = write!(out, " ({n} marker lines)");
                }
            }
            out.push('\n');
        }
    }
    out
}

pub fn render_round_trip(verdict: &RoundTripVerdict) -> String {
    let mut out = String::new();
    for leg in &verdict.legs {
        out.push_str(&render_pipeline(leg));
    }
    match &verdict.outcome {
        RoundTripOutcome::Equivalent => {
            let _ = writeln!(
                out,
                "round trip: {} and {} are identical",
                verdict.derived.display(),
                verdict.direct.display()
            );
        }
        RoundTripOutcome::StageFailed { leg } => {
            let _ = writeln!(out, "round trip: failed in leg {leg}");
        }
        RoundTripOutcome::MissingOutput { path } => {
            let _ = writeln!(out, "round trip: failed; no output file {path} to compare");
        }
        RoundTripOutcome::Inequivalent { hunks } => {
            let _ = writeln!(
                out,
                "round trip: {} and {} are different:",
                verdict.derived.display(),
                verdict.direct.display()
            );
            out.push_str(&render_unified(
                &verdict.derived.display().to_string(),
                &verdict.direct.display().to_string(),
                hunks,
            ));
        }
    }
    out
}

pub fn render_session(report: &SessionReport) -> String {
    let mut out = String::new();
    for verdict in &report.verdicts {
        let stimulus = &verdict.stimulus;
        if verdict.matched {
            let _ = writeln!(out, "{} match {}", stimulus.ordinal, stimulus.position);
        } else {
            let _ = writeln!(
                out,
                "{} MISMATCH: {} ({} != {})",
                stimulus.ordinal,
                stimulus.position,
                verdict.subject_nodes,
                verdict.reference_nodes
            );
        }
    }
    let summary = match &report.outcome {
        SessionOutcome::Completed => format!(
            "{} positions matched ({} mode, depth {}, {} skipped)",
            report.matches(),
            report.mode,
            report.depth,
            report.skipped
        ),
        SessionOutcome::Diverged { ordinal } => match report.divergence() {
            Some(verdict) => format!(
                "diverged at position {ordinal}: {}",
                verdict.stimulus.position
            ),
            None => format!("diverged at position {ordinal}"),
        },
        SessionOutcome::Aborted { ordinal, reason } => {
            format!("aborted at position {ordinal}: {reason}")
        }
        SessionOutcome::Cancelled { ordinal } => format!("cancelled at position {ordinal}"),
    };
    let _ = writeln!(out, "find-buggy-pos: {summary}");
    out
}
