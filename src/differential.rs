//! Differential testing of ccore's move generator against a reference engine.
//!
//! Both engines stay up for the whole session. Each stimulus (a position) is
//! put to the subject first and the reference second, and the two node counts
//! at depth one must agree exactly. The first disagreement ends the session;
//! that position is the counterexample.
use crate::cancel::Cancelled;
use crate::engine::{EngineAdapter, PositionGenerator};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Depth, in plies, of the node count used as the oracle.
pub const METRIC_DEPTH: u32 = 1;

pub const DEFAULT_GENERATED_STIMULI: usize = 1000;

/// One position put to both engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stimulus {
    /// 1-based position in the session; generated empty positions consume one.
    pub ordinal: usize,
    pub position: String,
    /// Source line for replayed positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
}

/// Where stimuli come from: the subject's `randompos`, or a file of positions.
pub enum StimulusSource {
    Generate {
        total: usize,
        issued: usize,
    },
    Replay {
        origin: String,
        lines: Lines<Box<dyn BufRead>>,
        line_number: usize,
        issued: usize,
    },
}

impl StimulusSource {
    pub fn generate(total: usize) -> Self {
        StimulusSource::Generate { total, issued: 0 }
    }

    pub fn replay(origin: impl Into<String>, reader: Box<dyn BufRead>) -> Self {
        StimulusSource::Replay {
            origin: origin.into(),
            lines: reader.lines(),
            line_number: 0,
            issued: 0,
        }
    }

    pub fn replay_file(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open positions {}", path.display()))?;
        Ok(Self::replay(
            path.display().to_string(),
            Box::new(BufReader::new(file)),
        ))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            StimulusSource::Generate { .. } => "generate",
            StimulusSource::Replay { .. } => "replay",
        }
    }

    fn issued(&self) -> usize {
        match self {
            StimulusSource::Generate { issued, .. } | StimulusSource::Replay { issued, .. } => {
                *issued
            }
        }
    }

    /// The next stimulus, or `None` once the budget or the file is exhausted.
    pub fn next(&mut self, generator: &mut dyn PositionGenerator) -> Result<Option<Stimulus>> {
        match self {
            StimulusSource::Generate { total, issued } => {
                if *issued >= *total {
                    return Ok(None);
                }
                *issued += 1;
                let position = generator.random_position()?;
                Ok(Some(Stimulus {
                    ordinal: *issued,
                    position,
                    line_number: None,
                }))
            }
            StimulusSource::Replay {
                origin,
                lines,
                line_number,
                issued,
            } => loop {
                let Some(line) = lines.next() else {
                    return Ok(None);
                };
                *line_number += 1;
                let line =
                    line.with_context(|| format!("read {origin} line {}", *line_number))?;
                let position = line.trim();
                if position.is_empty() {
                    continue;
                }
                *issued += 1;
                return Ok(Some(Stimulus {
                    ordinal: *issued,
                    position: position.to_string(),
                    line_number: Some(*line_number),
                }));
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StimulusVerdict {
    #[serde(flatten)]
    pub stimulus: Stimulus,
    pub subject_nodes: u64,
    pub reference_nodes: u64,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Every stimulus matched.
    Completed,
    Diverged { ordinal: usize },
    /// An engine died, closed its output or answered garbage.
    Aborted { ordinal: usize, reason: String },
    Cancelled { ordinal: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub mode: &'static str,
    pub depth: u32,
    pub verdicts: Vec<StimulusVerdict>,
    /// Generated positions that came back empty.
    pub skipped: usize,
    pub outcome: SessionOutcome,
}

impl SessionReport {
    pub fn passed(&self) -> bool {
        self.outcome == SessionOutcome::Completed
    }

    pub fn divergence(&self) -> Option<&StimulusVerdict> {
        self.verdicts.iter().find(|verdict| !verdict.matched)
    }

    pub fn matches(&self) -> usize {
        self.verdicts.iter().filter(|verdict| verdict.matched).count()
    }
}

pub struct DifferentialSession<S, R> {
    subject: S,
    reference: R,
    source: StimulusSource,
    depth: u32,
}

impl<S, R> DifferentialSession<S, R>
where
    S: EngineAdapter + PositionGenerator,
    R: EngineAdapter,
{
    pub fn new(subject: S, reference: R, source: StimulusSource) -> Self {
        Self {
            subject,
            reference,
            source,
            depth: METRIC_DEPTH,
        }
    }

    /// Drive the session to its first divergence, the end of its stimuli, or
    /// an engine failure. The engines are dropped (and reaped) on return.
    pub fn run(mut self) -> SessionReport {
        let mode = self.source.mode();
        let mut report = SessionReport {
            mode,
            depth: self.depth,
            verdicts: Vec::new(),
            skipped: 0,
            outcome: SessionOutcome::Completed,
        };
        tracing::info!(mode, depth = self.depth, "differential session start");

        loop {
            let stimulus = match self.source.next(&mut self.subject) {
                Ok(Some(stimulus)) => stimulus,
                Ok(None) => break,
                Err(err) => {
                    report.outcome = interrupted(err, self.source.issued());
                    break;
                }
            };
            if stimulus.position.is_empty() {
                tracing::debug!(ordinal = stimulus.ordinal, "empty position skipped");
                report.skipped += 1;
                continue;
            }

            let counts = self
                .subject
                .node_count(&stimulus.position, self.depth)
                .and_then(|subject| {
                    self.reference
                        .node_count(&stimulus.position, self.depth)
                        .map(|reference| (subject, reference))
                });
            let (subject_nodes, reference_nodes) = match counts {
                Ok(counts) => counts,
                Err(err) => {
                    report.outcome = interrupted(err, stimulus.ordinal);
                    break;
                }
            };

            let matched = subject_nodes == reference_nodes;
            let ordinal = stimulus.ordinal;
            if matched {
                tracing::info!(ordinal, nodes = subject_nodes, position = %stimulus.position, "match");
            } else {
                tracing::warn!(
                    ordinal,
                    subject_nodes,
                    reference_nodes,
                    position = %stimulus.position,
                    "mismatch"
                );
            }
            report.verdicts.push(StimulusVerdict {
                stimulus,
                subject_nodes,
                reference_nodes,
                matched,
            });
            if !matched {
                report.outcome = SessionOutcome::Diverged { ordinal };
                break;
            }
        }

        tracing::info!(
            mode,
            matches = report.matches(),
            skipped = report.skipped,
            outcome = ?report.outcome,
            "differential session complete"
        );
        report
    }
}

fn interrupted(err: anyhow::Error, ordinal: usize) -> SessionOutcome {
    if err.is::<Cancelled>() {
        return SessionOutcome::Cancelled { ordinal };
    }
    let reason = format!("{err:#}");
    tracing::warn!(ordinal, %reason, "differential session aborted");
    SessionOutcome::Aborted { ordinal, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedChannel;
    use crate::engine::{ReferenceEngine, SubjectEngine};
    use std::io::Cursor;

    const POSITIONS: [&str; 5] = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
    ];
    const COUNTS: [u64; 5] = [20, 48, 14, 6, 44];

    fn replay_file() -> StimulusSource {
        let text = POSITIONS.join("\n");
        StimulusSource::replay("positions.fen", Box::new(Cursor::new(text.into_bytes())))
    }

    fn reference_replies(counts: &[u64]) -> Vec<String> {
        counts
            .iter()
            .flat_map(|count| ["a2a3 1".to_string(), format!("{count} nodes in 0.0 sec")])
            .collect()
    }

    #[test]
    fn matching_replay_completes_with_one_verdict_per_position() {
        let subject = ScriptedChannel::new(COUNTS.iter().map(u64::to_string));
        let reference = ScriptedChannel::new(reference_replies(&COUNTS));
        let session = DifferentialSession::new(
            SubjectEngine::new(subject.clone()),
            ReferenceEngine::new(reference).expect("reference"),
            replay_file(),
        );

        let report = session.run();

        assert!(report.passed());
        assert_eq!(report.verdicts.len(), 5);
        assert_eq!(report.matches(), 5);
        assert_eq!(subject.count_written("perftdiv 1"), 5);
        assert_eq!(report.verdicts[4].stimulus.line_number, Some(5));
    }

    #[test]
    fn wrong_answer_on_third_position_stops_after_three_queries() {
        let subject = ScriptedChannel::new(["20", "48", "15", "6", "44"]);
        let reference = ScriptedChannel::new(reference_replies(&COUNTS));
        let session = DifferentialSession::new(
            SubjectEngine::new(subject.clone()),
            ReferenceEngine::new(reference.clone()).expect("reference"),
            replay_file(),
        );

        let report = session.run();

        assert_eq!(report.outcome, SessionOutcome::Diverged { ordinal: 3 });
        assert_eq!(subject.count_written("perftdiv"), 3);
        assert_eq!(reference.count_written("divide"), 3);
        let divergence = report.divergence().expect("divergence");
        assert_eq!(divergence.stimulus.position, POSITIONS[2]);
        assert_eq!(
            (divergence.subject_nodes, divergence.reference_nodes),
            (15, 14)
        );
    }

    #[test]
    fn subject_is_queried_before_the_reference() {
        let subject = ScriptedChannel::new(["20"]);
        let reference = ScriptedChannel::new(Vec::<String>::new());
        let session = DifferentialSession::new(
            SubjectEngine::new(subject.clone()),
            ReferenceEngine::new(reference.clone()).expect("reference"),
            replay_file(),
        );

        let report = session.run();

        assert!(matches!(
            report.outcome,
            SessionOutcome::Aborted { ordinal: 1, .. }
        ));
        assert_eq!(subject.count_written("perftdiv"), 1);
        assert_eq!(reference.count_written("divide"), 1);
    }

    #[test]
    fn blank_replay_lines_are_skipped_without_consuming_ordinals() {
        let text = format!("\n{}\n   \n{}\n", POSITIONS[0], POSITIONS[1]);
        let source = StimulusSource::replay("positions.fen", Box::new(Cursor::new(text)));
        let session = DifferentialSession::new(
            SubjectEngine::new(ScriptedChannel::new(["20", "48"])),
            ReferenceEngine::new(ScriptedChannel::new(reference_replies(&[20, 48])))
                .expect("reference"),
            source,
        );

        let report = session.run();

        assert!(report.passed());
        let ordinals: Vec<_> = report
            .verdicts
            .iter()
            .map(|verdict| (verdict.stimulus.ordinal, verdict.stimulus.line_number))
            .collect();
        assert_eq!(ordinals, vec![(1, Some(2)), (2, Some(4))]);
    }

    #[test]
    fn generator_budget_bounds_the_session() {
        // Each generated position is followed by its subject answer.
        let subject_lines = (0..1200).flat_map(|_| [POSITIONS[0].to_string(), "20".to_string()]);
        let subject = ScriptedChannel::new(subject_lines);
        let reference = ScriptedChannel::new(reference_replies(&[20; 1200]));
        let session = DifferentialSession::new(
            SubjectEngine::new(subject.clone()),
            ReferenceEngine::new(reference).expect("reference"),
            StimulusSource::generate(DEFAULT_GENERATED_STIMULI),
        );

        let report = session.run();

        assert!(report.passed());
        assert_eq!(report.mode, "generate");
        assert_eq!(report.verdicts.len(), 1000);
        assert_eq!(subject.count_written("randompos"), 1000);
    }

    #[test]
    fn empty_generated_position_counts_against_the_budget() {
        let subject = ScriptedChannel::new(["", POSITIONS[0], "20", ""]);
        let reference = ScriptedChannel::new(reference_replies(&[20]));
        let session = DifferentialSession::new(
            SubjectEngine::new(subject.clone()),
            ReferenceEngine::new(reference).expect("reference"),
            StimulusSource::generate(3),
        );

        let report = session.run();

        assert!(report.passed());
        assert_eq!(report.skipped, 2);
        assert_eq!(report.verdicts.len(), 1);
        assert_eq!(report.verdicts[0].stimulus.ordinal, 2);
        assert_eq!(subject.count_written("randompos"), 3);
    }

    #[test]
    fn subject_closing_mid_session_aborts_with_the_stimulus_ordinal() {
        let subject = ScriptedChannel::new(["20", "48"]);
        let reference = ScriptedChannel::new(reference_replies(&COUNTS));
        let session = DifferentialSession::new(
            SubjectEngine::new(subject),
            ReferenceEngine::new(reference).expect("reference"),
            replay_file(),
        );

        let report = session.run();

        match &report.outcome {
            SessionOutcome::Aborted { ordinal, reason } => {
                assert_eq!(*ordinal, 3);
                assert!(reason.contains("closed its output"), "{reason}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.matches(), 2);
    }
}
