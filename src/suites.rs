//! The stock ccore test suites, one per harness subcommand.
//!
//! Each builder resolves its defaults against the [`HarnessContext`] and
//! returns a [`SuitePlan`]: a pipeline plus the artifact it starts from.
//! Unlike the round trip these suites have no success phrase to look for, so
//! their stages are judged on exit status; log markers are still reported.
use crate::command::{CommandLine, CommandSpec, Flag, Switch, Verb};
use crate::context::{HarnessContext, REFERENCE_ENGINE_ENV};
use crate::differential::{DifferentialSession, SessionReport, StimulusSource};
use crate::engine::{EngineProcess, ReferenceEngine, SubjectEngine};
use crate::invoker::Invoke;
use crate::pipeline::{Pipeline, PipelineVerdict, Stage, StageParams};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_ANALYZE_TIME: &str = "10s";
pub const DEFAULT_EPD_TIME: &str = "10s";
pub const DEFAULT_TOURNAMENT_TIME: &str = "10m";
pub const DEFAULT_TOURNAMENT_GAMES: u32 = 5;
/// Opening tree depth, in plies, built by `create-eco`.
pub const ECO_TREE_DEPTH: u32 = 100;

const CLASSIFY_INPUT: &str = "pgn/Boris_Spassky.pgn";
const ECO_DATABASE: &str = "cfdb/eco.cfdb";
/// The ECO source PGN, relative to the ccore source root.
const ECO_SOURCE: &str = "doc/OpeningClassification/eco.pgn";

pub struct SuitePlan {
    pub pipeline: Pipeline,
    pub params: StageParams,
}

impl SuitePlan {
    pub fn run(&self, ctx: &HarnessContext, invoker: &dyn Invoke) -> PipelineVerdict {
        self.pipeline.execute(ctx, invoker, self.params.clone())
    }
}

fn debug_command(verb: Verb, log: &Path) -> CommandSpec {
    CommandSpec::new(verb)
        .switch(Switch::DebugLog)
        .path_flag(Flag::Log, log)
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub eco: Option<PathBuf>,
    pub first_game: Option<u64>,
    pub last_game: Option<u64>,
    pub log_comms: bool,
}

/// Copy the selected games, then classify the copy against an ECO database.
pub fn classify(ctx: &HarnessContext, options: ClassifyOptions) -> Result<SuitePlan> {
    let input = match options.input {
        Some(input) => input,
        None => ctx.test_fixture(CLASSIFY_INPUT, "--input")?,
    };
    let eco = match options.eco {
        Some(eco) => eco,
        None => ctx.test_fixture(ECO_DATABASE, "--eco")?,
    };
    let (output, default_output) = match options.output {
        Some(output) => (output, false),
        None => (ctx.temp_path("classified.cfdb"), true),
    };
    let copy_log = ctx.temp_path("ccore1.log");
    let classify_log = ctx.temp_path("ccore2.log");

    let mut copy = {
        let log = copy_log.clone();
        let target = output.clone();
        let (first, last, log_comms) = (options.first_game, options.last_game, options.log_comms);
        Stage::new("copy", copy_log, move |params| {
            Ok(debug_command(Verb::CopyDb, &log)
                .switch_if(Switch::LogComms, log_comms)
                .optional_flag(Flag::FirstGame, first.map(|n| n.to_string()))
                .optional_flag(Flag::LastGame, last.map(|n| n.to_string()))
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Output, &target))
        })
        .requires_input()
        .produces(output)
    };
    if default_output {
        copy = copy.clears_output();
    }

    let classify = {
        let log = classify_log.clone();
        let log_comms = options.log_comms;
        Stage::new("classify", classify_log, move |params| {
            Ok(debug_command(Verb::Classify, &log)
                .switch_if(Switch::LogComms, log_comms)
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Eco, &eco))
        })
        .requires_input()
    };

    Ok(SuitePlan {
        pipeline: Pipeline::new("classify").stage(copy).stage(classify),
        params: StageParams::with_input(input),
    })
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub time_limit: Option<String>,
    pub depth: Option<u32>,
    pub first_game: Option<u64>,
    pub last_game: Option<u64>,
    pub engine: Option<String>,
}

/// Analyze games with one engine, writing an annotated database.
pub fn analyze(ctx: &HarnessContext, options: AnalyzeOptions) -> Result<SuitePlan> {
    let config = ctx.require_config_file()?.to_path_buf();
    let engine = match options.engine {
        Some(engine) => engine,
        None => ctx.primary_engine()?.to_string(),
    };
    let (time_limit, depth) = match (options.time_limit, options.depth) {
        (None, None) => (Some(DEFAULT_ANALYZE_TIME.to_string()), None),
        (Some(time_limit), Some(depth)) => {
            tracing::warn!(depth, "both time limit and depth given; ignoring depth");
            (Some(time_limit), None)
        }
        limits => limits,
    };
    let log = ctx.temp_path("ccore.log");
    let stage = {
        let output = options.output;
        let (first, last) = (options.first_game, options.last_game);
        Stage::new("analyze", log.clone(), move |params| {
            Ok(debug_command(Verb::Analyze, &log)
                .optional_flag(Flag::Time, time_limit.clone())
                .optional_flag(Flag::Depth, depth.map(|d| d.to_string()))
                .optional_flag(Flag::FirstGame, first.map(|n| n.to_string()))
                .optional_flag(Flag::LastGame, last.map(|n| n.to_string()))
                .path_flag(Flag::Config, &config)
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Output, &output)
                .operand(&engine))
        })
        .requires_input()
    };
    Ok(SuitePlan {
        pipeline: Pipeline::new("analyze").stage(stage),
        params: StageParams::with_input(options.input),
    })
}

#[derive(Debug, Clone)]
pub struct EpdOptions {
    pub epd_file: PathBuf,
    pub time_control: String,
    pub engine: Option<String>,
}

/// Run an engine over an EPD test suite.
pub fn epd(ctx: &HarnessContext, options: EpdOptions) -> Result<SuitePlan> {
    let config = ctx.require_config_file()?.to_path_buf();
    let engine = match options.engine {
        Some(engine) => engine,
        None => ctx.primary_engine()?.to_string(),
    };
    let log = ctx.temp_path("ccore.log");
    let time_control = options.time_control;
    let stage = {
        Stage::new("processepd", log.clone(), move |params| {
            Ok(debug_command(Verb::ProcessEpd, &log)
                .path_flag(Flag::Config, &config)
                .path_flag(Flag::Epd, params.input()?)
                .flag(Flag::Time, time_control.clone())
                .operand(&engine))
        })
        .requires_input()
    };
    Ok(SuitePlan {
        pipeline: Pipeline::new("epd").stage(stage),
        params: StageParams::with_input(options.epd_file),
    })
}

#[derive(Debug, Clone)]
pub struct TournamentOptions {
    pub engine1: Option<String>,
    pub engine2: Option<String>,
    pub games: u32,
    pub time_limit: String,
    pub eco: Option<PathBuf>,
    pub log_comms: bool,
}

impl Default for TournamentOptions {
    fn default() -> Self {
        Self {
            engine1: None,
            engine2: None,
            games: DEFAULT_TOURNAMENT_GAMES,
            time_limit: DEFAULT_TOURNAMENT_TIME.to_string(),
            eco: None,
            log_comms: false,
        }
    }
}

/// Play a match between two engines into `<temp>/games.pgn`.
pub fn tournament(ctx: &HarnessContext, options: TournamentOptions) -> Result<SuitePlan> {
    let config = ctx.require_config_file()?.to_path_buf();
    let engine1 = match options.engine1 {
        Some(engine) => engine,
        None => ctx.primary_engine()?.to_string(),
    };
    let engine2 = match options.engine2 {
        Some(engine) => engine,
        None => ctx.secondary_engine()?.to_string(),
    };
    if options.games == 0 {
        return Err(anyhow!("--games must be at least 1"));
    }
    let eco = match options.eco {
        Some(eco) => eco,
        None => ctx.test_fixture(ECO_DATABASE, "--eco")?,
    };
    let log = ctx.temp_path("ccore.log");
    let games_pgn = ctx.temp_path("games.pgn");
    let stage = {
        let target = games_pgn.clone();
        let (games, time_limit, log_comms) =
            (options.games, options.time_limit, options.log_comms);
        Stage::new("tournament", log.clone(), move |_| {
            Ok(debug_command(Verb::Tournament, &log)
                .switch_if(Switch::LogComms, log_comms)
                .path_flag(Flag::Config, &config)
                .path_flag(Flag::Output, &target)
                .path_flag(Flag::Eco, &eco)
                .flag(Flag::FirstGame, games.to_string())
                .flag(Flag::Time, time_limit.clone())
                .operand(&engine1)
                .operand(&engine2))
        })
        .produces(games_pgn)
    };
    Ok(SuitePlan {
        pipeline: Pipeline::new("tournament").stage(stage),
        params: StageParams::default(),
    })
}

#[derive(Debug, Clone, Default)]
pub struct CreateEcoOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Rebuild the ECO classification database and its opening tree.
pub fn create_eco(ctx: &HarnessContext, options: CreateEcoOptions) -> Result<SuitePlan> {
    let input = match options.input {
        Some(input) => input,
        None => ctx
            .test_dir
            .as_deref()
            .and_then(Path::parent)
            .map(|root| root.join(ECO_SOURCE))
            .ok_or_else(|| anyhow!("pass --input or --test-dir to locate {ECO_SOURCE}"))?,
    };
    let output = match options.output {
        Some(output) => output,
        None => ctx.test_fixture(ECO_DATABASE, "--output")?,
    };
    let copy_log = ctx.temp_path("ccore1.log");
    let tree_log = ctx.temp_path("ccore2.log");

    let copy = {
        let log = copy_log.clone();
        let target = output.clone();
        Stage::new("copy", copy_log, move |params| {
            Ok(debug_command(Verb::CopyDb, &log)
                .path_flag(Flag::Input, params.input()?)
                .path_flag(Flag::Output, &target))
        })
        .requires_input()
        .produces(output)
        .clears_output()
    };
    let tree = {
        let log = tree_log.clone();
        Stage::new("buildoptree", tree_log, move |params| {
            Ok(debug_command(Verb::BuildOpTree, &log)
                .path_flag(Flag::Input, params.input()?)
                .flag(Flag::Depth, ECO_TREE_DEPTH.to_string()))
        })
        .requires_input()
    };

    Ok(SuitePlan {
        pipeline: Pipeline::new("create-eco").stage(copy).stage(tree),
        params: StageParams::with_input(input),
    })
}

#[derive(Debug, Clone)]
pub struct FindBuggyPosOptions {
    pub count: usize,
    pub replay: Option<PathBuf>,
}

/// ccore run as a persistent subject: `ccore --quiet=true findbuggypos`.
pub fn subject_command(ctx: &HarnessContext) -> Result<CommandLine> {
    let command = CommandSpec::new(Verb::FindBuggyPos)
        .switch(Switch::Quiet)
        .build(&ctx.ccore)?;
    Ok(ctx.launch.apply(&command))
}

/// Hunt for a position where ccore's move generator disagrees with the
/// reference engine.
pub fn find_buggy_pos(ctx: &HarnessContext, options: FindBuggyPosOptions) -> Result<SessionReport> {
    let reference = ctx.reference_engine.as_deref().ok_or_else(|| {
        anyhow!("no reference engine (pass --reference or set {REFERENCE_ENGINE_ENV})")
    })?;
    let reference = CommandLine::parse(reference)?;
    let source = match &options.replay {
        Some(path) => {
            tracing::info!(path = %path.display(), "reading positions");
            StimulusSource::replay_file(path)?
        }
        None => {
            tracing::info!(count = options.count, "using random positions");
            StimulusSource::generate(options.count)
        }
    };

    let subject = EngineProcess::spawn("subject", &subject_command(ctx)?, &ctx.cancel)?;
    let reference = EngineProcess::spawn("reference", &reference, &ctx.cancel)?;
    let session = DifferentialSession::new(
        SubjectEngine::new(subject),
        ReferenceEngine::new(reference)?,
        source,
    );
    Ok(session.run())
}
