use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cancel;
mod child;
mod cli;
mod command;
mod context;
mod differential;
mod engine;
mod failure;
mod invoker;
mod launch;
mod linediff;
mod logscan;
mod pipeline;
mod report;
mod roundtrip;
mod settings;
mod suites;
mod util;

use cancel::{CancelToken, Cancelled};
use cli::{Command, GlobalArgs, RootArgs};
use context::{ContextOverrides, HarnessContext};
use differential::SessionOutcome;
use invoker::ProcessInvoker;
use launch::DiagnosticTool;
use pipeline::PipelineVerdict;

/// Filter directives for harness logging, e.g. `CCHARNESS_LOG=debug`.
const LOG_ENV: &str = "CCHARNESS_LOG";

/// How a run ended, mapped onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Passed,
    Failed,
    Interrupted,
}

impl Status {
    fn exit_code(self) -> ExitCode {
        match self {
            Status::Passed => ExitCode::SUCCESS,
            Status::Failed => ExitCode::from(1),
            Status::Interrupted => ExitCode::from(2),
        }
    }
}

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    match run(args) {
        Ok(status) => status.exit_code(),
        Err(err) => {
            if err.is::<Cancelled>() {
                eprintln!("ccharness: cancelled");
            } else {
                eprintln!("ccharness: {err:#}");
            }
            Status::Interrupted.exit_code()
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: RootArgs) -> Result<Status> {
    let cancel = CancelToken::install()?;
    let settings = settings::load_settings_optional(args.global.settings.as_deref())?;
    let overrides = overrides(&args.global, &args.command);
    let ctx = HarnessContext::resolve(&settings, overrides, cancel)?;
    let invoker = ProcessInvoker::new(&ctx.launch, &ctx.cancel);
    let json = args.global.json;

    match args.command {
        Command::Roundtrip(roundtrip) => {
            let plan = roundtrip::RoundTripPlan::resolve(&ctx, roundtrip.input)?;
            let verdict = roundtrip::check_round_trip(&ctx, &invoker, &plan)?;
            emit(json, "roundtrip", verdict.passed(), &verdict, report::render_round_trip)?;
            Ok(if verdict.cancelled() {
                Status::Interrupted
            } else if verdict.passed() {
                Status::Passed
            } else {
                Status::Failed
            })
        }
        Command::Classify(classify) => {
            let plan = suites::classify(
                &ctx,
                suites::ClassifyOptions {
                    input: classify.input,
                    output: classify.output,
                    eco: classify.eco,
                    first_game: classify.first_game,
                    last_game: classify.last_game,
                    log_comms: classify.log_comms,
                },
            )?;
            finish_pipeline(json, "classify", &plan.run(&ctx, &invoker))
        }
        Command::Analyze(analyze) => {
            let plan = suites::analyze(
                &ctx,
                suites::AnalyzeOptions {
                    input: analyze.input,
                    output: analyze.output,
                    time_limit: analyze.time_limit,
                    depth: analyze.depth,
                    first_game: analyze.first_game,
                    last_game: analyze.last_game,
                    engine: analyze.engine,
                },
            )?;
            finish_pipeline(json, "analyze", &plan.run(&ctx, &invoker))
        }
        Command::Epd(epd) => {
            let plan = suites::epd(
                &ctx,
                suites::EpdOptions {
                    epd_file: epd.epd_file,
                    time_control: epd.time_control,
                    engine: epd.engine,
                },
            )?;
            finish_pipeline(json, "epd", &plan.run(&ctx, &invoker))
        }
        Command::Tournament(tournament) => {
            let plan = suites::tournament(
                &ctx,
                suites::TournamentOptions {
                    engine1: tournament.engine1,
                    engine2: tournament.engine2,
                    games: tournament.games,
                    time_limit: tournament.time_limit,
                    eco: tournament.eco,
                    log_comms: tournament.log_comms,
                },
            )?;
            finish_pipeline(json, "tournament", &plan.run(&ctx, &invoker))
        }
        Command::CreateEco(create) => {
            let plan = suites::create_eco(
                &ctx,
                suites::CreateEcoOptions {
                    input: create.input,
                    output: create.output,
                },
            )?;
            finish_pipeline(json, "create-eco", &plan.run(&ctx, &invoker))
        }
        Command::FindBuggyPos(find) => {
            let session = suites::find_buggy_pos(
                &ctx,
                suites::FindBuggyPosOptions {
                    count: find.count,
                    replay: find.replay,
                },
            )?;
            emit(json, "find-buggy-pos", session.passed(), &session, report::render_session)?;
            Ok(match session.outcome {
                SessionOutcome::Completed => Status::Passed,
                SessionOutcome::Diverged { .. } => Status::Failed,
                SessionOutcome::Aborted { .. } | SessionOutcome::Cancelled { .. } => {
                    Status::Interrupted
                }
            })
        }
    }
}

fn overrides(global: &GlobalArgs, command: &Command) -> ContextOverrides {
    let diagnostic = if global.leakcheck {
        Some(DiagnosticTool::LeakCheck)
    } else if global.profile {
        Some(DiagnosticTool::Profile)
    } else {
        None
    };
    let reference_engine = match command {
        Command::FindBuggyPos(find) => find.reference.clone(),
        _ => None,
    };
    ContextOverrides {
        ccore: global.ccore.clone(),
        config_file: global.config.clone(),
        test_dir: global.test_dir.clone(),
        temp_dir: global.temp_dir.clone(),
        reference_engine,
        diagnostic,
    }
}

fn finish_pipeline(json: bool, command: &str, verdict: &PipelineVerdict) -> Result<Status> {
    emit(json, command, verdict.passed(), verdict, report::render_pipeline)?;
    Ok(if verdict.cancelled() {
        Status::Interrupted
    } else if verdict.passed() {
        Status::Passed
    } else {
        Status::Failed
    })
}

fn emit<T: Serialize>(
    json: bool,
    command: &str,
    passed: bool,
    verdict: &T,
    render: fn(&T) -> String,
) -> Result<()> {
    if json {
        println!("{}", report::verdict_json(command, passed, verdict)?);
    } else {
        print!("{}", render(verdict));
    }
    Ok(())
}
