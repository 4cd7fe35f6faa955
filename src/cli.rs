//! CLI argument parsing for the ccore test harness.
use crate::differential::DEFAULT_GENERATED_STIMULI;
use crate::suites::{DEFAULT_EPD_TIME, DEFAULT_TOURNAMENT_GAMES, DEFAULT_TOURNAMENT_TIME};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "ccharness",
    version,
    about = "Test harness for the ccore chess engine binary",
    after_help = "Examples:\n  ccharness --test-dir ~/chesscore/test roundtrip\n  ccharness roundtrip --input games.pgn --json\n  ccharness --leakcheck classify --first-game 1 --last-game 50\n  ccharness find-buggy-pos --count 500 --reference 'critter-16a'\n  ccharness find-buggy-pos --replay positions.fen",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// ccore executable (default: <test-dir>/../bin/ccore, then PATH)
    #[arg(long, value_name = "PATH", global = true)]
    pub ccore: Option<PathBuf>,

    /// Engine configuration file passed to ccore with -c
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// ccore test tree holding pgn/, cfdb/ and config/
    #[arg(long, value_name = "DIR", global = true)]
    pub test_dir: Option<PathBuf>,

    /// Scratch directory for logs and copied databases
    #[arg(long, value_name = "DIR", global = true)]
    pub temp_dir: Option<PathBuf>,

    /// Harness settings file (default: <config dir>/ccharness/settings.json)
    #[arg(long, value_name = "PATH", global = true)]
    pub settings: Option<PathBuf>,

    /// Run ccore under the platform's leak detector
    #[arg(long, global = true, conflicts_with = "profile")]
    pub leakcheck: bool,

    /// Run ccore under the platform's profiler
    #[arg(long, global = true)]
    pub profile: bool,

    /// Emit the verdict as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Roundtrip(RoundtripArgs),
    Classify(ClassifyArgs),
    Analyze(AnalyzeArgs),
    Epd(EpdArgs),
    Tournament(TournamentArgs),
    CreateEco(CreateEcoArgs),
    FindBuggyPos(FindBuggyPosArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Copy PGN to CFDB and back, and compare with a direct PGN copy")]
pub struct RoundtripArgs {
    /// Source PGN (default: <test-dir>/pgn/Kramnik.pgn)
    #[arg(long, value_name = "PGN")]
    pub input: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Copy games and classify them against an ECO database")]
pub struct ClassifyArgs {
    /// Input database (default: <test-dir>/pgn/Boris_Spassky.pgn)
    #[arg(long, value_name = "DB")]
    pub input: Option<PathBuf>,

    /// Output database (default: <temp-dir>/classified.cfdb)
    #[arg(long, value_name = "CFDB")]
    pub output: Option<PathBuf>,

    /// ECO classification database (default: <test-dir>/cfdb/eco.cfdb)
    #[arg(long, value_name = "CFDB")]
    pub eco: Option<PathBuf>,

    /// First game to copy
    #[arg(long, value_name = "N")]
    pub first_game: Option<u64>,

    /// Last game to copy
    #[arg(long, value_name = "N")]
    pub last_game: Option<u64>,

    /// Log engine communications
    #[arg(long)]
    pub log_comms: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Analyze games with an engine")]
pub struct AnalyzeArgs {
    #[arg(long, value_name = "DB")]
    pub input: PathBuf,

    #[arg(long, value_name = "DB")]
    pub output: PathBuf,

    /// Time limit per move (default 10s when no depth is given)
    #[arg(long, value_name = "TIME")]
    pub time_limit: Option<String>,

    /// Depth limit; ignored when --time-limit is also given
    #[arg(long, value_name = "PLIES")]
    pub depth: Option<u32>,

    #[arg(long, value_name = "N")]
    pub first_game: Option<u64>,

    #[arg(long, value_name = "N")]
    pub last_game: Option<u64>,

    /// Engine to analyze with (default: the platform's primary engine)
    #[arg(long, value_name = "NAME")]
    pub engine: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Run an engine over an EPD test suite")]
pub struct EpdArgs {
    #[arg(long, value_name = "EPD")]
    pub epd_file: PathBuf,

    #[arg(long, value_name = "TIME", default_value = DEFAULT_EPD_TIME)]
    pub time_control: String,

    #[arg(long, value_name = "NAME")]
    pub engine: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Play a match between two engines")]
pub struct TournamentArgs {
    #[arg(long, value_name = "NAME")]
    pub engine1: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub engine2: Option<String>,

    /// Number of games
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TOURNAMENT_GAMES)]
    pub games: u32,

    #[arg(long, value_name = "TIME", default_value = DEFAULT_TOURNAMENT_TIME)]
    pub time_limit: String,

    /// ECO classification database (default: <test-dir>/cfdb/eco.cfdb)
    #[arg(long, value_name = "CFDB")]
    pub eco: Option<PathBuf>,

    #[arg(long)]
    pub log_comms: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Rebuild the ECO database and its opening tree")]
pub struct CreateEcoArgs {
    /// ECO source PGN (default: <test-dir>/../doc/OpeningClassification/eco.pgn)
    #[arg(long, value_name = "PGN")]
    pub input: Option<PathBuf>,

    /// Output database (default: <test-dir>/cfdb/eco.cfdb)
    #[arg(long, value_name = "CFDB")]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Compare ccore's move generator against a reference engine")]
pub struct FindBuggyPosArgs {
    /// Number of random positions to try
    #[arg(long, value_name = "N", default_value_t = DEFAULT_GENERATED_STIMULI)]
    pub count: usize,

    /// Replay positions from a file (one FEN per line) instead of generating
    #[arg(long, value_name = "FILE", conflicts_with = "count")]
    pub replay: Option<PathBuf>,

    /// Reference engine command line
    #[arg(long, value_name = "CMD")]
    pub reference: Option<String>,
}
