#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub const KRAMNIK_PGN: &str = "[Event \"Dortmund\"]\n[White \"Kramnik, V\"]\n[Black \"Leko, P\"]\n[Result \"1/2-1/2\"]\n\n1. d4 Nf6 2. c4 e6 1/2-1/2\n\n";

/// Stand-in for ccore: honours `-l`, `-i` and `-o`, copies databases
/// verbatim and answers the findbuggypos protocol on stdin.
///
/// Options are read the way ccore reads them: an option without `=value`
/// takes the next word as its value unless that word starts with `-`, and
/// switches only accept boolean values. Each argv is appended to
/// `$FAKE_ARGV`, each verb to `$FAKE_CALLS`.
///
/// Behaviour knobs come from the environment:
/// `FAKE_CORRUPT` rewrites `e6` to `e5` when copying out of a CFDB,
/// `FAKE_INVALID` makes validatedb omit its success line,
/// `FAKE_FAIL_VERB` makes that verb exit 3,
/// `FAKE_WRONG_AT` makes the Nth perftdiv answer 21 instead of 20,
/// `FAKE_CHATTY` prints progress lines on stdout for database verbs.
const FAKE_CCORE: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_ARGV"
log= in= out= verb=
check_bool() {
  case "$2" in
    ""|true|false|yes|no|1|0) ;;
    *) echo "Invalid value specified for option '$1'" >&2; exit 1 ;;
  esac
}
while [ $# -gt 0 ]; do
  case "$1" in
    --*=*)
      opt=${1%%=*}; val=${1#*=}; shift
      check_bool "$opt" "$val" ;;
    -*)
      opt=$1; shift; val=
      if [ $# -gt 0 ] && [ "${1#-}" = "$1" ]; then val=$1; shift; fi
      case "$opt" in
        -l) log=$val ;;
        -i) in=$val ;;
        -o) out=$val ;;
        --quiet|--debuglog|--logcomms) check_bool "$opt" "$val" ;;
      esac ;;
    *) if [ -z "$verb" ]; then verb=$1; fi; shift ;;
  esac
done
if [ -z "$verb" ]; then
  echo "No command specified" >&2
  exit 1
fi
echo "$verb" >> "$FAKE_CALLS"
if [ -n "$FAKE_CHATTY" ] && [ "$verb" != findbuggypos ]; then
  echo "Progress: 1 game processed"
fi
if [ -n "$FAKE_FAIL_VERB" ] && [ "$verb" = "$FAKE_FAIL_VERB" ]; then
  [ -n "$log" ] && echo "ERR $verb failed" > "$log"
  exit 3
fi
case "$verb" in
  copydb)
    case "$in" in
      *.cfdb) if [ -n "$FAKE_CORRUPT" ]; then sed 's/e6/e5/' "$in" > "$out"; else cp "$in" "$out"; fi ;;
      *) cp "$in" "$out" ;;
    esac
    echo "Successfully copied database" > "$log" ;;
  validatedb)
    if [ -n "$FAKE_INVALID" ]; then echo "WRN index mismatch" > "$log"; else echo "Database is valid" > "$log"; fi ;;
  findbuggypos)
    n=0
    while read -r cmd arg; do
      case "$cmd" in
        randompos) echo "$FAKE_FEN" ;;
        perftdiv)
          n=$((n + 1))
          if [ "$n" = "$FAKE_WRONG_AT" ]; then echo 21; else echo 20; fi ;;
      esac
    done ;;
  *)
    [ -n "$log" ] && echo "$verb done" > "$log"
    [ -n "$out" ] && echo "$verb" > "$out" ;;
esac
exit 0
"#;

/// Reference engine that reports 20 nodes for every position.
const FAKE_REFERENCE: &str = r#"#!/bin/sh
echo "Fake reference 1.0"
while read -r cmd arg; do
  case "$cmd" in
    divide) echo "a2a3 1"; echo "20 nodes in 0.01 sec" ;;
  esac
done
"#;

pub struct Harness {
    _temp: TempDir,
    pub root: PathBuf,
    pub ccore: PathBuf,
    pub reference: PathBuf,
    pub temp_dir: PathBuf,
    pub test_dir: PathBuf,
    pub settings: PathBuf,
    pub calls: PathBuf,
    pub argv: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let test_dir = root.join("test");
        fs::create_dir_all(test_dir.join("pgn")).expect("create pgn dir");
        fs::create_dir_all(test_dir.join("cfdb")).expect("create cfdb dir");
        fs::create_dir_all(test_dir.join("config")).expect("create config dir");
        fs::write(test_dir.join("pgn/Kramnik.pgn"), KRAMNIK_PGN).expect("write Kramnik.pgn");
        fs::write(test_dir.join("pgn/Boris_Spassky.pgn"), KRAMNIK_PGN).expect("write Spassky");
        fs::write(test_dir.join("cfdb/eco.cfdb"), "eco").expect("write eco.cfdb");
        fs::write(test_dir.join("config/test.cfg"), "").expect("write config");

        let settings = root.join("settings.json");
        fs::write(&settings, br#"{"schema_version":1}"#).expect("write settings");

        let ccore = write_script(&root.join("bin/ccore"), FAKE_CCORE);
        let reference = write_script(&root.join("bin/reference"), FAKE_REFERENCE);

        Self {
            temp_dir: root.join("tmp"),
            calls: root.join("calls.txt"),
            argv: root.join("argv.txt"),
            _temp: temp,
            root,
            ccore,
            reference,
            test_dir,
            settings,
        }
    }

    /// Harness invocation with the fake ccore, test tree and settings wired in.
    pub fn command(&self) -> Command {
        self.command_with_ccore(&self.ccore)
    }

    pub fn command_with_ccore(&self, ccore: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ccharness"));
        cmd.arg("--ccore")
            .arg(ccore)
            .arg("--test-dir")
            .arg(&self.test_dir)
            .arg("--config")
            .arg(self.test_dir.join("config/test.cfg"))
            .arg("--temp-dir")
            .arg(&self.temp_dir)
            .arg("--settings")
            .arg(&self.settings)
            .env("FAKE_CALLS", &self.calls)
            .env("FAKE_ARGV", &self.argv)
            .env("CCHARNESS_LOG", "warn")
            .env_remove("CCHARNESS_CCORE")
            .env_remove("CCHARNESS_REFERENCE_ENGINE")
            .env_remove("FAKE_CORRUPT")
            .env_remove("FAKE_INVALID")
            .env_remove("FAKE_FAIL_VERB")
            .env_remove("FAKE_WRONG_AT")
            .env_remove("FAKE_CHATTY")
            .env_remove("FAKE_FEN");
        cmd
    }

    pub fn run(&self, cmd: &mut Command) -> Output {
        cmd.output().expect("run ccharness")
    }

    /// Verbs the fake ccore was launched with, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Arguments (after the program) of every fake ccore launch, in order.
    pub fn argv(&self) -> Vec<Vec<String>> {
        fs::read_to_string(&self.argv)
            .unwrap_or_default()
            .lines()
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect()
    }
}

pub fn write_script(path: &Path, body: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create script dir");
    }
    fs::write(path, body).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path.to_path_buf()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}):\n{}\nstderr:\n{}",
            stdout(output),
            stderr(output)
        )
    })
}
