//! Structured command lines for the ccore binary.
//!
//! Callers describe an invocation as a verb plus flag values; nothing is
//! concatenated into a shell string. Validation happens once, in
//! [`CommandSpec::build`], so a malformed request never reaches a process.
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    CopyDb,
    ValidateDb,
    Classify,
    Analyze,
    BuildOpTree,
    ProcessEpd,
    Tournament,
    FindBuggyPos,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::CopyDb => "copydb",
            Verb::ValidateDb => "validatedb",
            Verb::Classify => "classify",
            Verb::Analyze => "analyze",
            Verb::BuildOpTree => "buildoptree",
            Verb::ProcessEpd => "processepd",
            Verb::Tournament => "tournament",
            Verb::FindBuggyPos => "findbuggypos",
        }
    }

    /// Number of engine-name operands the verb takes after its name.
    fn operand_count(self) -> usize {
        match self {
            Verb::Analyze | Verb::ProcessEpd => 1,
            Verb::Tournament => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value-carrying options understood by ccore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Log,
    Config,
    Input,
    Output,
    Time,
    Depth,
    /// `-n`: first game index; `tournament` reads it as the number of games.
    FirstGame,
    LastGame,
    Eco,
    Epd,
}

impl Flag {
    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Log => "-l",
            Flag::Config => "-c",
            Flag::Input => "-i",
            Flag::Output => "-o",
            Flag::Time => "-t",
            Flag::Depth => "-d",
            Flag::FirstGame => "-n",
            Flag::LastGame => "-N",
            Flag::Eco => "-E",
            Flag::Epd => "-e",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Flag::Depth | Flag::FirstGame | Flag::LastGame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Switch {
    DebugLog,
    LogComms,
    Quiet,
}

impl Switch {
    pub fn as_str(self) -> &'static str {
        match self {
            Switch::DebugLog => "--debuglog",
            Switch::LogComms => "--logcomms",
            Switch::Quiet => "--quiet",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    verb: Verb,
    flags: BTreeMap<Flag, String>,
    switches: BTreeSet<Switch>,
    operands: Vec<String>,
    conflicts: Vec<Flag>,
}

impl CommandSpec {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            flags: BTreeMap::new(),
            switches: BTreeSet::new(),
            operands: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn flag(mut self, flag: Flag, value: impl Into<String>) -> Self {
        if self.flags.insert(flag, value.into()).is_some() {
            self.conflicts.push(flag);
        }
        self
    }

    pub fn path_flag(self, flag: Flag, path: &Path) -> Self {
        self.flag(flag, path.display().to_string())
    }

    pub fn optional_flag(self, flag: Flag, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.flag(flag, value),
            None => self,
        }
    }

    pub fn switch(mut self, switch: Switch) -> Self {
        self.switches.insert(switch);
        self
    }

    pub fn switch_if(self, switch: Switch, enabled: bool) -> Self {
        if enabled {
            self.switch(switch)
        } else {
            self
        }
    }

    pub fn operand(mut self, value: impl Into<String>) -> Self {
        self.operands.push(value.into());
        self
    }

    /// Validate the request and serialize it into an argv for `program`.
    ///
    /// Switches and flags come first, then the verb and its operands, which is
    /// the order ccore's option parser expects. Switches carry an explicit
    /// `=true`: a bare `--quiet` would take the following word as its value.
    pub fn build(&self, program: &Path) -> Result<CommandLine> {
        if let Some(flag) = self.conflicts.first() {
            return Err(anyhow!(
                "{} given more than once for {}",
                flag.as_str(),
                self.verb
            ));
        }
        let expected = self.verb.operand_count();
        if self.operands.len() != expected {
            return Err(anyhow!(
                "{} takes {} operand(s), got {}",
                self.verb,
                expected,
                self.operands.len()
            ));
        }

        let mut args = Vec::new();
        for switch in &self.switches {
            args.push(format!("{}=true", switch.as_str()));
        }
        for (flag, value) in &self.flags {
            validate_value(value).with_context(|| format!("{} value", flag.as_str()))?;
            if flag.is_numeric() && value.parse::<u64>().is_err() {
                return Err(anyhow!(
                    "{} expects a non-negative integer (got {value:?})",
                    flag.as_str()
                ));
            }
            args.push(flag.as_str().to_string());
            args.push(value.clone());
        }
        args.push(self.verb.as_str().to_string());
        for operand in &self.operands {
            validate_value(operand).with_context(|| format!("{} operand", self.verb))?;
            if operand.starts_with('-') {
                return Err(anyhow!(
                    "{} operand {operand:?} looks like an option",
                    self.verb
                ));
            }
            args.push(operand.clone());
        }

        Ok(CommandLine {
            program: program.to_path_buf(),
            args,
        })
    }
}

fn validate_value(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("must not be empty"));
    }
    if value.contains(['\n', '\r', '\0']) {
        return Err(anyhow!("must not contain line breaks or NUL ({value:?})"));
    }
    Ok(())
}

/// A fully resolved program plus argv, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a user-supplied command string (`"critter-16a --uci"`) into argv.
    pub fn parse(command: &str) -> Result<Self> {
        let mut words =
            shell_words::split(command).with_context(|| format!("parse command: {command}"))?;
        if words.is_empty() {
            return Err(anyhow!("command is empty"));
        }
        let program = words.remove(0);
        Ok(Self::new(program, words))
    }

    /// Run `self` underneath `prefix`, e.g. `valgrind ccore ...`.
    pub fn prefixed(&self, prefix: &[String]) -> Self {
        let Some((program, rest)) = prefix.split_first() else {
            return self.clone();
        };
        let mut args = rest.to_vec();
        args.push(self.program.display().to_string());
        args.extend(self.args.iter().cloned());
        Self::new(program, args)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program.display().to_string();
        let words = std::iter::once(program.as_str()).chain(self.args.iter().map(String::as_str));
        f.write_str(&shell_words::join(words))
    }
}
