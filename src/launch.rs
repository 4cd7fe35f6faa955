//! Host platform strategy for launching ccore.
//!
//! Platform-dependent choices (diagnostic wrapper, path separators, default
//! engines and config names) are resolved once into a [`LaunchStrategy`] when
//! the harness context is built. The invoker applies the strategy without
//! branching on the platform itself.
use crate::command::CommandLine;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn host() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Other,
        }
    }

    /// Base name of the engine config file under `<test_dir>/config/`.
    pub fn config_name(self) -> Option<&'static str> {
        match self {
            Platform::Linux => Some("linux"),
            Platform::MacOs => Some("macosx"),
            Platform::Windows => Some("windows"),
            Platform::Other => None,
        }
    }

    /// Engines the harness scripts pit against each other by default.
    pub fn default_engines(self) -> Option<(&'static str, &'static str)> {
        match self {
            Platform::Linux => Some(("komodo", "stockfish231")),
            Platform::MacOs => Some(("critter", "stockfish4")),
            Platform::Windows => Some(("komodo3", "stockfish3")),
            Platform::Other => None,
        }
    }

    pub fn ccore_file_name(self) -> &'static str {
        match self {
            Platform::Windows => "ccore.exe",
            _ => "ccore",
        }
    }

    pub fn path_style(self) -> PathStyle {
        match self {
            Platform::Windows => PathStyle::Backslash,
            _ => PathStyle::Native,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStyle {
    Native,
    Backslash,
}

impl PathStyle {
    pub fn normalize(self, arg: &str) -> String {
        match self {
            PathStyle::Native => arg.to_string(),
            PathStyle::Backslash => arg.replace('/', "\\"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticTool {
    LeakCheck,
    Profile,
}

/// A leak checker or profiler that every ccore invocation runs underneath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticWrapper {
    pub tool: DiagnosticTool,
    pub argv: Vec<String>,
    /// Trace bundle the tool writes; a stale one confuses the next run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<PathBuf>,
}

impl DiagnosticWrapper {
    pub fn select(platform: Platform, tool: DiagnosticTool, temp_dir: &Path) -> Result<Self> {
        let iprofiler = |mode: &[&str]| {
            let mut argv = vec!["iprofiler".to_string()];
            argv.extend(mode.iter().map(|arg| arg.to_string()));
            argv.push("-d".to_string());
            argv.push(temp_dir.display().to_string());
            argv
        };
        let (argv, trace_dir) = match (tool, platform) {
            (DiagnosticTool::LeakCheck, Platform::Linux) => (vec!["valgrind".to_string()], None),
            (DiagnosticTool::LeakCheck, Platform::MacOs) => (
                iprofiler(&["-T", "1000s", "-leaks"]),
                Some(temp_dir.join("ccore.dtps")),
            ),
            (DiagnosticTool::Profile, Platform::MacOs) => (
                iprofiler(&["-T1000s", "-timeprofiler"]),
                Some(temp_dir.join("ccore.dtps")),
            ),
            (DiagnosticTool::LeakCheck, _) => {
                return Err(anyhow!("no leak check tool on this platform"));
            }
            (DiagnosticTool::Profile, _) => {
                return Err(anyhow!("no profiling tool on this platform"));
            }
        };
        Ok(Self {
            tool,
            argv,
            trace_dir,
        })
    }

    /// Remove the trace bundle left behind by a previous run.
    pub fn prepare(&self) -> Result<()> {
        if let Some(trace_dir) = &self.trace_dir {
            if trace_dir.exists() {
                fs::remove_dir_all(trace_dir)
                    .with_context(|| format!("remove stale trace {}", trace_dir.display()))?;
            }
        }
        Ok(())
    }

    pub fn invocation(&self) -> String {
        shell_words::join(&self.argv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchStrategy {
    pub platform: Platform,
    pub path_style: PathStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<DiagnosticWrapper>,
}

impl LaunchStrategy {
    pub fn resolve(
        platform: Platform,
        tool: Option<DiagnosticTool>,
        temp_dir: &Path,
    ) -> Result<Self> {
        let wrapper = tool
            .map(|tool| DiagnosticWrapper::select(platform, tool, temp_dir))
            .transpose()?;
        if let Some(wrapper) = &wrapper {
            wrapper.prepare()?;
            tracing::info!(tool = %wrapper.invocation(), "using diagnostic wrapper");
        }
        Ok(Self {
            platform,
            path_style: platform.path_style(),
            wrapper,
        })
    }

    /// Strategy for the host with no wrapper.
    pub fn plain() -> Self {
        let platform = Platform::host();
        Self {
            platform,
            path_style: platform.path_style(),
            wrapper: None,
        }
    }

    /// Apply path normalization and the diagnostic wrapper to a command.
    ///
    /// The wrapper argv is left untouched; only the wrapped command's program
    /// and arguments are path-normalized.
    pub fn apply(&self, command: &CommandLine) -> CommandLine {
        let program = self
            .path_style
            .normalize(&command.program.display().to_string());
        let args = command
            .args
            .iter()
            .map(|arg| self.path_style.normalize(arg))
            .collect();
        let normalized = CommandLine::new(program, args);
        match &self.wrapper {
            Some(wrapper) => normalized.prefixed(&wrapper.argv),
            None => normalized,
        }
    }
}
