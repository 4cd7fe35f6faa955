//! The immutable context every harness command runs against.
//!
//! Built once at startup from CLI flags, the settings file, the environment and
//! platform defaults (in that order of precedence), then passed by reference
//! to the invoker, pipelines and the differential comparator.
use crate::cancel::CancelToken;
use crate::launch::{DiagnosticTool, LaunchStrategy, Platform};
use crate::settings::HarnessSettings;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CCORE_ENV: &str = "CCHARNESS_CCORE";
pub const REFERENCE_ENGINE_ENV: &str = "CCHARNESS_REFERENCE_ENGINE";

/// Values given on the command line; each one beats the settings file.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub ccore: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub test_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub reference_engine: Option<String>,
    pub diagnostic: Option<DiagnosticTool>,
}

#[derive(Debug, Clone)]
pub struct HarnessContext {
    pub ccore: PathBuf,
    pub config_file: Option<PathBuf>,
    pub test_dir: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub primary_engine: Option<String>,
    pub secondary_engine: Option<String>,
    pub reference_engine: Option<String>,
    pub launch: LaunchStrategy,
    pub cancel: CancelToken,
}

impl HarnessContext {
    /// A context with no config file, engines or wrapper.
    pub fn new(ccore: PathBuf, temp_dir: PathBuf, cancel: CancelToken) -> Self {
        Self {
            ccore,
            config_file: None,
            test_dir: None,
            temp_dir,
            primary_engine: None,
            secondary_engine: None,
            reference_engine: None,
            launch: LaunchStrategy::plain(),
            cancel,
        }
    }

    pub fn resolve(
        settings: &HarnessSettings,
        overrides: ContextOverrides,
        cancel: CancelToken,
    ) -> Result<Self> {
        resolve_with_env(settings, overrides, cancel, Platform::host(), |key| {
            std::env::var(key).ok().filter(|value| !value.trim().is_empty())
        })
    }

    pub fn temp_path(&self, file_name: &str) -> PathBuf {
        self.temp_dir.join(file_name)
    }

    pub fn require_config_file(&self) -> Result<&Path> {
        self.config_file
            .as_deref()
            .ok_or_else(|| anyhow!("no engine config file (pass --config or --test-dir)"))
    }

    /// Resolve a fixture under the ccore test tree, e.g. `cfdb/eco.cfdb`.
    pub fn test_fixture(&self, rel: &str, flag: &str) -> Result<PathBuf> {
        self.test_dir
            .as_deref()
            .map(|dir| dir.join(rel))
            .ok_or_else(|| anyhow!("pass {flag} or --test-dir to locate {rel}"))
    }

    pub fn primary_engine(&self) -> Result<&str> {
        self.primary_engine
            .as_deref()
            .ok_or_else(|| anyhow!("no default engine on this platform (pass --engine)"))
    }

    pub fn secondary_engine(&self) -> Result<&str> {
        self.secondary_engine
            .as_deref()
            .ok_or_else(|| anyhow!("no default second engine on this platform (pass --engine2)"))
    }
}

fn resolve_with_env(
    settings: &HarnessSettings,
    overrides: ContextOverrides,
    cancel: CancelToken,
    platform: Platform,
    env: impl Fn(&str) -> Option<String>,
) -> Result<HarnessContext> {
    let test_dir = overrides.test_dir.or_else(|| settings.test_dir.clone());

    let temp_dir = overrides
        .temp_dir
        .or_else(|| settings.temp_dir.clone())
        .unwrap_or_else(std::env::temp_dir);
    if !temp_dir.exists() {
        tracing::info!(path = %temp_dir.display(), "creating temp directory");
    }
    fs::create_dir_all(&temp_dir)
        .with_context(|| format!("create temp directory {}", temp_dir.display()))?;

    let ccore_candidate = overrides
        .ccore
        .or_else(|| settings.ccore.clone())
        .or_else(|| env(CCORE_ENV).map(PathBuf::from))
        .or_else(|| {
            // The harness scripts live in <root>/test and ccore builds into <root>/bin.
            let root = test_dir.as_deref()?.parent()?;
            Some(root.join("bin").join(platform.ccore_file_name()))
        })
        .unwrap_or_else(|| PathBuf::from(platform.ccore_file_name()));
    let ccore = resolve_executable(&ccore_candidate)?;

    let config_file = match overrides.config_file.or_else(|| settings.config_file.clone()) {
        Some(path) => {
            if !path.is_file() {
                return Err(anyhow!(
                    "configuration file {} does not exist",
                    path.display()
                ));
            }
            Some(path)
        }
        None => match test_dir.as_deref() {
            Some(dir) => Some(resolve_config_file(dir, platform)?),
            None => None,
        },
    };

    let defaults = platform.default_engines();
    let primary_engine = settings
        .primary_engine
        .clone()
        .or_else(|| defaults.map(|(primary, _)| primary.to_string()));
    let secondary_engine = settings
        .secondary_engine
        .clone()
        .or_else(|| defaults.map(|(_, secondary)| secondary.to_string()));
    let reference_engine = overrides
        .reference_engine
        .or_else(|| settings.reference_engine.clone())
        .or_else(|| env(REFERENCE_ENGINE_ENV));

    let launch = LaunchStrategy::resolve(platform, overrides.diagnostic, &temp_dir)?;

    tracing::info!(path = %ccore.display(), "using ccore binary");
    tracing::info!(path = %temp_dir.display(), "using temp directory");
    if let Some(config_file) = &config_file {
        tracing::info!(path = %config_file.display(), "using configuration file");
    }

    Ok(HarnessContext {
        ccore,
        config_file,
        test_dir,
        temp_dir,
        primary_engine,
        secondary_engine,
        reference_engine,
        launch,
        cancel,
    })
}

/// `<test_dir>/config/<platform>_local.cfg`, falling back to `<platform>.cfg`.
pub fn resolve_config_file(test_dir: &Path, platform: Platform) -> Result<PathBuf> {
    let name = platform
        .config_name()
        .ok_or_else(|| anyhow!("no configuration for this platform"))?;
    let config_dir = test_dir.join("config");
    let local = config_dir.join(format!("{name}_local.cfg"));
    if local.is_file() {
        return Ok(local);
    }
    let shared = config_dir.join(format!("{name}.cfg"));
    if shared.is_file() {
        return Ok(shared);
    }
    Err(anyhow!(
        "configuration file {} does not exist",
        shared.display()
    ))
}

/// Accept an executable path, or look a bare name up on PATH.
fn resolve_executable(candidate: &Path) -> Result<PathBuf> {
    let is_bare_name = candidate.components().count() == 1 && !candidate.is_absolute();
    let path = if is_bare_name && !candidate.exists() {
        which::which(candidate)
            .with_context(|| format!("cannot find ccore executable {}", candidate.display()))?
    } else {
        candidate.to_path_buf()
    };
    if !path.is_file() || !is_executable(&path) {
        return Err(anyhow!(
            "cannot find ccore executable '{}'",
            path.display()
        ));
    }
    Ok(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
