//! Optional harness settings file.
//!
//! Lets a machine pin its ccore build, engine config and engines without
//! repeating flags. CLI flags still win over anything loaded here.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ccore: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_engine: Option<String>,
    /// Command line of the reference engine used by `find-buggy-pos`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_engine: Option<String>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            ccore: None,
            config_file: None,
            test_dir: None,
            temp_dir: None,
            primary_engine: None,
            secondary_engine: None,
            reference_engine: None,
        }
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ccharness").join("settings.json"))
}

pub fn load_settings(path: &Path) -> Result<HarnessSettings> {
    let bytes = fs::read(path).with_context(|| format!("read settings {}", path.display()))?;
    let settings: HarnessSettings = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse settings JSON {}", path.display()))?;
    validate_settings(&settings).with_context(|| format!("validate {}", path.display()))?;
    Ok(settings)
}

/// Load `explicit` if given, else the per-user settings file if present.
pub fn load_settings_optional(explicit: Option<&Path>) -> Result<HarnessSettings> {
    if let Some(path) = explicit {
        return load_settings(path);
    }
    match default_settings_path() {
        Some(path) if path.is_file() => {
            tracing::debug!(path = %path.display(), "loading settings");
            load_settings(&path)
        }
        _ => Ok(HarnessSettings::default()),
    }
}

pub fn validate_settings(settings: &HarnessSettings) -> Result<()> {
    if settings.schema_version != SETTINGS_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported settings schema_version {}",
            settings.schema_version
        ));
    }
    for (label, engine) in [
        ("primary_engine", &settings.primary_engine),
        ("secondary_engine", &settings.secondary_engine),
    ] {
        if let Some(engine) = engine.as_deref() {
            if engine.trim().is_empty() || engine.contains(char::is_whitespace) {
                return Err(anyhow!(
                    "{label} must be a single engine name (got {engine:?})"
                ));
            }
        }
    }
    if let Some(reference) = settings.reference_engine.as_deref() {
        if reference.trim().is_empty() {
            return Err(anyhow!("reference_engine must be non-empty"));
        }
    }
    for (label, path) in [
        ("ccore", &settings.ccore),
        ("config_file", &settings.config_file),
        ("test_dir", &settings.test_dir),
        ("temp_dir", &settings.temp_dir),
    ] {
        if path.as_deref().is_some_and(|path| path.as_os_str().is_empty()) {
            return Err(anyhow!("{label} must be non-empty"));
        }
    }
    Ok(())
}
