//! Configuration loading
//!
//! Layers, lowest to highest priority: built-in defaults, TOML file
//! (`OPSPLAN_CONFIG` or `<config dir>/opsplan.toml`), `OPSPLAN__*` environment.

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use opsplan_core::EngineConfig;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "OPSPLAN";
const ENV_SEPARATOR: &str = "__";
const CONFIG_PATH_VAR: &str = "OPSPLAN_CONFIG";
const CONFIG_FILE_NAME: &str = "opsplan.toml";
const DB_FILE_NAME: &str = "opsplan.db";
const FALLBACK_DATA_DIR: &str = "~/.opsplan";

#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub database_url: String,
    /// Config file that was actually read
    pub config_file: Option<PathBuf>,
}

/// Load settings from the process environment
pub fn load() -> Result<Settings> {
    let (file, required) = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => (Some(expand_path(&path)), true),
        Err(_) => (
            project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME)),
            false,
        ),
    };
    let data_dir = project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| expand_path(FALLBACK_DATA_DIR));

    let settings = build(file.as_deref(), required, env_source(), &data_dir)?;
    if settings.engine.database_url.is_none() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    }
    Ok(settings)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "opsplan", "opsplan")
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn build(
    file: Option<&Path>,
    required: bool,
    env: Environment,
    data_dir: &Path,
) -> Result<Settings> {
    let mut builder = Config::builder();
    let mut config_file = None;
    if let Some(path) = file {
        if required || path.exists() {
            config_file = Some(path.to_path_buf());
        }
        builder = builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(required),
        );
    }

    let engine: EngineConfig = builder
        .add_source(env)
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;
    engine
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let database_url = database_url(engine.database_url.as_deref(), data_dir);
    Ok(Settings {
        engine,
        database_url,
        config_file,
    })
}

/// Normalize a configured database location into a sqlx URL
fn database_url(configured: Option<&str>, data_dir: &Path) -> String {
    match configured {
        Some(url) if url.starts_with("sqlite:") => url.to_string(),
        Some(path) => format!("sqlite://{}", expand_path(path).display()),
        None => format!("sqlite://{}", data_dir.join(DB_FILE_NAME).display()),
    }
}
