use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::CatalogOptions;
use crate::cli::Cli;

pub const DEFAULT_MAX_HYMNS: u16 = 474;
pub const PRESENTATION_EXTENSION: &str = "pptx";
pub const STATS_FILE_TYPE: &str = "Hymnal Browser Statistical Data";
pub const DEFAULT_ARCHIVE_NAME: &str = "hymns.sda";
pub const SUGGESTION_LIMIT: usize = 10;

pub const ARCHIVE_ENV: &str = "HYMNAL_ARCHIVE";
pub const STATS_ENV: &str = "HYMNAL_STATS";
pub const TEMP_DIR_ENV: &str = "HYMNAL_TEMP_DIR";

/// How many extracted presentations are kept around in the temp directory.
#[derive(Debug, Clone, Copy)]
pub struct RecentLimits {
    pub default: usize,
    pub min: usize,
    pub max: usize,
}

pub const RECENT_LIMITS: RecentLimits = RecentLimits {
    default: 10,
    min: 3,
    max: 30,
};

impl RecentLimits {
    /// Out-of-range requests fall back to the default rather than the nearest bound.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if (self.min..=self.max).contains(&n) => n,
            _ => self.default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub archive_path: PathBuf,
    pub stats_path: PathBuf,
    pub temp_dir: PathBuf,
    pub max_hymns: u16,
    pub extension: String,
    pub recent_limit: usize,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let max_hymns = cli.max_hymns.unwrap_or(DEFAULT_MAX_HYMNS);
        if max_hymns == 0 || max_hymns > 999 {
            bail!("--max-hymns must be between 1 and 999, got {max_hymns}");
        }

        Ok(Self {
            archive_path: resolve_archive_path(cli)?,
            stats_path: resolve_stats_path(cli)?,
            temp_dir: resolve_temp_dir(cli)?,
            max_hymns,
            extension: PRESENTATION_EXTENSION.to_string(),
            recent_limit: RECENT_LIMITS.clamp(cli.recent_limit),
        })
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            max_hymns: self.max_hymns,
            extension: self.extension.clone(),
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.stats_path.parent() {
            ensure_dir(parent, "Data")?;
        }
        ensure_dir(&self.temp_dir, "Temporary")?;
        Ok(())
    }
}

pub fn resolve_archive_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.archive.clone() {
        return Ok(p);
    }
    if let Some(p) = env_path(ARCHIVE_ENV) {
        return Ok(p);
    }

    let cwd = env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(DEFAULT_ARCHIVE_NAME))
}

pub fn resolve_stats_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.stats.clone() {
        return Ok(p);
    }
    if let Some(p) = env_path(STATS_ENV) {
        return Ok(p);
    }

    Ok(hymnal_home()?.join("data.json"))
}

pub fn resolve_temp_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.temp_dir.clone() {
        return Ok(p);
    }
    if let Some(p) = env_path(TEMP_DIR_ENV) {
        return Ok(p);
    }

    Ok(hymnal_home()?.join("temp"))
}

fn hymnal_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("hymnal-browser"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn ensure_dir(path: &Path, kind: &str) -> Result<()> {
    if path.as_os_str().is_empty() || path.is_dir() {
        return Ok(());
    }
    info!("{kind} directory \"{}\" doesn't exist. Creating a new folder.", path.display());
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create {kind} directory: {}", path.display()))
}
