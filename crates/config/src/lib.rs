//! Layered configuration for loupe.
//!
//! Settings are resolved from (lowest to highest precedence):
//! 1. Built-in defaults.
//! 2. A configuration file: either the one given explicitly, or
//!    `loupe.toml` in the platform configuration directory if it exists.
//!    TOML, YAML and JSON are accepted, chosen by file extension.
//! 3. Environment variables prefixed with `LOUPE_`. Nested keys use a double
//!    underscore, e.g. `LOUPE_SIZES__GRID=120`.

pub mod error;
mod validate;

pub use crate::validate::{MINIMUM_CACHE_SIZE_MB, PHYSICAL_MEMORY_CEILING_PERCENT, Warning, physical_memory_bytes};

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use loupe_cache::CacheConfig;
use loupe_extract::Quality;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "loupe.toml";
const ENV_PREFIX: &str = "LOUPE_";
/// Count limit handed to the memory cache; cost is meant to be the binding constraint.
pub const CACHE_COUNT_LIMIT: usize = 10_000;

/// Target long-edge sizes (pixels) for each place a thumbnail is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSizes {
    pub grid: u32,
    pub grid_view: u32,
    pub preview: u32,
    pub full_size: u32,
}

impl Default for ThumbnailSizes {
    fn default() -> Self {
        Self { grid: 100, grid_view: 400, preview: 1024, full_size: 8700 }
    }
}

/// Where a thumbnail is going to be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThumbnailUse {
    Grid,
    GridView,
    Preview,
    FullSize,
}

impl ThumbnailSizes {
    pub fn for_use(&self, usage: ThumbnailUse) -> u32 {
        match usage {
            ThumbnailUse::Grid => self.grid,
            ThumbnailUse::GridView => self.grid_view,
            ThumbnailUse::Preview => self.preview,
            ThumbnailUse::FullSize => self.full_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Memory cache budget in megabytes.
    pub memory_cache_size_mb: u64,
    /// Bytes per pixel used to estimate the resident cost of a thumbnail.
    pub thumbnail_cost_per_pixel: u32,
    pub sizes: ThumbnailSizes,
    /// Resampling quality, 1 (fastest) to 8 (best).
    pub quality: u8,
    /// Reuse the grid thumbnail as the initial zoom preview instead of
    /// extracting a larger one.
    pub use_thumbnail_as_zoom_preview: bool,
    /// Disk cache root; defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Age after which `prune` removes disk cache entries.
    pub disk_cache_max_age_days: u32,
    /// Source file extensions picked up by batch runs (case-insensitive).
    pub extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            memory_cache_size_mb: 5000,
            thumbnail_cost_per_pixel: 4,
            sizes: ThumbnailSizes::default(),
            quality: 4,
            use_thumbnail_as_zoom_preview: false,
            cache_dir: None,
            disk_cache_max_age_days: 30,
            extensions: vec!["arw".to_string()],
        }
    }
}

impl Settings {
    /// Loads settings from defaults, a configuration file and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)
    }

    /// The provider stack behind [`load`](Self::load), exposed so callers can
    /// merge in their own overrides (command-line flags, for instance).
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Settings::default()));
        let figment = match file {
            Some(path) => merge_file(figment, path)?,
            None => match default_config_file() {
                Some(path) => figment.merge(Toml::file(path)),
                None => figment,
            },
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Budgets for the memory cache derived from these settings.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        let total_cost_limit = self.memory_cache_size_mb.saturating_mul(1024 * 1024);
        CacheConfig::new(total_cost_limit, CACHE_COUNT_LIMIT, self.thumbnail_cost_per_pixel)
            .or_raise(|| ErrorKind::InvalidValue("thumbnail_cost_per_pixel must be greater than zero".to_string()))
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }

    /// Root directory for the disk cache.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let dirs = project_dirs().ok_or_raise(|| ErrorKind::NoProjectDirectory)?;
        Ok(dirs.cache_dir().to_path_buf())
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "loupe")
}

fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
    match extension.as_deref() {
        Some("toml") => Ok(figment.merge(Toml::file_exact(path))),
        Some("yaml" | "yml") => Ok(figment.merge(Yaml::file_exact(path))),
        Some("json") => Ok(figment.merge(Json::file_exact(path))),
        _ => exn::bail!(ErrorKind::UnsupportedFile(path.to_path_buf())),
    }
}
