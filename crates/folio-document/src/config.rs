//! `folio.toml` configuration.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [retry]
//! backoff_secs = 20.0
//!
//! [assets]
//! cache_dir = "/var/cache/folio"
//! ttl_secs = 86400
//!
//! [fonts]
//! search_dirs = ["/usr/share/fonts/truetype"]
//! char_groups = "NUMBERS | LATIN"
//!
//! [[fonts.faces]]
//! family = "serif"
//! sources = ["local://DejaVuSerif.ttf"]
//!
//! [atlas]
//! padding = 1
//! page_size = 2048
//!
//! [render]
//! family = "serif"
//! size = 16
//!
//! [telemetry]
//! filter = "folio_document=debug,warn"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_assets::{LibraryConfig, default_cache_dir};
use folio_glyphs::{AtlasConfig, CharGroups, DEFAULT_FAMILY, FontFace, FontFaceMap};
use folio_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub retry: RetryPolicy,
    pub assets: AssetsConfig,
    pub fonts: FontsConfig,
    pub atlas: AtlasConfig,
    pub render: RenderConfig,
    pub telemetry: TelemetryConfig,
}

/// Fixed backoff before a failed download is retried once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff_secs: f64,
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_secs).unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { backoff_secs: 20.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Defaults to the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub ttl_secs: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self { cache_dir: None, ttl_secs: 86_400 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontsConfig {
    /// Directories searched for `local://` fonts.
    pub search_dirs: Vec<PathBuf>,
    /// Faces available to every document, besides the ones it declares.
    pub faces: Vec<FontFace>,
    /// Multiplier applied to requested pixel sizes.
    pub scale: f32,
    pub char_groups: CharGroups,
}

impl Default for FontsConfig {
    fn default() -> Self {
        Self {
            search_dirs: Vec::new(),
            faces: Vec::new(),
            scale: 1.0,
            char_groups: CharGroups::empty(),
        }
    }
}

impl FontsConfig {
    pub fn face_map(&self) -> FontFaceMap {
        self.faces.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Surfaces smaller than this on either side are not rendered.
    pub min_surface: u32,
    pub family: String,
    pub size: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_surface: 1,
            family: DEFAULT_FAMILY.to_string(),
            size: 16,
        }
    }
}

impl FolioConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn library_config(&self) -> LibraryConfig {
        LibraryConfig {
            cache_dir: self.assets.cache_dir.clone().unwrap_or_else(default_cache_dir),
            ttl: Duration::from_secs(self.assets.ttl_secs),
        }
    }
}
