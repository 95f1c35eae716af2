use std::path::PathBuf;

use folio_glyphs::GlyphError;
use folio_types::FolioError;
use thiserror::Error;

/// Content the parser could not make sense of.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("content is not valid utf-8: {0}")]
    Encoding(String),
    #[error("unsupported content type: {0}")]
    ContentType(String),
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Something the source controller reports through its error events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("download of {url} failed")]
    Download { url: String },
    #[error("failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("document content unavailable: {0}")]
    Content(String),
    #[error("background task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("no font for family {0}")]
    NoFont(String),
    #[error("font data changed during the build")]
    Stale,
    #[error("glyphs do not fit the atlas")]
    AtlasFull,
    #[error("render task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Glyph(#[from] GlyphError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ParseError> for FolioError {
    fn from(err: ParseError) -> Self {
        FolioError::DocumentParse(err.to_string())
    }
}

impl From<SourceError> for FolioError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Download { url } => FolioError::Network(folio_types::NetworkError::Transport {
                url,
                reason: "download failed".to_string(),
            }),
            SourceError::Parse { reason, .. } => FolioError::DocumentParse(reason),
            SourceError::Content(msg) => FolioError::DocumentParse(msg),
            SourceError::Task(msg) => FolioError::TaskFailed(msg),
        }
    }
}

impl From<RenderError> for FolioError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Glyph(glyph) => glyph.into(),
            RenderError::Task(msg) => FolioError::TaskFailed(msg),
            other => FolioError::Rasterization(other.to_string()),
        }
    }
}

impl From<ConfigError> for FolioError {
    fn from(err: ConfigError) -> Self {
        FolioError::Config(err.to_string())
    }
}
