use folio_types::FolioError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlyphError {
    #[error("font {font} could not be loaded: {reason}")]
    FontLoad { font: String, reason: String },

    #[error("no font data for {0}")]
    FontMissing(String),

    #[error("glyph {width}x{height} does not fit a {page}px page")]
    PackingExhausted { width: u16, height: u16, page: u16 },
}

impl From<GlyphError> for FolioError {
    fn from(err: GlyphError) -> Self {
        match err {
            GlyphError::PackingExhausted { width, height, page } => {
                FolioError::PackingExhausted { width, height, page }
            }
            other => FolioError::Rasterization(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GlyphError>;
