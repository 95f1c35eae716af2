//! Cross-component error taxonomy.
//!
//! Background failures are never thrown across the worker boundary; they are
//! folded into completion payloads and surface here on the owner side.

use thiserror::Error;

/// A failed fetch of an asset's content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("no such resource: {0}")]
    NotFound(String),
    #[error("transport error for {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("unsupported locator: {0}")]
    Unsupported(String),
}

/// Errors surfaced to owners of folio components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FolioError {
    /// Asset download failed; recoverable via retry.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Malformed document content; surfaced, never retried.
    #[error("document parse error: {0}")]
    DocumentParse(String),

    /// A glyph has no renderable form; callers degrade to a zero-size glyph.
    #[error("rasterization error: {0}")]
    Rasterization(String),

    /// The atlas packer could not place a glyph even on a fresh page.
    #[error("packing exhausted: glyph {width}x{height} does not fit a {page}px page")]
    PackingExhausted { width: u16, height: u16, page: u16 },

    /// Background work panicked or the pipeline shut down before delivery.
    #[error("background task failed: {0}")]
    TaskFailed(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_error_converts() {
        let err: FolioError = NetworkError::NotFound("http://x/a.png".into()).into();
        assert_eq!(err.to_string(), "network error: no such resource: http://x/a.png");
    }

    #[test]
    fn packing_message_names_dimensions() {
        let err = FolioError::PackingExhausted { width: 3000, height: 12, page: 2048 };
        assert!(err.to_string().contains("3000x12"));
    }
}
