//! Documents, their sources, and render coordination.
//!
//! |-----------------------|-------------------------------------------------|
//! | Type                  | Purpose                                         |
//! |-----------------------|-------------------------------------------------|
//! | [`Document`]          | Parsed pages, assets, fonts and embedded files  |
//! | [`MarkupParser`]      | Markup and stylesheet parser                    |
//! | [`SourceController`]  | Loads one asset, resolves what it references    |
//! | [`RenderCoordinator`] | One build in flight, trailing rerun on change   |
//! | [`GlyphRunBuilder`]   | Text to glyph quads over a fresh atlas          |
//! | [`FolioConfig`]       | TOML configuration for all of the above         |
//! |-----------------------|-------------------------------------------------|
//!
//! Controllers and coordinators live on the owner context. Parsing and
//! building run on task queues and come back through completions.

pub mod config;
mod controller;
mod document;
mod error;
mod markup;
mod render;

pub use config::{FolioConfig, RenderConfig, RetryPolicy};
pub use controller::{ControllerOptions, ExternalAssetMeta, SourceController, SourceEvent, SourceState};
pub use document::{ContentPage, Document, DocumentFontLoader, DocumentParser, FileBundle};
pub use error::{ConfigError, ParseError, RenderError, SourceError};
pub use markup::{CSS_CONTENT_TYPE, MarkupDocument, MarkupParser};
pub use render::{
    DrawBatch, GlyphQuad, GlyphRunBuilder, Margins, MediaFlags, MediaParameters, RenderBuilder, RenderCoordinator,
    RenderEvent, RenderResult, RenderSnapshot,
};
