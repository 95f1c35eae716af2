//! Font layouts and glyph atlases.
//!
//! |------------------|------------------------------------------------------|
//! | Type             | Purpose                                              |
//! |------------------|------------------------------------------------------|
//! | [`FontFaceMap`]  | Faces by family, with weighted face selection        |
//! | [`FontSource`]   | Layouts per signature, texture requests, versioning  |
//! | [`FontLayout`]   | Measured glyphs + kerning, upgraded incrementally    |
//! | [`GlyphCache`]   | Per-worker open faces and the layout upgrade         |
//! | [`Packer`]       | Binary-split rectangle packing                       |
//! | [`GlyphAtlas`]   | Builds A8 pages for every requested glyph            |
//! | [`Rasterizer`]   | fontdue or synthetic glyph rendering                 |
//! |------------------|------------------------------------------------------|
//!
//! Sources and layouts are `Send + Sync` and shared with workers through
//! `Arc`. Caches and faces belong to one worker each.

mod atlas;
mod cache;
pub mod charset;
mod error;
mod face;
mod layout;
mod loader;
mod packer;
mod rasterizer;
mod source;

pub use atlas::{AtlasConfig, AtlasPage, AtlasResult, CharTexture, GlyphAtlas, PixelFormat};
pub use cache::{FALLBACK_LOADER_ID, FaceKey, GlyphCache};
pub use charset::{CONTROL_CHARS, CharGroups};
pub use error::{GlyphError, Result};
pub use face::{
    DEFAULT_FAMILY, FontFace, FontFaceMap, FontParameters, FontStretch, FontStyle, FontWeight, SignatureError,
};
pub use layout::{FontData, FontLayout, GlyphRecord};
pub use loader::{DOCUMENT_SCHEME, FontLoader, FsFontLoader, LOCAL_SCHEME, MemoryFontLoader};
pub use packer::{Packer, Rect};
pub use rasterizer::{
    FaceMetrics, FontdueRasterizer, GlyphBitmap, GlyphMetrics, RasterFace, Rasterizer, SyntheticRasterizer,
    synthetic_kerning, synthetic_metrics,
};
pub use source::{ANY_VERSION, FontSource};
