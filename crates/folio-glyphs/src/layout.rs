//! Font layouts: measured glyphs and kerning for one font signature.
//!
//! Layout data is immutable and shared as `Arc<FontData>`. Adding characters
//! derives a new `FontData` holding the old records by value plus the delta,
//! and swaps it in with a compare-and-swap loop so concurrent workers never
//! lose each other's additions.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::GlyphCache;
use crate::charset::CharGroups;
use crate::face::FontFace;
use crate::loader::FontLoader;
use crate::rasterizer::{FaceMetrics, GlyphMetrics};

/// Measurement of one character in one layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlyphRecord {
    pub codepoint: char,
    pub width: u16,
    pub height: u16,
    pub bearing_x: i16,
    pub bearing_y: i16,
    pub advance: u16,
}

impl GlyphRecord {
    /// A character no face could provide.
    pub fn empty(codepoint: char) -> Self {
        Self::from_metrics(codepoint, GlyphMetrics::default())
    }

    pub fn from_metrics(codepoint: char, m: GlyphMetrics) -> Self {
        Self {
            codepoint,
            width: m.width,
            height: m.height,
            bearing_x: m.bearing_x,
            bearing_y: m.bearing_y,
            advance: m.advance,
        }
    }
}

/// Snapshot of a layout's glyphs. `chars` is sorted by code point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontData {
    pub metrics: FaceMetrics,
    pub chars: Vec<GlyphRecord>,
    /// Only non-zero adjustments are stored.
    pub kerning: BTreeMap<(char, char), i16>,
}

impl FontData {
    pub fn get(&self, c: char) -> Option<&GlyphRecord> {
        self.chars
            .binary_search_by_key(&c, |r| r.codepoint)
            .ok()
            .map(|i| &self.chars[i])
    }

    pub fn contains(&self, c: char) -> bool {
        self.get(c).is_some()
    }

    pub fn kerning(&self, left: char, right: char) -> i16 {
        self.kerning.get(&(left, right)).copied().unwrap_or(0)
    }

    pub fn codepoints(&self) -> impl Iterator<Item = char> + '_ {
        self.chars.iter().map(|r| r.codepoint)
    }

    /// Insert keeping order; an existing record wins.
    pub(crate) fn insert(&mut self, record: GlyphRecord) {
        if let Err(pos) = self.chars.binary_search_by_key(&record.codepoint, |r| r.codepoint) {
            self.chars.insert(pos, record);
        }
    }
}

/// One font signature's layout, shared by the owner and every worker.
pub struct FontLayout {
    name: String,
    family: String,
    size: u16,
    face: FontFace,
    groups: CharGroups,
    loader_id: u64,
    loader: Arc<dyn FontLoader>,
    data: Mutex<Arc<FontData>>,
}

impl FontLayout {
    pub(crate) fn new(
        name: String,
        family: String,
        size: u16,
        face: FontFace,
        groups: CharGroups,
        loader_id: u64,
        loader: Arc<dyn FontLoader>,
    ) -> Self {
        Self {
            name,
            family,
            size,
            face,
            groups,
            loader_id,
            loader,
            data: Mutex::new(Arc::new(FontData::default())),
        }
    }

    /// Signature this layout is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn face(&self) -> &FontFace {
        &self.face
    }

    pub fn char_groups(&self) -> CharGroups {
        self.groups
    }

    pub(crate) fn loader_id(&self) -> u64 {
        self.loader_id
    }

    pub(crate) fn loader(&self) -> &dyn FontLoader {
        self.loader.as_ref()
    }

    pub fn data(&self) -> Arc<FontData> {
        self.data.lock().clone()
    }

    /// Make sure `chars` are measured, using this worker's `cache`.
    ///
    /// Returns the current data unchanged (the same `Arc`) when nothing is
    /// missing. If another worker swapped in new data while this one was
    /// measuring, the upgrade is redone against that data.
    pub fn add_chars(&self, chars: &[char], cache: &mut GlyphCache) -> Arc<FontData> {
        loop {
            let current = self.data();
            let upgraded = cache.upgrade(self, &current, chars);
            if Arc::ptr_eq(&upgraded, &current) {
                return current;
            }
            let mut slot = self.data.lock();
            if Arc::ptr_eq(&slot, &current) {
                *slot = upgraded.clone();
                return upgraded;
            }
        }
    }
}

impl std::fmt::Debug for FontLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontLayout")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("chars", &self.data.lock().chars.len())
            .finish()
    }
}
