//! Per-worker glyph cache.
//!
//! Each worker owns one `GlyphCache` (stored in its `WorkerContext`). It
//! opens faces lazily, remembers faces that failed to load, and performs the
//! layout upgrade: measuring new characters across a layout's fallback chain
//! and computing kerning between every new and existing character.
//!
//! ```text
//!   layout sources (in order) ──► fallback font ──► zero record
//!          face A   face B           face F
//! ```
//!
//! The first face in the chain that has a glyph for a character owns it.
//! Kerning is only stored for pairs owned by the same face.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use folio_tasks::WorkerContext;
use tracing::{debug, warn};

use crate::charset::{CONTROL_CHARS, CharGroups, group_of, members};
use crate::layout::{FontData, FontLayout, GlyphRecord};
use crate::loader::FontLoader;
use crate::rasterizer::{RasterFace, Rasterizer};

/// Loader id reserved for the cache's own fallback font.
pub const FALLBACK_LOADER_ID: u64 = 0;

/// Identity of an opened face: which loader, which locator, what size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaceKey {
    pub loader: u64,
    pub source: String,
    pub size: u16,
}

struct Fallback {
    source: String,
    loader: Arc<dyn FontLoader>,
}

pub struct GlyphCache {
    rasterizer: Box<dyn Rasterizer>,
    fallback: Option<Fallback>,
    /// `None` marks a face that failed to load; it is not retried.
    faces: HashMap<FaceKey, Option<Box<dyn RasterFace>>>,
}

impl GlyphCache {
    pub fn new(rasterizer: impl Rasterizer + 'static) -> Self {
        Self {
            rasterizer: Box::new(rasterizer),
            fallback: None,
            faces: HashMap::new(),
        }
    }

    /// Use `source` from `loader` after every layout's own sources.
    pub fn with_fallback(mut self, source: impl Into<String>, loader: Arc<dyn FontLoader>) -> Self {
        self.fallback = Some(Fallback { source: source.into(), loader });
        self
    }

    /// The cache stored in a worker's context, created on first use.
    pub fn of<F>(ctx: &mut WorkerContext, init: F) -> &mut GlyphCache
    where
        F: FnOnce() -> GlyphCache,
    {
        ctx.get_or_insert_with(init)
    }

    /// Faces opened successfully so far.
    pub fn open_faces(&self) -> usize {
        self.faces.values().filter(|f| f.is_some()).count()
    }

    pub fn face(&self, key: &FaceKey) -> Option<&dyn RasterFace> {
        self.faces.get(key).and_then(|f| f.as_deref())
    }

    fn open(&mut self, loader_id: u64, loader: &dyn FontLoader, source: &str, size: u16) -> Option<FaceKey> {
        let key = FaceKey { loader: loader_id, source: source.to_string(), size };
        if !self.faces.contains_key(&key) {
            let face = match loader.load(source) {
                Some(data) => match self.rasterizer.load_face(source, data, size) {
                    Ok(face) => {
                        debug!(source, size, "opened face");
                        Some(face)
                    }
                    Err(e) => {
                        warn!(source, error = %e, "failed to open face");
                        None
                    }
                },
                None => {
                    debug!(source, "font data not available");
                    None
                }
            };
            self.faces.insert(key.clone(), face);
        }
        self.faces.get(&key).and_then(Option::as_ref).map(|_| key)
    }

    /// Every face that can serve `layout`, in lookup order.
    pub fn chain(&mut self, layout: &FontLayout) -> Vec<FaceKey> {
        let size = layout.size();
        let mut chain: Vec<FaceKey> = layout
            .face()
            .sources
            .iter()
            .filter_map(|source| self.open(layout.loader_id(), layout.loader(), source, size))
            .collect();
        if let Some(fallback) = &self.fallback {
            let (source, loader) = (fallback.source.clone(), fallback.loader.clone());
            if let Some(key) = self.open(FALLBACK_LOADER_ID, loader.as_ref(), &source, size) {
                chain.push(key);
            }
        }
        chain
    }

    /// The face owning `c` in `chain`, with its glyph index.
    pub fn resolve<'a>(&self, chain: &'a [FaceKey], c: char) -> Option<(&'a FaceKey, u16)> {
        chain
            .iter()
            .find_map(|key| self.face(key)?.glyph_index(c).map(|glyph| (key, glyph)))
    }

    fn pair_kerning(&self, chain: &[FaceKey], left: char, right: char) -> i16 {
        let (Some((lk, lg)), Some((rk, rg))) = (self.resolve(chain, left), self.resolve(chain, right)) else {
            return 0;
        };
        if lk != rk {
            return 0;
        }
        self.face(lk).map_or(0, |face| face.kerning(lg, rg))
    }

    /// Derive layout data that also covers `chars`.
    ///
    /// Returns `data` itself when there is nothing to add, or when the
    /// layout has no usable face and no metrics yet.
    pub fn upgrade(&mut self, layout: &FontLayout, data: &Arc<FontData>, chars: &[char]) -> Arc<FontData> {
        let chain = self.chain(layout);

        let metrics = if data.metrics.size == 0 {
            match chain.first().and_then(|key| self.face(key)) {
                Some(face) => face.metrics(),
                None => {
                    debug!(layout = layout.name(), "no face available, layout stays empty");
                    return data.clone();
                }
            }
        } else {
            data.metrics
        };

        let delta = missing_chars(data, chars, layout.char_groups());
        if delta.is_empty() && metrics == data.metrics {
            return data.clone();
        }

        let mut next = FontData {
            metrics,
            chars: data.chars.clone(),
            kerning: data.kerning.clone(),
        };
        for &c in &delta {
            let record = self
                .resolve(&chain, c)
                .and_then(|(key, glyph)| {
                    self.face(key)
                        .map(|face| GlyphRecord::from_metrics(c, face.glyph_metrics(glyph)))
                })
                .unwrap_or_else(|| GlyphRecord::empty(c));
            next.insert(record);
        }

        let all: Vec<char> = next.codepoints().collect();
        for &c in &delta {
            for &other in &all {
                for (left, right) in [(c, other), (other, c)] {
                    let k = self.pair_kerning(&chain, left, right);
                    if k != 0 {
                        next.kerning.insert((left, right), k);
                    }
                }
            }
        }

        debug!(
            layout = layout.name(),
            added = delta.len(),
            total = next.chars.len(),
            "layout upgraded"
        );
        Arc::new(next)
    }
}

/// Characters to add: control chars, requested chars (whole groups where
/// the layout opts in), minus what `data` already has.
fn missing_chars(data: &FontData, chars: &[char], groups: CharGroups) -> BTreeSet<char> {
    let mut delta: BTreeSet<char> = CONTROL_CHARS.into_iter().collect();
    let mut expanded = CharGroups::empty();
    for &c in chars {
        match group_of(c).filter(|g| groups.contains(*g)) {
            Some(group) => {
                if !expanded.contains(group) {
                    expanded |= group;
                    delta.extend(members(group));
                }
            }
            None => {
                delta.insert(c);
            }
        }
    }
    delta.retain(|c| !data.contains(*c));
    delta
}

impl std::fmt::Debug for GlyphCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlyphCache")
            .field("faces", &self.faces.len())
            .field("fallback", &self.fallback.as_ref().map(|fb| fb.source.as_str()))
            .finish()
    }
}
