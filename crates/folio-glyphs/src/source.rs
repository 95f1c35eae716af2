//! Font sources: faces plus the layouts and texture requests built on them.
//!
//! A `FontSource` is shared between the owner (which asks for layouts and
//! records which characters need textures) and workers (which upgrade
//! layouts and build atlases). Every texture request bumps the version;
//! atlas work started at an older version is abandoned.
//!
//! | Version | Meaning                         |
//! |---------|---------------------------------|
//! | `0..`   | Current after `n` invalidations |
//! | `MAX`   | Wildcard, always valid          |

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::charset::CharGroups;
use crate::face::{DEFAULT_FAMILY, FontFaceMap, FontParameters};
use crate::layout::FontLayout;
use crate::loader::FontLoader;

/// Request version that every source accepts.
pub const ANY_VERSION: u32 = u32::MAX;

// 0 is the glyph cache's fallback loader.
static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

pub struct FontSource {
    id: u64,
    faces: FontFaceMap,
    loader: Arc<dyn FontLoader>,
    scale: f32,
    groups: CharGroups,
    layouts: Mutex<HashMap<String, Arc<FontLayout>>>,
    requests: Mutex<BTreeMap<String, BTreeSet<char>>>,
    version: AtomicU32,
}

impl FontSource {
    pub fn new(faces: FontFaceMap, loader: Arc<dyn FontLoader>) -> Self {
        Self {
            id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
            faces,
            loader,
            scale: 1.0,
            groups: CharGroups::empty(),
            layouts: Mutex::new(HashMap::new()),
            requests: Mutex::new(BTreeMap::new()),
            version: AtomicU32::new(0),
        }
    }

    /// Multiply requested sizes, for display density.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_char_groups(mut self, groups: CharGroups) -> Self {
        self.groups = groups;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn faces(&self) -> &FontFaceMap {
        &self.faces
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Layout for `params`, created on first request.
    ///
    /// The layout is keyed by the attributes of the face actually selected,
    /// so requests that resolve to the same face share one layout.
    pub fn layout(&self, params: &FontParameters) -> Option<Arc<FontLayout>> {
        let face = self.faces.select(params)?;
        let family = if params.family.is_empty() { DEFAULT_FAMILY } else { params.family.as_str() };
        let size = (f32::from(params.size) * self.scale).round().clamp(0.0, f32::from(u16::MAX)) as u16;
        let name = FontParameters::for_face(face, family, size).signature();

        let mut layouts = self.layouts.lock();
        let layout = layouts.entry(name.clone()).or_insert_with(|| {
            debug!(layout = %name, "new font layout");
            Arc::new(FontLayout::new(
                name.clone(),
                family.to_string(),
                size,
                face.clone(),
                self.groups,
                self.id,
                self.loader.clone(),
            ))
        });
        Some(layout.clone())
    }

    pub fn layout_by_name(&self, name: &str) -> Option<Arc<FontLayout>> {
        self.layouts.lock().get(name).cloned()
    }

    pub fn layout_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layouts.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Record that `chars` of layout `name` need textures.
    ///
    /// Returns `true` and bumps the version when anything new was added.
    pub fn add_texture_chars(&self, name: &str, chars: impl IntoIterator<Item = char>) -> bool {
        let mut requests = self.requests.lock();
        let set = requests.entry(name.to_string()).or_default();
        let before = set.len();
        set.extend(chars);
        let added = set.len() - before;
        drop(requests);
        if added == 0 {
            return false;
        }
        let version = self.invalidate();
        trace!(layout = name, added, version, "texture request grew");
        true
    }

    /// Snapshot of every texture request, sorted by layout and code point.
    pub fn texture_requests(&self) -> BTreeMap<String, Vec<char>> {
        self.requests
            .lock()
            .iter()
            .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
            .collect()
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether work started at `version` is still current.
    pub fn is_request_valid(&self, version: u32) -> bool {
        version == ANY_VERSION || version == self.version()
    }

    /// Abandon in-flight atlas work. Returns the new version.
    pub fn invalidate(&self) -> u32 {
        let mut current = self.version();
        loop {
            let next = next_version(current);
            match self
                .version
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(seen) => current = seen,
            }
        }
    }
}

/// Skips [`ANY_VERSION`], wrapping to 0.
fn next_version(v: u32) -> u32 {
    match v.wrapping_add(1) {
        ANY_VERSION => 0,
        n => n,
    }
}

impl std::fmt::Debug for FontSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontSource")
            .field("id", &self.id)
            .field("faces", &self.faces.len())
            .field("layouts", &self.layouts.lock().len())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FontFace, FontStyle, FontWeight};
    use crate::loader::MemoryFontLoader;

    fn source() -> FontSource {
        let faces: FontFaceMap = [
            FontFace::new("serif", vec!["mem://serif".into()]),
            FontFace::new("serif", vec!["mem://serif-bold".into()]).with_weight(FontWeight::BOLD),
            FontFace::new(DEFAULT_FAMILY, vec!["mem://default".into()]),
        ]
        .into_iter()
        .collect();
        FontSource::new(faces, Arc::new(MemoryFontLoader::new()))
    }

    #[test]
    fn layouts_are_shared_per_selected_face() {
        let src = source();
        let a = src.layout(&FontParameters::new("serif", 12)).unwrap();
        let b = src.layout(&FontParameters::new("serif", 12).with_weight(FontWeight(500))).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "serif:normal:400:100:12");

        let bold = src.layout(&FontParameters::new("serif", 12).with_weight(FontWeight(800))).unwrap();
        assert_eq!(bold.name(), "serif:normal:700:100:12");
        assert_eq!(src.layout_names().len(), 2);
        assert!(Arc::ptr_eq(&bold, &src.layout_by_name(bold.name()).unwrap()));
    }

    #[test]
    fn unknown_family_uses_default_faces() {
        let src = source();
        let layout = src.layout(&FontParameters::new("mono", 10).with_style(FontStyle::Italic)).unwrap();
        assert_eq!(layout.face().sources, vec!["mem://default".to_string()]);
        assert_eq!(layout.name(), "mono:normal:400:100:10");
    }

    #[test]
    fn no_faces_no_layout() {
        let src = FontSource::new(FontFaceMap::new(), Arc::new(MemoryFontLoader::new()));
        assert!(src.layout(&FontParameters::new("serif", 12)).is_none());
    }

    #[test]
    fn scale_rounds_size() {
        let src = source().with_scale(1.5);
        let layout = src.layout(&FontParameters::new("serif", 11)).unwrap();
        assert_eq!(layout.size(), 17);
    }

    #[test]
    fn texture_requests_bump_version_only_when_growing() {
        let src = source();
        assert_eq!(src.version(), 0);
        assert!(src.add_texture_chars("serif:normal:400:100:12", "ba".chars()));
        assert_eq!(src.version(), 1);
        assert!(!src.add_texture_chars("serif:normal:400:100:12", ['a']));
        assert_eq!(src.version(), 1);
        assert_eq!(src.texture_requests()["serif:normal:400:100:12"], vec!['a', 'b']);
    }

    #[test]
    fn request_validity() {
        let src = source();
        let v = src.version();
        assert!(src.is_request_valid(v));
        assert!(src.is_request_valid(ANY_VERSION));
        src.invalidate();
        assert!(!src.is_request_valid(v));
    }

    #[test]
    fn version_skips_wildcard() {
        assert_eq!(next_version(5), 6);
        assert_eq!(next_version(u32::MAX - 1), 0);
        assert_eq!(next_version(u32::MAX), 0);
    }
}
