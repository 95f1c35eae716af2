//! Incremental font layouts and per-worker glyph caches.

use std::collections::BTreeSet;
use std::sync::Arc;

use folio_glyphs::{
    CONTROL_CHARS, FontData, FontFace, FontFaceMap, FontParameters, FontSource, GlyphAtlas, GlyphCache, MemoryFontLoader,
    SyntheticRasterizer,
};
use folio_tasks::TaskQueue;

// ============================================================================
// Shared test setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn source() -> Arc<FontSource> {
    let faces: FontFaceMap = [FontFace::new("F", vec!["mem://f".into()])].into_iter().collect();
    let loader = MemoryFontLoader::new().with("mem://f", "abcxyz");
    Arc::new(FontSource::new(faces, Arc::new(loader)))
}

/// Code points of `data` besides the control characters every layout carries.
fn printable(data: &FontData) -> Vec<char> {
    data.codepoints().filter(|c| !CONTROL_CHARS.contains(c)).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn growing_a_layout_keeps_earlier_records() {
    init_tracing();
    let fonts = source();
    let layout = fonts.layout(&FontParameters::new("F", 16)).unwrap();
    let mut cache = GlyphCache::new(SyntheticRasterizer);

    let first = layout.add_chars(&['a', 'b'], &mut cache);
    let second = layout.add_chars(&['a', 'b', 'c'], &mut cache);

    assert_eq!(printable(&first), vec!['a', 'b']);
    assert_eq!(printable(&second), vec!['a', 'b', 'c']);
    for c in ['a', 'b'] {
        assert_eq!(first.get(c), second.get(c));
    }
    for (pair, k) in &first.kerning {
        assert_eq!(second.kerning.get(pair), Some(k));
    }
    let added: BTreeSet<_> = second.kerning.keys().filter(|p| !first.kerning.contains_key(*p)).collect();
    assert!(!added.is_empty());
    assert!(added.iter().all(|(l, r)| *l == 'c' || *r == 'c'));

    // A subset changes nothing.
    let third = layout.add_chars(&['a'], &mut cache);
    assert!(Arc::ptr_eq(&second, &third));
}

#[test]
fn each_worker_keeps_its_cache() {
    init_tracing();
    let fonts = source();
    let queue = TaskQueue::new("glyphs");
    let opened = Arc::new(std::sync::Mutex::new(Vec::new()));

    for chars in [vec!['a', 'b'], vec!['x', 'y']] {
        let fonts = fonts.clone();
        let opened = opened.clone();
        queue.submit(
            move |ctx| {
                let cache = GlyphCache::of(ctx, || GlyphCache::new(SyntheticRasterizer));
                let layout = fonts.layout(&FontParameters::new("F", 16)).unwrap();
                layout.add_chars(&chars, cache);
                opened.lock().unwrap().push(cache.open_faces());
            },
            |outcome| assert!(outcome.is_done()),
        );
    }
    queue.wait_idle();

    // The second task found the face the first one opened.
    assert_eq!(*opened.lock().unwrap(), vec![1, 1]);
    let layout = fonts.layout_by_name(&fonts.layout_names()[0]).unwrap();
    assert_eq!(printable(&layout.data()), vec!['a', 'b', 'x', 'y']);
}

#[test]
fn invalidated_source_abandons_the_atlas() {
    init_tracing();
    let fonts = source();
    let layout = fonts.layout(&FontParameters::new("F", 16)).unwrap();
    let mut cache = GlyphCache::new(SyntheticRasterizer);
    layout.add_chars(&['a', 'b'], &mut cache);
    fonts.add_texture_chars(layout.name(), ['a', 'b']);

    let atlas = GlyphAtlas::default();
    let version = fonts.version();
    let requests = fonts.texture_requests();
    fonts.add_texture_chars(layout.name(), ['c']);
    assert!(atlas.update(&mut cache, &fonts, version, &requests).is_none());

    let result = atlas.update(&mut cache, &fonts, fonts.version(), &fonts.texture_requests()).unwrap();
    assert_eq!(result.version, fonts.version());
    assert!(result.texture(layout.name(), 'c').and_then(|t| t.page).is_some());
}
