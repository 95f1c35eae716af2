//! Glyph atlas construction.
//!
//! Given a font source and the characters each layout needs, build a set of
//! single-channel pages with every glyph placed at a padded, non-overlapping
//! rectangle.
//!
//! ```text
//!   requests ──► measure ──► sort (h desc, w desc, cp asc) ──► pack ──► raster
//!      │            │                                           │         │
//!      └────────────┴──────── version still current? ───────────┴─────────┘
//! ```
//!
//! Small glyph sets go on one page: the canvas starts at `initial_canvas`
//! squared and doubles alternately in width and height until the packer
//! accepts every glyph. Sets too large for that use fixed-size pages filled
//! greedily. The build is abandoned as soon as the source's version moves on.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::cache::{FaceKey, GlyphCache};
use crate::error::GlyphError;
use crate::face::FontParameters;
use crate::packer::Packer;
use crate::rasterizer::GlyphBitmap;
use crate::source::FontSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// One byte of coverage per pixel.
    #[default]
    A8,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AtlasPage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl AtlasPage {
    /// Blank page. The last pixel is set to full coverage so a sampler can
    /// draw solid quads (underlines, selection boxes) from the same page.
    pub fn new(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; width as usize * height as usize];
        if let Some(last) = data.last_mut() {
            *last = 255;
        }
        Self { width, height, format: PixelFormat::A8, data }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Copy `bitmap` to (`x`, `y`), clipped to `width`×`height` and the page.
    fn blit(&mut self, x: u32, y: u32, width: u32, height: u32, bitmap: &GlyphBitmap) {
        let w = width.min(u32::from(bitmap.width)).min(self.width.saturating_sub(x)) as usize;
        let h = height.min(u32::from(bitmap.height)).min(self.height.saturating_sub(y)) as usize;
        let src_stride = usize::from(bitmap.width);
        for row in 0..h {
            let src = row * src_stride;
            let dst = (y as usize + row) * self.width as usize + x as usize;
            if let (Some(from), Some(to)) = (bitmap.data.get(src..src + w), self.data.get_mut(dst..dst + w)) {
                to.copy_from_slice(from);
            }
        }
    }
}

impl std::fmt::Debug for AtlasPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasPage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Where a character landed. `page` is `None` for characters with no
/// visible pixels (or no glyph at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharTexture {
    pub codepoint: char,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub page: Option<u16>,
}

impl CharTexture {
    fn unplaced(codepoint: char) -> Self {
        Self { codepoint, x: 0, y: 0, width: 0, height: 0, page: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Gap in pixels between neighbouring glyphs.
    pub padding: u32,
    /// Side of the first single-page canvas tried.
    pub initial_canvas: u32,
    /// Estimated glyph area below which a single page is attempted.
    pub single_page_area_limit: u64,
    /// Largest single-page canvas area before falling back to fixed pages.
    pub single_page_canvas_limit: u64,
    /// Side of each fixed page.
    pub page_size: u32,
    /// Font used when no layout source has a glyph.
    pub fallback_font: Option<PathBuf>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            padding: 1,
            initial_canvas: 128,
            single_page_area_limit: 3 * 1024 * 1024,
            single_page_canvas_limit: 4 * 1024 * 1024,
            page_size: 2048,
            fallback_font: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtlasResult {
    /// Source version the atlas was built for.
    pub version: u32,
    pub pages: Vec<AtlasPage>,
    /// Per layout name, in the order the characters were requested.
    pub textures: BTreeMap<String, Vec<CharTexture>>,
}

impl AtlasResult {
    pub fn texture(&self, layout: &str, c: char) -> Option<&CharTexture> {
        self.textures.get(layout)?.iter().find(|t| t.codepoint == c)
    }
}

struct Item {
    layout: usize,
    slot: usize,
    codepoint: char,
    face: FaceKey,
    glyph: u16,
    width: u16,
    height: u16,
}

/// Page sizes plus a (page, x, y) spot per item, in item order.
#[derive(Debug, Default)]
struct Packing {
    pages: Vec<(u32, u32)>,
    spots: Vec<(usize, u32, u32)>,
}

/// Largest page side whose coordinates fit a [`CharTexture`].
const MAX_SIDE: u32 = u16::MAX as u32;

#[derive(Debug, Clone, Default)]
pub struct GlyphAtlas {
    config: AtlasConfig,
}

impl GlyphAtlas {
    /// Page and canvas sides are clamped so every texture coordinate fits
    /// a `u16`.
    pub fn new(mut config: AtlasConfig) -> Self {
        config.page_size = config.page_size.clamp(1, MAX_SIDE);
        config.initial_canvas = config.initial_canvas.clamp(1, MAX_SIDE);
        Self { config }
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Build an atlas for `requests` (layout name to characters).
    ///
    /// Returns `None` when `version` stops being current at any stage, or
    /// when a glyph cannot fit even an empty page.
    pub fn update(
        &self,
        cache: &mut GlyphCache,
        source: &FontSource,
        version: u32,
        requests: &BTreeMap<String, Vec<char>>,
    ) -> Option<AtlasResult> {
        if !source.is_request_valid(version) {
            trace!(version, "atlas request stale before start");
            return None;
        }

        let mut textures: Vec<(String, Vec<CharTexture>)> = Vec::with_capacity(requests.len());
        let mut items = Vec::new();
        for (name, chars) in requests {
            let mut list: Vec<CharTexture> = chars.iter().copied().map(CharTexture::unplaced).collect();
            let layout = source
                .layout_by_name(name)
                .or_else(|| name.parse::<FontParameters>().ok().and_then(|p| source.layout(&p)));
            match layout {
                Some(layout) => {
                    let chain = cache.chain(&layout);
                    for (slot, tex) in list.iter_mut().enumerate() {
                        let Some((key, glyph)) = cache.resolve(&chain, tex.codepoint) else {
                            continue;
                        };
                        let Some(face) = cache.face(key) else {
                            continue;
                        };
                        let m = face.glyph_metrics(glyph);
                        tex.width = m.width;
                        tex.height = m.height;
                        if m.width > 0 && m.height > 0 {
                            items.push(Item {
                                layout: textures.len(),
                                slot,
                                codepoint: tex.codepoint,
                                face: key.clone(),
                                glyph,
                                width: m.width,
                                height: m.height,
                            });
                        }
                    }
                }
                None => debug!(layout = %name, "texture request for unknown layout"),
            }
            textures.push((name.clone(), list));
        }

        if !source.is_request_valid(version) {
            trace!(version, "atlas request stale after measuring");
            return None;
        }

        items.sort_by(|a, b| {
            b.height
                .cmp(&a.height)
                .then(b.width.cmp(&a.width))
                .then(a.codepoint.cmp(&b.codepoint))
        });

        let packing = match self.pack(&items) {
            Ok(packing) => packing,
            Err(e) => {
                error!(error = %e, "atlas packing failed");
                return None;
            }
        };
        if !source.is_request_valid(version) {
            trace!(version, "atlas request stale after packing");
            return None;
        }

        let mut pages: Vec<AtlasPage> = packing.pages.iter().map(|&(w, h)| AtlasPage::new(w, h)).collect();
        for (item, &(page, x, y)) in items.iter().zip(&packing.spots) {
            if !source.is_request_valid(version) {
                trace!(version, "atlas request stale while rasterizing");
                return None;
            }
            let (Ok(tx), Ok(ty), Ok(tpage)) =
                (u16::try_from(x), u16::try_from(y), u16::try_from(page))
            else {
                warn!(codepoint = %item.codepoint.escape_unicode(), x, y, page, "glyph outside texture range");
                continue;
            };
            if let Some(tex) = textures[item.layout].1.get_mut(item.slot) {
                tex.x = tx;
                tex.y = ty;
                tex.page = Some(tpage);
            }
            let bitmap = cache.face(&item.face).map(|face| face.rasterize(item.glyph)).unwrap_or_default();
            if bitmap.is_empty() {
                debug!(codepoint = %item.codepoint.escape_unicode(), "glyph has no bitmap");
                continue;
            }
            if let Some(target) = pages.get_mut(page) {
                target.blit(x, y, u32::from(item.width), u32::from(item.height), &bitmap);
            }
        }

        if !source.is_request_valid(version) {
            trace!(version, "atlas request stale at finish");
            return None;
        }
        debug!(version, pages = pages.len(), glyphs = items.len(), "atlas built");
        Some(AtlasResult {
            version,
            pages,
            textures: textures.into_iter().collect(),
        })
    }

    fn pack(&self, items: &[Item]) -> Result<Packing, GlyphError> {
        if items.is_empty() {
            return Ok(Packing::default());
        }
        let cfg = &self.config;
        let pad = u64::from(cfg.padding);
        let area: u64 = items
            .iter()
            .map(|i| (u64::from(i.width) + pad) * (u64::from(i.height) + pad))
            .sum();

        if area < cfg.single_page_area_limit {
            let (mut w, mut h) = (cfg.initial_canvas.max(1), cfg.initial_canvas.max(1));
            let mut wide = true;
            // Doubles one side; false once that side would leave u16 range.
            let grow = |w: &mut u32, h: &mut u32, wide: &mut bool| {
                let side = if *wide { w } else { h };
                match side.checked_mul(2).filter(|&n| n <= MAX_SIDE) {
                    Some(n) => *side = n,
                    None => return false,
                }
                *wide = !*wide;
                true
            };
            let mut fits = true;
            while fits && u64::from(w) * u64::from(h) < area {
                fits = grow(&mut w, &mut h, &mut wide);
            }
            while fits && u64::from(w) * u64::from(h) < cfg.single_page_canvas_limit {
                let mut packer = Packer::new(w, h, cfg.padding);
                let spots: Option<Vec<(usize, u32, u32)>> = items
                    .iter()
                    .enumerate()
                    .map(|(i, it)| {
                        packer
                            .insert(u32::from(it.width), u32::from(it.height), i)
                            .map(|(x, y)| (0, x, y))
                    })
                    .collect();
                if let Some(spots) = spots {
                    trace!(width = w, height = h, "single page atlas");
                    return Ok(Packing { pages: vec![(w, h)], spots });
                }
                fits = grow(&mut w, &mut h, &mut wide);
            }
        }

        let size = cfg.page_size;
        let mut page = 0usize;
        let mut packer = Packer::new(size, size, cfg.padding);
        let mut spots = Vec::with_capacity(items.len());
        for (i, it) in items.iter().enumerate() {
            let (w, h) = (u32::from(it.width), u32::from(it.height));
            let exhausted = || GlyphError::PackingExhausted {
                width: it.width,
                height: it.height,
                page: u16::try_from(size).unwrap_or(u16::MAX),
            };
            if w > size || h > size {
                return Err(exhausted());
            }
            let spot = match packer.insert(w, h, i) {
                Some(spot) => spot,
                None => {
                    page += 1;
                    packer = Packer::new(size, size, cfg.padding);
                    packer.insert(w, h, i).ok_or_else(exhausted)?
                }
            };
            spots.push((page, spot.0, spot.1));
        }
        trace!(pages = page + 1, "multi page atlas");
        Ok(Packing { pages: vec![(size, size); page + 1], spots })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::face::{FontFace, FontFaceMap};
    use crate::loader::MemoryFontLoader;
    use crate::rasterizer::{FontdueRasterizer, SyntheticRasterizer, synthetic_metrics};
    use crate::source::ANY_VERSION;

    fn source(chars: &str) -> FontSource {
        let faces: FontFaceMap = [FontFace::new("serif", vec!["mem://serif".into()])].into_iter().collect();
        FontSource::new(faces, Arc::new(MemoryFontLoader::new().with("mem://serif", chars.to_string())))
    }

    fn request(src: &FontSource, size: u16, chars: &str) -> (String, BTreeMap<String, Vec<char>>) {
        let layout = src.layout(&FontParameters::new("serif", size)).unwrap();
        src.add_texture_chars(layout.name(), chars.chars());
        (layout.name().to_string(), src.texture_requests())
    }

    #[test]
    fn page_has_solid_last_pixel() {
        let page = AtlasPage::new(4, 2);
        assert_eq!(page.pixel(3, 1), Some(255));
        assert_eq!(page.pixel(0, 0), Some(0));
        assert_eq!(page.pixel(4, 0), None);
    }

    #[test]
    fn small_set_fits_one_page() {
        let src = source("abc ");
        let (name, requests) = request(&src, 16, "abc ");
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::default().update(&mut cache, &src, src.version(), &requests).unwrap();

        assert_eq!(atlas.pages.len(), 1);
        assert_eq!((atlas.pages[0].width, atlas.pages[0].height), (128, 128));
        let a = atlas.texture(&name, 'a').unwrap();
        let m = synthetic_metrics('a', 16);
        assert_eq!((a.width, a.height, a.page), (m.width, m.height, Some(0)));
        // Whitespace has no pixels and no page.
        assert_eq!(atlas.texture(&name, ' ').unwrap().page, None);
    }

    #[test]
    fn textures_are_disjoint_and_blitted() {
        let chars: String = ('!'..='~').collect();
        let src = source(&chars);
        let (name, requests) = request(&src, 24, &chars);
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::default().update(&mut cache, &src, ANY_VERSION, &requests).unwrap();

        let placed: Vec<&CharTexture> = atlas.textures[&name].iter().filter(|t| t.page.is_some()).collect();
        assert_eq!(placed.len(), chars.chars().count());
        for (i, a) in placed.iter().enumerate() {
            let page = &atlas.pages[usize::from(a.page.unwrap())];
            assert!(u32::from(a.x + a.width) <= page.width);
            assert!(u32::from(a.y + a.height) <= page.height);
            let fill = (a.codepoint as u32 % 254) as u8 + 1;
            assert_eq!(page.pixel(u32::from(a.x), u32::from(a.y)), Some(fill));
            for b in &placed[i + 1..] {
                if a.page != b.page {
                    continue;
                }
                let apart = a.x + a.width < b.x + 1
                    || b.x + b.width < a.x + 1
                    || a.y + a.height < b.y + 1
                    || b.y + b.height < a.y + 1;
                assert!(apart, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn canvas_grows_width_first() {
        let chars: String = ('!'..='~').collect();
        let src = source(&chars);
        let (_, requests) = request(&src, 48, &chars);
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::default().update(&mut cache, &src, ANY_VERSION, &requests).unwrap();
        let page = &atlas.pages[0];
        assert_eq!(atlas.pages.len(), 1);
        assert!(page.width == page.height || page.width == page.height * 2);
        assert!(page.width > 128);
    }

    #[test]
    fn large_sets_spill_to_fixed_pages() {
        let chars: String = ('!'..='~').collect();
        let src = source(&chars);
        let (_, requests) = request(&src, 40, &chars);
        let config = AtlasConfig {
            single_page_area_limit: 0,
            page_size: 128,
            ..Default::default()
        };
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::new(config).update(&mut cache, &src, ANY_VERSION, &requests).unwrap();
        assert!(atlas.pages.len() > 1);
        assert!(atlas.pages.iter().all(|p| p.width == 128 && p.height == 128));
    }

    #[test]
    fn oversized_sides_clamp_to_texture_range() {
        let atlas = GlyphAtlas::new(AtlasConfig {
            page_size: 100_000,
            initial_canvas: u32::MAX,
            ..Default::default()
        });
        assert_eq!(atlas.config().page_size, u32::from(u16::MAX));
        assert_eq!(atlas.config().initial_canvas, u32::from(u16::MAX));
    }

    #[test]
    fn canvas_growth_stops_at_texture_range() {
        let face = FaceKey { loader: 0, source: "mem://serif".into(), size: 16 };
        let items: Vec<Item> = (0..3)
            .map(|i| Item {
                layout: 0,
                slot: i,
                codepoint: 'W',
                face: face.clone(),
                glyph: 1,
                width: 60_000,
                height: 60_000,
            })
            .collect();
        let atlas = GlyphAtlas::new(AtlasConfig {
            single_page_area_limit: u64::MAX,
            single_page_canvas_limit: u64::MAX,
            page_size: 100_000,
            ..Default::default()
        });
        let packing = atlas.pack(&items).unwrap();
        let max = u32::from(u16::MAX);
        assert_eq!(packing.pages.len(), 3);
        assert!(packing.pages.iter().all(|&(w, h)| w <= max && h <= max));
        assert!(packing.spots.iter().all(|&(page, x, y)| page < 3 && x + 60_000 <= max && y + 60_000 <= max));
    }

    #[test]
    fn glyph_larger_than_page_fails() {
        let src = source("W");
        let (_, requests) = request(&src, 200, "W");
        let config = AtlasConfig {
            single_page_area_limit: 0,
            page_size: 64,
            ..Default::default()
        };
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        assert!(GlyphAtlas::new(config).update(&mut cache, &src, ANY_VERSION, &requests).is_none());
    }

    #[test]
    fn stale_version_yields_nothing() {
        let src = source("ab");
        let (name, requests) = request(&src, 16, "a");
        let version = src.version();
        src.add_texture_chars(&name, ['b']);
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        assert!(GlyphAtlas::default().update(&mut cache, &src, version, &requests).is_none());
        let atlas = GlyphAtlas::default()
            .update(&mut cache, &src, src.version(), &src.texture_requests())
            .unwrap();
        assert_eq!(atlas.version, src.version());
    }

    #[test]
    fn empty_request_has_no_pages() {
        let src = source("a");
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::default()
            .update(&mut cache, &src, ANY_VERSION, &BTreeMap::new())
            .unwrap();
        assert!(atlas.pages.is_empty());
        assert!(atlas.textures.is_empty());
    }

    #[test]
    fn unknown_layout_is_listed_unplaced() {
        let src = source("a");
        let mut requests = BTreeMap::new();
        requests.insert("nope".to_string(), vec!['a']);
        let mut cache = GlyphCache::new(SyntheticRasterizer);
        let atlas = GlyphAtlas::default().update(&mut cache, &src, ANY_VERSION, &requests).unwrap();
        assert_eq!(atlas.textures["nope"], vec![CharTexture::unplaced('a')]);
    }

    #[test]
    fn fontdue_glyphs_land_in_the_atlas() {
        let font = include_bytes!("../tests/fixtures/DejaVuSerif.ttf");
        let faces: FontFaceMap = [FontFace::new("serif", vec!["mem://serif".into()])].into_iter().collect();
        let src = FontSource::new(faces, Arc::new(MemoryFontLoader::new().with("mem://serif", &font[..])));
        let (name, requests) = request(&src, 24, "Hg");
        let mut cache = GlyphCache::new(FontdueRasterizer);

        let layout = src.layout_by_name(&name).unwrap();
        let data = layout.add_chars(&['H', 'g'], &mut cache);
        assert_eq!(data.metrics.size, 24);
        let atlas = GlyphAtlas::default().update(&mut cache, &src, src.version(), &requests).unwrap();

        for c in ['H', 'g'] {
            let record = data.get(c).unwrap();
            let tex = atlas.texture(&name, c).unwrap();
            assert_eq!((tex.width, tex.height), (record.width, record.height));
            let page = &atlas.pages[usize::from(tex.page.unwrap())];
            let inked = (0..tex.height).any(|dy| {
                (0..tex.width).any(|dx| {
                    page.pixel(u32::from(tex.x + dx), u32::from(tex.y + dy)).is_some_and(|p| p > 0)
                })
            });
            assert!(inked, "{c} has no pixels");
        }
    }
}
