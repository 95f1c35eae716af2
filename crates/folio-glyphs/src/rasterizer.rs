//! Rasterization backends.
//!
//! A [`Rasterizer`] turns font bytes plus a pixel size into a [`RasterFace`].
//! Faces are owned by one worker's glyph cache and never shared, so they
//! only need to be `Send`.

use bytes::Bytes;

use crate::error::{GlyphError, Result};

/// Face-wide vertical metrics at one pixel size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FaceMetrics {
    /// Pixel size the face was opened at. Zero means "not measured yet".
    pub size: u16,
    pub height: u16,
    pub ascender: i16,
    /// Negative below the baseline.
    pub descender: i16,
    pub underline_position: i16,
    pub underline_thickness: u16,
}

/// Per-glyph box in pixels, y up from the baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GlyphMetrics {
    pub width: u16,
    pub height: u16,
    pub bearing_x: i16,
    /// Top of the glyph box above the baseline.
    pub bearing_y: i16,
    pub advance: u16,
}

/// Coverage mask, row-major, one byte per pixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl GlyphBitmap {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

pub trait RasterFace: Send {
    fn metrics(&self) -> FaceMetrics;

    /// Glyph index of `c`, `None` if the face has no glyph for it.
    fn glyph_index(&self, c: char) -> Option<u16>;

    fn glyph_metrics(&self, glyph: u16) -> GlyphMetrics;

    fn rasterize(&self, glyph: u16) -> GlyphBitmap;

    /// Horizontal adjustment between two glyphs of this face.
    fn kerning(&self, _left: u16, _right: u16) -> i16 {
        0
    }
}

pub trait Rasterizer: Send {
    fn load_face(&self, source: &str, data: Bytes, size: u16) -> Result<Box<dyn RasterFace>>;
}

// ── fontdue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct FontdueRasterizer;

struct FontdueFace {
    font: fontdue::Font,
    px: f32,
    size: u16,
}

impl Rasterizer for FontdueRasterizer {
    fn load_face(&self, source: &str, data: Bytes, size: u16) -> Result<Box<dyn RasterFace>> {
        let settings = fontdue::FontSettings {
            scale: f32::from(size.max(1)),
            ..fontdue::FontSettings::default()
        };
        let font = fontdue::Font::from_bytes(data, settings).map_err(|e| GlyphError::FontLoad {
            font: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(FontdueFace {
            font,
            px: f32::from(size),
            size,
        }))
    }
}

impl RasterFace for FontdueFace {
    fn metrics(&self) -> FaceMetrics {
        let Some(line) = self.font.horizontal_line_metrics(self.px) else {
            return FaceMetrics {
                size: self.size,
                height: self.size,
                ascender: self.size as i16,
                ..Default::default()
            };
        };
        let descender = line.descent.round() as i16;
        FaceMetrics {
            size: self.size,
            height: line.new_line_size.round().max(0.0) as u16,
            ascender: line.ascent.round() as i16,
            descender,
            // fontdue exposes no underline table; sit halfway into the descender.
            underline_position: descender / 2,
            underline_thickness: (self.size / 14).max(1),
        }
    }

    fn glyph_index(&self, c: char) -> Option<u16> {
        match self.font.lookup_glyph_index(c) {
            0 => None,
            index => Some(index),
        }
    }

    fn glyph_metrics(&self, glyph: u16) -> GlyphMetrics {
        let m = self.font.metrics_indexed(glyph, self.px);
        GlyphMetrics {
            width: m.width as u16,
            height: m.height as u16,
            bearing_x: m.xmin as i16,
            bearing_y: (m.ymin + m.height as i32) as i16,
            advance: m.advance_width.round().max(0.0) as u16,
        }
    }

    fn rasterize(&self, glyph: u16) -> GlyphBitmap {
        let (m, data) = self.font.rasterize_indexed(glyph, self.px);
        GlyphBitmap {
            width: m.width as u16,
            height: m.height as u16,
            data,
        }
    }

    fn kerning(&self, left: u16, right: u16) -> i16 {
        self.font
            .horizontal_kern_indexed(left, right, self.px)
            .map_or(0, |k| k.round() as i16)
    }
}

// ── Synthetic ───────────────────────────────────────────────────────────────

/// Deterministic faces without font files.
///
/// The font "bytes" are UTF-8 text listing the characters the face covers.
/// Glyph boxes, bitmaps and kerning are pure functions of the characters, so
/// tests can predict every number.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticRasterizer;

struct SyntheticFace {
    chars: Vec<char>,
    size: u16,
}

impl SyntheticFace {
    fn char_of(&self, glyph: u16) -> Option<char> {
        self.chars.get(usize::from(glyph).checked_sub(1)?).copied()
    }
}

/// Glyph box a synthetic face reports for `c` at `size`.
pub fn synthetic_metrics(c: char, size: u16) -> GlyphMetrics {
    if c.is_whitespace() {
        return GlyphMetrics {
            advance: size / 3,
            ..Default::default()
        };
    }
    let code = c as u32;
    let width = size / 2 + (code % 3) as u16;
    let height = size / 2 + (code % 5) as u16;
    GlyphMetrics {
        width,
        height,
        bearing_x: 1,
        bearing_y: height as i16,
        advance: width + 2,
    }
}

/// Kerning a synthetic face reports for a pair: -1 when the code points sum
/// to a multiple of 3.
pub fn synthetic_kerning(left: char, right: char) -> i16 {
    if (left as u32 + right as u32) % 3 == 0 && !left.is_whitespace() && !right.is_whitespace() {
        -1
    } else {
        0
    }
}

impl Rasterizer for SyntheticRasterizer {
    fn load_face(&self, source: &str, data: Bytes, size: u16) -> Result<Box<dyn RasterFace>> {
        let text = std::str::from_utf8(&data).map_err(|e| GlyphError::FontLoad {
            font: source.to_string(),
            reason: e.to_string(),
        })?;
        let mut chars: Vec<char> = text.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        if chars.is_empty() {
            return Err(GlyphError::FontLoad {
                font: source.to_string(),
                reason: "empty synthetic face".to_string(),
            });
        }
        Ok(Box::new(SyntheticFace { chars, size }))
    }
}

impl RasterFace for SyntheticFace {
    fn metrics(&self) -> FaceMetrics {
        FaceMetrics {
            size: self.size,
            height: self.size + self.size / 4,
            ascender: self.size as i16,
            descender: -((self.size / 4) as i16),
            underline_position: -((self.size / 8) as i16),
            underline_thickness: 1,
        }
    }

    fn glyph_index(&self, c: char) -> Option<u16> {
        let pos = self.chars.binary_search(&c).ok()?;
        u16::try_from(pos + 1).ok()
    }

    fn glyph_metrics(&self, glyph: u16) -> GlyphMetrics {
        self.char_of(glyph)
            .map(|c| synthetic_metrics(c, self.size))
            .unwrap_or_default()
    }

    fn rasterize(&self, glyph: u16) -> GlyphBitmap {
        let Some(c) = self.char_of(glyph) else {
            return GlyphBitmap::default();
        };
        let m = synthetic_metrics(c, self.size);
        let fill = (c as u32 % 254) as u8 + 1;
        GlyphBitmap {
            width: m.width,
            height: m.height,
            data: vec![fill; usize::from(m.width) * usize::from(m.height)],
        }
    }

    fn kerning(&self, left: u16, right: u16) -> i16 {
        match (self.char_of(left), self.char_of(right)) {
            (Some(l), Some(r)) => synthetic_kerning(l, r),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_face_covers_listed_chars_only() {
        let face = SyntheticRasterizer.load_face("mem://abc", Bytes::from_static(b"cab "), 16).unwrap();
        assert!(face.glyph_index('a').is_some());
        assert!(face.glyph_index(' ').is_some());
        assert!(face.glyph_index('z').is_none());
        assert_eq!(face.metrics().size, 16);
    }

    #[test]
    fn synthetic_bitmap_matches_metrics() {
        let face = SyntheticRasterizer.load_face("mem", Bytes::from_static(b"xy"), 20).unwrap();
        let glyph = face.glyph_index('x').unwrap();
        let m = face.glyph_metrics(glyph);
        let bmp = face.rasterize(glyph);
        assert_eq!((bmp.width, bmp.height), (m.width, m.height));
        assert_eq!(bmp.data.len(), usize::from(m.width) * usize::from(m.height));
        assert!(bmp.data.iter().all(|p| *p > 0));
    }

    #[test]
    fn synthetic_rejects_empty_face() {
        assert!(SyntheticRasterizer.load_face("mem", Bytes::new(), 16).is_err());
    }

    #[test]
    fn fontdue_rejects_garbage() {
        let err = FontdueRasterizer
            .load_face("local://broken.ttf", Bytes::from_static(b"not a font at all"), 16)
            .err()
            .unwrap();
        assert!(matches!(err, GlyphError::FontLoad { .. }));
    }

    #[test]
    fn kerning_is_symmetric_in_sum() {
        assert_eq!(synthetic_kerning('a', 'b'), synthetic_kerning('b', 'a'));
        assert_eq!(synthetic_kerning(' ', 'a'), 0);
    }

    // ── fontdue ─────────────────────────────────────────────────────────

    const SERIF: &[u8] = include_bytes!("../tests/fixtures/DejaVuSerif.ttf");

    fn serif(size: u16) -> Box<dyn RasterFace> {
        FontdueRasterizer
            .load_face("local://DejaVuSerif.ttf", Bytes::from_static(SERIF), size)
            .unwrap()
    }

    #[test]
    fn fontdue_face_metrics() {
        let m = serif(32).metrics();
        assert_eq!(m.size, 32);
        assert!(m.ascender > 0);
        assert!(m.descender < 0);
        assert!(i32::from(m.height) + 1 >= i32::from(m.ascender) - i32::from(m.descender));
        assert!(m.underline_position <= 0);
        assert!(m.underline_thickness >= 1);
    }

    #[test]
    fn fontdue_glyph_boxes_and_bitmaps() {
        let face = serif(32);
        let ascender = face.metrics().ascender;

        let cap = face.glyph_metrics(face.glyph_index('H').unwrap());
        assert!(cap.width > 0 && cap.height > 0 && cap.advance > 0);
        // Top of the box, measured up from the baseline.
        assert!(cap.bearing_y > 0 && cap.bearing_y <= ascender);

        let g = face.glyph_index('g').unwrap();
        let descending = face.glyph_metrics(g);
        assert!(descending.bearing_y < descending.height as i16);

        let bmp = face.rasterize(g);
        assert_eq!((bmp.width, bmp.height), (descending.width, descending.height));
        assert_eq!(bmp.data.len(), usize::from(bmp.width) * usize::from(bmp.height));
        assert!(bmp.data.iter().any(|p| *p > 0));

        let space = face.glyph_metrics(face.glyph_index(' ').unwrap());
        assert!(space.advance > 0);
        assert!(face.rasterize(face.glyph_index(' ').unwrap()).is_empty());
        assert!(face.glyph_index('\u{10FFFD}').is_none());
    }

    #[test]
    fn fontdue_kerning_matches_the_font() {
        let face = serif(32);
        let font = fontdue::Font::from_bytes(SERIF, fontdue::FontSettings { scale: 32.0, ..Default::default() }).unwrap();
        for (left, right) in [('A', 'V'), ('T', 'o'), ('H', 'H')] {
            let expected = font.horizontal_kern(left, right, 32.0).map_or(0, |k| k.round() as i16);
            let got = face.kerning(face.glyph_index(left).unwrap(), face.glyph_index(right).unwrap());
            assert_eq!(got, expected, "{left}{right}");
        }
    }
}
