//! Font face descriptions and face selection.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Family used when a request names none, or names one with no faces.
pub const DEFAULT_FAMILY: &str = "default";

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

impl FontStyle {
    pub fn is_slanted(&self) -> bool {
        matches!(self, FontStyle::Italic | FontStyle::Oblique)
    }
}

/// CSS weight, 100..=900.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: Self = Self(400);
    pub const BOLD: Self = Self(700);
    pub const MAX: Self = Self(900);
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// CSS stretch in percent, 50..=200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FontStretch(pub u16);

impl FontStretch {
    pub const NORMAL: Self = Self(100);
    pub const ULTRA_EXPANDED: Self = Self(200);
}

impl Default for FontStretch {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// One `@font-face`: a family member and where its font files are.
///
/// `sources` are tried in order for every character; locators are
/// `document://<name>`, `local://<name>` or a filesystem path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontFace {
    pub family: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub style: FontStyle,
    #[serde(default)]
    pub weight: FontWeight,
    #[serde(default)]
    pub stretch: FontStretch,
}

impl FontFace {
    pub fn new(family: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            family: family.into(),
            sources,
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: FontStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_weight(mut self, weight: FontWeight) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_stretch(mut self, stretch: FontStretch) -> Self {
        self.stretch = stretch;
        self
    }

    /// How well this face serves `params`. Higher is better.
    pub fn score(&self, params: &FontParameters) -> u32 {
        let mut score = 0u32;
        if self.style == FontStyle::Normal {
            score += 1;
        }
        if self.weight == FontWeight::NORMAL {
            score += 1;
        }
        if self.stretch == FontStretch::NORMAL {
            score += 1;
        }

        if self.style == params.style && self.style.is_slanted() {
            score += 100;
        } else if self.style.is_slanted() && params.style.is_slanted() {
            score += 75;
        }

        let weight_diff = u32::from(FontWeight::MAX.0).saturating_sub(u32::from(params.weight.0.abs_diff(self.weight.0)));
        score += weight_diff * 10;

        let stretch_diff =
            u32::from(FontStretch::ULTRA_EXPANDED.0).saturating_sub(u32::from(params.stretch.0.abs_diff(self.stretch.0)));
        score += stretch_diff * 5;

        score
    }
}

/// Faces grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontFaceMap {
    families: HashMap<String, Vec<FontFace>>,
}

impl FontFaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, face: FontFace) {
        self.families.entry(face.family.clone()).or_default().push(face);
    }

    /// Add every face of `other`, after the faces already present.
    pub fn merge(&mut self, other: &FontFaceMap) {
        for faces in other.families.values() {
            for face in faces {
                self.add(face.clone());
            }
        }
    }

    pub fn family(&self, name: &str) -> &[FontFace] {
        self.families.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    pub fn len(&self) -> usize {
        self.families.values().map(Vec::len).sum()
    }

    /// Best face for `params`: the requested family first, then
    /// [`DEFAULT_FAMILY`]. Ties go to the face added last.
    pub fn select(&self, params: &FontParameters) -> Option<&FontFace> {
        let family = if params.family.is_empty() { DEFAULT_FAMILY } else { params.family.as_str() };
        best(self.family(family), params).or_else(|| best(self.family(DEFAULT_FAMILY), params))
    }
}

fn best<'a>(faces: &'a [FontFace], params: &FontParameters) -> Option<&'a FontFace> {
    let mut chosen: Option<(&FontFace, u32)> = None;
    for face in faces {
        let score = face.score(params);
        if chosen.is_none_or(|(_, best)| score >= best) {
            chosen = Some((face, score));
        }
    }
    chosen.map(|(face, _)| face)
}

impl FromIterator<FontFace> for FontFaceMap {
    fn from_iter<I: IntoIterator<Item = FontFace>>(iter: I) -> Self {
        let mut map = Self::new();
        for face in iter {
            map.add(face);
        }
        map
    }
}

/// A requested font: family, style and pixel size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FontParameters {
    pub family: String,
    pub size: u16,
    #[serde(default)]
    pub style: FontStyle,
    #[serde(default)]
    pub weight: FontWeight,
    #[serde(default)]
    pub stretch: FontStretch,
}

impl FontParameters {
    pub fn new(family: impl Into<String>, size: u16) -> Self {
        Self {
            family: family.into(),
            size,
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: FontStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_weight(mut self, weight: FontWeight) -> Self {
        self.weight = weight;
        self
    }

    /// Layout key, `family:style:weight:stretch:size`.
    pub fn signature(&self) -> String {
        self.to_string()
    }

    /// The parameters a layout for `face` at `size` is keyed by.
    pub fn for_face(face: &FontFace, family: &str, size: u16) -> Self {
        Self {
            family: family.to_string(),
            size,
            style: face.style,
            weight: face.weight,
            stretch: face.stretch,
        }
    }
}

impl fmt::Display for FontParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.family, self.style, self.weight.0, self.stretch.0, self.size
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed font signature: {0}")]
pub struct SignatureError(pub String);

impl FromStr for FontParameters {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SignatureError(s.to_string());
        // Family names may contain ':'; the four trailing fields may not.
        let mut parts = s.rsplitn(5, ':');
        let size = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let stretch = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let weight = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let style = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let family = parts.next().ok_or_else(bad)?.to_string();
        Ok(Self {
            family,
            size,
            style,
            weight: FontWeight(weight),
            stretch: FontStretch(stretch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faces() -> FontFaceMap {
        [
            FontFace::new("serif", vec!["local://serif.ttf".into()]),
            FontFace::new("serif", vec!["local://serif-bold.ttf".into()]).with_weight(FontWeight::BOLD),
            FontFace::new("serif", vec!["local://serif-italic.ttf".into()]).with_style(FontStyle::Italic),
            FontFace::new(DEFAULT_FAMILY, vec!["local://sans.ttf".into()]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn select_prefers_exact_weight() {
        let map = faces();
        let bold = map.select(&FontParameters::new("serif", 16).with_weight(FontWeight::BOLD)).unwrap();
        assert_eq!(bold.sources[0], "local://serif-bold.ttf");
        let normal = map.select(&FontParameters::new("serif", 16)).unwrap();
        assert_eq!(normal.sources[0], "local://serif.ttf");
    }

    #[test]
    fn oblique_request_takes_italic_face() {
        let map = faces();
        let face = map.select(&FontParameters::new("serif", 16).with_style(FontStyle::Oblique)).unwrap();
        assert_eq!(face.style, FontStyle::Italic);
    }

    #[test]
    fn unknown_family_falls_back_to_default() {
        let map = faces();
        let face = map.select(&FontParameters::new("mono", 12)).unwrap();
        assert_eq!(face.family, DEFAULT_FAMILY);
        assert!(FontFaceMap::new().select(&FontParameters::new("mono", 12)).is_none());
    }

    #[test]
    fn signature_round_trips_with_colons_in_family() {
        let params = FontParameters::new("my:font", 16).with_style(FontStyle::Italic);
        assert_eq!(params.signature(), "my:font:italic:400:100:16");
        assert_eq!(params.signature().parse::<FontParameters>().unwrap(), params);
        assert!("serif:16".parse::<FontParameters>().is_err());
    }

    #[test]
    fn score_rewards_slant_match() {
        let italic = FontFace::new("f", vec![]).with_style(FontStyle::Italic);
        let normal = FontFace::new("f", vec![]);
        let wants_italic = FontParameters::new("f", 10).with_style(FontStyle::Italic);
        assert!(italic.score(&wants_italic) > normal.score(&wants_italic));
        assert!(normal.score(&FontParameters::new("f", 10)) > italic.score(&FontParameters::new("f", 10)));
    }
}
