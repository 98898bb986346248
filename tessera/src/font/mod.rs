// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Sprite font data model.
//!
//! Faces arrive pre-baked from the content pipeline: a texture atlas plus
//! glyph rectangles, advances and kerning pairs. The library groups faces
//! into named sets (regular/bold/italic/bold-italic) and owns the
//! codepoint-range fallback table used for per-glyph substitution.

use rustc_hash::FxHashMap;
use tracing::warn;

/// Identifier of a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TextureId(pub u32);

/// Texture handle with the dimensions needed for coordinate normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Texture {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
}

/// Index of a glyph inside one face.
pub type GlyphId = u16;

/// One glyph of a sprite font: source rectangle in the atlas plus
/// pen-relative placement metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct GlyphRect {
    /// Source rectangle in texture pixels.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Offset from the pen position to the rectangle's top-left.
    pub offset_x: f32,
    pub offset_y: f32,
    /// Horizontal pen advance.
    pub advance: f32,
}

/// Vertical metrics of a face.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct FaceMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub line_gap: f32,
}

impl FaceMetrics {
    #[inline]
    pub fn line_height(&self) -> f32 {
        self.ascent + self.descent + self.line_gap
    }
}

/// Identifier of a face inside a [`FontLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceId(pub u32);

/// Identifier of a named font set inside a [`FontLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FontSetId(pub u32);

bitflags::bitflags! {
    /// Active font style toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StyleFlags: u8 {
        const BOLD = 1 << 0;
        const ITALIC = 1 << 1;
    }
}

/// A single sprite font face.
#[derive(Debug, Clone)]
pub struct FontFace {
    texture: Texture,
    metrics: FaceMetrics,
    glyphs: Vec<GlyphRect>,
    char_map: FxHashMap<char, GlyphId>,
    kerning: FxHashMap<(GlyphId, GlyphId), f32>,
    missing: Option<GlyphId>,
}

impl FontFace {
    pub fn new(texture: Texture, metrics: FaceMetrics) -> Self {
        Self {
            texture,
            metrics,
            glyphs: Vec::new(),
            char_map: FxHashMap::default(),
            kerning: FxHashMap::default(),
            missing: None,
        }
    }

    /// Registers a glyph for `ch` and returns its id.
    pub fn add_glyph(&mut self, ch: char, rect: GlyphRect) -> GlyphId {
        let id = self.glyphs.len() as GlyphId;
        self.glyphs.push(rect);
        self.char_map.insert(ch, id);
        id
    }

    /// Designates the glyph drawn for characters the face cannot represent.
    pub fn set_missing_glyph(&mut self, id: GlyphId) {
        self.missing = Some(id);
    }

    pub fn add_kerning(&mut self, left: GlyphId, right: GlyphId, adjust: f32) {
        self.kerning.insert((left, right), adjust);
    }

    #[inline]
    pub fn glyph_for_char(&self, ch: char) -> Option<GlyphId> {
        self.char_map.get(&ch).copied()
    }

    #[inline]
    pub fn missing_glyph(&self) -> Option<GlyphId> {
        self.missing
    }

    #[inline]
    pub fn glyph(&self, id: GlyphId) -> Option<&GlyphRect> {
        self.glyphs.get(id as usize)
    }

    /// Kerning adjustment between two glyphs, zero when the pair is absent.
    #[inline]
    pub fn kerning(&self, left: GlyphId, right: GlyphId) -> f32 {
        self.kerning.get(&(left, right)).copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn advance(&self, id: GlyphId) -> f32 {
        self.glyph(id).map(|g| g.advance).unwrap_or(0.0)
    }

    #[inline]
    pub fn metrics(&self) -> FaceMetrics {
        self.metrics
    }

    /// Measures a single-line string: advances plus kerning by line
    /// height.
    pub fn measure_str(&self, text: &str) -> (f32, f32) {
        let mut width = 0.0;
        let mut prev = None;
        for ch in text.chars() {
            let glyph = match self.glyph_for_char(ch).or(self.missing) {
                Some(glyph) => glyph,
                None => continue,
            };
            if let Some(prev) = prev {
                width += self.kerning(prev, glyph);
            }
            width += self.advance(glyph);
            prev = Some(glyph);
        }
        (width, self.metrics.line_height())
    }

    #[inline]
    pub fn texture(&self) -> Texture {
        self.texture
    }
}

/// Style variants of one named font.
#[derive(Debug, Clone, Copy)]
pub struct FontSet {
    pub regular: FaceId,
    pub bold: Option<FaceId>,
    pub italic: Option<FaceId>,
    pub bold_italic: Option<FaceId>,
}

impl FontSet {
    pub fn single(regular: FaceId) -> Self {
        Self {
            regular,
            bold: None,
            italic: None,
            bold_italic: None,
        }
    }

    /// Selects the face for the given style, degrading towards regular
    /// when a variant is not present.
    pub fn face_for(&self, style: StyleFlags) -> FaceId {
        match (
            style.contains(StyleFlags::BOLD),
            style.contains(StyleFlags::ITALIC),
        ) {
            (true, true) => self
                .bold_italic
                .or(self.bold)
                .or(self.italic)
                .unwrap_or(self.regular),
            (true, false) => self.bold.unwrap_or(self.regular),
            (false, true) => self.italic.unwrap_or(self.regular),
            (false, false) => self.regular,
        }
    }
}

/// Registered codepoint-range fallback.
#[derive(Debug, Clone, Copy)]
struct FallbackRange {
    start: u32,
    end: u32,
    set: FontSetId,
    /// Substitute even when the active face has a glyph for the codepoint.
    unconditional: bool,
}

/// A glyph resolved through the active set, style and fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGlyph {
    pub face: FaceId,
    pub glyph: GlyphId,
    /// True when the glyph came from a fallback set rather than the
    /// active one; the active font stack is not affected.
    pub substituted: bool,
}

/// Collection of faces, named sets and the fallback table.
#[derive(Debug, Default)]
pub struct FontLibrary {
    faces: Vec<FontFace>,
    sets: Vec<FontSet>,
    names: FxHashMap<String, FontSetId>,
    fallbacks: Vec<FallbackRange>,
}

impl FontLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_face(&mut self, face: FontFace) -> FaceId {
        let id = FaceId(self.faces.len() as u32);
        self.faces.push(face);
        id
    }

    pub fn register_set(&mut self, name: &str, set: FontSet) -> FontSetId {
        let id = FontSetId(self.sets.len() as u32);
        self.sets.push(set);
        if self.names.insert(name.to_owned(), id).is_some() {
            warn!("font set `{name}` registered twice; later wins");
        }
        id
    }

    /// Registers a fallback set for an inclusive codepoint range.
    pub fn register_fallback(
        &mut self,
        range: core::ops::RangeInclusive<u32>,
        set: FontSetId,
        unconditional: bool,
    ) {
        self.fallbacks.push(FallbackRange {
            start: *range.start(),
            end: *range.end(),
            set,
            unconditional,
        });
    }

    #[inline]
    pub fn set_by_name(&self, name: &str) -> Option<FontSetId> {
        self.names.get(name).copied()
    }

    #[inline]
    pub fn set(&self, id: FontSetId) -> Option<&FontSet> {
        self.sets.get(id.0 as usize)
    }

    #[inline]
    pub fn face(&self, id: FaceId) -> &FontFace {
        &self.faces[id.0 as usize]
    }

    fn fallback_for(&self, ch: char) -> Option<&FallbackRange> {
        let cp = ch as u32;
        self.fallbacks
            .iter()
            .find(|r| cp >= r.start && cp <= r.end)
    }

    /// Resolves `ch` through `set`/`style` and the fallback table.
    ///
    /// Substitution applies to this glyph only. Returns `None` when no
    /// reachable face can represent the character and no missing-glyph is
    /// designated.
    pub fn resolve_glyph(
        &self,
        set: FontSetId,
        style: StyleFlags,
        ch: char,
    ) -> Option<ResolvedGlyph> {
        let active = self.set(set)?;
        let face_id = active.face_for(style);
        let fallback = self.fallback_for(ch);

        if let Some(range) = fallback {
            if range.unconditional {
                if let Some(resolved) = self.resolve_in_set(range.set, style, ch) {
                    return Some(resolved);
                }
            }
        }
        let face = self.face(face_id);
        if let Some(glyph) = face.glyph_for_char(ch) {
            return Some(ResolvedGlyph {
                face: face_id,
                glyph,
                substituted: false,
            });
        }
        if let Some(range) = fallback {
            if let Some(resolved) = self.resolve_in_set(range.set, style, ch) {
                return Some(resolved);
            }
        }
        face.missing_glyph().map(|glyph| ResolvedGlyph {
            face: face_id,
            glyph,
            substituted: false,
        })
    }

    fn resolve_in_set(
        &self,
        set: FontSetId,
        style: StyleFlags,
        ch: char,
    ) -> Option<ResolvedGlyph> {
        let face_id = self.set(set)?.face_for(style);
        self.face(face_id)
            .glyph_for_char(ch)
            .map(|glyph| ResolvedGlyph {
                face: face_id,
                glyph,
                substituted: true,
            })
    }
}

/// Identifier of an icon inside an [`IconRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconId(pub u32);

/// An inline icon. Behaves like a glyph with explicit dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Icon {
    pub texture: Texture,
    /// Source rectangle in texture pixels.
    pub source: crate::Rect,
    pub width: f32,
    pub height: f32,
    /// Portion of `height` that hangs below the baseline.
    pub descender: f32,
}

/// Named icon table.
#[derive(Debug, Default)]
pub struct IconRegistry {
    icons: Vec<Icon>,
    names: FxHashMap<String, IconId>,
}

impl IconRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, icon: Icon) -> IconId {
        let id = IconId(self.icons.len() as u32);
        self.icons.push(icon);
        self.names.insert(name.to_owned(), id);
        id
    }

    #[inline]
    pub fn by_name(&self, name: &str) -> Option<IconId> {
        self.names.get(name).copied()
    }

    #[inline]
    pub fn get(&self, id: IconId) -> Option<&Icon> {
        self.icons.get(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture() -> Texture {
        Texture {
            id: TextureId(1),
            width: 256,
            height: 256,
        }
    }

    fn face_with(chars: &str) -> FontFace {
        let mut face = FontFace::new(
            texture(),
            FaceMetrics {
                ascent: 8.0,
                descent: 2.0,
                line_gap: 0.0,
            },
        );
        for ch in chars.chars() {
            face.add_glyph(
                ch,
                GlyphRect {
                    advance: 10.0,
                    width: 8.0,
                    height: 10.0,
                    ..Default::default()
                },
            );
        }
        face
    }

    #[test]
    fn style_cascade_degrades_to_regular() {
        let mut lib = FontLibrary::new();
        let regular = lib.add_face(face_with("a"));
        let bold = lib.add_face(face_with("a"));
        let set = FontSet {
            regular,
            bold: Some(bold),
            italic: None,
            bold_italic: None,
        };
        assert_eq!(set.face_for(StyleFlags::BOLD), bold);
        assert_eq!(set.face_for(StyleFlags::ITALIC), regular);
        assert_eq!(
            set.face_for(StyleFlags::BOLD | StyleFlags::ITALIC),
            bold
        );
    }

    #[test]
    fn fallback_on_glyph_miss_only() {
        let mut lib = FontLibrary::new();
        let latin = lib.add_face(face_with("ab"));
        let symbols = lib.add_face(face_with("\u{2603}b"));
        let base = lib.register_set("base", FontSet::single(latin));
        let fb = lib.register_set("symbols", FontSet::single(symbols));
        lib.register_fallback(0x2600..=0x26FF, fb, false);

        let hit = lib
            .resolve_glyph(base, StyleFlags::empty(), 'a')
            .unwrap();
        assert!(!hit.substituted);
        assert_eq!(hit.face, latin);

        let sub = lib
            .resolve_glyph(base, StyleFlags::empty(), '\u{2603}')
            .unwrap();
        assert!(sub.substituted);
        assert_eq!(sub.face, symbols);

        // Outside any fallback range and missing from the face.
        assert!(lib.resolve_glyph(base, StyleFlags::empty(), 'z').is_none());
    }

    #[test]
    fn unconditional_fallback_wins_over_active_face() {
        let mut lib = FontLibrary::new();
        let latin = lib.add_face(face_with("ab"));
        let other = lib.add_face(face_with("b"));
        let base = lib.register_set("base", FontSet::single(latin));
        let fb = lib.register_set("other", FontSet::single(other));
        lib.register_fallback('b' as u32..='b' as u32, fb, true);

        let sub = lib.resolve_glyph(base, StyleFlags::empty(), 'b').unwrap();
        assert!(sub.substituted);
        assert_eq!(sub.face, other);
    }

    #[test]
    fn kerning_defaults_to_zero() {
        let mut face = face_with("ab");
        let a = face.glyph_for_char('a').unwrap();
        let b = face.glyph_for_char('b').unwrap();
        assert_eq!(face.kerning(a, b), 0.0);
        face.add_kerning(a, b, -1.5);
        assert_eq!(face.kerning(a, b), -1.5);
        assert_eq!(face.kerning(b, a), 0.0);
    }
}
