// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Glyph shaping service seam.
//!
//! The layout engine hands contiguous script/direction runs to a
//! [`ShapingService`] and gets back positioned glyphs with logical source
//! indices. The default [`ClusterShaper`] covers sprite fonts: character
//! analysis and mirroring come from swash, advances and kerning from the
//! face. A complex-shaper binding (ligatures, script-specific substitution)
//! plugs in behind the same trait and is out of scope here.

use std::sync::Arc;

use swash::text::{analyze, BidiClass, Codepoint as _, Language, Script};

use crate::font::{FontFace, GlyphId};
use crate::layout::Direction;

/// One positioned glyph produced by shaping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapedChar {
    pub glyph: GlyphId,
    /// Horizontal pen advance.
    pub advance: f32,
    /// Vertical pen advance, zero for horizontal layouts.
    pub advance_y: f32,
    /// Offset from the pen position applied when drawing only.
    pub offset_x: f32,
    pub offset_y: f32,
    /// Byte offset of the originating character in the source markup.
    /// Always logical order, even when glyphs are emitted visually.
    pub source_index: u32,
}

/// Language/script/direction of a run to be shaped.
///
/// `direction` is always resolved; `Auto` never reaches a shaper.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunProperties {
    pub script: Script,
    pub direction: Direction,
    pub language: Option<Language>,
}

impl Default for RunProperties {
    fn default() -> Self {
        Self {
            script: Script::Latin,
            direction: Direction::LeftToRight,
            language: None,
        }
    }
}

/// A shaping request for one run.
#[derive(Debug, Clone, Copy)]
pub struct ShapeRequest<'a> {
    pub text: &'a str,
    /// Byte offset of `text` inside the full source markup; emitted
    /// source indices are absolute.
    pub source_base: u32,
    pub properties: RunProperties,
}

/// Converts runs of codepoints into positioned glyphs.
pub trait ShapingService {
    /// Shapes one run into `out`, appending glyphs in visual order with
    /// logical source indices.
    fn shape(
        &mut self,
        face: &FontFace,
        request: &ShapeRequest<'_>,
        out: &mut ShapedStringBuilder,
    );

    /// Infers language/script/direction for text whose properties were
    /// not configured.
    fn guess_properties(&self, text: &str) -> RunProperties;
}

/// Immutable, reference-counted output of shaping one run.
#[derive(Debug, Clone)]
pub struct ShapedString {
    chars: Arc<[ShapedChar]>,
    advance: f32,
}

impl ShapedString {
    #[inline]
    pub fn chars(&self) -> &[ShapedChar] {
        &self.chars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Total horizontal advance of the run.
    #[inline]
    pub fn advance(&self) -> f32 {
        self.advance
    }
}

/// Growable accumulator used while assembling shaped runs.
#[derive(Debug, Default)]
pub struct ShapedStringBuilder {
    chars: Vec<ShapedChar>,
}

impl ShapedStringBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chars: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, ch: ShapedChar) {
        self.chars.push(ch);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[ShapedChar] {
        &self.chars
    }

    #[inline]
    pub fn clear(&mut self) {
        self.chars.clear();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.chars.capacity()
    }

    /// Resizes the backing allocation.
    ///
    /// Shrinking below the current length is a contract violation and
    /// fails fast rather than silently truncating.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity < self.chars.len() {
            panic!(
                "shaped string capacity {} is out of range: {} glyphs are live",
                capacity,
                self.chars.len()
            );
        }
        if capacity > self.chars.capacity() {
            self.chars.reserve_exact(capacity - self.chars.len());
        } else {
            self.chars.shrink_to(capacity);
        }
    }

    /// Freezes the accumulated run, leaving the builder empty and
    /// reusable.
    pub fn freeze(&mut self) -> ShapedString {
        let advance = self.chars.iter().map(|c| c.advance).sum();
        ShapedString {
            chars: Arc::from(self.chars.drain(..).collect::<Vec<_>>()),
            advance,
        }
    }
}

/// Default shaper for sprite fonts.
///
/// Per-character clusters: mirrors brackets on RTL runs, zero-advances
/// nonspacing marks over their base, applies face advances and kerning,
/// and emits visual order while keeping logical source indices.
#[derive(Default)]
pub struct ClusterShaper {
    scratch: Vec<(char, u32)>,
}

impl ClusterShaper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShapingService for ClusterShaper {
    fn shape(
        &mut self,
        face: &FontFace,
        request: &ShapeRequest<'_>,
        out: &mut ShapedStringBuilder,
    ) {
        let rtl = request.properties.direction == Direction::RightToLeft;
        self.scratch.clear();
        for (offset, ch) in request.text.char_indices() {
            let ch = if rtl { ch.mirror().unwrap_or(ch) } else { ch };
            self.scratch.push((ch, request.source_base + offset as u32));
        }

        // Shape in logical order so kerning sees real neighbors, then
        // reverse the emitted range for RTL runs.
        let first = out.len();
        let mut prev_glyph: Option<GlyphId> = None;
        for &(ch, source_index) in &self.scratch {
            let glyph = match face.glyph_for_char(ch).or_else(|| face.missing_glyph()) {
                Some(glyph) => glyph,
                None => continue,
            };
            let mut advance = face.advance(glyph);
            let mut offset_x = 0.0;
            let mut offset_y = 0.0;
            if ch.bidi_class() == BidiClass::NSM {
                // Draw the mark over the preceding base glyph.
                offset_x = -prev_glyph.map(|g| face.advance(g)).unwrap_or(advance);
                offset_y = 0.0;
                advance = 0.0;
            } else if let Some(prev) = prev_glyph {
                let kern = face.kerning(prev, glyph);
                offset_x += kern;
                advance += kern;
            }
            out.push(ShapedChar {
                glyph,
                advance,
                advance_y: 0.0,
                offset_x,
                offset_y,
                source_index,
            });
            prev_glyph = Some(glyph);
        }
        if rtl {
            out.chars[first..].reverse();
        }
    }

    fn guess_properties(&self, text: &str) -> RunProperties {
        let mut script = None;
        let mut direction = None;
        for ((props, _boundary), ch) in analyze(text.chars()).zip(text.chars()) {
            if script.is_none() {
                let s = props.script();
                if s != Script::Common && s != Script::Inherited && s != Script::Unknown {
                    script = Some(s);
                }
            }
            if direction.is_none() {
                direction = match ch.bidi_class() {
                    BidiClass::L => Some(Direction::LeftToRight),
                    BidiClass::R | BidiClass::AL => Some(Direction::RightToLeft),
                    _ => None,
                };
            }
            if script.is_some() && direction.is_some() {
                break;
            }
        }
        RunProperties {
            script: script.unwrap_or(Script::Latin),
            direction: direction.unwrap_or(Direction::LeftToRight),
            language: None,
        }
    }
}
