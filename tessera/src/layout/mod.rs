// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Text layout engine.
//!
//! Consumes a token stream and a layout configuration and produces a
//! replayable [`CommandStream`](crate::CommandStream): line-broken,
//! bidi-reordered, alignment-resolved draw and state-change records.

mod bidi;
mod engine;
mod hyphenate;
#[cfg(test)]
mod layout_tests;

pub use engine::LayoutContext;
pub use hyphenate::HyphenationService;

pub(crate) use bidi::{reorder_visual, resolve_levels};

use swash::text::{Language, Script};

use crate::font::FontSetId;

/// Base text direction of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Infer from the first strong character.
    Auto,
    #[default]
    LeftToRight,
    RightToLeft,
}

/// Horizontal alignment of each line inside the layout width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

/// Vertical alignment of the text block inside the layout height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum VerticalAlignment {
    #[default]
    Top,
    Middle,
    Bottom,
}

bitflags::bitflags! {
    /// Layout behavior toggles.
    ///
    /// The IGNORE_* flags suppress emission of the corresponding
    /// state-change commands; line-breaking geometry is computed once and
    /// is not affected by them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayoutOptions: u32 {
        /// Prefer syllable-safe split points and insert a visible hyphen
        /// when force-splitting oversized words.
        const HYPHENATE = 1 << 0;
        /// Route text through the shaping service per script/direction
        /// segment instead of measuring glyph-by-glyph.
        const SHAPE = 1 << 1;
        const IGNORE_COLOR_CHANGES = 1 << 2;
        const IGNORE_FONT_FACE_CHANGES = 1 << 3;
        const IGNORE_FONT_STYLE_CHANGES = 1 << 4;
        /// Umbrella for every IGNORE_*_CHANGES flag.
        const IGNORE_STYLE_CHANGES = Self::IGNORE_COLOR_CHANGES.bits()
            | Self::IGNORE_FONT_FACE_CHANGES.bits()
            | Self::IGNORE_FONT_STYLE_CHANGES.bits();
    }
}

/// Configuration of one layout call. Immutable while the call runs.
#[derive(Debug, Clone, Copy)]
pub struct LayoutSettings {
    pub font: FontSetId,
    pub max_width: Option<f32>,
    pub max_height: Option<f32>,
    pub align: Alignment,
    pub vertical_align: VerticalAlignment,
    pub options: LayoutOptions,
    pub direction: Direction,
    /// Base script for shaping; inferred per run when unset.
    pub script: Option<Script>,
    pub language: Option<Language>,
}

impl LayoutSettings {
    pub fn new(font: FontSetId) -> Self {
        Self {
            font,
            max_width: None,
            max_height: None,
            align: Alignment::default(),
            vertical_align: VerticalAlignment::default(),
            options: LayoutOptions::default(),
            direction: Direction::default(),
            script: None,
            language: None,
        }
    }
}
