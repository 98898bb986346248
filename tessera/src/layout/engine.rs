// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Layout engine: token stream in, command stream out.

use quill::{Span, StyleKind, Token, TokenStream};
use smallvec::SmallVec;
use swash::text::{analyze, Script};
use tracing::debug;

use super::hyphenate::HyphenationService;
use super::{
    reorder_visual, resolve_levels, Alignment, Direction, LayoutOptions, LayoutSettings,
    VerticalAlignment,
};
use crate::commands::{
    Command, CommandStream, IconCommand, LineInfo, StreamTotals, TextCommand,
};
use crate::error::LayoutError;
use crate::font::{FaceId, FontLibrary, FontSetId, IconId, IconRegistry, StyleFlags};
use crate::shaping::{
    ClusterShaper, RunProperties, ShapeRequest, ShapedChar, ShapedStringBuilder,
    ShapingService,
};
use crate::{color_from_argb, Rect};

const EPS: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceKind {
    Text,
    Icon(IconId),
    HardBreak,
    SoftHyphen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakClass {
    None,
    /// Break opportunity after this piece (breaking space).
    Breaking,
    /// Fallback opportunity, taken only when nothing better exists on
    /// the line (non-breaking space).
    NonBreaking,
}

/// One line-breaking unit: a word fragment, whitespace run, icon or
/// structural marker, plus the state-change commands attached before it.
#[derive(Debug, Clone, Copy)]
struct Piece {
    kind: PieceKind,
    /// Range into the side command buffer.
    cmds: (u32, u32),
    /// Range into the scratch glyph buffer; visual order within the
    /// piece, logical source indices.
    glyphs: (u32, u32),
    source: Span,
    width: f32,
    height: f32,
    /// For icons: portion of `height` below the baseline.
    descender: f32,
    level: u8,
    /// Face used for measurement.
    face: FaceId,
    /// Substituted or synthesized glyphs render from `face` directly
    /// instead of the active font stack.
    face_override: bool,
    break_after: BreakClass,
    whitespace: bool,
}

#[derive(Debug, Clone, Copy)]
struct HyphenGlyph {
    face: FaceId,
    record: ShapedChar,
}

#[derive(Debug, Clone, Copy)]
struct LineRecord {
    /// Range into the piece buffer, logical order.
    pieces: (u32, u32),
    /// Synthesized break hyphen, drawn adjacent to the last logical
    /// piece of the line.
    hyphen: Option<HyphenGlyph>,
    width: f32,
    trailing_ws: f32,
    x: f32,
    y: f32,
    height: f32,
    ascent: f32,
}

/// Reusable context for computing layouts.
///
/// Owns the shaping service, hyphenation dictionaries and every scratch
/// buffer, so repeated layout calls do not allocate in steady state.
pub struct LayoutContext {
    shaper: Box<dyn ShapingService>,
    hyphenation: HyphenationService,
    shape_scratch: ShapedStringBuilder,
    pieces: Vec<Piece>,
    piece_cmds: Vec<Command>,
    glyphs: Vec<ShapedChar>,
    lines: Vec<LineRecord>,
    trailing_cmds: (u32, u32),
    measure_stream: Option<Box<CommandStream>>,
}

impl Default for LayoutContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutContext {
    pub fn new() -> Self {
        Self::with_shaper(Box::new(ClusterShaper::new()))
    }

    /// Creates a context around a custom shaping service.
    pub fn with_shaper(shaper: Box<dyn ShapingService>) -> Self {
        Self {
            shaper,
            hyphenation: HyphenationService::new(),
            shape_scratch: ShapedStringBuilder::new(),
            pieces: Vec::new(),
            piece_cmds: Vec::new(),
            glyphs: Vec::new(),
            lines: Vec::new(),
            trailing_cmds: (0, 0),
            measure_stream: None,
        }
    }

    /// Computes a layout for `tokens` into `out`.
    ///
    /// `source` must be the markup string `tokens` was parsed from. The
    /// stream is cleared and rewritten; identical inputs produce
    /// identical streams.
    pub fn calculate_layout(
        &mut self,
        fonts: &FontLibrary,
        icons: &IconRegistry,
        tokens: &TokenStream,
        source: &str,
        settings: &LayoutSettings,
        out: &mut CommandStream,
    ) -> Result<(), LayoutError> {
        fonts
            .set(settings.font)
            .ok_or(LayoutError::InvalidFontSet(settings.font.0))?;
        let direction = match settings.direction {
            Direction::Auto => self.shaper.guess_properties(source).direction,
            other => other,
        };
        let base_level = (direction == Direction::RightToLeft) as u8;

        self.pieces.clear();
        self.piece_cmds.clear();
        self.glyphs.clear();
        self.lines.clear();
        self.trailing_cmds = (0, 0);
        out.clear();
        out.set_base_font(settings.font);

        self.build_pieces(fonts, icons, tokens, source, settings, base_level, out)?;
        self.break_lines(fonts, source, settings);
        self.position_lines(fonts, settings);
        self.emit(tokens, out);
        debug!(
            lines = self.lines.len(),
            glyphs = out.acquire().total_glyph_length(),
            "layout complete"
        );
        Ok(())
    }

    /// Lays out into an internal scratch stream and returns the block
    /// size (widest line, total height).
    pub fn measure(
        &mut self,
        fonts: &FontLibrary,
        icons: &IconRegistry,
        tokens: &TokenStream,
        source: &str,
        settings: &LayoutSettings,
    ) -> Result<(f32, f32), LayoutError> {
        let mut stream = self
            .measure_stream
            .take()
            .unwrap_or_else(|| Box::new(CommandStream::new()));
        let result =
            self.calculate_layout(fonts, icons, tokens, source, settings, &mut stream);
        self.measure_stream = Some(stream);
        result?;
        let width = self.lines.iter().map(|l| l.width).fold(0.0f32, f32::max);
        let height = self.lines.last().map(|l| l.y + l.height).unwrap_or(0.0);
        Ok((width, height))
    }

    // ---- phase 1: tokens to pieces -------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn build_pieces(
        &mut self,
        fonts: &FontLibrary,
        icons: &IconRegistry,
        tokens: &TokenStream,
        source: &str,
        settings: &LayoutSettings,
        base_level: u8,
        out: &mut CommandStream,
    ) -> Result<(), LayoutError> {
        let opts = settings.options;
        let mut style = StyleFlags::empty();
        let mut font_stack: SmallVec<[FontSetId; 4]> = SmallVec::new();
        font_stack.push(settings.font);
        let mut pending: SmallVec<[Command; 8]> = SmallVec::new();

        for token in tokens.iter() {
            match *token {
                Token::Text(span) => {
                    self.text_pieces(
                        fonts,
                        span.resolve(source),
                        span.start,
                        *font_stack.last().unwrap(),
                        style,
                        settings,
                        base_level,
                        &mut pending,
                    );
                }
                Token::LiteralPipe { start } => {
                    self.char_piece(
                        fonts,
                        '|',
                        Span::new(start, 2),
                        *font_stack.last().unwrap(),
                        style,
                        base_level,
                        &mut pending,
                    );
                }
                Token::Style { kind, .. } => {
                    let flag = match kind {
                        StyleKind::Bold => StyleFlags::BOLD,
                        StyleKind::Italic => StyleFlags::ITALIC,
                    };
                    let turning_on = !style.contains(flag);
                    style.toggle(flag);
                    if !opts.contains(LayoutOptions::IGNORE_FONT_STYLE_CHANGES) {
                        pending.push(if turning_on {
                            Command::PushStyle(style)
                        } else {
                            Command::PopStyle
                        });
                    }
                }
                Token::PushColor { argb, .. } => {
                    if !opts.contains(LayoutOptions::IGNORE_COLOR_CHANGES) {
                        pending.push(Command::PushColor(color_from_argb(argb)));
                    }
                }
                Token::PopColor { .. } => {
                    if !opts.contains(LayoutOptions::IGNORE_COLOR_CHANGES) {
                        pending.push(Command::PopColor);
                    }
                }
                Token::PushFont { name, .. } => {
                    let name = name.resolve(source);
                    let set = fonts
                        .set_by_name(name)
                        .ok_or_else(|| LayoutError::UnknownFont(name.to_owned()))?;
                    font_stack.push(set);
                    if !opts.contains(LayoutOptions::IGNORE_FONT_FACE_CHANGES) {
                        pending.push(Command::PushFont(set));
                    }
                }
                Token::PopFont { .. } => {
                    if font_stack.len() > 1 {
                        font_stack.pop();
                    }
                    if !opts.contains(LayoutOptions::IGNORE_FONT_FACE_CHANGES) {
                        pending.push(Command::PopFont);
                    }
                }
                Token::Icon { name, tag } => {
                    let name = name.resolve(source);
                    let id = icons
                        .by_name(name)
                        .ok_or_else(|| LayoutError::UnknownIcon(name.to_owned()))?;
                    let icon = *icons.get(id).expect("registered icon");
                    let cmds = self.take_pending(&mut pending);
                    let face = fonts
                        .set(*font_stack.last().unwrap())
                        .expect("validated set")
                        .face_for(style);
                    self.pieces.push(Piece {
                        kind: PieceKind::Icon(id),
                        cmds,
                        glyphs: (self.glyphs.len() as u32, 0),
                        source: tag,
                        width: icon.width,
                        height: icon.height,
                        descender: icon.descender,
                        level: base_level,
                        face,
                        face_override: false,
                        break_after: BreakClass::None,
                        whitespace: false,
                    });
                }
                Token::PushLink { target, .. } => {
                    let id = out.add_link(target.resolve(source));
                    pending.push(Command::PushLink(id));
                }
                Token::PopLink { .. } => {
                    pending.push(Command::PopLink);
                }
                Token::LineBreak(span) => {
                    let cmds = self.take_pending(&mut pending);
                    let face = fonts
                        .set(*font_stack.last().unwrap())
                        .expect("validated set")
                        .face_for(style);
                    self.pieces.push(Piece {
                        kind: PieceKind::HardBreak,
                        cmds,
                        glyphs: (self.glyphs.len() as u32, 0),
                        source: span,
                        width: 0.0,
                        height: 0.0,
                        descender: 0.0,
                        level: base_level,
                        face,
                        face_override: false,
                        break_after: BreakClass::None,
                        whitespace: false,
                    });
                }
                Token::SoftHyphen { start } => {
                    let cmds = self.take_pending(&mut pending);
                    let face = fonts
                        .set(*font_stack.last().unwrap())
                        .expect("validated set")
                        .face_for(style);
                    self.pieces.push(Piece {
                        kind: PieceKind::SoftHyphen,
                        cmds,
                        glyphs: (self.glyphs.len() as u32, 0),
                        source: Span::new(start, 2),
                        width: 0.0,
                        height: 0.0,
                        descender: 0.0,
                        level: base_level,
                        face,
                        face_override: false,
                        break_after: BreakClass::None,
                        whitespace: false,
                    });
                }
            }
        }
        if !pending.is_empty() {
            self.trailing_cmds = self.take_pending(&mut pending);
        }
        Ok(())
    }

    fn take_pending(&mut self, pending: &mut SmallVec<[Command; 8]>) -> (u32, u32) {
        let start = self.piece_cmds.len() as u32;
        self.piece_cmds.extend(pending.drain(..));
        (start, self.piece_cmds.len() as u32 - start)
    }

    /// Splits one text run into pieces at whitespace, face, script and
    /// bidi-level boundaries and measures each.
    #[allow(clippy::too_many_arguments)]
    fn text_pieces(
        &mut self,
        fonts: &FontLibrary,
        text: &str,
        source_base: u32,
        font: FontSetId,
        style: StyleFlags,
        settings: &LayoutSettings,
        base_level: u8,
        pending: &mut SmallVec<[Command; 8]>,
    ) {
        let shape = settings.options.contains(LayoutOptions::SHAPE);
        let levels = if shape {
            resolve_levels(text, base_level)
        } else {
            Vec::new()
        };

        #[derive(Clone, Copy, PartialEq)]
        struct Key {
            level: u8,
            script: Script,
            face: Option<FaceId>,
            substituted: bool,
            ws: Option<BreakClass>,
        }

        let mut group_start = 0usize;
        let mut group_key: Option<Key> = None;
        let mut last_script = Script::Latin;

        for (char_index, ((byte, ch), (props, _))) in text
            .char_indices()
            .zip(analyze(text.chars()))
            .enumerate()
        {
            let script = props.script();
            if script != Script::Common
                && script != Script::Inherited
                && script != Script::Unknown
            {
                last_script = script;
            }
            let level = if shape { levels[char_index] } else { base_level };
            let resolved = fonts.resolve_glyph(font, style, ch);
            let key = Key {
                level,
                script: last_script,
                face: resolved.map(|r| r.face),
                substituted: resolved.map(|r| r.substituted).unwrap_or(false),
                ws: whitespace_class(ch),
            };
            match group_key {
                Some(current) if current == key => {}
                Some(current) => {
                    let cmds = self.take_pending(pending);
                    self.measured_piece(
                        fonts, text, group_start, byte, source_base, font, style,
                        current.face, current.substituted, current.level,
                        current.script, current.ws, shape, settings, cmds,
                    );
                    group_start = byte;
                    group_key = Some(key);
                }
                None => {
                    group_start = byte;
                    group_key = Some(key);
                }
            }
        }
        if let Some(key) = group_key {
            let cmds = self.take_pending(pending);
            self.measured_piece(
                fonts,
                text,
                group_start,
                text.len(),
                source_base,
                font,
                style,
                key.face,
                key.substituted,
                key.level,
                key.script,
                key.ws,
                shape,
                settings,
                cmds,
            );
        }
    }

    /// Measures one homogeneous group `text[start..end]` into a piece.
    #[allow(clippy::too_many_arguments)]
    fn measured_piece(
        &mut self,
        fonts: &FontLibrary,
        text: &str,
        start: usize,
        end: usize,
        source_base: u32,
        font: FontSetId,
        style: StyleFlags,
        face: Option<FaceId>,
        substituted: bool,
        level: u8,
        script: Script,
        ws: Option<BreakClass>,
        shape: bool,
        settings: &LayoutSettings,
        cmds: (u32, u32),
    ) {
        if end <= start {
            return;
        }
        let group = &text[start..end];
        let group_base = source_base + start as u32;
        let face = face
            .unwrap_or_else(|| fonts.set(font).expect("validated set").face_for(style));
        let glyph_start = self.glyphs.len() as u32;

        if shape {
            let direction = if level & 1 != 0 {
                Direction::RightToLeft
            } else {
                Direction::LeftToRight
            };
            self.shape_scratch.clear();
            self.shaper.shape(
                fonts.face(face),
                &ShapeRequest {
                    text: group,
                    source_base: group_base,
                    properties: RunProperties {
                        script: settings.script.unwrap_or(script),
                        direction,
                        language: settings.language,
                    },
                },
                &mut self.shape_scratch,
            );
            self.glyphs.extend_from_slice(self.shape_scratch.as_slice());
        } else {
            let font_face = fonts.face(face);
            let mut prev = None;
            for (i, ch) in group.char_indices() {
                let glyph = font_face
                    .glyph_for_char(ch)
                    .or_else(|| {
                        // NBSP renders with the space glyph when the
                        // face has no dedicated one.
                        if ch == '\u{00A0}' {
                            font_face.glyph_for_char(' ')
                        } else {
                            None
                        }
                    })
                    .or_else(|| font_face.missing_glyph());
                let glyph = match glyph {
                    Some(glyph) => glyph,
                    None => continue,
                };
                let mut advance = font_face.advance(glyph);
                let mut offset_x = 0.0;
                if let Some(prev) = prev {
                    let kern = font_face.kerning(prev, glyph);
                    offset_x = kern;
                    advance += kern;
                }
                self.glyphs.push(ShapedChar {
                    glyph,
                    advance,
                    advance_y: 0.0,
                    offset_x,
                    offset_y: 0.0,
                    source_index: group_base + i as u32,
                });
                prev = Some(glyph);
            }
        }

        let glyph_len = self.glyphs.len() as u32 - glyph_start;
        let width: f32 = self.glyphs[glyph_start as usize..]
            .iter()
            .map(|g| g.advance)
            .sum();
        self.pieces.push(Piece {
            kind: PieceKind::Text,
            cmds,
            glyphs: (glyph_start, glyph_len),
            source: Span::new(group_base, group.len() as u32),
            width,
            height: 0.0,
            descender: 0.0,
            level,
            face,
            face_override: substituted,
            break_after: ws.unwrap_or(BreakClass::None),
            whitespace: ws.is_some(),
        });
    }

    /// Synthesizes a one-character piece (the literal pipe escape).
    #[allow(clippy::too_many_arguments)]
    fn char_piece(
        &mut self,
        fonts: &FontLibrary,
        ch: char,
        source: Span,
        font: FontSetId,
        style: StyleFlags,
        base_level: u8,
        pending: &mut SmallVec<[Command; 8]>,
    ) {
        let cmds = self.take_pending(pending);
        let resolved = fonts.resolve_glyph(font, style, ch);
        let face = resolved
            .map(|r| r.face)
            .unwrap_or_else(|| fonts.set(font).expect("validated set").face_for(style));
        let glyph_start = self.glyphs.len() as u32;
        let mut width = 0.0;
        if let Some(resolved) = resolved {
            let advance = fonts.face(resolved.face).advance(resolved.glyph);
            self.glyphs.push(ShapedChar {
                glyph: resolved.glyph,
                advance,
                advance_y: 0.0,
                offset_x: 0.0,
                offset_y: 0.0,
                source_index: source.start,
            });
            width = advance;
        }
        self.pieces.push(Piece {
            kind: PieceKind::Text,
            cmds,
            glyphs: (glyph_start, self.glyphs.len() as u32 - glyph_start),
            source,
            width,
            height: 0.0,
            descender: 0.0,
            level: base_level,
            face,
            face_override: resolved.map(|r| r.substituted).unwrap_or(false),
            break_after: BreakClass::None,
            whitespace: false,
        });
    }

    // ---- phase 2: greedy line breaking ---------------------------------

    fn break_lines(&mut self, fonts: &FontLibrary, source: &str, settings: &LayoutSettings) {
        let max_width = settings.max_width;
        let mut line_start = 0usize;
        let mut cur_width = 0.0f32;
        let mut last_breaking: Option<usize> = None;
        let mut last_soft: Option<usize> = None;
        let mut last_nbsp: Option<usize> = None;
        let mut width_at: Vec<f32> = vec![0.0; self.pieces.len()];

        let mut i = 0usize;
        while i < self.pieces.len() {
            width_at.resize(self.pieces.len(), 0.0);
            let piece = self.pieces[i];
            if piece.kind == PieceKind::HardBreak {
                self.commit_line(line_start, i + 1, None);
                line_start = i + 1;
                cur_width = 0.0;
                last_breaking = None;
                last_soft = None;
                last_nbsp = None;
                i += 1;
                continue;
            }

            let zero = piece.width <= 0.0 && !matches!(piece.kind, PieceKind::Icon(_));
            // Trailing breaking spaces may overflow the bounds; they are
            // not content.
            let overflow_exempt =
                piece.whitespace && piece.break_after == BreakClass::Breaking;
            let fits = zero
                || overflow_exempt
                || max_width.is_none_or(|mw| cur_width + piece.width <= mw + EPS);

            if fits {
                cur_width += piece.width;
                width_at[i] = cur_width;
                match piece.kind {
                    PieceKind::SoftHyphen => last_soft = Some(i),
                    _ => match piece.break_after {
                        BreakClass::Breaking => last_breaking = Some(i),
                        BreakClass::NonBreaking => last_nbsp = Some(i),
                        BreakClass::None => {}
                    },
                }
                i += 1;
                continue;
            }

            // Overflow: most recent opportunity first, non-breaking-space
            // fallback second, forced split last.
            let mw = max_width.unwrap();
            // A taken soft hyphen always renders its hyphen, independent
            // of the HYPHENATE option.
            let soft_ok = |idx: usize| {
                let advance = self.hyphen_advance(fonts, self.pieces[idx].face, true);
                width_at[idx] + advance <= mw + EPS
            };
            let opportunity = match (last_breaking, last_soft) {
                (Some(b), Some(s)) if s > b => {
                    if soft_ok(s) {
                        Some(s)
                    } else {
                        Some(b)
                    }
                }
                (Some(b), _) => Some(b),
                (None, Some(s)) if soft_ok(s) => Some(s),
                _ => None,
            };
            let opportunity = opportunity.or(last_nbsp);

            if let Some(b) = opportunity {
                let hyphen = if self.pieces[b].kind == PieceKind::SoftHyphen {
                    self.make_hyphen(
                        fonts,
                        self.pieces[b].face,
                        self.pieces[b].source.start,
                        true,
                    )
                } else {
                    None
                };
                self.commit_line(line_start, b + 1, hyphen);
                line_start = b + 1;
            } else if piece.kind == PieceKind::Text && piece.glyphs.1 > 1 {
                let at_line_start = cur_width <= 0.0;
                let budget = mw - cur_width;
                match self.force_split(fonts, source, settings, i, budget, at_line_start)
                {
                    Some(hyphen) => {
                        self.commit_line(line_start, i + 1, hyphen);
                        line_start = i + 1;
                    }
                    None => {
                        self.commit_line(line_start, i, None);
                        line_start = i;
                    }
                }
            } else if cur_width > 0.0 {
                self.commit_line(line_start, i, None);
                line_start = i;
            } else {
                // Oversized unbreakable unit alone on its line.
                self.commit_line(line_start, i + 1, None);
                line_start = i + 1;
            }
            cur_width = 0.0;
            last_breaking = None;
            last_soft = None;
            last_nbsp = None;
            i = line_start;
        }
        if line_start < self.pieces.len() {
            self.commit_line(line_start, self.pieces.len(), None);
        }
    }

    fn hyphen_advance(&self, fonts: &FontLibrary, face: FaceId, hyphenate: bool) -> f32 {
        if !hyphenate {
            return 0.0;
        }
        let face = fonts.face(face);
        face.glyph_for_char('-')
            .map(|g| face.advance(g))
            .unwrap_or(0.0)
    }

    fn make_hyphen(
        &self,
        fonts: &FontLibrary,
        face_id: FaceId,
        source_index: u32,
        hyphenate: bool,
    ) -> Option<HyphenGlyph> {
        if !hyphenate {
            return None;
        }
        let face = fonts.face(face_id);
        let glyph = face.glyph_for_char('-')?;
        Some(HyphenGlyph {
            face: face_id,
            record: ShapedChar {
                glyph,
                advance: face.advance(glyph),
                advance_y: 0.0,
                offset_x: 0.0,
                offset_y: 0.0,
                // The emitted command gets a zero-length source span, so
                // source totals stay intact.
                source_index,
            },
        })
    }

    /// Force-splits the text piece at `index` so its first half fits in
    /// `budget`; the second half is inserted right after it. Returns the
    /// hyphen to append when hyphenation applies, or `None` when not even
    /// one glyph fits and the caller should wrap first.
    fn force_split(
        &mut self,
        fonts: &FontLibrary,
        source: &str,
        settings: &LayoutSettings,
        index: usize,
        budget: f32,
        at_line_start: bool,
    ) -> Option<Option<HyphenGlyph>> {
        let piece = self.pieces[index];
        let hyphenate = settings.options.contains(LayoutOptions::HYPHENATE);
        let hyphen_advance = self.hyphen_advance(fonts, piece.face, hyphenate);
        let limit = budget - hyphen_advance;

        let rtl = piece.level & 1 != 0;
        let (g0, glen) = (piece.glyphs.0 as usize, piece.glyphs.1 as usize);
        let logical_record = |glyphs: &[ShapedChar], k: usize| -> ShapedChar {
            if rtl {
                glyphs[g0 + glen - 1 - k]
            } else {
                glyphs[g0 + k]
            }
        };
        let mut prefix = Vec::with_capacity(glen);
        let mut sum = 0.0;
        for k in 0..glen {
            sum += logical_record(&self.glyphs, k).advance;
            prefix.push(sum);
        }

        // Nearest glyph boundary under the limit.
        let mut k = prefix.iter().take_while(|w| **w <= limit + EPS).count();
        if k == 0 {
            if !at_line_start {
                return None;
            }
            k = 1;
        }
        if k >= glen {
            k = glen - 1;
        }

        // Prefer a syllable-safe boundary at or before the fitting one.
        if hyphenate {
            let start = piece.source.start as usize;
            let end = start + piece.source.len as usize;
            let word = &source[start..end];
            let breaks = self
                .hyphenation
                .break_points(settings.language.as_ref(), word);
            let best = breaks
                .iter()
                .filter_map(|b| {
                    let target = piece.source.start + *b as u32;
                    (1..glen)
                        .find(|k| logical_record(&self.glyphs, *k).source_index == target)
                        .filter(|k| prefix[*k - 1] <= limit + EPS)
                })
                .max();
            if let Some(best) = best {
                k = best;
            }
        }

        let split_source = logical_record(&self.glyphs, k).source_index;
        let first_width = prefix[k - 1];
        let second_width = sum - first_width;

        let (first_glyphs, second_glyphs) = if rtl {
            (
                ((g0 + glen - k) as u32, k as u32),
                (g0 as u32, (glen - k) as u32),
            )
        } else {
            (
                (g0 as u32, k as u32),
                ((g0 + k) as u32, (glen - k) as u32),
            )
        };

        let mut first = piece;
        first.glyphs = first_glyphs;
        first.width = first_width;
        first.source = Span::new(piece.source.start, split_source - piece.source.start);
        first.break_after = BreakClass::None;

        let mut second = piece;
        second.glyphs = second_glyphs;
        second.width = second_width;
        second.source = Span::new(
            split_source,
            piece.source.start + piece.source.len - split_source,
        );
        second.cmds = (piece.cmds.0 + piece.cmds.1, 0);

        self.pieces[index] = first;
        self.pieces.insert(index + 1, second);

        Some(self.make_hyphen(fonts, piece.face, split_source, hyphenate))
    }

    fn commit_line(&mut self, start: usize, end: usize, hyphen: Option<HyphenGlyph>) {
        if start >= end {
            return;
        }
        let pieces = &self.pieces[start..end];
        let mut width: f32 = pieces.iter().map(|p| p.width).sum();
        if let Some(h) = hyphen {
            width += h.record.advance;
        }
        let trailing_ws = pieces
            .iter()
            .rev()
            .take_while(|p| p.whitespace || p.width <= 0.0)
            .map(|p| p.width)
            .sum();
        self.lines.push(LineRecord {
            pieces: (start as u32, end as u32),
            hyphen,
            width,
            trailing_ws,
            x: 0.0,
            y: 0.0,
            height: 0.0,
            ascent: 0.0,
        });
    }

    // ---- phase 3: metrics and vertical placement -----------------------

    fn position_lines(&mut self, fonts: &FontLibrary, settings: &LayoutSettings) {
        let base_face = fonts
            .set(settings.font)
            .expect("validated set")
            .face_for(StyleFlags::empty());
        let base_metrics = fonts.face(base_face).metrics();

        let mut y = 0.0f32;
        for line in &mut self.lines {
            let mut ascent = 0.0f32;
            let mut descent = 0.0f32;
            let mut line_gap = 0.0f32;
            let mut any = false;
            for piece in &self.pieces[line.pieces.0 as usize..line.pieces.1 as usize] {
                match piece.kind {
                    PieceKind::Text if piece.glyphs.1 > 0 => {
                        let m = fonts.face(piece.face).metrics();
                        ascent = ascent.max(m.ascent);
                        descent = descent.max(m.descent);
                        line_gap = line_gap.max(m.line_gap);
                        any = true;
                    }
                    PieceKind::Icon(_) => {
                        ascent = ascent.max(piece.height - piece.descender);
                        descent = descent.max(piece.descender);
                        any = true;
                    }
                    _ => {}
                }
            }
            if !any {
                ascent = base_metrics.ascent;
                descent = base_metrics.descent;
                line_gap = base_metrics.line_gap;
            }
            line.ascent = ascent;
            line.height = ascent + descent + line_gap;
            line.y = y;
            y += line.height;
        }
        let total_height = y;

        // Two-pass alignment: horizontal residual per line, vertical
        // residual across the block once the total height is known.
        let align_width = settings
            .max_width
            .unwrap_or_else(|| self.lines.iter().map(|l| l.width).fold(0.0, f32::max));
        let y_offset = match (settings.max_height, settings.vertical_align) {
            (Some(mh), VerticalAlignment::Middle) => (mh - total_height) * 0.5,
            (Some(mh), VerticalAlignment::Bottom) => mh - total_height,
            _ => 0.0,
        };
        for line in &mut self.lines {
            let content = line.width - line.trailing_ws;
            let extra = (align_width - content).max(0.0);
            line.x = match settings.align {
                Alignment::Left => 0.0,
                Alignment::Center => extra * 0.5,
                Alignment::Right => extra,
            };
            line.y += y_offset;
        }
    }

    // ---- phase 4: reorder and emit -------------------------------------

    fn emit(&mut self, tokens: &TokenStream, out: &mut CommandStream) {
        let mut total_visible = 0u32;
        let line_total = self.lines.len();
        for li in 0..line_total {
            let line = self.lines[li];
            let header = out.push(Command::LineInfo(LineInfo::default()));
            let mut cmd_count = 0u32;
            let mut glyph_slots = 0u32;

            let (ps, pe) = (line.pieces.0 as usize, line.pieces.1 as usize);
            let levels: Vec<u8> = self.pieces[ps..pe].iter().map(|p| p.level).collect();
            let order = if levels.iter().any(|l| *l > 0) {
                reorder_visual(&levels)
            } else {
                (0..levels.len()).collect()
            };
            let last_logical = pe - ps - 1;

            for vi in order {
                let piece = self.pieces[ps + vi];
                for cmd in &self.piece_cmds
                    [piece.cmds.0 as usize..(piece.cmds.0 + piece.cmds.1) as usize]
                {
                    out.push(*cmd);
                    cmd_count += 1;
                }
                let hyphen_here = line.hyphen.filter(|_| vi == last_logical);
                // An RTL fragment reads towards the left margin, so its
                // break hyphen precedes it visually.
                if piece.level & 1 != 0 {
                    if let Some(h) = hyphen_here {
                        emit_hyphen(h, out, &mut cmd_count, &mut glyph_slots);
                        total_visible += 1;
                    }
                }
                match piece.kind {
                    PieceKind::Text => {
                        if piece.glyphs.1 > 0 {
                            let range = out.push_shaped(
                                &self.glyphs[piece.glyphs.0 as usize
                                    ..(piece.glyphs.0 + piece.glyphs.1) as usize],
                            );
                            out.push(Command::Text(TextCommand {
                                source: piece.source,
                                shaped: range,
                                width: piece.width,
                                face: piece.face_override.then_some(piece.face),
                            }));
                            cmd_count += 1;
                            glyph_slots += piece.glyphs.1;
                            total_visible += piece.glyphs.1;
                        }
                    }
                    PieceKind::Icon(id) => {
                        out.push(Command::Icon(IconCommand {
                            icon: id,
                            source: piece.source,
                            width: piece.width,
                            height: piece.height,
                            descender: piece.descender,
                        }));
                        cmd_count += 1;
                        glyph_slots += 1;
                        total_visible += 1;
                    }
                    PieceKind::HardBreak => {
                        out.push(Command::LineBreak {
                            source: piece.source,
                        });
                        cmd_count += 1;
                        // A break occupies a glyph slot but is not a
                        // visible glyph.
                        glyph_slots += 1;
                    }
                    PieceKind::SoftHyphen => {}
                }
                if piece.level & 1 == 0 {
                    if let Some(h) = hyphen_here {
                        emit_hyphen(h, out, &mut cmd_count, &mut glyph_slots);
                        total_visible += 1;
                    }
                }
            }
            if li == line_total - 1 && self.trailing_cmds.1 > 0 {
                for cmd in &self.piece_cmds[self.trailing_cmds.0 as usize
                    ..(self.trailing_cmds.0 + self.trailing_cmds.1) as usize]
                {
                    out.push(*cmd);
                    cmd_count += 1;
                }
            }
            out.patch(
                header,
                Command::LineInfo(LineInfo {
                    bounds: Rect::new(line.x, line.y, line.width, line.height),
                    ascent: line.ascent,
                    glyphs: glyph_slots,
                    commands: cmd_count,
                }),
            );
        }
        out.push(Command::End);
        out.set_totals(StreamTotals {
            source_len: tokens.source_len() as u32,
            glyph_len: total_visible,
            lines: line_total as u32,
        });
    }
}

fn emit_hyphen(
    hyphen: HyphenGlyph,
    out: &mut CommandStream,
    cmd_count: &mut u32,
    glyph_slots: &mut u32,
) {
    let range = out.push_shaped(&[hyphen.record]);
    out.push(Command::Text(TextCommand {
        source: Span::new(hyphen.record.source_index, 0),
        shaped: range,
        width: hyphen.record.advance,
        face: Some(hyphen.face),
    }));
    *cmd_count += 1;
    *glyph_slots += 1;
}

#[inline]
fn whitespace_class(ch: char) -> Option<BreakClass> {
    match ch {
        ' ' | '\t' => Some(BreakClass::Breaking),
        '\u{00A0}' => Some(BreakClass::NonBreaking),
        _ => None,
    }
}
