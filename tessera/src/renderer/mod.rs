// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Command stream replay: drawing, hit-testing and link interaction.

mod glyph_shader;

pub use glyph_shader::{GlyphContext, GlyphShader, GlyphShaderAction, GlyphShaderSlot};

use smallvec::SmallVec;
use tracing::warn;

use crate::batch::SpriteBatch;
use crate::commands::{Command, LinkId, StreamReader};
use crate::font::{FontLibrary, FontSetId, IconRegistry, StyleFlags};
use crate::{Color, Rect};

/// Maps a link target to its visited state.
pub trait LinkStateEvaluator {
    fn visited(&self, target: &str) -> bool;
}

/// Produces the render color of link glyphs from their interaction
/// state. Injected strategy, not a fixed palette.
pub trait LinkColorizer {
    fn colorize(
        &self,
        target: &str,
        visited: bool,
        hovering: bool,
        active: bool,
        base: Color,
    ) -> Color;
}

/// Treats every link as unvisited.
pub struct NoLinkState;

impl LinkStateEvaluator for NoLinkState {
    fn visited(&self, _target: &str) -> bool {
        false
    }
}

/// Leaves link glyphs at the base color.
pub struct PlainLinkColorizer;

impl LinkColorizer for PlainLinkColorizer {
    fn colorize(
        &self,
        _target: &str,
        _visited: bool,
        _hovering: bool,
        _active: bool,
        base: Color,
    ) -> Color {
        base
    }
}

/// Result of a position hit test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Hit {
    line: u32,
    glyph: Option<u32>,
    link: Option<LinkId>,
}

/// Replays command streams into a sprite batch and answers glyph-level
/// queries about them.
pub struct TextRenderer {
    hovered: Option<LinkId>,
    active: Option<LinkId>,
    link_state: Box<dyn LinkStateEvaluator>,
    link_colors: Box<dyn LinkColorizer>,
    shader: GlyphShaderSlot,
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRenderer {
    pub fn new() -> Self {
        Self {
            hovered: None,
            active: None,
            link_state: Box::new(NoLinkState),
            link_colors: Box::new(PlainLinkColorizer),
            shader: GlyphShaderSlot::None,
        }
    }

    pub fn set_link_state_evaluator(&mut self, evaluator: Box<dyn LinkStateEvaluator>) {
        self.link_state = evaluator;
    }

    pub fn set_link_colorizer(&mut self, colorizer: Box<dyn LinkColorizer>) {
        self.link_colors = colorizer;
    }

    pub fn set_glyph_shader(&mut self, shader: GlyphShaderSlot) {
        self.shader = shader;
    }

    #[inline]
    pub fn hovered_link(&self) -> Option<LinkId> {
        self.hovered
    }

    #[inline]
    pub fn active_link(&self) -> Option<LinkId> {
        self.active
    }

    /// Replays `reader` into `batch` at `position`, returning the bounds
    /// actually drawn.
    ///
    /// Each glyph sprite carries its glyph index as custom data for
    /// shader backends.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        batch: &mut SpriteBatch<u32>,
        fonts: &FontLibrary,
        icons: &IconRegistry,
        reader: &StreamReader<'_>,
        position: [f32; 2],
        color: Color,
        depth: f32,
    ) -> Rect {
        const MAX_PASSES: u32 = 8;

        let mut colors: SmallVec<[Color; 4]> = SmallVec::new();
        colors.push(color);
        let mut font_stack: SmallVec<[FontSetId; 4]> = SmallVec::new();
        font_stack.push(reader.base_font());
        let mut styles: SmallVec<[StyleFlags; 4]> = SmallVec::new();
        styles.push(StyleFlags::empty());
        let mut links: SmallVec<[LinkId; 2]> = SmallVec::new();

        let mut pen_x = position[0];
        let mut baseline = position[1];
        let mut glyph_index = 0u32;
        let mut bounds: Option<Rect> = None;

        for command in reader.commands() {
            match *command {
                Command::LineInfo(info) => {
                    pen_x = position[0] + info.bounds.x;
                    baseline = position[1] + info.bounds.y + info.ascent;
                    let line_rect = Rect::new(
                        position[0] + info.bounds.x,
                        position[1] + info.bounds.y,
                        info.bounds.width,
                        info.bounds.height,
                    );
                    bounds = Some(match bounds {
                        None => line_rect,
                        Some(b) => union(b, line_rect),
                    });
                }
                Command::Text(text) => {
                    let face_id = text.face.unwrap_or_else(|| {
                        let set = fonts
                            .set(*font_stack.last().unwrap())
                            .or_else(|| fonts.set(reader.base_font()))
                            .expect("layout validated the base font set");
                        set.face_for(*styles.last().unwrap())
                    });
                    let face = fonts.face(face_id);
                    let base_color = self.glyph_color(reader, &links, &colors);
                    for shaped in reader.shaped(text.shaped) {
                        let mut pass = 0u32;
                        loop {
                            let mut ctx = GlyphContext {
                                glyph: shaped.glyph,
                                x: pen_x + shaped.offset_x,
                                y: baseline + shaped.offset_y,
                                scale: 1.0,
                                color: base_color,
                                glyph_index,
                                pass,
                            };
                            let action = self.shader.apply(&mut ctx);
                            if let Some(rect) = face.glyph(ctx.glyph) {
                                if rect.width > 0.0 && rect.height > 0.0 {
                                    batch.draw(
                                        face.texture(),
                                        Rect::new(
                                            ctx.x + rect.offset_x,
                                            ctx.y + rect.offset_y,
                                            rect.width * ctx.scale,
                                            rect.height * ctx.scale,
                                        ),
                                        Some(Rect::new(
                                            rect.x,
                                            rect.y,
                                            rect.width,
                                            rect.height,
                                        )),
                                        ctx.color,
                                        0.0,
                                        [0.0, 0.0],
                                        crate::batch::SpriteEffects::empty(),
                                        depth,
                                        glyph_index,
                                    );
                                }
                            }
                            match action {
                                GlyphShaderAction::Continue => break,
                                GlyphShaderAction::RunAgain => {
                                    pass += 1;
                                    if pass >= MAX_PASSES {
                                        warn!(
                                            glyph_index,
                                            "glyph shader pass limit reached"
                                        );
                                        break;
                                    }
                                }
                            }
                        }
                        pen_x += shaped.advance;
                        glyph_index += 1;
                    }
                }
                Command::Icon(icon) => {
                    if let Some(data) = icons.get(icon.icon) {
                        let color = self.glyph_color(reader, &links, &colors);
                        batch.draw(
                            data.texture,
                            Rect::new(
                                pen_x,
                                baseline - (icon.height - icon.descender),
                                icon.width,
                                icon.height,
                            ),
                            Some(data.source),
                            color,
                            0.0,
                            [0.0, 0.0],
                            crate::batch::SpriteEffects::empty(),
                            depth,
                            glyph_index,
                        );
                    }
                    pen_x += icon.width;
                    glyph_index += 1;
                }
                Command::LineBreak { .. } => {
                    glyph_index += 1;
                }
                Command::PushColor(c) => colors.push(c),
                Command::PopColor => {
                    if colors.len() > 1 {
                        colors.pop();
                    }
                }
                Command::PushFont(set) => font_stack.push(set),
                Command::PopFont => {
                    if font_stack.len() > 1 {
                        font_stack.pop();
                    }
                }
                Command::PushStyle(style) => styles.push(style),
                Command::PopStyle => {
                    if styles.len() > 1 {
                        styles.pop();
                    }
                }
                Command::PushLink(id) => links.push(id),
                Command::PopLink => {
                    links.pop();
                }
                Command::End => break,
            }
        }
        bounds.unwrap_or(Rect::new(position[0], position[1], 0.0, 0.0))
    }

    fn glyph_color(
        &self,
        reader: &StreamReader<'_>,
        links: &[LinkId],
        colors: &[Color],
    ) -> Color {
        let base = *colors.last().expect("base color");
        match links.last() {
            Some(link) => {
                let target = reader.link_target(*link).unwrap_or("");
                let visited = self.link_state.visited(target);
                self.link_colors.colorize(
                    target,
                    visited,
                    self.hovered == Some(*link),
                    self.active == Some(*link),
                    base,
                )
            }
            None => base,
        }
    }

    /// Line index under `y`, resolving past-the-end positions to the
    /// last line when `stretch_last_line` is set.
    pub fn line_at_position(
        &self,
        reader: &StreamReader<'_>,
        _x: f32,
        y: f32,
        stretch_last_line: bool,
    ) -> Option<usize> {
        let commands = reader.commands();
        let mut idx = 0usize;
        let mut line = 0usize;
        let mut last_bottom = None;
        while let Some(Command::LineInfo(info)) = commands.get(idx) {
            if y >= info.bounds.y && y < info.bounds.y + info.bounds.height {
                return Some(line);
            }
            last_bottom = Some(info.bounds.y + info.bounds.height);
            idx += 1 + info.commands as usize;
            line += 1;
        }
        match last_bottom {
            Some(bottom) if stretch_last_line && y >= bottom => Some(line - 1),
            _ => None,
        }
    }

    /// Glyph and line under `point`. Hit-testing is expected to miss;
    /// misses are `None`, not errors.
    pub fn glyph_at_position(
        &self,
        reader: &StreamReader<'_>,
        x: f32,
        y: f32,
    ) -> (Option<usize>, Option<usize>) {
        match self.hit_test(reader, x, y) {
            Some(hit) => (
                hit.glyph.map(|g| g as usize),
                Some(hit.line as usize),
            ),
            None => (None, None),
        }
    }

    /// Bounds of the glyph slot `glyph_index`, spanning the line height.
    /// A line break slot reports zero width at its pen position.
    pub fn glyph_bounds(
        &self,
        reader: &StreamReader<'_>,
        glyph_index: usize,
    ) -> Option<Rect> {
        let commands = reader.commands();
        let mut idx = 0usize;
        let mut base = 0usize;
        while let Some(Command::LineInfo(info)) = commands.get(idx) {
            if glyph_index < base + info.glyphs as usize {
                let mut slot = base;
                let mut pen = info.bounds.x;
                for command in &commands[idx + 1..idx + 1 + info.commands as usize] {
                    match command {
                        Command::Text(text) => {
                            for shaped in reader.shaped(text.shaped) {
                                if slot == glyph_index {
                                    return Some(Rect::new(
                                        pen,
                                        info.bounds.y,
                                        shaped.advance,
                                        info.bounds.height,
                                    ));
                                }
                                pen += shaped.advance;
                                slot += 1;
                            }
                        }
                        Command::Icon(icon) => {
                            if slot == glyph_index {
                                return Some(Rect::new(
                                    pen,
                                    info.bounds.y,
                                    icon.width,
                                    info.bounds.height,
                                ));
                            }
                            pen += icon.width;
                            slot += 1;
                        }
                        Command::LineBreak { .. } => {
                            if slot == glyph_index {
                                return Some(Rect::new(
                                    pen,
                                    info.bounds.y,
                                    0.0,
                                    info.bounds.height,
                                ));
                            }
                            slot += 1;
                        }
                        _ => {}
                    }
                }
                return None;
            }
            base += info.glyphs as usize;
            idx += 1 + info.commands as usize;
        }
        None
    }

    /// Bounds of one line.
    pub fn line_bounds(&self, reader: &StreamReader<'_>, line: usize) -> Option<Rect> {
        reader.line_info(line).map(|info| info.bounds)
    }

    /// Updates the hovered link from the cursor position. Returns the
    /// link now hovered, if any.
    pub fn update_cursor(
        &mut self,
        reader: &StreamReader<'_>,
        x: f32,
        y: f32,
    ) -> Option<LinkId> {
        self.hovered = self.hit_test(reader, x, y).and_then(|hit| hit.link);
        self.hovered
    }

    /// Marks the link under the cursor active. Returns it, if any.
    pub fn activate_link_at_cursor(&mut self) -> Option<LinkId> {
        self.active = self.hovered;
        self.active
    }

    pub fn clear_active_link(&mut self) {
        self.active = None;
    }

    fn hit_test(&self, reader: &StreamReader<'_>, x: f32, y: f32) -> Option<Hit> {
        let commands = reader.commands();
        let mut idx = 0usize;
        let mut line = 0u32;
        let mut base = 0u32;
        let mut links: SmallVec<[LinkId; 2]> = SmallVec::new();
        while let Some(Command::LineInfo(info)) = commands.get(idx) {
            let in_line = y >= info.bounds.y && y < info.bounds.y + info.bounds.height;
            let mut pen = info.bounds.x;
            let mut slot = base;
            for command in &commands[idx + 1..idx + 1 + info.commands as usize] {
                match command {
                    Command::Text(text) => {
                        for shaped in reader.shaped(text.shaped) {
                            if in_line && x >= pen && x < pen + shaped.advance {
                                return Some(Hit {
                                    line,
                                    glyph: Some(slot),
                                    link: links.last().copied(),
                                });
                            }
                            pen += shaped.advance;
                            slot += 1;
                        }
                    }
                    Command::Icon(icon) => {
                        if in_line && x >= pen && x < pen + icon.width {
                            return Some(Hit {
                                line,
                                glyph: Some(slot),
                                link: links.last().copied(),
                            });
                        }
                        pen += icon.width;
                        slot += 1;
                    }
                    Command::LineBreak { .. } => {
                        slot += 1;
                    }
                    Command::PushLink(id) => links.push(*id),
                    Command::PopLink => {
                        links.pop();
                    }
                    _ => {}
                }
            }
            if in_line {
                return Some(Hit {
                    line,
                    glyph: None,
                    link: None,
                });
            }
            base += info.glyphs;
            idx += 1 + info.commands as usize;
            line += 1;
        }
        None
    }
}

fn union(a: Rect, b: Rect) -> Rect {
    let x = a.x.min(b.x);
    let y = a.y.min(b.y);
    let right = (a.x + a.width).max(b.x + b.width);
    let bottom = (a.y + a.height).max(b.y + b.height);
    Rect::new(x, y, right - x, bottom - y)
}
