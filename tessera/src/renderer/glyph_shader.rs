// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Per-glyph mutation hooks applied during string rendering.

use crate::font::GlyphId;
use crate::Color;

/// Mutable view of one glyph about to be drawn.
///
/// A shader may replace the glyph, move it, scale it or tint it, and may
/// request another pass for the same glyph index to stack effects
/// (outline under fill, shadows, jitter).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphContext {
    pub glyph: GlyphId,
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub color: Color,
    /// Index of the glyph within the string or command stream.
    pub glyph_index: u32,
    /// Zero on the first invocation, incremented per extra pass.
    pub pass: u32,
}

/// Outcome of one shader invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphShaderAction {
    /// Draw this glyph and move on.
    Continue,
    /// Draw this glyph, then invoke the shader again for the same glyph
    /// index with an incremented pass counter.
    RunAgain,
}

/// A per-glyph mutation hook.
pub trait GlyphShader {
    fn process(&mut self, ctx: &mut GlyphContext) -> GlyphShaderAction;
}

/// Closed set of shader bindings.
///
/// Replaces ad-hoc conversions between a single shader, a stack and a
/// scoped stack with one explicit sum type carrying a uniform
/// [`apply`](GlyphShaderSlot::apply).
#[derive(Default)]
pub enum GlyphShaderSlot {
    #[default]
    None,
    Single(Box<dyn GlyphShader>),
    Stack(Vec<Box<dyn GlyphShader>>),
    /// A stack where only shaders at `scope` depth and above are active,
    /// letting callers shadow outer shaders for a nested draw.
    ScopedStack {
        shaders: Vec<Box<dyn GlyphShader>>,
        scope: usize,
    },
}

impl GlyphShaderSlot {
    /// Runs every active shader over `ctx`. Any shader requesting
    /// another pass wins.
    pub fn apply(&mut self, ctx: &mut GlyphContext) -> GlyphShaderAction {
        let mut action = GlyphShaderAction::Continue;
        match self {
            GlyphShaderSlot::None => {}
            GlyphShaderSlot::Single(shader) => action = shader.process(ctx),
            GlyphShaderSlot::Stack(shaders) => {
                for shader in shaders {
                    if shader.process(ctx) == GlyphShaderAction::RunAgain {
                        action = GlyphShaderAction::RunAgain;
                    }
                }
            }
            GlyphShaderSlot::ScopedStack { shaders, scope } => {
                for shader in shaders.iter_mut().skip(*scope) {
                    if shader.process(ctx) == GlyphShaderAction::RunAgain {
                        action = GlyphShaderAction::RunAgain;
                    }
                }
            }
        }
        action
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, GlyphShaderSlot::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tint(Color);
    impl GlyphShader for Tint {
        fn process(&mut self, ctx: &mut GlyphContext) -> GlyphShaderAction {
            ctx.color = self.0;
            GlyphShaderAction::Continue
        }
    }

    struct Outline;
    impl GlyphShader for Outline {
        fn process(&mut self, ctx: &mut GlyphContext) -> GlyphShaderAction {
            if ctx.pass == 0 {
                // First pass: offset shadow, ask for the fill pass.
                ctx.x += 1.0;
                ctx.y += 1.0;
                GlyphShaderAction::RunAgain
            } else {
                GlyphShaderAction::Continue
            }
        }
    }

    fn ctx() -> GlyphContext {
        GlyphContext {
            glyph: 7,
            x: 10.0,
            y: 20.0,
            scale: 1.0,
            color: [1.0; 4],
            glyph_index: 0,
            pass: 0,
        }
    }

    #[test]
    fn single_mutates_context() {
        let mut slot = GlyphShaderSlot::Single(Box::new(Tint([0.0, 0.0, 0.0, 1.0])));
        let mut c = ctx();
        assert_eq!(slot.apply(&mut c), GlyphShaderAction::Continue);
        assert_eq!(c.color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn stack_applies_in_order_and_propagates_run_again() {
        let mut slot = GlyphShaderSlot::Stack(vec![
            Box::new(Outline),
            Box::new(Tint([0.5, 0.5, 0.5, 1.0])),
        ]);
        let mut c = ctx();
        assert_eq!(slot.apply(&mut c), GlyphShaderAction::RunAgain);
        assert_eq!(c.x, 11.0);
        assert_eq!(c.color, [0.5, 0.5, 0.5, 1.0]);

        c.pass = 1;
        assert_eq!(slot.apply(&mut c), GlyphShaderAction::Continue);
    }

    #[test]
    fn scoped_stack_skips_shadowed_shaders() {
        let mut slot = GlyphShaderSlot::ScopedStack {
            shaders: vec![
                Box::new(Tint([0.1, 0.1, 0.1, 1.0])),
                Box::new(Tint([0.9, 0.9, 0.9, 1.0])),
            ],
            scope: 1,
        };
        let mut c = ctx();
        slot.apply(&mut c);
        assert_eq!(c.color, [0.9, 0.9, 0.9, 1.0]);
    }
}
