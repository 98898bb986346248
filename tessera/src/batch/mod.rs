// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Sprite batch engine.
//!
//! Accumulates sprite draw requests, sorts and groups them by texture,
//! and generates indexed-quad vertex data for the device. The device
//! itself stays behind [`DisplayList`]: bind/draw records plus vertex and
//! index buffers a backend replays verbatim.

mod coordinator;
mod ring;

pub use coordinator::BatchCoordinator;
pub use ring::{UploadHint, VertexBufferRing};

use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::font::{FontFace, Texture, TextureId};
use crate::renderer::{GlyphContext, GlyphShaderAction, GlyphShaderSlot};
use crate::{Color, Rect};

/// Batch geometry vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 2],
}

/// Submission ordering of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpriteSortMode {
    /// Accumulate and flush on `end`, preserving submission order.
    #[default]
    Deferred,
    /// Flush every draw synchronously; exclusive across the process.
    Immediate,
    /// Sort by texture to minimize binds.
    Texture,
    /// Sort by depth, far to near.
    BackToFront,
    /// Sort by depth, near to far.
    FrontToBack,
}

bitflags::bitflags! {
    /// Per-sprite effect toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SpriteEffects: u32 {
        /// Mirror horizontally by remapping UVs; geometry is untouched.
        const FLIP_HORIZONTALLY = 1 << 0;
        /// Mirror vertically by remapping UVs.
        const FLIP_VERTICALLY = 1 << 1;
        /// Normalize the origin against the destination size instead of
        /// the source size.
        const ORIGIN_RELATIVE_TO_DESTINATION = 1 << 2;
    }
}

/// Device blend mode, opaque to this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendState {
    #[default]
    AlphaBlend,
    Opaque,
    Additive,
    NonPremultiplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerState {
    #[default]
    PointClamp,
    PointWrap,
    LinearClamp,
    LinearWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthStencilState {
    #[default]
    None,
    Default,
    DepthRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterizerState {
    #[default]
    CullNone,
    CullClockwise,
    CullCounterClockwise,
}

/// Shader effect handle owned by the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(pub u32);

/// Column-major 4x4 transform applied by the device at replay.
pub type Transform = [[f32; 4]; 4];

pub const IDENTITY: Transform = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Fixed-function state captured at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderState {
    pub blend: BlendState,
    pub sampler: SamplerState,
    pub depth_stencil: DepthStencilState,
    pub rasterizer: RasterizerState,
}

/// One queued sprite. Plain data, paired 1:1 with a custom-data record.
#[derive(Debug, Clone, Copy)]
pub struct SpriteHeader {
    pub texture: Texture,
    /// Source rectangle in texture pixels.
    pub source: Rect,
    pub dest: Rect,
    pub origin: [f32; 2],
    pub rotation: f32,
    pub depth: f32,
    pub effects: SpriteEffects,
    pub color: Color,
}

/// Replay instruction for the device backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayCommand {
    /// Upload the vertex range produced by one flush pass.
    Upload {
        offset: u32,
        vertices: u32,
        hint: UploadHint,
    },
    BindTexture(TextureId),
    /// Draw `count` indices starting at `start`.
    Draw { start: u32, count: u32 },
}

/// Vertices, indices and replay commands for a finished batch.
#[derive(Debug, Default, Clone)]
pub struct DisplayList {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    commands: Vec<DisplayCommand>,
}

impl DisplayList {
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn commands(&self) -> &[DisplayCommand] {
        &self.commands
    }

    #[inline]
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.commands.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Idle,
    Begun,
}

/// Sprite batcher generic over the custom data paired with each sprite
/// (glyph indices for text, unit for plain sprites).
pub struct SpriteBatch<D: Copy + Default = ()> {
    state: BatchState,
    sort_mode: SpriteSortMode,
    render_state: RenderState,
    effect: Option<EffectId>,
    transform: Transform,
    headers: Vec<SpriteHeader>,
    custom: Vec<D>,
    sorted: Vec<u32>,
    display: DisplayList,
    ring: VertexBufferRing,
    coordinator: &'static BatchCoordinator,
}

impl<D: Copy + Default> Default for SpriteBatch<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Copy + Default> SpriteBatch<D> {
    pub fn new() -> Self {
        Self::with_coordinator(&coordinator::GLOBAL)
    }

    /// A batch bound to an explicit coordinator; tests use this to avoid
    /// the process-wide counters.
    pub fn with_coordinator(coordinator: &'static BatchCoordinator) -> Self {
        Self {
            state: BatchState::Idle,
            sort_mode: SpriteSortMode::Deferred,
            render_state: RenderState::default(),
            effect: None,
            transform: IDENTITY,
            headers: Vec::new(),
            custom: Vec::new(),
            sorted: Vec::new(),
            display: DisplayList::default(),
            ring: VertexBufferRing::new(4096),
            coordinator,
        }
    }

    /// Opens the batch for draw submissions.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        sort_mode: SpriteSortMode,
        blend: BlendState,
        sampler: SamplerState,
        depth_stencil: DepthStencilState,
        rasterizer: RasterizerState,
        effect: Option<EffectId>,
        transform: Transform,
    ) {
        if self.state != BatchState::Idle {
            panic!("SpriteBatch::begin called while the batch is already begun");
        }
        match sort_mode {
            SpriteSortMode::Immediate => self.coordinator.demand_immediate(),
            _ => self.coordinator.demand_deferred(),
        }
        self.state = BatchState::Begun;
        self.sort_mode = sort_mode;
        self.render_state = RenderState {
            blend,
            sampler,
            depth_stencil,
            rasterizer,
        };
        self.effect = effect;
        self.transform = transform;
        self.headers.clear();
        self.custom.clear();
        self.display.clear();
    }

    /// `begin` with default device states.
    pub fn begin_default(&mut self, sort_mode: SpriteSortMode) {
        self.begin(
            sort_mode,
            BlendState::default(),
            SamplerState::default(),
            DepthStencilState::default(),
            RasterizerState::default(),
            None,
            IDENTITY,
        );
    }

    /// Queues one sprite with an explicit destination rectangle.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        texture: Texture,
        dest: Rect,
        source: Option<Rect>,
        color: Color,
        rotation: f32,
        origin: [f32; 2],
        effects: SpriteEffects,
        depth: f32,
        custom: D,
    ) {
        if self.state != BatchState::Begun {
            panic!("SpriteBatch::draw called outside begin/end");
        }
        let source = source.unwrap_or(Rect::new(
            0.0,
            0.0,
            texture.width as f32,
            texture.height as f32,
        ));
        self.headers.push(SpriteHeader {
            texture,
            source,
            dest,
            origin,
            rotation,
            depth,
            effects,
            color,
        });
        self.custom.push(custom);
        if self.sort_mode == SpriteSortMode::Immediate {
            self.flush();
        }
    }

    /// Queues one sprite positioned at `position`, sized by the source
    /// rectangle and `scale`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_at(
        &mut self,
        texture: Texture,
        position: [f32; 2],
        source: Option<Rect>,
        color: Color,
        rotation: f32,
        origin: [f32; 2],
        scale: [f32; 2],
        effects: SpriteEffects,
        depth: f32,
        custom: D,
    ) {
        let src = source.unwrap_or(Rect::new(
            0.0,
            0.0,
            texture.width as f32,
            texture.height as f32,
        ));
        let dest = Rect::new(
            position[0],
            position[1],
            src.width * scale[0],
            src.height * scale[1],
        );
        self.draw(
            texture,
            dest,
            Some(src),
            color,
            rotation,
            origin,
            effects,
            depth,
            custom,
        );
    }

    /// Flushes queued sprites into the display list without closing the
    /// batch.
    pub fn flush(&mut self) {
        if self.state != BatchState::Begun {
            panic!("SpriteBatch::flush called outside begin/end");
        }
        assert_eq!(
            self.headers.len(),
            self.custom.len(),
            "sprite header and custom data arrays diverged"
        );
        if self.headers.is_empty() {
            return;
        }

        self.sorted.clear();
        self.sorted.extend(0..self.headers.len() as u32);
        match self.sort_mode {
            SpriteSortMode::Texture => {
                let headers = &self.headers;
                self.sorted
                    .sort_by_key(|i| headers[*i as usize].texture.id);
            }
            SpriteSortMode::BackToFront => {
                let headers = &self.headers;
                self.sorted.sort_by(|a, b| {
                    headers[*b as usize]
                        .depth
                        .total_cmp(&headers[*a as usize].depth)
                });
            }
            SpriteSortMode::FrontToBack => {
                let headers = &self.headers;
                self.sorted.sort_by(|a, b| {
                    headers[*a as usize]
                        .depth
                        .total_cmp(&headers[*b as usize].depth)
                });
            }
            SpriteSortMode::Deferred | SpriteSortMode::Immediate => {}
        }

        let vertex_count = (self.headers.len() * 4) as u32;
        let (offset, hint) = self.ring.allocate(vertex_count);
        self.display.commands.push(DisplayCommand::Upload {
            offset,
            vertices: vertex_count,
            hint,
        });

        // Contiguous same-texture runs become a single draw call.
        let mut run_start_index = self.display.indices.len() as u32;
        let mut run_texture: Option<TextureId> = None;
        for i in 0..self.sorted.len() {
            let header = self.headers[self.sorted[i] as usize];
            if run_texture != Some(header.texture.id) {
                if let Some(_texture) = run_texture {
                    let count = self.display.indices.len() as u32 - run_start_index;
                    self.display
                        .commands
                        .push(DisplayCommand::Draw {
                            start: run_start_index,
                            count,
                        });
                }
                run_texture = Some(header.texture.id);
                run_start_index = self.display.indices.len() as u32;
                self.display
                    .commands
                    .push(DisplayCommand::BindTexture(header.texture.id));
            }
            push_sprite(&mut self.display, &header);
        }
        if run_texture.is_some() {
            let count = self.display.indices.len() as u32 - run_start_index;
            self.display.commands.push(DisplayCommand::Draw {
                start: run_start_index,
                count,
            });
        }

        self.headers.clear();
        self.custom.clear();
    }

    /// Closes the batch, flushing anything still queued.
    pub fn end(&mut self) {
        if self.state != BatchState::Begun {
            panic!("SpriteBatch::end called without begin");
        }
        self.flush();
        match self.sort_mode {
            SpriteSortMode::Immediate => self.coordinator.relinquish_immediate(),
            _ => self.coordinator.relinquish_deferred(),
        }
        self.state = BatchState::Idle;
    }

    /// The display list produced by the last begin/end cycle.
    #[inline]
    pub fn display_list(&self) -> &DisplayList {
        &self.display
    }

    #[inline]
    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    #[inline]
    pub fn effect(&self) -> Option<EffectId> {
        self.effect
    }

    #[inline]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    #[inline]
    pub fn queued(&self) -> usize {
        self.headers.len()
    }
}

impl SpriteBatch<u32> {
    /// Draws a string glyph by glyph, pairing each sprite with its glyph
    /// index as custom data.
    ///
    /// The string is measured first so `origin` (in measured-string
    /// pixels) can anchor or align the text; each glyph then runs the
    /// shader slot, which may mutate it and request extra passes for the
    /// same glyph index.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_string(
        &mut self,
        face: &FontFace,
        text: &str,
        position: [f32; 2],
        color: Color,
        origin: [f32; 2],
        depth: f32,
        shader: &mut GlyphShaderSlot,
    ) -> Rect {
        const MAX_PASSES: u32 = 8;
        let (width, height) = face.measure_str(text);
        let pen_start = [position[0] - origin[0], position[1] - origin[1]];
        let baseline = pen_start[1] + face.metrics().ascent;

        let mut pen_x = pen_start[0];
        let mut prev = None;
        let mut glyph_index = 0u32;
        for ch in text.chars() {
            let glyph = match face.glyph_for_char(ch).or_else(|| face.missing_glyph()) {
                Some(glyph) => glyph,
                None => continue,
            };
            let mut kern = 0.0;
            if let Some(prev) = prev {
                kern = face.kerning(prev, glyph);
            }
            pen_x += kern;

            let mut pass = 0u32;
            loop {
                let rect = face.glyph(glyph).copied().unwrap_or_default();
                let mut ctx = GlyphContext {
                    glyph,
                    x: pen_x + rect.offset_x,
                    y: baseline + rect.offset_y,
                    scale: 1.0,
                    color,
                    glyph_index,
                    pass,
                };
                let action = shader.apply(&mut ctx);
                // The shader may have replaced the glyph; fetch its rect.
                let rect = face.glyph(ctx.glyph).copied().unwrap_or(rect);
                if rect.width > 0.0 && rect.height > 0.0 {
                    self.draw(
                        face.texture(),
                        Rect::new(
                            ctx.x,
                            ctx.y,
                            rect.width * ctx.scale,
                            rect.height * ctx.scale,
                        ),
                        Some(Rect::new(rect.x, rect.y, rect.width, rect.height)),
                        ctx.color,
                        0.0,
                        [0.0, 0.0],
                        SpriteEffects::empty(),
                        depth,
                        glyph_index,
                    );
                }
                match action {
                    GlyphShaderAction::Continue => break,
                    GlyphShaderAction::RunAgain => {
                        pass += 1;
                        if pass >= MAX_PASSES {
                            warn!(glyph_index, "glyph shader pass limit reached");
                            break;
                        }
                    }
                }
            }
            pen_x += face.advance(glyph);
            prev = Some(glyph);
            glyph_index += 1;
        }
        Rect::new(pen_start[0], pen_start[1], width, height)
    }
}

/// Appends the four vertices and six indices of one sprite.
fn push_sprite(display: &mut DisplayList, header: &SpriteHeader) {
    let tw = header.texture.width.max(1) as f32;
    let th = header.texture.height.max(1) as f32;
    let src = header.source;

    // Texture coordinates normalized against the texture dimensions;
    // flips remap UVs, never geometry.
    let mut u0 = src.x / tw;
    let mut u1 = (src.x + src.width) / tw;
    let mut v0 = src.y / th;
    let mut v1 = (src.y + src.height) / th;
    if header.effects.contains(SpriteEffects::FLIP_HORIZONTALLY) {
        core::mem::swap(&mut u0, &mut u1);
    }
    if header.effects.contains(SpriteEffects::FLIP_VERTICALLY) {
        core::mem::swap(&mut v0, &mut v1);
    }

    // Origin normalized against source or destination dimensions, then
    // applied in destination space.
    let dest = header.dest;
    let (norm_x, norm_y) = if header
        .effects
        .contains(SpriteEffects::ORIGIN_RELATIVE_TO_DESTINATION)
    {
        (
            header.origin[0] / dest.width.max(f32::EPSILON),
            header.origin[1] / dest.height.max(f32::EPSILON),
        )
    } else {
        (
            header.origin[0] / src.width.max(f32::EPSILON),
            header.origin[1] / src.height.max(f32::EPSILON),
        )
    };
    let origin_x = norm_x * dest.width;
    let origin_y = norm_y * dest.height;

    let (sin, cos) = header.rotation.sin_cos();
    let corners = [
        (0.0, 0.0, u0, v0),
        (0.0, dest.height, u0, v1),
        (dest.width, dest.height, u1, v1),
        (dest.width, 0.0, u1, v0),
    ];
    let base = display.vertices.len() as u32;
    for (dx, dy, u, v) in corners {
        let local_x = dx - origin_x;
        let local_y = dy - origin_y;
        display.vertices.push(Vertex {
            pos: [
                dest.x + local_x * cos - local_y * sin,
                dest.y + local_x * sin + local_y * cos,
                header.depth,
            ],
            color: header.color,
            uv: [u, v],
        });
    }
    display
        .indices
        .extend_from_slice(&[base, base + 1, base + 2, base + 2, base, base + 3]);
}
