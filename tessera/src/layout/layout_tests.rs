// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! End-to-end layout pipeline tests: markup in, command stream out,
//! replayed through the renderer where glyph-level checks need it.

use quill::{parse, ParseOptions, TokenStream};

use crate::batch::{BatchCoordinator, DisplayCommand, SpriteBatch, SpriteSortMode};
use crate::commands::{Command, CommandStream};
use crate::font::{
    FaceMetrics, FontFace, FontLibrary, FontSet, FontSetId, GlyphRect, Icon,
    IconRegistry, Texture, TextureId,
};
use crate::layout::{
    Alignment, Direction, LayoutContext, LayoutOptions, LayoutSettings,
    VerticalAlignment,
};
use crate::renderer::{LinkColorizer, LinkStateEvaluator, TextRenderer};
use crate::{Color, Rect};

const ADV: f32 = 10.0;

fn texture(id: u32) -> Texture {
    Texture {
        id: TextureId(id),
        width: 256,
        height: 256,
    }
}

fn test_face(texture_id: u32) -> FontFace {
    let mut face = FontFace::new(
        texture(texture_id),
        FaceMetrics {
            ascent: 8.0,
            descent: 2.0,
            line_gap: 0.0,
        },
    );
    let visible = GlyphRect {
        x: 0.0,
        y: 0.0,
        width: 8.0,
        height: 10.0,
        offset_x: 0.0,
        offset_y: -8.0,
        advance: ADV,
    };
    let blank = GlyphRect {
        advance: ADV,
        ..Default::default()
    };
    for ch in ' '..='~' {
        let rect = if ch == ' ' { blank } else { visible };
        face.add_glyph(ch, rect);
    }
    face.add_glyph('\u{00A0}', blank);
    // Hebrew block for direction tests.
    for cp in 0x5D0..=0x5EA {
        face.add_glyph(char::from_u32(cp).unwrap(), visible);
    }
    face
}

struct Fixture {
    fonts: FontLibrary,
    icons: IconRegistry,
    base: FontSetId,
}

fn fixture() -> Fixture {
    let mut fonts = FontLibrary::new();
    let regular = fonts.add_face(test_face(1));
    let bold = fonts.add_face(test_face(2));
    let symbols = {
        let mut face = test_face(3);
        face.add_glyph(
            '\u{2603}',
            GlyphRect {
                width: 8.0,
                height: 10.0,
                offset_y: -8.0,
                advance: ADV,
                ..Default::default()
            },
        );
        fonts.add_face(face)
    };
    let base = fonts.register_set(
        "base",
        FontSet {
            regular,
            bold: Some(bold),
            italic: None,
            bold_italic: None,
        },
    );
    let alt = fonts.add_face(test_face(4));
    fonts.register_set("alt", FontSet::single(alt));
    let sym = fonts.register_set("sym", FontSet::single(symbols));
    fonts.register_fallback(0x2600..=0x26FF, sym, false);

    let mut icons = IconRegistry::new();
    icons.register(
        "coin",
        Icon {
            texture: texture(9),
            source: Rect::new(0.0, 0.0, 24.0, 24.0),
            width: 12.0,
            height: 12.0,
            descender: 2.0,
        },
    );
    Fixture { fonts, icons, base }
}

fn layout_with(
    markup: &str,
    configure: impl FnOnce(&mut LayoutSettings),
) -> (CommandStream, Fixture) {
    let fx = fixture();
    let mut tokens = TokenStream::new();
    parse(markup, ParseOptions::default(), &mut tokens).unwrap();
    let mut settings = LayoutSettings::new(fx.base);
    configure(&mut settings);
    let mut stream = CommandStream::new();
    LayoutContext::new()
        .calculate_layout(&fx.fonts, &fx.icons, &tokens, markup, &settings, &mut stream)
        .unwrap();
    (stream, fx)
}

fn line_glyphs(stream: &CommandStream) -> Vec<u32> {
    let reader = stream.acquire();
    (0..reader.line_count())
        .map(|l| reader.line_info(l).unwrap().glyphs)
        .collect()
}

/// Joins visible glyphs back into a string by logical source index.
fn recombine(stream: &CommandStream, source: &str) -> String {
    let reader = stream.acquire();
    let mut indices: Vec<u32> = Vec::new();
    for command in reader.commands() {
        if let Command::Text(text) = command {
            if text.source.len == 0 {
                // Synthesized break hyphens have no source of their own.
                continue;
            }
            for shaped in reader.shaped(text.shaped) {
                indices.push(shaped.source_index);
            }
        }
    }
    indices.sort_unstable();
    indices
        .into_iter()
        .map(|i| source[i as usize..].chars().next().unwrap())
        .collect()
}

fn coordinator() -> &'static BatchCoordinator {
    Box::leak(Box::new(BatchCoordinator::new()))
}

#[test]
fn source_totals_match_markup_length() {
    let markup = "Hello, world!";
    let (stream, _) = layout_with(markup, |_| {});
    assert_eq!(stream.acquire().total_source_length(), markup.len());
    assert_eq!(stream.acquire().total_glyph_length(), markup.chars().count());
}

#[test]
fn unshaped_recombination_reproduces_source() {
    let markup = "Hello, world!";
    let (stream, _) = layout_with(markup, |_| {});
    assert_eq!(recombine(&stream, markup), markup);
}

#[test]
fn shaped_recombination_reproduces_source() {
    let markup = "Hello, world!";
    let (stream, _) = layout_with(markup, |s| {
        s.options |= LayoutOptions::SHAPE;
    });
    assert_eq!(recombine(&stream, markup), markup);
    assert_eq!(stream.acquire().total_glyph_length(), markup.chars().count());
}

#[test]
fn breaking_space_fixture_wraps_into_17_30_19() {
    let markup = "Wrapping is fun! Extraordinarily long words go final line has 19!!";
    assert_eq!(markup.len(), 66);
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(30.0 * ADV);
    });
    assert_eq!(line_glyphs(&stream), vec![17, 30, 19]);
    assert_eq!(recombine(&stream, markup), markup);
}

#[test]
fn repeated_layout_into_reused_stream_is_identical() {
    let markup = "Wrapping is fun! Extraordinarily long words go final line has 19!!";
    let fx = fixture();
    let mut tokens = TokenStream::new();
    parse(markup, ParseOptions::default(), &mut tokens).unwrap();
    let mut settings = LayoutSettings::new(fx.base);
    settings.max_width = Some(300.0);
    let mut ctx = LayoutContext::new();

    let mut stream = CommandStream::new();
    ctx.calculate_layout(&fx.fonts, &fx.icons, &tokens, markup, &settings, &mut stream)
        .unwrap();
    let first: Vec<Command> = stream.acquire().commands().to_vec();
    ctx.calculate_layout(&fx.fonts, &fx.icons, &tokens, markup, &settings, &mut stream)
        .unwrap();
    assert_eq!(stream.acquire().commands(), first.as_slice());
}

#[test]
fn non_breaking_spaces_fall_back_when_nothing_else_breaks() {
    // Only non-breaking spaces on the line: the overflow must still
    // break, at the last NBSP.
    let markup = "aa\u{00A0}bb\u{00A0}cc";
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(5.0 * ADV);
    });
    assert_eq!(line_glyphs(&stream), vec![3, 5]);
}

#[test]
fn breaking_space_wins_over_non_breaking_space() {
    let markup = "aa bb\u{00A0}cc";
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(6.0 * ADV);
    });
    // The break lands at the breaking space, not the later NBSP.
    assert_eq!(line_glyphs(&stream), vec![3, 5]);
}

#[test]
fn rtl_layout_is_visually_reversed_but_logically_recombinable() {
    let markup = "\u{5D0}\u{5D1} \u{5D2}\u{5D3}";
    let (stream, _) = layout_with(markup, |s| {
        s.options |= LayoutOptions::SHAPE;
        s.direction = Direction::RightToLeft;
    });
    let reader = stream.acquire();
    let first_text = reader
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::Text(t) => Some(*t),
            _ => None,
        })
        .unwrap();
    // Visually first comes the logically last fragment.
    assert_eq!(first_text.source.start, 5);
    drop(reader);
    assert_eq!(recombine(&stream, markup), markup);
}

#[test]
fn auto_direction_is_guessed_from_first_strong_character() {
    let markup = "\u{5D0}\u{5D1} \u{5D2}\u{5D3}";
    let (stream, _) = layout_with(markup, |s| {
        s.options |= LayoutOptions::SHAPE;
        s.direction = Direction::Auto;
    });
    let reader = stream.acquire();
    let first_text = reader
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::Text(t) => Some(*t),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_text.source.start, 5);
}

#[test]
fn hard_breaks_occupy_a_slot_but_not_the_totals() {
    let markup = "ab\ncd";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    assert_eq!(reader.line_count(), 2);
    assert_eq!(reader.line_info(0).unwrap().glyphs, 3);
    assert_eq!(reader.line_info(1).unwrap().glyphs, 2);
    assert_eq!(reader.total_glyph_length(), 4);
}

#[test]
fn line_break_glyph_bounds_are_zero_width_full_height() {
    let markup = "ab\ncd";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let renderer = TextRenderer::new();
    let bounds = renderer.glyph_bounds(&reader, 2).unwrap();
    assert_eq!(bounds, Rect::new(2.0 * ADV, 0.0, 0.0, 10.0));
}

#[test]
fn force_split_without_hyphenation_fills_lines() {
    let markup = "abcdefghij";
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(35.0);
    });
    assert_eq!(line_glyphs(&stream), vec![3, 3, 3, 1]);
    assert_eq!(recombine(&stream, markup), markup);
}

#[test]
fn hyphenated_split_inserts_visible_hyphen_at_syllable_boundary() {
    let markup = "extraordinary";
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(6.0 * ADV);
        s.options |= LayoutOptions::HYPHENATE;
    });
    let reader = stream.acquire();
    assert!(reader.line_count() >= 2);
    for line in 0..reader.line_count() {
        let info = reader.line_info(line).unwrap();
        assert!(info.bounds.width <= 6.0 * ADV + 0.01);
    }
    let hyphens = reader
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Text(t) if t.source.len == 0))
        .count();
    assert!(hyphens >= 1);
    drop(reader);
    assert_eq!(recombine(&stream, markup), markup);
}

#[test]
fn soft_hyphen_break_renders_a_hyphen() {
    let markup = "ab\u{00AD}cd";
    let (stream, _) = layout_with(markup, |s| {
        s.max_width = Some(35.0);
    });
    let reader = stream.acquire();
    assert_eq!(reader.line_count(), 2);
    // Line one: "ab" plus the rendered hyphen.
    assert_eq!(reader.line_info(0).unwrap().glyphs, 3);
    assert_eq!(reader.line_info(1).unwrap().glyphs, 2);
    let hyphen = reader
        .commands()
        .iter()
        .any(|c| matches!(c, Command::Text(t) if t.source.len == 0));
    assert!(hyphen);
    drop(reader);
    assert_eq!(recombine(&stream, markup), "abcd");
}

#[test]
fn untaken_soft_hyphen_is_invisible() {
    let markup = "ab\u{00AD}cd";
    let (stream, _) = layout_with(markup, |_| {});
    assert_eq!(line_glyphs(&stream), vec![4]);
    assert_eq!(stream.acquire().total_source_length(), markup.len());
}

#[test]
fn icons_flow_like_words() {
    let markup = "pay |icon:coin| now";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let icon = reader
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::Icon(icon) => Some(*icon),
            _ => None,
        })
        .unwrap();
    assert_eq!(icon.width, 12.0);
    // Icon ascent (10) + face descent (2) sets the line height.
    let info = reader.line_info(0).unwrap();
    assert_eq!(info.bounds.height, 12.0);
    assert_eq!(info.ascent, 10.0);
}

#[test]
fn unknown_icon_and_font_are_errors() {
    let fx = fixture();
    let mut tokens = TokenStream::new();
    parse("|icon:gem|", ParseOptions::default(), &mut tokens).unwrap();
    let settings = LayoutSettings::new(fx.base);
    let mut stream = CommandStream::new();
    let err = LayoutContext::new()
        .calculate_layout(
            &fx.fonts,
            &fx.icons,
            &tokens,
            "|icon:gem|",
            &settings,
            &mut stream,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "icon `gem` is not registered");

    parse("|f:nope|x|f|", ParseOptions::default(), &mut tokens).unwrap();
    let err = LayoutContext::new()
        .calculate_layout(
            &fx.fonts,
            &fx.icons,
            &tokens,
            "|f:nope|x|f|",
            &settings,
            &mut stream,
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "font `nope` is not registered");
}

#[test]
fn ignore_flags_suppress_commands_but_not_geometry() {
    let markup = "aa |c:FF112233|bb|c| |b|cc|b|";
    let (plain, _) = layout_with(markup, |s| {
        s.max_width = Some(40.0);
    });
    let (ignored, _) = layout_with(markup, |s| {
        s.max_width = Some(40.0);
        s.options |= LayoutOptions::IGNORE_STYLE_CHANGES;
    });

    let has_color = |stream: &CommandStream| {
        stream
            .acquire()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::PushColor(_)))
    };
    let has_style = |stream: &CommandStream| {
        stream
            .acquire()
            .commands()
            .iter()
            .any(|c| matches!(c, Command::PushStyle(_)))
    };
    assert!(has_color(&plain) && has_style(&plain));
    assert!(!has_color(&ignored) && !has_style(&ignored));

    // Geometry is computed once, independent of the flags.
    assert_eq!(line_glyphs(&plain), line_glyphs(&ignored));
    let bounds = |stream: &CommandStream| {
        let reader = stream.acquire();
        (0..reader.line_count())
            .map(|l| reader.line_info(l).unwrap().bounds)
            .collect::<Vec<_>>()
    };
    assert_eq!(bounds(&plain), bounds(&ignored));
}

#[test]
fn fallback_substitution_overrides_face_per_glyph() {
    let markup = "a\u{2603}b";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let overrides: Vec<_> = reader
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::Text(t) => Some(t.face),
            _ => None,
        })
        .collect();
    // Three runs: plain, substituted, plain.
    assert_eq!(overrides.len(), 3);
    assert!(overrides[0].is_none());
    assert!(overrides[1].is_some());
    assert!(overrides[2].is_none());
    // No font-change command was emitted for the substitution.
    assert!(!reader
        .commands()
        .iter()
        .any(|c| matches!(c, Command::PushFont(_))));
}

#[test]
fn center_and_right_alignment_distribute_residual_width() {
    let markup = "ab cd";
    let (center, _) = layout_with(markup, |s| {
        s.max_width = Some(100.0);
        s.align = Alignment::Center;
    });
    assert_eq!(center.acquire().line_info(0).unwrap().bounds.x, 25.0);

    let (right, _) = layout_with(markup, |s| {
        s.max_width = Some(100.0);
        s.align = Alignment::Right;
    });
    assert_eq!(right.acquire().line_info(0).unwrap().bounds.x, 50.0);
}

#[test]
fn trailing_whitespace_does_not_shift_alignment() {
    let (stream, _) = layout_with("ab ", |s| {
        s.max_width = Some(100.0);
        s.align = Alignment::Right;
    });
    assert_eq!(stream.acquire().line_info(0).unwrap().bounds.x, 80.0);
}

#[test]
fn vertical_alignment_distributes_residual_height() {
    let markup = "a\nb";
    let (middle, _) = layout_with(markup, |s| {
        s.max_height = Some(100.0);
        s.vertical_align = VerticalAlignment::Middle;
    });
    assert_eq!(middle.acquire().line_info(0).unwrap().bounds.y, 40.0);

    let (bottom, _) = layout_with(markup, |s| {
        s.max_height = Some(100.0);
        s.vertical_align = VerticalAlignment::Bottom;
    });
    assert_eq!(bottom.acquire().line_info(0).unwrap().bounds.y, 80.0);
    assert_eq!(bottom.acquire().line_info(1).unwrap().bounds.y, 90.0);
}

#[test]
fn measure_reports_block_size() {
    let fx = fixture();
    let mut tokens = TokenStream::new();
    parse("ab cd", ParseOptions::default(), &mut tokens).unwrap();
    let settings = LayoutSettings::new(fx.base);
    let (w, h) = LayoutContext::new()
        .measure(&fx.fonts, &fx.icons, &tokens, "ab cd", &settings)
        .unwrap();
    assert_eq!(w, 50.0);
    assert_eq!(h, 10.0);
}

#[test]
fn line_at_position_clamps_only_when_stretched() {
    let markup = "a\nb";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let renderer = TextRenderer::new();
    assert_eq!(renderer.line_at_position(&reader, 0.0, 5.0, false), Some(0));
    assert_eq!(renderer.line_at_position(&reader, 0.0, 15.0, false), Some(1));
    assert_eq!(renderer.line_at_position(&reader, 0.0, 50.0, false), None);
    assert_eq!(renderer.line_at_position(&reader, 0.0, 50.0, true), Some(1));
}

#[test]
fn glyph_at_position_hits_and_misses() {
    let markup = "ab cd";
    let (stream, _) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let renderer = TextRenderer::new();
    assert_eq!(
        renderer.glyph_at_position(&reader, 15.0, 5.0),
        (Some(1), Some(0))
    );
    assert_eq!(
        renderer.glyph_at_position(&reader, 35.0, 5.0),
        (Some(3), Some(0))
    );
    // Past the end of the line: line hit, glyph miss.
    assert_eq!(
        renderer.glyph_at_position(&reader, 500.0, 5.0),
        (None, Some(0))
    );
    // Fully outside.
    assert_eq!(renderer.glyph_at_position(&reader, 0.0, 50.0), (None, None));
}

struct Visited(&'static str);
impl LinkStateEvaluator for Visited {
    fn visited(&self, target: &str) -> bool {
        target == self.0
    }
}

struct StateColors;
impl LinkColorizer for StateColors {
    fn colorize(
        &self,
        _target: &str,
        visited: bool,
        hovering: bool,
        _active: bool,
        base: Color,
    ) -> Color {
        if hovering {
            [1.0, 0.0, 0.0, 1.0]
        } else if visited {
            [0.0, 0.0, 1.0, 1.0]
        } else {
            base
        }
    }
}

#[test]
fn link_hover_and_state_drive_glyph_tint() {
    let markup = "go |link:page|here|link| x";
    let (stream, fx) = layout_with(markup, |_| {});
    let reader = stream.acquire();

    let mut renderer = TextRenderer::new();
    renderer.set_link_state_evaluator(Box::new(Visited("other")));
    renderer.set_link_colorizer(Box::new(StateColors));

    // "go " is glyphs 0..3, "here" 3..7.
    let hovered = renderer.update_cursor(&reader, 35.0, 5.0);
    assert!(hovered.is_some());
    assert_eq!(reader.link_target(hovered.unwrap()), Some("page"));
    assert_eq!(renderer.activate_link_at_cursor(), hovered);

    let mut batch = SpriteBatch::<u32>::with_coordinator(coordinator());
    batch.begin_default(SpriteSortMode::Deferred);
    renderer.draw(
        &mut batch,
        &fx.fonts,
        &fx.icons,
        &reader,
        [0.0, 0.0],
        [1.0; 4],
        0.0,
    );
    batch.end();

    let vertices = batch.display_list().vertices().to_vec();
    // go + here + x = 7 visible glyphs (spaces have empty rects).
    assert_eq!(vertices.len(), 7 * 4);
    let red = vertices
        .iter()
        .filter(|v| v.color == [1.0, 0.0, 0.0, 1.0])
        .count();
    assert_eq!(red, 4 * 4);
    assert_eq!(vertices[0].color, [1.0; 4]);

    // Cursor off the link clears hover; unhovered unvisited links fall
    // back to the base color.
    assert_eq!(renderer.update_cursor(&reader, 5.0, 5.0), None);
}

#[test]
fn style_commands_switch_faces_at_render_time() {
    let markup = "a|b|b|b|";
    let (stream, fx) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let mut renderer = TextRenderer::new();
    let mut batch = SpriteBatch::<u32>::with_coordinator(coordinator());
    batch.begin_default(SpriteSortMode::Deferred);
    renderer.draw(
        &mut batch,
        &fx.fonts,
        &fx.icons,
        &reader,
        [0.0, 0.0],
        [1.0; 4],
        0.0,
    );
    batch.end();

    let binds: Vec<_> = batch
        .display_list()
        .commands()
        .iter()
        .filter_map(|c| match c {
            DisplayCommand::BindTexture(id) => Some(*id),
            _ => None,
        })
        .collect();
    // Regular face texture then the bold face texture.
    assert_eq!(binds, vec![TextureId(1), TextureId(2)]);
}

#[test]
fn draw_returns_block_bounds_at_position() {
    let markup = "ab\ncd";
    let (stream, fx) = layout_with(markup, |_| {});
    let reader = stream.acquire();
    let mut renderer = TextRenderer::new();
    let mut batch = SpriteBatch::<u32>::with_coordinator(coordinator());
    batch.begin_default(SpriteSortMode::Deferred);
    let bounds = renderer.draw(
        &mut batch,
        &fx.fonts,
        &fx.icons,
        &reader,
        [100.0, 50.0],
        [1.0; 4],
        0.0,
    );
    batch.end();
    assert_eq!(bounds, Rect::new(100.0, 50.0, 20.0, 20.0));
}
