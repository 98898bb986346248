// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

//! Replayable command stream produced by the layout engine.
//!
//! The stream is an arena of fixed-stride records addressed by index.
//! Records are grouped into lines: each line begins with a [`LineInfo`]
//! record carrying the line bounds plus its glyph and command counts, so
//! seeking to a line is index arithmetic over the per-line counts instead
//! of a scan of every record. Glyph data lives in a sibling shaped-record
//! buffer that `Text` commands address by range, the same flat
//! range-into-sibling-vec shape the rest of the engine uses.
//!
//! Random access requires acquiring a [`StreamReader`]; the reader borrows
//! the stream, so structural mutation while one is live is rejected at
//! compile time. This is the pointer-acquisition discipline: a scoped
//! guard, not a lock.

use quill::Span;

use crate::font::{FaceId, FontSetId, IconId};
use crate::shaping::ShapedChar;
use crate::{Color, Rect, StyleFlags};

/// Identifier of a link target within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

/// Per-line header record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LineInfo {
    /// Line bounds relative to the layout origin.
    pub bounds: Rect,
    /// Distance from the line top to the baseline.
    pub ascent: f32,
    /// Glyph slots in the line, including a slot for a trailing hard
    /// break command.
    pub glyphs: u32,
    /// Commands belonging to the line, not counting this record.
    pub commands: u32,
}

/// Text run command: a range of shaped records plus the source bytes they
/// came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextCommand {
    /// Source offset/length into the original markup.
    pub source: Span,
    /// Range into the stream's shaped-record buffer.
    pub shaped: (u32, u32),
    /// Total advance of the run.
    pub width: f32,
    /// Face override for fallback-substituted or synthesized glyphs;
    /// `None` resolves through the active font and style stacks.
    pub face: Option<FaceId>,
}

/// Inline icon command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IconCommand {
    pub icon: IconId,
    pub source: Span,
    pub width: f32,
    pub height: f32,
    /// Portion of `height` below the baseline.
    pub descender: f32,
}

/// One fixed-stride command record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    LineInfo(LineInfo),
    Text(TextCommand),
    Icon(IconCommand),
    /// Hard line break; occupies a glyph slot at the pen position.
    LineBreak { source: Span },
    PushColor(Color),
    PopColor,
    PushFont(FontSetId),
    PopFont,
    PushStyle(StyleFlags),
    PopStyle,
    PushLink(LinkId),
    PopLink,
    /// Block terminator.
    End,
}

/// Aggregate totals of a finished layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamTotals {
    /// Source bytes consumed, command tags included.
    pub source_len: u32,
    /// Visible glyph positions; line breaks and collapsed command tags
    /// are excluded.
    pub glyph_len: u32,
    pub lines: u32,
}

/// Append-only, randomly seekable buffer of layout commands.
///
/// Created once and reused: [`CommandStream::clear`] resets it for the
/// next layout call without releasing allocations.
#[derive(Debug, Default)]
pub struct CommandStream {
    commands: Vec<Command>,
    shaped: Vec<ShapedChar>,
    /// Resolved link targets, so replay does not need the source markup.
    links: Vec<String>,
    base_font: FontSetId,
    totals: StreamTotals,
}

impl CommandStream {
    pub fn new() -> Self {
        Self {
            base_font: FontSetId(0),
            ..Default::default()
        }
    }

    /// Clears the stream for the next layout call.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.shaped.clear();
        self.links.clear();
        self.totals = StreamTotals::default();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Acquires scoped read access for random-access queries.
    ///
    /// The reader borrows the stream; mutating while it is live is a
    /// compile error, which is the contract-violation the acquisition
    /// discipline exists to catch.
    #[inline]
    pub fn acquire(&self) -> StreamReader<'_> {
        StreamReader { stream: self }
    }

    #[inline]
    pub(crate) fn push(&mut self, command: Command) -> usize {
        self.commands.push(command);
        self.commands.len() - 1
    }

    /// Appends shaped records, returning the stored range.
    pub(crate) fn push_shaped(&mut self, chars: &[ShapedChar]) -> (u32, u32) {
        let start = self.shaped.len() as u32;
        self.shaped.extend_from_slice(chars);
        (start, chars.len() as u32)
    }

    pub(crate) fn add_link(&mut self, target: &str) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(target.to_owned());
        id
    }

    /// Rewrites a previously pushed record, used to patch line headers
    /// once their counts are known.
    pub(crate) fn patch(&mut self, index: usize, command: Command) {
        self.commands[index] = command;
    }

    pub(crate) fn set_base_font(&mut self, font: FontSetId) {
        self.base_font = font;
    }

    pub(crate) fn set_totals(&mut self, totals: StreamTotals) {
        self.totals = totals;
    }
}

/// Scoped read access to a [`CommandStream`].
#[derive(Clone, Copy)]
pub struct StreamReader<'a> {
    stream: &'a CommandStream,
}

impl<'a> StreamReader<'a> {
    #[inline]
    pub fn commands(&self) -> &'a [Command] {
        &self.stream.commands
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&'a Command> {
        self.stream.commands.get(index)
    }

    /// Shaped records for a text command's range.
    #[inline]
    pub fn shaped(&self, range: (u32, u32)) -> &'a [ShapedChar] {
        &self.stream.shaped[range.0 as usize..(range.0 + range.1) as usize]
    }

    #[inline]
    pub fn link_target(&self, id: LinkId) -> Option<&'a str> {
        self.stream.links.get(id.0 as usize).map(|s| s.as_str())
    }

    #[inline]
    pub fn link_count(&self) -> usize {
        self.stream.links.len()
    }

    #[inline]
    pub fn base_font(&self) -> FontSetId {
        self.stream.base_font
    }

    #[inline]
    pub fn totals(&self) -> StreamTotals {
        self.stream.totals
    }

    #[inline]
    pub fn total_source_length(&self) -> usize {
        self.stream.totals.source_len as usize
    }

    #[inline]
    pub fn total_glyph_length(&self) -> usize {
        self.stream.totals.glyph_len as usize
    }

    #[inline]
    pub fn line_count(&self) -> usize {
        self.stream.totals.lines as usize
    }

    /// Command index of the `line`-th [`LineInfo`] record.
    ///
    /// O(line-count): hops line headers by their command counts.
    pub fn seek_line(&self, line: usize) -> Option<usize> {
        let mut index = 0usize;
        let mut current = 0usize;
        while let Some(Command::LineInfo(info)) = self.stream.commands.get(index) {
            if current == line {
                return Some(index);
            }
            current += 1;
            index += 1 + info.commands as usize;
        }
        None
    }

    pub fn line_info(&self, line: usize) -> Option<LineInfo> {
        let index = self.seek_line(line)?;
        match self.stream.commands[index] {
            Command::LineInfo(info) => Some(info),
            _ => None,
        }
    }

    /// The commands of one line, header excluded.
    pub fn line_commands(&self, line: usize) -> Option<&'a [Command]> {
        let index = self.seek_line(line)?;
        match self.stream.commands[index] {
            Command::LineInfo(info) => {
                let start = index + 1;
                Some(&self.stream.commands[start..start + info.commands as usize])
            }
            _ => None,
        }
    }
}
