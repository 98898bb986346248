//! Parser for pipe-delimited inline text markup
//!
//! [`Parser`] turns a markup string into a flat [`TokenStream`] of text runs
//! and inline commands. The parser assigns no meaning to the commands; a
//! layout engine is expected to consume the stream and drive fonts, colors
//! and links from it. The parser handles the book keeping — source offsets,
//! tag balance, escapes — and the consumer gets to simply handle tokens.
//!
//! # Grammar
//!
//! Commands are delimited by pipes. A tag is `|name|` or `|name:arg|` and a
//! command opened with an argument is closed by a bare repeat of the tag:
//!
//! ```text
//! |b|          toggle bold                 |i|        toggle italic
//! |c:AARRGGBB| push color                  |c|        pop color
//! |f:name|     push font face              |f|        pop font face
//! |icon:name|  inline icon                 |link:url| open link
//! |link|       close link                  ||         literal `|`
//! ```
//!
//! `\n` (or `\r\n`) produces a hard line break token and U+00AD (soft
//! hyphen) produces a discretionary break token; both are structural even
//! when command parsing is disabled.
//!
//! Every token records the source bytes it consumed, so the consumed
//! lengths of a successful parse sum exactly to the markup length.

use memchr::{memchr, memchr3};

mod token;

pub use token::{Span, StyleKind, Token, TokenStream};

bitflags::bitflags! {
    /// Options controlling the markup grammar.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParseOptions: u32 {
        /// Disable command parsing entirely: pipes are literal text and
        /// only line breaks and soft hyphens remain structural.
        const IGNORE_COMMAND_CODES = 1 << 0;
    }
}

/// Markup parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated command code at byte {offset}")]
    Unterminated { offset: usize },
    #[error("unknown command code `{name}` at byte {offset}")]
    UnknownCommand { name: String, offset: usize },
    #[error("malformed argument for `{name}` at byte {offset}")]
    MalformedArgument { name: String, offset: usize },
    #[error("`|{name}|` at byte {offset} closes a command that was never opened")]
    UnbalancedClose { name: String, offset: usize },
    #[error("command `{name}` opened at byte {offset} is never closed")]
    UnbalancedOpen { name: String, offset: usize },
}

/// Reusable markup parser.
///
/// Carries only balance-tracking scratch state, so a single instance can be
/// reused across parses without allocating in steady state.
#[derive(Default)]
pub struct Parser {
    bold_open: Option<u32>,
    italic_open: Option<u32>,
    color_opens: Vec<u32>,
    font_opens: Vec<u32>,
    link_opens: Vec<u32>,
}

/// Parses `markup` into `stream` with a throwaway [`Parser`].
pub fn parse(
    markup: &str,
    options: ParseOptions,
    stream: &mut TokenStream,
) -> Result<(), ParseError> {
    Parser::new().parse(markup, options, stream)
}

impl Parser {
    pub fn new() -> Parser {
        Default::default()
    }

    /// Tokenizes `markup` into `stream`.
    ///
    /// The stream is cleared first; on error its contents are unspecified
    /// and the next parse clears it again.
    pub fn parse(
        &mut self,
        markup: &str,
        options: ParseOptions,
        stream: &mut TokenStream,
    ) -> Result<(), ParseError> {
        self.reset();
        stream.clear();

        let bytes = markup.as_bytes();
        let ignore_commands = options.contains(ParseOptions::IGNORE_COMMAND_CODES);
        let mut run_start = 0usize;
        let mut pos = 0usize;

        while pos < bytes.len() {
            let found = match memchr3(b'|', b'\n', 0xC2, &bytes[pos..]) {
                Some(rel) => pos + rel,
                None => break,
            };
            match bytes[found] {
                b'\n' => {
                    // A preceding `\r` belongs to the break, not the text.
                    let break_start = if found > run_start && bytes[found - 1] == b'\r'
                    {
                        found - 1
                    } else {
                        found
                    };
                    flush_text(stream, run_start, break_start);
                    stream.push(Token::LineBreak(Span::new(
                        break_start as u32,
                        (found + 1 - break_start) as u32,
                    )));
                    pos = found + 1;
                    run_start = pos;
                }
                0xC2 => {
                    if bytes.get(found + 1) == Some(&0xAD) {
                        flush_text(stream, run_start, found);
                        stream.push(Token::SoftHyphen {
                            start: found as u32,
                        });
                        pos = found + 2;
                        run_start = pos;
                    } else {
                        // Some other two-byte character; the run continues.
                        pos = found + 1;
                    }
                }
                _pipe => {
                    if ignore_commands {
                        pos = found + 1;
                        continue;
                    }
                    flush_text(stream, run_start, found);
                    pos = self.command(markup, found, stream)?;
                    run_start = pos;
                }
            }
        }
        flush_text(stream, run_start, bytes.len());

        self.check_balance()?;
        debug_assert_eq!(stream.source_len(), markup.len());
        Ok(())
    }

    fn reset(&mut self) {
        self.bold_open = None;
        self.italic_open = None;
        self.color_opens.clear();
        self.font_opens.clear();
        self.link_opens.clear();
    }

    /// Parses one command starting at the pipe at `start`. Returns the
    /// position just past the closing pipe.
    fn command(
        &mut self,
        markup: &str,
        start: usize,
        stream: &mut TokenStream,
    ) -> Result<usize, ParseError> {
        let bytes = markup.as_bytes();
        if bytes.get(start + 1) == Some(&b'|') {
            stream.push(Token::LiteralPipe {
                start: start as u32,
            });
            return Ok(start + 2);
        }
        let close = memchr(b'|', &bytes[start + 1..])
            .map(|rel| start + 1 + rel)
            .ok_or(ParseError::Unterminated { offset: start })?;
        let body = &markup[start + 1..close];
        if body.contains('\n') {
            return Err(ParseError::Unterminated { offset: start });
        }
        let tag = Span::new(start as u32, (close + 1 - start) as u32);
        let offset = start;
        let (name, arg) = match body.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (body, None),
        };

        let malformed = || ParseError::MalformedArgument {
            name: name.to_owned(),
            offset,
        };
        let arg_span = |arg: &str| {
            // The argument sits right after `|name:`.
            Span::new(
                (start + 1 + name.len() + 1) as u32,
                arg.len() as u32,
            )
        };

        match name {
            "b" => {
                if arg.is_some() {
                    return Err(malformed());
                }
                self.bold_open = match self.bold_open {
                    Some(_) => None,
                    None => Some(offset as u32),
                };
                stream.push(Token::Style {
                    kind: StyleKind::Bold,
                    tag,
                });
            }
            "i" => {
                if arg.is_some() {
                    return Err(malformed());
                }
                self.italic_open = match self.italic_open {
                    Some(_) => None,
                    None => Some(offset as u32),
                };
                stream.push(Token::Style {
                    kind: StyleKind::Italic,
                    tag,
                });
            }
            "c" => match arg {
                Some(arg) => {
                    let argb = parse_argb(arg).ok_or_else(malformed)?;
                    self.color_opens.push(offset as u32);
                    stream.push(Token::PushColor { argb, tag });
                }
                None => {
                    self.color_opens.pop().ok_or(ParseError::UnbalancedClose {
                        name: name.to_owned(),
                        offset,
                    })?;
                    stream.push(Token::PopColor { tag });
                }
            },
            "f" => match arg {
                Some(arg) if !arg.is_empty() => {
                    self.font_opens.push(offset as u32);
                    stream.push(Token::PushFont {
                        name: arg_span(arg),
                        tag,
                    });
                }
                Some(_) => return Err(malformed()),
                None => {
                    self.font_opens.pop().ok_or(ParseError::UnbalancedClose {
                        name: name.to_owned(),
                        offset,
                    })?;
                    stream.push(Token::PopFont { tag });
                }
            },
            "icon" => match arg {
                Some(arg) if !arg.is_empty() => {
                    stream.push(Token::Icon {
                        name: arg_span(arg),
                        tag,
                    });
                }
                _ => return Err(malformed()),
            },
            "link" => match arg {
                Some(arg) if !arg.is_empty() => {
                    self.link_opens.push(offset as u32);
                    stream.push(Token::PushLink {
                        target: arg_span(arg),
                        tag,
                    });
                }
                Some(_) => return Err(malformed()),
                None => {
                    self.link_opens.pop().ok_or(ParseError::UnbalancedClose {
                        name: name.to_owned(),
                        offset,
                    })?;
                    stream.push(Token::PopLink { tag });
                }
            },
            _ => {
                return Err(ParseError::UnknownCommand {
                    name: name.to_owned(),
                    offset,
                });
            }
        }
        Ok(close + 1)
    }

    fn check_balance(&self) -> Result<(), ParseError> {
        let open = |name: &str, offset: Option<&u32>| {
            offset.map(|&offset| ParseError::UnbalancedOpen {
                name: name.to_owned(),
                offset: offset as usize,
            })
        };
        if let Some(err) = open("b", self.bold_open.as_ref())
            .or_else(|| open("i", self.italic_open.as_ref()))
            .or_else(|| open("c", self.color_opens.first()))
            .or_else(|| open("f", self.font_opens.first()))
            .or_else(|| open("link", self.link_opens.first()))
        {
            return Err(err);
        }
        Ok(())
    }
}

#[inline]
fn flush_text(stream: &mut TokenStream, start: usize, end: usize) {
    if end > start {
        stream.push(Token::Text(Span::new(
            start as u32,
            (end - start) as u32,
        )));
    }
}

/// Parses an `AARRGGBB` color argument. Exactly eight hex digits.
fn parse_argb(arg: &str) -> Option<u32> {
    if arg.len() != 8 || !arg.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(arg, 16).ok()
}
