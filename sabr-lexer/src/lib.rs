//! The sabr tokenizer.
//!
//! Source is carved into whitespace-delimited tokens in a single
//! left-to-right pass. The lexer understands just enough structure to know
//! where a token ends: two comment styles (`\` to end of line, `( … )`),
//! three string flavors (`'…'`, `"…"`, and brace blocks `{ … }` with
//! nesting), and backslash escapes inside quoted strings. It never
//! validates token *content*; numbers, escapes, and identifiers are the
//! compiler's business.

pub mod token;

use sabr_foundation::{
    errors::{Diagnostic, Label},
    source::{FileId, Sources},
};
use thiserror::Error;

pub use token::{Position, Token};

/// Default number of columns a tab advances, overridable via `SABR_TAB`.
pub const DEFAULT_TAB_SIZE: u32 = 4;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unterminated string")]
    UnterminatedString { token: Token },
    #[error("misplaced string delimiter")]
    MisplacedStringDelimiter { token: Token },
}

impl LexError {
    pub fn token(&self) -> &Token {
        match self {
            Self::UnterminatedString { token } => token,
            Self::MisplacedStringDelimiter { token } => token,
        }
    }

    pub fn to_diagnostic(&self, sources: &Sources) -> Diagnostic {
        let token = self.token();
        let diagnostic = Diagnostic::error(format!("{self}: {}", token.locate(sources)));
        if token.range.is_empty() {
            diagnostic
        } else {
            diagnostic.with_label(Label::primary(token.file, token.range.clone(), ""))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comment {
    None,
    /// `\` until the end of the line.
    Line,
    /// `( … )`, not nested.
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringParse {
    None,
    Single,
    Double,
    /// Brace block; tracks depth and closes at zero.
    Preproc,
}

#[derive(Debug)]
pub struct Lexer<'a> {
    text: &'a str,
    file: FileId,
    init_pos: Position,
    /// Byte offset of `text` within the file it was sliced from, so token
    /// ranges keep pointing into the original file.
    base_offset: usize,
    generated: bool,
    tab_size: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str, file: FileId) -> Self {
        Self {
            text,
            file,
            init_pos: Position::START,
            base_offset: 0,
            generated: false,
            tab_size: DEFAULT_TAB_SIZE,
        }
    }

    /// Positions tokens as if `text` started at `pos`/`base_offset` of its
    /// file. Used when re-tokenizing stored definition bodies.
    pub fn with_origin(mut self, pos: Position, base_offset: usize) -> Self {
        self.init_pos = pos;
        self.base_offset = base_offset;
        self
    }

    /// Marks all produced tokens as preprocessor output anchored at
    /// `ancestor`'s position.
    pub fn with_generated(mut self, generated: bool) -> Self {
        self.generated = generated;
        self
    }

    pub fn with_tab_size(mut self, tab_size: u32) -> Self {
        self.tab_size = tab_size.max(1);
        self
    }

    fn make_token(&self, range: std::ops::Range<usize>, begin_pos: Position) -> Token {
        Token {
            text: self.text[range.clone()].to_owned(),
            origin: if self.generated {
                self.init_pos
            } else {
                begin_pos
            },
            file: self.file,
            range: if self.generated {
                0..0
            } else {
                self.base_offset + range.start..self.base_offset + range.end
            },
            generated: self.generated,
        }
    }

    /// The offending region for an error message: from the token start to
    /// the next whitespace, so the user sees the whole word.
    fn error_token(&self, begin_index: usize, begin_pos: Position) -> Token {
        let bytes = self.text.as_bytes();
        let mut end = begin_index;
        while end < bytes.len() && !matches!(bytes[end], b' ' | b'\t' | b'\r' | b'\n' | 0) {
            end += 1;
        }
        self.make_token(begin_index..end, begin_pos)
    }

    pub fn tokenize(self) -> Result<Vec<Token>, LexError> {
        let bytes = self.text.as_bytes();
        let mut tokens = vec![];

        let mut comment = Comment::None;
        let mut string_parse = StringParse::None;
        let mut string_escape = false;
        let mut string_parsed = false;
        let mut space = true;
        let mut brace_level = 0usize;

        let mut pos = self.init_pos;
        let mut begin_index = 0usize;
        let mut begin_pos = pos;

        let mut i = 0usize;
        while i < bytes.len() {
            let b = bytes[i];
            if b == 0 {
                break;
            }
            match b {
                b'\n' | b'\r' | b'\t' | b' ' => {
                    if b == b'\n' {
                        pos.line += 1;
                        pos.column = 0;
                    }
                    if matches!(b, b'\n' | b'\r') && comment == Comment::Line {
                        space = true;
                        comment = Comment::None;
                    }
                    if b == b'\t' {
                        pos.column += self.tab_size - 1;
                    }
                    if comment == Comment::None && !space {
                        if string_parse != StringParse::None {
                            string_escape = false;
                        } else {
                            tokens.push(self.make_token(begin_index..i, begin_pos));
                            space = true;
                            string_parsed = false;
                        }
                    }
                }
                b'\'' | b'"' => {
                    let mode = if b == b'\'' {
                        StringParse::Single
                    } else {
                        StringParse::Double
                    };
                    if comment == Comment::None {
                        if string_parse != StringParse::None {
                            if string_escape {
                                string_escape = false;
                            } else if string_parse == mode {
                                string_parse = StringParse::None;
                                string_parsed = true;
                            }
                        } else if space {
                            space = false;
                            begin_index = i;
                            begin_pos = pos;
                            string_parse = mode;
                            string_escape = false;
                        } else {
                            return Err(LexError::MisplacedStringDelimiter {
                                token: self.error_token(begin_index, begin_pos),
                            });
                        }
                    }
                }
                b'{' => {
                    if comment == Comment::None {
                        if string_parse != StringParse::None {
                            if string_escape {
                                string_escape = false;
                            } else if string_parse == StringParse::Preproc {
                                brace_level += 1;
                            }
                        } else if space {
                            space = false;
                            begin_index = i;
                            begin_pos = pos;
                            string_parse = StringParse::Preproc;
                            string_escape = false;
                            brace_level = 1;
                        } else {
                            return Err(LexError::MisplacedStringDelimiter {
                                token: self.error_token(begin_index, begin_pos),
                            });
                        }
                    }
                }
                b'}' => {
                    if comment == Comment::None {
                        if string_parse != StringParse::None {
                            if string_escape {
                                string_escape = false;
                            } else if string_parse == StringParse::Preproc {
                                brace_level -= 1;
                                if brace_level == 0 {
                                    string_parse = StringParse::None;
                                    string_parsed = true;
                                }
                            }
                        } else if space {
                            // A bare `}` opens an ordinary token; the
                            // preprocessor rejects it during brace
                            // validation where it can name the whole token.
                            space = false;
                            begin_index = i;
                            begin_pos = pos;
                        } else {
                            return Err(LexError::MisplacedStringDelimiter {
                                token: self.error_token(begin_index, begin_pos),
                            });
                        }
                    }
                }
                b'\\' => {
                    if comment == Comment::None {
                        if string_parse != StringParse::None {
                            string_escape = !string_escape;
                        } else if space {
                            space = false;
                            comment = Comment::Line;
                        }
                    }
                }
                b'(' => {
                    if comment == Comment::None {
                        if string_parse != StringParse::None {
                            string_escape = false;
                        } else if space {
                            space = false;
                            comment = Comment::Stack;
                        }
                    }
                }
                b')' => {
                    if comment == Comment::None && string_parse != StringParse::None {
                        string_escape = false;
                    }
                    if comment == Comment::Stack {
                        space = true;
                        comment = Comment::None;
                    }
                }
                _ => {
                    if comment == Comment::None {
                        if string_parse != StringParse::None && string_escape {
                            string_escape = false;
                        }
                        if space {
                            space = false;
                            begin_index = i;
                            begin_pos = pos;
                        } else if string_parsed {
                            return Err(LexError::MisplacedStringDelimiter {
                                token: self.error_token(begin_index, begin_pos),
                            });
                        }
                    }
                }
            }

            i += 1;
            // UTF-8 continuation bytes share their scalar's column.
            let next_starts_character = bytes.get(i).map_or(true, |&b| (b as i8) >= -64);
            if next_starts_character {
                pos.column += 1;
            }
        }

        if string_parse != StringParse::None {
            return Err(LexError::UnterminatedString {
                token: self.error_token(begin_index, begin_pos),
            });
        }
        if !space && comment == Comment::None {
            tokens.push(self.make_token(begin_index..i.min(bytes.len()), begin_pos));
        }

        Ok(tokens)
    }
}
