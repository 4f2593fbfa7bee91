use std::{fmt, ops::Range};

use sabr_foundation::source::{FileId, Sources};

/// 1-based line and column of a character within a source file.
///
/// Tabs advance the column by the configured tab width; UTF-8 continuation
/// bytes do not advance it at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const START: Self = Self { line: 1, column: 1 };
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A single whitespace-delimited token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// Where the token begins. Generated tokens carry their ancestor's
    /// position so diagnostics stay anchored to real source.
    pub origin: Position,
    pub file: FileId,
    /// Byte range within the file's text; empty for generated tokens.
    pub range: Range<usize>,
    /// True if the token was produced by the preprocessor rather than read
    /// from a file.
    pub generated: bool,
}

impl Token {
    /// Creates a token synthesized by the preprocessor, inheriting the
    /// position of the token it descends from.
    pub fn generated(text: impl Into<String>, ancestor: &Token) -> Self {
        Self {
            text: text.into(),
            origin: ancestor.origin,
            file: ancestor.file,
            range: 0..0,
            generated: true,
        }
    }

    /// The `token @ line L, column C in file F` form every component uses
    /// when reporting a failure.
    pub fn locate(&self, sources: &Sources) -> String {
        format!(
            "{} @ {} in {}",
            self.text,
            self.origin,
            sources.filename(self.file)
        )
    }
}
