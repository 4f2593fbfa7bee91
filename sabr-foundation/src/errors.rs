//! Diagnostics shared by every pipeline stage.
//!
//! Errors are reported once, at the component that detects them, and bubble
//! upward as plain `Err`s; only the outermost caller renders. Each
//! diagnostic carries the single-line `token @ line L, column C in file F`
//! message and, when the offending token still has a byte span, a label
//! that lets codespan-reporting print the source snippet.

use std::ops::Range;

use codespan_reporting::{
    term,
    term::termcolor::{ColorChoice, StandardStream},
};

use crate::source::{FileId, Sources};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStyle {
    Primary,
    Secondary,
}

/// Points a diagnostic at a range of source bytes.
#[derive(Debug, Clone)]
pub struct Label {
    pub style: LabelStyle,
    pub file: FileId,
    pub range: Range<usize>,
    pub message: String,
}

impl Label {
    pub fn primary(file: FileId, range: Range<usize>, message: impl Into<String>) -> Self {
        Self {
            style: LabelStyle::Primary,
            file,
            range,
            message: message.into(),
        }
    }

    pub fn secondary(file: FileId, range: Range<usize>, message: impl Into<String>) -> Self {
        Self {
            style: LabelStyle::Secondary,
            file,
            range,
            message: message.into(),
        }
    }
}

/// A renderable problem description.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            labels: vec![],
            notes: vec![],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn to_codespan(&self) -> codespan_reporting::diagnostic::Diagnostic<FileId> {
        codespan_reporting::diagnostic::Diagnostic {
            severity: match self.severity {
                Severity::Warning => codespan_reporting::diagnostic::Severity::Warning,
                Severity::Error => codespan_reporting::diagnostic::Severity::Error,
            },
            code: None,
            message: self.message.clone(),
            labels: self
                .labels
                .iter()
                .map(|label| codespan_reporting::diagnostic::Label {
                    style: match label.style {
                        LabelStyle::Primary => codespan_reporting::diagnostic::LabelStyle::Primary,
                        LabelStyle::Secondary => {
                            codespan_reporting::diagnostic::LabelStyle::Secondary
                        }
                    },
                    file_id: label.file,
                    range: label.range.clone(),
                    message: label.message.clone(),
                })
                .collect(),
            notes: self.notes.clone(),
        }
    }

    /// Emits the diagnostic to standard error. Rendering failures degrade
    /// to the bare message.
    pub fn emit_to_stderr(&self, sources: &Sources) {
        if term::emit(
            &mut StandardStream::stderr(ColorChoice::Auto),
            &term::Config::default(),
            sources,
            &self.to_codespan(),
        )
        .is_err()
        {
            eprintln!("{}", self.message);
        }
    }
}
