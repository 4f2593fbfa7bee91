//! Source file ownership and lookup.
//!
//! The loader owns every file's text for the whole compilation; tokens refer
//! back to it by [`FileId`] only, so positions stay meaningful even after
//! the caller drops intermediate token streams.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use codespan_reporting::files::Files;
use thiserror::Error;

/// Index of a source file inside of [`Sources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

/// A single loaded source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// The file's pretty name, shown in diagnostics.
    pub filename: String,
    /// The canonical path the file was loaded from, if it came from disk.
    pub full_path: Option<PathBuf>,
    /// The text, with the ` \n\0` sentinel appended so the lexer never has
    /// to special-case a token running into end of input.
    pub text: String,

    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(filename: String, full_path: Option<PathBuf>, mut text: String) -> Self {
        text.push_str(" \n\0");
        Self {
            filename,
            full_path,
            line_starts: codespan_reporting::files::line_starts(&text).collect(),
            text,
        }
    }

    fn line_start(&self, line_index: usize) -> Result<usize, codespan_reporting::files::Error> {
        use std::cmp::Ordering;

        match line_index.cmp(&self.line_starts.len()) {
            Ordering::Less => Ok(self.line_starts[line_index]),
            Ordering::Equal => Ok(self.text.len()),
            Ordering::Greater => Err(codespan_reporting::files::Error::LineTooLarge {
                given: line_index,
                max: self.line_starts.len() - 1,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot resolve path {0:?}")]
    PathResolutionFailed(PathBuf),
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("cannot read {0:?}")]
    ReadFailed(PathBuf),
    #[error("{0:?} is not valid UTF-8")]
    EncodingFailed(PathBuf),
}

/// The set of all source files participating in a compilation.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    files: Vec<SourceFile>,
    by_path: HashMap<PathBuf, FileId>,
}

impl Sources {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds an in-memory source file and returns its ID. Used for fragments
    /// and tests; files on disk go through [`Sources::load`].
    pub fn add(&mut self, filename: impl Into<String>, text: impl Into<String>) -> FileId {
        let id = FileId(self.files.len());
        self.files
            .push(SourceFile::new(filename.into(), None, text.into()));
        id
    }

    /// Loads a file from disk, interning it under its canonical path. A
    /// repeat load of the same canonical path returns the cached ID without
    /// touching the filesystem again.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<FileId, LoadError> {
        let path = path.as_ref();
        let full_path = path
            .canonicalize()
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::NotFound => LoadError::NotFound(path.to_owned()),
                _ => LoadError::PathResolutionFailed(path.to_owned()),
            })?;
        if let Some(&id) = self.by_path.get(&full_path) {
            return Ok(id);
        }

        tracing::debug!("loading {full_path:?}");
        let bytes =
            std::fs::read(&full_path).map_err(|_| LoadError::ReadFailed(full_path.clone()))?;
        let text =
            String::from_utf8(bytes).map_err(|_| LoadError::EncodingFailed(full_path.clone()))?;

        let id = FileId(self.files.len());
        self.files.push(SourceFile::new(
            path.to_string_lossy().into_owned(),
            Some(full_path.clone()),
            text,
        ));
        self.by_path.insert(full_path, id);
        Ok(id)
    }

    pub fn get(&self, file: FileId) -> &SourceFile {
        &self.files[file.0]
    }

    pub fn filename(&self, file: FileId) -> &str {
        &self.files[file.0].filename
    }

    pub fn text(&self, file: FileId) -> &str {
        &self.files[file.0].text
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file #{}", self.0)
    }
}

impl<'f> Files<'f> for Sources {
    type FileId = FileId;
    type Name = &'f str;
    type Source = &'f str;

    fn name(&'f self, id: Self::FileId) -> Result<Self::Name, codespan_reporting::files::Error> {
        Ok(&self.files[id.0].filename)
    }

    fn source(
        &'f self,
        id: Self::FileId,
    ) -> Result<Self::Source, codespan_reporting::files::Error> {
        Ok(&self.files[id.0].text)
    }

    fn line_index(
        &'f self,
        id: Self::FileId,
        byte_index: usize,
    ) -> Result<usize, codespan_reporting::files::Error> {
        Ok(self.files[id.0]
            .line_starts
            .binary_search(&byte_index)
            .unwrap_or_else(|next_line| next_line - 1))
    }

    fn line_range(
        &'f self,
        id: Self::FileId,
        line_index: usize,
    ) -> Result<std::ops::Range<usize>, codespan_reporting::files::Error> {
        let file = &self.files[id.0];
        let line_start = file.line_start(line_index)?;
        let next_line_start = file.line_start(line_index + 1)?;
        Ok(line_start..next_line_start)
    }
}
