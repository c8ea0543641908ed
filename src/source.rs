//! Candidate sources: the ordered, lazy sequences of passphrases an attack
//! tries. Both strategies, a newline-delimited file and a pattern, sit behind
//! [`CandidateSource`] so the attack loop does not care where guesses come
//! from.
use std::io;
use std::path::{Path, PathBuf};

use log::warn;

use crate::io::{LineIter, iter_lines_auto};
use crate::pattern::{Pattern, PatternError};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("candidate source is exhausted")]
    Exhausted,
    #[error("cannot open candidate file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed reading candidate file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A stateful, single-use sequence of candidate passphrases.
pub trait CandidateSource {
    /// Whether [`CandidateSource::next_candidate`] will yield something. May
    /// read ahead into an internal buffer.
    fn has_more(&mut self) -> bool;

    /// Advance and return the next candidate. Fails with
    /// [`SourceError::Exhausted`] once `has_more` is false.
    fn next_candidate(&mut self) -> Result<String, SourceError>;

    /// Human-readable name: the file name or the pattern text.
    fn name(&self) -> &str;
}

/// How candidates are produced. Setting one replaces the other.
#[derive(Debug, Clone)]
pub enum CandidateStrategy {
    File(PathBuf),
    Pattern(Pattern),
}

impl CandidateStrategy {
    pub fn pattern(pattern: &str) -> Result<Self, PatternError> {
        Pattern::compile(pattern).map(Self::Pattern)
    }

    pub fn name(&self) -> String {
        match self {
            Self::File(path) => display_name(path),
            Self::Pattern(pattern) => pattern.as_str().to_string(),
        }
    }

    /// Build a fresh source for one attack.
    pub fn open(&self, mmap_threshold_bytes: u64) -> Result<Box<dyn CandidateSource>, SourceError> {
        Ok(match self {
            Self::File(path) => Box::new(FileSource::open(path, mmap_threshold_bytes)?),
            Self::Pattern(pattern) => Box::new(pattern.enumerate()),
        })
    }
}

/// File name of `path` for display, falling back to the whole path.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lines of a text file, in file order, with line endings stripped.
///
/// The file handle is released as soon as the lines run out or a read
/// fails, and in any case when the source is dropped.
pub struct FileSource {
    path: PathBuf,
    name: String,
    lines: Option<LineIter>,
    peeked: Option<io::Result<String>>,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P, mmap_threshold_bytes: u64) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let lines =
            iter_lines_auto(path, mmap_threshold_bytes).map_err(|source| SourceError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_lines(path, lines))
    }

    pub(crate) fn from_lines(path: &Path, lines: LineIter) -> Self {
        Self {
            path: path.to_path_buf(),
            name: display_name(path),
            lines: Some(lines),
            peeked: None,
        }
    }

    /// Whether the underlying file is still open.
    pub fn is_open(&self) -> bool {
        self.lines.is_some()
    }

    fn fill(&mut self) {
        if self.peeked.is_some() {
            return;
        }
        if let Some(lines) = self.lines.as_mut() {
            match lines.next() {
                Some(line) => self.peeked = Some(line),
                None => self.lines = None,
            }
        }
    }
}

impl CandidateSource for FileSource {
    fn has_more(&mut self) -> bool {
        self.fill();
        self.peeked.is_some()
    }

    fn next_candidate(&mut self) -> Result<String, SourceError> {
        self.fill();
        match self.peeked.take() {
            Some(Ok(line)) => Ok(line),
            Some(Err(source)) => {
                warn!("read error in {}: {}", self.path.display(), source);
                self.lines = None;
                Err(SourceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
            None => Err(SourceError::Exhausted),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
