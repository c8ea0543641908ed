//! Lazy enumeration of the strings matched by a regular expression.
//!
//! A pattern is parsed with `regex-syntax`, so it accepts the same syntax as
//! the `regex` crate, and lowered to a small expression tree annotated with
//! the shortest and longest string each node can produce. Enumeration walks
//! string lengths (in characters) in ascending order and, for each length,
//! runs an odometer over the tree:
//!
//! - a concatenation splits the length between its parts, giving the leftmost
//!   part the shortest share first, and varies its rightmost part fastest;
//! - an alternation tries its branches in pattern order;
//! - a repetition tries repeat counts in ascending order;
//! - a class yields its members in ascending code point order.
//!
//! For `[0-9]{2}` this gives `00, 01, ..., 99`, so `42` is the 43rd string.
//! Infinite languages never run dry.
//!
//! Ambiguous patterns can produce the same string more than once. Nested
//! repetitions such as `(a|aa)*` do, and so does any concatenation whose parts
//! can trade characters: `a?a?` yields `a` twice, once from each optional
//! part.
//!
//! Line anchors (`^`, `$`, `\A`, `\z`) are accepted only where every generated
//! string satisfies them, at the very start or end of the pattern. Word
//! boundaries and anchors anywhere else are rejected as unsupported.
use std::fmt;
use std::iter;
use std::sync::Arc;

use regex_syntax::ParserBuilder;
use regex_syntax::hir::{Class, Hir, HirKind, Look};

use crate::source::{CandidateSource, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid pattern {pattern:?}: {source}")]
    Syntax {
        pattern: String,
        #[source]
        source: regex_syntax::Error,
    },
    #[error("unsupported construct in pattern {pattern:?}: {detail}")]
    Unsupported { pattern: String, detail: String },
}

type Strings = Box<dyn Iterator<Item = String> + Send>;

/// Shortest and longest string a node can produce. `max == None` means the
/// node has no upper bound, i.e. its language is infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    min: usize,
    max: Option<usize>,
}

impl Bounds {
    fn exact(len: usize) -> Self {
        Self {
            min: len,
            max: Some(len),
        }
    }

    fn admits(&self, len: usize) -> bool {
        len >= self.min && self.max.is_none_or(|max| len <= max)
    }

    fn plus(self, other: Self) -> Self {
        Self {
            min: self.min.saturating_add(other.min),
            max: self.max.zip(other.max).map(|(x, y)| x.saturating_add(y)),
        }
    }

    fn times(self, n: usize) -> Self {
        Self {
            min: self.min.saturating_mul(n),
            max: self.max.map(|m| m.saturating_mul(n)),
        }
    }
}

#[derive(Debug)]
struct Expr {
    kind: Kind,
    // None when the node matches nothing at all
    bounds: Option<Bounds>,
}

#[derive(Debug)]
enum Kind {
    Empty,
    Literal(String),
    Class(Arc<[(char, char)]>),
    Concat {
        parts: Arc<[Arc<Expr>]>,
        // (own bounds, bounds of all later parts) per part
        spans: Arc<[(Bounds, Bounds)]>,
    },
    Alternation(Arc<[Arc<Expr>]>),
    Repeat {
        sub: Arc<Expr>,
        min: usize,
        max: Option<usize>,
    },
}

impl Expr {
    fn empty() -> Self {
        Self {
            kind: Kind::Empty,
            bounds: Some(Bounds::exact(0)),
        }
    }

    fn nothing() -> Self {
        Self {
            kind: Kind::Empty,
            bounds: None,
        }
    }

    fn literal(text: String) -> Self {
        let len = text.chars().count();
        Self {
            kind: Kind::Literal(text),
            bounds: Some(Bounds::exact(len)),
        }
    }

    fn class(ranges: Vec<(char, char)>) -> Self {
        let bounds = (!ranges.is_empty()).then(|| Bounds::exact(1));
        Self {
            kind: Kind::Class(ranges.into()),
            bounds,
        }
    }

    fn concat(parts: Vec<Expr>) -> Self {
        let Some(own) = parts.iter().map(|p| p.bounds).collect::<Option<Vec<_>>>() else {
            return Self::nothing();
        };
        let mut spans = vec![(Bounds::exact(0), Bounds::exact(0)); own.len()];
        let mut rest = Bounds::exact(0);
        for (i, b) in own.iter().enumerate().rev() {
            spans[i] = (*b, rest);
            rest = b.plus(rest);
        }
        Self {
            kind: Kind::Concat {
                parts: parts.into_iter().map(Arc::new).collect(),
                spans: spans.into(),
            },
            bounds: Some(rest),
        }
    }

    fn alternation(branches: Vec<Expr>) -> Self {
        let bounds = branches
            .iter()
            .filter_map(|b| b.bounds)
            .reduce(|a, b| Bounds {
                min: a.min.min(b.min),
                max: a.max.zip(b.max).map(|(x, y)| x.max(y)),
            });
        Self {
            kind: Kind::Alternation(branches.into_iter().map(Arc::new).collect()),
            bounds,
        }
    }

    fn repeat(sub: Expr, min: usize, max: Option<usize>) -> Self {
        let bounds = match sub.bounds {
            None if min == 0 => Some(Bounds::exact(0)),
            None => None,
            Some(b) if b.max == Some(0) => Some(Bounds::exact(0)),
            Some(b) => Some(Bounds {
                min: b.min.saturating_mul(min),
                max: b.max.zip(max).map(|(x, m)| x.saturating_mul(m)),
            }),
        };
        Self {
            kind: Kind::Repeat {
                sub: Arc::new(sub),
                min,
                max,
            },
            bounds,
        }
    }
}

/// Whether a node sits at the start or end of every string it is part of.
#[derive(Debug, Clone, Copy)]
struct Edges {
    start: bool,
    end: bool,
}

impl Edges {
    const BOTH: Self = Self {
        start: true,
        end: true,
    };
    const NONE: Self = Self {
        start: false,
        end: false,
    };
}

fn zero_width(hir: &Hir) -> bool {
    hir.properties().maximum_len() == Some(0)
}

fn unsupported(pattern: &str, detail: &str) -> PatternError {
    PatternError::Unsupported {
        pattern: pattern.to_string(),
        detail: detail.to_string(),
    }
}

fn lower(hir: &Hir, pattern: &str, edges: Edges) -> Result<Expr, PatternError> {
    let expr = match hir.kind() {
        HirKind::Empty => Expr::empty(),
        HirKind::Look(look) => {
            let holds = match look {
                Look::Start | Look::StartLF | Look::StartCRLF => edges.start,
                Look::End | Look::EndLF | Look::EndCRLF => edges.end,
                _ => false,
            };
            if !holds {
                return Err(unsupported(
                    pattern,
                    &format!("assertion {look:?} is only supported at the pattern edges"),
                ));
            }
            Expr::empty()
        }
        HirKind::Literal(lit) => {
            let text = std::str::from_utf8(&lit.0)
                .map_err(|_| unsupported(pattern, "literal is not valid UTF-8"))?;
            Expr::literal(text.to_string())
        }
        HirKind::Class(Class::Unicode(class)) => Expr::class(
            class
                .ranges()
                .iter()
                .map(|r| (r.start(), r.end()))
                .collect(),
        ),
        HirKind::Class(Class::Bytes(class)) => {
            let mut ranges = Vec::with_capacity(class.ranges().len());
            for r in class.ranges() {
                if !r.end().is_ascii() {
                    return Err(unsupported(pattern, "byte class reaches outside ASCII"));
                }
                ranges.push((char::from(r.start()), char::from(r.end())));
            }
            Expr::class(ranges)
        }
        HirKind::Repetition(rep) => {
            let inner = if rep.max == Some(1) || zero_width(&rep.sub) {
                edges
            } else {
                Edges::NONE
            };
            Expr::repeat(
                lower(&rep.sub, pattern, inner)?,
                rep.min as usize,
                rep.max.map(|m| m as usize),
            )
        }
        HirKind::Capture(cap) => lower(&cap.sub, pattern, edges)?,
        HirKind::Concat(parts) => {
            let first_wide = parts.iter().position(|p| !zero_width(p));
            let last_wide = parts.iter().rposition(|p| !zero_width(p));
            let exprs = parts
                .iter()
                .enumerate()
                .map(|(i, part)| {
                    let at = Edges {
                        start: edges.start && first_wide.is_none_or(|j| i <= j),
                        end: edges.end && last_wide.is_none_or(|j| i >= j),
                    };
                    lower(part, pattern, at)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Expr::concat(exprs)
        }
        HirKind::Alternation(branches) => Expr::alternation(
            branches
                .iter()
                .map(|branch| lower(branch, pattern, edges))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(expr)
}

/// All strings of exactly `len` characters produced by `expr`, in odometer
/// order.
fn strings(expr: &Arc<Expr>, len: usize) -> Strings {
    if !expr.bounds.is_some_and(|b| b.admits(len)) {
        return Box::new(iter::empty());
    }
    match &expr.kind {
        Kind::Empty => Box::new(iter::once(String::new())),
        Kind::Literal(text) => Box::new(iter::once(text.clone())),
        Kind::Class(ranges) => {
            let ranges = ranges.clone();
            Box::new(
                (0..ranges.len())
                    .flat_map(move |i| {
                        let (start, end) = ranges[i];
                        start..=end
                    })
                    .map(String::from),
            )
        }
        Kind::Concat { parts, spans } => Box::new(Sequence::new(
            Layout::Concat {
                parts: parts.clone(),
                spans: spans.clone(),
            },
            len,
        )),
        Kind::Alternation(branches) => {
            let branches = branches.clone();
            Box::new((0..branches.len()).flat_map(move |i| strings(&branches[i], len)))
        }
        Kind::Repeat { sub, min, max } => repeat_strings(sub.clone(), *min, *max, len),
    }
}

fn repeat_strings(sub: Arc<Expr>, min: usize, max: Option<usize>, len: usize) -> Strings {
    if len == 0 {
        return Box::new(iter::once(String::new()));
    }
    let Some(sb) = sub.bounds else {
        return Box::new(iter::empty());
    };
    // Only non-empty pieces are counted. A sub-expression that can match the
    // empty string pads the remaining repeats, so any count from one works.
    let piece = Bounds {
        min: sb.min.max(1),
        max: sb.max,
    };
    let first = if sb.min == 0 { 1 } else { min.max(1) };
    let last = max.map_or(len, |max| max.min(len)).min(len / piece.min);
    Box::new((first..=last).flat_map(move |count| {
        Sequence::new(
            Layout::Repeat {
                sub: sub.clone(),
                count,
                piece,
            },
            len,
        )
    }))
}

/// The parts a [`Sequence`] lays side by side.
enum Layout {
    Concat {
        parts: Arc<[Arc<Expr>]>,
        spans: Arc<[(Bounds, Bounds)]>,
    },
    /// `count` non-empty pieces of `sub`.
    Repeat {
        sub: Arc<Expr>,
        count: usize,
        piece: Bounds,
    },
}

impl Layout {
    fn len(&self) -> usize {
        match self {
            Self::Concat { parts, .. } => parts.len(),
            Self::Repeat { count, .. } => *count,
        }
    }

    fn part(&self, i: usize) -> &Arc<Expr> {
        match self {
            Self::Concat { parts, .. } => &parts[i],
            Self::Repeat { sub, .. } => sub,
        }
    }

    /// Bounds of part `i` and of everything after it.
    fn span(&self, i: usize) -> (Bounds, Bounds) {
        match self {
            Self::Concat { spans, .. } => spans[i],
            Self::Repeat { count, piece, .. } => (*piece, piece.times(count - 1 - i)),
        }
    }
}

/// One fixed part of a [`Sequence`]: its share of the length and its current
/// string.
struct Level {
    // characters left for this part and every later one
    room: usize,
    len: usize,
    hi: usize,
    strings: Strings,
    value: String,
}

impl Level {
    /// Move to the next string of this part, growing its share of the length
    /// once the current share runs out.
    fn advance(&mut self, expr: &Arc<Expr>) -> bool {
        loop {
            if let Some(value) = self.strings.next() {
                self.value = value;
                return true;
            }
            if self.len >= self.hi {
                return false;
            }
            self.len += 1;
            self.strings = strings(expr, self.len);
        }
    }
}

/// Odometer over parts that together span exactly `len` characters. Part
/// states live in a `Vec`, so the call depth does not grow with the number
/// of parts or repeats.
struct Sequence {
    layout: Layout,
    len: usize,
    levels: Vec<Level>,
    started: bool,
}

impl Sequence {
    fn new(layout: Layout, len: usize) -> Self {
        Self {
            layout,
            len,
            levels: Vec::new(),
            started: false,
        }
    }

    /// Place the next part at its shortest feasible length.
    fn push(&mut self) -> bool {
        let i = self.levels.len();
        let room = self.levels.last().map_or(self.len, |l| l.room - l.len);
        let (own, rest) = self.layout.span(i);
        let Some(spare) = room.checked_sub(rest.min) else {
            return false;
        };
        let lo = match rest.max {
            Some(max) => own.min.max(room.saturating_sub(max)),
            None => own.min,
        };
        let hi = own.max.map_or(spare, |max| max.min(spare));
        if lo > hi {
            return false;
        }
        let expr = self.layout.part(i);
        let mut level = Level {
            room,
            len: lo,
            hi,
            strings: strings(expr, lo),
            value: String::new(),
        };
        if !level.advance(expr) {
            return false;
        }
        self.levels.push(level);
        true
    }

    /// Advance the deepest part that can still move, dropping exhausted ones.
    fn backtrack(&mut self) -> bool {
        while let Some(i) = self.levels.len().checked_sub(1) {
            if self.levels[i].advance(self.layout.part(i)) {
                return true;
            }
            self.levels.pop();
        }
        false
    }

    fn fill(&mut self) -> bool {
        while self.levels.len() < self.layout.len() {
            if !self.push() && !self.backtrack() {
                return false;
            }
        }
        true
    }
}

impl Iterator for Sequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let found = if self.started {
            self.backtrack() && self.fill()
        } else {
            self.started = true;
            self.fill()
        };
        found.then(|| self.levels.iter().map(|l| l.value.as_str()).collect())
    }
}

/// A compiled pattern. Cheap to clone; every call to [`Pattern::enumerate`]
/// starts a fresh enumeration.
#[derive(Clone)]
pub struct Pattern {
    text: Arc<str>,
    root: Arc<Expr>,
}

impl Pattern {
    /// Parse and lower `pattern`. All syntax errors are reported here, never
    /// during enumeration.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let hir = ParserBuilder::new()
            .build()
            .parse(pattern)
            .map_err(|source| PatternError::Syntax {
                pattern: pattern.to_string(),
                source,
            })?;
        let root = lower(&hir, pattern, Edges::BOTH)?;
        Ok(Self {
            text: pattern.into(),
            root: Arc::new(root),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether the pattern matches finitely many strings.
    pub fn is_finite(&self) -> bool {
        self.root.bounds.is_none_or(|b| b.max.is_some())
    }

    /// Shortest and longest matching length in characters, or `None` when
    /// the pattern matches nothing.
    pub fn length_bounds(&self) -> Option<(usize, Option<usize>)> {
        self.root.bounds.map(|b| (b.min, b.max))
    }

    pub fn enumerate(&self) -> PatternEnumerator {
        PatternEnumerator::from_pattern(self.clone())
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&&*self.text).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Lazy generator over every string matched by a [`Pattern`].
pub struct PatternEnumerator {
    pattern: Pattern,
    next_len: usize,
    current: Strings,
    peeked: Option<String>,
}

impl PatternEnumerator {
    /// Compile `pattern` and start enumerating it.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Pattern::compile(pattern).map(Self::from_pattern)
    }

    fn from_pattern(pattern: Pattern) -> Self {
        Self {
            pattern,
            next_len: 0,
            current: Box::new(iter::empty()),
            peeked: None,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Whether another string is available. Always true for infinite
    /// languages.
    pub fn has_next(&mut self) -> bool {
        loop {
            if self.peeked.is_some() {
                return true;
            }
            if let Some(next) = self.current.next() {
                self.peeked = Some(next);
                return true;
            }
            let Some(bounds) = self.pattern.root.bounds else {
                return false;
            };
            if bounds.max.is_some_and(|max| self.next_len > max) {
                return false;
            }
            let len = self.next_len.max(bounds.min);
            self.current = strings(&self.pattern.root, len);
            self.next_len = len + 1;
        }
    }

    /// Rewind to the first string.
    pub fn restart(&mut self) {
        *self = Self::from_pattern(self.pattern.clone());
    }
}

impl Iterator for PatternEnumerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.has_next() {
            self.peeked.take()
        } else {
            None
        }
    }
}

impl CandidateSource for PatternEnumerator {
    fn has_more(&mut self) -> bool {
        self.has_next()
    }

    fn next_candidate(&mut self) -> Result<String, SourceError> {
        self.next().ok_or(SourceError::Exhausted)
    }

    fn name(&self) -> &str {
        self.pattern.as_str()
    }
}
