//! Callback contracts between the engine and whatever presents it.
//!
//! The engine keeps observers as [`Weak`] references: it never keeps one
//! alive, and a dropped observer is simply skipped.
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

/// Error taxonomy pushed to observers. Kept as plain codes so a front end can
/// word (or translate) the messages itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingContainer,
    MissingCandidateSource,
    AttackAlreadyInProgress,
    Aborted,
    InvalidPattern,
    SourceUnreadable,
    IoRead,
    UnexpectedValidatorFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingContainer => "missing-container",
            Self::MissingCandidateSource => "missing-candidate-source",
            Self::AttackAlreadyInProgress => "attack-already-in-progress",
            Self::Aborted => "aborted",
            Self::InvalidPattern => "invalid-pattern",
            Self::SourceUnreadable => "source-unreadable",
            Self::IoRead => "io-read",
            Self::UnexpectedValidatorFailure => "unexpected-validator-failure",
        }
    }

    /// Process exit status used by the command-line front end.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Aborted | Self::UnexpectedValidatorFailure => 1,
            Self::MissingContainer => 2,
            Self::MissingCandidateSource => 3,
            Self::InvalidPattern => 4,
            Self::SourceUnreadable => 5,
            Self::IoRead => 6,
            Self::AttackAlreadyInProgress => 7,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress and outcome of attacks.
pub trait CrackingObserver: Send + Sync {
    /// Called before each candidate is validated.
    fn on_guess(&self, candidate: &str);

    /// Called exactly once per attack that got past validation. `password` is
    /// `None` when nothing matched or the attack was aborted.
    fn on_result(&self, password: Option<&str>, attempts: u64, elapsed: Duration);

    fn on_error(&self, _code: ErrorCode) {}
}

/// Changes to the attack configuration, e.g. for keeping a form in sync.
pub trait FormObserver: Send + Sync {
    fn on_database_set(&self, name: Option<&str>);
    fn on_key_file_set(&self, name: Option<&str>);
    fn on_candidate_source_set(&self, name: Option<&str>);

    fn on_error(&self, _code: ErrorCode) {}
}

/// A replaceable, non-owning reference to one observer.
pub(crate) struct ObserverSlot<T: ?Sized> {
    inner: RwLock<Option<Weak<T>>>,
}

impl<T: ?Sized> ObserverSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub(crate) fn set(&self, observer: Option<Weak<T>>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Run `f` against the observer if it is still alive. The slot lock is
    /// not held while `f` runs.
    pub(crate) fn notify(&self, f: impl FnOnce(&T)) {
        if let Some(observer) = self.get() {
            f(&observer);
        }
    }
}
