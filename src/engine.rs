//! Engine: owns the attack configuration, drives the guessing loop against a
//! [`ContainerValidator`], and fans progress out to observers.
//!
//! All methods take `&self`, so one engine can be shared through an `Arc`
//! between the thread running [`Engine::attack`] and a thread that calls
//! [`Engine::abort`]. The engine never spawns threads itself.
//!
//! Typical usage:
//!
//! ```no_run
//! use keecrack::engine::Engine;
//! use keecrack::validator::{ContainerValidator, Verdict};
//!
//! struct Knows(&'static str);
//!
//! impl ContainerValidator for Knows {
//!     fn try_open(&self, _db: &[u8], _key: Option<&[u8]>, pw: &str) -> Verdict {
//!         if pw == self.0 { Verdict::Accepted } else { Verdict::Rejected }
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let engine = Engine::new(Knows("0042"));
//! engine.set_database(Some("/path/to/vault.kdbx".into()));
//! engine.set_candidate_pattern(Some("[0-9]{4}"))?;
//! let report = engine.attack()?;
//! assert_eq!(report.password.as_deref(), Some("0042"));
//! # Ok(())
//! # }
//! ```
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use log::{debug, error, info, trace, warn};

use crate::io::DEFAULT_MMAP_THRESHOLD_BYTES;
use crate::observer::{CrackingObserver, ErrorCode, FormObserver, ObserverSlot};
use crate::pattern::PatternError;
use crate::report::{AttackReport, Outcome};
use crate::source::{CandidateSource, CandidateStrategy, SourceError, display_name};
use crate::validator::{ContainerValidator, Verdict};

/// Reasons an attack is refused before it starts.
#[derive(Debug, thiserror::Error)]
pub enum AttackError {
    #[error("no readable database configured")]
    MissingContainer,
    #[error("no candidate source configured")]
    MissingCandidateSource,
    #[error("an attack is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl AttackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingContainer => ErrorCode::MissingContainer,
            Self::MissingCandidateSource | Self::Source(SourceError::Exhausted) => {
                ErrorCode::MissingCandidateSource
            }
            Self::AlreadyRunning => ErrorCode::AttackAlreadyInProgress,
            Self::Source(SourceError::Unreadable { .. }) => ErrorCode::SourceUnreadable,
            Self::Source(SourceError::Read { .. }) => ErrorCode::IoRead,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the running flag when an attack ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Engine<V> {
    validator: V,
    mmap_threshold: u64,
    database: Mutex<Option<PathBuf>>,
    // Kept apart from the rest of the configuration: it may be swapped while
    // a previous attack is still snapshotting it.
    key_file: Mutex<Option<PathBuf>>,
    strategy: Mutex<Option<CandidateStrategy>>,
    running: AtomicBool,
    abort: AtomicBool,
    cracking: ObserverSlot<dyn CrackingObserver>,
    form: ObserverSlot<dyn FormObserver>,
}

impl<V: ContainerValidator> Engine<V> {
    /// Create an idle engine with no configuration and no observers.
    pub fn new(validator: V) -> Self {
        Self {
            validator,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD_BYTES,
            database: Mutex::new(None),
            key_file: Mutex::new(None),
            strategy: Mutex::new(None),
            running: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            cracking: ObserverSlot::new(),
            form: ObserverSlot::new(),
        }
    }

    /// Candidate files at least this large are memory-mapped.
    pub fn with_mmap_threshold(mut self, bytes: u64) -> Self {
        self.mmap_threshold = bytes;
        self
    }

    pub fn mmap_threshold(&self) -> u64 {
        self.mmap_threshold
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the running attack to stop before its next guess. The guess in
    /// flight is allowed to finish. Calling this repeatedly is the same as
    /// calling it once.
    pub fn abort(&self) {
        debug!("abort requested");
        self.abort.store(true, Ordering::Release);
    }

    /// Run one attack to completion on the calling thread.
    ///
    /// Configuration problems are pushed to both observers and returned as
    /// `Err` without a result notification. Once the attack is running it
    /// always ends with exactly one `on_result` call and an `Ok` report.
    pub fn attack(&self) -> Result<AttackReport, AttackError> {
        let Some(database) = self.readable_database() else {
            return Err(self.refuse(AttackError::MissingContainer));
        };
        let Some(strategy) = lock(&self.strategy).clone() else {
            return Err(self.refuse(AttackError::MissingCandidateSource));
        };
        let mut source = match strategy.open(self.mmap_threshold) {
            Ok(source) => source,
            Err(e) => return Err(self.refuse(e.into())),
        };
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(self.refuse(AttackError::AlreadyRunning));
        }
        let _running = RunningGuard(&self.running);

        info!("attacking {} with {}", database.display(), source.name());
        let started = Instant::now();
        let report = match self.load_inputs(&database) {
            Ok((container, key)) => self.run(source.as_mut(), &container, key.as_deref(), started),
            Err(e) => {
                error!("failed to read attack inputs: {}", e);
                self.send_error(ErrorCode::IoRead);
                AttackReport {
                    password: None,
                    attempts: 0,
                    elapsed: started.elapsed(),
                    outcome: Outcome::Failed,
                    unexpected_failures: 0,
                }
            }
        };
        drop(source);
        self.abort.store(false, Ordering::Release);

        info!(
            "attack finished: {:?} after {} attempts in {:?}",
            report.outcome, report.attempts, report.elapsed
        );
        self.cracking
            .notify(|o| o.on_result(report.password.as_deref(), report.attempts, report.elapsed));
        Ok(report)
    }

    fn run(
        &self,
        source: &mut dyn CandidateSource,
        container: &[u8],
        key: Option<&[u8]>,
        started: Instant,
    ) -> AttackReport {
        let mut attempts = 0u64;
        let mut unexpected_failures = 0u64;
        let mut password = None;
        let mut outcome = Outcome::Exhausted;

        while source.has_more() {
            if self.abort.swap(false, Ordering::AcqRel) {
                info!("attack aborted after {} attempts", attempts);
                self.send_error(ErrorCode::Aborted);
                outcome = Outcome::Aborted;
                break;
            }
            let candidate = match source.next_candidate() {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("candidate source failed, treating it as exhausted: {}", e);
                    self.send_error(AttackError::from(e).code());
                    break;
                }
            };
            attempts += 1;
            trace!("guess #{}: {}", attempts, candidate);
            self.cracking.notify(|o| o.on_guess(&candidate));

            match self.validator.try_open(container, key, &candidate) {
                Verdict::Accepted => {
                    password = Some(candidate);
                    outcome = Outcome::Succeeded;
                    break;
                }
                Verdict::Rejected => {}
                Verdict::UnexpectedFailure(detail) => {
                    unexpected_failures += 1;
                    warn!("validator failed on attempt {}: {}", attempts, detail);
                    if unexpected_failures == 1 {
                        self.send_error(ErrorCode::UnexpectedValidatorFailure);
                    }
                }
            }
        }

        AttackReport {
            password,
            attempts,
            elapsed: started.elapsed(),
            outcome,
            unexpected_failures,
        }
    }

    fn readable_database(&self) -> Option<PathBuf> {
        let path = lock(&self.database).clone()?;
        let readable = fs::metadata(&path).is_ok_and(|m| m.is_file()) && File::open(&path).is_ok();
        readable.then_some(path)
    }

    /// Read the container and snapshot the key material once per attack.
    fn load_inputs(&self, database: &Path) -> io::Result<(Vec<u8>, Option<Vec<u8>>)> {
        let container = fs::read(database)?;
        let key = {
            let key_file = lock(&self.key_file);
            match key_file.as_deref() {
                Some(path) => Some(fs::read(path)?),
                None => None,
            }
        };
        Ok((container, key.filter(|k| !k.is_empty())))
    }

    fn refuse(&self, err: AttackError) -> AttackError {
        warn!("attack refused: {}", err);
        self.send_error(err.code());
        err
    }

    /// Push `code` to both observers; either may be absent.
    pub(crate) fn send_error(&self, code: ErrorCode) {
        self.cracking.notify(|o| o.on_error(code));
        self.form.notify(|o| o.on_error(code));
    }

    pub fn database(&self) -> Option<PathBuf> {
        lock(&self.database).clone()
    }

    pub fn set_database(&self, path: Option<PathBuf>) {
        let name = path.as_deref().map(display_name);
        debug!("database set to {:?}", path);
        *lock(&self.database) = path;
        self.form.notify(|o| o.on_database_set(name.as_deref()));
    }

    pub fn key_file(&self) -> Option<PathBuf> {
        lock(&self.key_file).clone()
    }

    pub fn set_key_file(&self, path: Option<PathBuf>) {
        let name = path.as_deref().map(display_name);
        debug!("key file set to {:?}", path);
        *lock(&self.key_file) = path;
        self.form.notify(|o| o.on_key_file_set(name.as_deref()));
    }

    /// Use the lines of `path` as candidates. An unreadable file is reported
    /// right away and leaves no candidate source configured.
    pub fn set_candidate_file(&self, path: Option<PathBuf>) -> Result<(), SourceError> {
        if let Some(path) = &path {
            if let Err(source) = File::open(path) {
                let err = SourceError::Unreadable {
                    path: path.clone(),
                    source,
                };
                warn!("{}", err);
                self.send_error(ErrorCode::SourceUnreadable);
                self.set_strategy(None);
                return Err(err);
            }
        }
        self.set_strategy(path.map(CandidateStrategy::File));
        Ok(())
    }

    /// Enumerate the strings matched by `pattern` as candidates. An invalid
    /// pattern is reported right away and leaves no candidate source
    /// configured.
    pub fn set_candidate_pattern(&self, pattern: Option<&str>) -> Result<(), PatternError> {
        match pattern.map(CandidateStrategy::pattern).transpose() {
            Ok(strategy) => {
                self.set_strategy(strategy);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                self.send_error(ErrorCode::InvalidPattern);
                self.set_strategy(None);
                Err(e)
            }
        }
    }

    pub fn candidate_source_name(&self) -> Option<String> {
        lock(&self.strategy).as_ref().map(CandidateStrategy::name)
    }

    fn set_strategy(&self, strategy: Option<CandidateStrategy>) {
        let name = strategy.as_ref().map(CandidateStrategy::name);
        debug!("candidate source set to {:?}", name);
        *lock(&self.strategy) = strategy;
        self.form.notify(|o| o.on_candidate_source_set(name.as_deref()));
    }

    /// Observe guesses and results. Only a weak reference is kept.
    pub fn set_cracking_observer<O: CrackingObserver + 'static>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer) as Weak<dyn CrackingObserver>;
        self.cracking.set(Some(weak));
    }

    pub fn clear_cracking_observer(&self) {
        self.cracking.set(None);
    }

    /// Observe configuration changes. Only a weak reference is kept.
    pub fn set_form_observer<O: FormObserver + 'static>(&self, observer: &Arc<O>) {
        let weak = Arc::downgrade(observer) as Weak<dyn FormObserver>;
        self.form.set(Some(weak));
    }

    pub fn clear_form_observer(&self) {
        self.form.set(None);
    }

    /// Clear the configuration and detach both observers. Refused while an
    /// attack is running.
    pub fn reset(&self) -> Result<(), AttackError> {
        if self.is_running() {
            return Err(self.refuse(AttackError::AlreadyRunning));
        }
        self.set_database(None);
        self.set_key_file(None);
        self.set_strategy(None);
        self.clear_cracking_observer();
        self.clear_form_observer();
        Ok(())
    }
}
