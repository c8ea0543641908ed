use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use keecrack::prelude::*;
use tempfile::{TempDir, tempdir};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Guess(String),
    Result(Option<String>, u64),
    Error(ErrorCode),
    Database(Option<String>),
    KeyFile(Option<String>),
    Source(Option<String>),
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

impl Recorder {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    fn guesses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Guess(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    fn results(&self) -> Vec<(Option<String>, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Result(pw, n) => Some((pw, n)),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> Vec<ErrorCode> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(code) => Some(code),
                _ => None,
            })
            .collect()
    }
}

impl CrackingObserver for Recorder {
    fn on_guess(&self, candidate: &str) {
        self.push(Event::Guess(candidate.to_string()));
    }
    fn on_result(&self, password: Option<&str>, attempts: u64, _elapsed: Duration) {
        self.push(Event::Result(password.map(str::to_string), attempts));
    }
    fn on_error(&self, code: ErrorCode) {
        self.push(Event::Error(code));
    }
}

impl FormObserver for Recorder {
    fn on_database_set(&self, name: Option<&str>) {
        self.push(Event::Database(name.map(str::to_string)));
    }
    fn on_key_file_set(&self, name: Option<&str>) {
        self.push(Event::KeyFile(name.map(str::to_string)));
    }
    fn on_candidate_source_set(&self, name: Option<&str>) {
        self.push(Event::Source(name.map(str::to_string)));
    }
    fn on_error(&self, code: ErrorCode) {
        self.push(Event::Error(code));
    }
}

/// Accepts exactly one password and remembers the key material it saw.
struct Only {
    password: &'static str,
    keys: Mutex<Vec<Option<Vec<u8>>>>,
}

impl Only {
    fn new(password: &'static str) -> Self {
        Self {
            password,
            keys: Mutex::new(Vec::new()),
        }
    }
}

impl ContainerValidator for Only {
    fn try_open(&self, _c: &[u8], key: Option<&[u8]>, candidate: &str) -> Verdict {
        self.keys.lock().unwrap().push(key.map(<[u8]>::to_vec));
        if candidate == self.password {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    }
}

fn workspace() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let db = dir.path().join("vault.kdbx");
    fs::write(&db, b"not really a kdbx").unwrap();
    (dir, db)
}

fn word_list(dir: &Path, words: &[&str]) -> PathBuf {
    let path = dir.join("words.txt");
    let mut body = words.join("\n");
    body.push('\n');
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn word_list_attack_stops_at_the_password() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("b"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine
        .set_candidate_file(Some(word_list(dir.path(), &["a", "b", "c"])))
        .unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.password.as_deref(), Some("b"));
    assert_eq!(report.attempts, 2);
    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(rec.guesses(), vec!["a", "b"]);
    assert_eq!(rec.results(), vec![(Some("b".to_string()), 2)]);
    assert!(rec.errors().is_empty());
    assert!(!engine.is_running());
}

#[test]
fn exhausted_word_list_reports_no_password() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("z"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine
        .set_candidate_file(Some(word_list(dir.path(), &["x", "y"])))
        .unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_eq!(rec.guesses(), vec!["x", "y"]);
    assert_eq!(rec.results(), vec![(None, 2)]);
}

#[test]
fn windows_line_endings_are_stripped() {
    let (dir, db) = workspace();
    let words = dir.path().join("crlf.txt");
    fs::write(&words, "alpha\r\nbeta\r\n").unwrap();
    let engine = Engine::new(Only::new("beta"));
    engine.set_database(Some(db));
    engine.set_candidate_file(Some(words)).unwrap();
    let report = engine.attack().unwrap();
    assert_eq!(report.password.as_deref(), Some("beta"));
}

#[test]
fn memory_mapped_word_list_behaves_the_same() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("c")).with_mmap_threshold(1);
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine
        .set_candidate_file(Some(word_list(dir.path(), &["a", "b", "c"])))
        .unwrap();
    let report = engine.attack().unwrap();
    assert_eq!(report.attempts, 3);
    assert_eq!(rec.guesses(), vec!["a", "b", "c"]);
}

#[test]
fn pattern_attack_counts_every_guess() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("42"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[0-9]{2}")).unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.password.as_deref(), Some("42"));
    assert_eq!(report.attempts, 43);
    let guesses = rec.guesses();
    assert_eq!(guesses.len() as u64, report.attempts);
    assert_eq!(guesses.first().map(String::as_str), Some("00"));
    assert_eq!(rec.results(), vec![(Some("42".to_string()), 43)]);
}

#[test]
fn short_pattern_finds_ab_in_two_guesses() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("ab"));
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[a-z]{2}")).unwrap();
    let report = engine.attack().unwrap();
    assert_eq!(report.attempts, 2);
}

#[test]
fn abort_before_attack_stops_it_before_the_first_guess() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("never"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[a-z]+")).unwrap();

    engine.abort();
    engine.abort();
    let report = engine.attack().unwrap();
    assert_eq!(report.outcome, Outcome::Aborted);
    assert_eq!(report.attempts, 0);
    assert_eq!(rec.errors(), vec![ErrorCode::Aborted]);
    assert_eq!(rec.results(), vec![(None, 0)]);

    // The request was consumed; the next attack runs normally.
    engine.set_candidate_pattern(Some("[a-c]")).unwrap();
    let report = engine.attack().unwrap();
    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_eq!(report.attempts, 3);
}

/// Aborts the engine it observes once it has seen `after` guesses.
struct AbortAfter {
    after: usize,
    seen: Mutex<usize>,
    engine: OnceLock<Arc<Engine<Only>>>,
    inner: Recorder,
}

impl CrackingObserver for AbortAfter {
    fn on_guess(&self, candidate: &str) {
        self.inner.on_guess(candidate);
        let mut seen = self.seen.lock().unwrap();
        *seen += 1;
        if *seen == self.after {
            if let Some(engine) = self.engine.get() {
                engine.abort();
            }
        }
    }
    fn on_result(&self, password: Option<&str>, attempts: u64, elapsed: Duration) {
        self.inner.on_result(password, attempts, elapsed);
    }
    fn on_error(&self, code: ErrorCode) {
        CrackingObserver::on_error(&self.inner, code);
    }
}

#[test]
fn abort_during_attack_lets_the_current_guess_finish() {
    let (_dir, db) = workspace();
    let engine = Arc::new(Engine::new(Only::new("never")));
    let observer = Arc::new(AbortAfter {
        after: 3,
        seen: Mutex::new(0),
        engine: OnceLock::new(),
        inner: Recorder::default(),
    });
    observer.engine.set(Arc::clone(&engine)).ok().unwrap();
    engine.set_cracking_observer(&observer);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[a-z]*")).unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.outcome, Outcome::Aborted);
    assert_eq!(report.attempts, 3);
    assert_eq!(observer.inner.guesses(), vec!["", "a", "b"]);
    assert_eq!(observer.inner.errors(), vec![ErrorCode::Aborted]);
    assert_eq!(observer.inner.results(), vec![(None, 3)]);
    // The validator saw exactly the guesses that were announced.
    assert_eq!(engine.validator().keys.lock().unwrap().len(), 3);
}

#[test]
fn abort_from_another_thread() {
    let (_dir, db) = workspace();
    let engine = Arc::new(Engine::new(Only::new("never")));
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some(".+")).unwrap();

    let attacker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.attack())
    };
    while !engine.is_running() && !attacker.is_finished() {
        thread::yield_now();
    }
    engine.abort();
    let report = attacker.join().unwrap().unwrap();
    assert_eq!(report.outcome, Outcome::Aborted);
    assert!(!engine.is_running());
}

/// Blocks inside the first guess until released.
struct Gate {
    entered: Barrier,
    release: Barrier,
    first: Mutex<bool>,
}

impl ContainerValidator for Gate {
    fn try_open(&self, _c: &[u8], _k: Option<&[u8]>, candidate: &str) -> Verdict {
        let first = std::mem::replace(&mut *self.first.lock().unwrap(), false);
        if first {
            self.entered.wait();
            self.release.wait();
        }
        if candidate == "b" {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    }
}

#[test]
fn second_attack_is_refused_while_one_runs() {
    let (_dir, db) = workspace();
    let engine = Arc::new(Engine::new(Gate {
        entered: Barrier::new(2),
        release: Barrier::new(2),
        first: Mutex::new(true),
    }));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_form_observer(&rec);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[a-c]")).unwrap();

    let attacker = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.attack())
    };
    engine.validator().entered.wait();
    assert!(engine.is_running());
    let err = engine.attack().unwrap_err();
    assert!(matches!(err, AttackError::AlreadyRunning));
    assert!(matches!(engine.reset(), Err(AttackError::AlreadyRunning)));
    engine.validator().release.wait();

    let report = attacker.join().unwrap().unwrap();
    assert_eq!(report.password.as_deref(), Some("b"));
    assert_eq!(report.attempts, 2);
    // Both observers heard about each refusal.
    let refusals = rec
        .errors()
        .into_iter()
        .filter(|c| *c == ErrorCode::AttackAlreadyInProgress)
        .count();
    assert_eq!(refusals, 4);
    assert_eq!(rec.results(), vec![(Some("b".to_string()), 2)]);
}

#[test]
fn word_list_is_released_after_every_ending() {
    let (dir, db) = workspace();

    let engine = Engine::new(Only::new("a"));
    engine.set_database(Some(db.clone()));
    let words = word_list(dir.path(), &["a", "b"]);
    engine.set_candidate_file(Some(words.clone())).unwrap();
    engine.attack().unwrap();
    fs::rename(&words, dir.path().join("moved.txt")).unwrap();
    fs::remove_file(dir.path().join("moved.txt")).unwrap();

    let engine = Engine::new(Only::new("zzz"));
    engine.set_database(Some(db.clone()));
    let words = word_list(dir.path(), &["a", "b"]);
    engine.set_candidate_file(Some(words.clone())).unwrap();
    assert_eq!(engine.attack().unwrap().outcome, Outcome::Exhausted);
    fs::remove_file(&words).unwrap();

    let engine = Engine::new(Only::new("zzz"));
    engine.set_database(Some(db));
    let words = word_list(dir.path(), &["a", "b"]);
    engine.set_candidate_file(Some(words.clone())).unwrap();
    engine.abort();
    assert_eq!(engine.attack().unwrap().outcome, Outcome::Aborted);
    fs::remove_file(&words).unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn unreadable_word_list_mid_attack_is_a_read_error() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("x"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    // Opening a directory succeeds on Linux; reading it fails.
    engine
        .set_candidate_file(Some(dir.path().to_path_buf()))
        .unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.attempts, 0);
    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_eq!(rec.errors(), vec![ErrorCode::IoRead]);
    assert_eq!(rec.results(), vec![(None, 0)]);
}

#[test]
fn missing_database_is_reported_to_both_observers() {
    let (dir, _db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let cracking = Arc::new(Recorder::default());
    let form = Arc::new(Recorder::default());
    engine.set_cracking_observer(&cracking);
    engine.set_form_observer(&form);
    engine.set_database(Some(dir.path().join("absent.kdbx")));
    engine.set_candidate_pattern(Some("a")).unwrap();

    let err = engine.attack().unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingContainer);
    assert_eq!(cracking.errors(), vec![ErrorCode::MissingContainer]);
    assert_eq!(form.errors(), vec![ErrorCode::MissingContainer]);
    assert!(cracking.results().is_empty());
}

#[test]
fn missing_candidates_are_reported_to_both_observers() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let cracking = Arc::new(Recorder::default());
    let form = Arc::new(Recorder::default());
    engine.set_cracking_observer(&cracking);
    engine.set_form_observer(&form);
    engine.set_database(Some(db));

    let err = engine.attack().unwrap_err();
    assert_eq!(err.code(), ErrorCode::MissingCandidateSource);
    assert_eq!(cracking.errors(), vec![ErrorCode::MissingCandidateSource]);
    assert_eq!(form.errors(), vec![ErrorCode::MissingCandidateSource]);
}

#[test]
fn word_list_deleted_after_configuration_is_unreadable() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    let words = word_list(dir.path(), &["a"]);
    engine.set_candidate_file(Some(words.clone())).unwrap();
    fs::remove_file(&words).unwrap();

    let err = engine.attack().unwrap_err();
    assert_eq!(err.code(), ErrorCode::SourceUnreadable);
    assert_eq!(rec.errors(), vec![ErrorCode::SourceUnreadable]);
    assert!(!engine.is_running());
}

#[test]
fn form_observer_follows_configuration() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let form = Arc::new(Recorder::default());
    engine.set_form_observer(&form);

    engine.set_database(Some(db));
    engine.set_key_file(Some(dir.path().join("vault.key")));
    engine
        .set_candidate_file(Some(word_list(dir.path(), &["a"])))
        .unwrap();
    engine.set_candidate_pattern(Some("[0-9]{4}")).unwrap();
    assert!(engine.set_candidate_pattern(Some("(")).is_err());

    assert_eq!(
        form.events(),
        vec![
            Event::Database(Some("vault.kdbx".into())),
            Event::KeyFile(Some("vault.key".into())),
            Event::Source(Some("words.txt".into())),
            Event::Source(Some("[0-9]{4}".into())),
            Event::Error(ErrorCode::InvalidPattern),
            Event::Source(None),
        ]
    );
    assert_eq!(engine.candidate_source_name(), None);
}

#[test]
fn dropped_observers_are_skipped() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("b"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    drop(rec);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[ab]")).unwrap();
    let report = engine.attack().unwrap();
    assert_eq!(report.attempts, 2);
}

#[test]
fn key_file_is_snapshotted_per_attack() {
    let (dir, db) = workspace();
    let key = dir.path().join("vault.key");
    fs::write(&key, b"secret").unwrap();
    let empty = dir.path().join("empty.key");
    fs::write(&empty, b"").unwrap();

    let engine = Engine::new(Only::new("a"));
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[ab]")).unwrap();

    engine.set_key_file(Some(key));
    engine.attack().unwrap();
    engine.set_key_file(Some(empty));
    engine.attack().unwrap();
    engine.set_key_file(None);
    engine.attack().unwrap();

    let keys = engine.validator().keys.lock().unwrap().clone();
    assert_eq!(keys, vec![Some(b"secret".to_vec()), None, None]);
}

#[test]
fn missing_key_file_fails_the_attack() {
    let (dir, db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine.set_key_file(Some(dir.path().join("gone.key")));
    engine.set_candidate_pattern(Some("a")).unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.attempts, 0);
    assert_eq!(rec.errors(), vec![ErrorCode::IoRead]);
    assert_eq!(rec.results(), vec![(None, 0)]);
}

/// Fails unexpectedly on every guess except the password.
struct Flaky;

impl ContainerValidator for Flaky {
    fn try_open(&self, _c: &[u8], _k: Option<&[u8]>, candidate: &str) -> Verdict {
        if candidate == "c" {
            Verdict::Accepted
        } else {
            Verdict::UnexpectedFailure("corrupt header".into())
        }
    }
}

#[test]
fn unexpected_validator_failures_count_as_rejections() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Flaky);
    let rec = Arc::new(Recorder::default());
    engine.set_cracking_observer(&rec);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("[a-d]")).unwrap();

    let report = engine.attack().unwrap();
    assert_eq!(report.password.as_deref(), Some("c"));
    assert_eq!(report.attempts, 3);
    assert_eq!(report.unexpected_failures, 2);
    assert_eq!(rec.errors(), vec![ErrorCode::UnexpectedValidatorFailure]);
}

#[test]
fn reset_clears_configuration_and_observers() {
    let (_dir, db) = workspace();
    let engine = Engine::new(Only::new("a"));
    let form = Arc::new(Recorder::default());
    engine.set_form_observer(&form);
    engine.set_database(Some(db));
    engine.set_candidate_pattern(Some("a")).unwrap();

    engine.reset().unwrap();
    assert_eq!(engine.database(), None);
    assert_eq!(engine.key_file(), None);
    assert_eq!(engine.candidate_source_name(), None);
    let before = form.events().len();
    engine.set_database(None);
    assert_eq!(form.events().len(), before);
    assert!(matches!(
        engine.attack(),
        Err(AttackError::MissingContainer)
    ));
}
