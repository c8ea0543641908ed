//! Attack results and the human-readable texts the command line prints for
//! them. Rendering is plain text; colouring is left to the caller.
use std::time::Duration;

use crate::observer::ErrorCode;

/// Terminal state of one attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Exhausted,
    Aborted,
    /// The container or key material could not be read once the attack
    /// started.
    Failed,
}

/// What an attack found, as returned by [`crate::engine::Engine::attack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackReport {
    pub password: Option<String>,
    pub attempts: u64,
    pub elapsed: Duration,
    pub outcome: Outcome,
    /// Validator calls that failed outside the accept/reject contract and
    /// were counted as rejections.
    pub unexpected_failures: u64,
}

impl AttackReport {
    pub fn guesses_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.attempts as f64 / secs
    }
}

/// Render a duration as `1h2m3.5s`, dropping zero leading units and
/// trailing zero decimals.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, secs) = (total / 3600, (total / 60) % 60, total % 60);
    let millis = elapsed.subsec_millis();
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if millis == 0 {
        out.push_str(&format!("{secs}s"));
    } else {
        let frac = format!("{millis:03}");
        out.push_str(&format!("{secs}.{}s", frac.trim_end_matches('0')));
    }
    out
}

pub fn result_message(password: Option<&str>, attempts: u64, elapsed: Duration) -> String {
    match password {
        Some(pw) => format!(
            "Successfully guessed password after {} attempts in {}: {}",
            attempts,
            format_elapsed(elapsed),
            pw
        ),
        None => format!(
            "Unable to guess password after {} attempts in {}",
            attempts,
            format_elapsed(elapsed)
        ),
    }
}

pub fn error_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::MissingContainer => "Please specify a database file that you have read access to",
        ErrorCode::MissingCandidateSource => {
            "Please specify a word list file that you have read access to, or a pattern"
        }
        ErrorCode::AttackAlreadyInProgress => "An attack is already in progress",
        ErrorCode::Aborted => "Aborted.",
        ErrorCode::InvalidPattern => "The pattern is not a valid regular expression",
        ErrorCode::SourceUnreadable => "The word list file could not be opened",
        ErrorCode::IoRead => "An error occurred while trying to read one of the files",
        ErrorCode::UnexpectedValidatorFailure => {
            "The database reported an unexpected error; see the log for details"
        }
    }
}
