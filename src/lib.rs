pub mod engine;
pub mod io;
pub mod observer;
pub mod pattern;
pub mod report;
pub mod source;
pub mod validator;

pub mod prelude {
    pub use crate::engine::{AttackError, Engine};
    pub use crate::observer::{CrackingObserver, ErrorCode, FormObserver};
    pub use crate::pattern::{Pattern, PatternEnumerator, PatternError};
    pub use crate::report::{AttackReport, Outcome};
    pub use crate::source::{CandidateSource, CandidateStrategy, FileSource, SourceError};
    pub use crate::validator::{ContainerValidator, Verdict};
    #[cfg(feature = "kdbx")]
    pub use crate::validator::KdbxValidator;
}
