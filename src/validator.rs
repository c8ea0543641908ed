//! The container check the engine delegates every guess to.
//!
//! The engine only needs to know whether a candidate opens the container.
//! With the `kdbx` feature, [`KdbxValidator`] answers that for KeePass
//! databases through the `keepass` crate.

/// Outcome of one attempt to open a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// The well-defined "wrong credentials" answer.
    Rejected,
    /// Anything else that went wrong; the engine treats it as a rejection but
    /// counts and logs it.
    UnexpectedFailure(String),
}

pub trait ContainerValidator: Send + Sync {
    /// Try to open `container` with `candidate` plus optional key material.
    /// Called once per guess, always from the attacking thread.
    fn try_open(&self, container: &[u8], key_material: Option<&[u8]>, candidate: &str) -> Verdict;
}

impl<V: ContainerValidator + ?Sized> ContainerValidator for Box<V> {
    fn try_open(&self, container: &[u8], key_material: Option<&[u8]>, candidate: &str) -> Verdict {
        (**self).try_open(container, key_material, candidate)
    }
}

#[cfg(feature = "kdbx")]
pub use kdbx::KdbxValidator;

#[cfg(feature = "kdbx")]
mod kdbx {
    use keepass::error::{DatabaseKeyError, DatabaseOpenError};
    use keepass::{Database, DatabaseKey};

    use super::{ContainerValidator, Verdict};

    /// Opens KeePass (KDBX 3.1 / 4) databases held in memory.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct KdbxValidator;

    impl ContainerValidator for KdbxValidator {
        fn try_open(
            &self,
            container: &[u8],
            key_material: Option<&[u8]>,
            candidate: &str,
        ) -> Verdict {
            let mut key = DatabaseKey::new().with_password(candidate);
            if let Some(mut keyfile) = key_material {
                key = match key.with_keyfile(&mut keyfile) {
                    Ok(key) => key,
                    Err(e) => return Verdict::UnexpectedFailure(format!("key file: {e}")),
                };
            }
            let mut source = container;
            match Database::open(&mut source, key) {
                Ok(_) => Verdict::Accepted,
                Err(DatabaseOpenError::Key(DatabaseKeyError::IncorrectKey)) => Verdict::Rejected,
                Err(e) => Verdict::UnexpectedFailure(e.to_string()),
            }
        }
    }
}
