//! KeePass fixtures built on the fly, so no binary databases live in the tree.
#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use keepass::config::{DatabaseConfig, KdfConfig};
use keepass::{Database, DatabaseKey};

pub const KEY_MATERIAL: &[u8] = b"keecrack test key material\n";

/// Write an empty KDBX 4 database protected by `password` and, optionally,
/// the key file at `key_file`. A cheap KDF keeps guessing fast.
pub fn write_database(path: &Path, password: &str, key_file: Option<&Path>) {
    let config = DatabaseConfig {
        kdf_config: KdfConfig::Aes { rounds: 10 },
        ..DatabaseConfig::default()
    };
    let db = Database::new(config);
    let mut key = DatabaseKey::new().with_password(password);
    if let Some(key_file) = key_file {
        key = key
            .with_keyfile(&mut File::open(key_file).unwrap())
            .unwrap();
    }
    db.save(&mut File::create(path).unwrap(), key).unwrap();
}

pub fn write_key_file(dir: &Path) -> PathBuf {
    let path = dir.join("vault.key");
    fs::write(&path, KEY_MATERIAL).unwrap();
    path
}
