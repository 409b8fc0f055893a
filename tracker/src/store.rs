//! Local persistent key-value store.
//!
//! Each key is stored as one JSON file under the data directory. Keys are
//! arbitrary strings (snapshot keys embed absolute file paths), so they are
//! escaped into safe file names. A key whose escaped name would exceed
//! [`MAX_FILE_STEM`] bytes is stored as `~<sha256 of key>.json` instead, with
//! the key kept next to the value inside the file.
//!
//! Reads never fail: a missing or unparsable entry is "no data". Writes
//! report I/O errors to the caller, which usually logs and carries on.
//!
//! # Key Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `TEMP_DATA_UNCOMMIT_CHANGE_<YY_MM_DD>` | [`CodeChangesData`] for that day |
//! | `TEMP_DATA_TIME_TRACKING_<YY_MM_DD>` | cached [`TimeTracking`] totals |
//! | `TEMP_DATA_<path>` | snapshot text of a file |
//! | `authToken` | [`AuthToken`] |
//! | `user-info` | [`User`] |

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{AuthToken, CodeChangesData, TimeTracking, User};

/// Prefix shared by every day-scoped or per-file temporary key.
pub const TEMP_DATA_KEY: &str = "TEMP_DATA_";

const UNCOMMITTED_CHANGES_KEY: &str = "TEMP_DATA_UNCOMMIT_CHANGE_";
const TIME_TRACKING_KEY: &str = "TEMP_DATA_TIME_TRACKING_";
const AUTH_TOKEN_KEY: &str = "authToken";
const USER_INFO_KEY: &str = "user-info";

const FILE_EXTENSION: &str = ".json";

/// Longest escaped key used verbatim as a file stem. Leaves room for the
/// extension and the temporary write suffix under the usual 255-byte limit.
pub const MAX_FILE_STEM: usize = 200;

/// Marks digest-named files. `~` never survives key escaping.
const DIGEST_PREFIX: char = '~';

/// On-disk form of a digest-named entry.
#[derive(Serialize)]
struct KeyedEntryRef<'a, T: ?Sized> {
    key: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct KeyedEntry<T> {
    key: String,
    value: T,
}

#[derive(Deserialize)]
struct EntryKey {
    key: String,
}

/// File stem for `key`, and whether it is a digest.
fn file_stem(key: &str) -> (String, bool) {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_FILE_STEM {
        return (encoded, false);
    }
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    (format!("{DIGEST_PREFIX}{:x}", hasher.finalize()), true)
}

/// Errors that can occur when writing to the store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// File system I/O error.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be serialized.
    #[error("store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Formats the epoch suffix used by day-scoped keys (`YY_MM_DD`).
#[must_use]
pub fn day_key(date: NaiveDate) -> String {
    date.format("%y_%m_%d").to_string()
}

/// Today's date in the local time zone.
#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// File-backed key-value store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened local store");
        Ok(Self { dir })
    }

    /// Returns the directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let (stem, _) = file_stem(key);
        self.dir.join(format!("{stem}{FILE_EXTENSION}"))
    }

    /// Reads and deserializes `key`. Absent or corrupt entries yield `None`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (stem, digest) = file_stem(key);
        let path = self.dir.join(format!("{stem}{FILE_EXTENSION}"));
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read store entry");
                return None;
            }
        };
        if !digest {
            return match serde_json::from_str(&contents) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Ignoring unparsable store entry");
                    None
                }
            };
        }
        match serde_json::from_str::<KeyedEntry<T>>(&contents) {
            Ok(entry) if entry.key == key => Some(entry.value),
            Ok(entry) => {
                warn!(key, stored = %entry.key, "Store entry digest collision");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Ignoring unparsable store entry");
                None
            }
        }
    }

    /// Serializes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let (stem, digest) = file_stem(key);
        let json = if digest {
            serde_json::to_string(&KeyedEntryRef { key, value })?
        } else {
            serde_json::to_string(value)?
        };
        let path = self.dir.join(format!("{stem}{FILE_EXTENSION}"));
        // Write then rename so readers never observe a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every stored key.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list store");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_suffix(FILE_EXTENSION)?;
                if stem.starts_with(DIGEST_PREFIX) {
                    read_entry_key(&entry.path())
                } else {
                    decode_key(stem)
                }
            })
            .collect()
    }

    /// Deletes every temporary key (snapshots and day-scoped aggregates).
    ///
    /// Returns the number of keys removed.
    pub fn delete_temp_keys(&self) -> usize {
        let mut removed = 0;
        for key in self.keys().into_iter().filter(|k| k.starts_with(TEMP_DATA_KEY)) {
            match self.delete(&key) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to delete temp key"),
            }
        }
        removed
    }

    /// Reads the uncommitted change aggregate for `date`.
    #[must_use]
    pub fn code_changes(&self, date: NaiveDate) -> Option<CodeChangesData> {
        self.get(&format!("{UNCOMMITTED_CHANGES_KEY}{}", day_key(date)))
    }

    /// Persists the uncommitted change aggregate for `date`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_code_changes(&self, date: NaiveDate, data: &CodeChangesData) -> Result<()> {
        self.set(&format!("{UNCOMMITTED_CHANGES_KEY}{}", day_key(date)), data)
    }

    /// Reads the cached time tracking totals for `date`.
    #[must_use]
    pub fn time_tracking(&self, date: NaiveDate) -> Option<TimeTracking> {
        self.get(&format!("{TIME_TRACKING_KEY}{}", day_key(date)))
    }

    /// Caches the time tracking totals for `date`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_time_tracking(&self, date: NaiveDate, data: &TimeTracking) -> Result<()> {
        self.set(&format!("{TIME_TRACKING_KEY}{}", day_key(date)), data)
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<AuthToken> {
        self.get(AUTH_TOKEN_KEY)
    }

    /// Stores or clears the auth token.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_auth_token(&self, token: Option<&AuthToken>) -> Result<()> {
        match token {
            Some(token) => self.set(AUTH_TOKEN_KEY, token),
            None => self.delete(AUTH_TOKEN_KEY),
        }
    }

    #[must_use]
    pub fn user_info(&self) -> Option<User> {
        self.get(USER_INFO_KEY)
    }

    /// Stores or clears the cached user profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_user_info(&self, user: Option<&User>) -> Result<()> {
        match user {
            Some(user) => self.set(USER_INFO_KEY, user),
            None => self.delete(USER_INFO_KEY),
        }
    }
}

/// Reads the key stored inside a digest-named entry.
fn read_entry_key(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<EntryKey>(&contents) {
        Ok(entry) => Some(entry.key),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unparsable store entry");
            None
        }
    }
}

/// Escapes a key into a file name: `[A-Za-z0-9_.-]` pass through, every
/// other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
