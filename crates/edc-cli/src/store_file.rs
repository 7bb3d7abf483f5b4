//! JSON file holding every response, audit entry, and signature record.
//!
//! Opening the store takes an exclusive lock on a sibling `.lock` file and
//! keeps it until the [`StoreFile`] is dropped, so concurrent commands run
//! their load, commit, and save one after another against the latest record.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use edc_lifecycle::{InMemoryResponseStore, StoreSnapshot};
use tracing::debug;

use crate::CliResult;

pub struct StoreFile {
    path: PathBuf,
    lock: Option<File>,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire(&mut self) -> CliResult<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|err| format!("failed to open {}: {err}", lock_path.display()))?;
        file.lock()
            .map_err(|err| format!("failed to lock {}: {err}", lock_path.display()))?;
        debug!(path = %lock_path.display(), "store locked");
        self.lock = Some(file);
        Ok(())
    }

    /// Locks the store and reads it. A missing file is an empty store.
    pub fn open(&mut self) -> CliResult<InMemoryResponseStore> {
        self.acquire()?;
        let snapshot = match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(err) => return Err(format!("failed to read {}: {err}", self.path.display()).into()),
        };
        debug!(path = %self.path.display(), responses = snapshot.responses.len(), "store loaded");
        Ok(InMemoryResponseStore::from_snapshot(snapshot))
    }

    /// Replaces the file through a sibling temp file. Only valid after [`StoreFile::open`].
    pub fn save(&self, store: &InMemoryResponseStore) -> CliResult<()> {
        if self.lock.is_none() {
            return Err(format!("{} must be opened before saving", self.path.display()).into());
        }
        let snapshot = store.snapshot()?;
        let encoded = serde_json::to_string_pretty(&snapshot)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}
