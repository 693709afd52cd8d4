//! A shard: a bounded pool of records persisted as one file.
//!
//! File name: `data/db/<db>/<table>/<table>_<shardId>`, one record per
//! line. A line is raw JSON, or an envelope when the owning database
//! demands encryption and the key is available.
//!
//! Lifecycle codes: `-2` insufficient memory, `-1` general error, `0`
//! unloaded, `1` unloading, `2` loading, `3` loaded. All transitions
//! happen under the shard's write lock; readers observing anything below
//! loaded either promote to a load attempt or abort.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::crypt::{looks_enveloped, Crypt};

use super::error::Error;
use super::record::Record;
use super::settings::{settings, LOADED_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    InsufficientMemory,
    GeneralError,
    Unloaded,
    Unloading,
    Loading,
    Loaded,
}

impl State {
    pub fn code(&self) -> i8 {
        match self {
            State::InsufficientMemory => -2,
            State::GeneralError => -1,
            State::Unloaded => 0,
            State::Unloading => 1,
            State::Loading => 2,
            State::Loaded => 3,
        }
    }
}

struct Inner {
    state: State,
    records: HashMap<String, Arc<Record>>,
    loaded_bytes: u64,
}

pub struct Shard {
    id: i64,
    database: String,
    table: String,
    path: PathBuf,
    encrypted: Arc<AtomicBool>,
    crypt: Arc<Crypt>,
    inner: RwLock<Inner>,
    /// Epoch ms of the last operation, read by the idle sweeper.
    last_access: AtomicU64,
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Shard {
    /// Brand-new empty shard, immediately usable.
    pub fn create(
        id: i64,
        database: &str,
        table: &str,
        dir: &Path,
        encrypted: Arc<AtomicBool>,
        crypt: Arc<Crypt>,
    ) -> Self {
        Self::with_state(id, database, table, dir, encrypted, crypt, State::Loaded)
    }

    /// Shard recovered from a file discovered on disk; hydrates on first
    /// access.
    pub fn recover(
        id: i64,
        database: &str,
        table: &str,
        dir: &Path,
        encrypted: Arc<AtomicBool>,
        crypt: Arc<Crypt>,
    ) -> Self {
        Self::with_state(id, database, table, dir, encrypted, crypt, State::Unloaded)
    }

    fn with_state(
        id: i64,
        database: &str,
        table: &str,
        dir: &Path,
        encrypted: Arc<AtomicBool>,
        crypt: Arc<Crypt>,
        state: State,
    ) -> Self {
        Self {
            id,
            database: database.to_lowercase(),
            table: table.to_lowercase(),
            path: dir.join(format!("{}_{}", table.to_lowercase(), id)),
            encrypted,
            crypt,
            inner: RwLock::new(Inner {
                state,
                records: HashMap::new(),
                loaded_bytes: 0,
            }),
            last_access: AtomicU64::new(epoch_ms()),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> State {
        self.inner.read().state
    }

    /// Loaded records. Zero while unloaded.
    pub fn size(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Epoch ms of the last access.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_access.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Fetch a record, loading the shard first if needed.
    pub fn get(&self, identifier: &str) -> Result<Arc<Record>, Error> {
        self.touch();
        let identifier = identifier.to_lowercase();

        // Fast path: already loaded.
        {
            let inner = self.inner.read();
            if inner.state == State::Loaded {
                return inner
                    .records
                    .get(&identifier)
                    .cloned()
                    .ok_or(Error::NotFound("record"));
            }
        }

        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)?;
        inner
            .records
            .get(&identifier)
            .cloned()
            .ok_or(Error::NotFound("record"))
    }

    pub fn contains_record(&self, identifier: &str) -> bool {
        self.touch();
        self.inner
            .read()
            .records
            .contains_key(&identifier.to_lowercase())
    }

    /// Insert a record. The record's coordinates must match the shard's
    /// owners; the shard must have capacity and no duplicate.
    pub fn insert(&self, record: Arc<Record>) -> Result<(), Error> {
        self.touch();

        if record.database() != self.database || record.table() != self.table {
            return Err(Error::validation(
                "record does not belong to this shard's table",
            ));
        }

        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)?;

        let max_records = settings().max_records_per_shard();
        if max_records >= 0 && inner.records.len() as i64 >= max_records {
            return Err(Error::validation("shard is full"));
        }

        if inner.records.contains_key(record.identifier()) {
            return Err(Error::AlreadyExists(record.identifier().to_owned()));
        }

        inner.records.insert(record.identifier().to_owned(), record);
        Ok(())
    }

    /// Remove a record, running its unload side-effect.
    pub fn delete(&self, identifier: &str) -> Result<(), Error> {
        self.touch();
        let identifier = identifier.to_lowercase();

        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)?;

        match inner.records.remove(&identifier) {
            Some(record) => {
                record.retire();
                Ok(())
            }
            None => Err(Error::NotFound("record")),
        }
    }

    /// Identifiers of all records, loading first if needed.
    pub fn record_ids(&self) -> Result<Vec<String>, Error> {
        self.touch();
        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)?;
        Ok(inner.records.keys().cloned().collect())
    }

    /// All records, loading first if needed.
    pub fn records(&self) -> Result<Vec<Arc<Record>>, Error> {
        self.touch();
        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)?;
        Ok(inner.records.values().cloned().collect())
    }

    /// Take a record out without retiring it, for reparenting during an
    /// optimize move.
    pub fn take(&self, identifier: &str) -> Option<Arc<Record>> {
        self.inner.write().records.remove(identifier)
    }

    /// Explicitly hydrate.
    pub fn load(&self) -> Result<(), Error> {
        self.touch();
        let mut inner = self.inner.write();
        self.ensure_loaded(&mut inner)
    }

    fn ensure_loaded(&self, inner: &mut RwLockWriteGuard<'_, Inner>) -> Result<(), Error> {
        match inner.state {
            State::Loaded => Ok(()),
            State::Unloaded | State::GeneralError | State::InsufficientMemory => {
                self.load_locked(inner)
            }
            // Shouldn't be observable under correct locking.
            State::Loading | State::Unloading => Err(Error::StillLoading),
        }
    }

    fn load_locked(&self, inner: &mut RwLockWriteGuard<'_, Inner>) -> Result<(), Error> {
        // Drop any stale pool from a previous incarnation.
        release_records(inner);

        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                inner.state = State::GeneralError;
                return Err(Error::LoadFailure(err.to_string()));
            }
        }

        let file_size = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let Err(err) = fs::File::create(&self.path) {
                    inner.state = State::GeneralError;
                    return Err(Error::LoadFailure(err.to_string()));
                }
                inner.state = State::Loaded;
                return Ok(());
            }
            Err(err) => {
                inner.state = State::GeneralError;
                return Err(Error::LoadFailure(err.to_string()));
            }
        };

        if !settings().can_load(file_size) {
            inner.state = State::InsufficientMemory;
            return Err(Error::InsufficientMemory);
        }

        inner.state = State::Loading;

        match self.read_file(inner) {
            Ok(()) => {
                inner.loaded_bytes = file_size;
                LOADED_BYTES.fetch_add(file_size, Ordering::Relaxed);
                inner.state = State::Loaded;
                debug!(
                    shard = self.id,
                    records = inner.records.len(),
                    "shard loaded"
                );
                Ok(())
            }
            Err(err) => {
                release_records(inner);
                inner.state = State::GeneralError;
                Err(Error::LoadFailure(err.to_string()))
            }
        }
    }

    fn read_file(&self, inner: &mut RwLockWriteGuard<'_, Inner>) -> Result<(), Error> {
        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let raw = if looks_enveloped(&line) {
                if !self.crypt.ready() {
                    // Data inconsistency: the record stays on disk but is
                    // invisible until the key is unlocked.
                    warn!(
                        shard = self.id,
                        "enveloped line skipped, encryption key not ready"
                    );
                    continue;
                }
                match self.crypt.decrypt(&line) {
                    Ok(plaintext) => match String::from_utf8(plaintext) {
                        Ok(raw) => raw,
                        Err(_) => {
                            warn!(shard = self.id, "envelope decoded to non-UTF-8, skipped");
                            continue;
                        }
                    },
                    Err(err) => {
                        warn!(shard = self.id, "envelope decrypt failed, skipped: {}", err);
                        continue;
                    }
                }
            } else {
                line
            };

            // One corrupt record must not keep the shard down.
            let value: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(err) => {
                    warn!(shard = self.id, "undecodable line skipped: {}", err);
                    continue;
                }
            };

            match Record::from_value(&self.database, &self.table, &value) {
                Ok(record) => {
                    inner.records.insert(record.identifier().to_owned(), record);
                }
                Err(err) => {
                    warn!(shard = self.id, "line discarded: {}", err);
                }
            }
        }

        Ok(())
    }

    /// Unload with any combination of flags: `persist` rewrites the file,
    /// `clear` releases the record objects, `drop_files` deletes the file
    /// instead. Terminal state is unloaded unless no flag is set.
    pub fn unload(&self, clear: bool, persist: bool, drop_files: bool) -> Result<(), Error> {
        let mut inner = self.inner.write();

        match inner.state {
            State::Loaded => {
                inner.state = State::Unloading;

                if drop_files {
                    remove_file_if_exists(&self.path)?;
                    release_records(&mut inner);
                    inner.state = State::Unloaded;
                    return Ok(());
                }

                if persist {
                    if let Err(err) = self.write_file(&inner) {
                        inner.state = State::GeneralError;
                        return Err(err);
                    }
                }

                if clear {
                    release_records(&mut inner);
                }

                if clear || persist {
                    inner.state = State::Unloaded;
                } else {
                    inner.state = State::Loaded;
                }
                Ok(())
            }
            State::Unloaded | State::GeneralError | State::InsufficientMemory => {
                // Never decoded; drop the file as-is when asked.
                if drop_files {
                    remove_file_if_exists(&self.path)?;
                }
                Ok(())
            }
            State::Loading | State::Unloading => Err(Error::StillLoading),
        }
    }

    fn write_file(&self, inner: &Inner) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(&self.path)?;
        let mut writer = BufWriter::new(file);

        let envelope = self.encrypted.load(Ordering::Relaxed) && self.crypt.ready();

        for record in inner.records.values() {
            let line = record.to_line()?;
            if envelope {
                writeln!(writer, "{}", self.crypt.encrypt(line.as_bytes())?)?;
            } else {
                writeln!(writer, "{}", line)?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

fn release_records(inner: &mut Inner) {
    for record in inner.records.values() {
        record.retire();
    }
    inner.records.clear();
    LOADED_BYTES.fetch_sub(inner.loaded_bytes, Ordering::Relaxed);
    inner.loaded_bytes = 0;
}

fn remove_file_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::shard_id;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    fn crypt(dir: &Path) -> Arc<Crypt> {
        Arc::new(Crypt::load(dir).unwrap())
    }

    fn shard(dir: &Path) -> Shard {
        Shard::create(
            shard_id::next(),
            "lib",
            "books",
            dir,
            Arc::new(AtomicBool::new(false)),
            crypt(dir),
        )
    }

    fn record(id: &str) -> Arc<Record> {
        Record::from_value(
            "lib",
            "books",
            &json!({"identifier": id, "meta": {"t": "x"}}),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());

        shard.insert(record("b1")).unwrap();
        assert_eq!(shard.size(), 1);
        assert!(shard.contains_record("b1"));
        assert!(shard.contains_record("B1"));

        let fetched = shard.get("b1").unwrap();
        assert_eq!(fetched.identifier(), "b1");

        assert!(matches!(
            shard.insert(record("b1")),
            Err(Error::AlreadyExists(_))
        ));

        shard.delete("b1").unwrap();
        assert!(matches!(shard.get("b1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_foreign_record_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());

        let foreign = Record::new("other", "books", "b1");
        assert!(matches!(shard.insert(foreign), Err(Error::Validation(_))));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());

        for i in 0..10 {
            shard.insert(record(&format!("b{}", i))).unwrap();
        }

        shard.unload(true, true, false).unwrap();
        assert_eq!(shard.state(), State::Unloaded);
        assert_eq!(shard.size(), 0);

        // Identifier round-trip: everything comes back on access.
        let mut ids = shard.record_ids().unwrap();
        ids.sort();
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0], "b0");
        assert_eq!(shard.state(), State::Loaded);

        let fetched = shard.get("b3").unwrap();
        assert_eq!(fetched.full_data()["meta"]["t"], "x");
    }

    #[test]
    fn test_recover_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let id = shard_id::next();

        {
            let shard = Shard::create(
                id,
                "lib",
                "books",
                dir.path(),
                Arc::new(AtomicBool::new(false)),
                crypt(dir.path()),
            );
            shard.insert(record("b1")).unwrap();
            shard.unload(true, true, false).unwrap();
        }

        let recovered = Shard::recover(
            id,
            "lib",
            "books",
            dir.path(),
            Arc::new(AtomicBool::new(false)),
            crypt(dir.path()),
        );
        assert_eq!(recovered.state(), State::Unloaded);
        assert!(recovered.get("b1").is_ok());
    }

    #[test]
    fn test_corrupt_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());

        shard.insert(record("b1")).unwrap();
        shard.unload(true, true, false).unwrap();

        // Append garbage and a record from a foreign table.
        let mut contents = fs::read_to_string(shard.path()).unwrap();
        contents.push_str("not json at all\n");
        contents.push_str(&json!({"identifier": "x", "table": "other"}).to_string());
        contents.push('\n');
        fs::write(shard.path(), contents).unwrap();

        let ids = shard.record_ids().unwrap();
        assert_eq!(ids, vec!["b1".to_string()]);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());

        shard.insert(record("b1")).unwrap();
        shard.unload(false, true, false).unwrap();
        assert!(shard.path().exists());

        shard.load().unwrap();
        shard.unload(false, false, true).unwrap();
        assert!(!shard.path().exists());
        assert_eq!(shard.state(), State::Unloaded);
    }

    #[test]
    fn test_unload_without_flags_stays_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let shard = shard(dir.path());
        shard.insert(record("b1")).unwrap();

        shard.unload(false, false, false).unwrap();
        assert_eq!(shard.state(), State::Loaded);
        assert_eq!(shard.size(), 1);
    }

    #[test]
    fn test_encrypted_lines_are_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let crypt = crypt(dir.path());
        crypt.initialize("hunter2").unwrap();

        let shard = Shard::create(
            shard_id::next(),
            "lib",
            "books",
            dir.path(),
            Arc::new(AtomicBool::new(true)),
            crypt.clone(),
        );

        shard.insert(record("b1")).unwrap();
        shard.insert(record("b2")).unwrap();
        shard.unload(true, true, false).unwrap();

        let contents = fs::read_to_string(shard.path()).unwrap();
        for line in contents.lines() {
            assert!(looks_enveloped(line), "not an envelope: {}", line);
        }

        // And they come back.
        let mut ids = shard.record_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(State::InsufficientMemory.code(), -2);
        assert_eq!(State::GeneralError.code(), -1);
        assert_eq!(State::Unloaded.code(), 0);
        assert_eq!(State::Unloading.code(), 1);
        assert_eq!(State::Loading.code(), 2);
        assert_eq!(State::Loaded.code(), 3);
    }
}
