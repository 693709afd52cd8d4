//! A table: an ordered set of shards and the primary index mapping record
//! identifiers to the shard that holds them.
//!
//! Lock order is table → shard → record, outermost first. Field-level
//! operations go through [`Table`] so the index, the shard lifecycle and
//! the table-scope counters stay consistent.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::crypt::Crypt;

use super::error::Error;
use super::record::Record;
use super::settings::settings;
use super::shard::{Shard, State};
use super::shard_id;
use super::stats::{Op, OpStats};

struct TableInner {
    shards: Vec<Arc<Shard>>,
    /// Record identifier -> shard identifier.
    index: HashMap<String, i64>,
}

pub struct Table {
    name: String,
    database: String,
    dir: PathBuf,
    encrypted: Arc<AtomicBool>,
    crypt: Arc<Crypt>,
    inner: RwLock<TableInner>,
    template: RwLock<Option<Value>>,
    adaptive: AtomicBool,
    auto_optimize: AtomicBool,
    secure_update: AtomicBool,
    resolve_mode: AtomicI8,
    /// Set while the inconsistency resolver holds the table; everything
    /// else backs off with a lock error.
    resolving: AtomicBool,
    stats: OpStats,
}

/// Clears the resolving flag on every exit path.
struct ResolveGuard<'a>(&'a AtomicBool);

impl Drop for ResolveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Table {
    pub fn new(
        name: &str,
        database: &str,
        database_dir: &Path,
        encrypted: Arc<AtomicBool>,
        crypt: Arc<Crypt>,
    ) -> Self {
        let name = name.to_lowercase();
        Self {
            dir: database_dir.join(&name),
            name,
            database: database.to_lowercase(),
            encrypted,
            crypt,
            inner: RwLock::new(TableInner {
                shards: Vec::new(),
                index: HashMap::new(),
            }),
            template: RwLock::new(None),
            adaptive: AtomicBool::new(true),
            auto_optimize: AtomicBool::new(false),
            secure_update: AtomicBool::new(false),
            resolve_mode: AtomicI8::new(-1),
            resolving: AtomicBool::new(false),
            stats: OpStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stats(&self) -> &OpStats {
        &self.stats
    }

    pub fn adaptive(&self) -> bool {
        self.adaptive.load(Ordering::Relaxed)
    }

    pub fn set_adaptive(&self, value: bool) {
        self.adaptive.store(value, Ordering::Relaxed);
    }

    pub fn auto_optimize(&self) -> bool {
        self.auto_optimize.load(Ordering::Relaxed)
    }

    pub fn set_auto_optimize(&self, value: bool) {
        self.auto_optimize.store(value, Ordering::Relaxed);
    }

    pub fn secure_update(&self) -> bool {
        self.secure_update.load(Ordering::Relaxed)
    }

    pub fn set_secure_update(&self, value: bool) {
        self.secure_update.store(value, Ordering::Relaxed);
    }

    pub fn resolve_mode(&self) -> i8 {
        self.resolve_mode.load(Ordering::Relaxed)
    }

    pub fn set_resolve_mode(&self, mode: i8) {
        self.resolve_mode.store(mode.clamp(-1, 3), Ordering::Relaxed);
    }

    pub fn template(&self) -> Option<Value> {
        self.template.read().clone()
    }

    pub fn set_template(&self, template: Option<Value>) {
        *self.template.write() = template;
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.resolving.load(Ordering::Acquire) {
            Err(Error::InconsistencyLock)
        } else {
            Ok(())
        }
    }

    /// Records currently known to the index.
    pub fn record_count(&self) -> usize {
        self.inner.read().index.len()
    }

    pub fn record_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().index.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn shard_count(&self) -> usize {
        self.inner.read().shards.len()
    }

    /// Discover shard files on disk and rebuild the primary index. Called
    /// once when the table comes up.
    pub fn open(&self) -> Result<(), Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let prefix = format!("{}_", self.name);
        let mut recovered = Vec::new();

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            let Some(id) = file_name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(id) = id.parse::<i64>() else {
                warn!(table = %self.name, "unrecognized shard file \"{}\"", file_name);
                continue;
            };

            recovered.push(Arc::new(Shard::recover(
                id,
                &self.database,
                &self.name,
                &self.dir,
                self.encrypted.clone(),
                self.crypt.clone(),
            )));
        }

        let mut index = HashMap::new();
        for shard in &recovered {
            for identifier in shard.record_ids()? {
                index.insert(identifier, shard.id());
            }
            if self.adaptive() {
                shard.unload(true, false, false)?;
            }
        }

        if !recovered.is_empty() {
            info!(
                table = %self.name,
                shards = recovered.len(),
                records = index.len(),
                "table recovered"
            );
        }

        let mut inner = self.inner.write();
        inner.shards = recovered;
        inner.index = index;
        Ok(())
    }

    /// Insert a full record document. The identifier must be new; the
    /// record lands in the first shard with capacity, or a new one.
    pub fn insert_record(&self, value: &Value) -> Result<Arc<Record>, Error> {
        self.check_open()?;

        let result = self.insert_record_inner(value);
        self.stats.record(Op::Insert, result.is_ok());
        result
    }

    fn insert_record_inner(&self, value: &Value) -> Result<Arc<Record>, Error> {
        if let Some(template) = self.template().as_ref() {
            check_against_template(value, template)?;
        }

        let record = Record::from_value(&self.database, &self.name, value)?;

        let mut inner = self.inner.write();

        if inner.index.contains_key(record.identifier()) {
            return Err(Error::AlreadyExists(record.identifier().to_owned()));
        }

        let shard = self.shard_with_capacity(&mut inner)?;
        shard.insert(record.clone())?;
        inner
            .index
            .insert(record.identifier().to_owned(), shard.id());

        Ok(record)
    }

    /// Find a shard with room according to the index, or create one.
    /// Index counts are authoritative even for unloaded shards.
    fn shard_with_capacity(&self, inner: &mut TableInner) -> Result<Arc<Shard>, Error> {
        let max_records = settings().max_records_per_shard();

        if max_records >= 0 {
            let mut counts: HashMap<i64, i64> = HashMap::new();
            for shard_id in inner.index.values() {
                *counts.entry(*shard_id).or_insert(0) += 1;
            }

            for shard in &inner.shards {
                if counts.get(&shard.id()).copied().unwrap_or(0) < max_records {
                    return Ok(shard.clone());
                }
            }
        } else if let Some(shard) = inner.shards.first() {
            return Ok(shard.clone());
        }

        let shard = Arc::new(Shard::create(
            shard_id::next(),
            &self.database,
            &self.name,
            &self.dir,
            self.encrypted.clone(),
            self.crypt.clone(),
        ));
        debug!(table = %self.name, shard = shard.id(), "new shard");
        inner.shards.push(shard.clone());
        Ok(shard)
    }

    fn shard_for(&self, identifier: &str) -> Result<Arc<Shard>, Error> {
        let identifier = identifier.to_lowercase();
        let inner = self.inner.read();

        let shard_id = inner.index.get(&identifier).ok_or(Error::NotFound("record"))?;
        inner
            .shards
            .iter()
            .find(|s| s.id() == *shard_id)
            .cloned()
            .ok_or(Error::NotFound("shard"))
    }

    /// Fetch a record through the index.
    pub fn record(&self, identifier: &str) -> Result<Arc<Record>, Error> {
        self.check_open()?;
        self.shard_for(identifier)?.get(identifier)
    }

    pub fn contains_record(&self, identifier: &str) -> bool {
        self.inner
            .read()
            .index
            .contains_key(&identifier.to_lowercase())
    }

    /// Remove a record and its index entry.
    pub fn delete_record(&self, identifier: &str) -> Result<(), Error> {
        self.check_open()?;

        let result = self.delete_record_inner(identifier);
        self.stats.record(Op::Delete, result.is_ok());
        result
    }

    fn delete_record_inner(&self, identifier: &str) -> Result<(), Error> {
        let identifier = identifier.to_lowercase();

        let mut inner = self.inner.write();
        let shard_id = inner.index.get(&identifier).copied().ok_or(Error::NotFound("record"))?;
        let shard = inner
            .shards
            .iter()
            .find(|s| s.id() == shard_id)
            .cloned()
            .ok_or(Error::NotFound("shard"))?;

        shard.delete(&identifier)?;
        inner.index.remove(&identifier);
        Ok(())
    }

    /// Full record document, or one field (optionally acquiring an update
    /// token when the table enforces secure updates).
    pub fn get_field(
        &self,
        identifier: &str,
        field: Option<&str>,
        acquire: bool,
    ) -> Result<(Value, Option<String>), Error> {
        self.check_open()?;

        let result = self.get_field_inner(identifier, field, acquire);
        self.stats.record(Op::Get, result.is_ok());
        if result.as_ref().map(|(_, t)| t.is_some()).unwrap_or(false) {
            self.stats.record(Op::Acquire, true);
        }
        result
    }

    fn get_field_inner(
        &self,
        identifier: &str,
        field: Option<&str>,
        acquire: bool,
    ) -> Result<(Value, Option<String>), Error> {
        let record = self.record(identifier)?;

        match field {
            None => Ok((record.full_data(), None)),
            Some(field) => record
                .get(field, acquire, self.secure_update())
                .ok_or(Error::NotFound("field")),
        }
    }

    pub fn update_field(
        &self,
        identifier: &str,
        field: &str,
        payload: &Value,
        token: Option<&str>,
    ) -> Result<(), Error> {
        self.check_open()?;

        let record = self.record(identifier)?;
        let result = record.update(
            field,
            payload,
            token,
            self.secure_update(),
            self.template().as_ref(),
        );
        self.stats.record(Op::Update, result.is_ok());
        result
    }

    pub fn insert_field(
        &self,
        identifier: &str,
        field: &str,
        payload: Option<&Value>,
    ) -> Result<(), Error> {
        self.check_open()?;

        let record = self.record(identifier)?;
        let result = record.insert_field(field, payload, self.template().as_ref());
        self.stats.record(Op::Insert, result.is_ok());
        result
    }

    pub fn delete_field(&self, identifier: &str, field: &str) -> Result<(), Error> {
        self.check_open()?;

        let record = self.record(identifier)?;
        let result = record.delete_field(field, self.template().as_ref());
        self.stats.record(Op::Delete, result.is_ok());
        result
    }

    /// Unload loaded shards idle past the threshold. Called by the
    /// background sweeper when adaptive loading is on.
    pub fn sweep_idle(&self, now_ms: u64, idle_after_ms: u64) {
        if !self.adaptive() || self.resolving.load(Ordering::Acquire) {
            return;
        }

        let shards: Vec<_> = self.inner.read().shards.clone();
        for shard in shards {
            if shard.state() == State::Loaded
                && now_ms.saturating_sub(shard.last_access()) >= idle_after_ms
            {
                debug!(table = %self.name, shard = shard.id(), "unloading idle shard");
                if let Err(err) = shard.unload(true, true, false) {
                    warn!(table = %self.name, shard = shard.id(), "idle unload failed: {}", err);
                }
            }
        }
    }

    /// Merge partially filled shards. The table write lock is held for
    /// the whole move, so no reader can observe a half-moved record; the
    /// index is updated as each record crosses over.
    pub fn optimize(&self) -> Result<usize, Error> {
        if !self.auto_optimize() {
            return Ok(0);
        }
        self.check_open()?;

        let max_records = settings().max_records_per_shard();
        if max_records < 0 {
            return Ok(0);
        }

        let mut inner = self.inner.write();

        let mut counts: HashMap<i64, i64> = HashMap::new();
        for shard_id in inner.index.values() {
            *counts.entry(*shard_id).or_insert(0) += 1;
        }

        // Smallest populated shard that fully fits somewhere else.
        let Some(source) = inner
            .shards
            .iter()
            .filter(|s| {
                let count = counts.get(&s.id()).copied().unwrap_or(0);
                count > 0 && count < max_records
            })
            .min_by_key(|s| counts.get(&s.id()).copied().unwrap_or(0))
            .cloned()
        else {
            return Ok(0);
        };

        let source_count = counts.get(&source.id()).copied().unwrap_or(0);
        let Some(target) = inner
            .shards
            .iter()
            .filter(|s| s.id() != source.id())
            .find(|s| {
                counts.get(&s.id()).copied().unwrap_or(0) + source_count <= max_records
            })
            .cloned()
        else {
            return Ok(0);
        };

        source.load()?;
        target.load()?;

        let mut moved = 0;
        for identifier in source.record_ids()? {
            let Some(record) = source.take(&identifier) else {
                continue;
            };
            target.insert(record)?;
            inner.index.insert(identifier, target.id());
            moved += 1;
        }

        source.unload(true, false, true)?;
        inner.shards.retain(|s| s.id() != source.id());

        info!(
            table = %self.name,
            from = source.id(),
            to = target.id(),
            moved,
            "shards merged"
        );
        Ok(moved)
    }

    /// Verify the primary index against shard contents.
    ///
    /// Modes: `-1` collect stats only; `0` index records found in shards
    /// without an entry; `1` delete records whose index points elsewhere;
    /// `2` rebuild the index from shards; `3` rebuild and drop orphan
    /// files.
    pub fn resolve_inconsistency(&self, mode: i8) -> Result<Value, Error> {
        if self.resolving.swap(true, Ordering::AcqRel) {
            return Err(Error::InconsistencyLock);
        }
        let _guard = ResolveGuard(&self.resolving);

        let mode = mode.clamp(-1, 3);
        let mut inner = self.inner.write();

        // Actual placement, straight from the shards.
        let mut actual: HashMap<String, i64> = HashMap::new();
        let mut misplaced: Vec<(String, i64)> = Vec::new();

        let shards = inner.shards.clone();
        for shard in &shards {
            for identifier in shard.record_ids()? {
                match inner.index.get(&identifier) {
                    Some(indexed) if *indexed != shard.id() => {
                        misplaced.push((identifier.clone(), shard.id()));
                    }
                    _ => (),
                }
                actual.entry(identifier).or_insert(shard.id());
            }
        }

        let missing_index: Vec<String> = actual
            .keys()
            .filter(|id| !inner.index.contains_key(*id))
            .cloned()
            .collect();
        let stale_index: Vec<String> = inner
            .index
            .keys()
            .filter(|id| !actual.contains_key(*id))
            .cloned()
            .collect();

        let stats = json!({
            "mode": mode,
            "records": actual.len(),
            "missing_index": missing_index.len(),
            "misplaced": misplaced.len(),
            "stale_index": stale_index.len(),
        });

        match mode {
            -1 => (),
            0 => {
                for identifier in missing_index {
                    let shard_id = actual[&identifier];
                    inner.index.insert(identifier, shard_id);
                }
            }
            1 => {
                for (identifier, shard_id) in &misplaced {
                    if let Some(shard) = shards.iter().find(|s| s.id() == *shard_id) {
                        shard.delete(identifier)?;
                    }
                }
            }
            _ => {
                inner.index = actual;

                if mode == 3 {
                    self.drop_orphan_files(&inner)?;
                }
            }
        }

        info!(table = %self.name, %stats, "inconsistency resolved");
        Ok(stats)
    }

    /// Remove shard-looking files that belong to no live shard.
    fn drop_orphan_files(&self, inner: &TableInner) -> Result<(), Error> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let prefix = format!("{}_", self.name);
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            let Some(id) = file_name.strip_prefix(&prefix) else {
                continue;
            };
            let Ok(id) = id.parse::<i64>() else {
                continue;
            };

            if !inner.shards.iter().any(|s| s.id() == id) {
                warn!(table = %self.name, "dropping orphan shard file \"{}\"", file_name);
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Persist every loaded shard, releasing record objects when `clear`
    /// is set. Either way a persisted shard re-hydrates on next access.
    pub fn persist(&self, clear: bool) -> Result<(), Error> {
        let shards: Vec<_> = self.inner.read().shards.clone();
        for shard in shards {
            if shard.state() == State::Loaded {
                shard.unload(clear, true, false)?;
            }
        }
        Ok(())
    }

    /// Drop the table's files from disk. Called on table drop.
    pub fn drop_files(&self) -> Result<(), Error> {
        let mut inner = self.inner.write();
        for shard in &inner.shards {
            shard.unload(true, false, true)?;
        }
        inner.shards.clear();
        inner.index.clear();

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Table summary for info surfaces.
    pub fn info(&self) -> Value {
        let inner = self.inner.read();
        json!({
            "table": self.name,
            "database": self.database,
            "records": inner.index.len(),
            "shards": inner.shards.iter().map(|s| json!({
                "id": s.id(),
                "state": s.state().code(),
                "loaded_records": s.size(),
            })).collect::<Vec<_>>(),
            "adaptive": self.adaptive(),
            "auto_optimize": self.auto_optimize(),
            "secure_update": self.secure_update(),
            "resolve_mode": self.resolve_mode(),
            "stats": self.stats.snapshot(),
        })
    }
}

/// An insert body must carry every templated field with the right shape.
fn check_against_template(value: &Value, template: &Value) -> Result<(), Error> {
    let Some(template) = template.as_object() else {
        return Ok(());
    };
    let Some(object) = value.as_object() else {
        return Err(Error::validation("record body must be a JSON object"));
    };

    for (field, field_template) in template {
        match object.get(field) {
            Some(field_value) => {
                if !super::record::structure_matches(field_value, field_template) {
                    return Err(Error::validation(format!(
                        "\"{}\" does not match the table structure",
                        field
                    )));
                }
            }
            None => {
                return Err(Error::validation(format!(
                    "\"{}\" is required by the table structure",
                    field
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(dir: &Path) -> Table {
        Table::new(
            "books",
            "lib",
            dir,
            Arc::new(AtomicBool::new(false)),
            Arc::new(Crypt::load(dir).unwrap()),
        )
    }

    fn body(id: &str) -> Value {
        json!({"identifier": id, "meta": {"t": "x"}})
    }

    #[test]
    fn test_insert_get_delete_record() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());

        table.insert_record(&body("b1")).unwrap();
        assert!(table.contains_record("b1"));
        assert!(table.contains_record("B1"));

        let record = table.record("b1").unwrap();
        assert_eq!(record.identifier(), "b1");

        assert!(matches!(
            table.insert_record(&body("b1")),
            Err(Error::AlreadyExists(_))
        ));

        table.delete_record("b1").unwrap();
        assert!(!table.contains_record("b1"));
        assert!(matches!(table.record("b1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_field_operations() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        table.insert_record(&body("b1")).unwrap();

        let (data, token) = table.get_field("b1", None, false).unwrap();
        assert_eq!(data["meta"]["t"], "x");
        assert!(token.is_none());

        let update = json!({"identifier": "b1", "meta": {"t": "y"}});
        table.update_field("b1", "meta", &update, None).unwrap();

        let (value, _) = table.get_field("b1", Some("meta"), false).unwrap();
        assert_eq!(value["t"], "y");

        table.insert_field("b1", "tags", None).unwrap();
        table.delete_field("b1", "tags").unwrap();
    }

    #[test]
    fn test_secure_update_token_flow() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        table.set_secure_update(true);
        table.insert_record(&body("b1")).unwrap();

        let (_, token) = table.get_field("b1", Some("meta"), true).unwrap();
        let token = token.unwrap();

        // Concurrent second acquire gets no token.
        let (_, second) = table.get_field("b1", Some("meta"), true).unwrap();
        assert!(second.is_none());

        let update = json!({"identifier": "b1", "meta": {"t": "z"}});
        assert!(matches!(
            table.update_field("b1", "meta", &update, None),
            Err(Error::TokenRequired)
        ));
        table
            .update_field("b1", "meta", &update, Some(&token))
            .unwrap();

        // Consumed.
        assert!(matches!(
            table.update_field("b1", "meta", &update, Some(&token)),
            Err(Error::TokenRequired)
        ));
    }

    #[test]
    fn test_template_enforced_on_insert() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        table.set_template(Some(json!({"meta": {"t": ""}})));

        assert!(matches!(
            table.insert_record(&json!({"identifier": "b1"})),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            table.insert_record(&json!({"identifier": "b1", "meta": "flat"})),
            Err(Error::Validation(_))
        ));
        table.insert_record(&body("b1")).unwrap();
    }

    #[test]
    fn test_open_recovers_index() {
        let dir = tempfile::tempdir().unwrap();

        {
            let table = table(dir.path());
            for i in 0..20 {
                table.insert_record(&body(&format!("b{}", i))).unwrap();
            }
            table.persist(false).unwrap();
        }

        let reopened = table(dir.path());
        reopened.open().unwrap();
        assert_eq!(reopened.record_count(), 20);

        let (data, _) = reopened.get_field("b7", None, false).unwrap();
        assert_eq!(data["meta"]["t"], "x");
    }

    #[test]
    fn test_resolver_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());

        for i in 0..5 {
            table.insert_record(&body(&format!("b{}", i))).unwrap();
        }

        // Sabotage the index.
        table.inner.write().index.remove("b3");
        table.inner.write().index.insert("ghost".into(), 12345);

        let stats = table.resolve_inconsistency(-1).unwrap();
        assert_eq!(stats["missing_index"], 1);
        assert_eq!(stats["stale_index"], 1);

        let stats = table.resolve_inconsistency(2).unwrap();
        assert_eq!(stats["records"], 5);
        assert!(table.contains_record("b3"));
        assert!(!table.contains_record("ghost"));
    }

    #[test]
    fn test_resolver_add_to_index_mode() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());

        for i in 0..3 {
            table.insert_record(&body(&format!("b{}", i))).unwrap();
        }
        table.inner.write().index.remove("b1");

        table.resolve_inconsistency(0).unwrap();
        assert!(table.contains_record("b1"));
    }

    #[test]
    fn test_sweep_unloads_idle_shards() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        table.insert_record(&body("b1")).unwrap();

        // Nothing is idle yet.
        table.sweep_idle(super::epoch_now_for_tests(), 60_000);
        let loaded: Vec<_> = table.inner.read().shards.clone();
        assert_eq!(loaded[0].state(), State::Loaded);

        // Far-future clock: everything is idle.
        table.sweep_idle(super::epoch_now_for_tests() + 120_000, 60_000);
        let shards: Vec<_> = table.inner.read().shards.clone();
        assert_eq!(shards[0].state(), State::Unloaded);

        // Still reachable; hydrates on demand.
        assert!(table.record("b1").is_ok());
    }

    #[test]
    fn test_drop_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        table.insert_record(&body("b1")).unwrap();
        table.persist(true).unwrap();
        assert!(table.dir().exists());

        table.drop_files().unwrap();
        assert!(!table.dir().exists());
    }
}

#[cfg(test)]
fn epoch_now_for_tests() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
