//! A database: a registry of tables and the at-rest encryption policy
//! they inherit.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use crate::crypt::Crypt;

use super::error::Error;
use super::table::Table;

pub struct Database {
    name: String,
    dir: PathBuf,
    /// Shared with every table's shards; they check it at persist time.
    encrypted: Arc<AtomicBool>,
    crypt: Arc<Crypt>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    pub fn new(name: &str, db_root: &Path, encrypted: bool, crypt: Arc<Crypt>) -> Self {
        let name = name.to_lowercase();
        Self {
            dir: db_root.join(&name),
            name,
            encrypted: Arc::new(AtomicBool::new(encrypted)),
            crypt,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted.load(Ordering::Relaxed)
    }

    pub fn set_encrypted(&self, value: bool) {
        self.encrypted.store(value, Ordering::Relaxed);
    }

    /// Create a table. Table identifiers are unique within a database.
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>, Error> {
        let key = name.to_lowercase();
        let mut tables = self.tables.write();

        if tables.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }

        let table = Arc::new(Table::new(
            &key,
            &self.name,
            &self.dir,
            self.encrypted.clone(),
            self.crypt.clone(),
        ));
        tables.insert(key.clone(), table.clone());
        info!(database = %self.name, table = %key, "table created");
        Ok(table)
    }

    /// Re-attach a table recovered from the manifest.
    pub fn attach_table(&self, table: Arc<Table>) {
        self.tables
            .write()
            .insert(table.name().to_owned(), table);
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>, Error> {
        self.tables
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or(Error::NotFound("table"))
    }

    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.read().values().cloned().collect()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a table and its files.
    pub fn drop_table(&self, name: &str) -> Result<(), Error> {
        let key = name.to_lowercase();
        let table = {
            let mut tables = self.tables.write();
            tables.remove(&key).ok_or(Error::NotFound("table"))?
        };

        table.drop_files()?;
        info!(database = %self.name, table = %key, "table dropped");
        Ok(())
    }

    /// Flush every table to disk.
    pub fn persist(&self, clear: bool) -> Result<(), Error> {
        for table in self.tables() {
            table.persist(clear)?;
        }
        Ok(())
    }

    /// Remove the whole database directory. Called on database drop.
    pub fn drop_files(&self) -> Result<(), Error> {
        for table in self.tables() {
            table.drop_files()?;
        }
        self.tables.write().clear();

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn info(&self) -> Value {
        json!({
            "database": self.name,
            "encrypted": self.encrypted(),
            "tables": self.table_names(),
        })
    }

    pub(super) fn encrypted_flag(&self) -> Arc<AtomicBool> {
        self.encrypted.clone()
    }

    pub(super) fn crypt(&self) -> Arc<Crypt> {
        self.crypt.clone()
    }
}
