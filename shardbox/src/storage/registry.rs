//! The top-level database registry.
//!
//! Owns the database map, the readiness flag and the persisted manifest
//! at `data/db/datamanager`: top-level settings plus the database and
//! table layout, so the hierarchy comes back after a restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::crypt::Crypt;

use super::database::Database;
use super::error::Error;
use super::table::Table;

/// Persisted manifest shape.
#[derive(Serialize, Deserialize, Debug, Default)]
struct Manifest {
    #[serde(default)]
    databases: Vec<DatabaseManifest>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DatabaseManifest {
    name: String,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    tables: Vec<TableManifest>,
}

#[derive(Serialize, Deserialize, Debug)]
struct TableManifest {
    name: String,
    #[serde(default = "default_true")]
    adaptive: bool,
    #[serde(default)]
    auto_optimize: bool,
    #[serde(default)]
    secure_update: bool,
    #[serde(default = "default_resolve_mode")]
    resolve_mode: i8,
    #[serde(default)]
    template: Option<Value>,
}

fn default_true() -> bool {
    true
}

fn default_resolve_mode() -> i8 {
    -1
}

pub struct Registry {
    db_root: PathBuf,
    manifest_path: PathBuf,
    databases: RwLock<HashMap<String, Arc<Database>>>,
    ready: AtomicBool,
    crypt: Arc<Crypt>,
}

/// Database, table and record identifiers become file and directory
/// names; keep them to a safe alphabet.
pub fn valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= 128
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Registry {
    pub fn new(data_root: &Path, crypt: Arc<Crypt>) -> Self {
        let db_root = data_root.join("db");
        Self {
            manifest_path: db_root.join("datamanager"),
            db_root,
            databases: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            crypt,
        }
    }

    /// Bring the hierarchy up from the manifest. Tables rebuild their
    /// primary index from the shard files they find.
    pub fn init(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.db_root)?;

        let manifest: Manifest = match fs::read_to_string(&self.manifest_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!("datamanager unreadable, starting empty: {}", err);
                    Manifest::default()
                }
            },
            Err(_) => Manifest::default(),
        };

        let mut databases = HashMap::new();
        for db_manifest in manifest.databases {
            let database = Arc::new(Database::new(
                &db_manifest.name,
                &self.db_root,
                db_manifest.encrypted,
                self.crypt.clone(),
            ));

            for table_manifest in db_manifest.tables {
                let table = Arc::new(Table::new(
                    &table_manifest.name,
                    database.name(),
                    database.dir(),
                    database.encrypted_flag(),
                    database.crypt(),
                ));
                table.set_adaptive(table_manifest.adaptive);
                table.set_auto_optimize(table_manifest.auto_optimize);
                table.set_secure_update(table_manifest.secure_update);
                table.set_resolve_mode(table_manifest.resolve_mode);
                table.set_template(table_manifest.template);

                table.open()?;
                database.attach_table(table);
            }

            databases.insert(database.name().to_owned(), database);
        }

        let count = databases.len();
        *self.databases.write() = databases;
        self.ready.store(true, Ordering::Release);

        info!("storage ready, {} database(s)", count);
        Ok(())
    }

    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn check_ready(&self) -> Result<(), Error> {
        if self.ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    pub fn create_database(&self, name: &str, encrypted: bool) -> Result<Arc<Database>, Error> {
        self.check_ready()?;

        if !valid_identifier(name) {
            return Err(Error::validation("invalid database identifier"));
        }
        if encrypted && !self.crypt.enabled() {
            return Err(Error::validation(
                "encryption requested but no key is configured",
            ));
        }

        let key = name.to_lowercase();
        let database = {
            let mut databases = self.databases.write();
            if databases.contains_key(&key) {
                return Err(Error::AlreadyExists(key));
            }

            let database = Arc::new(Database::new(
                &key,
                &self.db_root,
                encrypted,
                self.crypt.clone(),
            ));
            databases.insert(key.clone(), database.clone());
            database
        };

        self.persist_manifest()?;
        info!(database = %key, "database created");
        Ok(database)
    }

    pub fn database(&self, name: &str) -> Result<Arc<Database>, Error> {
        self.check_ready()?;
        self.databases
            .read()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or(Error::NotFound("database"))
    }

    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.databases.read().values().cloned().collect()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a database, its tables and all files.
    pub fn drop_database(&self, name: &str) -> Result<(), Error> {
        self.check_ready()?;

        let key = name.to_lowercase();
        let database = {
            let mut databases = self.databases.write();
            databases.remove(&key).ok_or(Error::NotFound("database"))?
        };

        database.drop_files()?;
        self.persist_manifest()?;
        info!(database = %key, "database dropped");
        Ok(())
    }

    /// Create a table inside a database and persist the layout.
    pub fn create_table(&self, database: &str, table: &str) -> Result<Arc<Table>, Error> {
        self.check_ready()?;

        if !valid_identifier(table) {
            return Err(Error::validation("invalid table identifier"));
        }

        let database = self.database(database)?;
        let table = database.create_table(table)?;
        self.persist_manifest()?;
        Ok(table)
    }

    pub fn drop_table(&self, database: &str, table: &str) -> Result<(), Error> {
        self.check_ready()?;

        let database = self.database(database)?;
        database.drop_table(table)?;
        self.persist_manifest()?;
        Ok(())
    }

    pub fn table(&self, database: &str, table: &str) -> Result<Arc<Table>, Error> {
        self.database(database)?.table(table)
    }

    /// Every table across every database.
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.databases()
            .into_iter()
            .flat_map(|db| db.tables())
            .collect()
    }

    /// Write the manifest out.
    pub fn persist_manifest(&self) -> Result<(), Error> {
        let manifest = Manifest {
            databases: self
                .databases()
                .iter()
                .map(|db| DatabaseManifest {
                    name: db.name().to_owned(),
                    encrypted: db.encrypted(),
                    tables: db
                        .tables()
                        .iter()
                        .map(|table| TableManifest {
                            name: table.name().to_owned(),
                            adaptive: table.adaptive(),
                            auto_optimize: table.auto_optimize(),
                            secure_update: table.secure_update(),
                            resolve_mode: table.resolve_mode(),
                            template: table.template(),
                        })
                        .collect(),
                })
                .collect(),
        };

        fs::create_dir_all(&self.db_root)?;
        fs::write(
            &self.manifest_path,
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(())
    }

    /// Stop accepting work and flush everything. Persistence errors are
    /// logged, not fatal: teardown of peer components must proceed.
    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);

        if let Err(err) = self.persist_manifest() {
            warn!("manifest persist failed, data may be lost: {}", err);
        }

        for database in self.databases() {
            if let Err(err) = database.persist(true) {
                warn!(
                    database = %database.name(),
                    "persist failed, data may be lost: {}", err
                );
            }
        }
    }

    pub fn info(&self) -> Value {
        json!({
            "ready": self.ready(),
            "databases": self.database_names(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry(dir: &Path) -> Registry {
        let registry = Registry::new(dir, Arc::new(Crypt::load(dir).unwrap()));
        registry.init().unwrap();
        registry
    }

    #[test]
    fn test_not_ready_before_init() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path(), Arc::new(Crypt::load(dir.path()).unwrap()));
        assert!(matches!(
            registry.create_database("lib", false),
            Err(Error::NotReady)
        ));
    }

    #[test]
    fn test_database_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry.create_database("lib", false).unwrap();
        assert!(matches!(
            registry.create_database("LIB", false),
            Err(Error::AlreadyExists(_))
        ));

        registry.create_table("lib", "books").unwrap();
        assert!(registry.table("lib", "books").is_ok());

        registry.drop_database("lib").unwrap();
        assert!(registry.database("lib").is_err());
    }

    #[test]
    fn test_identifier_validation() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        assert!(matches!(
            registry.create_database("../escape", false),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            registry.create_database("", false),
            Err(Error::Validation(_))
        ));
        assert!(registry.create_database("ok-name_2", false).is_ok());
    }

    #[test]
    fn test_encrypted_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        assert!(matches!(
            registry.create_database("vault", true),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_restart_recovers_layout_and_records() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = registry(dir.path());
            registry.create_database("lib", false).unwrap();
            let table = registry.create_table("lib", "books").unwrap();
            table.set_secure_update(true);
            registry.persist_manifest().unwrap();

            for i in 0..100 {
                table
                    .insert_record(&json!({"identifier": format!("b{}", i)}))
                    .unwrap();
            }
            registry.shutdown();
        }

        let registry = registry(dir.path());
        let table = registry.table("lib", "books").unwrap();
        assert!(table.secure_update());
        assert_eq!(table.record_count(), 100);

        for i in 0..100 {
            assert!(table.record(&format!("b{}", i)).is_ok());
        }
    }
}
