// Persisted connection properties.
//
// The active connection lives in `persistence.toml`. Per-dialect templates
// (`persistence-<dialect>.toml`) seed the form when the operator switches
// dialects.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::database::descriptor::ConnectionDescriptor;
use crate::database::dialect::DbDialect;

pub trait PropertiesStore: Send + Sync {
    /// Load the stored descriptor: the active one for `None`, the template
    /// for a specific dialect otherwise. Missing files yield built-in defaults.
    fn load(&self, dialect: Option<DbDialect>) -> Result<ConnectionDescriptor>;

    /// Make `descriptor` the active connection.
    fn patch(&self, descriptor: &ConnectionDescriptor) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedProperties {
    dialect: DbDialect,
    url: String,
    #[serde(default)]
    login: String,
    #[serde(default)]
    password: String,
}

impl PersistedProperties {
    fn from_descriptor(d: &ConnectionDescriptor) -> Self {
        Self {
            dialect: d.dialect,
            url: d.connection_url(),
            login: d.login.clone(),
            password: d.password.clone(),
        }
    }

    fn into_descriptor(self) -> Result<ConnectionDescriptor> {
        let mut d = ConnectionDescriptor::from_url(self.dialect, &self.url)?;
        d.login = self.login;
        d.password = self.password;
        Ok(d)
    }
}

/// Properties kept as TOML files in one directory.
pub struct TomlPropertiesStore {
    dir: PathBuf,
}

const ACTIVE_FILE: &str = "persistence.toml";

impl TomlPropertiesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, dialect: Option<DbDialect>) -> PathBuf {
        match dialect {
            None => self.dir.join(ACTIVE_FILE),
            Some(d) => self.dir.join(format!("persistence-{}.toml", d.as_str())),
        }
    }

    fn read(path: &Path) -> Result<ConnectionDescriptor> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stored: PersistedProperties = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        stored
            .into_descriptor()
            .with_context(|| format!("Invalid connection string in {}", path.display()))
    }
}

impl PropertiesStore for TomlPropertiesStore {
    fn load(&self, dialect: Option<DbDialect>) -> Result<ConnectionDescriptor> {
        let path = self.file_for(dialect);
        if !path.exists() {
            let d = dialect.unwrap_or_default();
            info!(
                "[PHASE: wizard] [STEP: database] No stored properties at {}, using {} defaults",
                path.display(),
                d
            );
            return Ok(ConnectionDescriptor::defaults_for(d));
        }
        let descriptor = Self::read(&path)?;
        if let Some(d) = dialect {
            if descriptor.dialect != d {
                warn!(
                    "[PHASE: wizard] [STEP: database] Template {} declares dialect {}, expected {}",
                    path.display(),
                    descriptor.dialect,
                    d
                );
                return Err(anyhow::anyhow!(
                    "Template {} is for {}, not {}",
                    path.display(),
                    descriptor.dialect,
                    d
                ));
            }
        }
        Ok(descriptor)
    }

    fn patch(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let body = toml::to_string_pretty(&PersistedProperties::from_descriptor(descriptor))
            .context("Failed to serialize connection properties")?;

        let target = self.file_for(None);
        let tmp = target.with_extension("toml.tmp");
        std::fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &target)
            .with_context(|| format!("Failed to replace {}", target.display()))?;

        info!(
            "[PHASE: wizard] [STEP: database] Patched connection properties: {}",
            descriptor.masked_url()
        );
        Ok(())
    }
}

/// In-memory store for unattended runs and tests.
#[derive(Default)]
pub struct MemoryPropertiesStore {
    active: Mutex<Option<ConnectionDescriptor>>,
    templates: HashMap<DbDialect, ConnectionDescriptor>,
    reject_patch: Option<String>,
}

impl MemoryPropertiesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(self, descriptor: ConnectionDescriptor) -> Self {
        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(descriptor);
        }
        self
    }

    pub fn with_template(mut self, descriptor: ConnectionDescriptor) -> Self {
        self.templates.insert(descriptor.dialect, descriptor);
        self
    }

    /// Every `patch` call fails with `reason`.
    pub fn rejecting_patches(mut self, reason: impl Into<String>) -> Self {
        self.reject_patch = Some(reason.into());
        self
    }

    pub fn active(&self) -> Option<ConnectionDescriptor> {
        self.active.lock().ok().and_then(|slot| slot.clone())
    }
}

impl PropertiesStore for MemoryPropertiesStore {
    fn load(&self, dialect: Option<DbDialect>) -> Result<ConnectionDescriptor> {
        match dialect {
            None => Ok(self
                .active()
                .unwrap_or_else(|| ConnectionDescriptor::defaults_for(DbDialect::default()))),
            Some(d) => Ok(self
                .templates
                .get(&d)
                .cloned()
                .unwrap_or_else(|| ConnectionDescriptor::defaults_for(d))),
        }
    }

    fn patch(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        if let Some(reason) = &self.reject_patch {
            return Err(anyhow::anyhow!("{}", reason));
        }
        let mut slot = self
            .active
            .lock()
            .map_err(|_| anyhow::anyhow!("Properties lock poisoned"))?;
        *slot = Some(descriptor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlPropertiesStore::new(dir.path());

        let active = store.load(None).unwrap();
        assert_eq!(active.dialect, DbDialect::Embedded);

        let pg = store.load(Some(DbDialect::Postgresql)).unwrap();
        assert_eq!(pg, ConnectionDescriptor::defaults_for(DbDialect::Postgresql));
    }

    #[test]
    fn patch_then_load_returns_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlPropertiesStore::new(dir.path().join("conf"));

        let mut d = ConnectionDescriptor::defaults_for(DbDialect::Mssql);
        d.host = "sql01".into();
        d.login = "sa".into();
        d.password = "pw;with=chars".into();
        store.patch(&d).unwrap();

        assert!(dir.path().join("conf").join(ACTIVE_FILE).exists());
        assert!(!dir.path().join("conf").join("persistence.toml.tmp").exists());
        assert_eq!(store.load(None).unwrap(), d);
    }

    #[test]
    fn template_is_read_for_dialect() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("persistence-mysql.toml"),
            "dialect = \"mysql\"\nurl = \"mysql://maria:3307/rooms?useSSL=false\"\nlogin = \"om\"\n",
        )
        .unwrap();
        let store = TomlPropertiesStore::new(dir.path());

        let d = store.load(Some(DbDialect::Mysql)).unwrap();
        assert_eq!(d.host, "maria");
        assert_eq!(d.port, 3307);
        assert_eq!(d.database, "rooms");
        assert_eq!(d.options, "useSSL=false");
        assert_eq!(d.login, "om");
    }

    #[test]
    fn unreadable_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("persistence-postgresql.toml"), "url = 12").unwrap();
        let store = TomlPropertiesStore::new(dir.path());
        assert!(store.load(Some(DbDialect::Postgresql)).is_err());
    }

    #[test]
    fn template_for_wrong_dialect_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("persistence-mysql.toml"),
            "dialect = \"postgresql\"\nurl = \"postgresql://h:5432/db\"\n",
        )
        .unwrap();
        let store = TomlPropertiesStore::new(dir.path());
        assert!(store.load(Some(DbDialect::Mysql)).is_err());
    }

    #[test]
    fn memory_store_patch_and_rejection() {
        let store = MemoryPropertiesStore::new();
        let d = ConnectionDescriptor::defaults_for(DbDialect::Postgresql);
        store.patch(&d).unwrap();
        assert_eq!(store.load(None).unwrap(), d);

        let failing = MemoryPropertiesStore::new().rejecting_patches("read-only filesystem");
        let err = failing.patch(&d).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }
}
