//! Persistent key-value storage for credentials and the account binding.

use crate::models::{AccountBinding, WifiCredentials};
use anyhow::{Context, Result, ensure};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

const SSID_KEY: &str = "ssid";
const ROUTER_PASSWORD_KEY: &str = "routerPassword";
const REGISTRATION_ID_KEY: &str = "registrationID";
const ACCOUNT_EMAIL_KEY: &str = "accountEmail";

/// String/int32 key-value store.
///
/// Reading a key that was never written stores and returns the default
/// (`""` for strings, `-1` for integers).
pub trait KeyValueStore: Send {
    fn get_str(&mut self, key: &str) -> Result<String>;
    fn set_str(&mut self, key: &str, value: &str) -> Result<()>;
    fn get_i32(&mut self, key: &str) -> Result<i32>;
    fn set_i32(&mut self, key: &str, value: i32) -> Result<()>;
    /// Flush pending writes to persistent storage.
    fn commit(&mut self) -> Result<()>;
    /// Release the store; every later access fails.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Entries {
    #[serde(default)]
    strings: BTreeMap<String, String>,
    #[serde(default)]
    ints: BTreeMap<String, i32>,
}

/// [`KeyValueStore`] persisted as a JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Entries,
    dirty: bool,
    open: bool,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match fs::read(&path) {
            Ok(content) => serde_json::from_slice(&content)
                .context(format!("failed to deserialize store: {path:?}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no store found at {path:?}, starting empty");
                Entries::default()
            }
            Err(e) => return Err(e).context(format!("failed to read store: {path:?}")),
        };

        Ok(Self {
            path,
            entries,
            dirty: false,
            open: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        ensure!(self.open, "store {:?} is closed", self.path);
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_str(&mut self, key: &str) -> Result<String> {
        self.ensure_open()?;

        if let Some(value) = self.entries.strings.get(key) {
            return Ok(value.clone());
        }

        debug!("initializing unset key {key}");
        self.set_str(key, "")?;
        self.commit()?;
        Ok(String::new())
    }

    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.entries
            .strings
            .insert(key.to_string(), value.to_string());
        self.dirty = true;
        Ok(())
    }

    fn get_i32(&mut self, key: &str) -> Result<i32> {
        self.ensure_open()?;

        if let Some(value) = self.entries.ints.get(key) {
            return Ok(*value);
        }

        debug!("initializing unset key {key}");
        self.set_i32(key, -1)?;
        self.commit()?;
        Ok(-1)
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<()> {
        self.ensure_open()?;
        self.entries.ints.insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;

        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create store directory")?;
        }

        let path = &self.path;
        serde_json::to_writer_pretty(
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .context(format!("failed to open store for write: {path:?}"))?,
            &self.entries,
        )
        .context(format!("failed to serialize store: {path:?}"))?;

        self.dirty = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        self.commit()?;
        self.open = false;
        info!("store {:?} closed", self.path);
        Ok(())
    }
}

/// Shared handle to the device's persistent store with typed accessors.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Box<dyn KeyValueStore>>>,
}

impl Store {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut dyn KeyValueStore) -> Result<R>) -> Result<R> {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(store.as_mut())
    }

    pub fn wifi_credentials(&self) -> Result<WifiCredentials> {
        self.with(|store| {
            Ok(WifiCredentials {
                ssid: store.get_str(SSID_KEY)?,
                password: store.get_str(ROUTER_PASSWORD_KEY)?,
            })
        })
        .context("failed to load wifi credentials")
    }

    pub fn save_wifi_credentials(&self, credentials: &WifiCredentials) -> Result<()> {
        self.with(|store| {
            store.set_str(SSID_KEY, &credentials.ssid)?;
            store.set_str(ROUTER_PASSWORD_KEY, &credentials.password)?;
            store.commit()
        })
        .context("failed to save wifi credentials")
    }

    pub fn account_binding(&self) -> Result<AccountBinding> {
        self.with(|store| {
            Ok(AccountBinding {
                registration_id: store.get_str(REGISTRATION_ID_KEY)?,
                account_email: store.get_str(ACCOUNT_EMAIL_KEY)?,
            })
        })
        .context("failed to load account binding")
    }

    pub fn save_account_binding(&self, binding: &AccountBinding) -> Result<()> {
        self.with(|store| {
            store.set_str(REGISTRATION_ID_KEY, &binding.registration_id)?;
            store.set_str(ACCOUNT_EMAIL_KEY, &binding.account_email)?;
            store.commit()
        })
        .context("failed to save account binding")
    }

    /// Forget the account binding so the next update attempt fails.
    pub fn clear_account_binding(&self) -> Result<()> {
        self.save_account_binding(&AccountBinding::default())
    }

    pub fn close(&self) -> Result<()> {
        self.with(|store| store.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> JsonFileStore {
        JsonFileStore::open(dir.path().join("store.json")).expect("should open store")
    }

    #[test]
    fn unset_keys_read_as_defaults_and_are_persisted() {
        let dir = TempDir::new().expect("should create temp dir");
        let mut store = open_store(&dir);

        assert_eq!(store.get_str("ssid").expect("should read"), "");
        assert_eq!(store.get_i32("counter").expect("should read"), -1);

        let mut reopened = open_store(&dir);
        assert_eq!(reopened.entries.strings.get("ssid"), Some(&String::new()));
        assert_eq!(reopened.get_i32("counter").expect("should read"), -1);
    }

    #[test]
    fn values_survive_reopen_only_after_commit() {
        let dir = TempDir::new().expect("should create temp dir");
        let mut store = open_store(&dir);

        store.set_i32("counter", 7).expect("should write");
        store.set_str("name", "botaniclock").expect("should write");
        assert!(!dir.path().join("store.json").exists());

        store.commit().expect("should commit");

        let mut reopened = open_store(&dir);
        assert_eq!(reopened.get_i32("counter").expect("should read"), 7);
        assert_eq!(reopened.get_str("name").expect("should read"), "botaniclock");
    }

    #[test]
    fn closed_store_rejects_access() {
        let dir = TempDir::new().expect("should create temp dir");
        let mut store = open_store(&dir);

        store.close().expect("should close");

        let err = store.get_str("ssid").expect_err("closed store must fail");
        assert!(err.to_string().contains("is closed"));
        assert!(store.close().is_ok());
    }

    #[test]
    fn corrupt_store_fails_to_open() {
        let dir = TempDir::new().expect("should create temp dir");
        fs::write(dir.path().join("store.json"), "not json").expect("should write");

        assert!(JsonFileStore::open(dir.path().join("store.json")).is_err());
    }

    #[test]
    fn typed_accessors_round_trip_through_the_store() {
        let dir = TempDir::new().expect("should create temp dir");
        let store = Store::new(open_store(&dir));

        assert!(store.wifi_credentials().expect("should load").ssid.is_empty());

        store
            .save_wifi_credentials(&WifiCredentials::new("net", "pw"))
            .expect("should save credentials");
        store
            .save_account_binding(&AccountBinding::new("r1", "e1"))
            .expect("should save binding");

        let reopened = Store::new(open_store(&dir));
        assert_eq!(
            reopened.wifi_credentials().expect("should load"),
            WifiCredentials::new("net", "pw")
        );
        assert_eq!(
            reopened.account_binding().expect("should load"),
            AccountBinding::new("r1", "e1")
        );

        reopened
            .clear_account_binding()
            .expect("should clear binding");
        assert!(reopened.account_binding().expect("should load").is_empty());
    }
}
