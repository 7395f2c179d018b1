//! License key persistence.
//!
//! The session remembers the last license key the scale accepted through a
//! [`KeyValueStore`]. Storage failures never affect the session itself.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::LicenseKey;

/// Storage key of the last accepted license key.
pub const LAST_LICENSE_KEY: &str = "kgiton.last_license_key";

/// Asynchronous string key-value store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Load the cached license key.
///
/// A stored value that no longer passes validation is treated as absent.
pub async fn load_license_key(store: &dyn KeyValueStore) -> Result<Option<LicenseKey>> {
    let value = store.get(LAST_LICENSE_KEY).await?;
    Ok(value.and_then(|v| LicenseKey::parse(&v).ok()))
}

/// Cache a license key the scale accepted.
pub async fn save_license_key(store: &dyn KeyValueStore, key: &LicenseKey) -> Result<()> {
    store.set(LAST_LICENSE_KEY, key.as_str()).await
}

/// Remove the cached license key.
pub async fn clear_license_key(store: &dyn KeyValueStore) -> Result<()> {
    store.delete(LAST_LICENSE_KEY).await
}
