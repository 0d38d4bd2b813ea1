// src/services/core/settings/runtime_settings.rs
// Persisted engine tunables. Each key carries a version that bumps on
// every write, so operators can audit when a knob last moved. Values are
// JSON documents; typed accessors decode on the way out.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::services::core::infrastructure::{CacheManager, CacheTtl, Store};
use crate::utils::time::now_ms;
use crate::utils::LeadFlowResult;

/// Keys the maintenance jobs consult. Anything else is free-form.
pub const QUOTA_WARNING_THRESHOLD_KEY: &str = "quota_warning_threshold";
pub const EXPIRY_WARNING_DAYS_KEY: &str = "expiry_warning_days";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub version: i64,
    pub updated_at: i64,
}

fn setting_cache_key(key: &str) -> String {
    format!("settings:{}", key)
}

#[derive(Clone)]
pub struct SettingsService {
    store: Store,
    cache: CacheManager,
}

impl SettingsService {
    pub fn new(store: Store, cache: CacheManager) -> Self {
        Self { store, cache }
    }

    pub async fn get_entry(&self, key: &str) -> LeadFlowResult<Option<SettingEntry>> {
        self.cache
            .get_or_compute(&setting_cache_key(key), CacheTtl::Standard, || async {
                self.store.with_conn(|conn| {
                    let entry = conn
                        .query_row(
                            "SELECT key, value, version, updated_at \
                             FROM engine_settings WHERE key = ?1",
                            params![key],
                            |row| {
                                let raw: String = row.get(1)?;
                                let value = serde_json::from_str(&raw).map_err(|e| {
                                    rusqlite::Error::FromSqlConversionFailure(
                                        1,
                                        rusqlite::types::Type::Text,
                                        Box::new(e),
                                    )
                                })?;
                                Ok(SettingEntry {
                                    key: row.get(0)?,
                                    value,
                                    version: row.get(2)?,
                                    updated_at: row.get(3)?,
                                })
                            },
                        )
                        .optional()?;
                    Ok(entry)
                })
            })
            .await
    }

    /// Typed read; `None` when the key is absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> LeadFlowResult<Option<T>> {
        match self.get_entry(key).await? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Write a value, bumping the version. First write starts at 1.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> LeadFlowResult<SettingEntry> {
        let raw = serde_json::to_string(value)?;
        let key_owned = key.to_string();

        let entry = self
            .store
            .with_transaction(|tx| {
                let now = now_ms();
                tx.execute(
                    "INSERT INTO engine_settings (key, value, version, updated_at) \
                     VALUES (?1, ?2, 1, ?3) \
                     ON CONFLICT(key) DO UPDATE SET \
                       value = excluded.value, \
                       version = engine_settings.version + 1, \
                       updated_at = excluded.updated_at",
                    params![key_owned, raw, now],
                )?;
                let (version, updated_at) = tx.query_row(
                    "SELECT version, updated_at FROM engine_settings WHERE key = ?1",
                    params![key_owned],
                    |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
                )?;
                Ok(SettingEntry {
                    key: key_owned.clone(),
                    value: serde_json::from_str(&raw)?,
                    version,
                    updated_at,
                })
            })
            .await?;

        self.cache.delete(&setting_cache_key(key)).await;
        Ok(entry)
    }
}
