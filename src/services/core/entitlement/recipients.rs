// src/services/core/entitlement/recipients.rs
// Recipient registry: upsert keyed by the delivery-channel identity,
// lookups, activation toggles. Writes invalidate cached eligibility
// snapshots since interest sets feed directly into candidate selection.

use rusqlite::{params, OptionalExtension};

use crate::services::core::infrastructure::store::{rows, RECIPIENT_COLUMNS};
use crate::services::core::infrastructure::{CacheManager, Store};
use crate::types::{NewRecipient, Recipient};
use crate::utils::time::now_ms;
use crate::utils::{LeadFlowError, LeadFlowResult};

#[derive(Clone)]
pub struct RecipientService {
    store: Store,
    cache: CacheManager,
}

impl RecipientService {
    pub fn new(store: Store, cache: CacheManager) -> Self {
        Self { store, cache }
    }

    /// Create or refresh a recipient keyed by `external_id`.
    pub async fn upsert(&self, new: NewRecipient) -> LeadFlowResult<Recipient> {
        let categories = serde_json::to_string(&new.categories)?;
        let cities = serde_json::to_string(&new.cities)?;

        let recipient = self
            .store
            .with_transaction(|tx| {
                tx.execute(
                    "INSERT INTO recipients \
                     (external_id, username, full_name, is_paid, is_demo, categories, cities, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(external_id) DO UPDATE SET \
                       username = excluded.username, \
                       full_name = excluded.full_name, \
                       is_paid = excluded.is_paid, \
                       is_demo = excluded.is_demo, \
                       categories = excluded.categories, \
                       cities = excluded.cities",
                    params![
                        new.external_id,
                        new.username,
                        new.full_name,
                        new.is_paid,
                        new.is_demo,
                        categories,
                        cities,
                        now_ms(),
                    ],
                )?;
                let recipient = tx.query_row(
                    &format!(
                        "SELECT {} FROM recipients WHERE external_id = ?1",
                        RECIPIENT_COLUMNS
                    ),
                    params![new.external_id],
                    rows::recipient,
                )?;
                Ok(recipient)
            })
            .await?;

        self.cache.invalidate("eligibility:*").await;
        Ok(recipient)
    }

    pub fn get(&self, id: i64) -> LeadFlowResult<Option<Recipient>> {
        self.store.with_conn(|conn| {
            let recipient = conn
                .query_row(
                    &format!("SELECT {} FROM recipients WHERE id = ?1", RECIPIENT_COLUMNS),
                    params![id],
                    rows::recipient,
                )
                .optional()?;
            Ok(recipient)
        })
    }

    pub fn get_by_external(&self, external_id: i64) -> LeadFlowResult<Option<Recipient>> {
        self.store.with_conn(|conn| {
            let recipient = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM recipients WHERE external_id = ?1",
                        RECIPIENT_COLUMNS
                    ),
                    params![external_id],
                    rows::recipient,
                )
                .optional()?;
            Ok(recipient)
        })
    }

    /// Flip the active flag. Inactive recipients never receive leads.
    pub async fn set_active(&self, id: i64, active: bool) -> LeadFlowResult<Recipient> {
        let recipient = self
            .store
            .with_transaction(|tx| {
                let changed = tx.execute(
                    "UPDATE recipients SET is_active = ?1 WHERE id = ?2",
                    params![active, id],
                )?;
                if changed == 0 {
                    return Err(LeadFlowError::not_found(format!("recipient {}", id)));
                }
                let recipient = tx.query_row(
                    &format!("SELECT {} FROM recipients WHERE id = ?1", RECIPIENT_COLUMNS),
                    params![id],
                    rows::recipient,
                )?;
                Ok(recipient)
            })
            .await?;

        self.cache.invalidate("eligibility:*").await;
        Ok(recipient)
    }
}
