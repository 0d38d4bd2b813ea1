// src/services/core/distribution/leads.rs
// Lead ingestion and lifecycle. Ingestion runs through the persistence
// gateway: the dedup ledger drops re-delivered origin events before any
// row is written.

use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::services::core::infrastructure::store::{rows, LEAD_COLUMNS};
use crate::services::core::infrastructure::PersistenceGateway;
use crate::types::{Lead, LeadStatus, NewLead};
use crate::utils::time::{day_start_ms, now_ms};
use crate::utils::{LeadFlowError, LeadFlowResult};

#[derive(Clone)]
pub struct LeadService {
    gateway: PersistenceGateway,
    config: Arc<EngineConfig>,
}

impl LeadService {
    pub fn new(gateway: PersistenceGateway, config: Arc<EngineConfig>) -> Self {
        Self { gateway, config }
    }

    /// Persist an inbound lead. Returns `None` when the origin event is a
    /// duplicate within the suppression window; callers drop those without
    /// further processing.
    pub async fn ingest(&self, new: NewLead) -> LeadFlowResult<Option<Lead>> {
        if !self.config.categories.iter().any(|c| *c == new.category) {
            return Err(LeadFlowError::validation_error(format!(
                "unknown category: {}",
                new.category
            )));
        }
        if !self.config.cities.iter().any(|c| *c == new.city) {
            return Err(LeadFlowError::validation_error(format!(
                "unknown city: {}",
                new.city
            )));
        }

        if !self.gateway.check_and_mark(&new.source_key())? {
            return Ok(None);
        }

        let lead = self
            .gateway
            .run(|tx| {
                tx.execute(
                    "INSERT INTO leads \
                     (source_chat_id, source_message_id, name, phone, category, city, description, area, status, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        new.source_chat_id,
                        new.source_message_id,
                        new.name,
                        new.phone,
                        new.category,
                        new.city,
                        new.description,
                        new.area,
                        LeadStatus::Active.as_str(),
                        now_ms(),
                    ],
                )?;
                let id = tx.last_insert_rowid();
                let lead = tx.query_row(
                    &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
                    params![id],
                    rows::lead,
                )?;
                Ok(lead)
            })
            .await?;

        log::info!(
            "ingested lead {} ({} / {})",
            lead.id,
            lead.category,
            lead.city
        );
        Ok(Some(lead))
    }

    pub fn get(&self, id: i64) -> LeadFlowResult<Option<Lead>> {
        self.gateway.store().with_conn(|conn| {
            let lead = conn
                .query_row(
                    &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
                    params![id],
                    rows::lead,
                )
                .optional()?;
            Ok(lead)
        })
    }

    /// Recipient feedback on a delivered lead.
    pub async fn update_status(&self, id: i64, status: LeadStatus) -> LeadFlowResult<Lead> {
        self.gateway
            .run(|tx| {
                let changed = tx.execute(
                    "UPDATE leads SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )?;
                if changed == 0 {
                    return Err(LeadFlowError::not_found(format!("lead {}", id)));
                }
                let lead = tx.query_row(
                    &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
                    params![id],
                    rows::lead,
                )?;
                Ok(lead)
            })
            .await
    }

    /// Leads created today (UTC) in one category. Drives the tiered
    /// rotation index.
    pub fn count_today_for_category(&self, category: &str) -> LeadFlowResult<u32> {
        self.gateway.store().with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM leads WHERE category = ?1 AND created_at >= ?2",
                params![category, day_start_ms(now_ms())],
                |r| r.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// All leads created today (UTC). Drives the chunked rotation index.
    pub fn count_today_total(&self) -> LeadFlowResult<u32> {
        self.gateway.store().with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM leads WHERE created_at >= ?1",
                params![day_start_ms(now_ms())],
                |r| r.get(0),
            )?;
            Ok(count as u32)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::core::infrastructure::Store;

    fn service() -> LeadService {
        let store = Store::open_in_memory().unwrap();
        let config = Arc::new(EngineConfig::default());
        let gateway = PersistenceGateway::new(
            store,
            config.dedup_window_secs,
            config.dedup_cleanup_threshold,
        );
        LeadService::new(gateway, config)
    }

    fn sample(message_id: i64) -> NewLead {
        NewLead {
            source_chat_id: -100,
            source_message_id: message_id,
            name: Some("Ivan".to_string()),
            phone: Some("+79001234567".to_string()),
            category: "plumbing".to_string(),
            city: "moscow".to_string(),
            description: "replace bathroom pipes".to_string(),
            area: Some(12.5),
        }
    }

    #[tokio::test]
    async fn ingest_assigns_id_and_defaults() {
        let svc = service();
        let lead = svc.ingest(sample(1)).await.unwrap().unwrap();
        assert!(lead.id > 0);
        assert_eq!(lead.status, LeadStatus::Active);
        assert_eq!(svc.get(lead.id).unwrap(), Some(lead));
    }

    #[tokio::test]
    async fn duplicate_origin_event_is_dropped() {
        let svc = service();
        assert!(svc.ingest(sample(2)).await.unwrap().is_some());
        assert!(svc.ingest(sample(2)).await.unwrap().is_none());
        assert_eq!(svc.count_today_total().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let svc = service();
        let mut bad = sample(3);
        bad.category = "rocketry".to_string();
        assert!(matches!(
            svc.ingest(bad).await,
            Err(LeadFlowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn daily_counters_split_by_category() {
        let svc = service();
        svc.ingest(sample(4)).await.unwrap();
        let mut electrical = sample(5);
        electrical.category = "electrical".to_string();
        svc.ingest(electrical).await.unwrap();

        assert_eq!(svc.count_today_for_category("plumbing").unwrap(), 1);
        assert_eq!(svc.count_today_for_category("electrical").unwrap(), 1);
        assert_eq!(svc.count_today_total().unwrap(), 2);
    }

    #[tokio::test]
    async fn status_update_round_trips() {
        let svc = service();
        let lead = svc.ingest(sample(6)).await.unwrap().unwrap();
        let updated = svc
            .update_status(lead.id, LeadStatus::Contract)
            .await
            .unwrap();
        assert_eq!(updated.status, LeadStatus::Contract);
        assert!(matches!(
            svc.update_status(9999, LeadStatus::Active).await,
            Err(LeadFlowError::NotFound(_))
        ));
    }
}
