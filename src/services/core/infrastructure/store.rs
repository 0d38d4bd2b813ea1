// src/services/core/infrastructure/store.rs
// Relational store handle. One shared connection, injected into every
// service; transactions run under BEGIN IMMEDIATE with bounded retry on
// transient lock contention.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::types::{Distribution, Lead, LeadStatus, PlanTier, Recipient, Subscription};
use crate::utils::{LeadFlowError, LeadFlowResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    source_chat_id    INTEGER NOT NULL,
    source_message_id INTEGER NOT NULL,
    name              TEXT,
    phone             TEXT,
    category          TEXT NOT NULL,
    city              TEXT NOT NULL,
    description       TEXT NOT NULL DEFAULT '',
    area              REAL,
    status            TEXT NOT NULL DEFAULT 'active',
    created_at        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_leads_category_created
    ON leads(category, created_at);

CREATE TABLE IF NOT EXISTS recipients (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id INTEGER NOT NULL UNIQUE,
    username    TEXT,
    full_name   TEXT,
    is_active   INTEGER NOT NULL DEFAULT 1,
    is_paid     INTEGER NOT NULL DEFAULT 0,
    is_demo     INTEGER NOT NULL DEFAULT 0,
    categories  TEXT NOT NULL DEFAULT '[]',
    cities      TEXT NOT NULL DEFAULT '[]',
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient_id INTEGER NOT NULL REFERENCES recipients(id),
    plan         TEXT NOT NULL,
    price        INTEGER NOT NULL,
    starts_at    INTEGER NOT NULL,
    expires_at   INTEGER NOT NULL,
    is_active    INTEGER NOT NULL DEFAULT 1,
    payment_ref  TEXT,
    created_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_recipient_active
    ON subscriptions(recipient_id, is_active);
CREATE INDEX IF NOT EXISTS idx_subscriptions_active_expiry
    ON subscriptions(is_active, expires_at);

CREATE TABLE IF NOT EXISTS distributions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id      INTEGER NOT NULL REFERENCES leads(id),
    recipient_id INTEGER NOT NULL REFERENCES recipients(id),
    sent_at      INTEGER NOT NULL,
    viewed_at    INTEGER,
    created_at   INTEGER NOT NULL,
    UNIQUE(lead_id, recipient_id)
);
CREATE INDEX IF NOT EXISTS idx_distributions_recipient_sent
    ON distributions(recipient_id, sent_at);

CREATE TABLE IF NOT EXISTS engine_settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    version    INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER NOT NULL
);
"#;

/// Backoff budget for transient lock contention. Defaults follow the
/// classic 1s/2s/4s ladder; tests shrink the base delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale delays for test runs.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }
}

/// Shared store handle. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    retry: RetryPolicy,
}

impl Store {
    pub fn open(path: &str) -> LeadFlowResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LeadFlowResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LeadFlowResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn lock(&self) -> LeadFlowResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LeadFlowError::storage_unavailable("store mutex poisoned"))
    }

    /// Run a read-only operation against the shared connection.
    pub fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> LeadFlowResult<T>,
    ) -> LeadFlowResult<T> {
        let conn = self.lock()?;
        op(&conn)
    }

    /// Run `op` inside a BEGIN IMMEDIATE transaction. The transaction
    /// commits only if `op` returns Ok; any error rolls back. Transient
    /// failures are retried with exponential backoff until the attempt
    /// budget runs out, then the last error surfaces as-is.
    pub async fn with_transaction<T, F>(&self, mut op: F) -> LeadFlowResult<T>
    where
        F: FnMut(&Transaction<'_>) -> LeadFlowResult<T>,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.try_transaction(&mut op) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.base_delay_ms * 2u64.pow(attempt);
                    log::warn!(
                        "transaction attempt {} failed ({}), retrying in {}ms",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_transaction<T, F>(&self, op: &mut F) -> LeadFlowResult<T>
    where
        F: FnMut(&Transaction<'_>) -> LeadFlowResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match op(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // drop also rolls back; explicit for clarity
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}

// Row mappers shared by the services. Column order must match the SELECT
// lists in the callers.
pub(crate) mod rows {
    use super::*;
    use rusqlite::types::Type;
    use rusqlite::Row;

    fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
        let raw: String = row.get(idx)?;
        serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    pub fn lead(row: &Row<'_>) -> rusqlite::Result<Lead> {
        let status: String = row.get(9)?;
        Ok(Lead {
            id: row.get(0)?,
            source_chat_id: row.get(1)?,
            source_message_id: row.get(2)?,
            name: row.get(3)?,
            phone: row.get(4)?,
            category: row.get(5)?,
            city: row.get(6)?,
            description: row.get(7)?,
            area: row.get(8)?,
            status: LeadStatus::parse(&status),
            created_at: row.get(10)?,
        })
    }

    pub fn recipient(row: &Row<'_>) -> rusqlite::Result<Recipient> {
        Ok(Recipient {
            id: row.get(0)?,
            external_id: row.get(1)?,
            username: row.get(2)?,
            full_name: row.get(3)?,
            is_active: row.get(4)?,
            is_paid: row.get(5)?,
            is_demo: row.get(6)?,
            categories: json_list(row, 7)?,
            cities: json_list(row, 8)?,
            created_at: row.get(9)?,
        })
    }

    pub fn subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
        let plan_str: String = row.get(2)?;
        let plan = PlanTier::parse(&plan_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown plan tier: {}", plan_str).into(),
            )
        })?;
        Ok(Subscription {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            plan,
            price: row.get(3)?,
            starts_at: row.get(4)?,
            expires_at: row.get(5)?,
            is_active: row.get(6)?,
            payment_ref: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    pub fn distribution(row: &Row<'_>) -> rusqlite::Result<Distribution> {
        Ok(Distribution {
            id: row.get(0)?,
            lead_id: row.get(1)?,
            recipient_id: row.get(2)?,
            sent_at: row.get(3)?,
            viewed_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

pub(crate) const LEAD_COLUMNS: &str =
    "id, source_chat_id, source_message_id, name, phone, category, city, description, area, status, created_at";
pub(crate) const RECIPIENT_COLUMNS: &str =
    "id, external_id, username, full_name, is_active, is_paid, is_demo, categories, cities, created_at";
pub(crate) const SUBSCRIPTION_COLUMNS: &str =
    "id, recipient_id, plan, price, starts_at, expires_at, is_active, payment_ref, created_at";
pub(crate) const DISTRIBUTION_COLUMNS: &str =
    "id, lead_id, recipient_id, sent_at, viewed_at, created_at";
