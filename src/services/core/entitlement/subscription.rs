// src/services/core/entitlement/subscription.rs
// Entitlement store: who may receive leads, under which plan, and how
// much of the monthly quota is left. Reads are cached read-through;
// every write invalidates the affected keys after commit so the next
// read rebuilds from the relational store.

use rusqlite::{params, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::services::core::infrastructure::store::{rows, SUBSCRIPTION_COLUMNS};
use crate::services::core::infrastructure::{CacheManager, CacheTtl, Store};
use crate::types::{PlanTier, Subscription, SubscriptionStats};
use crate::utils::time::{days_to_ms, month_start_ms, now_ms};
use crate::utils::{LeadFlowError, LeadFlowResult};

fn subscription_key(recipient_id: i64) -> String {
    format!("subscription:recipient:{}", recipient_id)
}

pub(crate) fn quota_key(recipient_id: i64) -> String {
    format!("quota:recipient:{}", recipient_id)
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Store,
    cache: CacheManager,
    config: Arc<EngineConfig>,
}

impl SubscriptionService {
    pub fn new(store: Store, cache: CacheManager, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// The recipient's current valid subscription, if any. Cached for the
    /// standard window; a miss reads the store.
    pub async fn get_active_subscription(
        &self,
        recipient_id: i64,
    ) -> LeadFlowResult<Option<Subscription>> {
        self.cache
            .get_or_compute(
                &subscription_key(recipient_id),
                CacheTtl::Standard,
                || async {
                    self.store.with_conn(|conn| {
                        let sub = conn
                            .query_row(
                                &format!(
                                    "SELECT {} FROM subscriptions \
                                     WHERE recipient_id = ?1 AND is_active = 1 AND expires_at > ?2 \
                                     ORDER BY id DESC LIMIT 1",
                                    SUBSCRIPTION_COLUMNS
                                ),
                                params![recipient_id, now_ms()],
                                rows::subscription,
                            )
                            .optional()?;
                        Ok(sub)
                    })
                },
            )
            .await
    }

    /// Activate a plan for a recipient. Any previous active subscription
    /// is deactivated in the same transaction, upholding the one-active-
    /// subscription invariant.
    pub async fn create_subscription(
        &self,
        recipient_id: i64,
        tier: PlanTier,
        payment_ref: Option<String>,
    ) -> LeadFlowResult<Subscription> {
        let plan = self
            .config
            .catalog
            .plan(tier)
            .ok_or_else(|| {
                LeadFlowError::not_found(format!("plan {} not in catalog", tier.as_str()))
            })?
            .clone();

        let subscription = self
            .store
            .with_transaction(|tx| {
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM recipients WHERE id = ?1",
                        params![recipient_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                if exists.is_none() {
                    return Err(LeadFlowError::not_found(format!(
                        "recipient {}",
                        recipient_id
                    )));
                }

                let now = now_ms();
                tx.execute(
                    "UPDATE subscriptions SET is_active = 0 \
                     WHERE recipient_id = ?1 AND is_active = 1",
                    params![recipient_id],
                )?;
                tx.execute(
                    "INSERT INTO subscriptions \
                     (recipient_id, plan, price, starts_at, expires_at, is_active, payment_ref, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?4)",
                    params![
                        recipient_id,
                        plan.tier.as_str(),
                        plan.price,
                        now,
                        now + days_to_ms(plan.duration_days),
                        payment_ref,
                    ],
                )?;
                tx.execute(
                    "UPDATE recipients SET is_paid = 1 WHERE id = ?1",
                    params![recipient_id],
                )?;
                let id = tx.last_insert_rowid();
                let sub = tx.query_row(
                    &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLUMNS),
                    params![id],
                    rows::subscription,
                )?;
                Ok(sub)
            })
            .await?;

        self.invalidate_recipient(recipient_id).await;
        Ok(subscription)
    }

    /// Deactivate every subscription whose expiry has passed. Safe to run
    /// repeatedly; a second pass finds nothing. Returns how many rows were
    /// swept.
    pub async fn sweep_expired(&self) -> LeadFlowResult<u32> {
        let swept: Vec<i64> = self
            .store
            .with_transaction(|tx| {
                let now = now_ms();
                let mut stmt = tx.prepare(
                    "SELECT recipient_id FROM subscriptions \
                     WHERE is_active = 1 AND expires_at <= ?1",
                )?;
                let ids = stmt
                    .query_map(params![now], |r| r.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                tx.execute(
                    "UPDATE subscriptions SET is_active = 0 \
                     WHERE is_active = 1 AND expires_at <= ?1",
                    params![now],
                )?;
                Ok(ids)
            })
            .await?;

        for recipient_id in &swept {
            self.invalidate_recipient(*recipient_id).await;
        }
        if !swept.is_empty() {
            log::info!("swept {} expired subscriptions", swept.len());
        }
        Ok(swept.len() as u32)
    }

    /// Distributions counted against the current calendar-month window.
    /// Always derived from the distribution rows, never a stored counter.
    pub fn monthly_usage(&self, recipient_id: i64) -> LeadFlowResult<u32> {
        self.store.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM distributions \
                 WHERE recipient_id = ?1 AND sent_at >= ?2",
                params![recipient_id, month_start_ms(now_ms())],
                |r| r.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Whether the recipient can take one more lead this month. Cached on
    /// the short quota window; the rotator re-checks inside its insert
    /// transaction, so a stale true here is harmless.
    pub async fn quota_remaining(&self, recipient_id: i64) -> LeadFlowResult<bool> {
        self.cache
            .get_or_compute(&quota_key(recipient_id), CacheTtl::QuotaCheck, || async {
                let Some(sub) = self.get_active_subscription(recipient_id).await? else {
                    return Ok(false);
                };
                let Some(plan) = self.config.catalog.plan(sub.plan) else {
                    return Ok(false);
                };
                match plan.monthly_quota {
                    None => Ok(true),
                    Some(quota) => Ok(self.monthly_usage(recipient_id)? < quota),
                }
            })
            .await
    }

    /// Aggregate active-subscription counters, cached under the stats key
    /// family so writes can blow the whole family away at once.
    pub async fn stats(&self) -> LeadFlowResult<SubscriptionStats> {
        self.cache
            .get_or_compute("subscription:stats:general", CacheTtl::Standard, || async {
                self.store.with_conn(|conn| {
                    let now = now_ms();
                    let mut stmt = conn.prepare(
                        "SELECT plan, COUNT(*) FROM subscriptions \
                         WHERE is_active = 1 AND expires_at > ?1 GROUP BY plan",
                    )?;
                    let mut by_plan: HashMap<String, u32> = HashMap::new();
                    let mut active_total = 0u32;
                    let entries = stmt.query_map(params![now], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
                    })?;
                    for entry in entries {
                        let (plan, count) = entry?;
                        active_total += count as u32;
                        by_plan.insert(plan, count as u32);
                    }
                    Ok(SubscriptionStats {
                        active_total,
                        by_plan,
                        updated_at: now,
                    })
                })
            })
            .await
    }

    async fn invalidate_recipient(&self, recipient_id: i64) {
        self.cache.delete(&subscription_key(recipient_id)).await;
        self.cache.delete(&quota_key(recipient_id)).await;
        self.cache.invalidate("subscription:stats:*").await;
        self.cache.invalidate("eligibility:*").await;
    }
}

// Transaction-scoped reads used by the rotator for its final quota and
// entitlement re-check. These see the same snapshot as the insert.

pub(crate) fn active_subscription_tx(
    tx: &Transaction<'_>,
    recipient_id: i64,
    now: i64,
) -> LeadFlowResult<Option<Subscription>> {
    let sub = tx
        .query_row(
            &format!(
                "SELECT {} FROM subscriptions \
                 WHERE recipient_id = ?1 AND is_active = 1 AND expires_at > ?2 \
                 ORDER BY id DESC LIMIT 1",
                SUBSCRIPTION_COLUMNS
            ),
            params![recipient_id, now],
            rows::subscription,
        )
        .optional()?;
    Ok(sub)
}

pub(crate) fn monthly_usage_tx(
    tx: &Transaction<'_>,
    recipient_id: i64,
    now: i64,
) -> LeadFlowResult<u32> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM distributions \
         WHERE recipient_id = ?1 AND sent_at >= ?2",
        params![recipient_id, month_start_ms(now)],
        |r| r.get(0),
    )?;
    Ok(count as u32)
}
