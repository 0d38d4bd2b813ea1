// src/services/core/distribution/rotator.rs
// Delivery engine. Picks the target group for a lead via fairness
// rotation, then writes one distribution row per recipient, each in its
// own transaction with the entitlement re-checked under the same
// snapshot. A failure for one recipient never takes down the batch.

use std::sync::Arc;

use rusqlite::params;

use crate::config::EngineConfig;
use crate::services::core::distribution::demo::mask_phone;
use crate::services::core::distribution::eligibility::EligibilityService;
use crate::services::core::distribution::leads::LeadService;
use crate::services::core::entitlement::subscription::{
    active_subscription_tx, monthly_usage_tx, quota_key,
};
use crate::services::core::entitlement::SubscriptionService;
use crate::services::core::infrastructure::store::{rows, DISTRIBUTION_COLUMNS};
use crate::services::core::infrastructure::{CacheManager, Store};
use crate::types::{Distribution, Lead, PlanTier, Recipient};
use crate::utils::time::{hours_to_ms, now_ms};
use crate::utils::{is_constraint_violation, LeadFlowError, LeadFlowResult};

/// How the target group for a lead is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationMode {
    /// Buckets keyed by plan tier in catalog priority order; one bucket
    /// is served per lead, order flipping on the daily per-category count.
    #[default]
    Tiered,
    /// Fixed-size groups over the whole eligible list; one group is
    /// served per lead, order flipping on the daily total count, with
    /// delays staggered inside the group.
    Chunked,
}

#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub mode: RotationMode,
    /// Chunk size for `Chunked` mode.
    pub group_size: usize,
    /// Delay step between chunks, in hours.
    pub interval_hours: f64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            mode: RotationMode::Tiered,
            group_size: 3,
            interval_hours: 3.0,
        }
    }
}

/// One recipient the batch could not serve. `AlreadyDistributed` and
/// `QuotaExceeded` entries are informational; the rest indicate real
/// faults.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionFailure {
    pub recipient_id: i64,
    pub error: LeadFlowError,
}

/// Outcome of one delivery batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistributionReport {
    pub created: Vec<Distribution>,
    pub failures: Vec<DistributionFailure>,
}

#[derive(Clone)]
pub struct DistributionService {
    store: Store,
    cache: CacheManager,
    config: Arc<EngineConfig>,
    dist_config: DistributionConfig,
    subscriptions: SubscriptionService,
    eligibility: EligibilityService,
    leads: LeadService,
}

impl DistributionService {
    pub fn new(
        store: Store,
        cache: CacheManager,
        config: Arc<EngineConfig>,
        dist_config: DistributionConfig,
        subscriptions: SubscriptionService,
        eligibility: EligibilityService,
        leads: LeadService,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            dist_config,
            subscriptions,
            eligibility,
            leads,
        }
    }

    /// Deliver a lead to its rotated target group. Per-recipient errors
    /// land in the report; only a storage outage aborts the remainder of
    /// the batch.
    pub async fn distribute_lead(
        &self,
        lead: &Lead,
        include_demo: bool,
    ) -> LeadFlowResult<DistributionReport> {
        let eligible = self
            .eligibility
            .find_eligible(&lead.category, &lead.city, &[], include_demo)
            .await?;
        if eligible.is_empty() {
            log::info!("lead {}: no eligible recipients", lead.id);
            return Ok(DistributionReport::default());
        }

        let targets = match self.dist_config.mode {
            RotationMode::Tiered => self.tiered_targets(lead, eligible).await?,
            RotationMode::Chunked => self.chunked_targets(eligible)?,
        };

        let mut report = DistributionReport::default();
        for (recipient, delay_override) in targets {
            match self
                .create_distribution(lead.id, recipient.id, delay_override)
                .await
            {
                Ok(distribution) => report.created.push(distribution),
                Err(e) if e.is_transient() => {
                    log::error!(
                        "lead {}: storage unavailable at recipient {}, aborting batch: {}",
                        lead.id,
                        recipient.id,
                        e
                    );
                    report.failures.push(DistributionFailure {
                        recipient_id: recipient.id,
                        error: e,
                    });
                    break;
                }
                Err(e) => {
                    log::warn!("lead {}: skipped recipient {}: {}", lead.id, recipient.id, e);
                    report.failures.push(DistributionFailure {
                        recipient_id: recipient.id,
                        error: e,
                    });
                }
            }
        }

        log::info!(
            "lead {}: distributed to {} recipients ({} skipped)",
            lead.id,
            report.created.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Tiered mode: bucket the eligible list by plan tier in catalog
    /// priority order, flip the order on odd daily cycles, serve the
    /// first bucket. An empty target bucket means an empty batch.
    async fn tiered_targets(
        &self,
        lead: &Lead,
        eligible: Vec<Recipient>,
    ) -> LeadFlowResult<Vec<(Recipient, Option<f64>)>> {
        let mut buckets: Vec<(PlanTier, Vec<Recipient>)> = self
            .config
            .catalog
            .tiers()
            .into_iter()
            .map(|tier| (tier, Vec::new()))
            .collect();

        for recipient in eligible {
            let Some(sub) = self.subscriptions.get_active_subscription(recipient.id).await? else {
                continue;
            };
            if let Some((_, bucket)) = buckets.iter_mut().find(|(tier, _)| *tier == sub.plan) {
                bucket.push(recipient);
            }
        }

        let cycle = self.leads.count_today_for_category(&lead.category)? % 2;
        if cycle == 1 {
            buckets.reverse();
        }
        log::debug!(
            "lead {}: rotation cycle {}, serving {} bucket",
            lead.id,
            cycle,
            buckets
                .first()
                .map(|(tier, _)| tier.as_str())
                .unwrap_or("none")
        );

        Ok(buckets
            .into_iter()
            .next()
            .map(|(_, bucket)| bucket)
            .unwrap_or_default()
            .into_iter()
            .map(|r| (r, None))
            .collect())
    }

    /// Chunked mode: fixed-size groups over the whole list, group order
    /// flipping on the daily total count. Only the first group after the
    /// flip is served; inside it, each recipient is delayed one interval
    /// more than the previous.
    fn chunked_targets(
        &self,
        eligible: Vec<Recipient>,
    ) -> LeadFlowResult<Vec<(Recipient, Option<f64>)>> {
        let size = self.dist_config.group_size.max(1);
        let mut groups: Vec<Vec<Recipient>> = eligible
            .chunks(size)
            .map(|group| group.to_vec())
            .collect();
        if self.leads.count_today_total()? % 2 == 1 {
            groups.reverse();
        }

        let target = groups.into_iter().next().unwrap_or_default();
        Ok(target
            .into_iter()
            .enumerate()
            .map(|(position, recipient)| {
                (
                    recipient,
                    Some(position as f64 * self.dist_config.interval_hours),
                )
            })
            .collect())
    }

    /// Write one distribution row. Entitlement and quota are re-checked
    /// inside the transaction, so a stale cache can never oversell a
    /// quota. The unique index turns a concurrent duplicate into
    /// `AlreadyDistributed`.
    pub async fn create_distribution(
        &self,
        lead_id: i64,
        recipient_id: i64,
        delay_override: Option<f64>,
    ) -> LeadFlowResult<Distribution> {
        let catalog = &self.config.catalog;
        let distribution = self
            .store
            .with_transaction(|tx| {
                let now = now_ms();
                let sub = active_subscription_tx(tx, recipient_id, now)?.ok_or_else(|| {
                    LeadFlowError::not_found(format!(
                        "no active subscription for recipient {}",
                        recipient_id
                    ))
                })?;
                let plan = catalog.plan(sub.plan).ok_or_else(|| {
                    LeadFlowError::validation_error(format!(
                        "plan {} not in catalog",
                        sub.plan.as_str()
                    ))
                })?;
                if let Some(quota) = plan.monthly_quota {
                    if monthly_usage_tx(tx, recipient_id, now)? >= quota {
                        return Err(LeadFlowError::quota_exceeded(format!(
                            "recipient {} exhausted {} leads this month",
                            recipient_id, quota
                        )));
                    }
                }

                let delay_hours = delay_override.unwrap_or(plan.delay_hours);
                let sent_at = now + hours_to_ms(delay_hours);
                tx.execute(
                    "INSERT INTO distributions (lead_id, recipient_id, sent_at, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![lead_id, recipient_id, sent_at, now],
                )
                .map_err(|e| {
                    if is_constraint_violation(&e) {
                        LeadFlowError::already_distributed(lead_id, recipient_id)
                    } else {
                        e.into()
                    }
                })?;

                let id = tx.last_insert_rowid();
                let distribution = tx.query_row(
                    &format!(
                        "SELECT {} FROM distributions WHERE id = ?1",
                        DISTRIBUTION_COLUMNS
                    ),
                    params![id],
                    rows::distribution,
                )?;
                Ok(distribution)
            })
            .await?;

        self.cache.delete(&quota_key(recipient_id)).await;
        self.cache.invalidate("eligibility:*").await;
        Ok(distribution)
    }

    /// Deliveries whose visibility time has passed and that have not been
    /// acknowledged yet.
    pub fn pending_distributions(&self) -> LeadFlowResult<Vec<Distribution>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM distributions \
                 WHERE sent_at <= ?1 AND viewed_at IS NULL ORDER BY sent_at ASC",
                DISTRIBUTION_COLUMNS
            ))?;
            let pending = stmt
                .query_map(params![now_ms()], rows::distribution)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pending)
        })
    }

    /// Acknowledge a delivery. The timestamp is written once; repeated
    /// calls return the original acknowledgement.
    pub async fn mark_viewed(&self, distribution_id: i64) -> LeadFlowResult<Distribution> {
        self.store
            .with_transaction(|tx| {
                let changed = tx.execute(
                    "UPDATE distributions SET viewed_at = ?1 \
                     WHERE id = ?2 AND viewed_at IS NULL",
                    params![now_ms(), distribution_id],
                )?;
                let distribution = tx
                    .query_row(
                        &format!(
                            "SELECT {} FROM distributions WHERE id = ?1",
                            DISTRIBUTION_COLUMNS
                        ),
                        params![distribution_id],
                        rows::distribution,
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => LeadFlowError::not_found(
                            format!("distribution {}", distribution_id),
                        ),
                        other => other.into(),
                    })?;
                if changed == 0 {
                    log::debug!("distribution {} already acknowledged", distribution_id);
                }
                Ok(distribution)
            })
            .await
    }

    /// Render a lead for delivery. Unpaid recipients see a masked phone
    /// number and an upgrade notice.
    pub fn format_lead_message(&self, lead: &Lead, recipient: &Recipient) -> String {
        let mut out = String::new();
        out.push_str("New lead\n");
        if let Some(name) = &lead.name {
            out.push_str(&format!("Name: {}\n", name));
        }
        if let Some(phone) = &lead.phone {
            if recipient.is_paid {
                out.push_str(&format!("Phone: {}\n", phone));
            } else {
                out.push_str(&format!("Phone: {}\n", mask_phone(phone)));
            }
        }
        out.push_str(&format!("Category: {}\n", lead.category));
        out.push_str(&format!("City: {}\n", lead.city));
        if let Some(area) = lead.area {
            out.push_str(&format!("Area: {} m2\n", area));
        }
        if !lead.description.is_empty() {
            out.push_str(&format!("Details: {}\n", lead.description));
        }
        if !recipient.is_paid {
            out.push_str("\nActivate a plan to see full contact details.");
        }
        out
    }
}
