// src/services/core/maintenance/jobs.rs
// Scheduled upkeep: expiry sweep, quota usage warnings, renewal
// warnings. Jobs are idempotent at the storage level; warning emission is
// at-least-once and delivery collaborators dedupe on (recipient_id, kind).

use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::services::core::entitlement::SubscriptionService;
use crate::services::core::infrastructure::Store;
use crate::services::core::settings::runtime_settings::{
    EXPIRY_WARNING_DAYS_KEY, QUOTA_WARNING_THRESHOLD_KEY,
};
use crate::services::core::settings::SettingsService;
use crate::types::{NotificationEvent, NotificationKind, PlanTier};
use crate::utils::time::{days_to_ms, format_date, now_ms};
use crate::utils::LeadFlowResult;

/// Outbound delivery seam. The engine emits events; transports live
/// outside the crate.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> LeadFlowResult<()>;
    fn clone_box(&self) -> Box<dyn Notifier>;
}

impl Clone for Box<dyn Notifier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub swept: u32,
    pub quota_warnings: u32,
    pub expiry_warnings: u32,
}

#[derive(Clone)]
pub struct MaintenanceService {
    store: Store,
    config: Arc<EngineConfig>,
    subscriptions: SubscriptionService,
    settings: SettingsService,
    notifier: Box<dyn Notifier>,
}

struct ActiveEntitlement {
    recipient_id: i64,
    external_id: i64,
    plan: PlanTier,
    expires_at: i64,
}

impl MaintenanceService {
    pub fn new(
        store: Store,
        config: Arc<EngineConfig>,
        subscriptions: SubscriptionService,
        settings: SettingsService,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            config,
            subscriptions,
            settings,
            notifier,
        }
    }

    /// One full upkeep cycle: sweep first so warnings never target
    /// entitlements that just lapsed.
    pub async fn run_cycle(&self) -> LeadFlowResult<MaintenanceSummary> {
        let swept = self.subscriptions.sweep_expired().await?;
        let quota_warnings = self.send_quota_warnings().await?;
        let expiry_warnings = self.send_expiry_warnings().await?;
        Ok(MaintenanceSummary {
            swept,
            quota_warnings,
            expiry_warnings,
        })
    }

    pub async fn sweep_expired_subscriptions(&self) -> LeadFlowResult<u32> {
        self.subscriptions.sweep_expired().await
    }

    /// Warn recipients whose monthly usage crossed the warning threshold.
    /// The threshold is the persisted setting when present, the config
    /// default otherwise. Returns how many warnings were emitted.
    pub async fn send_quota_warnings(&self) -> LeadFlowResult<u32> {
        let threshold: f64 = self
            .settings
            .get(QUOTA_WARNING_THRESHOLD_KEY)
            .await?
            .unwrap_or(self.config.quota_warning_threshold);

        let mut emitted = 0u32;
        for entitlement in self.active_entitlements(None)? {
            let Some(plan) = self.config.catalog.plan(entitlement.plan) else {
                continue;
            };
            // unbounded plans have nothing to warn about
            let Some(quota) = plan.monthly_quota else {
                continue;
            };
            let usage = self.subscriptions.monthly_usage(entitlement.recipient_id)?;
            if (usage as f64) < (quota as f64) * threshold {
                continue;
            }

            let remaining = quota.saturating_sub(usage);
            let event = NotificationEvent {
                recipient_id: entitlement.recipient_id,
                external_id: entitlement.external_id,
                kind: NotificationKind::QuotaWarning,
                message: format!(
                    "You have used {} of {} leads this month ({} remaining). \
                     Consider upgrading your plan.",
                    usage, quota, remaining
                ),
            };
            match self.notifier.notify(&event).await {
                Ok(()) => emitted += 1,
                Err(e) => log::error!(
                    "quota warning for recipient {} failed: {}",
                    entitlement.recipient_id,
                    e
                ),
            }
        }
        Ok(emitted)
    }

    /// Warn recipients whose subscription expires within the warning
    /// window. Returns how many warnings were emitted.
    pub async fn send_expiry_warnings(&self) -> LeadFlowResult<u32> {
        let days: i64 = self
            .settings
            .get(EXPIRY_WARNING_DAYS_KEY)
            .await?
            .unwrap_or(self.config.expiry_warning_days);
        let cutoff = now_ms() + days_to_ms(days);

        let mut emitted = 0u32;
        for entitlement in self.active_entitlements(Some(cutoff))? {
            let Some(plan) = self.config.catalog.plan(entitlement.plan) else {
                continue;
            };
            let event = NotificationEvent {
                recipient_id: entitlement.recipient_id,
                external_id: entitlement.external_id,
                kind: NotificationKind::ExpiryWarning,
                message: format!(
                    "Your {} subscription expires on {}. Renew to keep receiving leads.",
                    plan.name,
                    format_date(entitlement.expires_at)
                ),
            };
            match self.notifier.notify(&event).await {
                Ok(()) => emitted += 1,
                Err(e) => log::error!(
                    "expiry warning for recipient {} failed: {}",
                    entitlement.recipient_id,
                    e
                ),
            }
        }
        Ok(emitted)
    }

    /// Valid entitlements on active, non-demo recipients. With a cutoff,
    /// only those expiring before it.
    fn active_entitlements(&self, expiring_before: Option<i64>) -> LeadFlowResult<Vec<ActiveEntitlement>> {
        self.store.with_conn(|conn| {
            let now = now_ms();
            let cutoff = expiring_before.unwrap_or(i64::MAX);
            let mut stmt = conn.prepare(
                "SELECT r.id, r.external_id, s.plan, s.expires_at \
                 FROM subscriptions s JOIN recipients r ON r.id = s.recipient_id \
                 WHERE s.is_active = 1 AND s.expires_at > ?1 AND s.expires_at <= ?2 \
                   AND r.is_active = 1 AND r.is_demo = 0 \
                 ORDER BY r.id ASC",
            )?;
            let entitlements = stmt
                .query_map(params![now, cutoff], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(entitlements
                .into_iter()
                .filter_map(|(recipient_id, external_id, plan, expires_at)| {
                    PlanTier::parse(&plan).map(|plan| ActiveEntitlement {
                        recipient_id,
                        external_id,
                        plan,
                        expires_at,
                    })
                })
                .collect())
        })
    }
}
