// src/lib.rs
// Lead distribution and entitlement engine.
//
// Inbound leads are deduplicated, persisted, and delivered to subscribed
// recipients under monthly quotas, tier delivery delays and fairness
// rotation. A read-through cache fronts the relational store; every
// write invalidates the affected keys so reads never serve stale
// entitlement decisions for long, and the rotator re-checks quotas
// inside its insert transaction so they are never oversold at all.

pub mod config;
pub mod services;
pub mod types;
pub mod utils;

use std::sync::Arc;

pub use crate::config::{EngineConfig, Plan, PlanCatalog};
pub use crate::services::core::distribution::{
    DistributionConfig, DistributionFailure, DistributionReport, DistributionService,
    EligibilityService, LeadService, RotationMode,
};
pub use crate::services::core::entitlement::{RecipientService, SubscriptionService};
pub use crate::services::core::infrastructure::{
    CacheBackend, CacheManager, CacheTtl, MemoryCache, PersistenceGateway, RetryPolicy, Store,
};
pub use crate::services::core::maintenance::{MaintenanceService, MaintenanceSummary, Notifier};
pub use crate::services::core::settings::{SettingEntry, SettingsService};
pub use crate::types::{
    Distribution, Lead, LeadStatus, NewLead, NewRecipient, NotificationEvent, NotificationKind,
    PlanTier, Recipient, Subscription, SubscriptionStats,
};
pub use crate::utils::{LeadFlowError, LeadFlowResult};

use crate::services::core::distribution::demo::generate_demo_lead;

/// Engine facade. Builds the store and cache once and injects the same
/// handles into every service, so all of them observe one consistent
/// world.
#[derive(Clone)]
pub struct LeadEngine {
    config: Arc<EngineConfig>,
    store: Store,
    cache: CacheManager,
    leads: LeadService,
    recipients: RecipientService,
    subscriptions: SubscriptionService,
    eligibility: EligibilityService,
    distribution: DistributionService,
    settings: SettingsService,
}

impl LeadEngine {
    pub fn new(
        store: Store,
        backend: Arc<dyn CacheBackend>,
        config: EngineConfig,
        dist_config: DistributionConfig,
    ) -> Self {
        let config = Arc::new(config);
        let cache = CacheManager::new(backend);
        let gateway = PersistenceGateway::new(
            store.clone(),
            config.dedup_window_secs,
            config.dedup_cleanup_threshold,
        );
        let leads = LeadService::new(gateway, config.clone());
        let recipients = RecipientService::new(store.clone(), cache.clone());
        let subscriptions = SubscriptionService::new(store.clone(), cache.clone(), config.clone());
        let eligibility =
            EligibilityService::new(store.clone(), cache.clone(), subscriptions.clone());
        let distribution = DistributionService::new(
            store.clone(),
            cache.clone(),
            config.clone(),
            dist_config,
            subscriptions.clone(),
            eligibility.clone(),
            leads.clone(),
        );
        let settings = SettingsService::new(store.clone(), cache.clone());

        Self {
            config,
            store,
            cache,
            leads,
            recipients,
            subscriptions,
            eligibility,
            distribution,
            settings,
        }
    }

    /// In-process engine over an in-memory store and cache.
    pub fn in_memory(config: EngineConfig) -> LeadFlowResult<Self> {
        let store = Store::open_in_memory()?;
        Ok(Self::new(
            store,
            Arc::new(MemoryCache::new()),
            config,
            DistributionConfig::default(),
        ))
    }

    /// Persist an inbound lead; `None` when the origin event is a
    /// duplicate within the suppression window.
    pub async fn ingest_lead(&self, new: NewLead) -> LeadFlowResult<Option<Lead>> {
        self.leads.ingest(new).await
    }

    /// Deliver a lead to its rotated target group.
    pub async fn distribute_lead(
        &self,
        lead: &Lead,
        include_demo: bool,
    ) -> LeadFlowResult<DistributionReport> {
        self.distribution.distribute_lead(lead, include_demo).await
    }

    /// Activate a plan for a recipient, replacing any current one.
    pub async fn activate_subscription(
        &self,
        recipient_id: i64,
        tier: PlanTier,
        payment_ref: Option<String>,
    ) -> LeadFlowResult<Subscription> {
        self.subscriptions
            .create_subscription(recipient_id, tier, payment_ref)
            .await
    }

    /// Generate and ingest one synthetic lead for demo accounts. `None`
    /// outside working hours. Distribute it with `include_demo = true`.
    pub async fn create_demo_lead(&self) -> LeadFlowResult<Option<Lead>> {
        match generate_demo_lead(&self.config) {
            Some(new) => self.leads.ingest(new).await,
            None => Ok(None),
        }
    }

    /// Maintenance jobs bound to a delivery transport.
    pub fn maintenance(&self, notifier: Box<dyn Notifier>) -> MaintenanceService {
        MaintenanceService::new(
            self.store.clone(),
            self.config.clone(),
            self.subscriptions.clone(),
            self.settings.clone(),
            notifier,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn leads(&self) -> &LeadService {
        &self.leads
    }

    pub fn recipients(&self) -> &RecipientService {
        &self.recipients
    }

    pub fn subscriptions(&self) -> &SubscriptionService {
        &self.subscriptions
    }

    pub fn eligibility(&self) -> &EligibilityService {
        &self.eligibility
    }

    pub fn distribution(&self) -> &DistributionService {
        &self.distribution
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }
}
