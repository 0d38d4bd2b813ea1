// src/config.rs
// Engine configuration: plan catalog, interest taxonomy, tunables.

use serde::{Deserialize, Serialize};

use crate::types::PlanTier;

/// A purchasable subscription plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: String,
    /// Price in whole currency units.
    pub price: i64,
    pub duration_days: i64,
    /// `None` means unbounded monthly volume.
    pub monthly_quota: Option<u32>,
    /// Delivery delay applied to each distribution for this tier.
    pub delay_hours: f64,
}

/// Ordered plan catalog. Iteration order is delivery priority: the first
/// plan's bucket is served first on even rotation cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanCatalog {
    pub plans: Vec<Plan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                Plan {
                    tier: PlanTier::Premium,
                    name: "Premium".to_string(),
                    price: 4990,
                    duration_days: 30,
                    monthly_quota: None,
                    delay_hours: 0.0,
                },
                Plan {
                    tier: PlanTier::Pro,
                    name: "Pro".to_string(),
                    price: 1990,
                    duration_days: 30,
                    monthly_quota: Some(100),
                    delay_hours: 0.5,
                },
                Plan {
                    tier: PlanTier::Basic,
                    name: "Basic".to_string(),
                    price: 990,
                    duration_days: 30,
                    monthly_quota: Some(30),
                    delay_hours: 1.0,
                },
            ],
        }
    }
}

impl PlanCatalog {
    pub fn plan(&self, tier: PlanTier) -> Option<&Plan> {
        self.plans.iter().find(|p| p.tier == tier)
    }

    /// Tiers in delivery priority order.
    pub fn tiers(&self) -> Vec<PlanTier> {
        self.plans.iter().map(|p| p.tier).collect()
    }
}

/// Top-level engine configuration, injected once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub catalog: PlanCatalog,
    /// Known work categories; lead ingestion validates against these.
    pub categories: Vec<String>,
    pub cities: Vec<String>,
    /// Suppression window for repeated origin events.
    pub dedup_window_secs: i64,
    /// Dedup ledger size that triggers a prune pass.
    pub dedup_cleanup_threshold: usize,
    /// Fraction of the monthly quota that triggers a usage warning.
    pub quota_warning_threshold: f64,
    /// How many days before expiry the renewal warning fires.
    pub expiry_warning_days: i64,
    /// Working-hours gate for synthetic demo traffic, UTC hours.
    pub working_hours: (u32, u32),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog: PlanCatalog::default(),
            categories: default_categories(),
            cities: default_cities(),
            dedup_window_secs: 30,
            dedup_cleanup_threshold: 1000,
            quota_warning_threshold: 0.8,
            expiry_warning_days: 3,
            working_hours: (9, 21),
        }
    }
}

pub fn default_categories() -> Vec<String> {
    [
        "apartment_renovation",
        "bathroom_renovation",
        "kitchen_renovation",
        "electrical",
        "plumbing",
        "flooring",
        "painting",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_cities() -> Vec<String> {
    ["moscow", "saint_petersburg", "kazan", "novosibirsk", "ekaterinburg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
