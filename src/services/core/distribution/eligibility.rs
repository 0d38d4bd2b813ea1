// src/services/core/distribution/eligibility.rs
// Candidate selection: active recipients whose interest sets cover the
// lead and whose entitlement still has room. Results are deterministic
// (id-ascending) so rotation order is reproducible, and cached per
// (category, city, exclusions) key.

use rusqlite::params;

use crate::services::core::entitlement::SubscriptionService;
use crate::services::core::infrastructure::store::{rows, RECIPIENT_COLUMNS};
use crate::services::core::infrastructure::{CacheManager, CacheTtl, Store};
use crate::types::Recipient;
use crate::utils::time::now_ms;
use crate::utils::LeadFlowResult;

#[derive(Clone)]
pub struct EligibilityService {
    store: Store,
    cache: CacheManager,
    subscriptions: SubscriptionService,
}

impl EligibilityService {
    pub fn new(store: Store, cache: CacheManager, subscriptions: SubscriptionService) -> Self {
        Self {
            store,
            cache,
            subscriptions,
        }
    }

    /// Recipients eligible for a lead in `category`/`city`, minus the
    /// explicit exclusions, ordered by ascending id. Demo recipients are
    /// exempt from the interest match when `include_demo` is set; those
    /// calls bypass the cache so synthetic traffic never pollutes it.
    pub async fn find_eligible(
        &self,
        category: &str,
        city: &str,
        exclude: &[i64],
        include_demo: bool,
    ) -> LeadFlowResult<Vec<Recipient>> {
        if include_demo {
            return self.compute(category, city, exclude, true).await;
        }

        let key = Self::cache_key(category, city, exclude);
        self.cache
            .get_or_compute(&key, CacheTtl::Standard, || {
                self.compute(category, city, exclude, false)
            })
            .await
    }

    fn cache_key(category: &str, city: &str, exclude: &[i64]) -> String {
        let exclusions = if exclude.is_empty() {
            "none".to_string()
        } else {
            exclude
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join("-")
        };
        format!("eligibility:{}:{}:{}", category, city, exclusions)
    }

    async fn compute(
        &self,
        category: &str,
        city: &str,
        exclude: &[i64],
        include_demo: bool,
    ) -> LeadFlowResult<Vec<Recipient>> {
        // active recipients holding a valid subscription, in id order
        let candidates: Vec<Recipient> = self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM recipients \
                 WHERE is_active = 1 AND EXISTS (\
                     SELECT 1 FROM subscriptions s \
                     WHERE s.recipient_id = recipients.id \
                       AND s.is_active = 1 AND s.expires_at > ?1) \
                 ORDER BY id ASC",
                RECIPIENT_COLUMNS
            ))?;
            let candidates = stmt
                .query_map(params![now_ms()], rows::recipient)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(candidates)
        })?;

        let mut eligible = Vec::new();
        for recipient in candidates {
            if exclude.contains(&recipient.id) {
                continue;
            }
            let interest_match = recipient.categories.iter().any(|c| c == category)
                && recipient.cities.iter().any(|c| c == city);
            if !interest_match && !(include_demo && recipient.is_demo) {
                continue;
            }
            if self.subscriptions.quota_remaining(recipient.id).await? {
                eligible.push(recipient);
            }
        }
        Ok(eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::services::core::entitlement::RecipientService;
    use crate::services::core::infrastructure::MemoryCache;
    use crate::types::{NewRecipient, PlanTier};
    use std::sync::Arc;

    struct Fixture {
        eligibility: EligibilityService,
        recipients: RecipientService,
        subs: SubscriptionService,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let cache = CacheManager::new(Arc::new(MemoryCache::new()));
        let config = Arc::new(EngineConfig::default());
        let subs = SubscriptionService::new(store.clone(), cache.clone(), config);
        Fixture {
            eligibility: EligibilityService::new(store.clone(), cache.clone(), subs.clone()),
            recipients: RecipientService::new(store, cache),
            subs,
        }
    }

    async fn add(fx: &Fixture, external_id: i64, category: &str, city: &str, demo: bool) -> i64 {
        let recipient = fx
            .recipients
            .upsert(NewRecipient {
                external_id,
                username: None,
                full_name: None,
                categories: vec![category.to_string()],
                cities: vec![city.to_string()],
                is_paid: false,
                is_demo: demo,
            })
            .await
            .unwrap();
        recipient.id
    }

    #[tokio::test]
    async fn filters_on_interest_and_subscription() {
        let fx = fixture();
        let matching = add(&fx, 700, "plumbing", "moscow", false).await;
        let wrong_city = add(&fx, 701, "plumbing", "kazan", false).await;
        let unsubscribed = add(&fx, 702, "plumbing", "moscow", false).await;

        fx.subs
            .create_subscription(matching, PlanTier::Basic, None)
            .await
            .unwrap();
        fx.subs
            .create_subscription(wrong_city, PlanTier::Basic, None)
            .await
            .unwrap();
        let _ = unsubscribed;

        let eligible = fx
            .eligibility
            .find_eligible("plumbing", "moscow", &[], false)
            .await
            .unwrap();
        assert_eq!(eligible.iter().map(|r| r.id).collect::<Vec<_>>(), vec![matching]);
    }

    #[tokio::test]
    async fn orders_by_id_and_honors_exclusions() {
        let fx = fixture();
        let mut ids = Vec::new();
        for ext in 710..714 {
            let id = add(&fx, ext, "plumbing", "moscow", false).await;
            fx.subs
                .create_subscription(id, PlanTier::Pro, None)
                .await
                .unwrap();
            ids.push(id);
        }

        let eligible = fx
            .eligibility
            .find_eligible("plumbing", "moscow", &[], false)
            .await
            .unwrap();
        let got: Vec<i64> = eligible.iter().map(|r| r.id).collect();
        assert_eq!(got, ids);

        let eligible = fx
            .eligibility
            .find_eligible("plumbing", "moscow", &[ids[1]], false)
            .await
            .unwrap();
        let got: Vec<i64> = eligible.iter().map(|r| r.id).collect();
        assert_eq!(got, vec![ids[0], ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn demo_recipients_only_with_flag() {
        let fx = fixture();
        let demo = add(&fx, 720, "painting", "kazan", true).await;
        fx.subs
            .create_subscription(demo, PlanTier::Premium, None)
            .await
            .unwrap();

        let without = fx
            .eligibility
            .find_eligible("plumbing", "moscow", &[], false)
            .await
            .unwrap();
        assert!(without.is_empty());

        let with = fx
            .eligibility
            .find_eligible("plumbing", "moscow", &[], true)
            .await
            .unwrap();
        assert_eq!(with.iter().map(|r| r.id).collect::<Vec<_>>(), vec![demo]);
    }
}
