// tests/unit/core/maintenance/jobs_test.rs
// Maintenance jobs: quota warnings against the configured and the
// persisted threshold, expiry warnings inside the renewal window, and
// the full upkeep cycle.

use async_trait::async_trait;
use leadflow::{
    EngineConfig, LeadEngine, LeadFlowResult, MaintenanceService, NewRecipient, NotificationEvent,
    NotificationKind, Notifier, PlanTier,
};
use rusqlite::params;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct CollectingNotifier {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl CollectingNotifier {
    fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> LeadFlowResult<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Notifier> {
        Box::new(self.clone())
    }
}

fn fixture() -> (LeadEngine, MaintenanceService, CollectingNotifier) {
    let engine = LeadEngine::in_memory(EngineConfig::default()).unwrap();
    let notifier = CollectingNotifier::default();
    let maintenance = engine.maintenance(notifier.clone_box());
    (engine, maintenance, notifier)
}

async fn add_recipient(engine: &LeadEngine, external_id: i64, tier: PlanTier, demo: bool) -> i64 {
    let recipient = engine
        .recipients()
        .upsert(NewRecipient {
            external_id,
            username: None,
            full_name: None,
            categories: vec!["plumbing".to_string()],
            cities: vec!["moscow".to_string()],
            is_paid: true,
            is_demo: demo,
        })
        .await
        .unwrap();
    engine
        .activate_subscription(recipient.id, tier, None)
        .await
        .unwrap();
    recipient.id
}

async fn seed_usage(engine: &LeadEngine, recipient_id: i64, n: u32) {
    let now = chrono::Utc::now().timestamp_millis();
    engine
        .store()
        .with_transaction(|tx| {
            for i in 0..n {
                tx.execute(
                    "INSERT INTO leads (source_chat_id, source_message_id, category, city, created_at) \
                     VALUES (?1, ?2, 'electrical', 'moscow', ?3)",
                    params![-4000 - recipient_id, i as i64, now],
                )?;
                let lead_id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO distributions (lead_id, recipient_id, sent_at, created_at) \
                     VALUES (?1, ?2, ?3, ?3)",
                    params![lead_id, recipient_id, now],
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();
}

async fn set_expiry(engine: &LeadEngine, recipient_id: i64, expires_at: i64) {
    engine
        .store()
        .with_transaction(|tx| {
            tx.execute(
                "UPDATE subscriptions SET expires_at = ?1 \
                 WHERE recipient_id = ?2 AND is_active = 1",
                params![expires_at, recipient_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    // direct SQL edits bypass the service layer, so drop the cached read
    engine
        .cache()
        .delete(&format!("subscription:recipient:{}", recipient_id))
        .await;
}

#[tokio::test]
async fn quota_warning_fires_at_the_default_threshold() {
    let (engine, maintenance, notifier) = fixture();
    let near_limit = add_recipient(&engine, 1, PlanTier::Basic, false).await;
    let below = add_recipient(&engine, 2, PlanTier::Basic, false).await;
    let unbounded = add_recipient(&engine, 3, PlanTier::Premium, false).await;

    seed_usage(&engine, near_limit, 24).await; // 24 >= 30 * 0.8
    seed_usage(&engine, below, 23).await;
    seed_usage(&engine, unbounded, 500).await;

    let emitted = maintenance.send_quota_warnings().await.unwrap();
    assert_eq!(emitted, 1);

    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].recipient_id, near_limit);
    assert_eq!(events[0].kind, NotificationKind::QuotaWarning);
    assert!(events[0].message.contains("24 of 30"));
}

#[tokio::test]
async fn persisted_threshold_overrides_the_default() {
    let (engine, maintenance, notifier) = fixture();
    let recipient = add_recipient(&engine, 4, PlanTier::Basic, false).await;
    seed_usage(&engine, recipient, 15).await;

    // 15 of 30 is below the 0.8 default
    assert_eq!(maintenance.send_quota_warnings().await.unwrap(), 0);

    engine
        .settings()
        .set("quota_warning_threshold", &0.5f64)
        .await
        .unwrap();
    assert_eq!(maintenance.send_quota_warnings().await.unwrap(), 1);
    assert_eq!(notifier.events().len(), 1);
}

#[tokio::test]
async fn expiry_warning_covers_only_the_renewal_window() {
    let (engine, maintenance, notifier) = fixture();
    let expiring = add_recipient(&engine, 5, PlanTier::Pro, false).await;
    let fresh = add_recipient(&engine, 6, PlanTier::Pro, false).await;

    let now = chrono::Utc::now().timestamp_millis();
    set_expiry(&engine, expiring, now + 2 * 86_400_000).await;
    let _ = fresh; // 30-day expiry, outside the 3-day window

    let emitted = maintenance.send_expiry_warnings().await.unwrap();
    assert_eq!(emitted, 1);

    let events = notifier.events();
    assert_eq!(events[0].recipient_id, expiring);
    assert_eq!(events[0].kind, NotificationKind::ExpiryWarning);
    assert!(events[0].message.contains("Pro"));
}

#[tokio::test]
async fn demo_recipients_never_receive_warnings() {
    let (engine, maintenance, notifier) = fixture();
    let demo = add_recipient(&engine, 7, PlanTier::Basic, true).await;
    seed_usage(&engine, demo, 30).await;
    let now = chrono::Utc::now().timestamp_millis();
    set_expiry(&engine, demo, now + 86_400_000).await;

    assert_eq!(maintenance.send_quota_warnings().await.unwrap(), 0);
    assert_eq!(maintenance.send_expiry_warnings().await.unwrap(), 0);
    assert!(notifier.events().is_empty());
}

#[tokio::test]
async fn run_cycle_sweeps_before_warning() {
    let (engine, maintenance, notifier) = fixture();
    let lapsed = add_recipient(&engine, 8, PlanTier::Basic, false).await;
    seed_usage(&engine, lapsed, 30).await;
    set_expiry(&engine, lapsed, 1).await;

    let summary = maintenance.run_cycle().await.unwrap();
    assert_eq!(summary.swept, 1);
    // the lapsed entitlement is gone before the warning pass runs
    assert_eq!(summary.quota_warnings, 0);
    assert_eq!(summary.expiry_warnings, 0);
    assert!(notifier.events().is_empty());

    // sweeping again finds nothing
    let summary = maintenance.run_cycle().await.unwrap();
    assert_eq!(summary.swept, 0);
}
