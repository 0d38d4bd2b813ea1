// tests/unit/core/distribution/rotation_test.rs
// Fairness rotation: tiered bucket flipping, the empty-bucket edge,
// chunked positional delays, and partial-failure reporting when a stale
// quota cache lets an exhausted recipient into the target group.

use leadflow::{
    DistributionConfig, EngineConfig, LeadEngine, LeadFlowError, MemoryCache, NewLead,
    NewRecipient, PlanTier, RotationMode, Store,
};
use rusqlite::params;
use std::sync::Arc;

fn tiered_engine() -> LeadEngine {
    LeadEngine::in_memory(EngineConfig::default()).unwrap()
}

fn chunked_engine(group_size: usize, interval_hours: f64) -> LeadEngine {
    LeadEngine::new(
        Store::open_in_memory().unwrap(),
        Arc::new(MemoryCache::new()),
        EngineConfig::default(),
        DistributionConfig {
            mode: RotationMode::Chunked,
            group_size,
            interval_hours,
        },
    )
}

fn new_lead(message_id: i64) -> NewLead {
    NewLead {
        source_chat_id: -1001,
        source_message_id: message_id,
        name: None,
        phone: None,
        category: "plumbing".to_string(),
        city: "moscow".to_string(),
        description: "pipes".to_string(),
        area: None,
    }
}

async fn add_recipient(engine: &LeadEngine, external_id: i64, tier: PlanTier) -> i64 {
    let recipient = engine
        .recipients()
        .upsert(NewRecipient {
            external_id,
            username: None,
            full_name: None,
            categories: vec!["plumbing".to_string()],
            cities: vec!["moscow".to_string()],
            is_paid: true,
            is_demo: false,
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
                    params![-3000 - recipient_id, i as i64, now],
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

#[tokio::test]
async fn consecutive_cycles_flip_the_served_tier() {
    let engine = tiered_engine();
    let premium = add_recipient(&engine, 1, PlanTier::Premium).await;
    let basic = add_recipient(&engine, 2, PlanTier::Basic).await;

    // first lead of the day: odd cycle, basic bucket is served
    let lead1 = engine.ingest_lead(new_lead(1)).await.unwrap().unwrap();
    let report1 = engine.distribute_lead(&lead1, false).await.unwrap();
    assert_eq!(
        report1.created.iter().map(|d| d.recipient_id).collect::<Vec<_>>(),
        vec![basic]
    );

    // second lead: even cycle, premium bucket is served
    let lead2 = engine.ingest_lead(new_lead(2)).await.unwrap().unwrap();
    let report2 = engine.distribute_lead(&lead2, false).await.unwrap();
    assert_eq!(
        report2.created.iter().map(|d| d.recipient_id).collect::<Vec<_>>(),
        vec![premium]
    );
}

#[tokio::test]
async fn empty_target_bucket_yields_empty_batch() {
    let engine = tiered_engine();
    let premium = add_recipient(&engine, 3, PlanTier::Premium).await;

    // odd cycle serves the basic bucket, which has nobody in it; the
    // bucket is not skipped in favor of a populated one
    let lead1 = engine.ingest_lead(new_lead(1)).await.unwrap().unwrap();
    let report1 = engine.distribute_lead(&lead1, false).await.unwrap();
    assert!(report1.created.is_empty());
    assert!(report1.failures.is_empty());

    let lead2 = engine.ingest_lead(new_lead(2)).await.unwrap().unwrap();
    let report2 = engine.distribute_lead(&lead2, false).await.unwrap();
    assert_eq!(report2.created.len(), 1);
    assert_eq!(report2.created[0].recipient_id, premium);
}

#[tokio::test]
async fn chunked_mode_serves_one_group_with_staggered_delays() {
    let engine = chunked_engine(2, 3.0);
    let mut ids = Vec::new();
    for ext in 10..14 {
        ids.push(add_recipient(&engine, ext, PlanTier::Premium).await);
    }

    const THREE_HOURS_MS: i64 = 10_800_000;
    let delay_of = |report: &leadflow::DistributionReport, recipient_id: i64| {
        let d = report
            .created
            .iter()
            .find(|d| d.recipient_id == recipient_id)
            .unwrap();
        d.sent_at - d.created_at
    };

    // one lead today: odd cycle, group order is reversed and only the
    // trailing group is served, staggered inside the group
    let lead1 = engine.ingest_lead(new_lead(1)).await.unwrap().unwrap();
    let report1 = engine.distribute_lead(&lead1, false).await.unwrap();
    assert_eq!(report1.created.len(), 2);
    let mut served: Vec<i64> = report1.created.iter().map(|d| d.recipient_id).collect();
    served.sort();
    assert_eq!(served, vec![ids[2], ids[3]]);
    assert_eq!(delay_of(&report1, ids[2]), 0);
    assert_eq!(delay_of(&report1, ids[3]), THREE_HOURS_MS);

    // second lead: even cycle, the leading group's turn
    let lead2 = engine.ingest_lead(new_lead(2)).await.unwrap().unwrap();
    let report2 = engine.distribute_lead(&lead2, false).await.unwrap();
    assert_eq!(report2.created.len(), 2);
    let mut served: Vec<i64> = report2.created.iter().map(|d| d.recipient_id).collect();
    served.sort();
    assert_eq!(served, vec![ids[0], ids[1]]);
    assert_eq!(delay_of(&report2, ids[0]), 0);
    assert_eq!(delay_of(&report2, ids[1]), THREE_HOURS_MS);
}

#[tokio::test]
async fn stale_quota_cache_cannot_oversell_and_batch_continues() {
    let engine = tiered_engine();
    let exhausted = add_recipient(&engine, 20, PlanTier::Basic).await;
    let healthy = add_recipient(&engine, 21, PlanTier::Basic).await;

    // warm the quota cache while the recipient still has room, then
    // push them to the limit behind the cache's back
    assert!(engine.subscriptions().quota_remaining(exhausted).await.unwrap());
    seed_usage(&engine, exhausted, 30).await;

    // odd cycle serves the basic bucket holding both recipients; the
    // transactional re-check rejects the exhausted one and the batch
    // still serves the rest
    let lead = engine.ingest_lead(new_lead(1)).await.unwrap().unwrap();
    let report = engine.distribute_lead(&lead, false).await.unwrap();

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].recipient_id, healthy);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].recipient_id, exhausted);
    assert!(matches!(
        report.failures[0].error,
        LeadFlowError::QuotaExceeded(_)
    ));
}
