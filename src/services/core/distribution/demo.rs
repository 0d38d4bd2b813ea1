// src/services/core/distribution/demo.rs
// Synthetic traffic for demo accounts, plus the phone masking shared
// with message formatting.

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::types::NewLead;
use crate::utils::time::{hour_of_day, now_ms};

const DEMO_NAMES: &[&str] = &[
    "Alexey", "Marina", "Sergey", "Olga", "Dmitry", "Elena", "Pavel", "Anna",
];

const DEMO_DESCRIPTIONS: &[&str] = &[
    "Need a full renovation quote",
    "Looking for someone to start next week",
    "Urgent, water damage repair",
    "Comparing offers, send your price",
    "Old flat, everything needs replacing",
];

/// Hide the middle digits of a phone number. Short strings are fully
/// masked rather than partially leaked.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() < 7 {
        return "*".repeat(chars.len().max(3));
    }
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i < 4 || i >= chars.len() - 2 {
            out.push(*c);
        } else {
            out.push('*');
        }
    }
    out
}

/// Demo traffic only flows during configured working hours (UTC).
pub fn is_working_hours(hour: u32, window: (u32, u32)) -> bool {
    window.0 <= hour && hour < window.1
}

/// Landline-style prefix for a city, mobile fallback otherwise.
fn phone_prefix(city: &str) -> &'static str {
    match city {
        "moscow" => "+7495",
        "saint_petersburg" => "+7812",
        "kazan" => "+7843",
        "novosibirsk" => "+7383",
        "ekaterinburg" => "+7343",
        _ => "+7900",
    }
}

/// Plausible work-area range for a category, in square meters.
fn area_range(category: &str) -> (f64, f64) {
    match category {
        "bathroom_renovation" => (3.0, 10.0),
        "kitchen_renovation" => (6.0, 18.0),
        "apartment_renovation" => (30.0, 120.0),
        _ => (5.0, 100.0),
    }
}

/// Build a randomized demo lead, or `None` outside working hours. The
/// source message id is derived from a fresh UUID so consecutive demo
/// leads never collide in the dedup ledger.
pub fn generate_demo_lead(config: &EngineConfig) -> Option<NewLead> {
    if !is_working_hours(hour_of_day(now_ms()), config.working_hours) {
        return None;
    }
    let mut rng = rand::thread_rng();

    let category = config
        .categories
        .choose(&mut rng)
        .cloned()
        .unwrap_or_else(|| "apartment_renovation".to_string());
    let city = config
        .cities
        .choose(&mut rng)
        .cloned()
        .unwrap_or_else(|| "moscow".to_string());
    let name = DEMO_NAMES.choose(&mut rng).unwrap_or(&"Alexey").to_string();
    let description = DEMO_DESCRIPTIONS
        .choose(&mut rng)
        .unwrap_or(&"Renovation inquiry")
        .to_string();
    let phone = format!("{}{:07}", phone_prefix(&city), rng.gen_range(0..10_000_000u64));
    let (lo, hi) = area_range(&category);
    let area = rng.gen_range(lo..hi).round();

    Some(NewLead {
        source_chat_id: 0,
        source_message_id: (Uuid::new_v4().as_u128() & i64::MAX as u128) as i64 | 1,
        name: Some(name),
        phone: Some(phone),
        category,
        city,
        description,
        area: Some(area),
    })
}
