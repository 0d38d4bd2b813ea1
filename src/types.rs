// src/types.rs
// Shared domain types. All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a lead as reported back by recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    Active,
    InProgress,
    Measurement,
    Thinking,
    Contract,
    InactiveUnavailable,
    InactiveRefused,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Active => "active",
            LeadStatus::InProgress => "in_progress",
            LeadStatus::Measurement => "measurement",
            LeadStatus::Thinking => "thinking",
            LeadStatus::Contract => "contract",
            LeadStatus::InactiveUnavailable => "inactive_unavailable",
            LeadStatus::InactiveRefused => "inactive_refused",
        }
    }

    /// Unknown values fall back to `Active` (rows written by older builds).
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => LeadStatus::InProgress,
            "measurement" => LeadStatus::Measurement,
            "thinking" => LeadStatus::Thinking,
            "contract" => LeadStatus::Contract,
            "inactive_unavailable" => LeadStatus::InactiveUnavailable,
            "inactive_refused" => LeadStatus::InactiveRefused,
            _ => LeadStatus::Active,
        }
    }
}

/// An inbound customer inquiry after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    /// Origin channel identifier (chat the message arrived in).
    pub source_chat_id: i64,
    /// Message identifier within the origin channel.
    pub source_message_id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub category: String,
    pub city: String,
    pub description: String,
    /// Work area in square meters, when the inquiry mentions one.
    pub area: Option<f64>,
    pub status: LeadStatus,
    pub created_at: i64,
}

impl Lead {
    /// Stable dedup key for the origin event.
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.source_chat_id, self.source_message_id)
    }
}

/// Payload for lead ingestion; the store assigns id, status and created_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub source_chat_id: i64,
    pub source_message_id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub category: String,
    pub city: String,
    pub description: String,
    pub area: Option<f64>,
}

impl NewLead {
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.source_chat_id, self.source_message_id)
    }
}

/// A party that can receive leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    /// Identity on the delivery channel (unique per recipient).
    pub external_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_paid: bool,
    /// Demo accounts receive synthetic traffic regardless of interest match.
    pub is_demo: bool,
    pub categories: Vec<String>,
    pub cities: Vec<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub external_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub categories: Vec<String>,
    pub cities: Vec<String>,
    pub is_paid: bool,
    pub is_demo: bool,
}

/// Subscription tier, in descending delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Premium,
    Pro,
    Basic,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Premium => "premium",
            PlanTier::Pro => "pro",
            PlanTier::Basic => "basic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "premium" => Some(PlanTier::Premium),
            "pro" => Some(PlanTier::Pro),
            "basic" => Some(PlanTier::Basic),
            _ => None,
        }
    }
}

/// A recipient's entitlement to receive leads for a paid period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub recipient_id: i64,
    pub plan: PlanTier,
    /// Price paid, in whole currency units.
    pub price: i64,
    pub starts_at: i64,
    pub expires_at: i64,
    pub is_active: bool,
    pub payment_ref: Option<String>,
    pub created_at: i64,
}

impl Subscription {
    /// Active flag alone is not enough: expiry is checked against the clock
    /// so reads stay correct between maintenance sweeps.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        self.is_active && self.expires_at > now_ms
    }
}

/// A single delivery of a lead to a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: i64,
    pub lead_id: i64,
    pub recipient_id: i64,
    /// When the delivery becomes visible; tier delay is baked in here.
    pub sent_at: i64,
    pub viewed_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QuotaWarning,
    ExpiryWarning,
}

/// Outbound warning emitted by maintenance jobs. `(recipient_id, kind)` is
/// stable across runs so a delivery collaborator can dedupe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub recipient_id: i64,
    pub external_id: i64,
    pub kind: NotificationKind,
    pub message: String,
}

/// Aggregate subscription counters for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub active_total: u32,
    pub by_plan: std::collections::HashMap<String, u32>,
    pub updated_at: i64,
}
