// src/services/core/entitlement/mod.rs

pub mod recipients;
pub mod subscription;

pub use recipients::RecipientService;
pub use subscription::SubscriptionService;
