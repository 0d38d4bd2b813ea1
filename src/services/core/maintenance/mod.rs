// src/services/core/maintenance/mod.rs

pub mod jobs;

pub use jobs::{MaintenanceService, MaintenanceSummary, Notifier};
