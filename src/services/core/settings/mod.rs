// src/services/core/settings/mod.rs

pub mod runtime_settings;

pub use runtime_settings::{SettingEntry, SettingsService};
