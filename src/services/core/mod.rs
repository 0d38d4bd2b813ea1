// src/services/core/mod.rs

pub mod distribution;
pub mod entitlement;
pub mod infrastructure;
pub mod maintenance;
pub mod settings;
