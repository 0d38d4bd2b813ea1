// src/utils/mod.rs

pub mod error;
pub mod time;

pub use error::{is_constraint_violation, LeadFlowError, LeadFlowResult};
