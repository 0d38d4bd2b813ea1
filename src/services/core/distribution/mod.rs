// src/services/core/distribution/mod.rs

pub mod demo;
pub mod eligibility;
pub mod leads;
pub mod rotator;

pub use eligibility::EligibilityService;
pub use leads::LeadService;
pub use rotator::{
    DistributionConfig, DistributionFailure, DistributionReport, DistributionService, RotationMode,
};
