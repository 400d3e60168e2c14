//! Monitoring services driven by the periodic loops

pub mod heal_engine;
pub mod remediation_policy;
pub mod resource_governor;

pub use heal_engine::{HealCollaborators, HealCycle, HealEngine};
pub use remediation_policy::{findings_from_report, Finding, RemediationAction, RemediationPolicy};
pub use resource_governor::{evaluate, ResourceGovernor, Transition};
