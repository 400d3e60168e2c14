pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod supervisor;

pub use config::AppConfig;
pub use coordination::{Shutdown, ShutdownListener, TargetLocks, Ticker};
pub use error::{Result, WardenError};
pub use persistence::StateStore;
pub use services::{HealEngine, ResourceGovernor};
pub use supervisor::{AlertLevel, AlertManager, AlertManagerConfig, ProcessSupervisor};
