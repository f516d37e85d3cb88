//! # AgentForge Core
//!
//! Configuration, filesystem layout and the error taxonomy shared by the
//! queue, scheduler and dispatcher.

pub mod config;
pub mod error;
pub mod paths;

pub use config::{AgentForgeConfig, AutoscaleConfig, QueueConfig, RuntimeConfig, SchedulerConfig};
pub use error::{ForgeError, Result};
pub use paths::ForgePaths;
