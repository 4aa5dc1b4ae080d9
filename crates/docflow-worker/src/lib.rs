//! DocFlow Worker
//!
//! Drains an EMR document inbox and tags each scanned document.
//!
//! This crate provides:
//! - HTTP collaborators for the EMR directory, document inbox and language model
//! - Durable lock, cursor and retry state
//! - The intake controller that wraps one workflow run per tick
//! - Identity, provider, category and description resolvers
//! - Step functions bound to workflow step names

pub mod client;
pub mod config;
pub mod context;
pub mod intake;
pub mod queue;
pub mod resolve;
pub mod result_ext;
pub mod settings;
pub mod steps;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::WorkerConfig;
pub use intake::{IntakeController, TickOutcome};
pub use settings::Settings;
pub use worker::Worker;
