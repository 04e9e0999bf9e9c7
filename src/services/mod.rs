//! Business logic services.

pub mod auth;
pub mod delivery;
pub mod engine;
pub mod executor;
pub mod locks;
pub mod rule_store;
pub mod scheduler;
pub mod stats;
pub mod trigger;
pub mod validation;
