//! Domain models and DTOs for categories, quick responses, actions and runs.

pub mod action;
pub mod category;
pub mod pagination;
pub mod response;
pub mod run;
pub mod schedule;
pub mod user;
