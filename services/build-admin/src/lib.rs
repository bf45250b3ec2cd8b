//! Build admin service library.
//!
//! This crate primarily ships a `build-admin` binary, but we expose the
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod job;
pub mod liveness;
pub mod metrics;
pub mod orchestrator;
pub mod prohibited;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;
