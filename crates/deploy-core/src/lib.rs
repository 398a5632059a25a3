//! Core of the declarative deployment engine
//!
//! Wires the endpoint drivers, sync engine, trust cache, template engine,
//! and database executor into one orchestrated run: a single JSON
//! configuration describes the file topology and the database topology,
//! and [`Orchestrator::run`] synchronizes both.

pub mod cache;
pub mod config;
pub mod error;
pub mod ignore;
pub mod orchestrator;
pub mod sync;
pub mod template;

pub use cache::{CacheStore, DeployCache, FileCacheEntry};
pub use config::{DeployConfig, LocationConfig, LocationKind, OptionsConfig};
pub use error::{Error, Result};
pub use ignore::IgnoreMatcher;
pub use orchestrator::{Orchestrator, RunSummary};
pub use sync::{build_plan, DestinationView, SyncPlan};
