//! Database deployment for the deploy engine
//!
//! Executes ordered SQL script phases against the destination's database
//! server through the shared SSH session, and expands JSON-driven INSERT
//! templates (the seed engine). Both halves speak to the server through
//! the [`SqlRunner`] seam so tests can record statements instead.

pub mod error;
pub mod executor;
pub mod password;
pub mod plan;
pub mod runner;
pub mod seed;
pub mod splitter;
pub mod tenant;
pub mod vars;

pub use error::{Error, Result};
pub use executor::{ExecutionReport, ExecutorOptions, ScriptCacheEntry, SqlExecutor};
pub use plan::{DatabaseDeploymentPlan, DirKind, Phase, PhaseScope, ScriptSet};
pub use runner::{SqlRunner, SshMysqlRunner};
pub use seed::{SeedEngine, SeedReport, SeedTableSpec, SeedTarget, VariableBinding};
pub use splitter::split_statements;
pub use tenant::{load_tenants, TenantDescriptor};
pub use vars::TemplateVars;
