//! Database deployment plan
//!
//! Orders the SQL phases a run will execute: main database directories,
//! then each tenant's directories with `{{WEBID}}` bound, then the
//! one-shot cross-database data scripts. Migration mode replaces all of
//! that with the migration directories alone.

use std::path::PathBuf;

use crate::tenant::TenantDescriptor;
use crate::vars::TemplateVars;

/// Which database a phase runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseScope {
    Main,
    Tenant { webid: String },
    /// Cross-database scripts carrying their own `USE` statements
    Routed,
}

/// The directory kind inside a database script set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirKind {
    Setup,
    Tables,
    Procedures,
    Data,
    Migration,
}

impl DirKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Tables => "tables",
            Self::Procedures => "procedures",
            Self::Data => "data",
            Self::Migration => "migration",
        }
    }
}

/// One ordered phase: a directory of SQL files executed as a group.
#[derive(Debug, Clone)]
pub struct Phase {
    pub scope: PhaseScope,
    pub kind: DirKind,
    pub dir: PathBuf,
    /// Default schema bound for the phase's statements; setup and routed
    /// phases run with none
    pub database: Option<String>,
    /// The database this phase belongs to, bound or not. Setup phases for
    /// a missing database bypass the incremental cache through this.
    pub owner_db: Option<String>,
}

/// The directories configured for one database (main or tenant template).
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    pub db_name: String,
    pub setup_path: Option<PathBuf>,
    pub tables_path: Option<PathBuf>,
    pub procedures_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub migration_path: Option<PathBuf>,
}

/// Ordered list of phases for one run. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct DatabaseDeploymentPlan {
    pub phases: Vec<Phase>,
    /// Databases the run will create, in creation order; clean install
    /// drops exactly these first
    pub databases: Vec<String>,
}

impl DatabaseDeploymentPlan {
    /// Build the plan from the configured script sets.
    ///
    /// The tenant set is a template: its `db_name` and directory paths may
    /// carry `{{WEBID}}`, bound per tenant here.
    pub fn build(
        main: Option<&ScriptSet>,
        tenant_template: Option<&ScriptSet>,
        tenants: &[TenantDescriptor],
        tenant_data_scripts: Option<&PathBuf>,
        migration_only: bool,
    ) -> Self {
        let mut phases = Vec::new();
        let mut databases = Vec::new();

        if migration_only {
            if let Some(main) = main {
                databases.push(main.db_name.clone());
                if let Some(dir) = &main.migration_path {
                    phases.push(Phase {
                        scope: PhaseScope::Main,
                        kind: DirKind::Migration,
                        dir: dir.clone(),
                        database: Some(main.db_name.clone()),
                        owner_db: Some(main.db_name.clone()),
                    });
                }
            }
            if let Some(template) = tenant_template {
                for tenant in tenants {
                    let vars = TemplateVars::new().set("WEBID", &tenant.webid);
                    let db_name = vars.apply(&template.db_name);
                    databases.push(db_name.clone());
                    if let Some(dir) = &template.migration_path {
                        phases.push(Phase {
                            scope: PhaseScope::Tenant {
                                webid: tenant.webid.clone(),
                            },
                            kind: DirKind::Migration,
                            dir: PathBuf::from(vars.apply(&dir.to_string_lossy())),
                            database: Some(db_name.clone()),
                            owner_db: Some(db_name),
                        });
                    }
                }
            }
            return Self { phases, databases };
        }

        if let Some(main) = main {
            databases.push(main.db_name.clone());
            push_set_phases(&mut phases, main, PhaseScope::Main);
        }

        if let Some(template) = tenant_template {
            for tenant in tenants {
                let vars = TemplateVars::new().set("WEBID", &tenant.webid);
                let bound = ScriptSet {
                    db_name: vars.apply(&template.db_name),
                    setup_path: bind_path(&vars, template.setup_path.as_ref()),
                    tables_path: bind_path(&vars, template.tables_path.as_ref()),
                    procedures_path: bind_path(&vars, template.procedures_path.as_ref()),
                    data_path: bind_path(&vars, template.data_path.as_ref()),
                    migration_path: None,
                };
                databases.push(bound.db_name.clone());
                push_set_phases(
                    &mut phases,
                    &bound,
                    PhaseScope::Tenant {
                        webid: tenant.webid.clone(),
                    },
                );
            }
        }

        if let Some(dir) = tenant_data_scripts {
            phases.push(Phase {
                scope: PhaseScope::Routed,
                kind: DirKind::Data,
                dir: dir.clone(),
                database: None,
                owner_db: None,
            });
        }

        Self { phases, databases }
    }
}

fn bind_path(vars: &TemplateVars, path: Option<&PathBuf>) -> Option<PathBuf> {
    path.map(|p| PathBuf::from(vars.apply(&p.to_string_lossy())))
}

fn push_set_phases(phases: &mut Vec<Phase>, set: &ScriptSet, scope: PhaseScope) {
    // Setup scripts create the database, so they run unbound
    if let Some(dir) = &set.setup_path {
        phases.push(Phase {
            scope: scope.clone(),
            kind: DirKind::Setup,
            dir: dir.clone(),
            database: None,
            owner_db: Some(set.db_name.clone()),
        });
    }
    for (kind, dir) in [
        (DirKind::Tables, &set.tables_path),
        (DirKind::Procedures, &set.procedures_path),
        (DirKind::Data, &set.data_path),
    ] {
        if let Some(dir) = dir {
            phases.push(Phase {
                scope: scope.clone(),
                kind,
                dir: dir.clone(),
                database: Some(set.db_name.clone()),
                owner_db: Some(set.db_name.clone()),
            });
        }
    }
}
