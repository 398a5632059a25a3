//! JSON-driven table seeding
//!
//! Expands INSERT templates over tenant configuration JSON: one parent
//! document per file, optional outer and nested arrays, and variable
//! bindings that resolve dot-paths against the innermost element, its
//! parent scope, or the element itself for primitive arrays.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::password::hash_password;
use crate::runner::SqlRunner;
use crate::vars::TemplateVars;

/// Which database a seed spec targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeedTarget {
    #[default]
    Main,
    Tenant,
}

/// A rule mapping an SQL placeholder to a JSON path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableBinding {
    /// Placeholder token as it appears in the template, e.g. `{{NAME}}`
    pub sql_var: String,
    /// Dot-path into the JSON element; the single dot `.` takes the
    /// current element itself (primitive arrays)
    pub json_field: String,
    /// Resolve against the outermost available object instead of the
    /// innermost element
    #[serde(default)]
    pub from_parent: bool,
    /// Fallback when the field is missing; without one the emission uses
    /// a bare SQL NULL
    #[serde(default)]
    pub default_value: Option<Value>,
}

/// One seeding rule: a target table plus the template that feeds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedTableSpec {
    pub table_name: String,
    #[serde(default)]
    pub database: SeedTarget,
    pub table_script_file: PathBuf,
    pub begin_mark: String,
    pub end_mark: String,
    #[serde(default)]
    pub check_exists_query: Option<String>,
    #[serde(default)]
    pub array_field: Option<String>,
    #[serde(default)]
    pub nested_array_field: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableBinding>,
}

/// Outcome of a seeding pass.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub records_inserted: usize,
    pub specs_failed: usize,
}

impl SeedReport {
    pub fn success(&self) -> bool {
        self.specs_failed == 0
    }
}

/// Expands and executes seed specs against the configured databases.
pub struct SeedEngine<'a> {
    runner: &'a dyn SqlRunner,
    dry_run: bool,
}

impl<'a> SeedEngine<'a> {
    pub fn new(runner: &'a dyn SqlRunner, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    /// Run every spec over every parent JSON file.
    ///
    /// A failing spec is recorded and skipped; the remaining specs still
    /// run. Parent files are processed in sorted-filename order.
    pub fn seed(
        &self,
        specs: &[SeedTableSpec],
        config_files_path: &Path,
        extension: &str,
        main_db: Option<&str>,
        tenant_db_template: Option<&str>,
    ) -> Result<SeedReport> {
        let mut report = SeedReport::default();

        let mut files: Vec<PathBuf> = fs::read_dir(config_files_path)
            .map_err(|e| Error::io(config_files_path, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(extension))
            })
            .collect();
        files.sort();

        info!("Seeding from {} parent file(s)", files.len());

        for file in &files {
            let parent: Value = match fs::read_to_string(file)
                .map_err(|e| Error::io(file, e))
                .and_then(|content| {
                    serde_json::from_str(&content).map_err(|e| Error::Json {
                        file: file.clone(),
                        source: e,
                    })
                }) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Skipping malformed seed parent {}: {}", file.display(), e);
                    report.specs_failed += specs.len();
                    continue;
                }
            };

            for spec in specs {
                let database = match self.route(spec, &parent, main_db, tenant_db_template) {
                    Some(db) => db,
                    None => continue,
                };

                match self.run_spec(spec, &parent, &database, file) {
                    Ok(inserted) => report.records_inserted += inserted,
                    Err(e) => {
                        warn!(
                            "Seed spec for table {} failed on {}: {}",
                            spec.table_name,
                            file.display(),
                            e
                        );
                        report.specs_failed += 1;
                    }
                }
            }
        }

        info!(
            "Seeding complete: {} record(s) inserted, {} spec failure(s)",
            report.records_inserted, report.specs_failed
        );
        Ok(report)
    }

    /// Pick the target database for a spec against one parent document.
    ///
    /// Each parent file is itself a tenant, so a tenant-scoped spec lands
    /// in that parent's own database.
    fn route(
        &self,
        spec: &SeedTableSpec,
        parent: &Value,
        main_db: Option<&str>,
        tenant_db_template: Option<&str>,
    ) -> Option<String> {
        match spec.database {
            SeedTarget::Main => match main_db {
                Some(db) => Some(db.to_string()),
                None => {
                    warn!(
                        "Seed spec {} targets the main database but none is configured",
                        spec.table_name
                    );
                    None
                }
            },
            SeedTarget::Tenant => {
                let webid = parent.get("webid").and_then(Value::as_str)?;
                match tenant_db_template {
                    Some(template) => {
                        Some(TemplateVars::new().set("WEBID", webid).apply(template))
                    }
                    None => {
                        warn!(
                            "Seed spec {} targets tenant databases but none are configured",
                            spec.table_name
                        );
                        None
                    }
                }
            }
        }
    }

    fn run_spec(
        &self,
        spec: &SeedTableSpec,
        parent: &Value,
        database: &str,
        parent_file: &Path,
    ) -> Result<usize> {
        debug!(
            "Processing table {} for {}",
            spec.table_name,
            parent_file.display()
        );

        if let Some(check_query) = &spec.check_exists_query {
            if spec.array_field.is_some() {
                warn!(
                    "Table {}: existence check with an array field skips the entire array when any record exists",
                    spec.table_name
                );
            }
            if self.has_existing_data(spec, check_query, parent, database)? {
                info!(
                    "Skipping {} - data already exists in {}",
                    spec.table_name, database
                );
                return Ok(0);
            }
        }

        let template = extract_template(
            &spec.table_script_file,
            &spec.begin_mark,
            &spec.end_mark,
        )?;

        let mut inserted = 0;

        if let Some(array_field) = &spec.array_field {
            let array = match get_json_path(parent, array_field).and_then(Value::as_array) {
                Some(array) => array.clone(),
                None => {
                    debug!(
                        "Array field {} absent or empty in {}",
                        array_field,
                        parent_file.display()
                    );
                    return Ok(0);
                }
            };

            if let Some(nested_field) = &spec.nested_array_field {
                for outer in &array {
                    let nested = match get_json_path(outer, nested_field).and_then(Value::as_array)
                    {
                        Some(nested) => nested.clone(),
                        None => continue,
                    };
                    // from_parent bindings see the parent document with the
                    // outer element's fields layered on top, so root fields
                    // like webid stay reachable from the innermost level
                    let merged = merge_objects(parent, outer);
                    for element in &nested {
                        let statement = substitute(
                            &template,
                            &spec.variables,
                            element,
                            Some(&merged),
                            true,
                            &spec.table_name,
                        )?;
                        inserted += self.emit(spec, &statement, database)?;
                    }
                }
            } else {
                for element in &array {
                    let statement = substitute(
                        &template,
                        &spec.variables,
                        element,
                        Some(parent),
                        true,
                        &spec.table_name,
                    )?;
                    inserted += self.emit(spec, &statement, database)?;
                }
            }
        } else {
            let statement = substitute(
                &template,
                &spec.variables,
                parent,
                None,
                true,
                &spec.table_name,
            )?;
            inserted += self.emit(spec, &statement, database)?;
        }

        if inserted > 0 {
            info!(
                "Inserted {} record(s) into {}.{}",
                inserted, database, spec.table_name
            );
        }
        Ok(inserted)
    }

    fn has_existing_data(
        &self,
        spec: &SeedTableSpec,
        check_query: &str,
        parent: &Value,
        database: &str,
    ) -> Result<bool> {
        if self.dry_run {
            return Ok(false);
        }

        let query = substitute(
            check_query,
            &spec.variables,
            parent,
            None,
            false,
            &spec.table_name,
        )?;

        // A failed check usually means the table does not exist yet,
        // which is the same as "no data"
        match self.runner.query_count(&query, Some(database)) {
            Ok(count) => Ok(count > 0),
            Err(e) => {
                debug!(
                    "Existence check for {} failed ({}), treating as empty",
                    spec.table_name, e
                );
                Ok(false)
            }
        }
    }

    fn emit(&self, spec: &SeedTableSpec, statement: &str, database: &str) -> Result<usize> {
        if self.dry_run {
            info!("[dry-run] Would insert record into {}", spec.table_name);
            return Ok(0);
        }
        self.runner.execute(statement, Some(database))?;
        Ok(1)
    }
}

/// Pull the INSERT template from between the first marker pair.
///
/// Markers typically live inside a block comment; stray `*/` and `/*`
/// fragments around the region are trimmed away.
pub fn extract_template(file: &Path, begin_mark: &str, end_mark: &str) -> Result<String> {
    let content = fs::read_to_string(file).map_err(|e| Error::io(file, e))?;

    let begin = content
        .find(begin_mark)
        .ok_or_else(|| Error::MissingMarkers {
            file: file.to_path_buf(),
            begin: begin_mark.to_string(),
            end: end_mark.to_string(),
        })?;
    let after_begin = begin + begin_mark.len();
    let end = content[after_begin..]
        .find(end_mark)
        .ok_or_else(|| Error::MissingMarkers {
            file: file.to_path_buf(),
            begin: begin_mark.to_string(),
            end: end_mark.to_string(),
        })?;

    let mut region = content[after_begin..after_begin + end].trim();
    if let Some(stripped) = region.strip_prefix("*/") {
        region = stripped.trim();
    }
    if let Some(stripped) = region.strip_suffix("/*") {
        region = stripped.trim();
    }

    Ok(region.to_string())
}

/// Get a value from a JSON object using a dot-separated path.
pub fn get_json_path<'v>(json: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = json;
    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Layer `overlay`'s fields on top of `base` (both objects).
fn merge_objects(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Resolve every binding against the current element and emit SQL text.
///
/// The template carries the quoting: string placeholders appear as
/// `'{{X}}'`. A NULL or SQL-function substitution strips those quotes so
/// the emitted statement never contains `'NULL'`.
pub fn substitute(
    template: &str,
    bindings: &[VariableBinding],
    current: &Value,
    parent: Option<&Value>,
    warn_on_missing: bool,
    context: &str,
) -> Result<String> {
    let mut result = template.to_string();

    for binding in bindings {
        let source = if binding.from_parent {
            parent.unwrap_or(current)
        } else {
            current
        };

        let dot_self = binding.json_field == "." || binding.json_field.is_empty();
        let value: Option<Value> = if dot_self && !source.is_object() {
            Some(source.clone())
        } else {
            get_json_path(source, &binding.json_field)
                .cloned()
                .filter(|v| !v.is_null())
                .or_else(|| binding.default_value.clone())
        };

        if value.is_none() && warn_on_missing {
            warn!(
                "JSON field '{}' not found for table '{}', using NULL for {}",
                binding.json_field, context, binding.sql_var
            );
        }

        let is_password =
            binding.sql_var == "{{PASSWORD}}" || binding.sql_var == "{{PASSWORD_HASH}}";

        let (text, strip_quotes) = match &value {
            None => ("NULL".to_string(), true),
            Some(v) if is_password => {
                let plain = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (escape_sql_string(&hash_password(&plain)?), false)
            }
            Some(Value::Number(n)) => (n.to_string(), false),
            Some(Value::Bool(b)) => (if *b { "1" } else { "0" }.to_string(), false),
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.ends_with("()") {
                    // SQL function such as NOW() or UUID(); emit unquoted
                    (trimmed.to_string(), true)
                } else {
                    (escape_sql_string(s), false)
                }
            }
            Some(other) => {
                // Objects and arrays land in JSON columns as serialized text
                (escape_sql_string(&other.to_string()), false)
            }
        };

        let quoted_token = format!("'{}'", binding.sql_var);
        if strip_quotes && result.contains(&quoted_token) {
            result = result.replace(&quoted_token, &text);
        } else {
            result = result.replace(&binding.sql_var, &text);
        }
    }

    Ok(result)
}

fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::RecordingRunner;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_template(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("table.sql");
        let content = format!(
            "CREATE TABLE roles (id INT);\n/* BEGIN SEED: */\n{}\n/* END SEED: */\n",
            body
        );
        fs::write(&path, content).unwrap();
        path
    }

    fn binding(sql_var: &str, json_field: &str, from_parent: bool) -> VariableBinding {
        VariableBinding {
            sql_var: sql_var.to_string(),
            json_field: json_field.to_string(),
            from_parent,
            default_value: None,
        }
    }

    #[test]
    fn test_extract_template_trims_comment_delimiters() {
        let dir = TempDir::new().unwrap();
        let path = write_template(&dir, "INSERT INTO t VALUES ('{{X}}');");
        let template = extract_template(&path, "BEGIN SEED:", "END SEED:").unwrap();
        assert_eq!(template, "INSERT INTO t VALUES ('{{X}}');");
    }

    #[test]
    fn test_extract_template_missing_markers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no_marks.sql");
        fs::write(&path, "SELECT 1;").unwrap();
        assert!(matches!(
            extract_template(&path, "BEGIN SEED:", "END SEED:"),
            Err(Error::MissingMarkers { .. })
        ));
    }

    #[test]
    fn test_get_json_path_nested_and_array() {
        let value = json!({"a": {"b": [{"c": "deep"}]}});
        assert_eq!(
            get_json_path(&value, "a.b.0.c"),
            Some(&json!("deep"))
        );
        assert!(get_json_path(&value, "a.x").is_none());
    }

    #[test]
    fn test_substitute_null_strips_quotes() {
        let template = "INSERT INTO t (a, b) VALUES ('{{A}}', '{{B}}');";
        let bindings = vec![binding("{{A}}", "name", false), binding("{{B}}", "ghost", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"name": "x"}),
            None,
            false,
            "t",
        )
        .unwrap();
        assert_eq!(result, "INSERT INTO t (a, b) VALUES ('x', NULL);");
        assert!(!result.contains("'NULL'"));
    }

    #[test]
    fn test_substitute_escapes_quotes() {
        let template = "INSERT INTO t (a) VALUES ('{{A}}');";
        let bindings = vec![binding("{{A}}", "name", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"name": "O'Brien"}),
            None,
            false,
            "t",
        )
        .unwrap();
        assert_eq!(result, "INSERT INTO t (a) VALUES ('O''Brien');");
    }

    #[test]
    fn test_substitute_sql_function_unquoted() {
        let template = "INSERT INTO t (at) VALUES ('{{AT}}');";
        let bindings = vec![binding("{{AT}}", "created", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"created": "NOW()"}),
            None,
            false,
            "t",
        )
        .unwrap();
        assert_eq!(result, "INSERT INTO t (at) VALUES (NOW());");
    }

    #[test]
    fn test_substitute_numbers_and_bools() {
        let template = "INSERT INTO t VALUES ({{N}}, {{FLAG}});";
        let bindings = vec![binding("{{N}}", "n", false), binding("{{FLAG}}", "on", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"n": 7, "on": true}),
            None,
            false,
            "t",
        )
        .unwrap();
        assert_eq!(result, "INSERT INTO t VALUES (7, 1);");
    }

    #[test]
    fn test_password_placeholder_is_hashed() {
        let template = "INSERT INTO users (pw) VALUES ('{{PASSWORD_HASH}}');";
        let bindings = vec![binding("{{PASSWORD_HASH}}", "password", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"password": "secret"}),
            None,
            false,
            "users",
        )
        .unwrap();

        let hash = result
            .split('\'')
            .nth(1)
            .expect("hash should be quoted");
        assert!(hash.starts_with("$2y$10$"));
        assert_eq!(hash.len(), 60);
        assert!(bcrypt::verify("secret", hash).unwrap());
    }

    #[test]
    fn test_reset_password_is_not_hashed() {
        let template = "INSERT INTO t (x) VALUES ('{{RESET_PASSWORD}}');";
        let bindings = vec![binding("{{RESET_PASSWORD}}", "token", false)];
        let result = substitute(
            template,
            &bindings,
            &json!({"token": "abc"}),
            None,
            false,
            "t",
        )
        .unwrap();
        assert_eq!(result, "INSERT INTO t (x) VALUES ('abc');");
    }

    #[test]
    fn test_default_value_used_for_missing_field() {
        let template = "INSERT INTO t (x) VALUES ('{{X}}');";
        let bindings = vec![VariableBinding {
            sql_var: "{{X}}".to_string(),
            json_field: "missing".to_string(),
            from_parent: false,
            default_value: Some(json!("fallback")),
        }];
        let result =
            substitute(template, &bindings, &json!({}), None, false, "t").unwrap();
        assert_eq!(result, "INSERT INTO t (x) VALUES ('fallback');");
    }

    #[test]
    fn test_nested_array_expansion() {
        let dir = TempDir::new().unwrap();
        let template_path = write_template(
            &dir,
            "INSERT INTO user_roles (webid, username, role) VALUES ('{{WEBID}}', '{{USERNAME}}', '{{ROLE_NAME}}');",
        );

        let seeds = dir.path().join("seeds");
        fs::create_dir_all(&seeds).unwrap();
        fs::write(
            seeds.join("demo.json"),
            serde_json::to_string(&json!({
                "webid": "demo",
                "users": [
                    {"username": "u1", "password": "p", "roles": ["A", "B"]}
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let spec = SeedTableSpec {
            table_name: "user_roles".to_string(),
            database: SeedTarget::Main,
            table_script_file: template_path,
            begin_mark: "BEGIN SEED:".to_string(),
            end_mark: "END SEED:".to_string(),
            check_exists_query: None,
            array_field: Some("users".to_string()),
            nested_array_field: Some("roles".to_string()),
            variables: vec![
                binding("{{WEBID}}", "webid", true),
                binding("{{USERNAME}}", "username", true),
                binding("{{ROLE_NAME}}", ".", false),
            ],
        };

        let runner = RecordingRunner::default();
        let engine = SeedEngine::new(&runner, false);
        let report = engine
            .seed(&[spec], &seeds, ".json", Some("acme"), None)
            .unwrap();

        assert_eq!(report.records_inserted, 2);
        assert_eq!(
            runner.executed(),
            vec![
                "INSERT INTO user_roles (webid, username, role) VALUES ('demo', 'u1', 'A');",
                "INSERT INTO user_roles (webid, username, role) VALUES ('demo', 'u1', 'B');",
            ]
        );
    }

    #[test]
    fn test_existence_check_skips_spec() {
        let dir = TempDir::new().unwrap();
        let template_path = write_template(&dir, "INSERT INTO t (w) VALUES ('{{WEBID}}');");

        let seeds = dir.path().join("seeds");
        fs::create_dir_all(&seeds).unwrap();
        fs::write(seeds.join("demo.json"), r#"{"webid": "demo"}"#).unwrap();

        let spec = SeedTableSpec {
            table_name: "t".to_string(),
            database: SeedTarget::Main,
            table_script_file: template_path,
            begin_mark: "BEGIN SEED:".to_string(),
            end_mark: "END SEED:".to_string(),
            check_exists_query: Some(
                "SELECT COUNT(1) FROM t WHERE w = '{{WEBID}}'".to_string(),
            ),
            array_field: None,
            nested_array_field: None,
            variables: vec![binding("{{WEBID}}", "webid", false)],
        };

        let runner = RecordingRunner::default();
        runner.respond_with("FROM t WHERE w = 'demo'", "1");
        let engine = SeedEngine::new(&runner, false);
        let report = engine
            .seed(&[spec], &seeds, ".json", Some("acme"), None)
            .unwrap();

        assert_eq!(report.records_inserted, 0);
        assert!(runner.executed().is_empty());
    }

    #[test]
    fn test_tenant_routing_uses_db_template() {
        let dir = TempDir::new().unwrap();
        let template_path = write_template(&dir, "INSERT INTO s (w) VALUES ('{{WEBID}}');");

        let seeds = dir.path().join("seeds");
        fs::create_dir_all(&seeds).unwrap();
        fs::write(seeds.join("demo.json"), r#"{"webid": "demo"}"#).unwrap();

        let spec = SeedTableSpec {
            table_name: "s".to_string(),
            database: SeedTarget::Tenant,
            table_script_file: template_path,
            begin_mark: "BEGIN SEED:".to_string(),
            end_mark: "END SEED:".to_string(),
            check_exists_query: None,
            array_field: None,
            nested_array_field: None,
            variables: vec![binding("{{WEBID}}", "webid", false)],
        };

        let runner = RecordingRunner::default();
        let engine = SeedEngine::new(&runner, false);
        engine
            .seed(&[spec], &seeds, ".json", Some("acme"), Some("acme_{{WEBID}}"))
            .unwrap();

        let statements = runner.statements.borrow();
        assert_eq!(statements[0].0.as_deref(), Some("acme_demo"));
    }

    #[test]
    fn test_dry_run_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let template_path = write_template(&dir, "INSERT INTO t (w) VALUES ('{{WEBID}}');");

        let seeds = dir.path().join("seeds");
        fs::create_dir_all(&seeds).unwrap();
        fs::write(seeds.join("demo.json"), r#"{"webid": "demo"}"#).unwrap();

        let spec = SeedTableSpec {
            table_name: "t".to_string(),
            database: SeedTarget::Main,
            table_script_file: template_path,
            begin_mark: "BEGIN SEED:".to_string(),
            end_mark: "END SEED:".to_string(),
            check_exists_query: None,
            array_field: None,
            nested_array_field: None,
            variables: vec![binding("{{WEBID}}", "webid", false)],
        };

        let runner = RecordingRunner::default();
        let engine = SeedEngine::new(&runner, true);
        let report = engine
            .seed(&[spec], &seeds, ".json", Some("acme"), None)
            .unwrap();

        assert_eq!(report.records_inserted, 0);
        assert!(runner.executed().is_empty());
    }
}
