//! Statement transport to the database server
//!
//! The production runner routes every statement through the destination's
//! SSH session: the statement is uploaded over SFTP to a temp file and
//! piped into the server's `mysql` client on an exec channel, with the
//! administrative credentials. Shell quoting never sees the statement
//! body, which matters for bcrypt hashes full of `$`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use ssh2::{OpenFlags, OpenType};
use tracing::debug;

use deploy_endpoint::SshSession;

use crate::error::{Error, Result};

/// Executes SQL against the target server.
///
/// The seam between phase/seed logic and the wire; tests substitute a
/// recording implementation.
pub trait SqlRunner {
    /// Execute one statement. `database` pre-selects the default schema;
    /// `None` routes against the server with no schema bound.
    fn execute(&self, statement: &str, database: Option<&str>) -> Result<()>;

    /// Run a query and return the first column of the first row, if any.
    fn query_scalar(&self, query: &str, database: Option<&str>) -> Result<Option<String>>;

    /// Run a count query; a missing or unparsable result counts as zero.
    fn query_count(&self, query: &str, database: Option<&str>) -> Result<i64> {
        let value = self.query_scalar(query, database)?;
        Ok(value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0))
    }
}

/// Runner over a shared SSH session to the destination host.
pub struct SshMysqlRunner {
    session: Arc<SshSession>,
    db_host: String,
    db_port: u16,
    username: String,
    password: String,
}

impl SshMysqlRunner {
    pub fn new(
        session: Arc<SshSession>,
        db_host: impl Into<String>,
        db_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            session,
            db_host: db_host.into(),
            db_port,
            username: username.into(),
            password: password.into(),
        }
    }

    fn client_command(&self, database: Option<&str>, extra: &str) -> String {
        let mut cmd = format!(
            "mysql -h {} -P {} -u {} -p{}",
            self.db_host, self.db_port, self.username, self.password
        );
        if !extra.is_empty() {
            cmd.push(' ');
            cmd.push_str(extra);
        }
        if let Some(db) = database {
            cmd.push(' ');
            cmd.push_str(db);
        }
        cmd
    }

    fn upload_temp(&self, sql: &str) -> Result<String> {
        // Unix line endings; the server side chokes on CRLF in heredocs
        let unix = sql.replace("\r\n", "\n").replace('\r', "\n");

        let mut hasher = DefaultHasher::new();
        sql.hash(&mut hasher);
        let temp_path = format!("/tmp/deploy_sql_{:016x}.sql", hasher.finish());

        let sftp = self.session.open_sftp()?;
        let mut remote = sftp
            .open_mode(
                Path::new(&temp_path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o600,
                OpenType::File,
            )
            .map_err(|e| Error::sql(&temp_path, e.to_string()))?;
        remote
            .write_all(unix.as_bytes())
            .map_err(|e| Error::io(&temp_path, e))?;

        Ok(temp_path)
    }

    fn run_file(
        &self,
        temp_path: &str,
        database: Option<&str>,
        extra: &str,
    ) -> Result<deploy_endpoint::ExecOutput> {
        let command = format!("{} < {}", self.client_command(database, extra), temp_path);
        let output = self.session.exec(&command);
        // Best effort cleanup either way
        let _ = self.session.exec(&format!("rm -f {temp_path}"));
        Ok(output?)
    }
}

impl SqlRunner for SshMysqlRunner {
    fn execute(&self, statement: &str, database: Option<&str>) -> Result<()> {
        debug!("Executing SQL statement ({} bytes)", statement.len());
        let temp_path = self.upload_temp(statement)?;
        let output = self.run_file(&temp_path, database, "")?;

        if output.exit_code != 0 {
            return Err(Error::sql("statement", output.stderr.trim().to_string()));
        }
        Ok(())
    }

    fn query_scalar(&self, query: &str, database: Option<&str>) -> Result<Option<String>> {
        let temp_path = self.upload_temp(query)?;
        let output = self.run_file(&temp_path, database, "-N -B")?;

        if output.exit_code != 0 {
            return Err(Error::sql("query", output.stderr.trim().to_string()));
        }

        let first = output
            .stdout
            .lines()
            .next()
            .map(|line| line.split('\t').next().unwrap_or(line).to_string());
        Ok(first.filter(|s| !s.is_empty()))
    }
}

pub mod testing {
    //! Recording runner for exercising executor and seed logic offline

    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    /// Captures executed statements; scalar queries answer from a table
    /// of canned responses keyed by substring.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub statements: RefCell<Vec<(Option<String>, String)>>,
        pub scalar_responses: RefCell<HashMap<String, String>>,
        pub fail_on: RefCell<Option<String>>,
    }

    impl RecordingRunner {
        pub fn executed(&self) -> Vec<String> {
            self.statements
                .borrow()
                .iter()
                .map(|(_, s)| s.clone())
                .collect()
        }

        pub fn respond_with(&self, needle: &str, value: &str) {
            self.scalar_responses
                .borrow_mut()
                .insert(needle.to_string(), value.to_string());
        }
    }

    impl SqlRunner for RecordingRunner {
        fn execute(&self, statement: &str, database: Option<&str>) -> Result<()> {
            if let Some(needle) = self.fail_on.borrow().as_deref() {
                if statement.contains(needle) {
                    return Err(Error::sql("statement", "simulated server rejection"));
                }
            }
            self.statements
                .borrow_mut()
                .push((database.map(String::from), statement.to_string()));
            Ok(())
        }

        fn query_scalar(&self, query: &str, _database: Option<&str>) -> Result<Option<String>> {
            for (needle, value) in self.scalar_responses.borrow().iter() {
                if query.contains(needle.as_str()) {
                    return Ok(Some(value.clone()));
                }
            }
            Ok(None)
        }
    }
}
