//! SSH/SFTP driver
//!
//! One authenticated session per endpoint, shared between the SFTP channel
//! pool (file transfers) and exec channels (shell commands, SQL routing).
//! The session is owned by the orchestrator through an `Arc` and closed
//! once, in teardown.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh2::{OpenFlags, OpenType, Session, Sftp};
use tracing::{debug, info};

use deploy_fs::{validate_relative_path, NormalizedPath};

use crate::driver::{ExecOutput, FileDriver};
use crate::error::{Error, Result};
use crate::pool::SftpPool;
use crate::record::FileRecord;
use crate::retry::with_retry;

/// How an SSH endpoint authenticates: exactly one of the two.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Connection settings for one SSH host.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    /// TCP connect timeout, default 30 s
    pub connect_timeout: Duration,
    /// Per-operation timeout on the session, default 120 s
    pub op_timeout: Duration,
}

impl SshSettings {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            connect_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_secs(120),
        }
    }

    fn endpoint_label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// An authenticated SSH session.
///
/// Exec channels are serialized through an internal lock; SFTP traffic
/// goes through [`SftpPool`] channels instead, so shell execution and file
/// transfer never share a channel.
pub struct SshSession {
    session: Session,
    exec_lock: Mutex<()>,
    label: String,
    host: String,
}

impl SshSession {
    /// Connect and authenticate.
    ///
    /// Authentication failures are permanent ([`Error::Auth`]); TCP and
    /// DNS failures are reported as [`Error::Connect`].
    pub fn connect(settings: &SshSettings) -> Result<Arc<Self>> {
        let label = settings.endpoint_label();

        let addr = (settings.host.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|e| Error::Connect {
                endpoint: label.clone(),
                message: format!("address resolution failed: {e}"),
            })?
            .next()
            .ok_or_else(|| Error::Connect {
                endpoint: label.clone(),
                message: "host resolved to no addresses".to_string(),
            })?;

        let stream =
            TcpStream::connect_timeout(&addr, settings.connect_timeout).map_err(|e| {
                Error::Connect {
                    endpoint: label.clone(),
                    message: e.to_string(),
                }
            })?;

        let mut session = Session::new().map_err(|e| Error::ssh(label.clone(), e))?;
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| Error::ssh(label.clone(), e))?;

        match &settings.auth {
            SshAuth::Password(password) => session
                .userauth_password(&settings.username, password)
                .map_err(|e| Error::Auth {
                    endpoint: label.clone(),
                    message: e.to_string(),
                })?,
            SshAuth::KeyFile { path, passphrase } => session
                .userauth_pubkey_file(
                    &settings.username,
                    None,
                    path,
                    passphrase.as_deref(),
                )
                .map_err(|e| Error::Auth {
                    endpoint: label.clone(),
                    message: e.to_string(),
                })?,
        }

        if !session.authenticated() {
            return Err(Error::Auth {
                endpoint: label.clone(),
                message: "server rejected credentials".to_string(),
            });
        }

        session.set_timeout(settings.op_timeout.as_millis() as u32);
        info!("SSH session established with {}", label);

        Ok(Arc::new(Self {
            session,
            exec_lock: Mutex::new(()),
            label,
            host: settings.host.clone(),
        }))
    }

    /// The remote host name this session is connected to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Open a fresh SFTP channel on this session.
    pub fn open_sftp(&self) -> Result<Sftp> {
        self.session
            .sftp()
            .map_err(|e| Error::ssh(self.label.clone(), e))
    }

    /// Run a shell command over a dedicated exec channel.
    pub fn exec(&self, command: &str) -> Result<ExecOutput> {
        let _serial = self.exec_lock.lock().expect("exec lock poisoned");

        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| Error::ssh(self.label.clone(), e))?;
        channel
            .exec(command)
            .map_err(|e| Error::ssh(self.label.clone(), e))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| Error::io(command, e))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| Error::io(command, e))?;

        channel
            .wait_close()
            .map_err(|e| Error::ssh(self.label.clone(), e))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| Error::ssh(self.label.clone(), e))?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// SFTP driver rooted at a remote absolute path.
pub struct SshDriver {
    session: Arc<SshSession>,
    root: NormalizedPath,
    pool: SftpPool,
}

impl SshDriver {
    /// Open the driver over an established session.
    ///
    /// `channels` SFTP channels are opened up front and leased to
    /// transfer workers for their lifetime.
    pub fn open(session: Arc<SshSession>, root: NormalizedPath, channels: usize) -> Result<Self> {
        let mut opened = Vec::with_capacity(channels.max(1));
        for _ in 0..channels.max(1) {
            opened.push(session.open_sftp()?);
        }
        let pool = SftpPool::new(opened);
        debug!("Opened SSH endpoint at {}:{}", session.host(), root);
        Ok(Self {
            session,
            root,
            pool,
        })
    }

    /// The session backing this driver, for shared tunnel/exec use.
    pub fn session(&self) -> Arc<SshSession> {
        Arc::clone(&self.session)
    }

    fn resolve(&self, relative: &str) -> Result<String> {
        let validated = validate_relative_path(relative)?;
        Ok(self.root.join(&validated).as_str().to_string())
    }

    fn ssh_err(&self, context: &str, e: ssh2::Error) -> Error {
        // Missing-path statuses get their own kind so retry logic can
        // tell them apart from transport trouble
        if let ssh2::ErrorCode::SFTP(2) = e.code() {
            Error::NotFound {
                path: context.to_string(),
            }
        } else {
            Error::ssh(context.to_string(), e)
        }
    }

    fn list_dir_into(
        &self,
        sftp: &Sftp,
        dir: &str,
        relative: &str,
        follow_links: bool,
        in_flight: &mut Vec<String>,
        records: &mut Vec<FileRecord>,
        include_dirs: bool,
    ) -> Result<()> {
        // A path repeating on the traversal stack means a link cycle;
        // skip rather than recurse forever
        if in_flight.iter().any(|seen| seen == dir) {
            debug!("Skipping already-in-flight directory {}", dir);
            return Ok(());
        }
        in_flight.push(dir.to_string());

        let entries = sftp
            .readdir(Path::new(dir))
            .map_err(|e| self.ssh_err(dir, e))?;

        for (entry_path, stat) in entries {
            let name = match entry_path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let entry_rel = if relative.is_empty() {
                name.clone()
            } else {
                format!("{relative}/{name}")
            };
            let entry_full = format!("{dir}/{name}");

            let file_type = stat.file_type();
            let stat = if file_type.is_symlink() {
                if !follow_links {
                    continue;
                }
                // Follow one level: stat the target and list it in place
                match sftp.stat(Path::new(&entry_full)) {
                    Ok(target) => target,
                    // Dangling link; nothing to transfer
                    Err(_) => continue,
                }
            } else {
                stat
            };

            if stat.is_dir() {
                let descend_links = follow_links && !file_type.is_symlink();
                if include_dirs {
                    records.push(FileRecord {
                        path: entry_rel.clone(),
                        full_path: entry_full.clone(),
                        size: 0,
                        mtime: stat.mtime.unwrap_or(0) as i64,
                        is_dir: true,
                    });
                }
                self.list_dir_into(
                    sftp,
                    &entry_full,
                    &entry_rel,
                    descend_links,
                    in_flight,
                    records,
                    include_dirs,
                )?;
            } else {
                records.push(FileRecord {
                    path: entry_rel,
                    full_path: entry_full,
                    size: stat.size.unwrap_or(0),
                    mtime: stat.mtime.unwrap_or(0) as i64,
                    is_dir: false,
                });
            }
        }

        in_flight.pop();
        Ok(())
    }

    fn walk(&self, include_dirs: bool) -> Result<Vec<FileRecord>> {
        with_retry("remote listing", || {
            let sftp = self.pool.lease();
            let mut records = Vec::new();
            let mut in_flight = Vec::new();
            self.list_dir_into(
                &sftp,
                self.root.as_str(),
                "",
                true,
                &mut in_flight,
                &mut records,
                include_dirs,
            )?;
            Ok(records)
        })
    }

    fn ensure_remote_dir(&self, sftp: &Sftp, path: &str) -> Result<()> {
        if path.is_empty() || path == "/" || path == self.root.as_str() {
            return Ok(());
        }
        if sftp.stat(Path::new(path)).is_ok() {
            return Ok(());
        }

        if let Some(idx) = path.rfind('/') {
            self.ensure_remote_dir(sftp, &path[..idx])?;
        }

        match sftp.mkdir(Path::new(path), 0o755) {
            Ok(()) => Ok(()),
            // A concurrent worker may have created it between stat and mkdir
            Err(_) if sftp.stat(Path::new(path)).is_ok() => Ok(()),
            Err(e) => Err(self.ssh_err(path, e)),
        }
    }

    fn remove_dir_recursive(&self, sftp: &Sftp, path: &str) -> Result<()> {
        let entries = sftp
            .readdir(Path::new(path))
            .map_err(|e| self.ssh_err(path, e))?;

        for (entry_path, stat) in entries {
            let entry = entry_path.to_string_lossy().replace('\\', "/");
            if stat.is_dir() {
                self.remove_dir_recursive(sftp, &entry)?;
            } else {
                sftp.unlink(Path::new(&entry))
                    .map_err(|e| self.ssh_err(&entry, e))?;
            }
        }

        sftp.rmdir(Path::new(path))
            .map_err(|e| self.ssh_err(path, e))
    }
}

impl FileDriver for SshDriver {
    fn root(&self) -> &NormalizedPath {
        &self.root
    }

    fn list(&self) -> Result<Vec<FileRecord>> {
        self.walk(false)
    }

    fn list_tree(&self) -> Result<Vec<FileRecord>> {
        self.walk(true)
    }

    fn stat(&self, relative: &str) -> Result<Option<FileRecord>> {
        let full = self.resolve(relative)?;
        let sftp = self.pool.lease();
        match sftp.stat(Path::new(&full)) {
            Ok(stat) => Ok(Some(FileRecord {
                path: relative.replace('\\', "/"),
                full_path: full,
                size: stat.size.unwrap_or(0),
                mtime: stat.mtime.unwrap_or(0) as i64,
                is_dir: stat.is_dir(),
            })),
            Err(e) => match self.ssh_err(&full, e) {
                Error::NotFound { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    fn with_reader(
        &self,
        relative: &str,
        f: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let full = self.resolve(relative)?;
        let sftp = self.pool.lease();
        let mut file = sftp
            .open(Path::new(&full))
            .map_err(|e| self.ssh_err(&full, e))?;
        f(&mut file)
    }

    fn write_stream(&self, relative: &str, reader: &mut dyn Read) -> Result<u64> {
        let full = self.resolve(relative)?;
        let sftp = self.pool.lease();

        if let Some(idx) = full.rfind('/') {
            self.ensure_remote_dir(&sftp, &full[..idx])?;
        }

        let mut file = sftp
            .open_mode(
                Path::new(&full),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                0o644,
                OpenType::File,
            )
            .map_err(|e| self.ssh_err(&full, e))?;

        let written = std::io::copy(reader, &mut file).map_err(|e| Error::io(&full, e))?;
        Ok(written)
    }

    fn delete_file(&self, relative: &str) -> Result<()> {
        let full = self.resolve(relative)?;
        let sftp = self.pool.lease();
        match sftp.unlink(Path::new(&full)) {
            Ok(()) => Ok(()),
            Err(e) => match self.ssh_err(&full, e) {
                Error::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    fn delete_dir(&self, relative: &str) -> Result<()> {
        let full = self.resolve(relative)?;
        let sftp = self.pool.lease();
        match self.remove_dir_recursive(&sftp, &full) {
            Ok(()) => Ok(()),
            Err(Error::NotFound { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn exec(&self, command: &str) -> Result<ExecOutput> {
        self.session.exec(command)
    }

    fn is_remote(&self) -> bool {
        true
    }
}
