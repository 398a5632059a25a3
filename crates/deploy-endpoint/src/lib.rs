//! Endpoint drivers for the deploy engine
//!
//! An endpoint is an addressable file-tree root reachable through one of
//! two transports: a local filesystem path (possibly a UNC share) or a
//! remote SSH host over SFTP. Both expose the same capability set so the
//! sync engine never branches on transport.

pub mod driver;
pub mod error;
pub mod local;
pub mod pool;
pub mod record;
pub mod retry;
pub mod ssh;

pub use driver::{ExecOutput, FileDriver};
pub use error::{Error, Result};
pub use local::LocalDriver;
pub use record::FileRecord;
pub use retry::with_retry;
pub use ssh::{SshAuth, SshDriver, SshSession, SshSettings};
