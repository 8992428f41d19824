//! Session orchestration for the code relay.
//!
//! Provides:
//! - `Session` - per-connection state machine and request dispatcher
//! - `spawn_reporter` - periodic listing of the working directory
//! - `FileStore` - file operations confined to a base directory

pub mod config;
pub mod reporter;
pub mod session;
pub mod storage;

pub use config::SessionConfig;
pub use reporter::{ReporterHandle, list_files, spawn_reporter};
pub use session::{Session, SessionError};
pub use storage::{FileStore, FileStoreError};
