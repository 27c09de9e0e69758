//! `fuser::Filesystem` dispatcher mapping FUSE upcalls onto the transfer
//! engine.
//!
//! [`fs::FtpFilesystem`] is the only thing callers need: it owns the shared
//! connection, the per-open file registry, and the path<->inode bridge, and
//! wires them together the way spec §4.4 describes the dispatcher.

pub mod config;
pub mod error;
pub mod fs;
pub mod inode;

pub use config::MountConfig;
pub use error::{to_errno, DriverError};
pub use fs::FtpFilesystem;
