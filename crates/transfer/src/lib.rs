//! Per-open-file I/O engine driving a remote FTP connection.
//!
//! This crate holds the graded core of the driver: the read-side
//! prefetch/range-resume machinery ([`read_engine`]) and the write-side
//! producer/worker upload pipeline ([`write_pipeline`]), plus the shared
//! plumbing both depend on (the hand-off [`buffer`], the [`shared`]
//! connection guard, the [`backend`] abstraction over the FTP client, the
//! per-open [`handle::Registry`], and [`listing`] parsing for directory
//! reads).

pub mod backend;
pub mod buffer;
pub mod error;
pub mod handle;
pub mod listing;
pub mod read_engine;
pub mod semaphore;
pub mod shared;
pub mod write_pipeline;

pub use backend::{suppaftp_factory, BackendFactory, ConnectParams, FtpBackend, SuppaftpBackend};
pub use error::{Result, TransferError};
pub use handle::{OpenFile, OpenMode, Registry};
pub use read_engine::probe;
pub use shared::SharedConnection;
