use std::fmt;

/// The error taxonomy from the driver's error-handling design: every variant
/// maps to exactly one host-level negative-errno family at the dispatcher
/// boundary (see `driver::errno`).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Path absent on the remote server.
    #[error("not found: {0}")]
    NotFound(String),

    /// Server rejected the operation, an exclusive-create raced an existing
    /// path, or the open mode is unsupported for this handle.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Append mode, unsupported truncate targets, read-write when the
    /// compile-time workaround is disabled, and similar unsupported
    /// combinations.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Transfer-library failure, a non-OK completion, a non-sequential
    /// write, a read issued after a write on the same handle, or a worker
    /// startup failure.
    #[error("I/O failure: {0}")]
    Io(String),

    /// The remote size observed after a flush disagreed with `pos`, the
    /// number of bytes the producer believes it handed off. Kept as its own
    /// variant (rather than folded into `Io`) so it stays distinguishable
    /// from a plain transport failure, mirroring the original's in-band
    /// sentinel for `write_fail_cause`.
    #[error("remote size {actual} disagrees with {expected} bytes written")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A `ByteBuffer::append` allocation failed.
    #[error("out of memory")]
    OutOfMemory,
}

impl TransferError {
    pub fn io(msg: impl fmt::Display) -> Self {
        Self::Io(msg.to_string())
    }
}

impl From<suppaftp::FtpError> for TransferError {
    fn from(err: suppaftp::FtpError) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
