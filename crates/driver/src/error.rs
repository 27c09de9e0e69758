use transfer::TransferError;

/// Crate-local error type, mostly a thin wrapper so `driver` has its own
/// public error surface (spec §7: "each crate gets a `thiserror`-derived
/// error enum") even though most of its content is a passthrough of
/// [`TransferError`].
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("invalid UTF-8 in path component")]
    InvalidPath,

    #[error("unknown inode {0}")]
    UnknownInode(u64),
}

/// Maps the error taxonomy from spec §7 onto FUSE's negative-errno
/// convention at the dispatcher boundary.
pub fn to_errno(err: &DriverError) -> i32 {
    match err {
        DriverError::Transfer(TransferError::NotFound(_)) => libc::ENOENT,
        DriverError::Transfer(TransferError::PermissionDenied(_)) => libc::EACCES,
        DriverError::Transfer(TransferError::Unsupported(_)) => libc::ENOTSUP,
        DriverError::Transfer(TransferError::Io(_)) => libc::EIO,
        DriverError::Transfer(TransferError::SizeMismatch { .. }) => libc::EIO,
        DriverError::Transfer(TransferError::OutOfMemory) => libc::ENOMEM,
        DriverError::InvalidPath => libc::EILSEQ,
        DriverError::UnknownInode(_) => libc::ENOENT,
    }
}
