use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use crate::backend::{BackendFactory, FtpBackend};
use crate::error::Result;

/// The single FTP connection shared by all reads and metadata RPCs
/// (`getattr`, `readdir`, `mkdir`, `rmdir`, `unlink`, `rename`, `SITE
/// CHMOD`/`CHOWN`). Every dedicated per-upload connection is separate and
/// does not touch this state.
pub struct SharedConnection {
    state: Mutex<SharedState>,
}

struct SharedState {
    backend: Box<dyn FtpBackend>,
    /// Which open file last used this connection for a download (spec §3
    /// `current_fh`); `None` when no download is in flight. Starting a
    /// download for a different owner must finalize whichever transfer is
    /// in flight first -- switching owners requires detaching.
    current_fh: Option<u64>,
}

impl SharedConnection {
    /// Connects once, eagerly, at mount time.
    pub fn connect(factory: &BackendFactory) -> Result<Self> {
        let mut backend = factory()?;
        backend.connect()?;
        Ok(Self {
            state: Mutex::new(SharedState {
                backend,
                current_fh: None,
            }),
        })
    }

    /// Acquires the connection for the duration of one operation. The
    /// returned guard must be held for the entire read or metadata RPC;
    /// dropping it early and reacquiring would let another thread's
    /// operation interleave mid-command on the wire.
    pub fn lock(&self) -> SharedGuard<'_> {
        SharedGuard {
            guard: self.state.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// A held lock on the shared connection: derefs to the backend trait
/// object for every RPC that doesn't need ownership coordination, plus the
/// download-ownership bookkeeping the read engine drives explicitly.
pub struct SharedGuard<'a> {
    guard: MutexGuard<'a, SharedState>,
}

impl SharedGuard<'_> {
    /// Ensures the in-flight download, if any, belongs to `fh`: finalizes
    /// the previous owner's transfer first when ownership is changing.
    /// Returns whether ownership changed, which the caller must treat as
    /// "no transfer is live on the wire any more" even if its own state
    /// still looks like one is.
    pub fn claim_download(&mut self, fh: u64) -> Result<bool> {
        let switched = self.guard.current_fh != Some(fh);
        if switched {
            if self.guard.current_fh.is_some() {
                self.guard.backend.finish_download()?;
            }
            self.guard.current_fh = Some(fh);
        }
        Ok(switched)
    }

    /// True when `fh` is the handle currently recorded as owning the
    /// connection's in-flight download.
    pub fn is_current_owner(&self, fh: u64) -> bool {
        self.guard.current_fh == Some(fh)
    }

    /// Clears ownership once `fh` is done with it, e.g. on `release`, so a
    /// later distinct handle doesn't believe it must detach an
    /// already-finished transfer.
    pub fn release_download(&mut self, fh: u64) {
        if self.guard.current_fh == Some(fh) {
            self.guard.current_fh = None;
        }
    }
}

impl Deref for SharedGuard<'_> {
    type Target = dyn FtpBackend;

    fn deref(&self) -> &Self::Target {
        &*self.guard.backend
    }
}

impl DerefMut for SharedGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.guard.backend
    }
}
