use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::BackendFactory;
use crate::error::{Result, TransferError};
use crate::read_engine::ReadSession;
use crate::shared::SharedConnection;
use crate::write_pipeline::WritePipeline;

/// How a file was opened, fixed for the lifetime of the handle (spec §3: a
/// handle is read-only, write-only, or the documented read-write
/// workaround).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    /// Allowed only when the caller has opted into the compile-time
    /// workaround (spec §9 open question); otherwise `open`/`create` reject
    /// `O_RDWR` with `Unsupported`.
    ReadWrite,
}

/// One open file: either a read session against the shared connection, a
/// write pipeline on its own dedicated connection, or both (read-write
/// workaround mode).
pub struct OpenFile {
    pub path: String,
    pub mode: OpenMode,
    read: Option<ReadSession>,
    write: Option<WritePipeline>,
    /// Present when a write-capable handle was opened without create or
    /// truncate: the pipeline isn't started yet, and this factory is
    /// consumed the moment a write is legal to start (spec §4.3 "Without
    /// either: defer start until a subsequent truncate-to-zero").
    pending_factory: Option<BackendFactory>,
    /// Set by `truncate_to_zero` to allow a lazy-started pipeline's first
    /// write to begin at offset 0 even though `written` is already 0 at
    /// open time for a file that didn't previously exist at this path.
    write_may_start: bool,
    /// Bytes the producer believes it has handed to the worker so far,
    /// seeded at `starting_offset` for a resumed append (spec §3 `pos`).
    written: u64,
    /// Set once a write has failed; every subsequent write on this handle
    /// short-circuits with the same error instead of re-entering a dead
    /// pipeline (spec §3/§9: `write_fail_cause` latches).
    write_fail_cause: Option<TransferError>,
}

impl OpenFile {
    pub fn new_read(path: String) -> Self {
        Self {
            path,
            mode: OpenMode::Read,
            read: Some(ReadSession::with_shrink(true)),
            write: None,
            pending_factory: None,
            write_may_start: false,
            written: 0,
            write_fail_cause: None,
        }
    }

    /// `starting_offset` is the remote file's size at open time when
    /// `append` is set (the caller already issued a `SIZE` to decide between
    /// append and truncate-on-create), `0` otherwise; it seeds the
    /// sequential-write check so the first `write` call is expected at that
    /// offset rather than at zero. Used for create and create-or-truncate
    /// opens, where the worker starts immediately.
    pub fn new_write(
        path: String,
        factory: BackendFactory,
        append: bool,
        starting_offset: u64,
        read_write: bool,
    ) -> Result<Self> {
        let write = WritePipeline::start(factory, path.clone(), append)?;
        Ok(Self {
            path,
            mode: if read_write {
                OpenMode::ReadWrite
            } else {
                OpenMode::Write
            },
            read: if read_write {
                // A read-write handle must not shrink its window: spec §3
                // ties `can_shrink` to read-only opens.
                Some(ReadSession::with_shrink(false))
            } else {
                None
            },
            write: Some(write),
            pending_factory: None,
            write_may_start: false,
            written: starting_offset,
            write_fail_cause: None,
        })
    }

    /// Opens a write-capable handle without create or truncate: the pipeline
    /// is started lazily, either by an explicit `truncate_to_zero` followed
    /// by a write at offset 0, or directly by a resumed write at
    /// `offset == starting_offset` (spec §4.3 "first write(offset=0) on a
    /// freshly truncated file" and "resumed write(offset=pos>0)").
    pub fn new_write_pending(
        path: String,
        factory: BackendFactory,
        starting_offset: u64,
        read_write: bool,
    ) -> Self {
        Self {
            path,
            mode: if read_write {
                OpenMode::ReadWrite
            } else {
                OpenMode::Write
            },
            read: if read_write {
                Some(ReadSession::with_shrink(false))
            } else {
                None
            },
            write: None,
            pending_factory: Some(factory),
            write_may_start: false,
            written: starting_offset,
            write_fail_cause: None,
        }
    }

    pub fn read(
        &mut self,
        shared: &SharedConnection,
        fh: u64,
        offset: u64,
        size: usize,
    ) -> Result<Vec<u8>> {
        if self.written > 0 || self.write.is_some() || self.write_fail_cause.is_some() {
            return Err(TransferError::io(
                "read issued on a handle after data was written",
            ));
        }
        let session = self
            .read
            .as_mut()
            .ok_or_else(|| TransferError::Unsupported("handle has no read session".to_string()))?;
        session.read(shared, fh, &self.path, offset, size, true)
    }

    /// Marks a handle with a not-yet-started pipeline eligible to begin an
    /// upload at offset 0 (spec §4.4 truncate: "truncate to zero ...
    /// enables write_may_start"). Rejects an attempt on a handle whose
    /// pipeline has already started -- an in-flight upload has no seek.
    pub fn truncate_to_zero(&mut self) -> Result<()> {
        if self.write.is_some() {
            return Err(TransferError::Unsupported(
                "cannot truncate an in-progress upload".to_string(),
            ));
        }
        self.written = 0;
        self.write_may_start = true;
        Ok(())
    }

    /// Writes `data`, which must be contiguous with everything written so
    /// far (spec §3: non-sequential writes are rejected -- the write
    /// pipeline has no seek).
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if let Some(cause) = &self.write_fail_cause {
            return Err(clone_error(cause));
        }
        if self.write.is_none() {
            let can_start = offset == self.written && (self.written > 0 || self.write_may_start);
            if !can_start {
                let err = TransferError::Io(format!(
                    "non-sequential write at {offset}, expected {}",
                    self.written
                ));
                self.write_fail_cause = Some(clone_error(&err));
                return Err(err);
            }
            let factory = self.pending_factory.take().ok_or_else(|| {
                TransferError::Unsupported("handle has no write pipeline".to_string())
            })?;
            let append = self.written > 0;
            match WritePipeline::start(factory, self.path.clone(), append) {
                Ok(pipeline) => self.write = Some(pipeline),
                Err(err) => {
                    self.write_fail_cause = Some(clone_error(&err));
                    return Err(err);
                }
            }
        }
        if offset != self.written {
            let err = TransferError::Io(format!(
                "non-sequential write at {offset}, expected {}",
                self.written
            ));
            self.write_fail_cause = Some(clone_error(&err));
            return Err(err);
        }
        let pipeline = self
            .write
            .as_ref()
            .ok_or_else(|| TransferError::Unsupported("handle has no write pipeline".to_string()))?;
        match pipeline.write(data) {
            Ok(()) => {
                self.written += data.len() as u64;
                Ok(data.len())
            }
            Err(err) => {
                self.write_fail_cause = Some(clone_error(&err));
                Err(err)
            }
        }
    }

    /// Finalizes the upload and checks the remote's reported size against
    /// what the producer believes it sent.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(cause) = &self.write_fail_cause {
            return Err(clone_error(cause));
        }
        let Some(pipeline) = self.write.take() else {
            return Ok(());
        };
        let expected = self.written;
        match pipeline.finish() {
            Ok(actual) if actual == expected => Ok(()),
            Ok(actual) => {
                let err = TransferError::SizeMismatch { expected, actual };
                self.write_fail_cause = Some(clone_error(&err));
                Err(err)
            }
            Err(err) => {
                self.write_fail_cause = Some(clone_error(&err));
                Err(err)
            }
        }
    }

    pub fn release(&mut self, shared: &SharedConnection, fh: u64) {
        if let Some(mut read) = self.read.take() {
            read.close(shared, fh);
        }
        // `write` is normally already consumed by `flush`; dropping a
        // still-present pipeline here aborts it rather than losing data
        // silently, since `Drop` signals the worker to shut down.
        self.write.take();
    }
}

fn clone_error(err: &TransferError) -> TransferError {
    TransferError::io(err.to_string())
}

/// All currently open files, keyed by the file handle the dispatcher hands
/// back to the kernel from `open`/`create`.
#[derive(Default)]
pub struct Registry {
    files: Mutex<HashMap<u64, OpenFile>>,
    next_fh: Mutex<u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: OpenFile) -> u64 {
        let mut next_fh = self.next_fh.lock().unwrap_or_else(|e| e.into_inner());
        *next_fh += 1;
        let fh = *next_fh;
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fh, file);
        fh
    }

    pub fn with<R>(&self, fh: u64, f: impl FnOnce(&mut OpenFile) -> Result<R>) -> Result<R> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let file = files
            .get_mut(&fh)
            .ok_or_else(|| TransferError::Io(format!("unknown file handle {fh}")))?;
        f(file)
    }

    pub fn remove(&self, fh: u64) -> Option<OpenFile> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).remove(&fh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFilesystem;

    #[test]
    fn non_sequential_write_is_rejected_and_latches() {
        let fs = MockFilesystem::new();
        let mut file =
            OpenFile::new_write("/a.txt".to_string(), fs.factory(), false, 0, false).unwrap();
        assert!(file.write(4, b"oops").is_err());
        // the latch means even a correct, sequential write now fails too.
        assert!(file.write(0, b"ok").is_err());
    }

    #[test]
    fn sequential_writes_then_flush_matches_expected_size() {
        let fs = MockFilesystem::new();
        let mut file =
            OpenFile::new_write("/a.txt".to_string(), fs.factory(), false, 0, false).unwrap();
        file.write(0, b"hello").unwrap();
        file.write(5, b" world").unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn resumed_append_seeds_the_expected_offset() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"prefix-");
        let mut file =
            OpenFile::new_write("/a.txt".to_string(), fs.factory(), true, 7, false).unwrap();
        // writing at offset 0 on a resumed handle is non-sequential: the
        // expected next offset is 7, the existing remote length.
        assert!(file.write(0, b"oops").is_err());
    }

    #[test]
    fn truncate_then_write_starts_a_deferred_pipeline() {
        let fs = MockFilesystem::new();
        fs.seed_file("/t/b", b"stale");
        let mut file = OpenFile::new_write_pending("/t/b".to_string(), fs.factory(), 5, false);
        file.truncate_to_zero().unwrap();
        file.write(0, b"xyz").unwrap();
        file.flush().unwrap();
    }

    #[test]
    fn resumed_write_on_a_pending_handle_starts_in_append_mode() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"prefix-");
        let mut file = OpenFile::new_write_pending("/a.txt".to_string(), fs.factory(), 7, false);
        file.write(7, b"suffix").unwrap();
        let n = file.flush();
        assert!(n.is_ok());
    }

    #[test]
    fn write_on_a_pending_handle_before_truncate_or_resume_is_rejected() {
        let fs = MockFilesystem::new();
        let mut file = OpenFile::new_write_pending("/t/c".to_string(), fs.factory(), 0, false);
        assert!(file.write(0, b"nope").is_err());
    }

    #[test]
    fn read_after_write_on_same_handle_is_unsupported() {
        let fs = MockFilesystem::new();
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut file =
            OpenFile::new_write("/a.txt".to_string(), fs.factory(), false, 0, false).unwrap();
        file.write(0, b"hi").unwrap();
        assert!(file.read(&shared, 1, 0, 2).is_err());
    }

    #[test]
    fn registry_round_trips_a_handle() {
        let registry = Registry::new();
        let fh = registry.insert(OpenFile::new_read("/a.txt".to_string()));
        let path = registry.with(fh, |f| Ok(f.path.clone())).unwrap();
        assert_eq!(path, "/a.txt");
        assert!(registry.remove(fh).is_some());
        assert!(registry.with(fh, |_| Ok(())).is_err());
    }
}
