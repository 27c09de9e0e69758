use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::backend::{BackendFactory, FtpBackend};
use crate::buffer::ByteBuffer;
use crate::error::{Result, TransferError};
use crate::semaphore::Semaphore;

/// Upload is aborted if a full second-long watchdog tick passes with fewer
/// than this many bytes written, repeated for `LOW_SPEED_SECONDS`.
const LOW_SPEED_LIMIT: u64 = 1;
const LOW_SPEED_SECONDS: u64 = 60;
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

struct Shared {
    sem_ready: Semaphore,
    sem_data_need: Semaphore,
    sem_data_avail: Semaphore,
    sem_data_written: Semaphore,
    buf: Mutex<ByteBuffer>,
    done: Mutex<bool>,
    startup: Mutex<Option<Result<()>>>,
    /// The remote's reported size once the upload has finalized, queried
    /// fresh off the backend rather than accumulated locally -- the local
    /// byte count the worker pushed this session excludes any prefix an
    /// append preserved (spec §4.4 flush: "verify the remote size equals
    /// pos via an attribute query").
    outcome: Mutex<Option<Result<u64>>>,
}

/// The producer/worker upload hand-off: the dispatcher's `write` calls hand
/// bytes to a dedicated upload connection running on a background thread, so
/// a slow or stalled remote doesn't block the calling FUSE thread forever.
pub struct WritePipeline {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl WritePipeline {
    /// Spawns the worker and blocks until its dedicated connection is
    /// established (or has failed to establish), mirroring the original's
    /// "producer never proceeds past its first write until the library
    /// handle is ready" ordering.
    pub fn start(factory: BackendFactory, path: String, append: bool) -> Result<Self> {
        let shared = Arc::new(Shared {
            sem_ready: Semaphore::new(),
            sem_data_need: Semaphore::new(),
            sem_data_avail: Semaphore::new(),
            sem_data_written: Semaphore::new(),
            buf: Mutex::new(ByteBuffer::new()),
            done: Mutex::new(false),
            startup: Mutex::new(None),
            outcome: Mutex::new(None),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("ftpfs-upload".into())
            .spawn(move || worker_loop(worker_shared, factory, path, append))
            .map_err(|e| TransferError::io(format!("spawning upload worker: {e}")))?;

        shared.sem_ready.wait();
        if let Some(Err(err)) = shared.startup.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = worker.join();
            return Err(err);
        }

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Hands `data` to the worker, blocking until it has been written to the
    /// remote (the producer contract: one in-flight chunk at a time, bounded
    /// memory). Once this returns `Err`, the worker has exited and the
    /// caller must not call `write` again on this pipeline -- only `finish`,
    /// to collect the terminal error and join the thread.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.shared.sem_data_need.wait();
        {
            let mut buf = self.shared.buf.lock().unwrap_or_else(|e| e.into_inner());
            buf.append(data)?;
        }
        self.shared.sem_data_avail.post();
        self.shared.sem_data_written.wait();

        let mut outcome = self.shared.outcome.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(Err(err)) = outcome.take() {
            return Err(err);
        }
        Ok(())
    }

    /// Signals end-of-data, waits for the worker to finalize the upload, and
    /// returns the total byte count the remote reports for the finished
    /// file.
    pub fn finish(mut self) -> Result<u64> {
        self.shared.sem_data_need.wait();
        *self.shared.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.shared.sem_data_avail.post();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        let outcome = self
            .shared
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        outcome.unwrap_or_else(|| Err(TransferError::io("upload worker exited without a result")))
    }
}

impl Drop for WritePipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            *self.shared.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
            self.shared.sem_data_avail.post();
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, factory: BackendFactory, path: String, append: bool) {
    let mut backend = match factory().and_then(|mut b| {
        b.connect()?;
        b.begin_upload(&path, append)?;
        Ok(b)
    }) {
        Ok(backend) => {
            *shared.startup.lock().unwrap_or_else(|e| e.into_inner()) = Some(Ok(()));
            backend
        }
        Err(err) => {
            *shared.startup.lock().unwrap_or_else(|e| e.into_inner()) = Some(Err(err));
            shared.sem_ready.post();
            return;
        }
    };
    shared.sem_ready.post();

    let mut bytes_written: u64 = 0;
    let mut last_progress = Instant::now();
    let mut failure: Option<TransferError> = None;

    loop {
        shared.sem_data_need.post();

        let received = loop {
            if shared.sem_data_avail.wait_timeout(WATCHDOG_TICK) {
                break true;
            }
            if last_progress.elapsed() >= Duration::from_secs(LOW_SPEED_SECONDS) {
                failure = Some(TransferError::io(format!(
                    "upload stalled: under {LOW_SPEED_LIMIT} B/s for {LOW_SPEED_SECONDS}s"
                )));
                break false;
            }
        };
        if !received {
            break;
        }

        let chunk = {
            let mut buf = shared.buf.lock().unwrap_or_else(|e| e.into_inner());
            let out = buf.as_slice().to_vec();
            buf.clear();
            out
        };
        let is_done = *shared.done.lock().unwrap_or_else(|e| e.into_inner());

        if chunk.is_empty() {
            if is_done {
                break;
            }
            // an empty `write(&[])` still owes the producer its post.
            shared.sem_data_written.post();
            continue;
        }

        if let Err(err) = backend.write_upload(&chunk) {
            failure = Some(err);
            shared.sem_data_written.post();
            break;
        }
        bytes_written += chunk.len() as u64;
        last_progress = Instant::now();
        shared.sem_data_written.post();

        if is_done {
            break;
        }
    }

    let result = match failure {
        Some(err) => {
            tracing::warn!(path = %path, bytes_written, error = %err, "upload worker failed");
            let _ = backend.finish_upload();
            Err(err)
        }
        None => backend.finish_upload().and_then(|()| backend.size(&path)),
    };
    *shared.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
    // Unblock a producer still waiting in `write` or `finish` after a
    // worker-side failure broke out of the loop early.
    shared.sem_data_written.post();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFilesystem;

    #[test]
    fn write_then_finish_round_trips() {
        let fs = MockFilesystem::new();
        let pipeline = WritePipeline::start(fs.factory(), "/out.txt".to_string(), false).unwrap();
        pipeline.write(b"hello ").unwrap();
        pipeline.write(b"world").unwrap();
        let n = pipeline.finish().unwrap();
        assert_eq!(n, 11);

        let shared = SharedTestHelper::read_all(&fs, "/out.txt");
        assert_eq!(shared, b"hello world");
    }

    #[test]
    fn append_preserves_existing_bytes() {
        let fs = MockFilesystem::new();
        fs.seed_file("/out.txt", b"prefix-");
        let pipeline = WritePipeline::start(fs.factory(), "/out.txt".to_string(), true).unwrap();
        pipeline.write(b"suffix").unwrap();
        let n = pipeline.finish().unwrap();
        // `finish` reports the remote's total size, not just the bytes this
        // session pushed, since it queries the backend fresh after append.
        assert_eq!(n, 13);

        let shared = SharedTestHelper::read_all(&fs, "/out.txt");
        assert_eq!(shared, b"prefix-suffix");
    }

    /// Minimal helper to read back a file through a fresh mock connection,
    /// avoiding a dependency on the (not yet written at this layer) read
    /// engine.
    struct SharedTestHelper;
    impl SharedTestHelper {
        fn read_all(fs: &MockFilesystem, path: &str) -> Vec<u8> {
            let mut backend = fs.factory()().unwrap();
            backend.begin_download(path, 0).unwrap();
            let mut out = Vec::new();
            let mut chunk = [0u8; 64];
            loop {
                let n = backend.read_download(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&chunk[..n]);
            }
            out
        }
    }
}
