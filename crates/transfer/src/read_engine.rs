use std::io::ErrorKind;
use std::time::Duration;

use crate::backend::FtpBackend;
use crate::buffer::ByteBuffer;
use crate::error::{Result, TransferError};
use crate::shared::SharedConnection;

/// The data socket's read timeout while pumping a download, mirroring the
/// original's one-second `select()` poll interval.
const PUMP_TIMEOUT: Duration = Duration::from_secs(1);

/// Soft cap on the read-side sliding window (spec §4.2 step 6). Once the
/// window grows past this and `can_shrink` is set, the consumed prefix is
/// dropped rather than kept around for a backward re-read.
const SHRINK_CAP: usize = 300 * 1024;

/// Per-open-file read-side state: the sliding window buffer plus whether a
/// `RETR` is currently in flight on the shared connection.
pub struct ReadSession {
    buf: ByteBuffer,
    active: bool,
    complete: bool,
    /// True for read-only opens (spec §3 `OpenFile::can_shrink`); false for
    /// the read-write workaround, where the window is kept intact instead
    /// of being shrunk after every serve.
    can_shrink: bool,
    /// Highest offset served to the caller so far; informational (spec §3
    /// `last_offset`), exposed for callers that want it but not otherwise
    /// consulted by this type.
    last_offset: u64,
    /// Counts transfer restarts (cache-miss / backward-seek / ownership
    /// changes), exposed for the test hook in spec §8 scenario 3.
    restarts: u64,
}

impl ReadSession {
    pub fn new() -> Self {
        Self::with_shrink(true)
    }

    pub fn with_shrink(can_shrink: bool) -> Self {
        Self {
            buf: ByteBuffer::new(),
            active: false,
            complete: false,
            can_shrink,
            last_offset: 0,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Serves `want` bytes starting at `offset` from `path`, restarting the
    /// remote transfer only when the request can't be satisfied by
    /// continuing the in-flight one.
    ///
    /// 1. cache hit: the window already covers `[offset, offset+want)`.
    /// 2. restart: `offset` falls outside what the window can reach by
    ///    pumping forward, so the in-flight `RETR` (if any) is abandoned and
    ///    a fresh one is started with `REST offset`.
    /// 3. pump loop: read from the data connection, one second at a time,
    ///    until the window covers the request or the transfer completes.
    /// 4. completion check: `Ok(0)` finalizes the transfer.
    /// 5. serve: copy the covered (possibly short, at EOF) range out.
    /// 6. shrink: drop the now-stale prefix of the window.
    pub fn read(
        &mut self,
        shared: &SharedConnection,
        fh: u64,
        path: &str,
        offset: u64,
        want: usize,
        update_position: bool,
    ) -> Result<Vec<u8>> {
        let mut guard = shared.lock();

        // A different handle may have used this connection since our last
        // call (spec §3: "switching owners requires detaching"). When that
        // happens the wire no longer has our transfer in flight no matter
        // what our own `active` flag says, so force a restart.
        if guard.claim_download(fh)? {
            self.active = false;
        }

        let needs_restart = !self.active
            || offset < self.buf.begin_offset
            || offset > self.buf.begin_offset + self.buf.len() as u64;

        if needs_restart {
            if self.active {
                let _ = guard.finish_download();
            }
            guard.set_read_timeout(PUMP_TIMEOUT)?;
            guard.begin_download(path, offset)?;
            self.buf.clear();
            self.buf.begin_offset = offset;
            self.active = true;
            self.complete = false;
            self.restarts += 1;
        }

        let rel_start = (offset - self.buf.begin_offset) as usize;
        let rel_end = rel_start + want;

        let mut chunk = [0u8; 64 * 1024];
        while self.buf.len() < rel_end && !self.complete {
            match guard.read_download(&mut chunk) {
                Ok(0) => {
                    self.complete = true;
                    guard.finish_download()?;
                    self.active = false;
                }
                Ok(n) => {
                    self.buf.append(&chunk[..n])?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    // the original's "select() timed out, keep pumping"
                    continue;
                }
                Err(e) => return Err(TransferError::from(e)),
            }
        }

        let available = self.buf.len().saturating_sub(rel_start);
        let n = available.min(want);
        let mut out = vec![0u8; n];
        self.buf.copy_out(rel_start, &mut out);

        if update_position {
            self.last_offset = offset + n as u64;
        }

        // Shrink: only drop the consumed prefix once the window has grown
        // past the soft cap, and only for handles that are allowed to
        // shrink at all (spec §3/§4.2 step 6).
        if self.can_shrink && self.buf.len() > SHRINK_CAP && rel_start > 0 {
            self.buf.shift_prefix(rel_start);
            self.buf.begin_offset += rel_start as u64;
        }

        Ok(out)
    }

    /// Abandons any in-flight transfer, e.g. on `release`.
    pub fn close(&mut self, shared: &SharedConnection, fh: u64) {
        if self.active {
            let mut guard = shared.lock();
            // Only finalize and clear ownership if we still hold it: a
            // different handle may have already claimed and finished our
            // transfer on our behalf.
            if guard.is_current_owner(fh) {
                let _ = guard.finish_download();
                guard.release_download(fh);
            }
            self.active = false;
        }
        self.buf.clear();
        self.complete = false;
    }
}

/// Reserved pseudo file handle used by [`probe`], which runs before a real
/// handle exists yet. `Registry` hands out real handles starting at `1`, so
/// this never collides with one.
const PROBE_FH: u64 = 0;

/// A zero-byte probe at offset 0, used by `open` to verify a remote path is
/// reachable without disturbing any session state (spec §4.2: "A zero-byte
/// read at offset 0 is used during open as a probe that establishes the
/// initial window and verifies the remote file is reachable").
pub fn probe(shared: &SharedConnection, path: &str) -> Result<()> {
    let mut guard = shared.lock();
    guard.claim_download(PROBE_FH)?;
    guard.set_read_timeout(PUMP_TIMEOUT)?;
    guard.begin_download(path, 0)?;
    let result = guard.finish_download();
    guard.release_download(PROBE_FH);
    result
}

impl Default for ReadSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockFilesystem;

    #[test]
    fn sequential_reads_serve_from_a_single_session() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"0123456789");
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut session = ReadSession::new();

        let first = session.read(&shared, 1, "/a.txt", 0, 4, true).unwrap();
        assert_eq!(first, b"0123");
        let second = session.read(&shared, 1, "/a.txt", 4, 4, true).unwrap();
        assert_eq!(second, b"4567");
        assert_eq!(session.restarts(), 1);
        assert_eq!(session.last_offset(), 8);
    }

    #[test]
    fn backward_seek_restarts_the_transfer() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"0123456789");
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut session = ReadSession::new();

        session.read(&shared, 1, "/a.txt", 6, 4, true).unwrap();
        let rewound = session.read(&shared, 1, "/a.txt", 0, 3, true).unwrap();
        assert_eq!(rewound, b"012");
        assert_eq!(session.restarts(), 2);
    }

    #[test]
    fn a_second_handle_reading_first_does_not_strand_the_first_handles_session() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"0123456789");
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut first = ReadSession::new();
        let mut second = ReadSession::new();

        // First handle starts a download and leaves it in flight.
        let a = first.read(&shared, 1, "/a.txt", 0, 4, true).unwrap();
        assert_eq!(a, b"0123");

        // Second handle reads before the first ever closes: this must
        // detach the first handle's transfer rather than silently drop it,
        // and must not panic when the underlying stream is gone.
        let b = second.read(&shared, 2, "/a.txt", 0, 4, true).unwrap();
        assert_eq!(b, b"0123");

        // The first handle resuming afterward re-detaches the second
        // handle's transfer and restarts cleanly rather than reading from a
        // stale or absent stream.
        let a_continued = first.read(&shared, 1, "/a.txt", 4, 4, true).unwrap();
        assert_eq!(a_continued, b"4567");
        assert!(first.restarts() >= 2);
    }

    #[test]
    fn read_past_eof_returns_a_short_read() {
        let fs = MockFilesystem::new();
        fs.seed_file("/a.txt", b"short");
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut session = ReadSession::new();

        let out = session.read(&shared, 1, "/a.txt", 0, 100, true).unwrap();
        assert_eq!(out, b"short");
    }

    #[test]
    fn window_stays_bounded_under_the_shrink_cap() {
        let fs = MockFilesystem::new();
        let data = vec![7u8; 1024 * 1024];
        fs.seed_file("/big.bin", &data);
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut session = ReadSession::new();

        let chunk = 64 * 1024;
        let mut offset = 0u64;
        while (offset as usize) < data.len() {
            let out = session
                .read(&shared, 1, "/big.bin", offset, chunk, true)
                .unwrap();
            assert!(out.len() <= chunk);
            offset += out.len() as u64;
        }
        assert!(session.buf.len() <= SHRINK_CAP + chunk);
    }

    #[test]
    fn non_shrinking_session_keeps_the_full_window() {
        let fs = MockFilesystem::new();
        let data = vec![9u8; 1024 * 1024];
        fs.seed_file("/big.bin", &data);
        let shared = SharedConnection::connect(&fs.factory()).unwrap();
        let mut session = ReadSession::with_shrink(false);

        session.read(&shared, 1, "/big.bin", 0, 512 * 1024, true).unwrap();
        session
            .read(&shared, 1, "/big.bin", 512 * 1024, 400 * 1024, true)
            .unwrap();
        assert!(session.buf.len() > SHRINK_CAP);
    }
}
