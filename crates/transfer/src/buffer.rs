use crate::error::{Result, TransferError};

/// A growable contiguous byte region with an associated `begin_offset`.
///
/// Used both as the read-side sliding window (`OpenFile::read_buf`) and as
/// the write-side producer/worker hand-off (`OpenFile::stream_buf`). Carries
/// no synchronization of its own; callers hold the appropriate mutex or
/// semaphore before touching it.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    /// The remote-file offset of `data[0]`. Meaningful only for the
    /// read-side window; the write-side hand-off buffer ignores it.
    pub begin_offset: u64,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Appends `bytes` to the end of the buffer. Fails with
    /// `TransferError::OutOfMemory` if growing the backing allocation fails,
    /// rather than aborting the process the way an unchecked `Vec::extend`
    /// would on allocator exhaustion.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| TransferError::OutOfMemory)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Empties the buffer but keeps its capacity, mirroring the original's
    /// `len = 0` without a reallocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drops the first `n` bytes, moving the remainder to the front.
    /// Callers are responsible for advancing `begin_offset` by `n`
    /// themselves when `n` bytes have been consumed from the head of a
    /// read-side window.
    pub fn shift_prefix(&mut self, n: usize) {
        assert!(n <= self.data.len(), "shift_prefix: n exceeds buffer length");
        self.data.drain(..n);
    }

    /// Copies up to `dest.len()` bytes starting at `offset` within the
    /// buffer, returning how many were copied.
    pub fn copy_out(&self, offset: usize, dest: &mut [u8]) -> usize {
        let available = self.data.len().saturating_sub(offset);
        let n = available.min(dest.len());
        dest[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_grows_and_preserves_order() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello").unwrap();
        buf.append(b" world").unwrap();
        assert_eq!(buf.as_slice(), b"hello world");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn clear_preserves_capacity_but_empties_len() {
        let mut buf = ByteBuffer::new();
        buf.append(b"0123456789").unwrap();
        let cap_before = buf.data.capacity();
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert!(buf.data.capacity() >= cap_before);
    }

    #[test]
    fn shift_prefix_drops_consumed_head() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abcdefgh").unwrap();
        buf.shift_prefix(3);
        assert_eq!(buf.as_slice(), b"defgh");
    }

    #[test]
    fn copy_out_clamps_to_available_bytes() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abcdef").unwrap();
        let mut dest = [0u8; 10];
        let n = buf.copy_out(4, &mut dest);
        assert_eq!(n, 2);
        assert_eq!(&dest[..2], b"ef");
    }
}
