use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendFactory, FtpBackend};
use crate::error::{Result, TransferError};

/// The in-memory "remote server" a [`MockBackend`] talks to. Shared via
/// `Arc` across the mock shared connection and every mock upload connection
/// it spawns, so a write through one handle is visible to a read through
/// another -- the same observable behaviour a real FTP server gives two
/// connections to the same account.
#[derive(Default)]
struct MockFs {
    files: HashMap<String, Vec<u8>>,
    dirs: std::collections::HashSet<String>,
}

/// An in-memory [`FtpBackend`] for exercising the read/write engine without a
/// live server. One instance models one connection; `data` holds whatever
/// in-progress download or upload session is active, mirroring
/// `SuppaftpBackend`.
pub struct MockBackend {
    fs: Arc<Mutex<MockFs>>,
    download: Option<(Vec<u8>, usize)>,
    upload: Option<(String, Vec<u8>)>,
}

impl MockBackend {
    fn new(fs: Arc<Mutex<MockFs>>) -> Self {
        Self {
            fs,
            download: None,
            upload: None,
        }
    }
}

/// A handle onto the shared in-memory server behind a family of
/// [`MockBackend`] connections, so tests can seed files and hand out a
/// [`BackendFactory`] in one place.
#[derive(Clone, Default)]
pub struct MockFilesystem {
    fs: Arc<Mutex<MockFs>>,
}

impl MockFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, path: &str, contents: &[u8]) {
        let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        fs.files.insert(path.to_string(), contents.to_vec());
    }

    /// Returns a factory producing backends that all share this filesystem.
    pub fn factory(&self) -> BackendFactory {
        let fs = Arc::clone(&self.fs);
        Arc::new(move || -> Result<Box<dyn FtpBackend>> {
            Ok(Box::new(MockBackend::new(Arc::clone(&fs))))
        })
    }
}

impl FtpBackend for MockBackend {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn size(&mut self, path: &str) -> Result<u64> {
        let fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        fs.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| TransferError::NotFound(path.to_string()))
    }

    fn list_lines(&mut self, path: &str, _list_cmd: &str) -> Result<Vec<String>> {
        let fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let mut lines = Vec::new();
        for (name, data) in &fs.files {
            if let Some(rest) = name.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    lines.push(format!(
                        "-rw-r--r-- 1 owner group {} Jan 1 00:00 {rest}",
                        data.len()
                    ));
                }
            }
        }
        for dir in &fs.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    lines.push(format!("drwxr-xr-x 2 owner group 0 Jan 1 00:00 {rest}"));
                }
            }
        }
        Ok(lines)
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        fs.dirs.insert(path.to_string());
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        if fs.dirs.remove(path) {
            Ok(())
        } else {
            Err(TransferError::NotFound(path.to_string()))
        }
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        if fs.files.remove(path).is_some() {
            Ok(())
        } else {
            Err(TransferError::NotFound(path.to_string()))
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        let data = fs
            .files
            .remove(from)
            .ok_or_else(|| TransferError::NotFound(from.to_string()))?;
        fs.files.insert(to.to_string(), data);
        Ok(())
    }

    fn quote(&mut self, _command: &str) -> Result<()> {
        Ok(())
    }

    fn begin_download(&mut self, path: &str, restart_at: u64) -> Result<()> {
        let fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
        let data = fs
            .files
            .get(path)
            .ok_or_else(|| TransferError::NotFound(path.to_string()))?
            .clone();
        let restart_at = restart_at as usize;
        if restart_at > data.len() {
            return Err(TransferError::io(format!(
                "restart offset {restart_at} past end of {path} ({} bytes)",
                data.len()
            )));
        }
        self.download = Some((data, restart_at));
        Ok(())
    }

    fn read_download(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let (data, pos) = self.download.as_mut().expect(
            "read_download called without a prior begin_download: programming error in the read engine",
        );
        let remaining = &data[*pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        *pos += n;
        Ok(n)
    }

    fn finish_download(&mut self) -> Result<()> {
        self.download = None;
        Ok(())
    }

    fn begin_upload(&mut self, path: &str, append: bool) -> Result<()> {
        let existing = if append {
            let fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
            fs.files.get(path).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };
        self.upload = Some((path.to_string(), existing));
        Ok(())
    }

    fn write_upload(&mut self, buf: &[u8]) -> Result<()> {
        let (_, data) = self.upload.as_mut().expect(
            "write_upload called without a prior begin_upload: programming error in the write pipeline",
        );
        data.extend_from_slice(buf);
        Ok(())
    }

    fn finish_upload(&mut self) -> Result<()> {
        if let Some((path, data)) = self.upload.take() {
            let mut fs = self.fs.lock().unwrap_or_else(|e| e.into_inner());
            fs.files.insert(path, data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_through_shared_fs() {
        let mock_fs = MockFilesystem::new();
        let factory = mock_fs.factory();
        let mut uploader = factory().unwrap();
        uploader.begin_upload("/a.txt", false).unwrap();
        uploader.write_upload(b"hello").unwrap();
        uploader.finish_upload().unwrap();

        let mut reader = factory().unwrap();
        reader.begin_download("/a.txt", 0).unwrap();
        let mut buf = [0u8; 16];
        let n = reader.read_download(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn append_upload_preserves_existing_prefix() {
        let mock_fs = MockFilesystem::new();
        mock_fs.seed_file("/a.txt", b"hello ");
        let factory = mock_fs.factory();
        let mut uploader = factory().unwrap();
        uploader.begin_upload("/a.txt", true).unwrap();
        uploader.write_upload(b"world").unwrap();
        uploader.finish_upload().unwrap();

        let mut reader = factory().unwrap();
        assert_eq!(reader.size("/a.txt").unwrap(), 11);
    }

    #[test]
    fn download_past_end_restart_offset_is_an_error() {
        let mock_fs = MockFilesystem::new();
        mock_fs.seed_file("/a.txt", b"short");
        let factory = mock_fs.factory();
        let mut reader = factory().unwrap();
        assert!(reader.begin_download("/a.txt", 1000).is_err());
    }
}
