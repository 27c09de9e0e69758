use std::time::Duration;

use crate::error::{Result, TransferError};

/// Abstracts the remote-transfer library handle (spec §2, "Transfer
/// Client"). One implementor, [`SuppaftpBackend`], wraps a real FTP
/// connection; [`mock::MockBackend`] is an in-memory stand-in used by the
/// read/write engine test suite so those tests don't need a live server.
///
/// A `FtpBackend` models exactly one physical connection: the shared
/// connection used for reads and metadata RPCs, or one dedicated upload
/// connection. Download and upload are modelled as explicit begin/step/
/// finish sessions rather than returning a borrowed `Read`/`Write`, because
/// the underlying library (suppaftp) finalizes a data stream by consuming
/// it and handing the control connection back, which doesn't fit a
/// `&mut self -> Box<dyn Read>` trait-object shape cleanly.
pub trait FtpBackend: Send {
    /// Establishes the control connection and logs in.
    fn connect(&mut self) -> Result<()>;

    /// Read timeout applied to the data connection, used by the read
    /// engine's pump loop (spec §4.2 step 3) to remain responsive without a
    /// non-blocking multi interface.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn size(&mut self, path: &str) -> Result<u64>;
    fn list_lines(&mut self, path: &str, list_cmd: &str) -> Result<Vec<String>>;
    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn rmdir(&mut self, path: &str) -> Result<()>;
    fn delete(&mut self, path: &str) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Sends a raw post-quote command and discards the response body,
    /// failing on a non-2xx/3xx reply. Used for `SITE CHMOD`, `SITE CHUID`,
    /// `SITE CHGID`, and `OPTS UTF8 ON`.
    fn quote(&mut self, command: &str) -> Result<()>;

    /// Begins (or, if `restart_at > 0`, resumes via `REST`) a download of
    /// `path`. Must be followed by zero or more `read_download` calls and
    /// exactly one `finish_download`.
    fn begin_download(&mut self, path: &str, restart_at: u64) -> Result<()>;

    /// Reads the next chunk of the in-progress download. Returns `Ok(0)` on
    /// EOF. A `std::io::ErrorKind::WouldBlock`/`TimedOut` wrapped in
    /// `TransferError::Io` is the pump loop's "keep polling" signal, mirroring
    /// the original's one-second `select()` timeout.
    fn read_download(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn finish_download(&mut self) -> Result<()>;

    /// Begins an upload of `path`; `append` engages `REST` so the remote's
    /// existing bytes are preserved (spec §4.3, resumed write).
    fn begin_upload(&mut self, path: &str, append: bool) -> Result<()>;

    fn write_upload(&mut self, buf: &[u8]) -> Result<()>;

    fn finish_upload(&mut self) -> Result<()>;
}

/// Real backend: one `suppaftp::FtpStream` per connection.
pub struct SuppaftpBackend {
    stream: suppaftp::FtpStream,
    data_stream: Option<suppaftp::FtpStream>,
    pending_rest: u64,
    utf8: bool,
}

/// Everything needed to open a fresh connection: used both for the shared
/// connection at startup and for each dedicated upload connection.
#[derive(Clone, Debug)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub passive_mode: bool,
    pub connect_timeout: Duration,
    pub tcp_nodelay: bool,
    pub utf8: bool,
    /// `CLNT` command argument identifying this client to the server
    /// (spec: "`User-Agent`-equivalent FTP `CLNT` command"). `None` skips
    /// the command entirely; servers that don't implement `CLNT` reject it
    /// harmlessly either way, so failures here are never fatal.
    pub client_agent: Option<String>,
}

impl SuppaftpBackend {
    pub fn new(params: ConnectParams) -> Result<Self> {
        let addr = format!("{}:{}", params.host, params.port);
        let mut stream = suppaftp::FtpStream::connect_timeout(&addr, params.connect_timeout)
            .map_err(|e| TransferError::io(format!("connect {addr}: {e}")))?;
        if params.tcp_nodelay {
            let _ = stream.get_ref().set_nodelay(true);
        }
        if params.passive_mode {
            stream.set_mode(suppaftp::Mode::Passive);
        } else {
            stream.set_mode(suppaftp::Mode::Active);
        }
        stream
            .login(&params.user, &params.password)
            .map_err(TransferError::from)?;
        stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .map_err(TransferError::from)?;
        let mut backend = Self {
            stream,
            data_stream: None,
            pending_rest: 0,
            utf8: params.utf8,
        };
        if backend.utf8 {
            backend.quote("OPTS UTF8 ON")?;
        }
        if let Some(agent) = &params.client_agent {
            // Best-effort: plenty of servers don't implement CLNT at all.
            let _ = backend.quote(&format!("CLNT {agent}"));
        }
        Ok(backend)
    }
}

impl FtpBackend for SuppaftpBackend {
    fn connect(&mut self) -> Result<()> {
        // Connection is established eagerly in `new`; nothing further to do.
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stream
            .get_ref()
            .set_read_timeout(Some(timeout))
            .map_err(TransferError::from)
    }

    fn size(&mut self, path: &str) -> Result<u64> {
        self.stream
            .size(path)
            .map(|n| n as u64)
            .map_err(|_| TransferError::NotFound(path.to_string()))
    }

    fn list_lines(&mut self, path: &str, list_cmd: &str) -> Result<Vec<String>> {
        // suppaftp's `list` always issues `LIST`; a custom listing command
        // goes through the raw command path so operators can configure
        // e.g. "LIST -a" vs "LIST" per spec §6.
        if list_cmd != "LIST" {
            self.stream
                .quote(&format!("{list_cmd} {path}"))
                .map_err(TransferError::from)?;
        }
        self.stream
            .list(Some(path))
            .map_err(|e| TransferError::NotFound(format!("{path}: {e}")))
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        self.stream.mkdir(path).map_err(TransferError::from)
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        self.stream.rmdir(path).map_err(TransferError::from)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        self.stream.rm(path).map_err(TransferError::from)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.stream.rename(from, to).map_err(TransferError::from)
    }

    fn quote(&mut self, command: &str) -> Result<()> {
        self.stream.quote(command).map_err(TransferError::from)?;
        Ok(())
    }

    fn begin_download(&mut self, path: &str, restart_at: u64) -> Result<()> {
        if let Some(previous) = self.data_stream.take() {
            // A caller that skipped `finish_download` on the last owner's
            // transfer (programming error upstream) must not silently drop
            // the stream: finalize it so the control connection isn't left
            // desynced for whoever reads next.
            let _ = self.stream.finalize_retr_stream(previous);
        }
        if restart_at > 0 {
            self.stream
                .resume_transfer(restart_at as usize)
                .map_err(TransferError::from)?;
        }
        self.pending_rest = restart_at;
        let data_stream = self
            .stream
            .retr_as_stream(path)
            .map_err(|_| TransferError::NotFound(path.to_string()))?;
        self.data_stream = Some(data_stream);
        Ok(())
    }

    fn read_download(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::io::Read;
        let stream = self.data_stream.as_mut().expect(
            "read_download called without a prior begin_download: programming error in the read engine",
        );
        stream.read(buf)
    }

    fn finish_download(&mut self) -> Result<()> {
        if let Some(data_stream) = self.data_stream.take() {
            self.stream
                .finalize_retr_stream(data_stream)
                .map_err(TransferError::from)?;
        }
        Ok(())
    }

    fn begin_upload(&mut self, path: &str, append: bool) -> Result<()> {
        if append {
            let size = self.size(path).unwrap_or(0);
            if size > 0 {
                self.stream
                    .resume_transfer(size as usize)
                    .map_err(TransferError::from)?;
            }
        }
        let data_stream = self
            .stream
            .put_with_stream(path)
            .map_err(TransferError::from)?;
        self.data_stream = Some(data_stream);
        Ok(())
    }

    fn write_upload(&mut self, buf: &[u8]) -> Result<()> {
        use std::io::Write;
        let stream = self.data_stream.as_mut().expect(
            "write_upload called without a prior begin_upload: programming error in the write pipeline",
        );
        stream.write_all(buf).map_err(TransferError::from)
    }

    fn finish_upload(&mut self) -> Result<()> {
        if let Some(data_stream) = self.data_stream.take() {
            self.stream
                .finalize_put_stream(data_stream)
                .map_err(TransferError::from)?;
        }
        Ok(())
    }
}

/// A factory that produces fresh, connected backends. The shared connection
/// is created once at mount time; each upload creates its own dedicated
/// connection via this same factory (spec §3: "per-upload dedicated
/// connections").
pub type BackendFactory = std::sync::Arc<dyn Fn() -> Result<Box<dyn FtpBackend>> + Send + Sync>;

pub fn suppaftp_factory(params: ConnectParams) -> BackendFactory {
    std::sync::Arc::new(move || -> Result<Box<dyn FtpBackend>> {
        Ok(Box::new(SuppaftpBackend::new(params.clone())?))
    })
}

pub mod mock;
