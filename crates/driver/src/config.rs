use std::time::Duration;

/// Mount-wide configuration (spec §6 "Configuration surface"). Populated by
/// `cli::Options` and handed to [`crate::fs::FtpFilesystem::new`] together
/// with a `transfer::BackendFactory` built from the connection subset of
/// these same fields.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// The LIST-style command used for directory reads (spec §6 "custom
    /// list command"), default `"LIST -a"`.
    pub list_command: String,
    /// Sends `OPTS UTF8 ON` as a pre-command on every request when set
    /// (spec §6 "try-UTF-8 flag").
    pub utf8: bool,
    /// Block size reported by `statfs` (spec §6 "Local: block size").
    pub block_size: u32,
    /// Connect timeout applied to both the shared connection and every
    /// dedicated upload connection.
    pub connect_timeout: Duration,
    /// Allows `O_RDWR` opens under the documented workaround instead of
    /// rejecting them as unsupported (spec §9 open question).
    pub allow_read_write: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            list_command: "LIST -a".to_string(),
            utf8: false,
            block_size: 4096,
            connect_timeout: Duration::from_secs(30),
            allow_read_write: false,
        }
    }
}
