//! Verbosity-counted logging for the mount binary and driver.
//!
//! Mirrors the counted `-v`/`-vv`/`-vvv` verbosity dial: each call site picks
//! an [`InfoFlag`] or [`DebugFlag`] category and a minimum level, and
//! [`info_log!`]/[`debug_log!`] only emit once the active [`VerbosityConfig`]
//! has raised that category's threshold high enough. The threshold state is
//! process-global (set once via [`init`]) so the dispatcher, the transfer
//! engine, and the CLI's own diagnostics all filter consistently without
//! threading a config value through every call.
//!
//! When the `tracing` feature is enabled, every emitted line also goes
//! through the `tracing` macros, and [`install_subscriber`] wires up a
//! `tracing-subscriber` `fmt` layer for the real binary. Without a live
//! subscriber (the default in tests), [`drain_events`] recovers exactly what
//! would have been printed, so filtering behaviour is testable without
//! touching stdout.

use std::sync::{Mutex, OnceLock};

/// Info-level categories a mount session can report on (spec §6 "verbosity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoFlag {
    /// Mount/unmount lifecycle.
    Mount,
    /// `open`/`create`/`release`.
    Open,
    /// `getattr`/`readdir`/`readlink` and other metadata RPCs.
    Meta,
    /// Read/write byte-range activity.
    Xfer,
    /// `rename`/`unlink`/`rmdir`/`mkdir`.
    Rename,
    /// Summary counters emitted at unmount.
    Stats,
}

/// Debug-level categories, one per major plumbing concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugFlag {
    /// Connection establishment and login.
    Connect,
    /// `RETR`/`REST` download session management.
    Retr,
    /// `STOR`/`REST` upload session management.
    Stor,
    /// The read engine's one-second pump loop.
    Pump,
    /// The write pipeline's low-speed watchdog.
    Watchdog,
    /// Path<->inode table bookkeeping.
    Inode,
}

/// Per-[`InfoFlag`] thresholds. `0` disables a category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoLevels {
    pub mount: u8,
    pub open: u8,
    pub meta: u8,
    pub xfer: u8,
    pub rename: u8,
    pub stats: u8,
}

/// Per-[`DebugFlag`] thresholds. `0` disables a category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugLevels {
    pub connect: u8,
    pub retr: u8,
    pub stor: u8,
    pub pump: u8,
    pub watchdog: u8,
    pub inode: u8,
}

impl InfoLevels {
    fn get(&self, flag: InfoFlag) -> u8 {
        match flag {
            InfoFlag::Mount => self.mount,
            InfoFlag::Open => self.open,
            InfoFlag::Meta => self.meta,
            InfoFlag::Xfer => self.xfer,
            InfoFlag::Rename => self.rename,
            InfoFlag::Stats => self.stats,
        }
    }

    fn set(&mut self, flag: InfoFlag, level: u8) {
        match flag {
            InfoFlag::Mount => self.mount = level,
            InfoFlag::Open => self.open = level,
            InfoFlag::Meta => self.meta = level,
            InfoFlag::Xfer => self.xfer = level,
            InfoFlag::Rename => self.rename = level,
            InfoFlag::Stats => self.stats = level,
        }
    }

    fn bump_all(&mut self, amount: u8) {
        for flag in [
            InfoFlag::Mount,
            InfoFlag::Open,
            InfoFlag::Meta,
            InfoFlag::Xfer,
            InfoFlag::Rename,
            InfoFlag::Stats,
        ] {
            if self.get(flag) > 0 {
                self.set(flag, self.get(flag) + amount);
            }
        }
    }
}

impl DebugLevels {
    fn get(&self, flag: DebugFlag) -> u8 {
        match flag {
            DebugFlag::Connect => self.connect,
            DebugFlag::Retr => self.retr,
            DebugFlag::Stor => self.stor,
            DebugFlag::Pump => self.pump,
            DebugFlag::Watchdog => self.watchdog,
            DebugFlag::Inode => self.inode,
        }
    }

    fn set(&mut self, flag: DebugFlag, level: u8) {
        match flag {
            DebugFlag::Connect => self.connect = level,
            DebugFlag::Retr => self.retr = level,
            DebugFlag::Stor => self.stor = level,
            DebugFlag::Pump => self.pump = level,
            DebugFlag::Watchdog => self.watchdog = level,
            DebugFlag::Inode => self.inode = level,
        }
    }

    fn bump_all(&mut self, amount: u8) {
        for flag in [
            DebugFlag::Connect,
            DebugFlag::Retr,
            DebugFlag::Stor,
            DebugFlag::Pump,
            DebugFlag::Watchdog,
            DebugFlag::Inode,
        ] {
            if self.get(flag) > 0 {
                self.set(flag, self.get(flag) + amount);
            }
        }
    }
}

/// The full set of active thresholds. Built from a `-v` count via
/// [`VerbosityConfig::from_verbose_level`], or assembled field-by-field for
/// finer control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerbosityConfig {
    pub info: InfoLevels,
    pub debug: DebugLevels,
}

impl VerbosityConfig {
    /// Maps a `-v` repeat count onto a threshold set. Level 0 only reports
    /// mount lifecycle; each further level enables a wider set of categories
    /// and, from level 2, debug output. Levels past 3 keep raising every
    /// category already enabled at 3, so higher counts are always strictly
    /// more verbose.
    #[must_use]
    pub fn from_verbose_level(level: u8) -> Self {
        let mut config = Self::default();
        config.info.mount = 1;
        if level == 0 {
            return config;
        }

        config.info.open = 1;
        config.info.meta = 1;
        config.info.rename = 1;
        config.info.stats = 1;
        if level == 1 {
            return config;
        }

        config.info.xfer = 1;
        config.debug.connect = 1;
        config.debug.retr = 1;
        config.debug.stor = 1;
        if level == 2 {
            return config;
        }

        config.debug.pump = 1;
        config.debug.watchdog = 1;
        config.debug.inode = 1;
        if level == 3 {
            return config;
        }

        let extra = level - 3;
        config.info.bump_all(extra);
        config.debug.bump_all(extra);
        config
    }

    /// Parses a `name` or `name<N>` spec (e.g. `"xfer"` or `"xfer2"`) and sets
    /// that info category's threshold, defaulting the level to `1` when no
    /// trailing digits are present.
    pub fn apply_info_flag(&mut self, spec: &str) -> Result<(), String> {
        let (name, level) = split_flag_spec(spec)?;
        let flag = match name {
            "mount" => InfoFlag::Mount,
            "open" => InfoFlag::Open,
            "meta" => InfoFlag::Meta,
            "xfer" => InfoFlag::Xfer,
            "rename" => InfoFlag::Rename,
            "stats" => InfoFlag::Stats,
            other => return Err(format!("unknown info flag '{other}'")),
        };
        self.info.set(flag, level);
        Ok(())
    }

    /// Same as [`VerbosityConfig::apply_info_flag`], for debug categories.
    pub fn apply_debug_flag(&mut self, spec: &str) -> Result<(), String> {
        let (name, level) = split_flag_spec(spec)?;
        let flag = match name {
            "connect" => DebugFlag::Connect,
            "retr" => DebugFlag::Retr,
            "stor" => DebugFlag::Stor,
            "pump" => DebugFlag::Pump,
            "watchdog" => DebugFlag::Watchdog,
            "inode" => DebugFlag::Inode,
            other => return Err(format!("unknown debug flag '{other}'")),
        };
        self.debug.set(flag, level);
        Ok(())
    }
}

fn split_flag_spec(spec: &str) -> Result<(&str, u8), String> {
    let split_at = spec.find(|c: char| c.is_ascii_digit()).unwrap_or(spec.len());
    let (name, digits) = spec.split_at(split_at);
    if name.is_empty() {
        return Err(format!("invalid flag spec '{spec}'"));
    }
    let level = if digits.is_empty() {
        1
    } else {
        digits
            .parse::<u8>()
            .map_err(|_| format!("invalid level in flag spec '{spec}'"))?
    };
    Ok((name, level))
}

struct State {
    config: VerbosityConfig,
    events: Vec<String>,
}

fn state() -> &'static Mutex<State> {
    static STATE: OnceLock<Mutex<State>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(State {
            config: VerbosityConfig::default(),
            events: Vec::new(),
        })
    })
}

/// Installs `config` as the active thresholds, discarding any buffered test
/// events from a prior configuration.
pub fn init(config: VerbosityConfig) {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    *guard = State {
        config,
        events: Vec::new(),
    };
}

/// Applies a single `--info=NAME[LEVEL]` spec to the active configuration.
pub fn apply_info_flag(spec: &str) -> Result<(), String> {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard.config.apply_info_flag(spec)
}

/// Applies a single `--debug=NAME[LEVEL]` spec to the active configuration.
pub fn apply_debug_flag(spec: &str) -> Result<(), String> {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    guard.config.apply_debug_flag(spec)
}

#[must_use]
pub fn info_gte(flag: InfoFlag, level: u8) -> bool {
    state().lock().unwrap_or_else(|e| e.into_inner()).config.info.get(flag) >= level
}

#[must_use]
pub fn debug_gte(flag: DebugFlag, level: u8) -> bool {
    state().lock().unwrap_or_else(|e| e.into_inner()).config.debug.get(flag) >= level
}

/// Drains and returns every message recorded by [`info_log!`]/[`debug_log!`]
/// since the last call, for assertions in tests that don't want a live
/// `tracing` subscriber.
pub fn drain_events() -> Vec<String> {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    std::mem::take(&mut guard.events)
}

/// Records an info-level message if `level` clears `flag`'s threshold. Called
/// by [`info_log!`]; not usually invoked directly.
#[doc(hidden)]
pub fn record_info(flag: InfoFlag, level: u8, message: String) {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    if guard.config.info.get(flag) < level {
        return;
    }
    #[cfg(feature = "tracing")]
    tracing::info!(category = ?flag, level, "{message}");
    guard.events.push(message);
}

/// Records a debug-level message if `level` clears `flag`'s threshold. Called
/// by [`debug_log!`]; not usually invoked directly.
#[doc(hidden)]
pub fn record_debug(flag: DebugFlag, level: u8, message: String) {
    let mut guard = state().lock().unwrap_or_else(|e| e.into_inner());
    if guard.config.debug.get(flag) < level {
        return;
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(category = ?flag, level, "{message}");
    guard.events.push(message);
}

/// Emits an info-level message: `info_log!(Meta, 1, "listing {}", path)`.
#[macro_export]
macro_rules! info_log {
    ($flag:ident, $level:expr, $($arg:tt)*) => {
        $crate::record_info($crate::InfoFlag::$flag, $level, format!($($arg)*))
    };
}

/// Emits a debug-level message: `debug_log!(Retr, 2, "resuming at {offset}")`.
#[macro_export]
macro_rules! debug_log {
    ($flag:ident, $level:expr, $($arg:tt)*) => {
        $crate::record_debug($crate::DebugFlag::$flag, $level, format!($($arg)*))
    };
}

/// Errors from wiring up the process-wide `tracing` subscriber.
#[cfg(feature = "tracing")]
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("tracing subscriber already installed: {0}")]
    SubscriberAlreadySet(String),
}

/// Installs a `tracing-subscriber` `fmt` layer whose filter follows the same
/// `-v` count as [`VerbosityConfig::from_verbose_level`] (0 = warn, 1 = info,
/// 2 = debug, 3+ = trace), unless `RUST_LOG` is set, in which case that takes
/// precedence. Idempotent: a second call returns `Err` rather than panicking,
/// since `fuser::mount2` can re-enter the same process under `--foreground`
/// tooling.
#[cfg(feature = "tracing")]
pub fn install_subscriber(verbose: u8) -> Result<(), LoggingError> {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|err| LoggingError::SubscriberAlreadySet(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_zero_only_reports_mount() {
        let config = VerbosityConfig::from_verbose_level(0);
        assert_eq!(config.info.mount, 1);
        assert_eq!(config.info.open, 0);
        assert_eq!(config.debug.connect, 0);
    }

    #[test]
    fn levels_are_strictly_progressive() {
        let levels: Vec<_> = (0..=5).map(VerbosityConfig::from_verbose_level).collect();
        for window in levels.windows(2) {
            let (prev, curr) = (&window[0], &window[1]);
            assert!(curr.info.mount >= prev.info.mount);
            assert!(curr.info.xfer >= prev.info.xfer);
            assert!(curr.debug.connect >= prev.debug.connect);
            assert!(curr.debug.pump >= prev.debug.pump);
        }
    }

    #[test]
    fn level_two_enables_xfer_info_and_basic_debug() {
        let config = VerbosityConfig::from_verbose_level(2);
        assert_eq!(config.info.xfer, 1);
        assert_eq!(config.debug.connect, 1);
        assert_eq!(config.debug.pump, 0);
    }

    #[test]
    fn apply_flag_parses_trailing_level_and_defaults_to_one() {
        let mut config = VerbosityConfig::default();
        config.apply_info_flag("xfer2").unwrap();
        config.apply_debug_flag("pump").unwrap();
        assert_eq!(config.info.xfer, 2);
        assert_eq!(config.debug.pump, 1);
    }

    #[test]
    fn apply_flag_rejects_unknown_names() {
        let mut config = VerbosityConfig::default();
        assert!(config.apply_info_flag("bogus").is_err());
        assert!(config.apply_debug_flag("bogus3").is_err());
    }

    #[test]
    fn logging_macros_respect_thresholds() {
        let mut config = VerbosityConfig::default();
        config.info.meta = 1;
        config.debug.retr = 1;
        init(config);
        drain_events();

        info_log!(Meta, 1, "listing /");
        info_log!(Meta, 2, "filtered");
        debug_log!(Retr, 1, "begin_download /a.txt");
        debug_log!(Retr, 2, "filtered");

        let events = drain_events();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("listing /"));
        assert!(events[1].contains("begin_download"));
    }

    #[test]
    fn reinit_discards_prior_events_and_thresholds() {
        let mut config = VerbosityConfig::default();
        config.info.stats = 5;
        init(config);
        info_log!(Stats, 1, "first session");

        init(VerbosityConfig::default());
        assert!(!info_gte(InfoFlag::Stats, 1));
        assert!(drain_events().is_empty());
    }
}
