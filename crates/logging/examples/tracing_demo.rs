//! Demonstrates wiring `logging`'s verbosity thresholds into a live
//! `tracing-subscriber` output, the way the mount binary does at startup.
//!
//! Run with `cargo run -p logging --example tracing_demo --features tracing`.

use logging::{debug_log, info_log, DebugFlag, InfoFlag, VerbosityConfig};

fn main() {
    logging::install_subscriber(2).expect("install tracing subscriber");

    let config = VerbosityConfig::from_verbose_level(2);
    logging::init(config);

    info_log!(Mount, 1, "mounting ftp://demo@127.0.0.1:21/ at /mnt/ftp");
    info_log!(Meta, 1, "listing /");
    debug_log!(Connect, 1, "login succeeded");
    debug_log!(Pump, 1, "this line is filtered: pump is below threshold at -vv");

    let _ = InfoFlag::Stats;
    let _ = DebugFlag::Retr;
}
