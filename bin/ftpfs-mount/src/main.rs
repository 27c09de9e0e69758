//! `ftpfs-mount` — mounts a remote FTP server as a local FUSE file system.
//!
//! Thin wiring: parse arguments, establish the shared connection, build the
//! dispatcher, and hand it to `fuser`. All the interesting behaviour lives
//! in `driver` and `transfer`; this binary exists to connect them to the
//! process boundary (argv, stdio, the mount syscall).

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Options};
use driver::FtpFilesystem;
use transfer::{suppaftp_factory, SharedConnection};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    // Handled ahead of `Cli::parse()` since `remote`/`mountpoint` are
    // required positionals that a bare `--version` invocation doesn't
    // supply.
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        if args.iter().any(|a| a == "--json") {
            println!("{}", branding::BrandManifest::current().to_json_pretty());
        } else {
            println!("{}", branding::version_line());
        }
        return ExitCode::SUCCESS;
    }

    let cli_args = Cli::parse();

    let _ = logging::install_subscriber(cli_args.verbose);

    let options = match Options::from_cli(&cli_args, branding::client_agent()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{}: {err}", branding::client_bin());
            return ExitCode::FAILURE;
        }
    };

    logging::init(options.verbosity);

    if let Err(err) = run(options) {
        eprintln!("{}: {err}", branding::client_bin());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let factory = suppaftp_factory(options.connect.clone());
    let shared = SharedConnection::connect(&factory)?;

    info_log(&options);

    let filesystem = FtpFilesystem::new(shared, factory, options.mount);

    let mount_options = [fuser::MountOption::FSName(branding::client_bin().to_string())];

    if options.foreground {
        fuser::mount2(filesystem, &options.mountpoint, &mount_options)?;
    } else {
        let _session = fuser::spawn_mount2(filesystem, &options.mountpoint, &mount_options)?;
        // No fork-based daemonization: the process stays alive and the
        // session stays mounted until it is killed or the mount point is
        // unmounted externally.
        loop {
            std::thread::park();
        }
    }

    Ok(())
}

fn info_log(options: &Options) {
    logging::info_log!(
        Mount,
        1,
        "mounting ftp://{}@{}:{} at {}",
        options.connect.user,
        options.connect.host,
        options.connect.port,
        options.mountpoint.display()
    );
}
