use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use netprobe::scheduler::Scheduler;
use netprobe_host::cli::Cli;
use netprobe_host::logger::{self, FileLogger};
use netprobe_host::session::{self, SessionStore};
use netprobe_host::{clock, settings, StdStack, SystemClock};

fn main() -> Result<()> {
    let args = Cli::parse();
    FileLogger::new(Some(args.log_file.as_path()), logger::level_from_verbosity(args.verbose))
        .install()
        .context("installing logger")?;

    let store = SessionStore::new(&args.session_file);
    if args.clear_session {
        match store.clear() {
            Ok(true) => info!("Cleared session {}", store.path().display()),
            Ok(false) => {}
            Err(e) => warn!("{e}"),
        }
    }
    let hardware_id = args.device_id.clone().unwrap_or_else(session::detect_hardware_id);
    let session = store.load_or_create(&hardware_id, clock::unix_time());
    info!("Session ID: {}", session.session_id);

    let config = settings::load(&args.config);
    let stack = StdStack::new(config.network.connect_timeout, config.network.recv_timeout);
    let mut scheduler: Scheduler<_, _> =
        Scheduler::new(stack, SystemClock::new(), config, session.session_id);

    if args.once {
        scheduler.run_each_once();
        log::logger().flush();
        return Ok(());
    }
    scheduler.run_forever()
}
