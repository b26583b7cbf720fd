mod config;
mod daemon;
mod database;
mod error;
mod logging;
mod server;
mod signals;

use crate::config::DaemonConfig;
use crate::daemon::prepare_process;
use crate::database::shared_database;
use crate::error::Result;
use crate::logging::init_logging;
use crate::signals::SignalManager;

fn main() -> Result<()> {
    let cli_config = std::env::args().nth(1);
    let config = DaemonConfig::from_sources(cli_config.as_deref())?;

    let context = prepare_process(&config)?;
    init_logging(&config)?;

    let (_signal_manager, shutdown) = SignalManager::install()?;

    log::info!(
        "incidentdb daemon running with pid {}",
        nix::unistd::getpid()
    );

    let database = match shared_database(&config) {
        Ok(database) => database,
        Err(err) => {
            fatal!(error = %err, "failed to open incident database");
            return Err(err);
        }
    };

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(threads) = config.server().worker_threads() {
        runtime.worker_threads(threads);
    }
    runtime.build()?.block_on(server::run(&config, database, shutdown))?;

    if let Some(path) = context.pid_file_path_owned() {
        log::info!("shutting down; removing {}", path.display());
    }
    Ok(())
}
