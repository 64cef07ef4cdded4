use std::io;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use pipeflow::{logging, App, Cli};
use pipeflow_core::CancelToken;
use tracing::{error, warn};

/// Cancela `token` al recibir Ctrl-C. El runtime de tokio vive en un hilo
/// propio; el orquestador es síncrono.
fn install_ctrl_c(token: CancelToken) {
    let spawned = thread::Builder::new().name("pipeflow-signal".into()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("signal handler unavailable: {e}");
                return;
            }
        };
        runtime.block_on(async {
                   if tokio::signal::ctrl_c().await.is_ok() {
                       warn!("interrupt received, cancelling run");
                       token.cancel();
                   }
               });
    });
    if let Err(e) = spawned {
        warn!("signal handler unavailable: {e}");
    }
}

fn main() -> ExitCode {
    pipeflow_core::engine::init_dotenv();
    let cli = Cli::parse();
    logging::init();

    let cancel = CancelToken::new();
    install_ctrl_c(cancel.clone());

    let app = match App::open(&cli, cancel) {
        Ok(app) => app,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(5);
        }
    };
    match app.execute(&cli.command, &mut io::stdout().lock()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(4)
        }
    }
}
