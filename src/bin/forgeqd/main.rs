mod args;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use forgeq::server::{Server, ServerConfig};
use tokio::sync::mpsc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};

use crate::args::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "ctrl-c handler failed, shutting down anyway");
            };
            cancel.cancel();
        });
    }

    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    let exit_code = if let Err(error) = begin(args, cancel, shutdown_hold).await {
        error!(%error, "encountered runtime error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };

    // Resolves once every connection handler has dropped its sender clone.
    shutdown_wait.recv().await;

    exit_code
}

async fn begin(
    args: Args,
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
) -> Result<()> {
    let config = ServerConfig {
        max_job_size: args.max_job_size,
    };

    let server = Server::bind((args.listen, args.port), config).await?;
    server.run(cancel, shutdown_hold).await
}
