use clap::Parser;
use ova_pusher::cli::{Args, Runner};
use ova_pusher::logging::init_tracing;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.verbose, args.quiet, args.log_file.as_deref()) {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, saving session and stopping");
            interrupt.cancel();
        }
    });

    let runner = Runner::new(args, cancel);
    match runner.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            runner.output().error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
