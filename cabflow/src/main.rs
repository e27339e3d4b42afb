use anyhow::bail;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, RunConfig};
use crate::gate::Shutdown;

mod account;
mod builder;
mod bundler;
mod cab;
mod chain;
mod config;
mod enrollment;
mod flow;
mod gate;
mod rpc;
mod session;
#[cfg(test)]
mod testing;
mod tokens;
mod tracker;

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbosity);

    let config = RunConfig::from_args(args).await?;
    let session = flow::connect(&config)?;
    println!("My account: {}", session.account().address());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("received Ctrl-C, cancelling run (press again to exit immediately)");
        let _ = shutdown_tx.send(true);
        if signal::ctrl_c().await.is_ok() {
            warn!("received second Ctrl-C, exiting");
            std::process::exit(130);
        }
    });

    let mut trigger = flow::trigger_for(&config)?;
    let report = flow::run(
        &config,
        &session,
        trigger.as_mut(),
        &mut Shutdown::new(shutdown_rx),
    )
    .await?;

    println!("{report}");
    if !report.succeeded() {
        bail!(
            "user operation {} was included but reverted",
            report.user_op_hash
        );
    }
    Ok(())
}
