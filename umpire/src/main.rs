//! Binary entrypoint: CLI surface, logging, client wiring, signal handling.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use umpire::broker::RedisBroker;
use umpire::runtime::DockerRuntime;
use umpire::status::HttpStatusSink;
use umpire::{Config, Toggles, Umpire};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "umpire", version, about = "Workflow execution control plane")]
struct Args {
    /// Log verbosity.
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Do not scale the worker service from workflow-queue depth.
    #[arg(long = "disable-worker-autoscale", action = clap::ArgAction::SetFalse)]
    autoscale_worker: bool,

    /// Do not scale app services from action-queue depth.
    #[arg(long = "disable-app-autoscale", action = clap::ArgAction::SetFalse)]
    autoscale_app: bool,

    /// Do not reclaim workflow-queue messages from dead workers.
    #[arg(long = "disable-worker-autoheal", action = clap::ArgAction::SetFalse)]
    autoheal_worker: bool,

    /// Do not reclaim action-queue messages from dead app containers.
    #[arg(long = "disable-app-autoheal", action = clap::ArgAction::SetFalse)]
    autoheal_app: bool,

    /// Debug logging, regardless of --log-level.
    #[arg(long, short)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let directive = if args.debug {
        "debug"
    } else {
        args.log_level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();
    let broker = RedisBroker::connect(&config.broker_uri)
        .await
        .context("connecting to the broker")?;
    let runtime = DockerRuntime::connect().context("connecting to the container runtime")?;
    let status = HttpStatusSink::new(config.status_url.clone());
    let toggles = Toggles {
        autoscale_worker: args.autoscale_worker,
        autoscale_app: args.autoscale_app,
        autoheal_worker: args.autoheal_worker,
        autoheal_app: args.autoheal_app,
    };

    let umpire = Umpire::init(broker, runtime, status, config, toggles)
        .await
        .context("initializing the controller")?;

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("termination signal received");
            cancel.cancel();
        });
    }

    info!("umpire is ready");
    umpire.clone().run(cancel).await;
    umpire.shutdown().await;
    Ok(())
}
