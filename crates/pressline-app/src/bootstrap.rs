use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pressline_config::{CapacityConfig, ServerSettings};
use pressline_events::EventBus;
use pressline_pipeline::{AdmissionController, Catalog, ClientNotifier, PipelineExecutor, TaskRegistry};
use pressline_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{error, info, warn};

use crate::channel::InboundChannel;
use crate::error::{AppError, AppResult};
use crate::server::{Server, ServerState};

/// Command-line arguments of `pressline-server`.
#[derive(Debug, Clone, Parser)]
#[command(name = "pressline-server", version, about = "Run transformation pipelines on request")]
pub struct ServerArgs {
    /// Capacity file listing `<transformation> <maximum>` per line.
    pub config: PathBuf,
    /// Directory holding one executable per transformation.
    pub bin_dir: PathBuf,
}

/// Dependencies required to bootstrap the server.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    settings: ServerSettings,
}

impl BootstrapDependencies {
    /// Resolve settings from arguments plus the process environment.
    pub(crate) fn from_args(args: ServerArgs) -> AppResult<Self> {
        let settings = ServerSettings::new(args.config, args.bin_dir)
            .with_env()
            .map_err(|err| AppError::config("settings.env", err))?;
        let logging = LoggingConfig {
            format: LogFormat::from_name(settings.log_format.as_deref()),
            ..LoggingConfig::default()
        };
        Ok(Self { logging, settings })
    }
}

/// Entry point for the server boot sequence; returns once shutdown has drained.
///
/// # Errors
///
/// Returns an error if configuration is unusable, the inbound channel cannot
/// be created, or the request loop fails.
pub async fn run_app(args: ServerArgs) -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_args(args)?;
    let shutdown = shutdown_signal(dependencies.settings.inbound_path.clone())?;
    run_app_with(dependencies, shutdown).await
}

/// Boot sequence that relies entirely on injected dependencies.
pub(crate) async fn run_app_with<F>(dependencies: BootstrapDependencies, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send,
{
    pressline_telemetry::init_logging(&dependencies.logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new(ServerState::Starting.as_str());

    info!("pressline server starting");
    let (server, channel) = prepare(&dependencies.settings)
        .inspect_err(|err| error!(error = %err, detail = ?err, "pressline server failed to start"))?;
    server.run(channel, shutdown).await?;
    info!("pressline server stopped");
    Ok(())
}

/// Load configuration, build the collaborators and create the inbound channel.
///
/// Nothing is left on disk if any step fails.
///
/// # Errors
///
/// Returns an error for an unreadable or malformed capacity file, a missing
/// executable directory, or an inbound path that is already taken.
pub fn prepare(settings: &ServerSettings) -> AppResult<(Server, InboundChannel)> {
    let capacity = CapacityConfig::load(settings.config_path())
        .map_err(|err| AppError::config("capacity.load", err))?;
    let catalog = Catalog::new(&settings.bin_dir)
        .map_err(|err| AppError::pipeline("catalog.new", err))?;
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let events = EventBus::new();

    for (transformation, maximum) in capacity.iter() {
        info!(transformation = %transformation, maximum, "capacity configured");
    }
    let executor = PipelineExecutor::new(
        Arc::new(catalog),
        Arc::new(AdmissionController::from_config(&capacity)),
        Arc::new(TaskRegistry::new()),
        events.clone(),
        metrics.clone(),
    );
    let notifier = ClientNotifier::new(&settings.reply_dir, settings.signal_clients, metrics.clone());
    let channel = InboundChannel::create(&settings.inbound_path)?;
    Ok((Server::new(executor, notifier, events, metrics), channel))
}

/// Exit status when a second signal cuts the drain short.
const FORCED_EXIT_CODE: i32 = 130;

/// SIGTERM and SIGINT listeners.
struct ShutdownSignals {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignals {
    fn install() -> AppResult<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())
                .map_err(|source| AppError::io("signal.terminate", None, source))?,
            interrupt: signal(SignalKind::interrupt())
                .map_err(|source| AppError::io("signal.interrupt", None, source))?,
        })
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

/// Resolves on the first signal. A second one removes the inbound FIFO and
/// exits without waiting for running stages.
fn shutdown_signal(inbound_path: PathBuf) -> AppResult<impl Future<Output = ()>> {
    let mut signals = ShutdownSignals::install()?;
    Ok(async move {
        let first = signals.next().await;
        info!(signal = first, "termination signal received; draining");
        tokio::spawn(async move {
            let second = signals.next().await;
            warn!(signal = second, "termination signal repeated; exiting without draining");
            if let Err(err) = std::fs::remove_file(&inbound_path) {
                warn!(path = %inbound_path.display(), error = %err, "failed to remove inbound channel");
            }
            std::process::exit(FORCED_EXIT_CODE);
        });
    })
}
