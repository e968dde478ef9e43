use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use perfmon_sampler::config::Config;
use perfmon_sampler::driver::gl::{advertised_extensions, GlDriver};
use perfmon_sampler::driver::sim::{NullFrame, SimDriver};
use perfmon_sampler::driver::surface::RenderWindow;
use perfmon_sampler::export::health::HealthMetrics;
use perfmon_sampler::pipeline::{self, Mode, Outcome};
use perfmon_sampler::report::Report;

/// GPU hardware counter sampler built on GL_AMD_performance_monitor.
#[derive(Parser)]
#[command(name = "perfmon-sampler", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Use the simulated driver instead of opening a GL window.
    #[arg(long)]
    simulate: bool,

    /// Stop after this many sampled frames.
    #[arg(long)]
    frames: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Print version information and exit.
    Version,
    /// Check for the extension, print every available counter and exit.
    List,
}

/// Build-time version info, injected via build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if cli.command == Some(Command::Version) {
        println!("perfmon-sampler {}", version::full());
        return Ok(ExitCode::SUCCESS);
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(frames) = cli.frames {
        cfg.sampling.max_frames = Some(frames);
        cfg.validate().context("applying --frames")?;
    }

    // Diagnostics go to stderr; stdout carries the report.
    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        simulate = cli.simulate,
        "starting perfmon-sampler",
    );

    // The sampler owns the main thread; the runtime only hosts signal
    // handling and the health server.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(&rt, cancel.clone());

    let metrics = if cfg.health.enabled {
        let metrics = Arc::new(HealthMetrics::new(&cfg.health.addr)?);
        rt.block_on(metrics.start())
            .context("starting health server")?;
        Some(metrics)
    } else {
        None
    };

    let mode = if cli.command == Some(Command::List) {
        Mode::List
    } else {
        Mode::Sample
    };
    let result = if cli.simulate {
        run_simulated(&cfg, mode, metrics.clone(), &cancel)
    } else {
        run_gl(&cfg, mode, metrics.clone(), &cancel)
    };

    if let Some(metrics) = &metrics {
        rt.block_on(metrics.stop())?;
    }
    cancel.cancel();

    tracing::info!("perfmon-sampler stopped");

    match result? {
        Outcome::Unsupported => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn spawn_signal_listener(rt: &Runtime, cancel: CancellationToken) {
    rt.spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    });
}

fn run_simulated(
    cfg: &Config,
    mode: Mode,
    metrics: Option<Arc<HealthMetrics>>,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    pipeline::run(
        SimDriver::with_default_catalog(),
        NullFrame::new(),
        Report::stdout(),
        &cfg.sampling,
        mode,
        metrics,
        cancel,
    )
}

fn run_gl(
    cfg: &Config,
    mode: Mode,
    metrics: Option<Arc<HealthMetrics>>,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let window = RenderWindow::create(&cfg.window, cancel.clone())?;

    // Check the advertised extension list before resolving any entry point:
    // some loaders hand out non-null pointers for unknown names.
    let advertised = advertised_extensions(&window.gl());
    if !pipeline::ensure_capability(&advertised, &mut Report::stdout())
        .context("writing report")?
    {
        return Ok(Outcome::Unsupported);
    }

    let driver = GlDriver::load(window.gl(), |name| window.proc_address(name))
        .context("loading performance monitor entry points")?;

    pipeline::run(
        driver,
        window,
        Report::stdout(),
        &cfg.sampling,
        mode,
        metrics,
        cancel,
    )
}
