//! End-to-end run: capability gate, counter discovery, target resolution
//! and the sampling loop, in the order the binary drives them.

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SamplingConfig;
use crate::counter::{check_capability, CounterCatalog, TargetCounter};
use crate::driver::{FrameTarget, PerfMonitorDriver};
use crate::export::health::HealthMetrics;
use crate::report::Report;
use crate::sampler::{RunSummary, Sampler, SamplerOptions};

/// What the run should do after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Print the counter listing and stop.
    List,
    /// Resolve the target and sample until cancelled or the frame limit.
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The driver lacks the counter monitor extension. Nothing was sampled.
    Unsupported,
    Listed { counters: usize },
    Sampled(RunSummary),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Write `ERROR: unsupported platform` and return false when the extension
/// is missing from `capabilities`.
pub fn ensure_capability<W: Write>(
    capabilities: &HashSet<String>,
    report: &mut Report<W>,
) -> io::Result<bool> {
    if check_capability(capabilities) {
        return Ok(true);
    }

    error!(
        extensions = capabilities.len(),
        "GL_AMD_performance_monitor not advertised",
    );
    report.unsupported_platform()?;
    report.flush()?;
    Ok(false)
}

/// Run the whole pipeline over `driver` and `frame`. Monitors created for
/// sampling are deleted before returning, whether or not the loop failed.
pub fn run<D, F, W>(
    driver: D,
    frame: F,
    mut report: Report<W>,
    cfg: &SamplingConfig,
    mode: Mode,
    metrics: Option<Arc<HealthMetrics>>,
    cancel: &CancellationToken,
) -> Result<Outcome>
where
    D: PerfMonitorDriver,
    F: FrameTarget,
    W: Write,
{
    if !ensure_capability(&driver.extensions(), &mut report).context("writing report")? {
        return Ok(Outcome::Unsupported);
    }

    let catalog = CounterCatalog::discover(&driver, &mut report).context("writing counters")?;
    report.flush().context("flushing report")?;

    if let Some(metrics) = &metrics {
        metrics.counters_discovered.set(catalog.len() as f64);
    }

    if mode == Mode::List {
        return Ok(Outcome::Listed {
            counters: catalog.len(),
        });
    }

    let target = resolve_target(&catalog, cfg)?;
    if let Some(metrics) = &metrics {
        metrics
            .target_resolved
            .set(if target.is_resolved() { 1.0 } else { 0.0 });
    }

    let mut sampler = Sampler::new(
        driver,
        frame,
        target,
        cfg.pool_size,
        report,
        SamplerOptions::from(cfg),
    )?;
    if let Some(metrics) = metrics {
        sampler = sampler.with_metrics(metrics);
    }

    let result = sampler.run(cancel);
    sampler.shutdown();
    let summary = result?;

    info!(
        frames = summary.frames,
        harvests = summary.harvests,
        samples = summary.samples,
        no_data = summary.no_data,
        decode_errors = summary.decode_errors,
        "sampling finished",
    );

    Ok(Outcome::Sampled(summary))
}

fn resolve_target(catalog: &CounterCatalog, cfg: &SamplingConfig) -> Result<TargetCounter> {
    let name = cfg.target_counter.as_str();
    let target = catalog.select_target(name);

    if target.is_resolved() {
        info!(
            counter = name,
            id = %target.id,
            counter_type = %target.declared_type,
            matches = target.matches,
            "target counter resolved",
        );
    } else {
        if cfg.require_target {
            bail!("target counter {name} not found among {} counters", catalog.len());
        }
        warn!(
            counter = name,
            counter_type = %target.declared_type,
            "target counter not found, sampling the default counter slot",
        );
    }

    Ok(target)
}
