//! Steady-state sampling loop.
//!
//! Each [`Sampler::step`] brackets one frame of GPU work with a pooled
//! monitor. Results are not read frame by frame: once the pool runs out of
//! free monitors the sampler issues a single pipeline barrier and drains every
//! pending monitor in one pass.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SamplingConfig;
use crate::counter::decode::{decode, DecodeError};
use crate::counter::TargetCounter;
use crate::driver::{FrameTarget, PerfMonitorDriver};
use crate::export::health::HealthMetrics;
use crate::monitor::MonitorPool;
use crate::report::Report;

/// Clear color of the frame bracketed by a monitor.
pub const SAMPLED_CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Clear color of the unsampled frame that follows it.
pub const IDLE_CLEAR_COLOR: [f32; 4] = [0.0, 1.0, 1.0, 1.0];

/// Loop behavior knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerOptions {
    /// Follow every sampled frame with an unsampled one.
    pub idle_frames: bool,
    /// Stop `run` after this many sampled frames.
    pub max_frames: Option<u64>,
    /// How often `run` logs progress.
    pub stats_interval: Duration,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            idle_frames: true,
            max_frames: None,
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl From<&SamplingConfig> for SamplerOptions {
    fn from(cfg: &SamplingConfig) -> Self {
        Self {
            idle_frames: cfg.idle_frames,
            max_frames: cfg.max_frames,
            stats_interval: cfg.stats_interval,
        }
    }
}

/// Outcome of one harvest pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Monitors drained and returned to the free list.
    pub harvested: usize,
    pub samples: usize,
    pub no_data: usize,
    pub decode_errors: usize,
}

/// Totals accumulated over the sampler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub harvests: u64,
    pub samples: u64,
    pub no_data: u64,
    pub decode_errors: u64,
}

impl RunSummary {
    fn add(&mut self, harvest: &HarvestSummary) {
        self.harvests += 1;
        self.samples += harvest.samples as u64;
        self.no_data += harvest.no_data as u64;
        self.decode_errors += harvest.decode_errors as u64;
    }
}

pub struct Sampler<D, F, W> {
    driver: D,
    frame: F,
    pool: MonitorPool,
    report: Report<W>,
    opts: SamplerOptions,
    metrics: Option<Arc<HealthMetrics>>,
    buffer: Vec<u8>,
    totals: RunSummary,
}

impl<D, F, W> Sampler<D, F, W>
where
    D: PerfMonitorDriver,
    F: FrameTarget,
    W: Write,
{
    /// Build the monitor pool for `target` and wrap the collaborators.
    pub fn new(
        mut driver: D,
        frame: F,
        target: TargetCounter,
        pool_size: usize,
        report: Report<W>,
        opts: SamplerOptions,
    ) -> Result<Self> {
        let pool = MonitorPool::initialize(&mut driver, pool_size, target)
            .context("initializing monitor pool")?;

        Ok(Self {
            driver,
            frame,
            pool,
            report,
            opts,
            metrics: None,
            buffer: Vec::with_capacity(64),
            totals: RunSummary::default(),
        })
    }

    /// Publish pipeline metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<HealthMetrics>) -> Self {
        metrics.set_pool_counts(self.pool.counts());
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &MonitorPool {
        &self.pool
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn frame(&self) -> &F {
        &self.frame
    }

    pub fn report(&self) -> &Report<W> {
        &self.report
    }

    pub fn totals(&self) -> RunSummary {
        self.totals
    }

    /// Run one iteration: harvest if the pool is exhausted, then submit one
    /// sampled frame. Returns the harvest summary when a harvest happened.
    pub fn step(&mut self) -> Result<Option<HarvestSummary>> {
        let harvest = if self.pool.has_free() {
            None
        } else {
            Some(self.harvest()?)
        };

        let monitor = self.pool.acquire()?;

        self.driver.begin_monitor(monitor);
        self.frame.clear(SAMPLED_CLEAR_COLOR);
        self.driver.end_monitor(monitor);
        let presented = self.frame.present();
        self.pool.mark_pending(monitor)?;
        presented.context("presenting sampled frame")?;

        if self.opts.idle_frames {
            self.frame.clear(IDLE_CLEAR_COLOR);
            self.frame.present().context("presenting idle frame")?;
        }

        self.totals.frames += 1;
        if let Some(metrics) = &self.metrics {
            metrics.frames_submitted.inc();
            metrics.set_pool_counts(self.pool.counts());
        }

        Ok(harvest)
    }

    /// Wait for the GPU, then decode, report and recycle every pending
    /// monitor.
    pub fn harvest(&mut self) -> Result<HarvestSummary> {
        let started = Instant::now();

        // The only blocking call of the loop.
        self.driver.finish();

        let declared_type = self.pool.target().declared_type;
        let mut summary = HarvestSummary::default();
        let mut unavailable = 0usize;
        let mut last_error = None;

        for monitor in self.pool.pending_monitors() {
            if !self.driver.result_available(monitor) {
                unavailable += 1;
            }

            self.driver.read_result(monitor, &mut self.buffer);

            match decode(&self.buffer, declared_type) {
                Ok(sample) => {
                    self.report.sample(&sample).context("writing sample")?;
                    summary.samples += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.samples.inc();
                        metrics.last_sample_value.set(sample.value.as_f64());
                    }
                }
                Err(DecodeError::NoData) => {
                    self.report.no_data().context("writing no-data warning")?;
                    summary.no_data += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.no_data.inc();
                    }
                }
                Err(e) => {
                    last_error = Some(e);
                    summary.decode_errors += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.decode_errors.with_label_values(&[e.as_str()]).inc();
                    }
                }
            }

            self.pool.release(monitor)?;
            summary.harvested += 1;
        }

        self.report.flush().context("flushing report")?;
        self.totals.add(&summary);

        if unavailable > 0 {
            warn!(
                monitors = unavailable,
                "results unavailable after pipeline barrier"
            );
        }
        if let Some(e) = last_error {
            warn!(
                results = summary.decode_errors,
                error = %e,
                "discarded undecodable results",
            );
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.harvests.inc();
            metrics.harvest_duration.observe(elapsed.as_secs_f64());
            metrics.set_pool_counts(self.pool.counts());
        }

        debug!(
            harvested = summary.harvested,
            samples = summary.samples,
            no_data = summary.no_data,
            decode_errors = summary.decode_errors,
            elapsed_us = elapsed.as_micros() as u64,
            "harvest complete",
        );

        Ok(summary)
    }

    /// Step until `cancel` fires or the frame limit is reached, then drain
    /// whatever is still pending.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        info!(
            pool_size = self.pool.size(),
            target = %self.pool.target().id,
            max_frames = ?self.opts.max_frames,
            "sampling started",
        );

        let mut last_progress = Instant::now();
        let mut frames_at_progress = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!("sampling cancelled");
                break;
            }
            if let Some(max) = self.opts.max_frames {
                if self.totals.frames >= max {
                    info!(frames = self.totals.frames, "frame limit reached");
                    break;
                }
            }

            self.step()?;

            let since = last_progress.elapsed();
            if since >= self.opts.stats_interval {
                let frames = self.totals.frames - frames_at_progress;
                info!(
                    frames = self.totals.frames,
                    samples = self.totals.samples,
                    no_data = self.totals.no_data,
                    decode_errors = self.totals.decode_errors,
                    fps = frames as f64 / since.as_secs_f64(),
                    "sampling progress",
                );
                last_progress = Instant::now();
                frames_at_progress = self.totals.frames;
            }
        }

        if self.pool.counts().pending > 0 {
            self.harvest().context("draining pending monitors")?;
        }

        Ok(self.totals)
    }

    /// Delete the pool's monitors and hand back the collaborators.
    pub fn shutdown(self) -> (D, F, Report<W>) {
        let Self {
            mut driver,
            frame,
            pool,
            report,
            ..
        } = self;
        pool.destroy(&mut driver);
        (driver, frame, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterCatalog, CounterId, CounterType};
    use crate::driver::sim::{NullFrame, SimDriver};
    use crate::driver::{GL_FLOAT, GL_UNSIGNED_INT64_AMD};
    use crate::monitor::PoolCounts;

    fn sampler(
        driver: SimDriver,
        target_name: &str,
        pool_size: usize,
        opts: SamplerOptions,
    ) -> Sampler<SimDriver, NullFrame, Vec<u8>> {
        let mut discovery = Report::new(Vec::new());
        let catalog = CounterCatalog::discover(&driver, &mut discovery).unwrap();
        let target = catalog.select_target(target_name);
        Sampler::new(
            driver,
            NullFrame::new(),
            target,
            pool_size,
            Report::new(Vec::new()),
            opts,
        )
        .unwrap()
    }

    fn output(sampler: &Sampler<SimDriver, NullFrame, Vec<u8>>) -> String {
        String::from_utf8(sampler.report().get_ref().clone()).unwrap()
    }

    #[test]
    fn test_step_submits_without_harvesting_until_exhausted() {
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            4,
            SamplerOptions::default(),
        );

        for _ in 0..4 {
            assert_eq!(s.step().unwrap(), None);
        }
        assert_eq!(s.driver().finish_calls(), 0);
        assert_eq!(
            s.pool().counts(),
            PoolCounts {
                free: 0,
                active: 0,
                pending: 4
            }
        );
        assert!(output(&s).is_empty());
    }

    #[test]
    fn test_exhausted_pool_triggers_single_barrier_and_full_drain() {
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            4,
            SamplerOptions::default(),
        );
        for _ in 0..4 {
            s.step().unwrap();
        }

        let harvest = s.step().unwrap().expect("fifth step harvests");
        assert_eq!(
            harvest,
            HarvestSummary {
                harvested: 4,
                samples: 4,
                no_data: 0,
                decode_errors: 0
            }
        );
        assert_eq!(s.driver().finish_calls(), 1);
        // The fifth frame is already in flight again.
        assert_eq!(s.pool().counts().pending, 1);
        assert_eq!(s.pool().counts().free, 3);

        let out = output(&s);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        let mut values: Vec<u64> = lines
            .iter()
            .map(|l| l.strip_prefix("clocks: ").unwrap().parse().unwrap())
            .collect();
        values.sort_unstable();
        let expected: Vec<u64> = (1..=4).map(SimDriver::simulated_clocks).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_idle_frames_double_presents() {
        let mut with_idle = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            2,
            SamplerOptions::default(),
        );
        with_idle.step().unwrap();
        assert_eq!(with_idle.frame().clears(), 2);
        assert_eq!(with_idle.frame().presents(), 2);

        let mut without_idle = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            2,
            SamplerOptions {
                idle_frames: false,
                ..Default::default()
            },
        );
        without_idle.step().unwrap();
        assert_eq!(without_idle.frame().clears(), 1);
        assert_eq!(without_idle.frame().presents(), 1);
    }

    #[test]
    fn test_no_data_results_warn_and_recycle() {
        let mut s = sampler(
            SimDriver::with_default_catalog().with_empty_results(),
            "GRBM_000",
            3,
            SamplerOptions::default(),
        );
        for _ in 0..3 {
            s.step().unwrap();
        }

        let harvest = s.harvest().unwrap();
        assert_eq!(harvest.no_data, 3);
        assert_eq!(harvest.samples, 0);
        assert_eq!(s.pool().counts().free, 3);
        assert_eq!(s.pool().counts().total(), 3);
        assert_eq!(output(&s), "WARN: no data from counter\n".repeat(3));
    }

    #[test]
    fn test_unresolved_target_samples_default_slot() {
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "NOT_A_COUNTER",
            2,
            SamplerOptions::default(),
        );
        assert_eq!(s.pool().target().id, CounterId::UNSET);
        assert_eq!(s.pool().target().declared_type, CounterType::UnsignedInt64);

        for _ in 0..3 {
            s.step().unwrap();
        }
        assert_eq!(
            s.totals(),
            RunSummary {
                frames: 3,
                harvests: 1,
                samples: 2,
                no_data: 0,
                decode_errors: 0
            }
        );
        assert_eq!(
            output(&s),
            format!(
                "clocks: {}\nclocks: {}\n",
                SimDriver::simulated_clocks(1),
                SimDriver::simulated_clocks(2)
            )
        );
    }

    #[test]
    fn test_undecodable_results_are_counted_and_recycled() {
        let driver = SimDriver::new().with_group(0, "Odd", &[(0, "ODD", 0x1234)]);
        let mut s = sampler(driver, "ODD", 2, SamplerOptions::default());

        for _ in 0..5 {
            s.step().unwrap();
        }
        assert_eq!(s.totals().harvests, 2);
        assert_eq!(s.totals().decode_errors, 4);
        assert_eq!(s.pool().counts().total(), 2);
        assert!(output(&s).is_empty());
    }

    #[test]
    fn test_float_counter_reported() {
        let driver = SimDriver::new().with_group(0, "Busy", &[(3, "SHADER_BUSY", GL_FLOAT)]);
        let mut s = sampler(driver, "SHADER_BUSY", 1, SamplerOptions::default());
        assert_eq!(s.pool().target().declared_type, CounterType::Float);

        s.step().unwrap();
        s.harvest().unwrap();
        assert_eq!(output(&s), "clocks: 1\n");
    }

    #[test]
    fn test_run_stops_at_frame_limit_and_drains() {
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            10,
            SamplerOptions {
                max_frames: Some(25),
                ..Default::default()
            },
        );

        let totals = s.run(&CancellationToken::new()).unwrap();
        assert_eq!(totals.frames, 25);
        assert_eq!(totals.samples, 25);
        assert_eq!(totals.harvests, 3);
        assert_eq!(s.pool().counts().free, 10);
    }

    #[test]
    fn test_run_returns_immediately_when_cancelled() {
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            4,
            SamplerOptions::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let totals = s.run(&cancel).unwrap();
        assert_eq!(totals, RunSummary::default());
        assert_eq!(s.driver().finish_calls(), 0);
    }

    #[test]
    fn test_metrics_follow_pipeline() {
        let metrics = Arc::new(HealthMetrics::new(":0").unwrap());
        let mut s = sampler(
            SimDriver::with_default_catalog(),
            "GRBM_000",
            2,
            SamplerOptions::default(),
        )
        .with_metrics(Arc::clone(&metrics));

        for _ in 0..3 {
            s.step().unwrap();
        }

        assert_eq!(metrics.frames_submitted.get(), 3.0);
        assert_eq!(metrics.samples.get(), 2.0);
        assert_eq!(metrics.harvests.get(), 1.0);
        assert_eq!(
            metrics.last_sample_value.get(),
            SimDriver::simulated_clocks(2) as f64
        );
        assert_eq!(metrics.monitors.with_label_values(&["pending"]).get(), 1.0);
    }

    #[test]
    fn test_shutdown_deletes_monitors() {
        let mut s = sampler(
            SimDriver::new().with_group(0, "GRBM", &[(0, "GRBM_000", GL_UNSIGNED_INT64_AMD)]),
            "GRBM_000",
            6,
            SamplerOptions::default(),
        );
        s.step().unwrap();

        let (driver, frame, _) = s.shutdown();
        assert_eq!(driver.live_monitors(), 0);
        assert_eq!(driver.deleted_monitors().len(), 6);
        assert_eq!(frame.presents(), 2);
    }
}
