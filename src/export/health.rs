use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::monitor::{MonitorState, PoolCounts};

const NAMESPACE: &str = "perfmon";

/// Prometheus metrics describing the sampling pipeline.
///
/// All metrics use the "perfmon" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Sampled frames submitted to the GPU.
    pub frames_submitted: Counter,
    /// Samples decoded and reported.
    pub samples: Counter,
    /// Harvested monitors that returned no data.
    pub no_data: Counter,
    /// Results that could not be decoded, by error_type.
    pub decode_errors: CounterVec,
    /// Completed harvest passes.
    pub harvests: Counter,
    /// Wall time of a harvest pass, including the pipeline barrier.
    pub harvest_duration: Histogram,
    /// Pool monitors by state (free/active/pending).
    pub monitors: GaugeVec,
    /// Most recent decoded value of the target counter.
    pub last_sample_value: Gauge,
    /// Counters found during discovery.
    pub counters_discovered: Gauge,
    /// Whether the target name matched a discovered counter (1=yes, 0=no).
    pub target_resolved: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let frames_submitted = Counter::with_opts(
            Opts::new(
                "frames_submitted_total",
                "Total sampled frames submitted to the GPU.",
            )
            .namespace(NAMESPACE),
        )?;
        let samples = Counter::with_opts(
            Opts::new("samples_total", "Total counter samples decoded.").namespace(NAMESPACE),
        )?;
        let no_data = Counter::with_opts(
            Opts::new(
                "no_data_total",
                "Total harvested monitors that returned no data.",
            )
            .namespace(NAMESPACE),
        )?;
        let decode_errors = CounterVec::new(
            Opts::new(
                "decode_errors_total",
                "Total result decode errors by error type.",
            )
            .namespace(NAMESPACE),
            &["error_type"],
        )?;
        let harvests = Counter::with_opts(
            Opts::new("harvests_total", "Total harvest passes.").namespace(NAMESPACE),
        )?;
        let harvest_duration = Histogram::with_opts(
            HistogramOpts::new(
                "harvest_duration_seconds",
                "Harvest pass duration including the pipeline barrier.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        let monitors = GaugeVec::new(
            Opts::new("monitors", "Pool monitors by state.").namespace(NAMESPACE),
            &["state"],
        )?;
        let last_sample_value = Gauge::with_opts(
            Opts::new(
                "last_sample_value",
                "Most recent decoded value of the target counter.",
            )
            .namespace(NAMESPACE),
        )?;
        let counters_discovered = Gauge::with_opts(
            Opts::new(
                "counters_discovered",
                "Number of counters found during discovery.",
            )
            .namespace(NAMESPACE),
        )?;
        let target_resolved = Gauge::with_opts(
            Opts::new(
                "target_resolved",
                "Whether the target counter name was found (1=yes, 0=no).",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(frames_submitted.clone()))?;
        registry.register(Box::new(samples.clone()))?;
        registry.register(Box::new(no_data.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(harvests.clone()))?;
        registry.register(Box::new(harvest_duration.clone()))?;
        registry.register(Box::new(monitors.clone()))?;
        registry.register(Box::new(last_sample_value.clone()))?;
        registry.register(Box::new(counters_discovered.clone()))?;
        registry.register(Box::new(target_resolved.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            frames_submitted,
            samples,
            no_data,
            decode_errors,
            harvests,
            harvest_duration,
            monitors,
            last_sample_value,
            counters_discovered,
            target_resolved,
        })
    }

    /// Publish the pool's per-state monitor counts.
    pub fn set_pool_counts(&self, counts: PoolCounts) {
        for (state, value) in [
            (MonitorState::Free, counts.free),
            (MonitorState::Active, counts.active),
            (MonitorState::PendingCollection, counts.pending),
        ] {
            self.monitors
                .with_label_values(&[state.as_str()])
                .set(value as f64);
        }
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
