//! Structured logging with per-wave correlation ids

use chrono::{DateTime, Utc};
use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, span, Instrument, Level, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter};
use uuid::Uuid;

/// Correlation ID tying together every log line of one wave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Initialize global tracing subscriber (`RUST_LOG`, default `info`)
pub fn init_subscriber() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;

    info!("Tracing logger initialized");
    Ok(())
}

/// Anything whose ledger cost is worth recording
pub trait CostReport {
    fn cost_used(&self) -> U256;
}

/// Timing and cost for one wave step
#[derive(Debug, Clone, Serialize)]
pub struct OperationMetrics {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub cost_used: Option<U256>,
}

/// Logger for a single wave or command run.
#[derive(Clone)]
pub struct WaveLogger {
    correlation_id: CorrelationId,
    span: Span,
    started_at: DateTime<Utc>,
    start: Instant,
    metrics: Arc<RwLock<Vec<OperationMetrics>>>,
}

impl WaveLogger {
    pub fn new(command: &str) -> Self {
        let correlation_id = CorrelationId::new();
        let span = span!(
            Level::INFO,
            "wave",
            correlation_id = %correlation_id,
            command = %command,
        );

        Self {
            correlation_id,
            span,
            started_at: Utc::now(),
            start: Instant::now(),
            metrics: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Run `f` inside an operation span and record its metrics.
    pub async fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
        T: CostReport,
        E: std::fmt::Display,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let op_span = span!(parent: &self.span, Level::DEBUG, "operation", name = %operation);

        debug!(parent: &op_span, operation = %operation, "Operation started");
        let result = f.instrument(op_span.clone()).await;
        let duration = start.elapsed();

        let metrics = OperationMetrics {
            operation: operation.to_string(),
            started_at,
            duration_ms: duration.as_millis() as u64,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            cost_used: result.as_ref().ok().map(|v| v.cost_used()),
        };
        self.metrics.write().await.push(metrics);

        match &result {
            Ok(_) => {
                debug!(
                    parent: &op_span,
                    operation = %operation,
                    duration_ms = duration.as_millis() as u64,
                    "Operation completed successfully"
                );
            }
            Err(e) => {
                error!(
                    parent: &op_span,
                    operation = %operation,
                    duration_ms = duration.as_millis() as u64,
                    error = %e,
                    "Operation failed"
                );
            }
        }

        result
    }

    pub async fn metrics(&self) -> Vec<OperationMetrics> {
        self.metrics.read().await.clone()
    }

    /// JSON summary of every recorded operation
    pub async fn summary(&self) -> serde_json::Value {
        let metrics = self.metrics.read().await;
        let total_cost = metrics
            .iter()
            .filter_map(|m| m.cost_used)
            .fold(U256::zero(), |acc, c| acc.saturating_add(c));

        serde_json::json!({
            "correlation_id": self.correlation_id,
            "started_at": self.started_at.to_rfc3339(),
            "elapsed_ms": self.elapsed().as_millis() as u64,
            "operations": metrics.len(),
            "failures": metrics.iter().filter(|m| !m.success).count(),
            "total_cost": total_cost.to_string(),
            "steps": &*metrics,
        })
    }

    pub async fn log_summary(&self) {
        let summary = self.summary().await;
        info!(parent: &self.span, summary = %summary, "Wave summary");
    }
}
