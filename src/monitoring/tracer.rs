/*!
 * Tracing
 * Subscriber setup and timed operation spans for the memory system
 *
 * Features:
 * - JSON or compact human-readable output
 * - `log` records from allocator internals bridged into the same subscriber
 * - Slow-operation warnings on teardown and bulk setup
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static NEXT_TRACE_ID: AtomicU64 = AtomicU64::new(1);

/// Initialize tracing with the default `info` filter
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - MEMSYS_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    init_tracing_with("info");
}

/// Initialize tracing, falling back to `default_filter` when RUST_LOG is unset
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing_with(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let use_json = std::env::var("MEMSYS_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "tracing initialized");
    }
}

/// Process-unique id for correlating one operation's events
pub fn generate_trace_id() -> u64 {
    NEXT_TRACE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Timed span around a memory-system operation
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: u64,
}

impl OperationSpan {
    pub fn new(operation: &str) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "operation",
            trace_id = trace_id,
            operation = operation,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
            items_processed = tracing::field::Empty,
        );

        let entered = span.enter();
        debug!(operation = operation, trace_id = trace_id, "operation started");
        drop(entered);

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    pub fn record_result(&self, success: bool) {
        self.span
            .record("result", if success { "success" } else { "error" });
    }

    pub fn record_items_processed(&self, count: usize) {
        self.span.record("items_processed", count);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_millis() > 100 {
            warn!(
                trace_id = self.trace_id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow operation detected"
            );
        } else {
            debug!(
                trace_id = self.trace_id,
                duration_us = duration.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Convenience constructor for [`OperationSpan`]
pub fn span_operation(operation: &str) -> OperationSpan {
    OperationSpan::new(operation)
}
