/*!
 * Delivery Tracing
 * Structured tracing for signal delivery using the tracing crate
 *
 * Features:
 * - Delivery IDs for correlating frame, handler and sigreturn events
 * - JSON-formatted logs for structured parsing
 * - `log` records from leaf modules routed through the same subscriber
 */

use crate::core::types::ThreadId;
use crate::signals::core::Signal;
use std::time::Instant;
use tracing::{debug, info, span, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Environment variable selecting JSON output
pub const TRACE_JSON_ENV: &str = "SIGDELIVER_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SIGDELIVER_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV)
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
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique id for one delivery
pub fn generate_delivery_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one signal delivery
pub struct DeliverySpan {
    span: Span,
    start: Instant,
    delivery_id: String,
}

impl DeliverySpan {
    pub fn new(thread: ThreadId, signal: Signal) -> Self {
        let delivery_id = generate_delivery_id();
        let span = span!(
            Level::DEBUG,
            "signal_delivery",
            delivery_id = %delivery_id,
            thread = %thread,
            signal = %signal,
            outcome = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            delivery_id,
        }
    }

    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Record the outcome and elapsed time
    pub fn finish<V: std::fmt::Debug>(self, outcome: &V) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.span.record("outcome", format!("{outcome:?}").as_str());
        self.span.record("duration_us", elapsed);
        let _entered = self.span.enter();
        debug!(duration_us = elapsed, "delivery finished");
    }
}
