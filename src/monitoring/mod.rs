/*!
 * Monitoring
 * Tracing setup and delivery statistics
 */

pub mod stats;
pub mod tracer;

pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
pub use tracer::{generate_delivery_id, init_tracing, DeliverySpan, TRACE_JSON_ENV};
