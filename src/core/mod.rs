/*!
 * Core Module
 * Fundamental types, configuration and error handling
 */

pub mod config;
pub mod errors;
pub mod types;

// Re-export for convenience
pub use config::{DeliveryConfig, RPC_TIMEOUT_ENV};
pub use errors::*;
pub use types::*;
