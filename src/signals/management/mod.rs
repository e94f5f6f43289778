/*!
 * Signal Management - Delivery
 * The signal-delivery actor and the process-wide action table
 */

mod delivery;

// Re-export public API
pub use delivery::{ActionTable, DeliveryActor, DeliveryOutcome};
