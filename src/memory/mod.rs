/*!
 * Memory Module
 * Simulated user memory the signal frames are written into
 */

pub mod address_space;
pub mod types;

// Re-export for convenience
pub use address_space::AddressSpace;
pub use types::*;
