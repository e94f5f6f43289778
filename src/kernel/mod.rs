/*!
 * Kernel Interfaces
 * Thread state, thread control, message trap and port rights, plus a simulated kernel
 */

pub mod sim;
pub mod switch;
pub mod traits;
pub mod types;

// Re-export public API
pub use sim::SimKernel;
pub use switch::{switch_context, Resumed};
pub use traits::*;
pub use types::*;
