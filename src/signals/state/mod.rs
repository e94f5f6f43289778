/*!
 * Signal State
 * Per-thread signal bookkeeping and its registry
 */

pub mod registry;
pub mod resources;
pub mod sigstate;

pub use registry::SignalStateRegistry;
pub use resources::{CleanupContext, UnwindChain, UnwindCleanup, UnwindEntry, UnwindHandle};
pub use sigstate::{SigState, SigStateInner};
