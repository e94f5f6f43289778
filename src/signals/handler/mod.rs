/*!
 * Signal Handler - Handler Invocation
 * Handler callback registry and the trampoline that runs handlers
 */

mod callbacks;
pub mod trampoline;

// Re-export public API
pub use callbacks::{
    HandlerCall, HandlerExit, HandlerFn, HandlerRegistry, HANDLER_BASE, HANDLER_STRIDE,
};
pub use trampoline::{Dispatcher, Step, RPC_WAIT_TRAMPOLINE, TRAMPOLINE, TRAMPOLINE_RETURN};
