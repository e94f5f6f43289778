/*!
 * Signal Traits
 * Seams between the restorer and the signal-delivery actor
 */

use crate::core::errors::SignalResult;
use crate::core::types::ThreadId;
use crate::kernel::Resumed;

/// Result of asking the delivery actor to run pending signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// A handler frame was installed and the thread now runs it
    HandlerInstalled(Resumed),
    /// Nothing ran a handler; the caller carries on
    NoHandler,
}

/// Wake the signal-delivery actor for a thread
pub trait SigPost: Send + Sync {
    fn sig_post(&self, thread: ThreadId) -> SignalResult<PostOutcome>;
}
