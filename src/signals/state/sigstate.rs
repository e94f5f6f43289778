/*!
 * Per-Thread Signal State
 * Blocked and pending masks, alternate stack, in-flight context and unwind chain
 */

use super::resources::UnwindChain;
use crate::core::types::{Address, PortName, ThreadId, PORT_NULL};
use crate::signals::core::{SigAltStack, SigSet, Signal, SignalDetail};
use ahash::RandomState;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Lock-protected part of a thread's signal state
pub struct SigStateInner {
    pub blocked: SigSet,
    pub pending: SigSet,
    /// Detail recorded for each pending signal
    pub pending_detail: HashMap<Signal, SignalDetail, RandomState>,
    pub altstack: SigAltStack,
    /// Context a restore was about to load when a new signal arrived
    pub context: Option<Address>,
    pub resources: UnwindChain,
}

impl SigStateInner {
    fn new() -> Self {
        Self {
            blocked: SigSet::EMPTY,
            pending: SigSet::EMPTY,
            pending_detail: HashMap::with_hasher(RandomState::new()),
            altstack: SigAltStack::default(),
            context: None,
            resources: UnwindChain::new(),
        }
    }

    /// Record a pending signal; a later detail for the same signal replaces the earlier one
    pub fn mark_pending(&mut self, signal: Signal, detail: SignalDetail) {
        self.pending.insert(signal);
        self.pending_detail.insert(signal, detail);
    }

    /// Clear a pending signal and hand back its detail
    pub fn take_pending(&mut self, signal: Signal) -> SignalDetail {
        self.pending.remove(signal);
        self.pending_detail.remove(&signal).unwrap_or_default()
    }

    /// Pending signals the blocked mask lets through
    pub fn deliverable(&self) -> SigSet {
        self.pending.difference(self.blocked)
    }

    pub fn next_deliverable(&self) -> Option<Signal> {
        self.deliverable().first()
    }

    /// Current signal nesting depth
    pub fn nesting_depth(&self) -> usize {
        self.resources.len()
    }
}

/// Signal state of one thread
///
/// The reply and interrupt ports sit outside the lock: the thread reads them on
/// every RPC. The reply port is only ever taken by swapping in `PORT_DEAD`.
pub struct SigState {
    thread: ThreadId,
    inner: Mutex<SigStateInner>,
    reply_port: AtomicU32,
    intr_port: AtomicU32,
    cancel: AtomicBool,
}

impl SigState {
    pub fn new(thread: ThreadId, reply_port: PortName) -> Self {
        Self {
            thread,
            inner: Mutex::new(SigStateInner::new()),
            reply_port: AtomicU32::new(reply_port),
            intr_port: AtomicU32::new(PORT_NULL),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn lock(&self) -> MutexGuard<'_, SigStateInner> {
        self.inner.lock()
    }

    pub fn reply_port(&self) -> PortName {
        self.reply_port.load(Ordering::Acquire)
    }

    /// Install `port` and return whatever was there
    pub fn swap_reply_port(&self, port: PortName) -> PortName {
        self.reply_port.swap(port, Ordering::AcqRel)
    }

    pub fn set_reply_port(&self, port: PortName) {
        self.reply_port.store(port, Ordering::Release);
    }

    pub fn intr_port(&self) -> PortName {
        self.intr_port.load(Ordering::Acquire)
    }

    pub fn set_intr_port(&self, port: PortName) {
        self.intr_port.store(port, Ordering::Release);
    }

    pub fn clear_intr_port(&self) {
        self.set_intr_port(PORT_NULL);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Consume a cancellation request
    pub fn take_cancel(&self) -> bool {
        self.cancel.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for SigState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigState")
            .field("thread", &self.thread)
            .field("reply_port", &self.reply_port())
            .field("intr_port", &self.intr_port())
            .field("cancel", &self.cancel_requested())
            .finish_non_exhaustive()
    }
}
