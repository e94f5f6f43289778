/*!
 * Lock-Free Delivery Statistics
 * Atomic counters updated on the delivery path, read as a serializable snapshot
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatsSnapshot {
    pub exceptions_received: u64,
    pub signals_posted: u64,
    pub frames_built: u64,
    pub frame_failures: u64,
    pub rpc_retries: u64,
    pub sigreturns: u64,
    pub reentrant_posts: u64,
    pub forced_terminations: u64,
    pub ignored: u64,
}

/// Atomic delivery statistics
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - Relaxed ordering; the snapshot is not a consistent cut
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct DeliveryStats {
    exceptions_received: AtomicU64,
    signals_posted: AtomicU64,
    frames_built: AtomicU64,
    frame_failures: AtomicU64,
    rpc_retries: AtomicU64,
    sigreturns: AtomicU64,
    reentrant_posts: AtomicU64,
    forced_terminations: AtomicU64,
    ignored: AtomicU64,
}

impl DeliveryStats {
    pub const fn new() -> Self {
        Self {
            exceptions_received: AtomicU64::new(0),
            signals_posted: AtomicU64::new(0),
            frames_built: AtomicU64::new(0),
            frame_failures: AtomicU64::new(0),
            rpc_retries: AtomicU64::new(0),
            sigreturns: AtomicU64::new(0),
            reentrant_posts: AtomicU64::new(0),
            forced_terminations: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_exceptions(&self) {
        self.exceptions_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_posted(&self) {
        self.signals_posted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_frames_built(&self) {
        self.frames_built.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_frame_failures(&self) {
        self.frame_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_rpc_retries(&self) {
        self.rpc_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_sigreturns(&self) {
        self.sigreturns.fetch_add(1, Ordering::Relaxed);
    }

    /// A restore found newly unblocked signals and asked for another handler
    #[inline(always)]
    pub fn inc_reentrant_posts(&self) {
        self.reentrant_posts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_terminations(&self) {
        self.forced_terminations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            exceptions_received: self.exceptions_received.load(Ordering::Relaxed),
            signals_posted: self.signals_posted.load(Ordering::Relaxed),
            frames_built: self.frames_built.load(Ordering::Relaxed),
            frame_failures: self.frame_failures.load(Ordering::Relaxed),
            rpc_retries: self.rpc_retries.load(Ordering::Relaxed),
            sigreturns: self.sigreturns.load(Ordering::Relaxed),
            reentrant_posts: self.reentrant_posts.load(Ordering::Relaxed),
            forced_terminations: self.forced_terminations.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}
