/*!
 * Signal State Registry
 * One signal state per thread, created at thread start and dropped at teardown
 */

use super::sigstate::SigState;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{PortName, ThreadId};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

#[derive(Default)]
pub struct SignalStateRegistry {
    states: DashMap<ThreadId, Arc<SigState>, RandomState>,
}

impl SignalStateRegistry {
    pub fn new() -> Self {
        Self {
            states: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Create the signal state of a new thread
    pub fn initialize_thread(
        &self,
        thread: ThreadId,
        reply_port: PortName,
    ) -> SignalResult<Arc<SigState>> {
        match self.states.entry(thread) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SignalError::AlreadyInitialized(thread))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let state = Arc::new(SigState::new(thread, reply_port));
                slot.insert(state.clone());
                debug!("Initialized signal state for {}", thread);
                Ok(state)
            }
        }
    }

    /// Drop a thread's signal state, returning it so the caller can release its ports
    pub fn cleanup_thread(&self, thread: ThreadId) -> Option<Arc<SigState>> {
        let removed = self.states.remove(&thread).map(|(_, state)| state);
        if let Some(state) = &removed {
            let depth = state.lock().nesting_depth();
            info!(
                "Cleaned signal state for {} ({} unresolved frames)",
                thread, depth
            );
        }
        removed
    }

    pub fn get(&self, thread: ThreadId) -> SignalResult<Arc<SigState>> {
        self.states
            .get(&thread)
            .map(|entry| entry.value().clone())
            .ok_or(SignalError::UnknownThread(thread))
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.states.contains_key(&thread)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
