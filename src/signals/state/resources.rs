/*!
 * Active Resources Chain
 * Unwind-resource entries kept in a generational arena, linked newest first
 */

use super::sigstate::{SigState, SigStateInner};
use crate::core::errors::SignalResult;
use crate::core::types::Address;
use crate::kernel::PortRights;
use crate::memory::AddressSpace;

/// Stable handle to an unwind-resource entry.
///
/// A handle outlives its entry safely: once the entry is unlinked, the slot's
/// generation moves on and the stale handle no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnwindHandle {
    index: u32,
    generation: u32,
}

impl UnwindHandle {
    /// Encoding stored in a signal frame's link slot; never zero
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        let generation = (raw >> 32) as u32;
        if generation == 0 {
            return None;
        }
        Some(Self {
            index: raw as u32,
            generation,
        })
    }
}

/// What a cleanup callback gets to work with
pub struct CleanupContext<'a> {
    pub state: &'a SigState,
    pub memory: &'a AddressSpace,
    pub ports: &'a dyn PortRights,
}

/// Cleanup run when control leaves a frame without passing through its normal exit
pub type UnwindCleanup =
    fn(&CleanupContext<'_>, &mut SigStateInner, Address) -> SignalResult<()>;

/// One active resource
#[derive(Clone, Copy)]
pub struct UnwindEntry {
    pub cleanup: UnwindCleanup,
    /// Opaque cleanup argument (the signal context address for signal frames)
    pub data: Address,
    /// Stack address of the resource; a jump to any stack pointer above it passes it
    pub frame: Address,
    next: Option<UnwindHandle>,
}

impl UnwindEntry {
    pub fn new(cleanup: UnwindCleanup, data: Address, frame: Address) -> Self {
        Self {
            cleanup,
            data,
            frame,
            next: None,
        }
    }
}

impl std::fmt::Debug for UnwindEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnwindEntry")
            .field("data", &format_args!("0x{:x}", self.data))
            .field("frame", &format_args!("0x{:x}", self.frame))
            .field("next", &self.next)
            .finish()
    }
}

struct Slot {
    generation: u32,
    entry: Option<UnwindEntry>,
}

/// The thread's chain of active resources
#[derive(Default)]
pub struct UnwindChain {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<UnwindHandle>,
    len: usize,
}

impl UnwindChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<UnwindHandle> {
        self.head
    }

    pub fn get(&self, handle: UnwindHandle) -> Option<&UnwindEntry> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Link a new entry at the head of the chain
    pub fn push_front(&mut self, mut entry: UnwindEntry) -> UnwindHandle {
        entry.next = self.head;
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                UnwindHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 1,
                    entry: Some(entry),
                });
                UnwindHandle {
                    index,
                    generation: 1,
                }
            }
        };
        self.head = Some(handle);
        self.len += 1;
        handle
    }

    /// Remove an entry wherever it sits in the chain
    pub fn unlink(&mut self, handle: UnwindHandle) -> Option<UnwindEntry> {
        let next = self.get(handle)?.next;

        if self.head == Some(handle) {
            self.head = next;
        } else {
            let mut cursor = self.head;
            while let Some(current) = cursor {
                let slot = &mut self.slots[current.index as usize];
                let Some(entry) = slot.entry.as_mut() else {
                    break;
                };
                if entry.next == Some(handle) {
                    entry.next = next;
                    break;
                }
                cursor = entry.next;
            }
        }

        let slot = &mut self.slots[handle.index as usize];
        let entry = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index);
        self.len -= 1;
        entry
    }

    /// Entries from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = (UnwindHandle, &UnwindEntry)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let handle = cursor?;
            let entry = self.get(handle)?;
            cursor = entry.next;
            Some((handle, entry))
        })
    }
}
