/*!
 * Memory Types
 * Region and protection types for the simulated user address space
 */

use crate::core::errors::MemoryFault;
use crate::core::types::Address;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Memory operation result
pub type MemoryResult<T> = Result<T, MemoryFault>;

bitflags! {
    /// Page protection bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Protection: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

/// Mapped region metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub base: Address,
    pub size: u64,
    pub protection: Protection,
}

impl RegionInfo {
    /// True if `[addr, addr + len)` lies inside this region
    pub fn covers(&self, addr: Address, len: u64) -> bool {
        addr >= self.base
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.base.saturating_add(self.size))
    }
}
