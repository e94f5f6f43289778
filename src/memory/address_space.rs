/*!
 * Simulated Address Space
 * Byte-addressable user memory with per-region protection and faulting accesses
 */

use super::types::{MemoryResult, Protection, RegionInfo};
use crate::core::errors::MemoryFault;
use crate::core::types::Address;
use bytemuck::Pod;
use log::{debug, trace};
use parking_lot::RwLock;
use std::collections::BTreeMap;

struct Region {
    info: RegionInfo,
    data: Vec<u8>,
}

/// One task's user address space.
///
/// Every access must fall inside a single mapped region; straddling two
/// adjacent regions faults at the first byte past the region.
#[derive(Default)]
pub struct AddressSpace {
    regions: RwLock<BTreeMap<Address, Region>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a zero-filled region, replacing any region it overlaps
    pub fn map(&self, base: Address, size: u64, protection: Protection) {
        let mut regions = self.regions.write();
        let end = base.saturating_add(size);
        let overlapping: Vec<Address> = regions
            .iter()
            .filter(|(_, r)| {
                r.info.base < end && base < r.info.base.saturating_add(r.info.size)
            })
            .map(|(b, _)| *b)
            .collect();
        for b in overlapping {
            regions.remove(&b);
        }

        let len = usize::try_from(size).unwrap_or(0);
        regions.insert(
            base,
            Region {
                info: RegionInfo {
                    base,
                    size,
                    protection,
                },
                data: vec![0u8; len],
            },
        );
        debug!("Mapped 0x{:x}..0x{:x} {:?}", base, end, protection);
    }

    /// Remove the region starting at `base`
    pub fn unmap(&self, base: Address) -> bool {
        self.regions.write().remove(&base).is_some()
    }

    /// Change the protection of the region starting at `base`
    pub fn protect(&self, base: Address, protection: Protection) -> MemoryResult<()> {
        let mut regions = self.regions.write();
        let region = regions
            .get_mut(&base)
            .ok_or(MemoryFault::Unmapped(base))?;
        region.info.protection = protection;
        Ok(())
    }

    /// Region covering `addr`, if any
    pub fn region_of(&self, addr: Address) -> Option<RegionInfo> {
        self.regions
            .read()
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r.info)
            .filter(|info| info.covers(addr, 1))
    }

    fn locate(
        regions: &BTreeMap<Address, Region>,
        addr: Address,
        len: u64,
        need: Protection,
    ) -> MemoryResult<(Address, usize)> {
        let (base, region) = regions
            .range(..=addr)
            .next_back()
            .filter(|(_, r)| r.info.covers(addr, 1))
            .ok_or(MemoryFault::Unmapped(addr))?;

        if !region.info.covers(addr, len) {
            return Err(MemoryFault::Unmapped(
                region.info.base.saturating_add(region.info.size),
            ));
        }
        if !region.info.protection.contains(need) {
            return Err(MemoryFault::Protection(addr));
        }
        Ok((*base, (addr - region.info.base) as usize))
    }

    /// Check that `[addr, addr + len)` is writable without touching it
    pub fn probe_write(&self, addr: Address, len: u64) -> MemoryResult<()> {
        let regions = self.regions.read();
        Self::locate(&regions, addr, len, Protection::WRITE).map(|_| ())
    }

    /// Check that `[addr, addr + len)` is readable
    pub fn probe_read(&self, addr: Address, len: u64) -> MemoryResult<()> {
        let regions = self.regions.read();
        Self::locate(&regions, addr, len, Protection::READ).map(|_| ())
    }

    pub fn write_bytes(&self, addr: Address, data: &[u8]) -> MemoryResult<()> {
        let mut regions = self.regions.write();
        let (base, offset) = Self::locate(&regions, addr, data.len() as u64, Protection::WRITE)?;
        if let Some(region) = regions.get_mut(&base) {
            region.data[offset..offset + data.len()].copy_from_slice(data);
        }
        trace!("Wrote {} bytes at 0x{:x}", data.len(), addr);
        Ok(())
    }

    pub fn read_bytes(&self, addr: Address, len: usize) -> MemoryResult<Vec<u8>> {
        let regions = self.regions.read();
        let (base, offset) = Self::locate(&regions, addr, len as u64, Protection::READ)?;
        let data = regions
            .get(&base)
            .map(|r| r.data[offset..offset + len].to_vec())
            .ok_or(MemoryFault::Unmapped(addr))?;
        trace!("Read {} bytes at 0x{:x}", len, addr);
        Ok(data)
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap
    pub fn copy_within(&self, src: Address, dst: Address, len: usize) -> MemoryResult<()> {
        let bytes = self.read_bytes(src, len)?;
        self.write_bytes(dst, &bytes)
    }

    pub fn read_pod<T: Pod>(&self, addr: Address) -> MemoryResult<T> {
        let bytes = self.read_bytes(addr, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    pub fn write_pod<T: Pod>(&self, addr: Address, value: &T) -> MemoryResult<()> {
        self.write_bytes(addr, bytemuck::bytes_of(value))
    }

    pub fn read_u64(&self, addr: Address) -> MemoryResult<u64> {
        self.read_pod(addr)
    }

    pub fn write_u64(&self, addr: Address, value: u64) -> MemoryResult<()> {
        self.write_pod(addr, &value)
    }

    pub fn read_u32(&self, addr: Address) -> MemoryResult<u32> {
        self.read_pod(addr)
    }

    pub fn write_u32(&self, addr: Address, value: u32) -> MemoryResult<()> {
        self.write_pod(addr, &value)
    }
}
