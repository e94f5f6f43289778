/*!
 * Core Types
 * Common identifiers and sentinels shared by the signal pipeline
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kernel thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Kernel port name (reply ports, interrupt ports, message destinations)
pub type PortName = u32;

/// The null port name
pub const PORT_NULL: PortName = 0;

/// The dead-name sentinel; installed while a reply port is being torn down
pub const PORT_DEAD: PortName = u32::MAX;

/// True for names that denote a live port
#[inline]
pub const fn port_valid(name: PortName) -> bool {
    name != PORT_NULL && name != PORT_DEAD
}

/// Virtual address in the simulated user address space
pub type Address = u64;

/// Align `addr` down to a power-of-two `align`
#[inline]
pub const fn align_down(addr: Address, align: u64) -> Address {
    addr & !(align - 1)
}
