/*!
 * Kernel Interface Types
 * Thread-state flavors, exception notifications and message-trap arguments
 */

use crate::arch::{reg, FloatState, ThreadState, MACH_MSG_TRAP};
use crate::core::types::{Address, PortName, ThreadId};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Register-state flavor selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateFlavor {
    General,
    Float,
}

/// Fixed-size register block of one flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBlock {
    General(ThreadState),
    Float(FloatState),
}

impl StateBlock {
    pub fn flavor(&self) -> StateFlavor {
        match self {
            StateBlock::General(_) => StateFlavor::General,
            StateBlock::Float(_) => StateFlavor::Float,
        }
    }
}

/// Exception notification sent by the kernel on a thread fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionMessage {
    pub thread: ThreadId,
    pub exception: i32,
    pub code: i64,
    pub subcode: u64,
}

bitflags! {
    /// Message trap option bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MsgOption: u64 {
        const SEND_MSG = 0x0000_0001;
        const RCV_MSG = 0x0000_0002;
        const SEND_TIMEOUT = 0x0000_0010;
        const SEND_INTERRUPT = 0x0000_0040;
        const RCV_TIMEOUT = 0x0000_0100;
        const RCV_INTERRUPT = 0x0000_0400;
    }
}

/// Raw status returned by the message trap
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgReturn(pub u32);

impl MsgReturn {
    pub const SUCCESS: MsgReturn = MsgReturn(0);
    pub const SEND_INTERRUPTED: MsgReturn = MsgReturn(0x1000_0007);
    pub const RCV_TIMED_OUT: MsgReturn = MsgReturn(0x1000_4003);
    pub const RCV_INTERRUPTED: MsgReturn = MsgReturn(0x1000_4005);
    /// EINTR, returned when a cancellable call was cancelled before entering the kernel
    pub const INTERRUPTED: MsgReturn = MsgReturn(0x4000_0004);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// True for every status a caller must treat as a retryable interruption
    pub fn is_interrupted(self) -> bool {
        matches!(
            self,
            Self::INTERRUPTED | Self::SEND_INTERRUPTED | Self::RCV_INTERRUPTED
        )
    }

    pub fn from_register(value: u64) -> Self {
        MsgReturn(value as u32)
    }
}

impl fmt::Debug for MsgReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "MACH_MSG_SUCCESS"),
            Self::SEND_INTERRUPTED => write!(f, "MACH_SEND_INTERRUPTED"),
            Self::RCV_TIMED_OUT => write!(f, "MACH_RCV_TIMED_OUT"),
            Self::RCV_INTERRUPTED => write!(f, "MACH_RCV_INTERRUPTED"),
            Self::INTERRUPTED => write!(f, "EINTR"),
            MsgReturn(raw) => write!(f, "MsgReturn(0x{raw:x})"),
        }
    }
}

/// Message header at the start of every message buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MsgHeader {
    pub bits: u32,
    pub size: u32,
    pub remote_port: PortName,
    pub local_port: PortName,
    pub seqno: u32,
    pub id: i32,
}

/// Arguments of one message trap, in register order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapArgs {
    pub msg: Address,
    pub option: MsgOption,
    pub send_size: u32,
    pub rcv_size: u32,
    pub rcv_name: PortName,
    pub timeout: u64,
    pub notify: PortName,
}

impl TrapArgs {
    /// Read the arguments of a trap from a register file, message pointer taken from `msg_reg`
    pub fn from_state(state: &ThreadState, msg_reg: usize) -> Self {
        Self {
            msg: state.x[msg_reg],
            option: MsgOption::from_bits_retain(state.x[reg::OPTION]),
            send_size: state.x[reg::SEND_SIZE] as u32,
            rcv_size: state.x[reg::RCV_SIZE] as u32,
            rcv_name: state.x[reg::RCV_NAME] as PortName,
            timeout: state.x[reg::TIMEOUT],
            notify: state.x[reg::NOTIFY] as PortName,
        }
    }

    /// Place the arguments in a register file as a thread entering the trap would hold them
    pub fn load_into(&self, state: &mut ThreadState) {
        state.x[reg::RETVAL] = self.msg;
        state.x[reg::MSG_BACKUP] = self.msg;
        state.x[reg::OPTION] = self.option.bits();
        state.x[reg::SEND_SIZE] = u64::from(self.send_size);
        state.x[reg::RCV_SIZE] = u64::from(self.rcv_size);
        state.x[reg::RCV_NAME] = u64::from(self.rcv_name);
        state.x[reg::TIMEOUT] = self.timeout;
        state.x[reg::NOTIFY] = u64::from(self.notify);
        state.x[reg::SYSCALL] = MACH_MSG_TRAP as u64;
    }
}
