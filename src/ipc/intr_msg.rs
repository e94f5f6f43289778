/*!
 * Interruptible Message Call
 * A blocking send/receive that the signal actor can cancel before kernel entry,
 * plus introspection of a thread caught inside the trap
 */

use crate::arch::{reg, ThreadState, INSN_SIZE, MACH_MSG_TRAP, SVC_INSN};
use crate::core::types::{Address, PortName, PORT_NULL};
use crate::kernel::{MessageTrap, MsgHeader, MsgOption, MsgReturn, TrapArgs};
use crate::memory::{AddressSpace, MemoryResult};
use crate::signals::state::SigState;
use serde::{Deserialize, Serialize};
use std::mem::{offset_of, size_of};
use tracing::{debug, trace};

/// Cancellable wrapper around the message trap for one thread
pub struct InterruptibleCall<'a, T: MessageTrap + ?Sized> {
    trap: &'a T,
    state: &'a SigState,
}

impl<'a, T: MessageTrap + ?Sized> InterruptibleCall<'a, T> {
    pub fn new(trap: &'a T, state: &'a SigState) -> Self {
        Self { trap, state }
    }

    /// Issue the trap unless cancellation is seen at either checkpoint.
    ///
    /// The flag is read once before the arguments are prepared and again right
    /// before kernel entry. A cancelled call never reaches the kernel; it
    /// consumes the request, clears the interrupt port and reports
    /// `MsgReturn::INTERRUPTED`.
    pub fn call(&self, args: &TrapArgs) -> MsgReturn {
        let thread = self.state.thread();

        if self.state.cancel_requested() {
            return self.cancelled("before setup");
        }

        let prepared = *args;
        self.trap.setup_done(thread, &prepared);

        if self.state.cancel_requested() {
            return self.cancelled("after setup");
        }

        let status = self.trap.mach_msg(thread, &prepared);
        trace!(%thread, ?status, "message trap returned");
        status
    }

    /// Perform an RPC to `port`, publishing it as the thread's interrupt port for the duration
    pub fn call_on(&self, port: PortName, args: &TrapArgs) -> MsgReturn {
        self.state.set_intr_port(port);
        let status = self.call(args);
        self.state.clear_intr_port();
        status
    }

    fn cancelled(&self, at: &'static str) -> MsgReturn {
        debug!(thread = %self.state.thread(), at, "interruptible call cancelled");
        self.state.take_cancel();
        self.state.clear_intr_port();
        MsgReturn::INTERRUPTED
    }
}

/// Trap number of the system call the thread just issued, if its PC follows an SVC
pub fn syscall_examine(state: &ThreadState, memory: &AddressSpace) -> Option<i64> {
    let insn_addr = state.pc.checked_sub(INSN_SIZE)?;
    match memory.read_u32(insn_addr) {
        Ok(insn) if insn == SVC_INSN => Some(state.x[reg::SYSCALL] as i64),
        _ => None,
    }
}

/// True when the thread is inside the message trap
pub fn in_msg_trap(state: &ThreadState, memory: &AddressSpace) -> bool {
    syscall_examine(state, memory) == Some(MACH_MSG_TRAP)
}

/// Arguments of an in-progress message trap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgExamination {
    pub msg: Address,
    pub msg_id: i32,
    pub send_name: PortName,
    pub rcv_name: PortName,
    pub option: MsgOption,
    pub timeout: u64,
}

/// Extract the arguments of the trap a thread is blocked in without reissuing it.
///
/// The message pointer comes from the backup register since x0 is clobbered
/// by the return value. A null message reports a null port and id 0.
///
/// Only traps entered through the interruptible-call stub load that register;
/// for a plain `mach_msg` trap the reported `msg`, `msg_id` and `send_name`
/// are meaningless.
pub fn msg_examine(state: &ThreadState, memory: &AddressSpace) -> MemoryResult<MsgExamination> {
    let msg = state.x[reg::MSG_BACKUP];
    let (send_name, msg_id) = if msg == 0 {
        (PORT_NULL, 0)
    } else {
        memory.probe_read(msg, size_of::<MsgHeader>() as u64)?;
        let remote = memory.read_u32(msg + offset_of!(MsgHeader, remote_port) as u64)?;
        let id = memory.read_u32(msg + offset_of!(MsgHeader, id) as u64)? as i32;
        (remote, id)
    };

    Ok(MsgExamination {
        msg,
        msg_id,
        send_name,
        rcv_name: state.x[reg::RCV_NAME] as PortName,
        option: MsgOption::from_bits_retain(state.x[reg::OPTION]),
        timeout: state.x[reg::TIMEOUT],
    })
}
