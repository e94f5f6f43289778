/*!
 * Kernel Traits
 * Collaborator interfaces the signal pipeline consumes
 */

use super::types::{MsgReturn, StateBlock, StateFlavor, TrapArgs};
use crate::core::errors::KernResult;
use crate::core::types::{PortName, ThreadId};
use crate::signals::Signal;

/// Thread register-state get/set
pub trait ThreadStateAccess: Send + Sync {
    /// Fetch a register block of a suspended thread
    fn thread_get_state(&self, thread: ThreadId, flavor: StateFlavor) -> KernResult<StateBlock>;

    /// Replace a register block of a suspended thread
    fn thread_set_state(&self, thread: ThreadId, state: &StateBlock) -> KernResult<()>;

    /// Fetch the calling thread's own register block
    fn thread_get_self_state(&self, thread: ThreadId, flavor: StateFlavor)
        -> KernResult<StateBlock>;

    /// Load a register block into the calling thread.
    ///
    /// Loading the general flavor transfers control: execution continues at the
    /// loaded program counter and never comes back to the caller.
    fn thread_set_self_state(&self, thread: ThreadId, state: &StateBlock) -> KernResult<()>;
}

/// Thread run-state control
pub trait ThreadControl: Send + Sync {
    fn thread_suspend(&self, thread: ThreadId) -> KernResult<()>;

    fn thread_resume(&self, thread: ThreadId) -> KernResult<()>;

    /// Abort a kernel call the suspended thread is blocked in
    fn thread_abort(&self, thread: ThreadId) -> KernResult<()>;

    /// Forcibly end the thread with `signal` as its fatal signal
    fn thread_terminate(&self, thread: ThreadId, signal: Signal) -> KernResult<()>;
}

/// Blocking send/receive primitive
pub trait MessageTrap: Send + Sync {
    /// Issue the trap on behalf of `thread` and return its raw status
    fn mach_msg(&self, thread: ThreadId, args: &TrapArgs) -> MsgReturn;

    /// Observation point between argument setup and kernel entry
    fn setup_done(&self, _thread: ThreadId, _args: &TrapArgs) {}
}

/// Receive-right management for reply ports
pub trait PortRights: Send + Sync {
    /// Allocate a fresh reply port with a receive right
    fn reply_port_allocate(&self) -> PortName;

    /// Drop one receive right on `name`
    fn port_release_receive(&self, name: PortName) -> KernResult<()>;
}

/// Combined kernel trait
pub trait Microkernel: ThreadStateAccess + ThreadControl + MessageTrap + PortRights {}

/// Implement Microkernel for types that implement all required traits
impl<T> Microkernel for T where T: ThreadStateAccess + ThreadControl + MessageTrap + PortRights {}
