/*!
 * sigdeliver
 * POSIX signal delivery for a message-passing microkernel
 *
 * Kernel exceptions become POSIX signals, handlers run on frames built in
 * user memory, and sigreturn restores the interrupted context. Blocking
 * message calls can be interrupted and cancelled cooperatively.
 */

pub mod arch;
pub mod core;
pub mod ipc;
pub mod kernel;
pub mod memory;
pub mod monitoring;
pub mod signals;

// Re-exports
pub use crate::core::{DeliveryConfig, KernError, MemoryFault, SignalError, SignalResult, ThreadId};
pub use ipc::InterruptibleCall;
pub use kernel::{Microkernel, Resumed, SimKernel};
pub use memory::AddressSpace;
pub use monitoring::{init_tracing, DeliveryStats, DeliveryStatsSnapshot};
pub use signals::{
    exception_to_signal, DeliveryActor, DeliveryOutcome, HandlerExit, Restorer, SigAction,
    SigSet, Signal,
};
