/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{Address, ThreadId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fault raised by the simulated address space
#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "fault", content = "address", rename_all = "snake_case")]
pub enum MemoryFault {
    #[error("Unmapped address 0x{0:x}")]
    #[diagnostic(
        code(memory::unmapped),
        help("No region covers this address. Map the stack or buffer first.")
    )]
    Unmapped(Address),

    #[error("Protection violation at 0x{0:x}")]
    #[diagnostic(
        code(memory::protection),
        help("The region does not allow this access.")
    )]
    Protection(Address),
}

impl MemoryFault {
    /// Address that faulted
    pub fn address(&self) -> Address {
        match self {
            MemoryFault::Unmapped(addr) | MemoryFault::Protection(addr) => *addr,
        }
    }
}

/// Kernel interface errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum KernError {
    #[error("No such thread: {0}")]
    #[diagnostic(code(kernel::no_such_thread))]
    NoSuchThread(ThreadId),

    #[error("Thread {0} is not suspended")]
    #[diagnostic(
        code(kernel::not_suspended),
        help("Register state of another thread may only be touched while it is suspended.")
    )]
    NotSuspended(ThreadId),

    #[error("Thread {0} has terminated")]
    #[diagnostic(code(kernel::terminated))]
    Terminated(ThreadId),

    #[error("Invalid port name {0}")]
    #[diagnostic(code(kernel::invalid_port))]
    InvalidPort(u32),
}

/// Kernel interface result
pub type KernResult<T> = Result<T, KernError>;

/// Signal pipeline errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum SignalError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(signal::invalid_argument),
        help("The signal context is null, unreadable or tries to mask an unmaskable signal.")
    )]
    InvalidArgument(String),

    #[error("Fault while writing signal frame at 0x{address:x}")]
    #[diagnostic(
        code(signal::frame_fault),
        help("The target stack is unusable; the thread is terminated with SIGILL.")
    )]
    FrameFault { address: Address },

    #[error("Register state access failed: {0}")]
    #[diagnostic(
        code(signal::register_state),
        help("The protocol assumes this primitive succeeds for a suspended thread.")
    )]
    RegisterState(#[from] KernError),

    #[error("Memory fault: {0}")]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryFault),

    #[error("Unknown thread: {0}")]
    #[diagnostic(code(signal::unknown_thread))]
    UnknownThread(ThreadId),

    #[error("Invalid signal: {0}")]
    #[diagnostic(code(signal::invalid_signal))]
    InvalidSignal(u32),

    #[error("No handler registered at 0x{0:x}")]
    #[diagnostic(code(signal::handler_not_found))]
    HandlerNotFound(Address),

    #[error("Signal state for {0} already initialized")]
    #[diagnostic(code(signal::already_initialized))]
    AlreadyInitialized(ThreadId),

    #[error("Sigreturn failed on {thread}: {reason}")]
    #[diagnostic(
        code(signal::sigreturn_failed),
        help("The trampoline has nowhere to return to; the thread is lost.")
    )]
    SigreturnFailed { thread: ThreadId, reason: String },
}

/// Signal pipeline result
pub type SignalResult<T> = Result<T, SignalError>;

impl SignalError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        SignalError::InvalidArgument(msg.into())
    }

    /// Errors after which the affected thread cannot be resumed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SignalError::FrameFault { .. }
                | SignalError::RegisterState(_)
                | SignalError::SigreturnFailed { .. }
        )
    }
}
