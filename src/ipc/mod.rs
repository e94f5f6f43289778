/*!
 * IPC Module
 * Interruptible RPC calls and trap introspection
 */

pub mod intr_msg;

// Re-export for convenience
pub use intr_msg::{in_msg_trap, msg_examine, syscall_examine, InterruptibleCall, MsgExamination};
