/*!
 * Architecture Support
 * Register-block declarations consumed by the signal pipeline
 */

pub mod aarch64;

pub use aarch64::{
    exc, longjmp_thread_state, reg, FloatState, JmpBuf, ThreadState, INSN_SIZE, MACH_MSG_TRAP,
    STACK_ALIGNMENT, SVC_INSN,
};
