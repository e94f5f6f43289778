/*!
 * AArch64 Register Layout
 * Thread-state blocks as the kernel hands them out, plus ABI slot assignments
 */

use bytemuck::{Pod, Zeroable};

/// Stack pointer alignment required at call boundaries
pub const STACK_ALIGNMENT: u64 = 16;

/// Instruction width
pub const INSN_SIZE: u64 = 4;

/// Encoding of `svc #0`
pub const SVC_INSN: u32 = 0xd400_0001;

/// Trap number of the message primitive (held in x8)
pub const MACH_MSG_TRAP: i64 = -25;

/// Register slots used by the trap and trampoline conventions
pub mod reg {
    /// Return value / message pointer on trap entry
    pub const RETVAL: usize = 0;
    pub const OPTION: usize = 1;
    pub const SEND_SIZE: usize = 2;
    pub const RCV_SIZE: usize = 3;
    pub const RCV_NAME: usize = 4;
    pub const TIMEOUT: usize = 5;
    pub const NOTIFY: usize = 6;
    /// Trap number
    pub const SYSCALL: usize = 8;
    /// Copy of the message buffer pointer kept across the trap
    pub const MSG_BACKUP: usize = 9;
    /// Handler address handed to the trampoline
    pub const HANDLER: usize = 20;
    /// Address of the saved x0 slot the retry trampoline updates
    pub const RESULT_SLOT: usize = 21;
    /// Frame pointer
    pub const FP: usize = 29;
    /// Link register
    pub const LR: usize = 30;
}

/// General register file (`AARCH64_THREAD_STATE`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ThreadState {
    pub x: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub tpidr_el0: u64,
    pub cpsr: u64,
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Floating point / SIMD register file (`AARCH64_FLOAT_STATE`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FloatState {
    pub v: [u128; 32],
    pub fpsr: u64,
    pub fpcr: u64,
}

impl Default for FloatState {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Saved environment of a `setjmp`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JmpBuf {
    /// x19 through x29
    pub callee_saved: [u64; 11],
    pub lr: u64,
    pub sp: u64,
}

/// Set up `state` to do the equivalent of `longjmp(env, val)`.
///
/// SIMD callee-saved registers are not part of the jump buffer and are left alone.
pub fn longjmp_thread_state(state: &mut ThreadState, env: &JmpBuf, val: i32) {
    state.x[19..=29].copy_from_slice(&env.callee_saved);
    state.pc = env.lr;
    state.sp = env.sp;
    state.x[reg::RETVAL] = if val == 0 { 1 } else { val as i64 as u64 };
}

/// Kernel exception classes and machine-specific codes
pub mod exc {
    pub const EXC_BAD_ACCESS: i32 = 1;
    pub const EXC_BAD_INSTRUCTION: i32 = 2;
    pub const EXC_ARITHMETIC: i32 = 3;
    pub const EXC_EMULATION: i32 = 4;
    pub const EXC_SOFTWARE: i32 = 5;
    pub const EXC_BREAKPOINT: i32 = 6;

    // Bad access codes
    pub const KERN_INVALID_ADDRESS: i64 = 1;
    pub const KERN_PROTECTION_FAILURE: i64 = 2;
    pub const KERN_MEMORY_FAILURE: i64 = 9;
    pub const KERN_WRITE_PROTECTION_FAILURE: i64 = 26;
    pub const EXC_AARCH64_MTE: i64 = 0x101;
    pub const EXC_AARCH64_BTI: i64 = 0x102;
    pub const EXC_AARCH64_AL: i64 = 0x103;
    pub const EXC_AARCH64_AL_PC: i64 = 0x104;
    pub const EXC_AARCH64_AL_SP: i64 = 0x105;

    // Bad instruction codes
    pub const EXC_AARCH64_SVC: i64 = 1;

    // Arithmetic codes (one per FPSR cumulative exception bit)
    pub const EXC_AARCH64_IOF: i64 = 1;
    pub const EXC_AARCH64_DZF: i64 = 2;
    pub const EXC_AARCH64_OFF: i64 = 3;
    pub const EXC_AARCH64_UFF: i64 = 4;
    pub const EXC_AARCH64_IXF: i64 = 5;
    pub const EXC_AARCH64_IDF: i64 = 8;
}
