/*!
 * Signal Frame Layout
 * In-memory records the frame builder writes onto the user stack
 */

use crate::arch::{reg, FloatState, ThreadState};
use crate::core::types::{Address, PortName};
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// Saved execution context handed to handlers and consumed by sigreturn
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SigContext {
    /// Nonzero when the frame was built on the alternate stack
    pub onstack: u32,
    pub _pad0: u32,
    /// Blocked mask to restore
    pub mask: u64,
    pub reply_port: PortName,
    pub intr_port: PortName,
    pub error: i32,
    pub _pad1: u32,
    pub basic: ThreadState,
    pub _pad2: u64,
    pub fpu: FloatState,
}

impl SigContext {
    pub fn is_onstack(&self) -> bool {
        self.onstack != 0
    }

    /// Address of the saved x0 slot inside a context living at `scp`
    pub fn retval_slot(scp: Address) -> Address {
        scp + (offset_of!(SigContext, basic) + reg::RETVAL * size_of::<u64>()) as u64
    }
}

/// Unwind link stored right after the context; sigreturn finds it at `scp + size_of::<SigContext>()`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct UnwindLink {
    /// Raw `UnwindHandle` of the entry in the thread's chain
    pub handle: u64,
    /// Context the cleanup finalizes
    pub data: u64,
    pub frame: u64,
    pub _reserved: u64,
}

/// `ucontext_t` view of a signal context for `SA_SIGINFO` handlers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct UContext {
    pub flags: u64,
    pub link: u64,
    pub ss_sp: u64,
    pub ss_size: u64,
    pub ss_flags: u32,
    pub _pad0: u32,
    pub sigmask: u64,
    pub gregs: ThreadState,
    pub _pad1: u64,
    pub fpregs: FloatState,
}

impl UContext {
    pub fn from_context(ctx: &SigContext) -> Self {
        Self {
            flags: 0,
            link: 0,
            ss_sp: ctx.basic.sp,
            ss_size: 0,
            ss_flags: 0,
            _pad0: 0,
            sigmask: ctx.mask,
            gregs: ctx.basic,
            _pad1: 0,
            fpregs: ctx.fpu,
        }
    }
}

/// `siginfo_t`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SigInfo {
    pub signo: i32,
    pub errno: i32,
    pub code: i32,
    pub _pad0: i32,
    pub pid: i32,
    pub uid: u32,
    pub addr: u64,
    pub status: i32,
    pub _pad1: i32,
    pub band: i64,
    pub value: u64,
    pub _reserved: u64,
}

/// Everything pushed for one signal delivery.
///
/// The trampoline pops `signo, arg1` then `arg2, pad`, which leaves the stack
/// pointer on `ctx`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct StackFrame {
    pub signo: u64,
    /// Signal code, or the siginfo address
    pub arg1: u64,
    /// Context address, or the ucontext address
    pub arg2: u64,
    pub _pad: u64,
    pub ctx: SigContext,
    pub link: UnwindLink,
    pub ucontext: UContext,
    pub siginfo: SigInfo,
}

pub const FRAME_SIZE: u64 = size_of::<StackFrame>() as u64;
pub const CTX_OFFSET: u64 = offset_of!(StackFrame, ctx) as u64;
pub const LINK_OFFSET: u64 = offset_of!(StackFrame, link) as u64;
pub const UCONTEXT_OFFSET: u64 = offset_of!(StackFrame, ucontext) as u64;
pub const SIGINFO_OFFSET: u64 = offset_of!(StackFrame, siginfo) as u64;

/// Link address for a context at `scp`
pub const fn link_addr(scp: Address) -> Address {
    scp + size_of::<SigContext>() as u64
}

const _: () = assert!(CTX_OFFSET == 4 * size_of::<u64>() as u64);
const _: () = assert!(LINK_OFFSET == CTX_OFFSET + size_of::<SigContext>() as u64);
const _: () = assert!(offset_of!(SigContext, basic) % 8 == 0);
const _: () = assert!(offset_of!(SigContext, fpu) % 16 == 0);
const _: () = assert!(FRAME_SIZE % 16 == 0);
