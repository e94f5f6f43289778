/*!
 * Frame Builder
 * Diverts a suspended thread into a signal handler by pushing a frame onto its stack
 */

use super::layout::{
    link_addr, SigContext, SigInfo, StackFrame, UContext, UnwindLink, CTX_OFFSET, FRAME_SIZE,
    SIGINFO_OFFSET, UCONTEXT_OFFSET,
};
use crate::arch::{exc, reg, FloatState, ThreadState};
use crate::core::config::DeliveryConfig;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{align_down, Address, ThreadId};
use crate::kernel::{MsgOption, StateBlock, StateFlavor, ThreadStateAccess};
use crate::memory::AddressSpace;
use crate::signals::core::{CodeStyle, SaFlags, SigAction, Signal, SignalDetail, SsFlags};
use crate::signals::handler::trampoline::{RPC_WAIT_TRAMPOLINE, TRAMPOLINE};
use crate::signals::restore::unwind::finalize_frame;
use crate::signals::state::{SigState, SigStateInner, UnwindEntry};
use tracing::{debug, warn};

/// Register snapshot of the target thread, fetched lazily
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineState {
    pub basic: Option<ThreadState>,
    pub fpu: Option<FloatState>,
}

impl MachineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// General registers, fetched from the suspended thread on first use
    pub fn basic<K>(&mut self, kernel: &K, thread: ThreadId) -> SignalResult<&mut ThreadState>
    where
        K: ThreadStateAccess + ?Sized,
    {
        if self.basic.is_none() {
            match kernel.thread_get_state(thread, StateFlavor::General)? {
                StateBlock::General(state) => self.basic = Some(state),
                StateBlock::Float(_) => {
                    return Err(SignalError::invalid_argument("general state flavor mismatch"))
                }
            }
        }
        self.basic
            .as_mut()
            .ok_or_else(|| SignalError::invalid_argument("general state unavailable"))
    }

    /// Floating point registers, fetched from the suspended thread on first use
    pub fn fpu<K>(&mut self, kernel: &K, thread: ThreadId) -> SignalResult<FloatState>
    where
        K: ThreadStateAccess + ?Sized,
    {
        if let Some(fpu) = self.fpu {
            return Ok(fpu);
        }
        match kernel.thread_get_state(thread, StateFlavor::Float)? {
            StateBlock::Float(fpu) => {
                self.fpu = Some(fpu);
                Ok(fpu)
            }
            StateBlock::General(_) => Err(SignalError::invalid_argument(
                "float state flavor mismatch",
            )),
        }
    }
}

/// What to deliver
#[derive(Debug)]
pub struct FrameRequest<'a> {
    pub action: &'a SigAction,
    pub handler: Address,
    pub signal: Signal,
    pub detail: &'a mut SignalDetail,
    /// The thread was waiting for an RPC reply when it was interrupted
    pub rpc_wait: bool,
}

pub struct FrameBuilder<'a, K: ThreadStateAccess + ?Sized> {
    kernel: &'a K,
    memory: &'a AddressSpace,
    config: &'a DeliveryConfig,
}

impl<'a, K: ThreadStateAccess + ?Sized> FrameBuilder<'a, K> {
    pub fn new(kernel: &'a K, memory: &'a AddressSpace, config: &'a DeliveryConfig) -> Self {
        Self {
            kernel,
            memory,
            config,
        }
    }

    /// Build a handler frame for `ss`'s thread and point `state` at the trampoline.
    ///
    /// The caller holds the signal-state lock (`inner`) and has the thread
    /// suspended. Returns the address of the saved context. On error nothing in
    /// `inner` is left referring to the frame and `state` must not be loaded.
    pub fn setup_sighandler(
        &self,
        ss: &SigState,
        inner: &mut SigStateInner,
        request: FrameRequest<'_>,
        state: &mut MachineState,
    ) -> SignalResult<Address> {
        let thread = ss.thread();

        if let Some(pending_scp) = inner.context {
            // A sigreturn was about to load this context; it is the true machine state.
            match self.memory.read_pod::<SigContext>(pending_scp) {
                Ok(ctx) => {
                    debug!(%thread, scp = pending_scp, "folding in-flight context");
                    state.basic = Some(ctx.basic);
                    state.fpu = Some(ctx.fpu);
                }
                Err(fault) => warn!(%thread, %fault, "in-flight context unreadable"),
            }
        }

        let interrupted_sp = state.basic(self.kernel, thread)?.sp;

        let use_altstack =
            request.action.flags.contains(SaFlags::ONSTACK) && inner.altstack.usable();
        let sigsp = if use_altstack {
            inner.altstack.flags.insert(SsFlags::ONSTACK);
            inner.altstack.top()
        } else {
            interrupted_sp
        };

        let frame = align_down(
            sigsp.saturating_sub(FRAME_SIZE),
            self.config.frame_alignment(),
        );
        let result = self.write_frame(ss, inner, request, state, frame);
        if result.is_err() && use_altstack {
            inner.altstack.flags.remove(SsFlags::ONSTACK);
        }
        result
    }

    fn write_frame(
        &self,
        ss: &SigState,
        inner: &mut SigStateInner,
        request: FrameRequest<'_>,
        state: &mut MachineState,
        frame: Address,
    ) -> SignalResult<Address> {
        let thread = ss.thread();

        self.memory
            .probe_write(frame, FRAME_SIZE)
            .map_err(|fault| SignalError::FrameFault {
                address: fault.address(),
            })?;

        let scp = frame + CTX_OFFSET;
        // Keyed by the link's own address, which sits above the context.
        let handle = inner
            .resources
            .push_front(UnwindEntry::new(finalize_frame, scp, link_addr(scp)));

        let filled = self.fill_frame(ss, inner, &request, state, frame, scp, handle.to_raw());
        let written = filled.and_then(|record| {
            self.memory
                .write_pod(frame, &record)
                .map_err(|fault| SignalError::FrameFault {
                    address: fault.address(),
                })
        });
        if let Err(e) = written {
            inner.resources.unlink(handle);
            return Err(e);
        }

        let basic = state.basic(self.kernel, thread)?;
        basic.sp = frame;

        let option = MsgOption::from_bits_retain(basic.x[reg::OPTION]);
        if request.rpc_wait && option.contains(MsgOption::RCV_MSG) {
            // The request went out already; only the reply is still owed.
            let option = (option - MsgOption::SEND_MSG) | MsgOption::RCV_TIMEOUT;
            basic.x[reg::OPTION] = option.bits();
            basic.x[reg::TIMEOUT] = self.config.rpc_timeout_ms();
            basic.pc = RPC_WAIT_TRAMPOLINE;
            basic.x[reg::RESULT_SLOT] = SigContext::retval_slot(scp);
            debug!(%thread, scp, "retry trampoline selected");
        } else {
            if request.rpc_wait {
                warn!(%thread, ?option, "interrupted call has no receive phase");
            }
            basic.pc = TRAMPOLINE;
        }

        basic.x[reg::HANDLER] = request.handler;
        basic.cpsr = 0;

        debug!(
            %thread,
            signal = %request.signal,
            frame,
            depth = inner.nesting_depth(),
            "signal frame built"
        );
        Ok(scp)
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_frame(
        &self,
        ss: &SigState,
        inner: &SigStateInner,
        request: &FrameRequest<'_>,
        state: &mut MachineState,
        frame: Address,
        scp: Address,
        handle: u64,
    ) -> SignalResult<StackFrame> {
        let thread = ss.thread();
        let basic = *state.basic(self.kernel, thread)?;
        let fpu = state.fpu(self.kernel, thread)?;

        let ctx = SigContext {
            onstack: u32::from(inner.altstack.flags.contains(SsFlags::ONSTACK)),
            _pad0: 0,
            mask: inner.blocked.0,
            reply_port: ss.reply_port(),
            intr_port: ss.intr_port(),
            error: request.detail.error as i32,
            _pad1: 0,
            basic,
            _pad2: 0,
            fpu,
        };

        let mut record = StackFrame {
            signo: u64::from(request.signal.number()),
            arg1: 0,
            arg2: 0,
            _pad: 0,
            ctx,
            link: UnwindLink {
                handle,
                data: scp,
                frame: link_addr(scp),
                _reserved: 0,
            },
            ucontext: UContext::from_context(&ctx),
            siginfo: SigInfo::default(),
        };

        if request.action.flags.contains(SaFlags::SIGINFO) {
            record.arg1 = frame + SIGINFO_OFFSET;
            record.arg2 = frame + UCONTEXT_OFFSET;
            record.siginfo = fill_siginfo(request.signal, request.detail, &basic);
        } else {
            let mut detail = *request.detail;
            if detail.exception.is_some() {
                let legacy = detail.translate(CodeStyle::Legacy);
                debug_assert_eq!(legacy, Some(request.signal));
            } else {
                detail.code = 0;
            }
            record.arg1 = detail.code as u64;
            record.arg2 = scp;
        }

        Ok(record)
    }
}

fn fill_siginfo(signal: Signal, detail: &SignalDetail, basic: &ThreadState) -> SigInfo {
    let addr = match detail.exception {
        Some(exception) if exception.exception == exc::EXC_BAD_ACCESS => exception.subcode,
        _ => basic.pc,
    };
    SigInfo {
        signo: signal.number() as i32,
        errno: detail.error as i32,
        code: detail.code as i32,
        pid: -1,
        uid: u32::MAX,
        addr,
        ..SigInfo::default()
    }
}
