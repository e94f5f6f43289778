/*!
 * Trampoline Dispatcher
 * Resumption stub between kernel-driven thread resumption, the handler and sigreturn
 *
 * Trampoline entries are symbolic addresses. `step` executes whatever the
 * thread's program counter designates: one of the two trampoline entries, a
 * registered handler, or the return stub that calls sigreturn. Any other PC
 * is ordinary user code and ends the dispatch.
 */

use super::callbacks::{HandlerCall, HandlerExit, HandlerRegistry};
use crate::arch::{reg, ThreadState};
use crate::core::config::DeliveryConfig;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{Address, ThreadId};
use crate::kernel::{MessageTrap, Microkernel, MsgReturn, StateBlock, StateFlavor, TrapArgs};
use crate::memory::AddressSpace;
use crate::monitoring::DeliveryStats;
use crate::signals::core::SigPost;
use crate::signals::restore::{longjmp_from_handler, Restorer};
use crate::signals::state::{SigState, SignalStateRegistry};
use tracing::{debug, error, trace};

/// Retry entry: finish the interrupted receive, then fall into `TRAMPOLINE`
pub const RPC_WAIT_TRAMPOLINE: Address = 0xffff_0000_0000_1000;

/// Direct entry: pop the handler arguments and call the handler
pub const TRAMPOLINE: Address = 0xffff_0000_0000_1100;

/// Where handlers return to; calls sigreturn with the context on top of the stack
pub const TRAMPOLINE_RETURN: Address = 0xffff_0000_0000_1200;

/// Result of one dispatch step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The thread is still inside signal machinery
    Continue,
    /// The thread reached ordinary code with these registers
    Exited(ThreadState),
}

pub struct Dispatcher<'a, K: Microkernel, P: SigPost + ?Sized> {
    kernel: &'a K,
    memory: &'a AddressSpace,
    handlers: &'a HandlerRegistry,
    states: &'a SignalStateRegistry,
    poster: &'a P,
    config: &'a DeliveryConfig,
    stats: &'a DeliveryStats,
}

impl<'a, K: Microkernel, P: SigPost + ?Sized> Dispatcher<'a, K, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel: &'a K,
        memory: &'a AddressSpace,
        handlers: &'a HandlerRegistry,
        states: &'a SignalStateRegistry,
        poster: &'a P,
        config: &'a DeliveryConfig,
        stats: &'a DeliveryStats,
    ) -> Self {
        Self {
            kernel,
            memory,
            handlers,
            states,
            poster,
            config,
            stats,
        }
    }

    /// Step until the thread is back in ordinary code
    pub fn run(&self, thread: ThreadId) -> SignalResult<ThreadState> {
        loop {
            if let Step::Exited(state) = self.step(thread)? {
                return Ok(state);
            }
        }
    }

    pub fn step(&self, thread: ThreadId) -> SignalResult<Step> {
        let ss = self.states.get(thread)?;
        let mut regs = self.regs(thread)?;

        match regs.pc {
            RPC_WAIT_TRAMPOLINE => {
                self.retry_receive(&ss, &mut regs)?;
                self.set_regs(thread, regs)?;
            }
            TRAMPOLINE => {
                self.pop_arguments(&mut regs)?;
                self.set_regs(thread, regs)?;
            }
            TRAMPOLINE_RETURN => {
                let scp = regs.sp;
                trace!(%thread, scp, "handler returned");
                let restorer = Restorer::new(self.kernel, self.memory, self.poster, self.config);
                self.stats.inc_sigreturns();
                let resumed = restorer.sigreturn(&ss, scp).map_err(|e| {
                    error!(%thread, error = %e, "sigreturn failed");
                    SignalError::SigreturnFailed {
                        thread,
                        reason: e.to_string(),
                    }
                })?;
                trace!(%thread, pc = resumed.pc, "sigreturn resumed");
            }
            pc if self.handlers.exists(pc) => {
                self.call_handler(&ss, regs)?;
            }
            _ => return Ok(Step::Exited(regs)),
        }
        Ok(Step::Continue)
    }

    /// `mov x0, x9; svc; str x0, [x21]`
    ///
    /// A bare trap: pending cancellation is left for the thread's next
    /// interruptible call.
    fn retry_receive(&self, ss: &SigState, regs: &mut ThreadState) -> SignalResult<()> {
        regs.x[reg::RETVAL] = regs.x[reg::MSG_BACKUP];
        let args = TrapArgs::from_state(regs, reg::RETVAL);
        let status = self.kernel.mach_msg(ss.thread(), &args);
        self.stats.inc_rpc_retries();

        let slot = regs.x[reg::RESULT_SLOT];
        self.memory.write_u64(slot, u64::from(status.0))?;
        regs.x[reg::RETVAL] = u64::from(status.0);
        regs.pc = TRAMPOLINE;

        debug!(thread = %ss.thread(), ?status, slot, "interrupted receive reissued");
        if status == MsgReturn::RCV_TIMED_OUT {
            debug!(thread = %ss.thread(), "reply did not arrive within the retry timeout");
        }
        Ok(())
    }

    /// `ldp x0, x1, [sp], #16; ldr x2, [sp], #16; blr x20`
    fn pop_arguments(&self, regs: &mut ThreadState) -> SignalResult<()> {
        let sp = regs.sp;
        regs.x[0] = self.memory.read_u64(sp)?;
        regs.x[1] = self.memory.read_u64(sp + 8)?;
        regs.x[2] = self.memory.read_u64(sp + 16)?;
        regs.sp = sp + 32;
        regs.x[reg::LR] = TRAMPOLINE_RETURN;
        regs.pc = regs.x[reg::HANDLER];
        Ok(())
    }

    fn call_handler(&self, ss: &SigState, mut regs: ThreadState) -> SignalResult<()> {
        let thread = ss.thread();
        let handler = self.handlers.lookup(regs.pc)?;

        // Already returned as far as the registers go; the body may redirect the thread.
        regs.pc = regs.x[reg::LR];
        self.set_regs(thread, regs)?;

        let call = HandlerCall {
            thread,
            args: [regs.x[0], regs.x[1], regs.x[2]],
            sp: regs.sp,
            memory: self.memory,
            state: ss,
            ports: self.kernel,
        };
        match handler(&call) {
            HandlerExit::Return => Ok(()),
            HandlerExit::LongJmp(env, val) => {
                let resumed = longjmp_from_handler(ss, self.memory, self.kernel, &env, val)?;
                debug!(%thread, pc = resumed.pc, "handler left through longjmp");
                Ok(())
            }
        }
    }

    fn regs(&self, thread: ThreadId) -> SignalResult<ThreadState> {
        match self
            .kernel
            .thread_get_self_state(thread, StateFlavor::General)?
        {
            StateBlock::General(state) => Ok(state),
            StateBlock::Float(_) => Err(SignalError::invalid_argument(
                "general state flavor mismatch",
            )),
        }
    }

    fn set_regs(&self, thread: ThreadId, regs: ThreadState) -> SignalResult<()> {
        Ok(self
            .kernel
            .thread_set_self_state(thread, &StateBlock::General(regs))?)
    }
}
