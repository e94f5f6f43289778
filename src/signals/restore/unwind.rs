/*!
 * Non-Local Exit
 * longjmp out of a signal handler, finalizing every frame it jumps past
 */

use super::sigreturn::leave_altstack;
use crate::arch::{longjmp_thread_state, JmpBuf};
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{port_valid, Address, PORT_DEAD};
use crate::kernel::{switch_context, Microkernel, Resumed, StateBlock, StateFlavor};
use crate::memory::AddressSpace;
use crate::signals::core::SigSet;
use crate::signals::frame::SigContext;
use crate::signals::state::{CleanupContext, SigState, SigStateInner};
use tracing::{debug, warn};

/// Cleanup registered for every signal frame: what sigreturn would have done for `scp`
pub fn finalize_frame(
    cx: &CleanupContext<'_>,
    inner: &mut SigStateInner,
    scp: Address,
) -> SignalResult<()> {
    let ctx: SigContext = cx
        .memory
        .read_pod(scp)
        .map_err(|fault| SignalError::invalid_argument(format!("context unreadable: {fault}")))?;

    inner.blocked = SigSet(ctx.mask).difference(SigSet::CANT_MASK);
    cx.state.set_intr_port(ctx.intr_port);
    if ctx.is_onstack() {
        leave_altstack(inner);
    }

    let handler_port = cx.state.swap_reply_port(PORT_DEAD);
    if port_valid(handler_port) {
        if let Err(e) = cx.ports.port_release_receive(handler_port) {
            warn!(port = handler_port, error = %e, "handler reply port release failed");
        }
    }
    cx.state.set_reply_port(ctx.reply_port);
    Ok(())
}

/// Jump to `env` from inside a handler.
///
/// Every unwind entry whose frame lies below the target stack pointer is
/// unlinked and its cleanup run, newest first, before the jump.
pub fn longjmp_from_handler<K>(
    ss: &SigState,
    memory: &AddressSpace,
    kernel: &K,
    env: &JmpBuf,
    val: i32,
) -> SignalResult<Resumed>
where
    K: Microkernel,
{
    let thread = ss.thread();
    {
        let mut inner = ss.lock();
        let passed: Vec<_> = inner
            .resources
            .iter()
            .filter(|(_, entry)| entry.frame < env.sp)
            .map(|(handle, _)| handle)
            .collect();

        let cx = CleanupContext {
            state: ss,
            memory,
            ports: kernel,
        };
        for handle in passed {
            if let Some(entry) = inner.resources.unlink(handle) {
                (entry.cleanup)(&cx, &mut inner, entry.data)?;
            }
        }
        debug!(%thread, depth = inner.nesting_depth(), "unwound signal frames");
    }

    let mut basic = match kernel.thread_get_self_state(thread, StateFlavor::General)? {
        StateBlock::General(state) => state,
        StateBlock::Float(_) => {
            return Err(SignalError::invalid_argument("general state flavor mismatch"))
        }
    };
    let fpu = match kernel.thread_get_self_state(thread, StateFlavor::Float)? {
        StateBlock::Float(fpu) => fpu,
        StateBlock::General(_) => {
            return Err(SignalError::invalid_argument("float state flavor mismatch"))
        }
    };

    longjmp_thread_state(&mut basic, env, val);
    Ok(switch_context(kernel, thread, &fpu, &basic)?)
}
