/*!
 * Sigreturn
 * Consumes a saved signal context and resumes the code it describes
 */

use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{align_down, port_valid, Address, PORT_DEAD};
use crate::core::DeliveryConfig;
use crate::kernel::{switch_context, Microkernel, Resumed};
use crate::memory::AddressSpace;
use crate::signals::core::{PostOutcome, SigPost, SigSet, SsFlags};
use crate::signals::frame::layout::link_addr;
use crate::signals::frame::SigContext;
use crate::signals::state::{SigState, SigStateInner, UnwindHandle};
use std::mem::size_of;
use tracing::{debug, info_span, trace, warn};

/// Where phase 2 left things
enum Reconciled {
    /// Another handler frame now owns the thread
    Diverted(Resumed),
    /// Proceed to the physical restore
    Proceed,
}

pub struct Restorer<'a, K: Microkernel + ?Sized, P: SigPost + ?Sized> {
    kernel: &'a K,
    memory: &'a AddressSpace,
    poster: &'a P,
    config: &'a DeliveryConfig,
}

impl<'a, K: Microkernel + ?Sized, P: SigPost + ?Sized> Restorer<'a, K, P> {
    pub fn new(
        kernel: &'a K,
        memory: &'a AddressSpace,
        poster: &'a P,
        config: &'a DeliveryConfig,
    ) -> Self {
        Self {
            kernel,
            memory,
            poster,
            config,
        }
    }

    /// Resume the code described by the context at `scp`.
    ///
    /// Called by the thread itself. Fails only before anything is changed
    /// (`InvalidArgument`); otherwise control goes either to a newly pending
    /// handler or back to the interrupted code.
    pub fn sigreturn(&self, ss: &SigState, scp: Address) -> SignalResult<Resumed> {
        let thread = ss.thread();
        let span = info_span!("sigreturn", %thread, scp);
        let _guard = span.enter();

        let ctx = self.validate_and_unlink(ss, scp)?;

        match self.reconcile(ss, scp, &ctx)? {
            Reconciled::Diverted(resumed) => {
                debug!(pc = resumed.pc, "pending signal took over");
                Ok(resumed)
            }
            Reconciled::Proceed => self.physical_restore(ss, scp, &ctx),
        }
    }

    /// Phase 1: reject bad contexts and drop the frame's unwind entry
    fn validate_and_unlink(&self, ss: &SigState, scp: Address) -> SignalResult<SigContext> {
        if scp == 0 {
            return Err(SignalError::invalid_argument("null signal context"));
        }
        let ctx: SigContext = self
            .memory
            .read_pod(scp)
            .map_err(|fault| SignalError::invalid_argument(format!("context unreadable: {fault}")))?;
        if SigSet(ctx.mask).intersects(SigSet::CANT_MASK) {
            return Err(SignalError::invalid_argument(
                "context masks a signal that cannot be blocked",
            ));
        }

        let raw = self.memory.read_u64(link_addr(scp)).unwrap_or(0);
        let mut inner = ss.lock();
        match UnwindHandle::from_raw(raw).and_then(|handle| inner.resources.unlink(handle)) {
            Some(_) => trace!(depth = inner.nesting_depth(), "unwind entry unlinked"),
            None => warn!(raw, "no unwind entry for context"),
        }
        Ok(ctx)
    }

    /// Phase 2: restore mask and port bookkeeping, then run anything newly unblocked
    fn reconcile(&self, ss: &SigState, scp: Address, ctx: &SigContext) -> SignalResult<Reconciled> {
        let mut inner = ss.lock();
        inner.blocked = SigSet(ctx.mask);
        ss.set_intr_port(ctx.intr_port);

        let handler_port = ss.swap_reply_port(PORT_DEAD);
        if port_valid(handler_port) {
            if let Err(e) = self.kernel.port_release_receive(handler_port) {
                warn!(port = handler_port, error = %e, "handler reply port release failed");
            }
        }
        ss.set_reply_port(ctx.reply_port);

        if inner.deliverable().is_empty() {
            return Ok(Reconciled::Proceed);
        }

        inner.context = Some(scp);
        drop(inner);

        let outcome = self.poster.sig_post(ss.thread());

        let mut inner = ss.lock();
        match outcome {
            Ok(PostOutcome::HandlerInstalled(resumed)) => {
                inner.context = None;
                Ok(Reconciled::Diverted(resumed))
            }
            Ok(PostOutcome::NoHandler) => {
                inner.context = None;
                Ok(Reconciled::Proceed)
            }
            Err(e) => {
                inner.context = None;
                warn!(error = %e, "sig_post failed; restoring anyway");
                Ok(Reconciled::Proceed)
            }
        }
    }

    /// Phase 3: leave the alternate stack and load the saved registers
    fn physical_restore(
        &self,
        ss: &SigState,
        scp: Address,
        ctx: &SigContext,
    ) -> SignalResult<Resumed> {
        if ctx.is_onstack() {
            let usp = align_down(
                ctx.basic.sp.saturating_sub(size_of::<SigContext>() as u64),
                self.config.frame_alignment(),
            );
            self.memory.copy_within(scp, usp, size_of::<SigContext>())?;
            leave_altstack(&mut ss.lock());
            trace!(usp, "context copied off the alternate stack");
        }

        let resumed = switch_context(self.kernel, ss.thread(), &ctx.fpu, &ctx.basic)?;
        debug!(pc = resumed.pc, sp = resumed.sp, "context restored");
        Ok(resumed)
    }
}

pub(crate) fn leave_altstack(inner: &mut SigStateInner) {
    inner.altstack.flags.remove(SsFlags::ONSTACK);
}
