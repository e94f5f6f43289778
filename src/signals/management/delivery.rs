/*!
 * Signal Delivery Actor
 * Turns exceptions and posted signals into handler frames, default actions or termination
 */

use crate::arch::{reg, ThreadState};
use crate::core::config::DeliveryConfig;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{port_valid, Address, ThreadId, PORT_NULL};
use crate::ipc::in_msg_trap;
use crate::kernel::{ExceptionMessage, Microkernel, MsgReturn, Resumed, StateBlock};
use crate::memory::AddressSpace;
use crate::monitoring::{DeliverySpan, DeliveryStats, DeliveryStatsSnapshot};
use crate::signals::core::{
    CodeStyle, DefaultAction, Exception, PostOutcome, SaFlags, SigAction, SigAltStack, SigHandler,
    SigPost, SigSet, Signal, SignalDetail, SsFlags, NSIG,
};
use crate::signals::frame::{FrameBuilder, FrameRequest, MachineState};
use crate::signals::handler::{Dispatcher, HandlerRegistry};
use crate::signals::state::{SigState, SigStateInner, SignalStateRegistry};
use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a delivered signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing deliverable
    NothingPending,
    /// Posted but blocked; stays pending
    Pending(Signal),
    /// A handler frame was built and the thread now runs it
    HandlerInstalled {
        signal: Signal,
        scp: Address,
        resumed: Resumed,
    },
    Ignored(Signal),
    /// The thread was terminated with this signal
    Terminated(Signal),
    Stopped(Signal),
    Continued(Signal),
}

impl DeliveryOutcome {
    /// Check if outcome ended the thread
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeliveryOutcome::Terminated(_))
    }
}

/// Process-wide signal dispositions
pub struct ActionTable {
    actions: RwLock<Vec<SigAction>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(vec![SigAction::default(); NSIG as usize]),
        }
    }

    pub fn get(&self, signal: Signal) -> SigAction {
        self.actions.read()[signal.number() as usize]
    }

    /// Install an action, returning the previous one
    pub fn set(&self, signal: Signal, action: SigAction) -> SignalResult<SigAction> {
        if !signal.can_catch() && action.handler != SigHandler::Default {
            return Err(SignalError::invalid_argument(format!(
                "{signal} cannot be caught or ignored"
            )));
        }
        let mut actions = self.actions.write();
        let old = std::mem::replace(&mut actions[signal.number() as usize], action);
        Ok(old)
    }

    pub fn reset(&self, signal: Signal) {
        self.actions.write()[signal.number() as usize] = SigAction::default();
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The signal thread: the only party that redirects other threads into handlers
pub struct DeliveryActor<K: Microkernel> {
    kernel: Arc<K>,
    memory: Arc<AddressSpace>,
    states: SignalStateRegistry,
    actions: ActionTable,
    handlers: HandlerRegistry,
    config: DeliveryConfig,
    stats: DeliveryStats,
    stopped: Mutex<HashSet<ThreadId, RandomState>>,
}

impl<K: Microkernel> DeliveryActor<K> {
    pub fn new(kernel: Arc<K>, memory: Arc<AddressSpace>, config: DeliveryConfig) -> Self {
        info!(
            rpc_timeout_ms = config.rpc_timeout_ms(),
            "Signal delivery actor initialized"
        );
        Self {
            kernel,
            memory,
            states: SignalStateRegistry::new(),
            actions: ActionTable::new(),
            handlers: HandlerRegistry::new(),
            config,
            stats: DeliveryStats::new(),
            stopped: Mutex::new(HashSet::with_hasher(RandomState::new())),
        }
    }

    pub fn kernel(&self) -> &Arc<K> {
        &self.kernel
    }

    pub fn memory(&self) -> &Arc<AddressSpace> {
        &self.memory
    }

    pub fn states(&self) -> &SignalStateRegistry {
        &self.states
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn stats(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Create the signal state of a thread, with a fresh reply port
    pub fn register_thread(&self, thread: ThreadId) -> SignalResult<Arc<SigState>> {
        let reply_port = self.kernel.reply_port_allocate();
        self.states
            .initialize_thread(thread, reply_port)
            .inspect_err(|_| {
                if let Err(e) = self.kernel.port_release_receive(reply_port) {
                    warn!(%thread, error = %e, "reply port release failed");
                }
            })
    }

    /// Tear down a thread's signal state and its reply port
    pub fn unregister_thread(&self, thread: ThreadId) {
        if let Some(ss) = self.states.cleanup_thread(thread) {
            let port = ss.swap_reply_port(PORT_NULL);
            if port_valid(port) {
                if let Err(e) = self.kernel.port_release_receive(port) {
                    warn!(%thread, error = %e, "reply port release failed");
                }
            }
        }
        self.stopped.lock().remove(&thread);
    }

    pub fn sigaction(&self, signal: Signal, action: SigAction) -> SignalResult<SigAction> {
        self.actions.set(signal, action)
    }

    pub fn action(&self, signal: Signal) -> SigAction {
        self.actions.get(signal)
    }

    /// Replace the blocked mask; KILL and STOP are silently dropped from it
    pub fn set_blocked(&self, thread: ThreadId, mask: SigSet) -> SignalResult<SigSet> {
        let ss = self.states.get(thread)?;
        let mut inner = ss.lock();
        let old = inner.blocked;
        inner.blocked = mask.difference(SigSet::CANT_MASK);
        Ok(old)
    }

    /// Configure the alternate signal stack; refused while a handler runs on it
    pub fn sigaltstack(&self, thread: ThreadId, stack: SigAltStack) -> SignalResult<SigAltStack> {
        let ss = self.states.get(thread)?;
        let mut inner = ss.lock();
        if inner.altstack.flags.contains(SsFlags::ONSTACK) {
            return Err(SignalError::invalid_argument(
                "alternate stack is in use",
            ));
        }
        Ok(std::mem::replace(&mut inner.altstack, stack))
    }

    /// Entry point for kernel exception notifications
    pub fn handle_exception(&self, msg: &ExceptionMessage) -> SignalResult<DeliveryOutcome> {
        self.stats.inc_exceptions();
        let style = if self.config.posix_codes_for_siginfo {
            CodeStyle::Posix
        } else {
            CodeStyle::Legacy
        };
        let mut detail = SignalDetail::from_exception(Exception::from(msg));
        let signal = detail
            .translate(style)
            .ok_or(SignalError::InvalidSignal(0))?;
        debug!(thread = %msg.thread, %signal, code = detail.code, "exception translated");
        self.post_signal(msg.thread, signal, detail)
    }

    /// Mark `signal` pending on `thread` and try to deliver
    pub fn post_signal(
        &self,
        thread: ThreadId,
        signal: Signal,
        detail: SignalDetail,
    ) -> SignalResult<DeliveryOutcome> {
        self.stats.inc_posted();
        let ss = self.states.get(thread)?;
        {
            let mut inner = ss.lock();
            let action = self.actions.get(signal);
            let unhandleable =
                inner.blocked.contains(signal) || action.handler == SigHandler::Ignore;
            if detail.exception.is_some() && unhandleable {
                // Resuming would fault again at the same instruction.
                drop(inner);
                return self.terminate(thread, signal);
            }
            inner.mark_pending(signal, detail);
        }

        match self.deliver_pending(thread)? {
            DeliveryOutcome::NothingPending => Ok(DeliveryOutcome::Pending(signal)),
            outcome => Ok(outcome),
        }
    }

    /// Deliver the lowest-numbered pending signal the blocked mask lets through
    pub fn deliver_pending(&self, thread: ThreadId) -> SignalResult<DeliveryOutcome> {
        let ss = self.states.get(thread)?;
        let mut inner = ss.lock();
        let Some(signal) = inner.next_deliverable() else {
            return Ok(DeliveryOutcome::NothingPending);
        };
        let detail = inner.take_pending(signal);
        let action = self.actions.get(signal);

        let span = DeliverySpan::new(thread, signal);
        let outcome = {
            let _entered = span.enter();
            self.apply_action(&ss, &mut inner, signal, action, detail)
        };
        if let Ok(outcome) = &outcome {
            span.finish(outcome);
        }
        outcome
    }

    /// Request cooperative cancellation of the thread's interruptible call
    pub fn cancel_thread(&self, thread: ThreadId) -> SignalResult<()> {
        let ss = self.states.get(thread)?;
        ss.request_cancel();
        if port_valid(ss.intr_port()) {
            self.kernel.thread_suspend(thread)?;
            let aborted = self.kernel.thread_abort(thread);
            self.kernel.thread_resume(thread)?;
            aborted?;
        }
        debug!(%thread, "cancellation requested");
        Ok(())
    }

    /// Trampoline dispatcher bound to this actor
    pub fn dispatcher(&self) -> Dispatcher<'_, K, Self> {
        Dispatcher::new(
            self.kernel.as_ref(),
            &self.memory,
            &self.handlers,
            &self.states,
            self,
            &self.config,
            &self.stats,
        )
    }

    /// Run the thread's signal machinery until it is back in ordinary code
    pub fn run_thread(&self, thread: ThreadId) -> SignalResult<ThreadState> {
        self.dispatcher().run(thread)
    }

    fn apply_action(
        &self,
        ss: &SigState,
        inner: &mut SigStateInner,
        signal: Signal,
        action: SigAction,
        detail: SignalDetail,
    ) -> SignalResult<DeliveryOutcome> {
        let thread = ss.thread();
        match action.handler {
            SigHandler::Ignore => {
                self.stats.inc_ignored();
                Ok(DeliveryOutcome::Ignored(signal))
            }
            SigHandler::Default => match signal.default_action() {
                DefaultAction::Ignore => {
                    self.stats.inc_ignored();
                    Ok(DeliveryOutcome::Ignored(signal))
                }
                DefaultAction::Terminate | DefaultAction::Core => self.terminate(thread, signal),
                DefaultAction::Stop => {
                    if self.stopped.lock().insert(thread) {
                        self.kernel.thread_suspend(thread)?;
                    }
                    Ok(DeliveryOutcome::Stopped(signal))
                }
                DefaultAction::Continue => {
                    if self.stopped.lock().remove(&thread) {
                        self.kernel.thread_resume(thread)?;
                    }
                    Ok(DeliveryOutcome::Continued(signal))
                }
            },
            SigHandler::Catch(handler) => {
                self.install_handler(ss, inner, signal, handler, action, detail)
            }
        }
    }

    fn install_handler(
        &self,
        ss: &SigState,
        inner: &mut SigStateInner,
        signal: Signal,
        handler: Address,
        action: SigAction,
        mut detail: SignalDetail,
    ) -> SignalResult<DeliveryOutcome> {
        let thread = ss.thread();
        self.kernel.thread_suspend(thread)?;

        let mut state = MachineState::new();
        let built = self
            .abort_rpcs(ss, &mut state)
            .and_then(|rpc_wait| {
                let request = FrameRequest {
                    action: &action,
                    handler,
                    signal,
                    detail: &mut detail,
                    rpc_wait,
                };
                FrameBuilder::new(self.kernel.as_ref(), &self.memory, &self.config)
                    .setup_sighandler(ss, inner, request, &mut state)
            })
            .and_then(|scp| {
                state
                    .basic
                    .map(|basic| (scp, basic))
                    .ok_or_else(|| SignalError::invalid_argument("frame built without registers"))
            });

        let (scp, basic) = match built {
            Ok(built) => built,
            Err(e) => {
                warn!(%thread, %signal, error = %e, "cannot build signal frame");
                self.stats.inc_frame_failures();
                return self.terminate(thread, Signal::SIGILL);
            }
        };

        inner.context = None;
        let mut block = action.mask;
        if !action.flags.contains(SaFlags::NODEFER) {
            block.insert(signal);
        }
        inner.blocked = inner.blocked.union(block).difference(SigSet::CANT_MASK);
        if action.flags.contains(SaFlags::RESETHAND) {
            self.actions.reset(signal);
        }

        // The handler gets a reply port of its own; the interrupted one is in the context.
        ss.set_reply_port(PORT_NULL);
        ss.clear_intr_port();

        self.kernel
            .thread_set_state(thread, &StateBlock::General(basic))?;
        self.kernel.thread_resume(thread)?;
        self.stats.inc_frames_built();

        Ok(DeliveryOutcome::HandlerInstalled {
            signal,
            scp,
            resumed: Resumed {
                thread,
                pc: basic.pc,
                sp: basic.sp,
            },
        })
    }

    /// Abort the interruptible call the thread is in, if any.
    ///
    /// Returns true when the thread was waiting for an RPC reply, which the
    /// retry trampoline must then collect.
    fn abort_rpcs(&self, ss: &SigState, state: &mut MachineState) -> SignalResult<bool> {
        let thread = ss.thread();
        if !port_valid(ss.intr_port()) {
            return Ok(false);
        }

        self.kernel.thread_abort(thread)?;
        let basic = state.basic(self.kernel.as_ref(), thread)?;
        let rpc_wait = in_msg_trap(basic, &self.memory)
            && MsgReturn::from_register(basic.x[reg::RETVAL])
                == MsgReturn::RCV_INTERRUPTED;
        debug!(%thread, rpc_wait, "interruptible call aborted");
        Ok(rpc_wait)
    }

    fn terminate(&self, thread: ThreadId, signal: Signal) -> SignalResult<DeliveryOutcome> {
        self.kernel.thread_terminate(thread, signal)?;
        self.stats.inc_terminations();
        warn!(%thread, %signal, "thread terminated by signal");
        Ok(DeliveryOutcome::Terminated(signal))
    }
}

impl<K: Microkernel> SigPost for DeliveryActor<K> {
    fn sig_post(&self, thread: ThreadId) -> SignalResult<PostOutcome> {
        self.stats.inc_reentrant_posts();
        loop {
            match self.deliver_pending(thread)? {
                DeliveryOutcome::HandlerInstalled { resumed, .. } => {
                    return Ok(PostOutcome::HandlerInstalled(resumed))
                }
                DeliveryOutcome::NothingPending | DeliveryOutcome::Terminated(_) => {
                    return Ok(PostOutcome::NoHandler)
                }
                _ => continue,
            }
        }
    }
}
