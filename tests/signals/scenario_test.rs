/*!
 * End-to-End Delivery Scenarios
 * Fault handling, interrupted RPCs, and signals arriving around a running handler
 */

use super::harness::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sigdeliver::arch::{exc, reg};
use sigdeliver::core::types::{Address, PORT_NULL};
use sigdeliver::kernel::sim::REPLY_ID_OFFSET;
use sigdeliver::kernel::{ExceptionMessage, MsgHeader, MsgOption, MsgReturn, SimKernel};
use sigdeliver::signals::handler::TRAMPOLINE_RETURN;
use sigdeliver::signals::{
    DeliveryActor, DeliveryOutcome, HandlerExit, SigAction, SigSet, Signal, SignalDetail,
};
use std::sync::{Arc, Weak};

/// Protection fault; the handler resumes past the faulting instruction
#[test]
fn test_fault_handled_and_skipped() {
    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);

    let entry = h.actor.handlers().register(|call| {
        let mut ctx = call.read_context().unwrap();
        ctx.basic.pc += 4;
        call.write_context(&ctx).unwrap();
        HandlerExit::Return
    });
    h.actor
        .sigaction(Signal::SIGSEGV, SigAction::catch(entry))
        .unwrap();

    let outcome = h
        .actor
        .handle_exception(&ExceptionMessage {
            thread,
            exception: exc::EXC_BAD_ACCESS,
            code: exc::KERN_PROTECTION_FAILURE,
            subcode: DATA + 0x18,
        })
        .unwrap();
    assert!(matches!(
        outcome,
        DeliveryOutcome::HandlerInstalled {
            signal: Signal::SIGSEGV,
            ..
        }
    ));

    let after = h.actor.run_thread(thread).unwrap();
    assert_eq!(after.pc, before.pc + 4);
    assert_registers_preserved(&before, &after);
    assert_eq!(h.kernel.thread_fpu(thread).unwrap(), Harness::initial_fpu());

    let stats = h.actor.stats();
    assert_eq!(stats.exceptions_received, 1);
    assert_eq!(stats.frames_built, 1);
    assert_eq!(stats.sigreturns, 1);
}

/// Unrelated signal while waiting for an RPC reply
#[test]
fn test_interrupted_rpc_reply_is_collected() {
    let h = Harness::new();
    let thread = h.spawn_in_rpc(7);
    let before = h.regs(thread);
    let ss = h.actor.states().get(thread).unwrap();
    let reply_port = ss.reply_port();
    let intr_port = ss.intr_port();

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let entry = h.actor.handlers().register(move |call| {
        let reply: MsgHeader = call.memory.read_pod(MSG).unwrap();
        *sink.lock() = Some((reply.id, call.state.reply_port()));
        HandlerExit::Return
    });
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
        .unwrap();
    h.actor
        .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
        .unwrap();

    let after = h.actor.run_thread(thread).unwrap();

    // The reply was in the buffer before the handler ran.
    assert_eq!(*seen.lock(), Some((7 + REPLY_ID_OFFSET, PORT_NULL)));
    assert_eq!(after.pc, AFTER_SVC);
    assert_eq!(
        MsgReturn::from_register(after.x[reg::RETVAL]),
        MsgReturn::SUCCESS
    );
    assert_eq!(after.x[1..], before.x[1..]);
    assert_eq!(after.sp, before.sp);

    let log = h.kernel.trap_log();
    let (logged_thread, args) = log.last().copied().unwrap();
    assert_eq!(logged_thread, thread);
    assert_eq!(args.msg, MSG);
    assert_eq!(
        args.option,
        MsgOption::RCV_MSG | MsgOption::RCV_TIMEOUT | MsgOption::RCV_INTERRUPT
    );
    assert_eq!(args.timeout, 60_000);
    assert_eq!(args.rcv_name, reply_port);

    let reply: MsgHeader = h.memory.read_pod(MSG).unwrap();
    assert_eq!(reply.local_port, reply_port);
    assert_eq!(ss.reply_port(), reply_port);
    assert_eq!(ss.intr_port(), intr_port);
    assert_eq!(h.actor.stats().rpc_retries, 1);
}

#[test]
fn test_interrupted_rpc_times_out() {
    let h = Harness::with_config(sigdeliver::DeliveryConfig::fast_timeout());
    let thread = h.spawn_in_rpc(9);
    let entry = h.actor.handlers().register(|_| HandlerExit::Return);
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
        .unwrap();
    h.kernel.script_reply(MsgReturn::RCV_TIMED_OUT);

    h.actor
        .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
        .unwrap();
    let after = h.actor.run_thread(thread).unwrap();

    assert_eq!(
        MsgReturn::from_register(after.x[reg::RETVAL]),
        MsgReturn::RCV_TIMED_OUT
    );
    assert_eq!(h.kernel.trap_log()[0].1.timeout, 500);
    let untouched: MsgHeader = h.memory.read_pod(MSG).unwrap();
    assert_eq!(untouched.id, 9);
}

fn order_log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// A signal blocked by the running handler is delivered from that handler's
/// sigreturn, on the context the sigreturn was about to load
#[test]
fn test_signal_pending_at_sigreturn_is_folded() {
    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);
    let order = order_log();
    let actor: Weak<DeliveryActor<SimKernel>> = Arc::downgrade(&h.actor);

    let log = order.clone();
    let first = h.actor.handlers().register(move |call| {
        log.lock().push("usr1");
        let outcome = actor
            .upgrade()
            .unwrap()
            .post_signal(call.thread, Signal::SIGUSR2, SignalDetail::default())
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Pending(Signal::SIGUSR2));
        HandlerExit::Return
    });

    let log = order.clone();
    let folded = Arc::new(Mutex::new(None));
    let sink = folded.clone();
    let second = h.actor.handlers().register(move |call| {
        log.lock().push("usr2");
        *sink.lock() = Some((call.read_context().unwrap(), call.state.lock().nesting_depth()));
        HandlerExit::Return
    });

    h.actor
        .sigaction(
            Signal::SIGUSR1,
            SigAction::catch(first).with_mask(SigSet::of(Signal::SIGUSR2)),
        )
        .unwrap();
    h.actor
        .sigaction(Signal::SIGUSR2, SigAction::catch(second))
        .unwrap();
    h.actor
        .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
        .unwrap();

    let after = h.actor.run_thread(thread).unwrap();
    assert_eq!(*order.lock(), vec!["usr1", "usr2"]);

    let (ctx, depth) = folded.lock().unwrap();
    // The second handler saw the interrupted code, not the first handler's trampoline.
    assert_eq!(ctx.basic, before);
    assert_eq!(ctx.mask, 0);
    assert_eq!(depth, 1);

    assert_eq!(after, before);
    let ss = h.actor.states().get(thread).unwrap();
    assert_eq!(ss.lock().context, None);
    assert_eq!(ss.lock().nesting_depth(), 0);
    assert_eq!(ss.lock().blocked, SigSet::EMPTY);

    let stats = h.actor.stats();
    assert_eq!(stats.reentrant_posts, 1);
    assert_eq!(stats.frames_built, 2);
    assert_eq!(stats.sigreturns, 2);
}

/// A signal that arrives while a handler runs gets its own frame on top;
/// after it returns the first handler's return path completes normally
#[test]
fn test_signal_during_handler_nests() {
    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);
    let order = order_log();
    let actor: Weak<DeliveryActor<SimKernel>> = Arc::downgrade(&h.actor);
    let outer_scp = Arc::new(Mutex::new(0));

    let log = order.clone();
    let scp_sink = outer_scp.clone();
    let first = h.actor.handlers().register(move |call| {
        *scp_sink.lock() = call.context_addr();
        let outcome = actor
            .upgrade()
            .unwrap()
            .post_signal(call.thread, Signal::SIGUSR2, SignalDetail::default())
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::HandlerInstalled { .. }));
        log.lock().push("usr1");
        HandlerExit::Return
    });

    let log = order.clone();
    let inner = Arc::new(Mutex::new(None));
    let sink = inner.clone();
    let second = h.actor.handlers().register(move |call| {
        log.lock().push("usr2");
        let ctx = call.read_context().unwrap();
        *sink.lock() = Some((ctx, call.sp, call.state.lock().nesting_depth()));
        HandlerExit::Return
    });

    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(first))
        .unwrap();
    h.actor
        .sigaction(Signal::SIGUSR2, SigAction::catch(second))
        .unwrap();
    h.actor
        .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
        .unwrap();

    let after = h.actor.run_thread(thread).unwrap();
    assert_eq!(*order.lock(), vec!["usr1", "usr2"]);

    let outer_scp: Address = *outer_scp.lock();
    let (ctx, sp, depth) = inner.lock().unwrap();
    assert_eq!(depth, 2);
    assert!(sp < outer_scp);
    // The nested context resumes the first handler's return path.
    assert_eq!(ctx.basic.pc, TRAMPOLINE_RETURN);
    assert_eq!(ctx.basic.sp, outer_scp);
    assert!(SigSet(ctx.mask).contains(Signal::SIGUSR1));

    assert_eq!(after, before);
    assert_eq!(h.actor.stats().sigreturns, 2);
}

/// Unwind chain length tracks the signal nesting depth
#[test]
fn test_chain_length_matches_nesting() {
    const CHAIN: [Signal; 3] = [Signal::SIGUSR1, Signal::SIGUSR2, Signal::SIGHUP];

    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);
    let depths = Arc::new(Mutex::new(Vec::new()));

    for (i, signal) in CHAIN.into_iter().enumerate() {
        let actor: Weak<DeliveryActor<SimKernel>> = Arc::downgrade(&h.actor);
        let depths = depths.clone();
        let entry = h.actor.handlers().register(move |call| {
            depths.lock().push(call.state.lock().nesting_depth());
            if let Some(next) = CHAIN.get(i + 1) {
                actor
                    .upgrade()
                    .unwrap()
                    .post_signal(call.thread, *next, SignalDetail::default())
                    .unwrap();
            }
            HandlerExit::Return
        });
        h.actor.sigaction(signal, SigAction::catch(entry)).unwrap();
    }

    h.actor
        .post_signal(thread, CHAIN[0], SignalDetail::default())
        .unwrap();
    let after = h.actor.run_thread(thread).unwrap();

    assert_eq!(*depths.lock(), vec![1, 2, 3]);
    let ss = h.actor.states().get(thread).unwrap();
    assert_eq!(ss.lock().nesting_depth(), 0);
    assert_eq!(after, before);
}
