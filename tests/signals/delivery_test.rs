/*!
 * Delivery Actor Tests
 * Dispositions, masks, thread registration and cancellation
 */

use super::harness::*;
use pretty_assertions::assert_eq;
use sigdeliver::arch::{exc, reg};
use sigdeliver::core::types::ThreadId;
use sigdeliver::ipc::InterruptibleCall;
use sigdeliver::kernel::{ExceptionMessage, MsgOption, MsgReturn, TrapArgs};
use sigdeliver::signals::{
    DeliveryOutcome, HandlerExit, SigAction, SigHandler, SigSet, Signal, SignalDetail,
};
use sigdeliver::SignalError;

fn post(h: &Harness, thread: ThreadId, signal: Signal) -> DeliveryOutcome {
    h.actor
        .post_signal(thread, signal, SignalDetail::default())
        .unwrap()
}

#[test]
fn test_default_actions() {
    let h = Harness::new();
    let thread = h.spawn();

    assert_eq!(
        post(&h, thread, Signal::SIGCHLD),
        DeliveryOutcome::Ignored(Signal::SIGCHLD)
    );
    assert_eq!(
        post(&h, thread, Signal::SIGSTOP),
        DeliveryOutcome::Stopped(Signal::SIGSTOP)
    );
    assert_eq!(h.kernel.suspend_count(thread).unwrap(), 1);
    // A second stop does not stack suspensions.
    post(&h, thread, Signal::SIGTSTP);
    assert_eq!(h.kernel.suspend_count(thread).unwrap(), 1);

    assert_eq!(
        post(&h, thread, Signal::SIGCONT),
        DeliveryOutcome::Continued(Signal::SIGCONT)
    );
    assert_eq!(h.kernel.suspend_count(thread).unwrap(), 0);

    let outcome = post(&h, thread, Signal::SIGTERM);
    assert_eq!(outcome, DeliveryOutcome::Terminated(Signal::SIGTERM));
    assert!(outcome.is_fatal());
    assert_eq!(h.kernel.termination(thread), Some(Signal::SIGTERM));

    let stats = h.actor.stats();
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.forced_terminations, 1);
    assert_eq!(stats.signals_posted, 5);
}

#[test]
fn test_ignored_and_blocked_signals() {
    let h = Harness::new();
    let thread = h.spawn();
    h.actor
        .sigaction(Signal::SIGTERM, SigAction::ignore())
        .unwrap();

    assert_eq!(
        post(&h, thread, Signal::SIGTERM),
        DeliveryOutcome::Ignored(Signal::SIGTERM)
    );
    assert_eq!(h.kernel.termination(thread), None);

    h.actor
        .set_blocked(thread, SigSet::of(Signal::SIGHUP))
        .unwrap();
    assert_eq!(
        post(&h, thread, Signal::SIGHUP),
        DeliveryOutcome::Pending(Signal::SIGHUP)
    );
    let ss = h.actor.states().get(thread).unwrap();
    assert!(ss.lock().pending.contains(Signal::SIGHUP));

    // Unblocking makes it deliverable, and the default action ends the thread.
    h.actor.set_blocked(thread, SigSet::EMPTY).unwrap();
    assert_eq!(
        h.actor.deliver_pending(thread).unwrap(),
        DeliveryOutcome::Terminated(Signal::SIGHUP)
    );
}

#[test]
fn test_uncatchable_signals() {
    let h = Harness::new();
    let thread = h.spawn();

    assert!(matches!(
        h.actor.sigaction(Signal::SIGKILL, SigAction::ignore()),
        Err(SignalError::InvalidArgument(_))
    ));
    assert_eq!(h.actor.action(Signal::SIGKILL).handler, SigHandler::Default);

    let mask = SigSet::of(Signal::SIGKILL)
        .union(SigSet::of(Signal::SIGSTOP))
        .union(SigSet::of(Signal::SIGUSR1));
    h.actor.set_blocked(thread, mask).unwrap();
    let ss = h.actor.states().get(thread).unwrap();
    assert_eq!(ss.lock().blocked, SigSet::of(Signal::SIGUSR1));

    assert_eq!(
        post(&h, thread, Signal::SIGKILL),
        DeliveryOutcome::Terminated(Signal::SIGKILL)
    );
}

#[test]
fn test_exception_that_cannot_be_handled_terminates() {
    let fault = |thread| ExceptionMessage {
        thread,
        exception: exc::EXC_BAD_ACCESS,
        code: exc::KERN_INVALID_ADDRESS,
        subcode: 0,
    };

    let h = Harness::new();
    let blocked = h.spawn();
    h.actor
        .set_blocked(blocked, SigSet::of(Signal::SIGSEGV))
        .unwrap();
    assert_eq!(
        h.actor.handle_exception(&fault(blocked)).unwrap(),
        DeliveryOutcome::Terminated(Signal::SIGSEGV)
    );

    let ignored = h.spawn();
    h.actor
        .sigaction(Signal::SIGSEGV, SigAction::ignore())
        .unwrap();
    assert_eq!(
        h.actor.handle_exception(&fault(ignored)).unwrap(),
        DeliveryOutcome::Terminated(Signal::SIGSEGV)
    );

    // A posted SIGSEGV is an ordinary signal and may be ignored.
    let posted = h.spawn();
    assert_eq!(
        post(&h, posted, Signal::SIGSEGV),
        DeliveryOutcome::Ignored(Signal::SIGSEGV)
    );
    assert_eq!(h.actor.stats().exceptions_received, 2);
}

#[test]
fn test_thread_registration() {
    let h = Harness::new();
    let thread = h.spawn();
    let port = h.actor.states().get(thread).unwrap().reply_port();
    assert!(h.kernel.has_receive_right(port));

    assert_eq!(
        h.actor.register_thread(thread).unwrap_err(),
        SignalError::AlreadyInitialized(thread)
    );

    h.actor.unregister_thread(thread);
    assert!(!h.kernel.has_receive_right(port));
    assert_eq!(
        h.actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap_err(),
        SignalError::UnknownThread(thread)
    );
    assert!(h.actor.set_blocked(thread, SigSet::EMPTY).is_err());
    assert!(h.actor.cancel_thread(thread).is_err());
}

#[test]
fn test_cancel_aborts_pending_rpc() {
    let h = Harness::new();
    let thread = h.spawn_in_rpc(3);
    let ss = h.actor.states().get(thread).unwrap();

    h.actor.cancel_thread(thread).unwrap();
    assert!(ss.cancel_requested());
    assert_eq!(
        MsgReturn::from_register(h.x(thread, reg::RETVAL)),
        MsgReturn::RCV_INTERRUPTED
    );
    assert_eq!(h.kernel.suspend_count(thread).unwrap(), 0);

    // Outside a call only the flag is set.
    let idle = h.spawn();
    let before = h.regs(idle);
    h.actor.cancel_thread(idle).unwrap();
    assert!(h.actor.states().get(idle).unwrap().cancel_requested());
    assert_eq!(h.regs(idle), before);
}

#[test]
fn test_cancelled_rpc_still_collects_reply() {
    let h = Harness::new();
    let thread = h.spawn_in_rpc(4);
    let ss = h.actor.states().get(thread).unwrap();
    let entry = h.actor.handlers().register(|_| HandlerExit::Return);
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
        .unwrap();

    h.actor.cancel_thread(thread).unwrap();
    post(&h, thread, Signal::SIGUSR1);
    let after = h.actor.run_thread(thread).unwrap();

    // The retry trampoline issued exactly one receive, cancellation or not.
    let log = h.kernel.trap_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, thread);
    assert!(!log[0].1.option.contains(MsgOption::SEND_MSG));
    assert!(log[0].1.option.contains(MsgOption::RCV_MSG));
    assert_eq!(
        MsgReturn::from_register(after.x[reg::RETVAL]),
        MsgReturn::SUCCESS
    );
    assert_eq!(h.actor.stats().rpc_retries, 1);

    // The pending cancellation is seen by the next call, then cleared.
    let args = TrapArgs::from_state(&after, reg::MSG_BACKUP);
    let call = InterruptibleCall::new(h.kernel.as_ref(), &*ss);
    assert_eq!(call.call(&args), MsgReturn::INTERRUPTED);
    assert_eq!(h.kernel.trap_log().len(), 1);
    assert!(!ss.cancel_requested());

    assert_eq!(call.call(&args), MsgReturn::SUCCESS);
    assert_eq!(h.kernel.trap_log().len(), 2);
}
