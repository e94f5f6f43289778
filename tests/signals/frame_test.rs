/*!
 * Frame Builder Tests
 * Stack placement, frame contents and trampoline selection
 */

use super::harness::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use sigdeliver::arch::{exc, reg, ThreadState};
use sigdeliver::core::types::{align_down, Address, PortName, PORT_NULL};
use sigdeliver::kernel::{ExceptionMessage, MsgOption, MsgReturn, SimKernel, ThreadControl};
use sigdeliver::memory::{AddressSpace, Protection};
use sigdeliver::signals::codes;
use sigdeliver::signals::handler::{RPC_WAIT_TRAMPOLINE, TRAMPOLINE};
use sigdeliver::signals::{
    DeliveryOutcome, FrameBuilder, FrameRequest, HandlerExit, MachineState, SaFlags, SigAction,
    SigAltStack, SigContext, SigSet, SigState, Signal, SignalDetail, SsFlags, StackFrame,
    FRAME_SIZE,
};
use sigdeliver::DeliveryConfig;
use std::mem::size_of;
use std::sync::Arc;

fn installed(outcome: DeliveryOutcome) -> Address {
    match outcome {
        DeliveryOutcome::HandlerInstalled { scp, .. } => scp,
        other => panic!("expected a handler frame, got {other:?}"),
    }
}

/// Build a legacy USR1 frame directly on a thread whose stack pointer is `sp`
fn build_at(sp: Address) -> (Arc<AddressSpace>, Address, ThreadState) {
    build_with(sp, &DeliveryConfig::default())
}

fn build_with(sp: Address, config: &DeliveryConfig) -> (Arc<AddressSpace>, Address, ThreadState) {
    let memory = Arc::new(AddressSpace::new());
    memory.map(STACK, STACK_SIZE, Protection::RW);
    let kernel = SimKernel::new(memory.clone());

    let mut regs = Harness::initial_regs(USER_PC);
    regs.sp = sp;
    let thread = kernel.spawn_thread(regs);
    kernel.thread_suspend(thread).unwrap();

    let ss = SigState::new(thread, 0x100);
    let action = SigAction::catch(0x5000);
    let mut detail = SignalDetail::default();
    let mut state = MachineState::new();

    let scp = FrameBuilder::new(&kernel, &memory, config)
        .setup_sighandler(
            &ss,
            &mut ss.lock(),
            FrameRequest {
                action: &action,
                handler: 0x5000,
                signal: Signal::SIGUSR1,
                detail: &mut detail,
                rpc_wait: false,
            },
            &mut state,
        )
        .unwrap();
    assert_eq!(ss.lock().nesting_depth(), 1);

    (memory, scp, state.basic.unwrap())
}

proptest! {
    #[test]
    fn prop_frame_is_aligned_below_sp(offset in 0x1000u64..STACK_SIZE) {
        let sp = STACK + offset;
        let (memory, scp, basic) = build_at(sp);

        prop_assert_eq!(basic.sp % 16, 0);
        prop_assert!(basic.sp + FRAME_SIZE <= sp);
        prop_assert!(sp - (basic.sp + FRAME_SIZE) < 16);
        prop_assert_eq!(scp, basic.sp + 32);
        prop_assert_eq!(basic.pc, TRAMPOLINE);
        prop_assert_eq!(basic.x[reg::HANDLER], 0x5000);

        let frame: StackFrame = memory.read_pod(basic.sp).unwrap();
        prop_assert_eq!(frame.signo, u64::from(Signal::SIGUSR1.number()));
        prop_assert_eq!(frame.arg1, 0);
        prop_assert_eq!(frame.arg2, scp);
        prop_assert_eq!(frame.ctx.basic.sp, sp);
        prop_assert_eq!(frame.link.data, scp);
        prop_assert!(frame.link.handle != 0);
    }
}

#[test]
fn test_unusable_alignment_falls_back_to_abi() {
    let sp = STACK + 0x2007;
    for stack_alignment in [0, 8, 24] {
        let config = DeliveryConfig {
            stack_alignment,
            ..DeliveryConfig::default()
        };
        let (_, _, basic) = build_with(sp, &config);
        assert_eq!(basic.sp % 16, 0);
        assert!(sp - (basic.sp + FRAME_SIZE) < 16);
    }

    let wide = DeliveryConfig {
        stack_alignment: 64,
        ..DeliveryConfig::default()
    };
    let (_, _, basic) = build_with(sp, &wide);
    assert_eq!(basic.sp % 64, 0);
}

#[test]
fn test_unusable_stack_terminates_with_sigill() {
    for sp in [0x1000_0000, STACK + 0x100] {
        let h = Harness::new();
        let mut regs = Harness::initial_regs(USER_PC);
        regs.sp = sp;
        let thread = h.spawn_at(regs);

        let entry = h.actor.handlers().register(|_| HandlerExit::Return);
        h.actor
            .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
            .unwrap();

        let outcome = h
            .actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Terminated(Signal::SIGILL));
        assert_eq!(h.kernel.termination(thread), Some(Signal::SIGILL));

        let stats = h.actor.stats();
        assert_eq!(stats.frame_failures, 1);
        assert_eq!(stats.forced_terminations, 1);
        assert_eq!(stats.frames_built, 0);
        let ss = h.actor.states().get(thread).unwrap();
        assert_eq!(ss.lock().nesting_depth(), 0);
    }
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    signal: Signal,
    code: i64,
    scp_arg: u64,
    sp: Address,
    ctx: SigContext,
    blocked: SigSet,
    reply_port: PortName,
    intr_port: PortName,
}

fn recorder(h: &Harness) -> (Address, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let entry = h.actor.handlers().register(move |call| {
        sink.lock().push(Seen {
            signal: call.signal().unwrap(),
            code: call.code(),
            scp_arg: call.args[2],
            sp: call.sp,
            ctx: call.read_context().unwrap(),
            blocked: call.state.lock().blocked,
            reply_port: call.state.reply_port(),
            intr_port: call.state.intr_port(),
        });
        HandlerExit::Return
    });
    (entry, seen)
}

#[test]
fn test_legacy_frame_contents() {
    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);
    let ss = h.actor.states().get(thread).unwrap();
    let reply_port = ss.reply_port();

    let (entry, seen) = recorder(&h);
    h.actor
        .sigaction(Signal::SIGSEGV, SigAction::catch(entry))
        .unwrap();

    let outcome = h
        .actor
        .handle_exception(&ExceptionMessage {
            thread,
            exception: exc::EXC_BAD_ACCESS,
            code: exc::KERN_PROTECTION_FAILURE,
            subcode: DATA + 0x10,
        })
        .unwrap();
    let scp = installed(outcome);
    assert_eq!(h.kernel.suspend_count(thread).unwrap(), 0);

    let after = h.actor.run_thread(thread).unwrap();
    let seen = seen.lock()[0];

    assert_eq!(seen.signal, Signal::SIGSEGV);
    // Legacy handlers get the subcode, not the POSIX code.
    assert_eq!(seen.code, (DATA + 0x10) as i64);
    assert_eq!(seen.scp_arg, scp);
    assert_eq!(seen.sp, scp);
    assert_eq!(seen.ctx.basic, before);
    assert_eq!(seen.ctx.fpu, Harness::initial_fpu());
    assert_eq!(seen.ctx.error, exc::KERN_PROTECTION_FAILURE as i32);
    assert_eq!(seen.ctx.mask, 0);
    assert_eq!(seen.ctx.reply_port, reply_port);
    assert!(seen.blocked.contains(Signal::SIGSEGV));
    assert_eq!(seen.reply_port, PORT_NULL);
    assert_eq!(seen.intr_port, PORT_NULL);

    assert_eq!(after, before);
    assert_eq!(ss.lock().blocked, SigSet::EMPTY);
    assert_eq!(ss.reply_port(), reply_port);
}

#[test]
fn test_siginfo_frame_contents() {
    let h = Harness::new();
    let thread = h.spawn();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let entry = h.actor.handlers().register(move |call| {
        sink.lock()
            .push((call.siginfo().unwrap(), call.ucontext().unwrap()));
        HandlerExit::Return
    });
    h.actor
        .sigaction(Signal::SIGSEGV, SigAction::siginfo(entry))
        .unwrap();
    h.actor
        .sigaction(Signal::SIGUSR2, SigAction::siginfo(entry))
        .unwrap();

    installed(
        h.actor
            .handle_exception(&ExceptionMessage {
                thread,
                exception: exc::EXC_BAD_ACCESS,
                code: exc::KERN_INVALID_ADDRESS,
                subcode: 0xdead_0000,
            })
            .unwrap(),
    );
    h.actor.run_thread(thread).unwrap();

    installed(
        h.actor
            .post_signal(thread, Signal::SIGUSR2, SignalDetail::default())
            .unwrap(),
    );
    h.actor.run_thread(thread).unwrap();

    let seen = seen.lock();
    let (info, uc) = seen[0];
    assert_eq!(info.signo, Signal::SIGSEGV.number() as i32);
    assert_eq!(i64::from(info.code), codes::SEGV_MAPERR);
    assert_eq!(i64::from(info.errno), exc::KERN_INVALID_ADDRESS);
    assert_eq!(info.addr, 0xdead_0000);
    assert_eq!(info.pid, -1);
    assert_eq!(uc.gregs.pc, USER_PC);
    assert_eq!(uc.sigmask, 0);

    let (info, _) = seen[1];
    assert_eq!(info.signo, Signal::SIGUSR2.number() as i32);
    assert_eq!(info.code, 0);
    assert_eq!(info.addr, USER_PC);
}

#[test]
fn test_handler_mask() {
    let h = Harness::new();
    let thread = h.spawn();
    let (entry, seen) = recorder(&h);

    let mask = SigSet::of(Signal::SIGUSR2).union(SigSet::of(Signal::SIGKILL));
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry).with_mask(mask))
        .unwrap();
    h.actor
        .sigaction(
            Signal::SIGHUP,
            SigAction::catch(entry)
                .with_mask(SigSet::of(Signal::SIGUSR2))
                .with_flags(SaFlags::NODEFER | SaFlags::RESETHAND),
        )
        .unwrap();

    installed(
        h.actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap(),
    );
    h.actor.run_thread(thread).unwrap();
    installed(
        h.actor
            .post_signal(thread, Signal::SIGHUP, SignalDetail::default())
            .unwrap(),
    );
    h.actor.run_thread(thread).unwrap();

    let seen = seen.lock();
    let expected: SigSet = [Signal::SIGUSR1, Signal::SIGUSR2].into_iter().collect();
    assert_eq!(seen[0].blocked, expected);
    assert_eq!(seen[1].blocked, SigSet::of(Signal::SIGUSR2));

    assert_eq!(h.actor.action(Signal::SIGHUP), SigAction::default());
    assert_eq!(h.actor.action(Signal::SIGUSR1).handler, SigAction::catch(entry).handler);
}

#[test]
fn test_alternate_stack() {
    let h = Harness::new();
    let thread = h.spawn();
    let before = h.regs(thread);
    let ss = h.actor.states().get(thread).unwrap();

    h.actor
        .sigaltstack(thread, SigAltStack::new(ALTSTACK, ALTSTACK_SIZE))
        .unwrap();
    let entry = h.actor.handlers().register(|_| HandlerExit::Return);
    h.actor
        .sigaction(
            Signal::SIGUSR1,
            SigAction::catch(entry).with_flags(SaFlags::ONSTACK),
        )
        .unwrap();

    let scp = installed(
        h.actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap(),
    );
    assert!((ALTSTACK..ALTSTACK + ALTSTACK_SIZE).contains(&scp));
    assert!(ss.lock().altstack.flags.contains(SsFlags::ONSTACK));
    let ctx: SigContext = h.memory.read_pod(scp).unwrap();
    assert!(ctx.is_onstack());

    // Refused while the handler runs on it.
    assert!(h
        .actor
        .sigaltstack(thread, SigAltStack::default())
        .is_err());

    let after = h.actor.run_thread(thread).unwrap();
    assert_eq!(after.sp, before.sp);
    assert!(!ss.lock().altstack.flags.contains(SsFlags::ONSTACK));

    let usp = align_down(before.sp - size_of::<SigContext>() as u64, 16);
    let copied: SigContext = h.memory.read_pod(usp).unwrap();
    assert_eq!(copied, ctx);
}

#[test]
fn test_rpc_wait_selects_retry_trampoline() {
    let h = Harness::new();
    let thread = h.spawn_in_rpc(7);
    let entry = h.actor.handlers().register(|_| HandlerExit::Return);
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
        .unwrap();

    let scp = installed(
        h.actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap(),
    );

    let regs = h.regs(thread);
    assert_eq!(regs.pc, RPC_WAIT_TRAMPOLINE);
    let option = MsgOption::from_bits_retain(regs.x[reg::OPTION]);
    assert!(!option.contains(MsgOption::SEND_MSG));
    assert!(option.contains(MsgOption::RCV_MSG | MsgOption::RCV_TIMEOUT));
    assert_eq!(regs.x[reg::TIMEOUT], 60_000);
    assert_eq!(regs.x[reg::RESULT_SLOT], SigContext::retval_slot(scp));
    assert_eq!(regs.x[reg::HANDLER], entry);

    let ctx: SigContext = h.memory.read_pod(scp).unwrap();
    assert_eq!(
        MsgReturn::from_register(ctx.basic.x[reg::RETVAL]),
        MsgReturn::RCV_INTERRUPTED
    );
    let ss = h.actor.states().get(thread).unwrap();
    assert_eq!(ss.intr_port(), PORT_NULL);
    assert_eq!(ss.reply_port(), PORT_NULL);
}

#[test]
fn test_interrupt_port_outside_trap_uses_direct_trampoline() {
    let h = Harness::new();
    let thread = h.spawn();
    h.actor.states().get(thread).unwrap().set_intr_port(0x999);
    let entry = h.actor.handlers().register(|_| HandlerExit::Return);
    h.actor
        .sigaction(Signal::SIGUSR1, SigAction::catch(entry))
        .unwrap();

    installed(
        h.actor
            .post_signal(thread, Signal::SIGUSR1, SignalDetail::default())
            .unwrap(),
    );
    assert_eq!(h.regs(thread).pc, TRAMPOLINE);
    assert_eq!(h.x(thread, reg::RETVAL), 0x1000);
}
