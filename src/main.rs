/*!
 * sigdeliver - Demonstration Entry Point
 *
 * Runs two end-to-end deliveries on the simulated kernel:
 * - a protection fault caught by a legacy handler that skips the faulting instruction
 * - a signal arriving while a thread waits for an RPC reply
 */

use anyhow::{bail, Context, Result};
use sigdeliver::arch::{exc, reg, ThreadState, SVC_INSN};
use sigdeliver::core::types::{Address, ThreadId};
use sigdeliver::kernel::{
    ExceptionMessage, MsgHeader, MsgOption, MsgReturn, PortRights, SimKernel, TrapArgs,
};
use sigdeliver::memory::{AddressSpace, Protection};
use sigdeliver::monitoring::init_tracing;
use sigdeliver::signals::{
    DeliveryActor, DeliveryOutcome, HandlerExit, SigAction, Signal, SignalDetail,
};
use sigdeliver::DeliveryConfig;
use std::sync::Arc;
use tracing::info;

const CODE: Address = 0x40_0000;
const DATA: Address = 0x60_0000;
const STACK: Address = 0x7fff_0000;
const STACK_SIZE: u64 = 0x4_0000;

fn main() -> Result<()> {
    init_tracing();

    let config = DeliveryConfig::from_env();
    info!(
        config = %serde_json::to_string(&config).context("serializing config")?,
        "sigdeliver demo starting"
    );

    let memory = Arc::new(AddressSpace::new());
    memory.map(CODE, 0x1000, Protection::RW);
    memory
        .write_u32(CODE + 0x200, SVC_INSN)
        .context("writing trap instruction")?;
    memory.protect(CODE, Protection::RX)?;
    memory.map(DATA, 0x1000, Protection::RW);
    memory.map(STACK, STACK_SIZE, Protection::RW);

    let kernel = Arc::new(SimKernel::new(memory.clone()));
    let actor = Arc::new(DeliveryActor::new(kernel, memory, config));

    protection_fault(&actor)?;
    interrupted_rpc(&actor)?;

    let stats = actor.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn spawn(actor: &DeliveryActor<SimKernel>, pc: Address) -> Result<(ThreadId, ThreadState)> {
    let mut regs = ThreadState::default();
    regs.pc = pc;
    regs.sp = STACK + STACK_SIZE - 0x400;
    for (i, x) in regs.x.iter_mut().enumerate().skip(19).take(10) {
        *x = 0x1900 + i as u64;
    }
    let thread = actor.kernel().spawn_thread(regs);
    actor.register_thread(thread)?;
    Ok((thread, regs))
}

/// SIGSEGV with a protection-failure code, handled by skipping the store
fn protection_fault(actor: &Arc<DeliveryActor<SimKernel>>) -> Result<()> {
    let faulting_pc = CODE + 0x100;
    let (thread, before) = spawn(actor, faulting_pc)?;

    let handler = actor.handlers().register(|call| {
        if let Ok(mut ctx) = call.read_context() {
            ctx.basic.pc += 4;
            let _ = call.write_context(&ctx);
        }
        HandlerExit::Return
    });
    actor.sigaction(Signal::SIGSEGV, SigAction::catch(handler))?;

    let outcome = actor.handle_exception(&ExceptionMessage {
        thread,
        exception: exc::EXC_BAD_ACCESS,
        code: exc::KERN_PROTECTION_FAILURE,
        subcode: DATA + 0x10,
    })?;
    let DeliveryOutcome::HandlerInstalled { scp, .. } = outcome else {
        bail!("expected a handler frame, got {outcome:?}");
    };
    info!(%thread, scp, "protection fault delivered");

    let after = actor.run_thread(thread)?;
    if after.pc != faulting_pc + 4 || after.sp != before.sp || after.x[19..29] != before.x[19..29]
    {
        bail!("thread resumed with unexpected registers: {after:?}");
    }
    info!(%thread, pc = after.pc, "scenario A: resumed past the faulting store");

    actor.sigaction(Signal::SIGSEGV, SigAction::default())?;
    actor.unregister_thread(thread);
    Ok(())
}

/// SIGUSR1 while blocked in an RPC; the reply is collected before the handler runs
fn interrupted_rpc(actor: &Arc<DeliveryActor<SimKernel>>) -> Result<()> {
    let msg = DATA + 0x100;
    actor.memory().write_pod(
        msg,
        &MsgHeader {
            id: 2_000,
            ..MsgHeader::default()
        },
    )?;

    let (thread, _) = spawn(actor, CODE + 0x204)?;
    let ss = actor.states().get(thread)?;
    let server = actor.kernel().reply_port_allocate();
    let args = TrapArgs {
        msg,
        option: MsgOption::SEND_MSG | MsgOption::RCV_MSG | MsgOption::RCV_INTERRUPT,
        send_size: 24,
        rcv_size: 24,
        rcv_name: ss.reply_port(),
        timeout: 0,
        notify: 0,
    };
    let mut regs = actor.kernel().thread_regs(thread)?;
    args.load_into(&mut regs);
    actor.kernel().set_regs(thread, regs)?;
    ss.set_intr_port(server);

    let handler = actor.handlers().register(|call| {
        info!(code = call.code(), "SIGUSR1 handler running");
        HandlerExit::Return
    });
    actor.sigaction(Signal::SIGUSR1, SigAction::catch(handler))?;

    let outcome = actor.post_signal(thread, Signal::SIGUSR1, SignalDetail::default())?;
    if !matches!(outcome, DeliveryOutcome::HandlerInstalled { .. }) {
        bail!("expected a handler frame, got {outcome:?}");
    }

    let after = actor.run_thread(thread)?;
    let reply: MsgHeader = actor.memory().read_pod(msg)?;
    let status = MsgReturn::from_register(after.x[reg::RETVAL]);
    if !status.is_success() || after.pc != CODE + 0x204 {
        bail!("interrupted call did not complete: {status:?} at 0x{:x}", after.pc);
    }
    info!(
        %thread,
        ?status,
        reply_id = reply.id,
        retries = actor.stats().rpc_retries,
        "scenario B: receive reissued and completed"
    );

    actor.sigaction(Signal::SIGUSR1, SigAction::default())?;
    actor.unregister_thread(thread);
    Ok(())
}
