/*!
 * Simulated Kernel
 * Deterministic in-process implementation of the kernel interfaces
 */

use super::traits::{MessageTrap, PortRights, ThreadControl, ThreadStateAccess};
use super::types::{MsgHeader, MsgOption, MsgReturn, StateBlock, StateFlavor, TrapArgs};
use crate::arch::{reg, FloatState, ThreadState};
use crate::core::errors::{KernError, KernResult};
use crate::core::types::{PortName, ThreadId, PORT_NULL};
use crate::ipc::in_msg_trap;
use crate::memory::AddressSpace;
use crate::signals::Signal;
use ahash::RandomState;
use crossbeam_queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message id offset of a simulated reply
pub const REPLY_ID_OFFSET: i32 = 100;

const FIRST_PORT: PortName = 0x100;

#[derive(Debug, Clone, Default)]
struct SimThread {
    regs: ThreadState,
    fpu: FloatState,
    suspend_count: u32,
    terminated: Option<Signal>,
}

/// In-process microkernel
pub struct SimKernel {
    threads: DashMap<ThreadId, SimThread, RandomState>,
    memory: Arc<AddressSpace>,
    receive_rights: Mutex<HashSet<PortName, RandomState>>,
    next_port: AtomicU32,
    next_thread: AtomicU32,
    replies: SegQueue<MsgReturn>,
    trap_log: Mutex<Vec<(ThreadId, TrapArgs)>>,
}

impl SimKernel {
    pub fn new(memory: Arc<AddressSpace>) -> Self {
        info!("Simulated kernel initialized");
        Self {
            threads: DashMap::with_hasher(RandomState::new()),
            memory,
            receive_rights: Mutex::new(HashSet::with_hasher(RandomState::new())),
            next_port: AtomicU32::new(FIRST_PORT),
            next_thread: AtomicU32::new(1),
            replies: SegQueue::new(),
            trap_log: Mutex::new(Vec::new()),
        }
    }

    pub fn memory(&self) -> &Arc<AddressSpace> {
        &self.memory
    }

    /// Create a running thread with the given registers
    pub fn spawn_thread(&self, regs: ThreadState) -> ThreadId {
        let thread = ThreadId(self.next_thread.fetch_add(1, Ordering::SeqCst));
        self.threads.insert(
            thread,
            SimThread {
                regs,
                ..SimThread::default()
            },
        );
        debug!(%thread, pc = regs.pc, sp = regs.sp, "thread spawned");
        thread
    }

    pub fn thread_regs(&self, thread: ThreadId) -> KernResult<ThreadState> {
        self.with_thread(thread, |t| Ok(t.regs))
    }

    pub fn thread_fpu(&self, thread: ThreadId) -> KernResult<FloatState> {
        self.with_thread(thread, |t| Ok(t.fpu))
    }

    /// Overwrite registers as the running thread itself would
    pub fn set_regs(&self, thread: ThreadId, regs: ThreadState) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            t.regs = regs;
            Ok(())
        })
    }

    pub fn set_fpu(&self, thread: ThreadId, fpu: FloatState) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            t.fpu = fpu;
            Ok(())
        })
    }

    pub fn suspend_count(&self, thread: ThreadId) -> KernResult<u32> {
        self.with_thread(thread, |t| Ok(t.suspend_count))
    }

    /// Fatal signal the thread was terminated with, if any
    pub fn termination(&self, thread: ThreadId) -> Option<Signal> {
        self.threads.get(&thread).and_then(|t| t.terminated)
    }

    /// Queue the status of a future `mach_msg`; unscripted calls succeed
    pub fn script_reply(&self, status: MsgReturn) {
        self.replies.push(status);
    }

    /// Every trap issued so far, oldest first
    pub fn trap_log(&self) -> Vec<(ThreadId, TrapArgs)> {
        self.trap_log.lock().clone()
    }

    pub fn has_receive_right(&self, name: PortName) -> bool {
        self.receive_rights.lock().contains(&name)
    }

    fn with_thread<R>(
        &self,
        thread: ThreadId,
        f: impl FnOnce(&SimThread) -> KernResult<R>,
    ) -> KernResult<R> {
        let entry = self
            .threads
            .get(&thread)
            .ok_or(KernError::NoSuchThread(thread))?;
        if entry.terminated.is_some() {
            return Err(KernError::Terminated(thread));
        }
        f(&entry)
    }

    fn with_thread_mut<R>(
        &self,
        thread: ThreadId,
        f: impl FnOnce(&mut SimThread) -> KernResult<R>,
    ) -> KernResult<R> {
        let mut entry = self
            .threads
            .get_mut(&thread)
            .ok_or(KernError::NoSuchThread(thread))?;
        if entry.terminated.is_some() {
            return Err(KernError::Terminated(thread));
        }
        f(&mut entry)
    }

    fn read_block(t: &SimThread, flavor: StateFlavor) -> StateBlock {
        match flavor {
            StateFlavor::General => StateBlock::General(t.regs),
            StateFlavor::Float => StateBlock::Float(t.fpu),
        }
    }

    fn write_block(t: &mut SimThread, state: &StateBlock) {
        match state {
            StateBlock::General(regs) => t.regs = *regs,
            StateBlock::Float(fpu) => t.fpu = *fpu,
        }
    }

    fn write_reply(&self, args: &TrapArgs) {
        let request: MsgHeader = match self.memory.read_pod(args.msg) {
            Ok(header) => header,
            Err(fault) => {
                warn!(%fault, "reply buffer unreadable");
                return;
            }
        };
        let reply = MsgHeader {
            bits: 0,
            size: std::mem::size_of::<MsgHeader>() as u32,
            remote_port: PORT_NULL,
            local_port: args.rcv_name,
            seqno: 0,
            id: request.id.wrapping_add(REPLY_ID_OFFSET),
        };
        if let Err(fault) = self.memory.write_pod(args.msg, &reply) {
            warn!(%fault, "reply buffer unwritable");
        }
    }
}

impl ThreadStateAccess for SimKernel {
    fn thread_get_state(&self, thread: ThreadId, flavor: StateFlavor) -> KernResult<StateBlock> {
        self.with_thread(thread, |t| {
            if t.suspend_count == 0 {
                return Err(KernError::NotSuspended(thread));
            }
            Ok(Self::read_block(t, flavor))
        })
    }

    fn thread_set_state(&self, thread: ThreadId, state: &StateBlock) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            if t.suspend_count == 0 {
                return Err(KernError::NotSuspended(thread));
            }
            Self::write_block(t, state);
            Ok(())
        })
    }

    fn thread_get_self_state(
        &self,
        thread: ThreadId,
        flavor: StateFlavor,
    ) -> KernResult<StateBlock> {
        self.with_thread(thread, |t| Ok(Self::read_block(t, flavor)))
    }

    fn thread_set_self_state(&self, thread: ThreadId, state: &StateBlock) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            Self::write_block(t, state);
            Ok(())
        })
    }
}

impl ThreadControl for SimKernel {
    fn thread_suspend(&self, thread: ThreadId) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            t.suspend_count += 1;
            Ok(())
        })
    }

    fn thread_resume(&self, thread: ThreadId) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            if t.suspend_count == 0 {
                return Err(KernError::NotSuspended(thread));
            }
            t.suspend_count -= 1;
            Ok(())
        })
    }

    fn thread_abort(&self, thread: ThreadId) -> KernResult<()> {
        let memory = self.memory.clone();
        self.with_thread_mut(thread, |t| {
            if t.suspend_count == 0 {
                return Err(KernError::NotSuspended(thread));
            }
            if !in_msg_trap(&t.regs, &memory) {
                return Ok(());
            }
            let option = MsgOption::from_bits_retain(t.regs.x[reg::OPTION]);
            let status = if option.contains(MsgOption::RCV_MSG) {
                MsgReturn::RCV_INTERRUPTED
            } else {
                MsgReturn::SEND_INTERRUPTED
            };
            t.regs.x[reg::RETVAL] = u64::from(status.0);
            debug!(%thread, ?status, "aborted message trap");
            Ok(())
        })
    }

    fn thread_terminate(&self, thread: ThreadId, signal: Signal) -> KernResult<()> {
        self.with_thread_mut(thread, |t| {
            t.terminated = Some(signal);
            Ok(())
        })?;
        warn!(%thread, %signal, "thread terminated");
        Ok(())
    }
}

impl MessageTrap for SimKernel {
    fn mach_msg(&self, thread: ThreadId, args: &TrapArgs) -> MsgReturn {
        self.trap_log.lock().push((thread, *args));
        let status = self.replies.pop().unwrap_or(MsgReturn::SUCCESS);
        if status.is_success() && args.option.contains(MsgOption::RCV_MSG) && args.msg != 0 {
            self.write_reply(args);
        }
        debug!(%thread, ?status, option = ?args.option, "mach_msg");
        status
    }
}

impl PortRights for SimKernel {
    fn reply_port_allocate(&self) -> PortName {
        let name = self.next_port.fetch_add(1, Ordering::SeqCst);
        self.receive_rights.lock().insert(name);
        name
    }

    fn port_release_receive(&self, name: PortName) -> KernResult<()> {
        if self.receive_rights.lock().remove(&name) {
            debug!(port = name, "receive right released");
            Ok(())
        } else {
            Err(KernError::InvalidPort(name))
        }
    }
}
