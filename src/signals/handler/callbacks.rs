/*!
 * Handler Callback Registry
 * Maps user handler entry addresses to host closures
 */

use crate::arch::JmpBuf;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::{Address, PortName, ThreadId, PORT_NULL};
use crate::kernel::PortRights;
use crate::memory::{AddressSpace, MemoryResult};
use crate::signals::core::Signal;
use crate::signals::frame::{SigContext, SigInfo, UContext};
use crate::signals::state::SigState;
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// First handler entry address
pub const HANDLER_BASE: Address = 0xffff_0001_0000_0000;

/// Distance between two handler entry addresses
pub const HANDLER_STRIDE: Address = 0x10;

/// How a handler leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// Plain return into the trampoline, which then calls sigreturn
    Return,
    /// `longjmp(env, val)` out of the handler
    LongJmp(JmpBuf, i32),
}

/// A handler invocation as the handler sees it
pub struct HandlerCall<'a> {
    pub thread: ThreadId,
    /// x0..x2 as loaded by the trampoline
    pub args: [u64; 3],
    /// Stack pointer on entry; the saved context sits here
    pub sp: Address,
    pub memory: &'a AddressSpace,
    pub state: &'a SigState,
    pub ports: &'a dyn PortRights,
}

impl HandlerCall<'_> {
    pub fn signal(&self) -> SignalResult<Signal> {
        Signal::from_number(self.args[0] as u32)
    }

    /// Code argument of a legacy handler
    pub fn code(&self) -> i64 {
        self.args[1] as i64
    }

    /// Address of the context sigreturn will consume
    pub fn context_addr(&self) -> Address {
        self.sp
    }

    pub fn read_context(&self) -> MemoryResult<SigContext> {
        self.memory.read_pod(self.context_addr())
    }

    /// Overwrite the context, e.g. to resume past a faulting instruction
    pub fn write_context(&self, ctx: &SigContext) -> MemoryResult<()> {
        self.memory.write_pod(self.context_addr(), ctx)
    }

    /// siginfo of an `SA_SIGINFO` handler
    pub fn siginfo(&self) -> MemoryResult<SigInfo> {
        self.memory.read_pod(self.args[1])
    }

    /// ucontext of an `SA_SIGINFO` handler
    pub fn ucontext(&self) -> MemoryResult<UContext> {
        self.memory.read_pod(self.args[2])
    }

    /// Reply port for RPCs made by the handler, allocated on first use
    pub fn mig_reply_port(&self) -> PortName {
        let port = self.state.reply_port();
        if port != PORT_NULL {
            return port;
        }
        let port = self.ports.reply_port_allocate();
        self.state.set_reply_port(port);
        port
    }
}

/// Signal handler callback function type
pub type HandlerFn = Arc<dyn Fn(&HandlerCall<'_>) -> HandlerExit + Send + Sync>;

/// Handler registry for executable callbacks
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<Address, HandlerFn, RandomState>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handler and return its entry address
    pub fn register<F>(&self, handler: F) -> Address
    where
        F: Fn(&HandlerCall<'_>) -> HandlerExit + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = HANDLER_BASE + id * HANDLER_STRIDE;

        self.handlers.insert(entry, Arc::new(handler));
        info!("Registered signal handler at 0x{:x}", entry);
        entry
    }

    /// Look up the handler at an entry address
    pub fn lookup(&self, entry: Address) -> SignalResult<HandlerFn> {
        let handler = self
            .handlers
            .get(&entry)
            .map(|h| h.value().clone())
            .ok_or(SignalError::HandlerNotFound(entry))?;
        debug!("Dispatching handler at 0x{:x}", entry);
        Ok(handler)
    }

    pub fn unregister(&self, entry: Address) -> bool {
        let removed = self.handlers.remove(&entry).is_some();
        if removed {
            info!("Unregistered signal handler at 0x{:x}", entry);
        }
        removed
    }

    pub fn exists(&self, entry: Address) -> bool {
        self.handlers.contains_key(&entry)
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
