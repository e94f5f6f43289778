/*!
 * Signal Types
 * POSIX signal numbers, masks, actions and alternate stacks
 */

use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::Address;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of signal slots (signal numbers run 1..NSIG)
pub const NSIG: u32 = 33;

/// Signal numbers, BSD layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum Signal {
    /// Hangup detected on controlling terminal or death of controlling process
    SIGHUP = 1,
    /// Interrupt from keyboard (Ctrl+C)
    SIGINT = 2,
    /// Quit from keyboard (Ctrl+\)
    SIGQUIT = 3,
    /// Illegal instruction
    SIGILL = 4,
    /// Trace/breakpoint trap
    SIGTRAP = 5,
    /// Abort signal (also IOT)
    SIGABRT = 6,
    /// Emulator trap
    SIGEMT = 7,
    /// Floating-point exception
    SIGFPE = 8,
    /// Kill signal (cannot be caught or ignored)
    SIGKILL = 9,
    /// Bus error (bad memory access)
    SIGBUS = 10,
    /// Invalid memory reference
    SIGSEGV = 11,
    /// Bad system call
    SIGSYS = 12,
    /// Broken pipe
    SIGPIPE = 13,
    /// Timer signal
    SIGALRM = 14,
    /// Termination signal
    SIGTERM = 15,
    /// Urgent condition on socket
    SIGURG = 16,
    /// Stop process (cannot be caught or ignored)
    SIGSTOP = 17,
    /// Stop typed at terminal (Ctrl+Z)
    SIGTSTP = 18,
    /// Continue if stopped
    SIGCONT = 19,
    /// Child process stopped or terminated
    SIGCHLD = 20,
    /// Terminal input for background process
    SIGTTIN = 21,
    /// Terminal output for background process
    SIGTTOU = 22,
    /// I/O now possible
    SIGIO = 23,
    /// CPU time limit exceeded
    SIGXCPU = 24,
    /// File size limit exceeded
    SIGXFSZ = 25,
    /// Virtual alarm clock
    SIGVTALRM = 26,
    /// Profiling timer expired
    SIGPROF = 27,
    /// Window resize signal
    SIGWINCH = 28,
    /// Information request
    SIGINFO = 29,
    /// User-defined signal 1
    SIGUSR1 = 30,
    /// User-defined signal 2
    SIGUSR2 = 31,
    /// Resource lost
    SIGLOST = 32,
}

impl Signal {
    /// Alias used for exceptions the translator does not recognize
    pub const SIGIOT: Signal = Signal::SIGABRT;

    const ALL: [Signal; 32] = [
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGILL,
        Signal::SIGTRAP,
        Signal::SIGABRT,
        Signal::SIGEMT,
        Signal::SIGFPE,
        Signal::SIGKILL,
        Signal::SIGBUS,
        Signal::SIGSEGV,
        Signal::SIGSYS,
        Signal::SIGPIPE,
        Signal::SIGALRM,
        Signal::SIGTERM,
        Signal::SIGURG,
        Signal::SIGSTOP,
        Signal::SIGTSTP,
        Signal::SIGCONT,
        Signal::SIGCHLD,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGIO,
        Signal::SIGXCPU,
        Signal::SIGXFSZ,
        Signal::SIGVTALRM,
        Signal::SIGPROF,
        Signal::SIGWINCH,
        Signal::SIGINFO,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
        Signal::SIGLOST,
    ];

    /// Convert from signal number
    pub fn from_number(n: u32) -> SignalResult<Self> {
        if (1..NSIG).contains(&n) {
            Ok(Self::ALL[(n - 1) as usize])
        } else {
            Err(SignalError::InvalidSignal(n))
        }
    }

    /// Get signal number
    pub fn number(&self) -> u32 {
        *self as u32
    }

    /// Every signal, in numeric order
    pub fn all() -> impl Iterator<Item = Signal> {
        Self::ALL.into_iter()
    }

    /// Check if signal can be caught/blocked
    pub fn can_catch(&self) -> bool {
        !matches!(self, Signal::SIGKILL | Signal::SIGSTOP)
    }

    /// What happens when the signal arrives with the default disposition
    pub fn default_action(&self) -> DefaultAction {
        match self {
            Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU => {
                DefaultAction::Stop
            }
            Signal::SIGCONT => DefaultAction::Continue,
            Signal::SIGURG
            | Signal::SIGCHLD
            | Signal::SIGIO
            | Signal::SIGWINCH
            | Signal::SIGINFO => DefaultAction::Ignore,
            Signal::SIGQUIT
            | Signal::SIGILL
            | Signal::SIGTRAP
            | Signal::SIGABRT
            | Signal::SIGEMT
            | Signal::SIGFPE
            | Signal::SIGBUS
            | Signal::SIGSEGV
            | Signal::SIGSYS
            | Signal::SIGXCPU
            | Signal::SIGXFSZ => DefaultAction::Core,
            _ => DefaultAction::Terminate,
        }
    }

    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Signal::SIGHUP => "Hangup",
            Signal::SIGINT => "Interrupt",
            Signal::SIGQUIT => "Quit",
            Signal::SIGILL => "Illegal instruction",
            Signal::SIGTRAP => "Trace/breakpoint trap",
            Signal::SIGABRT => "Aborted",
            Signal::SIGEMT => "EMT trap",
            Signal::SIGFPE => "Floating point exception",
            Signal::SIGKILL => "Killed",
            Signal::SIGBUS => "Bus error",
            Signal::SIGSEGV => "Segmentation fault",
            Signal::SIGSYS => "Bad system call",
            Signal::SIGPIPE => "Broken pipe",
            Signal::SIGALRM => "Alarm clock",
            Signal::SIGTERM => "Terminated",
            Signal::SIGURG => "Urgent I/O condition",
            Signal::SIGSTOP => "Stopped (signal)",
            Signal::SIGTSTP => "Stopped",
            Signal::SIGCONT => "Continued",
            Signal::SIGCHLD => "Child status changed",
            Signal::SIGTTIN => "Stopped (tty input)",
            Signal::SIGTTOU => "Stopped (tty output)",
            Signal::SIGIO => "I/O possible",
            Signal::SIGXCPU => "CPU time limit exceeded",
            Signal::SIGXFSZ => "File size limit exceeded",
            Signal::SIGVTALRM => "Virtual timer expired",
            Signal::SIGPROF => "Profiling timer expired",
            Signal::SIGWINCH => "Window size changed",
            Signal::SIGINFO => "Information request",
            Signal::SIGUSR1 => "User defined signal 1",
            Signal::SIGUSR2 => "User defined signal 2",
            Signal::SIGLOST => "Resource lost",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.number())
    }
}

/// Default disposition classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultAction {
    Terminate,
    /// Terminate with a core dump
    Core,
    Stop,
    Continue,
    Ignore,
}

/// Set of signals as a bit mask (bit `signo - 1`)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigSet(pub u64);

impl SigSet {
    pub const EMPTY: SigSet = SigSet(0);

    /// Signals that may never appear in a blocked mask
    pub const CANT_MASK: SigSet = SigSet(
        (1 << (Signal::SIGKILL as u32 - 1)) | (1 << (Signal::SIGSTOP as u32 - 1)),
    );

    pub const fn of(signal: Signal) -> SigSet {
        SigSet(1 << (signal as u32 - 1))
    }

    pub fn contains(&self, signal: Signal) -> bool {
        self.0 & Self::of(signal).0 != 0
    }

    pub fn insert(&mut self, signal: Signal) {
        self.0 |= Self::of(signal).0;
    }

    pub fn remove(&mut self, signal: Signal) {
        self.0 &= !Self::of(signal).0;
    }

    pub fn union(self, other: SigSet) -> SigSet {
        SigSet(self.0 | other.0)
    }

    pub fn difference(self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }

    pub fn intersects(self, other: SigSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest-numbered member
    pub fn first(&self) -> Option<Signal> {
        if self.0 == 0 {
            return None;
        }
        Signal::from_number(self.0.trailing_zeros() + 1).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = Signal> + '_ {
        Signal::all().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<Signal> for SigSet {
    fn from_iter<I: IntoIterator<Item = Signal>>(iter: I) -> Self {
        let mut set = SigSet::EMPTY;
        for signal in iter {
            set.insert(signal);
        }
        set
    }
}

impl fmt::Debug for SigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

bitflags! {
    /// `sa_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SaFlags: u32 {
        const ONSTACK = 0x0001;
        const RESTART = 0x0002;
        const NODEFER = 0x0010;
        const RESETHAND = 0x0004;
        const SIGINFO = 0x0040;
    }
}

/// Signal disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SigHandler {
    #[default]
    Default,
    Ignore,
    /// User handler entry address
    Catch(Address),
}

/// `struct sigaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SigAction {
    pub handler: SigHandler,
    pub mask: SigSet,
    pub flags: SaFlags,
}

impl SigAction {
    /// Legacy `(signo, code, scp)` handler
    pub fn catch(handler: Address) -> Self {
        Self {
            handler: SigHandler::Catch(handler),
            ..Self::default()
        }
    }

    pub fn ignore() -> Self {
        Self {
            handler: SigHandler::Ignore,
            ..Self::default()
        }
    }

    /// `SA_SIGINFO` handler taking `(signo, siginfo, ucontext)`
    pub fn siginfo(handler: Address) -> Self {
        Self {
            handler: SigHandler::Catch(handler),
            flags: SaFlags::SIGINFO,
            ..Self::default()
        }
    }

    pub fn with_mask(mut self, mask: SigSet) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_flags(mut self, flags: SaFlags) -> Self {
        self.flags |= flags;
        self
    }
}

bitflags! {
    /// `ss_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SsFlags: u32 {
        const ONSTACK = 0x0001;
        const DISABLE = 0x0004;
    }
}

/// Alternate signal stack descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigAltStack {
    pub sp: Address,
    pub size: u64,
    pub flags: SsFlags,
}

impl Default for SigAltStack {
    fn default() -> Self {
        Self {
            sp: 0,
            size: 0,
            flags: SsFlags::DISABLE,
        }
    }
}

impl SigAltStack {
    pub fn new(sp: Address, size: u64) -> Self {
        Self {
            sp,
            size,
            flags: SsFlags::empty(),
        }
    }

    /// Configured and not already in use
    pub fn usable(&self) -> bool {
        !self.flags.intersects(SsFlags::DISABLE | SsFlags::ONSTACK)
    }

    pub fn top(&self) -> Address {
        self.sp + self.size
    }
}

/// POSIX `si_code` values
pub mod codes {
    pub const SEGV_MAPERR: i64 = 1;
    pub const SEGV_ACCERR: i64 = 2;

    pub const BUS_ADRALN: i64 = 1;
    pub const BUS_ADRERR: i64 = 2;

    pub const ILL_ILLOPC: i64 = 1;
    pub const ILL_ILLOPN: i64 = 2;
    pub const ILL_ILLTRP: i64 = 4;

    pub const FPE_FLTDIV: i64 = 3;
    pub const FPE_FLTOVF: i64 = 4;
    pub const FPE_FLTUND: i64 = 5;
    pub const FPE_FLTRES: i64 = 6;
    pub const FPE_FLTINV: i64 = 7;
    /// Input denormal
    pub const FPE_FLTIDO: i64 = 16;

    pub const TRAP_BRKPT: i64 = 1;

    /// Deprecated sigcodes passed to legacy handlers
    pub mod legacy {
        pub const FPE_INTOVF_TRAP: i64 = 0x1;
        pub const FPE_INTDIV_FAULT: i64 = 0x2;
        pub const FPE_FLTOVF_FAULT: i64 = 0x3;
        pub const FPE_FLTDIV_FAULT: i64 = 0x4;
        pub const FPE_FLTUND_FAULT: i64 = 0x5;
        pub const FPE_SUBRNG_FAULT: i64 = 0x7;
        pub const FPE_FLTDNR_FAULT: i64 = 0x8;
        pub const FPE_FLTINX_FAULT: i64 = 0x9;
        pub const FPE_EMERR_FAULT: i64 = 0xa;
        pub const FPE_EMBND_FAULT: i64 = 0xb;
    }
}
