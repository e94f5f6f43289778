/*!
 * Exception Translation
 * Maps kernel exception records to a signal number, signal code and error value
 */

use super::types::{codes, codes::legacy, Signal};
use crate::arch::exc;
use crate::kernel::ExceptionMessage;
use serde::{Deserialize, Serialize};

/// Which family of `si_code` values to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeStyle {
    /// Standard POSIX codes, for `SA_SIGINFO` handlers
    Posix,
    /// Deprecated sigcodes, for `(signo, code, scp)` handlers
    Legacy,
}

/// Raw exception record as the kernel reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub exception: i32,
    pub code: i64,
    pub subcode: u64,
}

impl From<&ExceptionMessage> for Exception {
    fn from(msg: &ExceptionMessage) -> Self {
        Self {
            exception: msg.exception,
            code: msg.code,
            subcode: msg.subcode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    InvalidAddress,
    MemoryFailure,
    Protection,
    WriteProtection,
    /// Memory tag check failure
    TagCheck,
    /// Branch target identification failure
    BranchTarget,
    Alignment,
    AlignmentPc,
    AlignmentSp,
    Other(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionFault {
    Svc,
    Other(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticFault {
    InputDenormal,
    Inexact,
    Underflow,
    Overflow,
    DivideByZero,
    InvalidOperation,
    Other(i64),
}

/// Decoded exception class with its class-specific code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    BadAccess(AccessFault),
    BadInstruction(InstructionFault),
    Arithmetic(ArithmeticFault),
    Emulation,
    Software,
    Breakpoint,
    Unknown(i32),
}

impl ExceptionKind {
    pub fn decode(exception: i32, code: i64) -> Self {
        match exception {
            exc::EXC_BAD_ACCESS => ExceptionKind::BadAccess(match code {
                exc::KERN_INVALID_ADDRESS => AccessFault::InvalidAddress,
                exc::KERN_MEMORY_FAILURE => AccessFault::MemoryFailure,
                exc::KERN_PROTECTION_FAILURE => AccessFault::Protection,
                exc::KERN_WRITE_PROTECTION_FAILURE => AccessFault::WriteProtection,
                exc::EXC_AARCH64_MTE => AccessFault::TagCheck,
                exc::EXC_AARCH64_BTI => AccessFault::BranchTarget,
                exc::EXC_AARCH64_AL => AccessFault::Alignment,
                exc::EXC_AARCH64_AL_PC => AccessFault::AlignmentPc,
                exc::EXC_AARCH64_AL_SP => AccessFault::AlignmentSp,
                other => AccessFault::Other(other),
            }),
            exc::EXC_BAD_INSTRUCTION => ExceptionKind::BadInstruction(match code {
                exc::EXC_AARCH64_SVC => InstructionFault::Svc,
                other => InstructionFault::Other(other),
            }),
            exc::EXC_ARITHMETIC => ExceptionKind::Arithmetic(match code {
                exc::EXC_AARCH64_IDF => ArithmeticFault::InputDenormal,
                exc::EXC_AARCH64_IXF => ArithmeticFault::Inexact,
                exc::EXC_AARCH64_UFF => ArithmeticFault::Underflow,
                exc::EXC_AARCH64_OFF => ArithmeticFault::Overflow,
                exc::EXC_AARCH64_DZF => ArithmeticFault::DivideByZero,
                exc::EXC_AARCH64_IOF => ArithmeticFault::InvalidOperation,
                other => ArithmeticFault::Other(other),
            }),
            exc::EXC_EMULATION => ExceptionKind::Emulation,
            exc::EXC_SOFTWARE => ExceptionKind::Software,
            exc::EXC_BREAKPOINT => ExceptionKind::Breakpoint,
            other => ExceptionKind::Unknown(other),
        }
    }
}

/// Translator output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub signal: Signal,
    pub code: i64,
    pub error: i64,
}

/// Translate an exception record. Total: every input yields a signal.
pub fn exception_to_signal(exception: &Exception, style: CodeStyle) -> Translation {
    let posix = style == CodeStyle::Posix;
    let pick = |posix_code: i64, legacy_code: i64| if posix { posix_code } else { legacy_code };
    let subcode = exception.subcode as i64;

    let (signal, code, error) = match ExceptionKind::decode(exception.exception, exception.code) {
        ExceptionKind::BadAccess(fault) => {
            let (signal, posix_code) = match fault {
                AccessFault::InvalidAddress | AccessFault::MemoryFailure => {
                    (Signal::SIGSEGV, codes::SEGV_MAPERR)
                }
                AccessFault::Protection | AccessFault::WriteProtection => {
                    (Signal::SIGSEGV, codes::SEGV_ACCERR)
                }
                // Approximation: tag-check failures have no code of their own yet.
                AccessFault::TagCheck => (Signal::SIGSEGV, codes::SEGV_ACCERR),
                AccessFault::BranchTarget => (Signal::SIGILL, codes::ILL_ILLOPN),
                AccessFault::Alignment | AccessFault::AlignmentPc | AccessFault::AlignmentSp => {
                    (Signal::SIGBUS, codes::BUS_ADRALN)
                }
                AccessFault::Other(_) => (Signal::SIGBUS, codes::BUS_ADRERR),
            };
            (signal, pick(posix_code, subcode), exception.code)
        }
        ExceptionKind::BadInstruction(fault) => {
            let code = match fault {
                InstructionFault::Svc => pick(codes::ILL_ILLTRP, 0),
                InstructionFault::Other(_) => pick(codes::ILL_ILLOPC, 0),
            };
            (Signal::SIGILL, code, 0)
        }
        ExceptionKind::Arithmetic(fault) => {
            let code = match fault {
                ArithmeticFault::InputDenormal => pick(codes::FPE_FLTIDO, 0),
                ArithmeticFault::Inexact => pick(codes::FPE_FLTRES, legacy::FPE_FLTINX_FAULT),
                ArithmeticFault::Underflow => pick(codes::FPE_FLTUND, legacy::FPE_FLTDNR_FAULT),
                ArithmeticFault::Overflow => pick(codes::FPE_FLTOVF, legacy::FPE_FLTOVF_FAULT),
                ArithmeticFault::DivideByZero => pick(codes::FPE_FLTDIV, legacy::FPE_FLTDIV_FAULT),
                ArithmeticFault::InvalidOperation => pick(codes::FPE_FLTINV, 0),
                ArithmeticFault::Other(_) => 0,
            };
            (Signal::SIGFPE, code, 0)
        }
        ExceptionKind::Emulation | ExceptionKind::Software => (Signal::SIGEMT, 0, 0),
        ExceptionKind::Breakpoint => (Signal::SIGTRAP, pick(codes::TRAP_BRKPT, 0), 0),
        ExceptionKind::Unknown(class) => (Signal::SIGIOT, i64::from(class), 0),
    };

    Translation {
        signal,
        code,
        error,
    }
}

/// Why a signal is being delivered, and the code/error handed to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignalDetail {
    /// Set when the signal originates from a hardware exception
    pub exception: Option<Exception>,
    pub code: i64,
    pub error: i64,
}

impl SignalDetail {
    pub fn from_exception(exception: Exception) -> Self {
        Self {
            exception: Some(exception),
            ..Self::default()
        }
    }

    /// Fill `code` and `error` from the exception record; returns the signal, if any
    pub fn translate(&mut self, style: CodeStyle) -> Option<Signal> {
        let exception = self.exception?;
        let translation = exception_to_signal(&exception, style);
        self.code = translation.code;
        self.error = translation.error;
        Some(translation.signal)
    }
}
