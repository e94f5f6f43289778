/*!
 * Signal Core - Types, Traits and Exception Translation
 * Fundamental types shared by every stage of signal delivery
 */

pub mod exception;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use exception::{
    exception_to_signal, AccessFault, ArithmeticFault, CodeStyle, Exception, ExceptionKind,
    InstructionFault, SignalDetail, Translation,
};
pub use traits::{PostOutcome, SigPost};
pub use types::*;
