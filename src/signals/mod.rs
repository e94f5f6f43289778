/*!
 * Signals Module
 * POSIX signal delivery on top of the kernel's exception and thread-state interfaces
 */

pub mod core;
pub mod frame;
pub mod handler;
pub mod management;
pub mod restore;
pub mod state;

// Re-export public API
pub use self::core::{
    codes, exception_to_signal, CodeStyle, DefaultAction, Exception, PostOutcome, SaFlags,
    SigAction, SigAltStack, SigHandler, SigPost, SigSet, Signal, SignalDetail, SsFlags,
    Translation, NSIG,
};
pub use frame::{
    FrameBuilder, FrameRequest, MachineState, SigContext, SigInfo, StackFrame, UContext, FRAME_SIZE,
};
pub use handler::{Dispatcher, HandlerCall, HandlerExit, HandlerRegistry, Step};
pub use management::{ActionTable, DeliveryActor, DeliveryOutcome};
pub use restore::{longjmp_from_handler, Restorer};
pub use state::{SigState, SigStateInner, SignalStateRegistry, UnwindChain, UnwindHandle};
