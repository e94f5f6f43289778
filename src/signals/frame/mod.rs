/*!
 * Signal Frames
 * On-stack records and the builder that writes them
 */

pub mod builder;
pub mod layout;

pub use builder::{FrameBuilder, FrameRequest, MachineState};
pub use layout::{SigContext, SigInfo, StackFrame, UContext, UnwindLink, FRAME_SIZE};
