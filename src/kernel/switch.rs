/*!
 * Context Switch
 * The one irreversible step of signal handling: loading a full register snapshot
 */

use super::traits::ThreadStateAccess;
use super::types::StateBlock;
use crate::arch::{FloatState, ThreadState};
use crate::core::errors::KernResult;
use crate::core::types::{Address, ThreadId};

/// Proof that a thread's control flow was transferred.
///
/// Produced by [`switch_context`], or by the delivery actor once it has loaded
/// a handler frame into a suspended thread. Code that holds it must not touch
/// the thread's registers again; the value can only be passed upward to say
/// "control went elsewhere".
#[must_use = "a context switch has happened; the caller must not continue the old flow"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumed {
    pub thread: ThreadId,
    pub pc: Address,
    pub sp: Address,
}

/// Load `fpu` then `basic` into the calling thread.
///
/// Precondition: the caller is `thread` itself and owns both snapshots.
/// Postcondition: `thread` continues at `basic.pc` with `basic.sp`; the old
/// flow of control does not return.
pub fn switch_context<K>(
    kernel: &K,
    thread: ThreadId,
    fpu: &FloatState,
    basic: &ThreadState,
) -> KernResult<Resumed>
where
    K: ThreadStateAccess + ?Sized,
{
    kernel.thread_set_self_state(thread, &StateBlock::Float(*fpu))?;
    kernel.thread_set_self_state(thread, &StateBlock::General(*basic))?;
    Ok(Resumed {
        thread,
        pc: basic.pc,
        sp: basic.sp,
    })
}
