/*!
 * Signal Restore
 * Normal return through sigreturn and non-local exit through longjmp
 */

pub mod sigreturn;
pub mod unwind;

pub use sigreturn::Restorer;
pub use unwind::{finalize_frame, longjmp_from_handler};
