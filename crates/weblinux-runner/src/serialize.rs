//! Cooperative hand-off.
//!
//! Used while the guest kernel is single-CPU and for kernel-thread
//! rendezvous: the current runner asks the controller to wake another
//! runner, then parks on its own serialize slot until someone hands
//! control back. The waker's write order (last_task before the serialize
//! store) makes the last_task read on wake-up safe.

use weblinux_abi::{lock, RunnerRequest};

use crate::context::RunnerContext;
use crate::hostcall;

/// Park until woken; returns the task control was handed from.
pub(crate) fn park(ctx: &RunnerContext) -> i32 {
    loop {
        // Block while the slot reads zero.
        let _ = js_sys::Atomics::wait(&ctx.lock, lock::SERIALIZE, 0);
        match js_sys::Atomics::load(&ctx.lock, lock::SERIALIZE) {
            Ok(0) => continue, // spurious
            _ => break,
        }
    }
    // Re-arm for the next park, then read the hand-off payload.
    let _ = js_sys::Atomics::store(&ctx.lock, lock::SERIALIZE, 0);
    js_sys::Atomics::load(&ctx.lock, lock::LAST_TASK).unwrap_or(0)
}

/// Hand control to `to_task`'s runner and park; returns the task that
/// later hands control back here.
pub(crate) fn serialize_and_wait(ctx: &RunnerContext, from_task: u32, to_task: u32) -> i32 {
    hostcall::post(&RunnerRequest::Serialize { from_task, to_task });
    park(ctx)
}
