//! Protocol constants and shared message types for weblinux
//!
//! This crate is the **single source of truth** for everything the
//! controller (main thread) and the runners (Workers) must agree on:
//!
//! - **Messenger layout**: the shared `Int32Array` used as a blocking
//!   request/response channel for host calls (console, network, store).
//! - **Lock block layout**: the per-runner cells used for the cooperative
//!   serialize hand-off.
//! - **Status codes** shared by every host-call family, and the poll
//!   statuses the network driver sees.
//! - **Tail codes** the kernel uses to steer the user-mode return path.
//! - **Module names**: the import/export surface of the kernel and user
//!   Wasm modules.
//! - **Message enums**: the JSON messages exchanged between runners and
//!   the controller, as tagged serde types with exhaustive payloads.
//!
//! # Host-call protocol
//!
//! | Slot | Field |
//! |------|-------|
//! | 0 | status (−1 = pending, else a `call` status code) |
//! | 1 | value (numeric payload: bytes transferred, connection id, …) |
//!
//! The runner stores −1 into the status slot, posts the request to the
//! controller, and waits on the status slot. The controller writes the
//! value slot first and the status slot **last**, then notifies one waiter.

#![no_std]

extern crate alloc;

pub mod call;
pub mod lock;
pub mod messenger;
pub mod msg;
pub mod names;
pub mod poll;
pub mod tail;

pub use msg::{ConsoleOp, NetOp, RunnerInit, RunnerRequest, StoreOp, UserProgram, UserRunMode};
pub use tail::UserTail;

/// Errno values the runtime itself produces. The guest kernel owns its own
/// errno mapping; these cover only host-surfaced failures.
pub mod errno {
    /// No such file or directory
    pub const ENOENT: i32 = 2;
    /// I/O error
    pub const EIO: i32 = 5;
    /// Resource temporarily unavailable
    pub const EAGAIN: i32 = 11;
    /// Out of memory (scratch overflow)
    pub const ENOMEM: i32 = 12;
    /// Invalid argument (oversized vector count)
    pub const EINVAL: i32 = 22;
    /// Broken pipe (write to a remotely closed connection)
    pub const EPIPE: i32 = 32;
    /// Bad address (untranslatable pointer, unterminated string)
    pub const EFAULT: i32 = 14;
    /// Function not implemented
    pub const ENOSYS: i32 = 38;

    /// Return value bound to every unsatisfied syscall-prefixed import.
    pub const ENOSYS_RET: i32 = -(ENOSYS);
}

/// Sentinel error markers thrown through Wasm frames to unwind a runner.
///
/// A host callback throws one of these as a JS error message; the runner's
/// top-level (or the user-mode loop) catches it and matches by prefix.
/// Anything else that unwinds is a genuine fault.
pub mod sentinel {
    /// Kernel panic: leaves the runner dormant but intact.
    pub const PANIC: &str = "weblinux-panic";
    /// Process replacement: abort the current user module, instantiate the
    /// one the kernel pre-loaded.
    pub const EXEC: &str = "weblinux-exec";
    /// Signal return: unwind the in-flight signal handler invocation.
    pub const SIGRETURN: &str = "weblinux-sigreturn";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enosys_return_is_negative_errno() {
        assert_eq!(errno::ENOSYS_RET, -38);
    }

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(sentinel::PANIC, sentinel::EXEC);
        assert_ne!(sentinel::EXEC, sentinel::SIGRETURN);
    }
}
