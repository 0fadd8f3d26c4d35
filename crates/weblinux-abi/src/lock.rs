//! Lock block layout: the per-runner cells behind the cooperative
//! serialize hand-off.
//!
//! A runner parks by waiting on [`SERIALIZE`] while it reads zero. The
//! waker stores the previous task id into [`LAST_TASK`], then stores
//! non-zero into [`SERIALIZE`] and notifies. The woken runner reads
//! [`LAST_TASK`] to complete the hand-off; the write order makes that read
//! safe.

/// Slot a runner blocks on awaiting its next turn. Non-zero iff the runner
/// is currently runnable on its own.
pub const SERIALIZE: u32 = 0;

/// Slot carrying, across a wake-up, the task control-block pointer of the
/// task from which control was handed.
pub const LAST_TASK: u32 = 1;

/// Number of i32 slots in a lock block.
pub const SLOTS: u32 = 2;

/// Byte length of a lock block buffer.
pub const BYTE_LEN: u32 = SLOTS * 4;
