//! Poll statuses reported to the guest network driver.
//!
//! These are the values the in-guest `lwtcp`-style tooling switches on, so
//! they are wire-stable.

/// No payload buffered for this connection.
pub const NO_DATA: i32 = 0;

/// At least one byte is buffered and readable.
pub const HAS_DATA: i32 = 1;

/// The connection ended; buffered payload (if any) has been drained.
pub const CLOSED: i32 = 2;

/// The connection faulted; the error was reported once.
pub const ERROR: i32 = 3;
