//! Console input queue and output routing.
//!
//! Input injected by the page is buffered until the guest issues a console
//! read; a read with nothing buffered parks the caller (the runner stays
//! blocked on its messenger) until the next key arrives. Output is pushed
//! straight to the page's console writer, buffered only while no writer is
//! registered yet.

use std::collections::VecDeque;

/// A guest console read waiting for input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ConsoleWait {
    pub runner: u32,
    /// Destination in kernel memory.
    pub buf: u32,
    pub count: u32,
}

#[derive(Default)]
pub(crate) struct ConsoleQueue {
    input: VecDeque<u8>,
    waiter: Option<ConsoleWait>,
}

impl ConsoleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject page input. Returns the completion to perform when a read
    /// was parked.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Option<(ConsoleWait, Vec<u8>)> {
        self.input.extend(bytes.iter().copied());
        let wait = self.waiter?;
        if self.input.is_empty() {
            return None;
        }
        self.waiter = None;
        Some((wait, self.take(wait.count)))
    }

    /// A guest read arrived. Completes immediately when input is buffered,
    /// otherwise parks. A second read while one is parked replaces it;
    /// tasks do not re-enter themselves, so this only happens after a
    /// runner died mid-wait.
    pub fn begin_read(&mut self, wait: ConsoleWait) -> Option<(ConsoleWait, Vec<u8>)> {
        if self.input.is_empty() {
            self.waiter = Some(wait);
            None
        } else {
            Some((wait, self.take(wait.count)))
        }
    }

    /// Reap a parked read whose runner died.
    pub fn drop_waiter_of(&mut self, runner: u32) {
        if self.waiter.map(|w| w.runner) == Some(runner) {
            self.waiter = None;
        }
    }

    fn take(&mut self, max: u32) -> Vec<u8> {
        let n = (max as usize).min(self.input.len());
        self.input.drain(..n).collect()
    }
}

/// Console output side: page writer callback plus the pre-registration
/// buffer.
pub(crate) struct ConsolePort {
    writer: Option<js_sys::Function>,
    buffered: Vec<String>,
}

impl ConsolePort {
    pub fn new(writer: Option<js_sys::Function>) -> Self {
        Self {
            writer,
            buffered: Vec::new(),
        }
    }

    pub fn set_writer(&mut self, writer: js_sys::Function) {
        for text in self.buffered.drain(..) {
            let _ = writer.call1(&wasm_bindgen::JsValue::NULL, &text.as_str().into());
        }
        self.writer = Some(writer);
    }

    pub fn write(&mut self, text: &str) {
        match &self.writer {
            Some(writer) => {
                let _ = writer.call1(&wasm_bindgen::JsValue::NULL, &text.into());
            }
            None => self.buffered.push(text.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_input_completes_read_immediately() {
        let mut q = ConsoleQueue::new();
        assert!(q.push_bytes(b"ls\n").is_none());

        let wait = ConsoleWait {
            runner: 1,
            buf: 0x100,
            count: 2,
        };
        let (w, bytes) = q.begin_read(wait).expect("immediate completion");
        assert_eq!(w, wait);
        assert_eq!(bytes, b"ls");

        // The remainder stays queued for the next read.
        let (_, rest) = q
            .begin_read(ConsoleWait {
                runner: 1,
                buf: 0x100,
                count: 8,
            })
            .unwrap();
        assert_eq!(rest, b"\n");
    }

    #[test]
    fn empty_queue_parks_until_input() {
        let mut q = ConsoleQueue::new();
        let wait = ConsoleWait {
            runner: 2,
            buf: 0x200,
            count: 16,
        };
        assert!(q.begin_read(wait).is_none());

        let (w, bytes) = q.push_bytes(b"x").expect("wakes the parked read");
        assert_eq!(w.runner, 2);
        assert_eq!(bytes, b"x");

        // Waiter consumed; further input just buffers.
        assert!(q.push_bytes(b"y").is_none());
    }

    #[test]
    fn dead_runner_waiter_is_reaped_silently() {
        let mut q = ConsoleQueue::new();
        q.begin_read(ConsoleWait {
            runner: 3,
            buf: 0,
            count: 1,
        });
        q.drop_waiter_of(3);
        assert!(q.push_bytes(b"z").is_none());
    }
}
