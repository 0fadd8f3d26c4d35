//! Per-connection state.

use std::collections::VecDeque;

use weblinux_abi::poll;

pub type DataHandler = Box<dyn FnMut(&[u8])>;
pub type CloseHandler = Box<dyn FnMut()>;
pub type ErrorHandler = Box<dyn FnMut(&str)>;

/// One open logical connection.
///
/// Inbound payload is delivered to the registered data handler when there
/// is one, otherwise appended to the rope; registering a handler later
/// flushes the rope to it in order. A remote close or error marks the
/// record rather than destroying it: buffered bytes stay readable and the
/// guest observes the state through poll before issuing its own close.
pub struct Connection {
    buffered: VecDeque<u8>,
    closed: bool,
    error: Option<String>,
    on_data: Option<DataHandler>,
    on_close: Option<CloseHandler>,
    on_error: Option<ErrorHandler>,
    close_fired: bool,
}

impl Connection {
    pub(crate) fn new() -> Self {
        Self {
            buffered: VecDeque::new(),
            closed: false,
            error: None,
            on_data: None,
            on_close: None,
            on_error: None,
            close_fired: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Current poll status, in the order the guest driver expects:
    /// readable data wins over a close that has not been drained yet.
    pub fn poll(&self) -> i32 {
        if !self.buffered.is_empty() {
            poll::HAS_DATA
        } else if self.closed {
            poll::CLOSED
        } else if self.error.is_some() {
            poll::ERROR
        } else {
            poll::NO_DATA
        }
    }

    pub(crate) fn push_data(&mut self, data: &[u8]) {
        if let Some(handler) = self.on_data.as_mut() {
            handler(data);
        } else {
            self.buffered.extend(data.iter().copied());
        }
    }

    /// Drain up to `max` buffered bytes.
    pub(crate) fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buffered.len());
        self.buffered.drain(..n).collect()
    }

    pub(crate) fn set_data_handler(&mut self, mut handler: DataHandler) {
        if !self.buffered.is_empty() {
            let pending: Vec<u8> = self.buffered.drain(..).collect();
            handler(&pending);
        }
        self.on_data = Some(handler);
    }

    pub(crate) fn set_close_handler(&mut self, handler: CloseHandler) {
        self.on_close = Some(handler);
    }

    pub(crate) fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.on_error = Some(handler);
    }

    /// Mark closed and fire the close handler; idempotent.
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
        if !self.close_fired {
            self.close_fired = true;
            if let Some(handler) = self.on_close.as_mut() {
                handler();
            }
        }
    }

    pub(crate) fn mark_errored(&mut self, msg: &str) {
        self.error = Some(msg.to_string());
        if let Some(handler) = self.on_error.as_mut() {
            handler(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn rope_flushes_in_order_on_handler_registration() {
        let mut conn = Connection::new();
        conn.push_data(b"first ");
        conn.push_data(b"second");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        conn.set_data_handler(Box::new(move |bytes| {
            sink.borrow_mut().extend_from_slice(bytes);
        }));
        assert_eq!(seen.borrow().as_slice(), b"first second");

        // Later data bypasses the rope.
        conn.push_data(b"!");
        assert_eq!(seen.borrow().as_slice(), b"first second!");
        assert_eq!(conn.buffered_len(), 0);
    }

    #[test]
    fn close_handler_fires_exactly_once() {
        let mut conn = Connection::new();
        let fired = Rc::new(RefCell::new(0u32));
        let counter = fired.clone();
        conn.set_close_handler(Box::new(move || *counter.borrow_mut() += 1));

        conn.mark_closed();
        conn.mark_closed();
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn poll_prefers_buffered_data_over_close() {
        let mut conn = Connection::new();
        assert_eq!(conn.poll(), poll::NO_DATA);
        conn.push_data(b"x");
        conn.mark_closed();
        assert_eq!(conn.poll(), poll::HAS_DATA);
        conn.take(1);
        assert_eq!(conn.poll(), poll::CLOSED);
    }
}
