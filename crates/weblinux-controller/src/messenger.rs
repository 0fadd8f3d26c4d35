//! Controller side of the blocking host-call bridge.
//!
//! Completion order is the whole contract: every result slot is written
//! before the status slot, and the waiter is notified only after the
//! status store. A runner that wakes on a non-pending status may therefore
//! read the value slot without further synchronization.

use weblinux_abi::messenger;

use crate::util::console_log;

/// View over one messenger's `SharedArrayBuffer`.
pub(crate) struct MessengerView {
    view: js_sys::Int32Array,
}

impl MessengerView {
    pub fn new(buffer: &js_sys::SharedArrayBuffer) -> Self {
        Self {
            view: js_sys::Int32Array::new(buffer),
        }
    }

    /// Complete the in-flight call: value first, status last, then wake
    /// one waiter.
    pub fn complete(&self, status: i32, value: i32) {
        if let Err(err) = self.try_complete(status, value) {
            console_log(&format!("[controller] messenger completion failed: {:?}", err));
        }
    }

    fn try_complete(&self, status: i32, value: i32) -> Result<(), wasm_bindgen::JsValue> {
        js_sys::Atomics::store(&self.view, messenger::VALUE, value)?;
        js_sys::Atomics::store(&self.view, messenger::STATUS, status)?;
        js_sys::Atomics::notify_with_count(&self.view, messenger::STATUS, 1)?;
        Ok(())
    }
}
