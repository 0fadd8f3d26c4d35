//! Runner side of the blocking host-call bridge.
//!
//! The runner stores the pending sentinel, posts the request, and waits on
//! the status slot. Because the controller writes the value slot before
//! the status slot, a non-pending status makes the value slot safe to
//! read without further ceremony.

use wasm_bindgen::JsCast;
use web_sys::DedicatedWorkerGlobalScope;

use weblinux_abi::msg::wire;
use weblinux_abi::{call, errno, messenger, RunnerRequest};

use crate::context::RunnerContext;
use crate::rlog;

/// Post a request to the controller, no attachment.
pub(crate) fn post(req: &RunnerRequest) {
    post_with(req, None)
}

/// Post a request with an attached structured-clone value.
pub(crate) fn post_with(req: &RunnerRequest, attachment: Option<&wasm_bindgen::JsValue>) {
    let json = match serde_json::to_string(req) {
        Ok(json) => json,
        Err(err) => {
            rlog(&format!("[runner] request encode failed: {}", err));
            return;
        }
    };
    let msg = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&msg, &wire::JSON.into(), &json.as_str().into());
    if let Some(attachment) = attachment {
        let _ = js_sys::Reflect::set(&msg, &wire::MEM.into(), attachment);
    }
    let scope: DedicatedWorkerGlobalScope = js_sys::global().unchecked_into();
    if let Err(err) = scope.post_message(&msg) {
        rlog(&format!("[runner] postMessage failed: {:?}", err));
    }
}

/// Issue a blocking host call on the given family's messenger and return
/// (status, value).
pub(crate) fn blocking_call(
    ctx: &RunnerContext,
    family: call::Family,
    req: &RunnerRequest,
) -> (i32, i32) {
    let view = ctx.messenger(family);
    if js_sys::Atomics::store(view, messenger::STATUS, messenger::PENDING).is_err() {
        return (call::ERR, 0);
    }
    post(req);
    loop {
        // Returns immediately with "not-equal" once the status moved on;
        // anything else is a wake (or a spurious one, so re-check).
        let _ = js_sys::Atomics::wait(view, messenger::STATUS, messenger::PENDING);
        match js_sys::Atomics::load(view, messenger::STATUS) {
            Ok(status) if status != messenger::PENDING => {
                let value = js_sys::Atomics::load(view, messenger::VALUE).unwrap_or(0);
                return (status, value);
            }
            Ok(_) => continue,
            Err(_) => return (call::ERR, 0),
        }
    }
}

/// Map a completed call onto the guest's return convention. `on_closed`
/// is the value for a remote-closed connection (0 for reads, meaning EOF,
/// and -EPIPE for writes).
pub(crate) fn guest_return(status: i32, value: i32, on_closed: i32) -> i32 {
    match status {
        call::OK => value,
        call::NOT_FOUND => -errno::ENOENT,
        call::REMOTE_CLOSED => on_closed,
        _ => -errno::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_return_maps_statuses() {
        assert_eq!(guest_return(call::OK, 42, 0), 42);
        assert_eq!(guest_return(call::ERR, 9, 0), -errno::EIO);
        assert_eq!(guest_return(call::NOT_FOUND, 0, 0), -errno::ENOENT);
        assert_eq!(guest_return(call::REMOTE_CLOSED, 0, 0), 0);
        assert_eq!(
            guest_return(call::REMOTE_CLOSED, 0, -errno::EPIPE),
            -errno::EPIPE
        );
    }
}
