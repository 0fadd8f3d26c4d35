//! Host logging.

use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

/// Write a line to the browser console.
pub(crate) fn console_log(msg: &str) {
    log(msg);
}

/// Write a line to the browser console and, when set, the embedding
/// page's log sink.
pub(crate) fn host_log(sink: Option<&js_sys::Function>, msg: &str) {
    log(msg);
    if let Some(sink) = sink {
        let _ = sink.call1(&JsValue::NULL, &JsValue::from_str(msg));
    }
}
