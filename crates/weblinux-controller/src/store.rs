//! Persistence backend bindings.
//!
//! The record store itself lives on the page (an IndexedDB-backed
//! `PersistStore` namespace). The controller starts an operation with a
//! request id and the page calls back into `Controller::on_store_result`
//! when the transaction settles, so the store's own asynchrony never leaks
//! into the blocking bridge.
//!
//! Backend contract: path-keyed records carrying bytes plus mode, owner,
//! group and mtime metadata, a small metadata key-value pair store beside
//! them, and save / load / delete / listByPrefix / exists / totalSize /
//! clear / exportAll / importAll entry points. The runtime core drives
//! only save, load, delete, list and the metadata pair.

use wasm_bindgen::prelude::*;

use crate::tasks::RunnerId;

#[wasm_bindgen]
extern "C" {
    /// PersistStore JavaScript namespace (IndexedDB persistence).
    #[wasm_bindgen(js_namespace = PersistStore, js_name = init)]
    pub(crate) fn store_init();

    #[wasm_bindgen(js_namespace = PersistStore, js_name = startSave)]
    pub(crate) fn start_save(request_id: u32, path: &str, data: &[u8], mode: u32);

    #[wasm_bindgen(js_namespace = PersistStore, js_name = startLoad)]
    pub(crate) fn start_load(request_id: u32, path: &str);

    #[wasm_bindgen(js_namespace = PersistStore, js_name = startDelete)]
    pub(crate) fn start_delete(request_id: u32, path: &str);

    #[wasm_bindgen(js_namespace = PersistStore, js_name = startList)]
    pub(crate) fn start_list(request_id: u32, prefix: &str);

    /// Metadata pair store, unrelated to any path.
    #[wasm_bindgen(js_namespace = PersistStore, js_name = metaSet)]
    pub(crate) fn meta_set(key: &str, value: &str);

    #[wasm_bindgen(js_namespace = PersistStore, js_name = metaGet)]
    pub(crate) fn meta_get(key: &str) -> JsValue;
}

/// A store call awaiting its backend completion.
#[derive(Clone, Copy, Debug)]
pub(crate) enum StoreWait {
    /// Save and delete complete with status only.
    Ack { runner: RunnerId },
    /// Load and list copy payload back into kernel memory first.
    Fill {
        runner: RunnerId,
        buf: u32,
        count: u32,
    },
}

impl StoreWait {
    pub fn runner(&self) -> RunnerId {
        match self {
            StoreWait::Ack { runner } => *runner,
            StoreWait::Fill { runner, .. } => *runner,
        }
    }
}

/// Cap a backend payload to the guest's buffer length.
pub(crate) fn clamp_payload(data: &[u8], count: u32) -> &[u8] {
    &data[..data.len().min(count as usize)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respects_buffer_length() {
        let joined = b"/home/u/a\n/home/u/b";
        assert_eq!(clamp_payload(joined, 64), joined.as_slice());
        assert_eq!(clamp_payload(joined, 9), b"/home/u/a".as_slice());
        assert_eq!(clamp_payload(joined, 0), b"".as_slice());
    }
}
