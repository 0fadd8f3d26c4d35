//! Runner spawn and teardown.
//!
//! A runner is a Web Worker executing the runner program. The controller
//! creates the shared buffers (lock block and the three messengers) before
//! the Worker starts, ships them in the init message, and keeps its own
//! views; every later request from that runner names only scalars.

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Worker};

use weblinux_abi::msg::wire;
use weblinux_abi::{call, lock, messenger};

use crate::messenger::MessengerView;
use crate::tasks::{RunnerId, TaskId};
use crate::util::console_log;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunnerKind {
    Primary,
    Secondary,
    Task,
}

/// Everything shipped alongside the init JSON.
pub(crate) struct InitParts<'a> {
    pub module: &'a JsValue,
    pub memory: &'a js_sys::WebAssembly::Memory,
    pub initrd: Option<&'a [u8]>,
    pub user_memory: Option<&'a js_sys::WebAssembly::Memory>,
}

/// Controller-side record of one live runner.
pub(crate) struct RunnerHandle {
    pub id: RunnerId,
    pub kind: RunnerKind,
    /// Task the runner currently hosts (idle task for secondaries).
    pub task: Option<TaskId>,
    /// Set when the runner reported a fatal error; dormant but intact.
    pub dormant: bool,
    pub worker: Worker,
    lock: js_sys::Int32Array,
    console_sab: js_sys::SharedArrayBuffer,
    net_sab: js_sys::SharedArrayBuffer,
    store_sab: js_sys::SharedArrayBuffer,
    // Kept alive for the worker's lifetime.
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(JsValue)>,
}

impl RunnerHandle {
    /// Spawn the Worker and ship it the init message. A failure anywhere
    /// tears the Worker down before any callback can fire.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        runner_url: &str,
        id: RunnerId,
        kind: RunnerKind,
        task: Option<TaskId>,
        init_json: &str,
        parts: InitParts<'_>,
        onmessage: Closure<dyn FnMut(MessageEvent)>,
        onerror: Closure<dyn FnMut(JsValue)>,
    ) -> Result<Self, JsValue> {
        let worker = Worker::new(runner_url)?;
        worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        let lock_sab = js_sys::SharedArrayBuffer::new(lock::BYTE_LEN);
        let console_sab = js_sys::SharedArrayBuffer::new(messenger::BYTE_LEN);
        let net_sab = js_sys::SharedArrayBuffer::new(messenger::BYTE_LEN);
        let store_sab = js_sys::SharedArrayBuffer::new(messenger::BYTE_LEN);

        let init = js_sys::Object::new();
        let set = |key: &str, value: &JsValue| js_sys::Reflect::set(&init, &key.into(), value);
        set(wire::JSON, &init_json.into())?;
        set(wire::MODULE, parts.module)?;
        set(wire::MEMORY, parts.memory.as_ref())?;
        set(wire::LOCK, lock_sab.as_ref())?;
        set(wire::CONSOLE, console_sab.as_ref())?;
        set(wire::NET, net_sab.as_ref())?;
        set(wire::STORE, store_sab.as_ref())?;
        if let Some(initrd) = parts.initrd {
            set(wire::INITRD, js_sys::Uint8Array::from(initrd).as_ref())?;
        }
        if let Some(user_memory) = parts.user_memory {
            set(wire::USER_MEMORY, user_memory.as_ref())?;
        }

        if let Err(err) = worker.post_message(&init) {
            // Scoped teardown: the runner never existed.
            worker.terminate();
            return Err(err);
        }

        console_log(&format!(
            "[controller] spawned runner {} ({:?}, task {:?})",
            id, kind, task
        ));

        Ok(Self {
            id,
            kind,
            task,
            dormant: false,
            worker,
            lock: js_sys::Int32Array::new(&lock_sab),
            console_sab,
            net_sab,
            store_sab,
            _onmessage: onmessage,
            _onerror: onerror,
        })
    }

    /// Hand control to this runner: write the previous task, then release
    /// the serialize slot, then notify. The order is the visibility
    /// guarantee for `last_task`.
    pub fn wake(&self, last_task: TaskId) {
        let _ = js_sys::Atomics::store(&self.lock, lock::LAST_TASK, last_task as i32);
        let _ = js_sys::Atomics::store(&self.lock, lock::SERIALIZE, 1);
        let _ = js_sys::Atomics::notify_with_count(&self.lock, lock::SERIALIZE, 1);
    }

    pub fn messenger(&self, family: call::Family) -> MessengerView {
        let sab = match family {
            call::Family::Console => &self.console_sab,
            call::Family::Net => &self.net_sab,
            call::Family::Store => &self.store_sab,
        };
        MessengerView::new(sab)
    }

    /// Forcibly terminate the Worker. Safe while the runner is parked in
    /// its serialize block: the block is a leaf of its work loop.
    pub fn terminate(&self) {
        self.worker.terminate();
        console_log(&format!("[controller] terminated runner {}", self.id));
    }
}
