//! The runner's explicitly-constructed context.
//!
//! Everything the host callbacks need lives here, behind one `Rc`; import
//! closures capture clones of it. There is deliberately no module-level
//! state: a runner is its context.

use std::cell::{Cell, RefCell};

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use weblinux_abi::msg::wire;
use weblinux_abi::{call, RunnerInit, UserTail};
use weblinux_syscall::Translator;

use crate::kernel::KernelExports;
use crate::user::UserExports;

pub(crate) struct RunnerContext {
    /// Parsed init message.
    pub init: RunnerInit,
    /// The kernel Wasm module (shared by every runner).
    pub module: js_sys::WebAssembly::Module,
    /// Shared kernel memory.
    pub memory: js_sys::WebAssembly::Memory,
    /// Lock block view (serialize slot + last_task cell).
    pub lock: js_sys::Int32Array,
    console: js_sys::Int32Array,
    net: js_sys::Int32Array,
    store: js_sys::Int32Array,
    /// Kernel exports, filled after instantiation.
    pub kernel: RefCell<Option<KernelExports>>,
    /// Task this runner hosts (0 for CPU runners until bound).
    pub current_task: Cell<u32>,
    /// Tail selector recorded by the kernel during the current syscall.
    pub pending_tail: Cell<Option<(UserTail, i32)>>,
    /// Program recorded by `load_user_program` for the next exec.
    pub pending_exec: RefCell<Option<weblinux_abi::UserProgram>>,
    /// The task's isolated user memory, when it has one.
    pub user_memory: RefCell<Option<js_sys::WebAssembly::Memory>>,
    /// User module exports of the currently running program.
    pub user: RefCell<Option<UserExports>>,
    /// Per-task translation boundary (user tasks only).
    pub translator: RefCell<Option<Translator>>,
}

impl RunnerContext {
    pub fn from_init(init: &JsValue) -> Result<Self, JsValue> {
        let json = js_sys::Reflect::get(init, &wire::JSON.into())?
            .as_string()
            .ok_or_else(|| JsValue::from_str("runner init without json"))?;
        let parsed: RunnerInit = serde_json::from_str(&json)
            .map_err(|e| JsValue::from_str(&format!("runner init parse: {}", e)))?;

        let module = js_sys::Reflect::get(init, &wire::MODULE.into())?
            .dyn_into::<js_sys::WebAssembly::Module>()?;
        let memory = js_sys::Reflect::get(init, &wire::MEMORY.into())?
            .dyn_into::<js_sys::WebAssembly::Memory>()?;
        let lock = js_sys::Reflect::get(init, &wire::LOCK.into())?
            .dyn_into::<js_sys::SharedArrayBuffer>()?;
        let console = js_sys::Reflect::get(init, &wire::CONSOLE.into())?
            .dyn_into::<js_sys::SharedArrayBuffer>()?;
        let net = js_sys::Reflect::get(init, &wire::NET.into())?
            .dyn_into::<js_sys::SharedArrayBuffer>()?;
        let store = js_sys::Reflect::get(init, &wire::STORE.into())?
            .dyn_into::<js_sys::SharedArrayBuffer>()?;
        // A thread runner shares its creator's user memory.
        let user_memory = js_sys::Reflect::get(init, &wire::USER_MEMORY.into())
            .ok()
            .and_then(|v| v.dyn_into::<js_sys::WebAssembly::Memory>().ok());

        Ok(Self {
            init: parsed,
            module,
            memory,
            lock: js_sys::Int32Array::new(&lock),
            console: js_sys::Int32Array::new(&console),
            net: js_sys::Int32Array::new(&net),
            store: js_sys::Int32Array::new(&store),
            kernel: RefCell::new(None),
            current_task: Cell::new(0),
            pending_tail: Cell::new(None),
            pending_exec: RefCell::new(None),
            user_memory: RefCell::new(user_memory),
            user: RefCell::new(None),
            translator: RefCell::new(None),
        })
    }

    pub fn messenger(&self, family: call::Family) -> &js_sys::Int32Array {
        match family {
            call::Family::Console => &self.console,
            call::Family::Net => &self.net,
            call::Family::Store => &self.store,
        }
    }

    /// Record a tail selection from the kernel.
    pub fn set_tail(&self, tail: UserTail, arg: i32) {
        self.pending_tail.set(Some((tail, arg)));
    }

    /// Consume the pending tail; absent means a normal return.
    pub fn take_tail(&self) -> Option<(UserTail, i32)> {
        self.pending_tail.take()
    }
}
