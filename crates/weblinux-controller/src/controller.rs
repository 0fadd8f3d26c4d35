//! The controller: runner catalogue, message dispatch, host-call
//! completion.
//!
//! The controller is single-threaded; every mutation goes through one
//! `Rc<RefCell<Inner>>` that the Worker and WebSocket callbacks capture.
//! Callbacks are delivered from the event loop, never re-entrantly, so a
//! borrow is always available.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, WebSocket};

use weblinux_abi::msg::wire;
use weblinux_abi::{call, ConsoleOp, NetOp, RunnerInit, RunnerRequest, StoreOp};
use weblinux_relay::{RelayClient, RelayConfig, RelayError, RelayEvent};

use crate::config::RuntimeConfig;
use crate::console::{ConsolePort, ConsoleQueue, ConsoleWait};
use crate::mem::KernelMem;
use crate::net::WsChannel;
use crate::runner::{InitParts, RunnerHandle, RunnerKind};
use crate::store::{self, StoreWait};
use crate::tasks::{RunnerId, TaskId, TaskTable};
use crate::util::{console_log, host_log};

pub(crate) struct Inner {
    runner_url: String,
    module: JsValue,
    kmem: KernelMem,
    cmdline: String,
    initrd: Vec<u8>,
    cfg: RuntimeConfig,
    log_sink: Option<js_sys::Function>,
    console_out: ConsolePort,
    console_in: ConsoleQueue,
    runners: HashMap<RunnerId, RunnerHandle>,
    tasks: TaskTable,
    /// User memories of fresh processes, kept so later threads can share.
    user_memories: HashMap<TaskId, js_sys::WebAssembly::Memory>,
    relay: Option<RelayClient<WsChannel>>,
    /// Relay connection id → runner whose open is in flight.
    net_waits: HashMap<u32, RunnerId>,
    /// Store request id → waiting call.
    store_waits: HashMap<u32, StoreWait>,
    next_store_req: u32,
    store_ready: bool,
    /// Keeps the relay maintenance interval alive.
    _tick_closure: Option<Closure<dyn FnMut()>>,
    /// Keeps the WebSocket event closures alive.
    _ws_closures: Vec<Closure<dyn FnMut(JsValue)>>,
}

impl Inner {
    fn log(&self, msg: &str) {
        host_log(self.log_sink.as_ref(), msg);
    }

    fn complete(&self, runner: RunnerId, family: call::Family, status: i32, value: i32) {
        match self.runners.get(&runner) {
            Some(handle) => handle.messenger(family).complete(status, value),
            None => {
                // The runner died while its call was in flight; reap
                // without notifying anyone.
                console_log(&format!(
                    "[controller] dropping completion for dead runner {}",
                    runner
                ));
            }
        }
    }

    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

/// The embedding-page entry point.
#[wasm_bindgen]
pub struct Controller {
    inner: Rc<RefCell<Inner>>,
}

#[wasm_bindgen]
impl Controller {
    /// Create the controller: shared kernel memory plus the catalogues.
    /// `kernel_module` is the compiled kernel `WebAssembly.Module`; the
    /// runner program at `runner_url` is loaded into every Worker.
    #[wasm_bindgen(constructor)]
    pub fn new(
        runner_url: String,
        kernel_module: JsValue,
        cmdline: String,
        initrd: Vec<u8>,
        log_sink: Option<js_sys::Function>,
        console_writer: Option<js_sys::Function>,
    ) -> Result<Controller, JsValue> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let cfg = RuntimeConfig::default();
        let memory = create_shared_memory(cfg.kernel_memory_pages, cfg.kernel_memory_max_pages)?;

        let inner = Inner {
            runner_url,
            module: kernel_module,
            kmem: KernelMem::new(memory),
            cmdline,
            initrd,
            cfg,
            log_sink,
            console_out: ConsolePort::new(console_writer),
            console_in: ConsoleQueue::new(),
            runners: HashMap::new(),
            tasks: TaskTable::new(),
            user_memories: HashMap::new(),
            relay: None,
            net_waits: HashMap::new(),
            store_waits: HashMap::new(),
            next_store_req: 1,
            store_ready: false,
            _tick_closure: None,
            _ws_closures: Vec::new(),
        };
        Ok(Controller {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    /// Boot: spawn the primary CPU runner.
    pub fn start(&self) -> Result<(), JsValue> {
        if !self.inner.borrow().runners.is_empty() {
            return Err(JsValue::from_str("runtime already started"));
        }
        let cmdline = self.inner.borrow().cmdline.clone();
        spawn_runner(
            &self.inner,
            RunnerKind::Primary,
            None,
            &RunnerInit::Primary { cmdline },
            None,
        )?;
        Ok(())
    }

    /// Inject key input from the page.
    pub fn send_key(&self, text: String) {
        let completion = self.inner.borrow_mut().console_in.push_bytes(text.as_bytes());
        if let Some((wait, bytes)) = completion {
            complete_console_read(&self.inner, wait, &bytes);
        }
    }

    /// Register (or replace) the console writer; buffered output flushes
    /// to it.
    pub fn set_console_writer(&self, writer: js_sys::Function) {
        self.inner.borrow_mut().console_out.set_writer(writer);
    }

    /// Configure and dial the network relay. `options` may carry `token`,
    /// `openTimeoutMs` and `maxConnections`.
    pub fn init_network(&self, url: String, options: JsValue) -> Result<(), JsValue> {
        init_network(&self.inner, url, options)
    }

    /// Bring up the persistence backend bindings.
    pub fn init_persistence(&self) {
        store::store_init();
        let mut inner = self.inner.borrow_mut();
        inner.store_ready = true;
        inner.log("[controller] persistence store ready");
    }

    /// Backend completion for a store operation started earlier.
    /// `status` uses the uniform host-call codes; `data` carries load
    /// payloads and newline-joined list output.
    pub fn on_store_result(&self, request_id: u32, status: i32, value: i32, data: Option<Vec<u8>>) {
        on_store_result(&self.inner, request_id, status, value, data);
    }

    /// Relay maintenance: expire pending opens. Driven by an internal
    /// interval once the relay is up; also callable by the page.
    pub fn tick(&self) {
        let events = {
            let mut inner = self.inner.borrow_mut();
            let now = inner.now_ms();
            match inner.relay.as_mut() {
                Some(relay) => relay.expire_pending(now),
                None => Vec::new(),
            }
        };
        apply_relay_events(&self.inner, events);
    }

    /// Number of tasks in the catalogue.
    pub fn task_count(&self) -> u32 {
        self.inner.borrow().tasks.len() as u32
    }

    /// The init task pointer reported at boot; 0 before boot completes.
    pub fn init_task(&self) -> u32 {
        self.inner.borrow().tasks.init_task().unwrap_or(0)
    }

    /// Metadata pair on the persistence backend, for the page and for
    /// boot bookkeeping.
    pub fn meta_set(&self, key: String, value: String) {
        store::meta_set(&key, &value);
    }

    pub fn meta_get(&self, key: String) -> Option<String> {
        store::meta_get(&key).as_string()
    }
}

fn create_shared_memory(initial: u32, maximum: u32) -> Result<js_sys::WebAssembly::Memory, JsValue> {
    let desc = js_sys::Object::new();
    js_sys::Reflect::set(&desc, &"initial".into(), &initial.into())?;
    js_sys::Reflect::set(&desc, &"maximum".into(), &maximum.into())?;
    js_sys::Reflect::set(&desc, &"shared".into(), &true.into())?;
    js_sys::WebAssembly::Memory::new(&desc)
}

/// Spawn a runner of the given kind and record it.
fn spawn_runner(
    rc: &Rc<RefCell<Inner>>,
    kind: RunnerKind,
    task: Option<TaskId>,
    init: &RunnerInit,
    user_memory: Option<js_sys::WebAssembly::Memory>,
) -> Result<RunnerId, JsValue> {
    let init_json = serde_json::to_string(init)
        .map_err(|e| JsValue::from_str(&format!("init encode: {}", e)))?;

    let (id, runner_url, module, memory, initrd) = {
        let mut inner = rc.borrow_mut();
        let id = inner.tasks.alloc_runner_id();
        let initrd = match kind {
            RunnerKind::Primary => Some(inner.initrd.clone()),
            _ => None,
        };
        (
            id,
            inner.runner_url.clone(),
            inner.module.clone(),
            inner.kmem.memory().clone(),
            initrd,
        )
    };

    let onmessage = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move |event: MessageEvent| {
            dispatch_runner_event(&rc, id, event);
        }) as Box<dyn FnMut(MessageEvent)>)
    };
    let onerror = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move |event: JsValue| {
            let msg = js_sys::Reflect::get(&event, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
                .unwrap_or_else(|| "unknown error".to_string());
            rc.borrow().log(&format!("[controller] runner {} error: {}", id, msg));
        }) as Box<dyn FnMut(JsValue)>)
    };

    let handle = RunnerHandle::spawn(
        &runner_url,
        id,
        kind,
        task,
        &init_json,
        InitParts {
            module: &module,
            memory: &memory,
            initrd: initrd.as_deref(),
            user_memory: user_memory.as_ref(),
        },
        onmessage,
        onerror,
    )?;

    let mut inner = rc.borrow_mut();
    if let Some(task) = task {
        inner.tasks.bind(task, id);
    }
    inner.runners.insert(id, handle);
    Ok(id)
}

/// Parse and dispatch one message from a runner.
fn dispatch_runner_event(rc: &Rc<RefCell<Inner>>, runner_id: RunnerId, event: MessageEvent) {
    let data = event.data();
    let json = match js_sys::Reflect::get(&data, &wire::JSON.into())
        .ok()
        .and_then(|v| v.as_string())
    {
        Some(json) => json,
        None => {
            console_log(&format!(
                "[controller] runner {} sent a message without json",
                runner_id
            ));
            return;
        }
    };
    let request: RunnerRequest = match serde_json::from_str(&json) {
        Ok(request) => request,
        Err(err) => {
            rc.borrow().log(&format!(
                "[controller] unparseable request from runner {}: {}",
                runner_id, err
            ));
            return;
        }
    };
    let attachment = js_sys::Reflect::get(&data, &wire::MEM.into()).ok();
    handle_request(rc, runner_id, request, attachment);
}

fn handle_request(
    rc: &Rc<RefCell<Inner>>,
    runner_id: RunnerId,
    request: RunnerRequest,
    attachment: Option<JsValue>,
) {
    match request {
        RunnerRequest::StartPrimary { init_task } => {
            let mut inner = rc.borrow_mut();
            inner.tasks.set_init_task(init_task);
            inner.tasks.bind(init_task, runner_id);
            if let Some(handle) = inner.runners.get_mut(&runner_id) {
                handle.task = Some(init_task);
            }
            inner.log(&format!(
                "[controller] primary up, init_task={:#x}",
                init_task
            ));
        }
        RunnerRequest::StartSecondary {
            stack_ptr,
            idle_task,
        } => {
            let result = spawn_runner(
                rc,
                RunnerKind::Secondary,
                Some(idle_task),
                &RunnerInit::Secondary {
                    stack_ptr,
                    idle_task,
                },
                None,
            );
            if let Err(err) = result {
                rc.borrow()
                    .log(&format!("[controller] secondary spawn failed: {:?}", err));
            }
        }
        RunnerRequest::CreateAndRunTask {
            prev_task,
            task,
            user,
        } => {
            // The scratch window size is host configuration; the kernel
            // only names the base.
            let scratch_size = rc.borrow().cfg.scratch_size;
            let user = user.map(|mut u| {
                u.scratch_size = scratch_size;
                u
            });
            let user_memory = user
                .as_ref()
                .and_then(|u| u.memory_of)
                .and_then(|creator| rc.borrow().user_memories.get(&creator).cloned());
            let result = spawn_runner(
                rc,
                RunnerKind::Task,
                Some(task),
                &RunnerInit::Task {
                    prev_task,
                    task,
                    user,
                },
                user_memory,
            );
            if let Err(err) = result {
                rc.borrow()
                    .log(&format!("[controller] task spawn failed: {:?}", err));
            }
        }
        RunnerRequest::Serialize { from_task, to_task } => {
            let inner = rc.borrow();
            match inner
                .tasks
                .runner_of(to_task)
                .and_then(|rid| inner.runners.get(&rid))
            {
                Some(target) => target.wake(from_task),
                None => inner.log(&format!(
                    "[controller] serialize to unknown task {:#x}",
                    to_task
                )),
            }
        }
        RunnerRequest::ReleaseTask { task } => {
            let mut inner = rc.borrow_mut();
            match inner.tasks.release(task) {
                Some(rid) => {
                    if let Some(handle) = inner.runners.remove(&rid) {
                        handle.terminate();
                    }
                    // Reap anything that runner still had in flight.
                    inner.net_waits.retain(|_, r| *r != rid);
                    inner.store_waits.retain(|_, w| w.runner() != rid);
                    inner.console_in.drop_waiter_of(rid);
                    inner.user_memories.remove(&task);
                    inner.log(&format!("[controller] released task {:#x}", task));
                }
                None => inner.log(&format!(
                    "[controller] release of unknown task {:#x}",
                    task
                )),
            }
        }
        RunnerRequest::RegisterUserMemory { task } => {
            let memory = attachment.and_then(|v| v.dyn_into::<js_sys::WebAssembly::Memory>().ok());
            let mut inner = rc.borrow_mut();
            match memory {
                Some(memory) => {
                    inner.user_memories.insert(task, memory);
                }
                None => inner.log(&format!(
                    "[controller] runner {} registered user memory without a buffer",
                    runner_id
                )),
            }
        }
        RunnerRequest::StackTrace { text } => {
            rc.borrow().log(&format!("[controller] kernel stack:\n{}", text));
        }
        RunnerRequest::Fatal { message } => {
            let mut inner = rc.borrow_mut();
            if let Some(handle) = inner.runners.get_mut(&runner_id) {
                handle.dormant = true;
            }
            inner.log(&format!(
                "[controller] runner {} is dormant: {}",
                runner_id, message
            ));
        }
        RunnerRequest::Console { op } => handle_console(rc, runner_id, op),
        RunnerRequest::Net { op } => handle_net(rc, runner_id, op),
        RunnerRequest::Store { op } => handle_store(rc, runner_id, op),
    }
}

fn handle_console(rc: &Rc<RefCell<Inner>>, runner_id: RunnerId, op: ConsoleOp) {
    match op {
        ConsoleOp::Put { buf, len } => {
            let mut inner = rc.borrow_mut();
            match inner.kmem.read(buf, len) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    inner.console_out.write(&text);
                    inner.complete(runner_id, call::Family::Console, call::OK, len as i32);
                }
                Err(err) => {
                    inner.log(&format!("[controller] console write fault: {:?}", err));
                    inner.complete(runner_id, call::Family::Console, call::ERR, 0);
                }
            }
        }
        ConsoleOp::Get { buf, count } => {
            let completion = rc.borrow_mut().console_in.begin_read(ConsoleWait {
                runner: runner_id,
                buf,
                count,
            });
            if let Some((wait, bytes)) = completion {
                complete_console_read(rc, wait, &bytes);
            }
        }
    }
}

fn complete_console_read(rc: &Rc<RefCell<Inner>>, wait: ConsoleWait, bytes: &[u8]) {
    let inner = rc.borrow();
    match inner.kmem.write(wait.buf, bytes) {
        Ok(()) => inner.complete(
            wait.runner,
            call::Family::Console,
            call::OK,
            bytes.len() as i32,
        ),
        Err(err) => {
            inner.log(&format!("[controller] console read fault: {:?}", err));
            inner.complete(wait.runner, call::Family::Console, call::ERR, 0);
        }
    }
}

fn handle_net(rc: &Rc<RefCell<Inner>>, runner_id: RunnerId, op: NetOp) {
    let mut inner = rc.borrow_mut();
    let inner = &mut *inner;
    let Some(relay) = inner.relay.as_mut() else {
        inner.log("[controller] network call without a relay configured");
        inner.complete(runner_id, call::Family::Net, call::ERR, 0);
        return;
    };

    match op {
        NetOp::Open { host, port } => {
            let now = js_sys::Date::now() as u64;
            match relay.open(&host, port, now) {
                Ok(id) => {
                    // Completed later by `opened`/`error`/timeout.
                    inner.net_waits.insert(id, runner_id);
                }
                Err(err) => {
                    inner.log(&format!(
                        "[controller] open {}:{} failed: {}",
                        host, port, err
                    ));
                    inner.complete(runner_id, call::Family::Net, call::ERR, 0);
                }
            }
        }
        NetOp::Write { id, buf, len } => {
            let (status, value) = match inner.kmem.read(buf, len) {
                Ok(bytes) => net_status(relay.write(id, &bytes).map(|n| n as i32)),
                Err(_) => (call::ERR, 0),
            };
            inner.complete(runner_id, call::Family::Net, status, value);
        }
        NetOp::Read { id, buf, count } => {
            let (status, value) = match relay.read(id, count as usize) {
                Ok(bytes) => match inner.kmem.write(buf, &bytes) {
                    Ok(()) => (call::OK, bytes.len() as i32),
                    Err(_) => (call::ERR, 0),
                },
                Err(err) => net_status(Err::<i32, _>(err)),
            };
            inner.complete(runner_id, call::Family::Net, status, value);
        }
        NetOp::Poll { id } => {
            let status = relay.poll(id);
            inner.complete(runner_id, call::Family::Net, call::OK, status);
        }
        NetOp::Close { id } => {
            let (status, value) = net_status(relay.close(id).map(|_| 0));
            inner.complete(runner_id, call::Family::Net, status, value);
        }
    }
}

fn net_status(outcome: Result<i32, RelayError>) -> (i32, i32) {
    match outcome {
        Ok(value) => (call::OK, value),
        Err(RelayError::ConnectionClosed(_)) => (call::REMOTE_CLOSED, 0),
        Err(_) => (call::ERR, 0),
    }
}

fn handle_store(rc: &Rc<RefCell<Inner>>, runner_id: RunnerId, op: StoreOp) {
    let mut inner = rc.borrow_mut();
    if !inner.store_ready {
        inner.log("[controller] store call before init_persistence");
        inner.complete(runner_id, call::Family::Store, call::ERR, 0);
        return;
    }

    let request_id = inner.next_store_req;
    inner.next_store_req = inner.next_store_req.wrapping_add(1).max(1);

    match op {
        StoreOp::Save {
            path,
            buf,
            len,
            mode,
        } => {
            let bytes = match inner.kmem.read(buf, len) {
                Ok(bytes) => bytes,
                Err(_) => {
                    inner.complete(runner_id, call::Family::Store, call::ERR, 0);
                    return;
                }
            };
            inner
                .store_waits
                .insert(request_id, StoreWait::Ack { runner: runner_id });
            store::start_save(request_id, &path, &bytes, mode);
        }
        StoreOp::Load { path, buf, count } => {
            inner.store_waits.insert(
                request_id,
                StoreWait::Fill {
                    runner: runner_id,
                    buf,
                    count,
                },
            );
            store::start_load(request_id, &path);
        }
        StoreOp::Delete { path } => {
            inner
                .store_waits
                .insert(request_id, StoreWait::Ack { runner: runner_id });
            store::start_delete(request_id, &path);
        }
        StoreOp::List { prefix, buf, count } => {
            inner.store_waits.insert(
                request_id,
                StoreWait::Fill {
                    runner: runner_id,
                    buf,
                    count,
                },
            );
            store::start_list(request_id, &prefix);
        }
    }
}

fn on_store_result(
    rc: &Rc<RefCell<Inner>>,
    request_id: u32,
    status: i32,
    value: i32,
    data: Option<Vec<u8>>,
) {
    let mut inner = rc.borrow_mut();
    let wait = match inner.store_waits.remove(&request_id) {
        Some(wait) => wait,
        None => {
            // Originating runner died; reaped already.
            console_log(&format!(
                "[controller] store result for unknown request {}",
                request_id
            ));
            return;
        }
    };
    match wait {
        StoreWait::Ack { runner } => {
            inner.complete(runner, call::Family::Store, status, value);
        }
        StoreWait::Fill { runner, buf, count } => {
            if status != call::OK {
                inner.complete(runner, call::Family::Store, status, 0);
                return;
            }
            let data = data.unwrap_or_default();
            let clamped = store::clamp_payload(&data, count);
            match inner.kmem.write(buf, clamped) {
                Ok(()) => inner.complete(
                    runner,
                    call::Family::Store,
                    call::OK,
                    clamped.len() as i32,
                ),
                Err(_) => inner.complete(runner, call::Family::Store, call::ERR, 0),
            }
        }
    }
}

// ============================================================================
// Relay channel wiring
// ============================================================================

fn init_network(rc: &Rc<RefCell<Inner>>, url: String, options: JsValue) -> Result<(), JsValue> {
    {
        let mut inner = rc.borrow_mut();
        // Single-flight at the controller too: a live or in-flight channel
        // wins over a second init.
        if let Some(existing) = inner.relay.as_ref() {
            if existing.state() != weblinux_relay::ChannelState::Down {
                inner.log("[controller] relay already configured");
                return Ok(());
            }
        }
        let token = js_sys::Reflect::get(&options, &"token".into())
            .ok()
            .and_then(|v| v.as_string());
        let open_timeout_ms = js_sys::Reflect::get(&options, &"openTimeoutMs".into())
            .ok()
            .and_then(|v| v.as_f64())
            .map(|v| v as u64)
            .unwrap_or(inner.cfg.open_timeout_ms);
        let max_connections = js_sys::Reflect::get(&options, &"maxConnections".into())
            .ok()
            .and_then(|v| v.as_f64())
            .map(|v| v as usize)
            .unwrap_or(inner.cfg.max_connections);

        let mut client = RelayClient::new(RelayConfig {
            url,
            token,
            open_timeout_ms,
            max_connections,
        });
        if !client.begin_connect() {
            return Ok(());
        }
        inner.relay = Some(client);
    }
    if let Err(err) = dial_relay(rc) {
        // A failed dial releases the single-flight claim so a later init
        // can retry.
        if let Some(relay) = rc.borrow_mut().relay.as_mut() {
            relay.connect_failed();
        }
        return Err(err);
    }
    install_tick(rc);
    Ok(())
}

fn dial_relay(rc: &Rc<RefCell<Inner>>) -> Result<(), JsValue> {
    let url = match rc.borrow().relay.as_ref() {
        Some(relay) => relay.channel_url(),
        None => return Ok(()),
    };
    let ws = WebSocket::new(&url)?;
    ws.set_binary_type(web_sys::BinaryType::Arraybuffer);

    let mut closures = Vec::new();

    let onopen = {
        let rc = rc.clone();
        let ws = ws.clone();
        Closure::wrap(Box::new(move |_event: JsValue| {
            let mut inner = rc.borrow_mut();
            if let Some(relay) = inner.relay.as_mut() {
                relay.channel_ready(WsChannel::new(ws.clone()));
            }
            inner.log("[controller] relay channel up");
        }) as Box<dyn FnMut(JsValue)>)
    };
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    closures.push(onopen);

    let onmessage = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move |event: JsValue| {
            let event: MessageEvent = event.unchecked_into();
            if let Some(text) = event.data().as_string() {
                handle_relay_frame(&rc, &text);
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    closures.push(onmessage);

    let onclose = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move |_event: JsValue| {
            let events = {
                let mut inner = rc.borrow_mut();
                inner.log("[controller] relay channel closed");
                match inner.relay.as_mut() {
                    Some(relay) => relay.channel_lost(),
                    None => Vec::new(),
                }
            };
            apply_relay_events(&rc, events);
        }) as Box<dyn FnMut(JsValue)>)
    };
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    closures.push(onclose);

    let onerror = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move |_event: JsValue| {
            let mut inner = rc.borrow_mut();
            inner.log("[controller] relay channel error");
            if let Some(relay) = inner.relay.as_mut() {
                if !relay.is_connected() {
                    relay.connect_failed();
                }
            }
        }) as Box<dyn FnMut(JsValue)>)
    };
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    closures.push(onerror);

    rc.borrow_mut()._ws_closures = closures;
    Ok(())
}

fn handle_relay_frame(rc: &Rc<RefCell<Inner>>, text: &str) {
    let outcome = {
        let mut inner = rc.borrow_mut();
        match inner.relay.as_mut() {
            Some(relay) => relay.handle_frame(text),
            None => return,
        }
    };
    match outcome {
        Ok(Some(event)) => apply_relay_events(rc, vec![event]),
        Ok(None) => {}
        Err(err) => {
            // Unparseable or out-of-order frame: log and leave the
            // channel alive.
            rc.borrow().log(&format!("[controller] relay frame dropped: {}", err));
        }
    }
}

fn apply_relay_events(rc: &Rc<RefCell<Inner>>, events: Vec<RelayEvent>) {
    for event in events {
        match event {
            RelayEvent::OpenCompleted { id, result } => {
                let mut inner = rc.borrow_mut();
                if let Some(runner) = inner.net_waits.remove(&id) {
                    match result {
                        Ok(()) => {
                            inner.complete(runner, call::Family::Net, call::OK, id as i32)
                        }
                        Err(msg) => {
                            inner.log(&format!("[controller] open {} rejected: {}", id, msg));
                            inner.complete(runner, call::Family::Net, call::ERR, 0);
                        }
                    }
                }
            }
            RelayEvent::Errored { id, msg } => {
                rc.borrow()
                    .log(&format!("[controller] connection {} error: {}", id, msg));
            }
            // Reads are poll-driven; nothing blocks on data or close.
            RelayEvent::Data { .. } | RelayEvent::Closed { .. } => {}
        }
    }
}

fn install_tick(rc: &Rc<RefCell<Inner>>) {
    if rc.borrow()._tick_closure.is_some() {
        return;
    }
    let closure = {
        let rc = rc.clone();
        Closure::wrap(Box::new(move || {
            let events = {
                let mut inner = rc.borrow_mut();
                let now = inner.now_ms();
                match inner.relay.as_mut() {
                    Some(relay) => relay.expire_pending(now),
                    None => Vec::new(),
                }
            };
            apply_relay_events(&rc, events);
        }) as Box<dyn FnMut()>)
    };
    if let Some(window) = web_sys::window() {
        let _ = window.set_interval_with_callback_and_timeout_and_arguments_0(
            closure.as_ref().unchecked_ref(),
            1_000,
        );
    }
    rc.borrow_mut()._tick_closure = Some(closure);
}
