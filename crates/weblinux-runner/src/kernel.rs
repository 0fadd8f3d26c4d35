//! Kernel module instantiation and the boot paths.
//!
//! The kernel imports everything under one namespace: the shared memory,
//! the host callback family, and the per-arity syscall entries (which, for
//! kernel-mode callers, simply re-enter the kernel's own exports with no
//! translation). Any leftover import carrying the syscall prefix is bound
//! to an ENOSYS stub so instantiation stays total across kernel builds.

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use weblinux_abi::names::{self, host, kernel as kexp};
use weblinux_abi::{errno, sentinel, NetOp, RunnerRequest, StoreOp, UserProgram, UserRunMode, UserTail};
use weblinux_syscall::{MemorySpace, DEFAULT_SCRATCH_SIZE};

use crate::context::RunnerContext;
use crate::hostcall::{self, blocking_call, guest_return};
use crate::jsmem::{read_cstr_lossy, JsMemory};
use crate::rlog;
use crate::serialize;
use weblinux_abi::call::Family;
use weblinux_abi::ConsoleOp;

/// Longest boot command line the kernel buffer accepts, NUL included.
const CMDLINE_MAX: u32 = 2048;

/// Longest C string a host callback will walk in kernel memory.
const HOST_CSTR_MAX: u32 = 4096;

/// Layout of the `task_start` parameter block in kernel memory: seven
/// little-endian u32 words.
const TASK_PARAMS_WORDS: u32 = 7;

/// Resolved kernel exports.
pub(crate) struct KernelExports {
    pub boot: js_sys::Function,
    pub secondary_boot: js_sys::Function,
    pub return_from_fork: js_sys::Function,
    get_user_sp: js_sys::Function,
    get_tls_base: js_sys::Function,
    #[allow(dead_code)]
    set_tls_base: js_sys::Function,
    init_task: js_sys::WebAssembly::Global,
    boot_cmdline: js_sys::WebAssembly::Global,
    initrd_start: js_sys::WebAssembly::Global,
    initrd_end: js_sys::WebAssembly::Global,
    /// Per-arity syscall entries, indexed by arity.
    syscalls: Vec<js_sys::Function>,
}

fn get_export(exports: &JsValue, name: &str) -> Result<JsValue, JsValue> {
    let value = js_sys::Reflect::get(exports, &name.into())?;
    if value.is_undefined() {
        return Err(JsValue::from_str(&format!("kernel export {} missing", name)));
    }
    Ok(value)
}

fn get_fn(exports: &JsValue, name: &str) -> Result<js_sys::Function, JsValue> {
    get_export(exports, name)?.dyn_into::<js_sys::Function>()
}

fn get_global(exports: &JsValue, name: &str) -> Result<js_sys::WebAssembly::Global, JsValue> {
    get_export(exports, name)?.dyn_into::<js_sys::WebAssembly::Global>()
}

fn global_u32(global: &js_sys::WebAssembly::Global) -> u32 {
    global.value().as_f64().unwrap_or(0.0) as i64 as u32
}

impl KernelExports {
    fn resolve(exports: &JsValue) -> Result<Self, JsValue> {
        let mut syscalls = Vec::with_capacity(names::SYSCALL_MAX_ARITY + 1);
        for arity in 0..=names::SYSCALL_MAX_ARITY {
            syscalls.push(get_fn(exports, &names::syscall_name(arity))?);
        }
        Ok(Self {
            boot: get_fn(exports, kexp::BOOT)?,
            secondary_boot: get_fn(exports, kexp::SECONDARY_BOOT)?,
            return_from_fork: get_fn(exports, kexp::RETURN_FROM_FORK)?,
            get_user_sp: get_fn(exports, kexp::GET_USER_SP)?,
            get_tls_base: get_fn(exports, kexp::GET_TLS_BASE)?,
            set_tls_base: get_fn(exports, kexp::SET_TLS_BASE)?,
            init_task: get_global(exports, kexp::INIT_TASK)?,
            boot_cmdline: get_global(exports, kexp::BOOT_CMDLINE)?,
            initrd_start: get_global(exports, kexp::INITRD_START)?,
            initrd_end: get_global(exports, kexp::INITRD_END)?,
            syscalls,
        })
    }

    /// Invoke the per-arity syscall entry. A JS exception (a sentinel, or
    /// a kernel trap) is rethrown so it unwinds the caller.
    pub fn syscall(&self, arity: usize, nr: i32, args: &[i32]) -> i32 {
        let call_args = js_sys::Array::new();
        call_args.push(&nr.into());
        for &arg in args.iter().take(arity) {
            call_args.push(&arg.into());
        }
        match self.syscalls[arity].apply(&JsValue::NULL, &call_args) {
            Ok(ret) => ret.as_f64().unwrap_or(0.0) as i64 as i32,
            Err(err) => wasm_bindgen::throw_val(err),
        }
    }

    pub fn user_sp(&self) -> i32 {
        self.get_user_sp
            .call0(&JsValue::NULL)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as i64 as i32
    }

    pub fn tls_base(&self) -> i32 {
        self.get_tls_base
            .call0(&JsValue::NULL)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as i64 as i32
    }

    pub fn init_task_ptr(&self) -> u32 {
        global_u32(&self.init_task)
    }

    pub fn cmdline_addr(&self) -> u32 {
        global_u32(&self.boot_cmdline)
    }

    pub fn set_initrd(&self, start: u32, end: u32) {
        self.initrd_start.set_value(&(start as i32).into());
        self.initrd_end.set_value(&(end as i32).into());
    }
}

/// Instantiate the kernel module into this runner and resolve its
/// exports.
pub(crate) fn instantiate(ctx: &Rc<RunnerContext>) -> Result<(), JsValue> {
    let imports = build_imports(ctx)?;
    let instance = js_sys::WebAssembly::Instance::new(&ctx.module, &imports)?;
    let exports = instance.exports();
    let resolved = KernelExports::resolve(&exports)?;
    *ctx.kernel.borrow_mut() = Some(resolved);
    Ok(())
}

/// Primary CPU: place initrd and command line, publish the init task,
/// boot.
pub(crate) fn run_primary(ctx: &Rc<RunnerContext>, cmdline: &str, initrd: &[u8]) -> Result<(), JsValue> {
    instantiate(ctx)?;
    let kernel = ctx.kernel.borrow();
    let kernel = kernel
        .as_ref()
        .ok_or_else(|| JsValue::from_str("kernel not instantiated"))?;

    let mut kmem = JsMemory::new(ctx.memory.clone());
    if !initrd.is_empty() {
        // The initrd lands past the current end of kernel memory; only
        // the primary grows the memory during early boot.
        let base = kmem.size();
        let pages = (initrd.len() as u32).div_ceil(64 * 1024);
        ctx.memory.grow(pages);
        kmem.write(base, initrd)
            .map_err(|e| JsValue::from_str(&format!("initrd placement: {}", e)))?;
        kernel.set_initrd(base, base + initrd.len() as u32);
        rlog(&format!(
            "[runner] initrd at {:#x}..{:#x}",
            base,
            base + initrd.len() as u32
        ));
    }

    let cmdline_addr = kernel.cmdline_addr();
    if cmdline_addr != 0 {
        let mut bytes = cmdline.as_bytes().to_vec();
        bytes.truncate(CMDLINE_MAX as usize - 1);
        bytes.push(0);
        kmem.write(cmdline_addr, &bytes)
            .map_err(|e| JsValue::from_str(&format!("cmdline placement: {}", e)))?;
    }

    let init_task = kernel.init_task_ptr();
    ctx.current_task.set(init_task);
    hostcall::post(&RunnerRequest::StartPrimary { init_task });

    kernel.boot.call0(&JsValue::NULL)?;
    // Boot returning at all means the allocator in the entry failed.
    Err(JsValue::from_str("kernel boot entry returned"))
}

/// Secondary CPU: enter `secondary_boot` on the pre-allocated stack.
pub(crate) fn run_secondary(ctx: &Rc<RunnerContext>, stack_ptr: u32, idle_task: u32) -> Result<(), JsValue> {
    instantiate(ctx)?;
    ctx.current_task.set(idle_task);
    let kernel = ctx.kernel.borrow();
    let kernel = kernel
        .as_ref()
        .ok_or_else(|| JsValue::from_str("kernel not instantiated"))?;
    kernel.secondary_boot.call2(
        &JsValue::NULL,
        &(stack_ptr as i32).into(),
        &(idle_task as i32).into(),
    )?;
    Err(JsValue::from_str("secondary boot entry returned"))
}

// ============================================================================
// Import wiring
// ============================================================================

fn bind(env: &js_sys::Object, name: &str, f: JsValue) -> Result<(), JsValue> {
    js_sys::Reflect::set(env, &name.into(), &f)?;
    Ok(())
}

fn build_imports(ctx: &Rc<RunnerContext>) -> Result<js_sys::Object, JsValue> {
    let env = js_sys::Object::new();
    js_sys::Reflect::set(&env, &host::MEMORY.into(), ctx.memory.as_ref())?;

    bind_host_callbacks(ctx, &env)?;
    bind_kernel_syscall_entries(ctx, &env)?;
    bind_enosys_stubs(ctx, &env)?;

    let imports = js_sys::Object::new();
    js_sys::Reflect::set(&imports, &names::IMPORT_NS.into(), &env)?;
    Ok(imports)
}

fn bind_host_callbacks(ctx: &Rc<RunnerContext>, env: &js_sys::Object) -> Result<(), JsValue> {
    // --- CPU and task lifecycle ---

    let cpu_start = {
        Closure::wrap(Box::new(move |stack_ptr: i32, idle_task: i32| {
            hostcall::post(&RunnerRequest::StartSecondary {
                stack_ptr: stack_ptr as u32,
                idle_task: idle_task as u32,
            });
        }) as Box<dyn FnMut(i32, i32)>)
    };
    bind(env, host::CPU_START, cpu_start.into_js_value())?;

    let task_start = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |task: i32, params_ptr: i32| -> i32 {
            let user = if params_ptr != 0 {
                read_task_params(&ctx, params_ptr as u32)
            } else {
                None
            };
            hostcall::post(&RunnerRequest::CreateAndRunTask {
                prev_task: ctx.current_task.get(),
                task: task as u32,
                user,
            });
            // Park so the new task can take its first turn.
            serialize::park(&ctx)
        }) as Box<dyn FnMut(i32, i32) -> i32>)
    };
    bind(env, host::TASK_START, task_start.into_js_value())?;

    let task_release = {
        Closure::wrap(Box::new(move |task: i32| {
            hostcall::post(&RunnerRequest::ReleaseTask { task: task as u32 });
        }) as Box<dyn FnMut(i32)>)
    };
    bind(env, host::TASK_RELEASE, task_release.into_js_value())?;

    let serialize_task = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |from_task: i32, to_task: i32| -> i32 {
            serialize::serialize_and_wait(&ctx, from_task as u32, to_task as u32)
        }) as Box<dyn FnMut(i32, i32) -> i32>)
    };
    bind(env, host::SERIALIZE, serialize_task.into_js_value())?;

    // --- Diagnostics ---

    let panic = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |msg_ptr: i32, msg_len: i32| {
            let kmem = JsMemory::new(ctx.memory.clone());
            let max = (msg_len as u32).min(HOST_CSTR_MAX);
            let text = read_cstr_lossy(&kmem, msg_ptr as u32, max.max(1));
            rlog(&format!("[runner] kernel panic: {}", text));
            hostcall::post(&RunnerRequest::Fatal {
                message: format!("kernel panic: {}", text),
            });
            wasm_bindgen::throw_str(sentinel::PANIC);
        }) as Box<dyn FnMut(i32, i32)>)
    };
    bind(env, host::PANIC, panic.into_js_value())?;

    let stack_trace = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |ptr: i32, len: i32| {
            let kmem = JsMemory::new(ctx.memory.clone());
            let text = read_cstr_lossy(&kmem, ptr as u32, (len as u32).min(HOST_CSTR_MAX).max(1));
            hostcall::post(&RunnerRequest::StackTrace { text });
        }) as Box<dyn FnMut(i32, i32)>)
    };
    bind(env, host::STACK_TRACE, stack_trace.into_js_value())?;

    let user_tail = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |code: i32, arg: i32| {
            ctx.set_tail(UserTail::from_code(code), arg);
        }) as Box<dyn FnMut(i32, i32)>)
    };
    bind(env, host::USER_TAIL, user_tail.into_js_value())?;

    let clock = {
        Closure::wrap(Box::new(move || -> f64 {
            // Monotonic-enough nanosecond source for the guest clock.
            js_sys::Date::now() * 1_000_000.0
        }) as Box<dyn FnMut() -> f64>)
    };
    bind(env, host::CLOCK, clock.into_js_value())?;

    let load_user = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(
            move |start: i32, end: i32, data_base: i32, table_base: i32| {
                // Scratch placement and size carry over from the task;
                // the run loop fills them in when the exec fires.
                *ctx.pending_exec.borrow_mut() = Some(UserProgram {
                    start: start as u32,
                    end: end as u32,
                    data_base: data_base as u32,
                    table_base: table_base as u32,
                    scratch_base: 0,
                    scratch_size: 0,
                    mode: UserRunMode::Start,
                    memory_of: None,
                });
            },
        ) as Box<dyn FnMut(i32, i32, i32, i32)>)
    };
    bind(env, host::LOAD_USER, load_user.into_js_value())?;

    // --- Console ---

    let console_put = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |buf: i32, len: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Console,
                &RunnerRequest::Console {
                    op: ConsoleOp::Put {
                        buf: buf as u32,
                        len: len as u32,
                    },
                },
            );
            guest_return(status, value, -errno::EIO)
        }) as Box<dyn FnMut(i32, i32) -> i32>)
    };
    bind(env, host::CONSOLE_PUT, console_put.into_js_value())?;

    let console_get = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |buf: i32, count: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Console,
                &RunnerRequest::Console {
                    op: ConsoleOp::Get {
                        buf: buf as u32,
                        count: count as u32,
                    },
                },
            );
            guest_return(status, value, -errno::EIO)
        }) as Box<dyn FnMut(i32, i32) -> i32>)
    };
    bind(env, host::CONSOLE_GET, console_get.into_js_value())?;

    // --- Network relay ---

    let net_open = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |host_ptr: i32, host_len: i32, port: i32| -> i32 {
            let kmem = JsMemory::new(ctx.memory.clone());
            let host = read_cstr_lossy(&kmem, host_ptr as u32, (host_len as u32).min(HOST_CSTR_MAX).max(1));
            let (status, value) = blocking_call(
                &ctx,
                Family::Net,
                &RunnerRequest::Net {
                    op: NetOp::Open {
                        host,
                        port: port as u16,
                    },
                },
            );
            guest_return(status, value, -errno::EIO)
        }) as Box<dyn FnMut(i32, i32, i32) -> i32>)
    };
    bind(env, host::NET_OPEN, net_open.into_js_value())?;

    let net_write = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |id: i32, buf: i32, len: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Net,
                &RunnerRequest::Net {
                    op: NetOp::Write {
                        id: id as u32,
                        buf: buf as u32,
                        len: len as u32,
                    },
                },
            );
            guest_return(status, value, -errno::EPIPE)
        }) as Box<dyn FnMut(i32, i32, i32) -> i32>)
    };
    bind(env, host::NET_WRITE, net_write.into_js_value())?;

    let net_read = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |id: i32, buf: i32, count: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Net,
                &RunnerRequest::Net {
                    op: NetOp::Read {
                        id: id as u32,
                        buf: buf as u32,
                        count: count as u32,
                    },
                },
            );
            // Remote close reads as end-of-stream.
            guest_return(status, value, 0)
        }) as Box<dyn FnMut(i32, i32, i32) -> i32>)
    };
    bind(env, host::NET_READ, net_read.into_js_value())?;

    let net_poll = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |id: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Net,
                &RunnerRequest::Net { op: NetOp::Poll { id: id as u32 } },
            );
            guest_return(status, value, -errno::EIO)
        }) as Box<dyn FnMut(i32) -> i32>)
    };
    bind(env, host::NET_POLL, net_poll.into_js_value())?;

    let net_close = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |id: i32| -> i32 {
            let (status, value) = blocking_call(
                &ctx,
                Family::Net,
                &RunnerRequest::Net { op: NetOp::Close { id: id as u32 } },
            );
            guest_return(status, value, 0)
        }) as Box<dyn FnMut(i32) -> i32>)
    };
    bind(env, host::NET_CLOSE, net_close.into_js_value())?;

    // --- Persistence store ---

    let store_save = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(
            move |path_ptr: i32, path_len: i32, buf: i32, len: i32, mode: i32| -> i32 {
                let kmem = JsMemory::new(ctx.memory.clone());
                let path =
                    read_cstr_lossy(&kmem, path_ptr as u32, (path_len as u32).min(HOST_CSTR_MAX).max(1));
                let (status, value) = blocking_call(
                    &ctx,
                    Family::Store,
                    &RunnerRequest::Store {
                        op: StoreOp::Save {
                            path,
                            buf: buf as u32,
                            len: len as u32,
                            mode: mode as u32,
                        },
                    },
                );
                guest_return(status, value, -errno::EIO)
            },
        ) as Box<dyn FnMut(i32, i32, i32, i32, i32) -> i32>)
    };
    bind(env, host::STORE_SAVE, store_save.into_js_value())?;

    let store_load = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(
            move |path_ptr: i32, path_len: i32, buf: i32, count: i32| -> i32 {
                let kmem = JsMemory::new(ctx.memory.clone());
                let path =
                    read_cstr_lossy(&kmem, path_ptr as u32, (path_len as u32).min(HOST_CSTR_MAX).max(1));
                let (status, value) = blocking_call(
                    &ctx,
                    Family::Store,
                    &RunnerRequest::Store {
                        op: StoreOp::Load {
                            path,
                            buf: buf as u32,
                            count: count as u32,
                        },
                    },
                );
                guest_return(status, value, -errno::EIO)
            },
        ) as Box<dyn FnMut(i32, i32, i32, i32) -> i32>)
    };
    bind(env, host::STORE_LOAD, store_load.into_js_value())?;

    let store_delete = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(move |path_ptr: i32, path_len: i32| -> i32 {
            let kmem = JsMemory::new(ctx.memory.clone());
            let path =
                read_cstr_lossy(&kmem, path_ptr as u32, (path_len as u32).min(HOST_CSTR_MAX).max(1));
            let (status, value) = blocking_call(
                &ctx,
                Family::Store,
                &RunnerRequest::Store { op: StoreOp::Delete { path } },
            );
            guest_return(status, value, -errno::EIO)
        }) as Box<dyn FnMut(i32, i32) -> i32>)
    };
    bind(env, host::STORE_DELETE, store_delete.into_js_value())?;

    let store_list = {
        let ctx = ctx.clone();
        Closure::wrap(Box::new(
            move |prefix_ptr: i32, prefix_len: i32, buf: i32, count: i32| -> i32 {
                let kmem = JsMemory::new(ctx.memory.clone());
                let prefix = read_cstr_lossy(
                    &kmem,
                    prefix_ptr as u32,
                    (prefix_len as u32).min(HOST_CSTR_MAX).max(1),
                );
                let (status, value) = blocking_call(
                    &ctx,
                    Family::Store,
                    &RunnerRequest::Store {
                        op: StoreOp::List {
                            prefix,
                            buf: buf as u32,
                            count: count as u32,
                        },
                    },
                );
                guest_return(status, value, -errno::EIO)
            },
        ) as Box<dyn FnMut(i32, i32, i32, i32) -> i32>)
    };
    bind(env, host::STORE_LIST, store_list.into_js_value())?;

    Ok(())
}

/// The kernel's own per-arity syscall imports re-enter the kernel exports
/// untranslated: kernel-mode callers already hold kernel addresses.
fn bind_kernel_syscall_entries(ctx: &Rc<RunnerContext>, env: &js_sys::Object) -> Result<(), JsValue> {
    for arity in 0..=names::SYSCALL_MAX_ARITY {
        let f = kernel_syscall_closure(ctx, arity);
        bind(env, &names::syscall_name(arity), f)?;
    }
    Ok(())
}

fn kernel_entry(ctx: &RunnerContext, arity: usize, nr: i32, args: &[i32]) -> i32 {
    let kernel = ctx.kernel.borrow();
    match kernel.as_ref() {
        Some(kernel) => kernel.syscall(arity, nr, args),
        None => errno::ENOSYS_RET,
    }
}

fn kernel_syscall_closure(ctx: &Rc<RunnerContext>, arity: usize) -> JsValue {
    let ctx = ctx.clone();
    match arity {
        0 => Closure::wrap(Box::new(move |nr: i32| -> i32 {
            kernel_entry(&ctx, 0, nr, &[])
        }) as Box<dyn FnMut(i32) -> i32>)
        .into_js_value(),
        1 => Closure::wrap(Box::new(move |nr: i32, a1: i32| -> i32 {
            kernel_entry(&ctx, 1, nr, &[a1])
        }) as Box<dyn FnMut(i32, i32) -> i32>)
        .into_js_value(),
        2 => Closure::wrap(Box::new(move |nr: i32, a1: i32, a2: i32| -> i32 {
            kernel_entry(&ctx, 2, nr, &[a1, a2])
        }) as Box<dyn FnMut(i32, i32, i32) -> i32>)
        .into_js_value(),
        3 => Closure::wrap(Box::new(move |nr: i32, a1: i32, a2: i32, a3: i32| -> i32 {
            kernel_entry(&ctx, 3, nr, &[a1, a2, a3])
        }) as Box<dyn FnMut(i32, i32, i32, i32) -> i32>)
        .into_js_value(),
        4 => Closure::wrap(
            Box::new(move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32| -> i32 {
                kernel_entry(&ctx, 4, nr, &[a1, a2, a3, a4])
            }) as Box<dyn FnMut(i32, i32, i32, i32, i32) -> i32>,
        )
        .into_js_value(),
        5 => Closure::wrap(Box::new(
            move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32, a5: i32| -> i32 {
                kernel_entry(&ctx, 5, nr, &[a1, a2, a3, a4, a5])
            },
        )
            as Box<dyn FnMut(i32, i32, i32, i32, i32, i32) -> i32>)
        .into_js_value(),
        _ => Closure::wrap(Box::new(
            move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32, a5: i32, a6: i32| -> i32 {
                kernel_entry(&ctx, 6, nr, &[a1, a2, a3, a4, a5, a6])
            },
        )
            as Box<dyn FnMut(i32, i32, i32, i32, i32, i32, i32) -> i32>)
        .into_js_value(),
    }
}

/// Bind ENOSYS stubs for syscall-prefixed imports the host does not
/// satisfy, so instantiation stays total.
fn bind_enosys_stubs(ctx: &Rc<RunnerContext>, env: &js_sys::Object) -> Result<(), JsValue> {
    let imports = js_sys::WebAssembly::Module::imports(&ctx.module);
    for entry in imports.iter() {
        let module = js_sys::Reflect::get(&entry, &"module".into())
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_default();
        let name = js_sys::Reflect::get(&entry, &"name".into())
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_default();
        if module != names::IMPORT_NS {
            continue;
        }
        let satisfied = js_sys::Reflect::has(env, &name.as_str().into()).unwrap_or(false);
        if satisfied || !names::is_syscall_import(&name) {
            continue;
        }
        rlog(&format!("[runner] binding ENOSYS stub for {}", name));
        // JS functions are variadic; one nullary stub fits every arity.
        let stub = Closure::wrap(
            Box::new(move || -> i32 { errno::ENOSYS_RET }) as Box<dyn FnMut() -> i32>
        );
        bind(env, &name, stub.into_js_value())?;
    }
    Ok(())
}

/// Decode the `task_start` parameter block: start, end, data_base,
/// table_base, scratch_base, memory_of, flags.
fn read_task_params(ctx: &RunnerContext, params_ptr: u32) -> Option<UserProgram> {
    let kmem = JsMemory::new(ctx.memory.clone());
    let mut words = [0u32; TASK_PARAMS_WORDS as usize];
    for (i, word) in words.iter_mut().enumerate() {
        *word = kmem.read_u32(params_ptr + 4 * i as u32).ok()?;
    }
    let [start, end, data_base, table_base, scratch_base, memory_of, flags] = words;
    if start == 0 && memory_of == 0 {
        return None;
    }
    Some(UserProgram {
        start,
        end,
        data_base,
        table_base,
        scratch_base,
        scratch_size: DEFAULT_SCRATCH_SIZE,
        mode: if flags & 1 != 0 {
            UserRunMode::CloneCallback
        } else {
            UserRunMode::Start
        },
        memory_of: if memory_of != 0 { Some(memory_of) } else { None },
    })
}
