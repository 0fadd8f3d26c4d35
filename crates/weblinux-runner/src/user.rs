//! User executable instantiation and the user-mode loop.
//!
//! A task runner enters the kernel's return-from-fork path first; for a
//! user process it then instantiates the executable the kernel loaded
//! into kernel memory and runs its entry point behind the translation
//! boundary. Exec and signal-return are non-local exits implemented with
//! sentinel errors thrown through the Wasm frames; the loop catches the
//! exec sentinel and re-enters instantiation with the pre-loaded program.

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use weblinux_abi::names::{self, user as uname};
use weblinux_abi::{errno, sentinel, RunnerRequest, UserProgram, UserRunMode};
use weblinux_syscall::{Translator, MAX_ARGS};

use crate::context::RunnerContext;
use crate::hostcall;
use crate::jsmem::JsMemory;
use crate::loop_state::{action_for, is_sentinel, TailAction};
use crate::rlog;

const USER_MEMORY_PAGES: u32 = 256; // 16 MiB
const USER_MEMORY_MAX_PAGES: u32 = 4096; // 256 MiB
const USER_TABLE_MIN: u32 = 1024;

/// Exports and import-side handles of the live user module.
pub(crate) struct UserExports {
    pub stack_pointer: js_sys::WebAssembly::Global,
    pub start: Option<js_sys::Function>,
    pub invoke_signal: Option<js_sys::Function>,
    pub clone_entry: Option<js_sys::Function>,
    pub set_tls: Option<js_sys::Function>,
}

/// Task runner body.
pub(crate) fn run_task(
    ctx: &Rc<RunnerContext>,
    prev_task: u32,
    task: u32,
    user: Option<UserProgram>,
) -> Result<(), JsValue> {
    crate::kernel::instantiate(ctx)?;
    ctx.current_task.set(task);

    if let Some(program) = user.as_ref() {
        if program.scratch_base != 0 {
            let size = if program.scratch_size != 0 {
                program.scratch_size
            } else {
                weblinux_syscall::DEFAULT_SCRATCH_SIZE
            };
            *ctx.translator.borrow_mut() = Some(Translator::new(program.scratch_base, size));
        }
    }

    {
        let kernel = ctx.kernel.borrow();
        let kernel = kernel
            .as_ref()
            .ok_or_else(|| JsValue::from_str("kernel not instantiated"))?;
        kernel.return_from_fork.call2(
            &JsValue::NULL,
            &(prev_task as i32).into(),
            &(task as i32).into(),
        )?;
    }

    match user {
        Some(program) => run_user_loop(ctx, program),
        None => {
            // Kernel-only task that came back from the fork path. If the
            // kernel left a program behind (kthread turning into init),
            // run it; otherwise the task is done.
            match ctx.pending_exec.borrow_mut().take() {
                Some(program) => run_user_loop(ctx, program),
                None => Ok(()),
            }
        }
    }
}

/// The user-mode loop: instantiate, enter, and re-enter on exec.
fn run_user_loop(ctx: &Rc<RunnerContext>, mut program: UserProgram) -> Result<(), JsValue> {
    loop {
        instantiate_user(ctx, &program)?;
        let entered = enter_user(ctx, program.mode);
        match entered {
            Ok(()) => return Ok(()),
            Err(err) if is_sentinel(&err, sentinel::EXEC) => {
                let next = ctx.pending_exec.borrow_mut().take().ok_or_else(|| {
                    JsValue::from_str("exec requested without a pre-loaded program")
                })?;
                // Exec replaces the user memory; scratch placement is
                // per-task and carries over.
                *ctx.user_memory.borrow_mut() = None;
                program = UserProgram {
                    scratch_base: program.scratch_base,
                    scratch_size: program.scratch_size,
                    mode: UserRunMode::Start,
                    memory_of: None,
                    ..next
                };
                rlog(&format!(
                    "[runner] exec: image {:#x}..{:#x}",
                    program.start, program.end
                ));
            }
            Err(err) => return Err(err),
        }
    }
}

fn enter_user(ctx: &Rc<RunnerContext>, mode: UserRunMode) -> Result<(), JsValue> {
    let (start, clone_entry) = {
        let user = ctx.user.borrow();
        let user = user
            .as_ref()
            .ok_or_else(|| JsValue::from_str("user module not instantiated"))?;
        (user.start.clone(), user.clone_entry.clone())
    };
    match mode {
        UserRunMode::Start => {
            let start =
                start.ok_or_else(|| JsValue::from_str("user module has no entry point"))?;
            start.call0(&JsValue::NULL).map(|_| ())
        }
        UserRunMode::CloneCallback => {
            // A clone without its callback export cannot take its first
            // step; the task is fatally broken.
            let clone_entry = clone_entry
                .ok_or_else(|| JsValue::from_str("clone callback export missing"))?;
            clone_entry.call0(&JsValue::NULL).map(|_| ())
        }
    }
}

// ============================================================================
// Instantiation
// ============================================================================

fn create_user_memory() -> Result<js_sys::WebAssembly::Memory, JsValue> {
    // Shared so threads of the same process can attach from their own
    // runners; never shipped to any other process's runner.
    let desc = js_sys::Object::new();
    js_sys::Reflect::set(&desc, &"initial".into(), &USER_MEMORY_PAGES.into())?;
    js_sys::Reflect::set(&desc, &"maximum".into(), &USER_MEMORY_MAX_PAGES.into())?;
    js_sys::Reflect::set(&desc, &"shared".into(), &true.into())?;
    js_sys::WebAssembly::Memory::new(&desc)
}

fn instantiate_user(ctx: &Rc<RunnerContext>, program: &UserProgram) -> Result<(), JsValue> {
    // The executable image sits in kernel memory where the kernel loaded
    // it; compile from a copy.
    let image = {
        let view = js_sys::Uint8Array::new(&ctx.memory.buffer());
        if program.end < program.start || program.end > view.length() {
            return Err(JsValue::from_str("user image range out of bounds"));
        }
        let bytes = view.subarray(program.start, program.end).to_vec();
        js_sys::Uint8Array::from(bytes.as_slice())
    };
    let module = js_sys::WebAssembly::Module::new(&image.into())?;

    let memory = {
        let existing = ctx.user_memory.borrow().clone();
        match existing {
            Some(memory) => memory,
            None => {
                let memory = create_user_memory()?;
                hostcall::post_with(
                    &RunnerRequest::RegisterUserMemory {
                        task: ctx.current_task.get(),
                    },
                    Some(memory.as_ref()),
                );
                *ctx.user_memory.borrow_mut() = Some(memory.clone());
                memory
            }
        }
    };

    let (initial_sp, tls_base) = {
        let kernel = ctx.kernel.borrow();
        let kernel = kernel
            .as_ref()
            .ok_or_else(|| JsValue::from_str("kernel not instantiated"))?;
        (kernel.user_sp(), kernel.tls_base())
    };

    let env = js_sys::Object::new();
    js_sys::Reflect::set(&env, &uname::MEMORY.into(), memory.as_ref())?;

    let table_desc = js_sys::Object::new();
    js_sys::Reflect::set(&table_desc, &"element".into(), &"anyfunc".into())?;
    js_sys::Reflect::set(&table_desc, &"initial".into(), &USER_TABLE_MIN.into())?;
    let table = js_sys::WebAssembly::Table::new(&table_desc)?;
    js_sys::Reflect::set(&env, &uname::INDIRECT_TABLE.into(), table.as_ref())?;

    let stack_pointer = new_global(initial_sp, true)?;
    js_sys::Reflect::set(&env, &uname::STACK_POINTER.into(), stack_pointer.as_ref())?;
    let memory_base = new_global(program.data_base as i32, false)?;
    js_sys::Reflect::set(&env, &uname::MEMORY_BASE.into(), memory_base.as_ref())?;
    let table_base = new_global(program.table_base as i32, false)?;
    js_sys::Reflect::set(&env, &uname::TABLE_BASE.into(), table_base.as_ref())?;

    let abort = Closure::wrap(Box::new(move || {
        wasm_bindgen::throw_str("user abort");
    }) as Box<dyn FnMut()>);
    js_sys::Reflect::set(&env, &uname::ABORT.into(), &abort.into_js_value())?;

    for arity in 0..=names::SYSCALL_MAX_ARITY {
        js_sys::Reflect::set(
            &env,
            &names::syscall_name(arity).as_str().into(),
            &user_syscall_closure(ctx, arity),
        )?;
    }

    let imports = js_sys::Object::new();
    js_sys::Reflect::set(&imports, &names::IMPORT_NS.into(), &env)?;
    let instance = js_sys::WebAssembly::Instance::new(&module, &imports)?;
    let exports = instance.exports();

    // Optional initialization exports, in link order.
    if let Some(apply) = opt_fn(&exports, uname::APPLY_RELOCS) {
        apply.call0(&JsValue::NULL)?;
    }
    if let Some(set_tls) = opt_fn(&exports, uname::SET_TLS) {
        set_tls.call1(&JsValue::NULL, &tls_base.into())?;
    }
    if let Some(ctors) = opt_fn(&exports, uname::CALL_CTORS) {
        ctors.call0(&JsValue::NULL)?;
    }

    *ctx.user.borrow_mut() = Some(UserExports {
        stack_pointer,
        start: opt_fn(&exports, uname::START),
        invoke_signal: opt_fn(&exports, uname::SIGNAL_ENTRY),
        clone_entry: opt_fn(&exports, uname::CLONE_ENTRY),
        set_tls: opt_fn(&exports, uname::SET_TLS),
    });
    Ok(())
}

fn new_global(value: i32, mutable: bool) -> Result<js_sys::WebAssembly::Global, JsValue> {
    let desc = js_sys::Object::new();
    js_sys::Reflect::set(&desc, &"value".into(), &"i32".into())?;
    js_sys::Reflect::set(&desc, &"mutable".into(), &mutable.into())?;
    js_sys::WebAssembly::Global::new(&desc, &value.into())
}

fn opt_fn(exports: &JsValue, name: &str) -> Option<js_sys::Function> {
    js_sys::Reflect::get(exports, &name.into())
        .ok()
        .and_then(|v| v.dyn_into::<js_sys::Function>().ok())
}

// ============================================================================
// Syscall trampolines (user side)
// ============================================================================

fn kernel_syscall(ctx: &RunnerContext, arity: usize, nr: i32, args: &[i32; MAX_ARGS]) -> i32 {
    let kernel = ctx.kernel.borrow();
    match kernel.as_ref() {
        Some(kernel) => kernel.syscall(arity, nr, &args[..]),
        None => errno::ENOSYS_RET,
    }
}

/// Run one user syscall through translation, then act on the kernel's
/// tail selection.
fn dispatch_syscall(ctx: &Rc<RunnerContext>, arity: usize, nr: i32, a: [i32; MAX_ARGS]) -> i32 {
    let mut args = a;
    let mut kmem = JsMemory::new(ctx.memory.clone());
    let user_memory = ctx.user_memory.borrow().clone();
    let mut umem = user_memory.map(JsMemory::new);

    let ret = {
        let mut translator = ctx.translator.borrow_mut();
        match translator.as_mut() {
            Some(translator) => {
                let entry_ctx = ctx.clone();
                translator.run(nr as u32, &mut args, umem.as_mut(), &mut kmem, move |_, sub| {
                    kernel_syscall(&entry_ctx, arity, nr, sub)
                })
            }
            None => kernel_syscall(ctx, arity, nr, &args),
        }
    };

    match action_for(ctx.take_tail()) {
        TailAction::Return => ret,
        TailAction::DeliverSignal { sig } => {
            deliver_signal(ctx, sig);
            ret
        }
        TailAction::SignalReturn => wasm_bindgen::throw_str(sentinel::SIGRETURN),
        TailAction::Exec => wasm_bindgen::throw_str(sentinel::EXEC),
    }
}

/// Run the user signal-handler export on the kernel-managed stack and TLS,
/// then reload both before returning to the interrupted flow.
fn deliver_signal(ctx: &Rc<RunnerContext>, sig: i32) {
    let (stack_pointer, invoke_signal, set_tls) = {
        let user = ctx.user.borrow();
        match user.as_ref() {
            Some(user) => (
                user.stack_pointer.clone(),
                user.invoke_signal.clone(),
                user.set_tls.clone(),
            ),
            None => return,
        }
    };
    let Some(invoke_signal) = invoke_signal else {
        rlog(&format!(
            "[runner] signal {} dropped: no handler export",
            sig
        ));
        return;
    };

    let (kernel_sp, kernel_tls) = {
        let kernel = ctx.kernel.borrow();
        match kernel.as_ref() {
            Some(kernel) => (kernel.user_sp(), kernel.tls_base()),
            None => return,
        }
    };

    stack_pointer.set_value(&kernel_sp.into());
    if let Some(set_tls) = &set_tls {
        let _ = set_tls.call1(&JsValue::NULL, &kernel_tls.into());
    }

    match invoke_signal.call1(&JsValue::NULL, &sig.into()) {
        Ok(_) => {}
        // The handler left through sigreturn; that unwind ends here.
        Err(err) if is_sentinel(&err, sentinel::SIGRETURN) => {}
        Err(err) => wasm_bindgen::throw_val(err),
    }

    // Reload from the kernel's view of the task before resuming.
    let (sp, tls) = {
        let kernel = ctx.kernel.borrow();
        match kernel.as_ref() {
            Some(kernel) => (kernel.user_sp(), kernel.tls_base()),
            None => return,
        }
    };
    stack_pointer.set_value(&sp.into());
    if let Some(set_tls) = &set_tls {
        let _ = set_tls.call1(&JsValue::NULL, &tls.into());
    }
}

fn user_syscall_closure(ctx: &Rc<RunnerContext>, arity: usize) -> JsValue {
    let ctx = ctx.clone();
    match arity {
        0 => Closure::wrap(Box::new(move |nr: i32| -> i32 {
            dispatch_syscall(&ctx, 0, nr, [0; MAX_ARGS])
        }) as Box<dyn FnMut(i32) -> i32>)
        .into_js_value(),
        1 => Closure::wrap(Box::new(move |nr: i32, a1: i32| -> i32 {
            dispatch_syscall(&ctx, 1, nr, [a1, 0, 0, 0, 0, 0])
        }) as Box<dyn FnMut(i32, i32) -> i32>)
        .into_js_value(),
        2 => Closure::wrap(Box::new(move |nr: i32, a1: i32, a2: i32| -> i32 {
            dispatch_syscall(&ctx, 2, nr, [a1, a2, 0, 0, 0, 0])
        }) as Box<dyn FnMut(i32, i32, i32) -> i32>)
        .into_js_value(),
        3 => Closure::wrap(Box::new(move |nr: i32, a1: i32, a2: i32, a3: i32| -> i32 {
            dispatch_syscall(&ctx, 3, nr, [a1, a2, a3, 0, 0, 0])
        }) as Box<dyn FnMut(i32, i32, i32, i32) -> i32>)
        .into_js_value(),
        4 => Closure::wrap(
            Box::new(move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32| -> i32 {
                dispatch_syscall(&ctx, 4, nr, [a1, a2, a3, a4, 0, 0])
            }) as Box<dyn FnMut(i32, i32, i32, i32, i32) -> i32>,
        )
        .into_js_value(),
        5 => Closure::wrap(Box::new(
            move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32, a5: i32| -> i32 {
                dispatch_syscall(&ctx, 5, nr, [a1, a2, a3, a4, a5, 0])
            },
        )
            as Box<dyn FnMut(i32, i32, i32, i32, i32, i32) -> i32>)
        .into_js_value(),
        _ => Closure::wrap(Box::new(
            move |nr: i32, a1: i32, a2: i32, a3: i32, a4: i32, a5: i32, a6: i32| -> i32 {
                dispatch_syscall(&ctx, 6, nr, [a1, a2, a3, a4, a5, a6])
            },
        )
            as Box<dyn FnMut(i32, i32, i32, i32, i32, i32, i32) -> i32>)
        .into_js_value(),
    }
}
