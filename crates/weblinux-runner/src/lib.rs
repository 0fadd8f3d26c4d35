//! Worker-side runner for the weblinux host runtime
//!
//! One runner hosts one Wasm-level CPU or one task, inside a dedicated
//! Worker. The worker bootstrap script forwards the controller's init
//! message to [`runner_main`]; from then on the runner runs synchronously
//! to completion, blocking only on its serialize slot or on a host-call
//! messenger, and talks back to the controller purely via `postMessage`.
//!
//! Control flow per runner kind:
//!
//! - **Primary CPU**: instantiate the kernel against the shared memory,
//!   grow it to fit the initrd, place initrd and command line, publish the
//!   init task pointer, call `boot` (never returns).
//! - **Secondary CPU**: instantiate and call `secondary_boot` on the
//!   pre-allocated stack (never returns).
//! - **Task**: instantiate, enter `return_from_fork(prev, task)`, then,
//!   for user processes, instantiate the user executable and run its
//!   entry point (or clone callback) behind the syscall translation
//!   boundary.
//!
//! A kernel panic unwinds to the top of [`runner_main`] via a sentinel
//! error and leaves the runner dormant but intact for post-mortem
//! inspection; it never propagates to other runners.

pub(crate) mod context;
pub(crate) mod hostcall;
pub(crate) mod jsmem;
pub(crate) mod kernel;
pub(crate) mod loop_state;
pub(crate) mod serialize;
pub(crate) mod user;

use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use weblinux_abi::msg::wire;
use weblinux_abi::{sentinel, RunnerInit, RunnerRequest};

use context::RunnerContext;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

pub(crate) fn rlog(msg: &str) {
    log(msg);
}

/// Entry point, called by the worker bootstrap with the controller's init
/// message data.
#[wasm_bindgen]
pub fn runner_main(init: JsValue) -> Result<(), JsValue> {
    let ctx = Rc::new(RunnerContext::from_init(&init)?);
    let kind = ctx.init.clone();

    let outcome = match kind {
        RunnerInit::Primary { ref cmdline } => {
            let initrd = js_sys::Reflect::get(&init, &wire::INITRD.into())
                .ok()
                .and_then(|v| v.dyn_into::<js_sys::Uint8Array>().ok())
                .map(|a| a.to_vec())
                .unwrap_or_default();
            kernel::run_primary(&ctx, cmdline, &initrd)
        }
        RunnerInit::Secondary {
            stack_ptr,
            idle_task,
        } => kernel::run_secondary(&ctx, stack_ptr, idle_task),
        RunnerInit::Task {
            prev_task,
            task,
            ref user,
        } => user::run_task(&ctx, prev_task, task, user.clone()),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(err) if loop_state::is_sentinel(&err, sentinel::PANIC) => {
            // Dormant but intact: the worker stays up for post-mortem
            // inspection and never takes another turn.
            rlog("[runner] kernel panic; runner dormant");
            Ok(())
        }
        Err(err) => {
            let message = err
                .as_string()
                .unwrap_or_else(|| format!("{:?}", err));
            hostcall::post(&RunnerRequest::Fatal {
                message: message.clone(),
            });
            rlog(&format!("[runner] fatal: {}", message));
            Err(err)
        }
    }
}
