//! Messages exchanged between runners and the controller.
//!
//! Each direction is a closed set of cases discriminated by a tag field and
//! dispatched with exhaustive matching. The JSON text travels through
//! `postMessage` as the `json` property of a small wrapper object; binary
//! payloads (the kernel module, shared buffers, initrd bytes, user
//! memories) ride alongside it as structured-clone siblings, never inside
//! the JSON.

use alloc::string::String;
use serde::{Deserialize, Serialize};

/// Property names of the `postMessage` wrapper object. The JSON text sits
/// under [`wire::JSON`]; everything else is a structured-clone sibling.
pub mod wire {
    /// JSON-encoded [`RunnerRequest`] / [`RunnerInit`].
    ///
    /// [`RunnerRequest`]: super::RunnerRequest
    /// [`RunnerInit`]: super::RunnerInit
    pub const JSON: &str = "json";
    /// Compiled kernel `WebAssembly.Module`.
    pub const MODULE: &str = "module";
    /// Shared kernel memory.
    pub const MEMORY: &str = "memory";
    /// Lock block `SharedArrayBuffer`.
    pub const LOCK: &str = "lock";
    /// Messenger buffers, one per call family.
    pub const CONSOLE: &str = "console";
    pub const NET: &str = "net";
    pub const STORE: &str = "store";
    /// Initial ramdisk bytes (primary runner only).
    pub const INITRD: &str = "initrd";
    /// Shared user memory of the creator task (thread runners only).
    pub const USER_MEMORY: &str = "user_memory";
    /// Buffer attached to a runner request (`RegisterUserMemory`).
    pub const MEM: &str = "mem";
}

/// How a task runner enters the user module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRunMode {
    /// Run the program entry point (`_start`).
    Start,
    /// Invoke the clone-callback export on the freshly instantiated
    /// module; missing export is fatal for the task.
    CloneCallback,
}

/// Parameters of a user executable the kernel loaded into kernel memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgram {
    /// Image location inside kernel memory, [start, end).
    pub start: u32,
    pub end: u32,
    /// PIC bases the module is linked against.
    pub data_base: u32,
    pub table_base: u32,
    /// This task's syscall scratch window inside kernel memory. The size
    /// is filled in by the controller from runtime configuration.
    pub scratch_base: u32,
    #[serde(default)]
    pub scratch_size: u32,
    /// How the runner enters the module.
    pub mode: UserRunMode,
    /// Task id whose user memory this task shares; `None` allocates a
    /// fresh memory.
    pub memory_of: Option<u32>,
}

/// Console host-call requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConsoleOp {
    /// Blocking read of up to `count` bytes into kernel memory at `buf`.
    Get { buf: u32, count: u32 },
    /// Unbuffered write of `len` bytes from kernel memory at `buf`.
    Put { buf: u32, len: u32 },
}

/// Network host-call requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NetOp {
    Open { host: String, port: u16 },
    Write { id: u32, buf: u32, len: u32 },
    Read { id: u32, buf: u32, count: u32 },
    Poll { id: u32 },
    Close { id: u32 },
}

/// Persistence host-call requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    Save { path: String, buf: u32, len: u32, mode: u32 },
    Load { path: String, buf: u32, count: u32 },
    Delete { path: String },
    /// Newline-joined paths under `prefix`, truncated to `count` bytes.
    List { prefix: String, buf: u32, count: u32 },
}

/// Runner → controller messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerRequest {
    /// Primary runner finished boot preparation; the init task pointer is
    /// now known.
    StartPrimary { init_task: u32 },
    /// Kernel requested a secondary CPU on a pre-allocated boot stack.
    StartSecondary { stack_ptr: u32, idle_task: u32 },
    /// Kernel switched to `task` for the first time; spawn its runner.
    CreateAndRunTask {
        prev_task: u32,
        task: u32,
        user: Option<UserProgram>,
    },
    /// Park the sender's runner; hand control to `to_task`'s runner.
    Serialize { from_task: u32, to_task: u32 },
    /// `task` is dead; terminate its runner.
    ReleaseTask { task: u32 },
    /// A fresh process instantiated its user memory; the buffer rides
    /// alongside this message so threads can later share it.
    RegisterUserMemory { task: u32 },
    /// Kernel stack trace text for the host log.
    StackTrace { text: String },
    /// The runner died for good (instantiation failure, kernel panic,
    /// unexpected unwind). Informational; the controller never restarts.
    Fatal { message: String },
    Console { op: ConsoleOp },
    Net { op: NetOp },
    Store { op: StoreOp },
}

/// Controller → runner init message (the JSON part).
///
/// The accompanying wrapper object carries the kernel module, the shared
/// kernel memory, the lock block, the three messengers, and (depending on
/// the kind) initrd bytes or a shared user memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerInit {
    /// Primary CPU: instantiate, place initrd and command line, boot.
    Primary { cmdline: String },
    /// Secondary CPU: enter `secondary_boot` on the given stack.
    Secondary { stack_ptr: u32, idle_task: u32 },
    /// Task runner: enter `return_from_fork(prev_task, task)`.
    Task {
        prev_task: u32,
        task: u32,
        user: Option<UserProgram>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec::Vec;

    #[test]
    fn runner_request_round_trips() {
        let reqs = [
            RunnerRequest::StartPrimary { init_task: 0xCAFE },
            RunnerRequest::Serialize {
                from_task: 1,
                to_task: 2,
            },
            RunnerRequest::Net {
                op: NetOp::Open {
                    host: "example.com".to_string(),
                    port: 80,
                },
            },
            RunnerRequest::CreateAndRunTask {
                prev_task: 1,
                task: 7,
                user: Some(UserProgram {
                    start: 0x1000,
                    end: 0x2000,
                    data_base: 0x400,
                    table_base: 2,
                    scratch_base: 0x9000,
                    scratch_size: 0x10000,
                    mode: UserRunMode::Start,
                    memory_of: None,
                }),
            },
        ];
        for req in reqs {
            let json = serde_json::to_string(&req).unwrap();
            let back: RunnerRequest = serde_json::from_str(&json).unwrap();
            assert_eq!(back, req);
        }
    }

    #[test]
    fn request_tag_is_snake_case() {
        let json = serde_json::to_string(&RunnerRequest::StartPrimary { init_task: 1 }).unwrap();
        assert!(json.contains("\"start_primary\""));
    }

    #[test]
    fn init_round_trips() {
        let inits: Vec<RunnerInit> = [
            RunnerInit::Primary {
                cmdline: "console=ttyWL0 root=/dev/ram0".to_string(),
            },
            RunnerInit::Secondary {
                stack_ptr: 0x8000,
                idle_task: 3,
            },
            RunnerInit::Task {
                prev_task: 1,
                task: 4,
                user: None,
            },
        ]
        .into();
        for init in inits {
            let json = serde_json::to_string(&init).unwrap();
            let back: RunnerInit = serde_json::from_str(&json).unwrap();
            assert_eq!(back, init);
        }
    }
}
