//! Import/export surface of the kernel and user Wasm modules.
//!
//! Everything is imported under a single namespace; the host satisfies the
//! callbacks listed here and binds ENOSYS stubs for any leftover
//! syscall-prefixed import slot.

/// The one import namespace both modules use.
pub const IMPORT_NS: &str = "env";

/// Prefix of the per-arity syscall entries. The kernel exports
/// `syscall_0`..`syscall_6` and both modules import the same names; the
/// host wraps the exports (with pointer translation on the user side)
/// before binding them back in.
pub const SYSCALL_PREFIX: &str = "syscall_";

/// Highest per-arity syscall entry (`syscall_0`..`syscall_6`).
pub const SYSCALL_MAX_ARITY: usize = 6;

/// Host callbacks imported by the kernel module.
pub mod host {
    /// Shared kernel memory import.
    pub const MEMORY: &str = "memory";
    /// Ask the controller to start a secondary CPU runner.
    pub const CPU_START: &str = "cpu_start";
    /// Ask the controller to create and run a task runner.
    pub const TASK_START: &str = "task_start";
    /// Tell the controller a task is dead; its runner is terminated.
    pub const TASK_RELEASE: &str = "task_release";
    /// Park the calling runner and wake another (cooperative hand-off).
    pub const SERIALIZE: &str = "serialize_task";
    /// Kernel panic: log and unwind the runner with the panic sentinel.
    pub const PANIC: &str = "kernel_panic";
    /// Dump a kernel stack trace to the host log.
    pub const STACK_TRACE: &str = "stack_trace";
    /// Select the user-mode tail action for the current syscall return.
    pub const USER_TAIL: &str = "set_user_tail";
    /// Monotonic clock, nanoseconds.
    pub const CLOCK: &str = "clock_monotonic";
    /// Record a freshly loaded user executable for the next exec.
    pub const LOAD_USER: &str = "load_user_program";

    pub const CONSOLE_PUT: &str = "console_put";
    pub const CONSOLE_GET: &str = "console_get";

    pub const NET_OPEN: &str = "net_open";
    pub const NET_WRITE: &str = "net_write";
    pub const NET_READ: &str = "net_read";
    pub const NET_POLL: &str = "net_poll";
    pub const NET_CLOSE: &str = "net_close";

    pub const STORE_SAVE: &str = "store_save";
    pub const STORE_LOAD: &str = "store_load";
    pub const STORE_DELETE: &str = "store_delete";
    pub const STORE_LIST: &str = "store_list";
}

/// Exports the kernel module must provide.
pub mod kernel {
    /// Primary-CPU boot entry; never returns.
    pub const BOOT: &str = "boot";
    /// Secondary-CPU boot entry; never returns.
    pub const SECONDARY_BOOT: &str = "secondary_boot";
    /// Return-from-fork path a task runner enters with (prev, next).
    pub const RETURN_FROM_FORK: &str = "return_from_fork";
    /// Accessor for the active task's user stack pointer.
    pub const GET_USER_SP: &str = "get_user_sp";
    /// Accessor for the active task's TLS base.
    pub const GET_TLS_BASE: &str = "get_tls_base";
    /// Setter for the active task's TLS base.
    pub const SET_TLS_BASE: &str = "set_tls_base";
    /// Global holding the init task pointer.
    pub const INIT_TASK: &str = "init_task";
    /// Global holding the address of the boot command-line buffer.
    pub const BOOT_CMDLINE: &str = "boot_cmdline";
    /// Mutable globals the host sets to the initrd placement.
    pub const INITRD_START: &str = "initrd_start";
    pub const INITRD_END: &str = "initrd_end";
}

/// Import/export names of user executable modules.
pub mod user {
    /// Required imports besides the syscall stubs.
    pub const MEMORY: &str = "memory";
    pub const ABORT: &str = "abort";
    pub const STACK_POINTER: &str = "__stack_pointer";
    pub const INDIRECT_TABLE: &str = "__indirect_function_table";
    pub const MEMORY_BASE: &str = "__memory_base";
    pub const TABLE_BASE: &str = "__table_base";

    /// Program entry point.
    pub const START: &str = "_start";
    /// Optional exports the host recognizes.
    pub const SIGNAL_ENTRY: &str = "__invoke_signal";
    pub const CLONE_ENTRY: &str = "__clone_entry";
    pub const SET_TLS: &str = "__set_tls_base";
    pub const APPLY_RELOCS: &str = "__wasm_apply_data_relocs";
    pub const CALL_CTORS: &str = "__wasm_call_ctors";
}

/// True for import names that belong to the syscall vector and therefore
/// fall back to an ENOSYS stub when the host does not satisfy them.
pub fn is_syscall_import(name: &str) -> bool {
    name.starts_with(SYSCALL_PREFIX)
}

/// The per-arity entry name, `syscall_<arity>`.
pub fn syscall_name(arity: usize) -> alloc::string::String {
    use alloc::format;
    format!("{}{}", SYSCALL_PREFIX, arity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_names_match_prefix() {
        for arity in 0..=SYSCALL_MAX_ARITY {
            assert!(is_syscall_import(&syscall_name(arity)));
        }
        assert!(!is_syscall_import(host::NET_OPEN));
        assert!(is_syscall_import("syscall_fstatat64"));
    }
}
