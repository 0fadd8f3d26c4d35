//! Syscall pointer descriptors.
//!
//! One record per syscall number, naming which argument positions carry
//! pointers, in which direction they flow, and how their byte length is
//! determined. The table is plain data; the translator has one inner loop
//! parameterized by these fields and no per-syscall code.
//!
//! Syscalls without an entry are invoked unchanged: the pass-through
//! fallback for calls that take no pointers (or whose pointer use the
//! guest handles internally, like `ioctl`).

/// Direction a pointer argument flows across the user/kernel boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtrDir {
    /// Copied user → scratch before the kernel entry runs.
    In,
    /// Allocated in scratch, copied scratch → user afterwards.
    Out,
    /// Both.
    InOut,
}

/// How the byte length of a pointer argument is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgLen {
    /// Compile-time constant (fixed structure size).
    Fixed(u32),
    /// Value of another argument position.
    Arg(usize),
}

/// One pointer argument of a syscall.
#[derive(Clone, Copy, Debug)]
pub struct PtrArg {
    /// Argument position, 0-based.
    pub pos: usize,
    pub dir: PtrDir,
    /// Buffer size: allocation size in scratch, and the copy-in amount
    /// for `In`/`InOut`. Ignored for strings.
    pub len: ArgLen,
    /// Null-terminated string; length found by walking user memory,
    /// bounded by the remaining scratch budget.
    pub string: bool,
    /// Read-like output: the copy-out length is the syscall's positive
    /// return value, capped at `len`.
    pub ret_bounded: bool,
}

/// Direction of an iovec array's element buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDir {
    /// `writev`-like: element bytes copied in.
    In,
    /// `readv`-like: elements allocated, filled by the kernel, copied out
    /// up to the return value.
    Out,
}

/// An array-of-buffers argument with a companion count argument.
///
/// The translator walks the user-side array, stages each element, builds a
/// parallel array of scratch-backed iovecs, and substitutes its address.
#[derive(Clone, Copy, Debug)]
pub struct IoVecArg {
    pub pos: usize,
    pub count_pos: usize,
    pub dir: IoDir,
}

/// A null-terminated array of string pointers (`execve` argv/envp). Each
/// string is staged individually; a parallel pointer array is staged with
/// a terminating null.
#[derive(Clone, Copy, Debug)]
pub struct StrArrayArg {
    pub pos: usize,
}

/// Descriptor record for one syscall number.
#[derive(Clone, Copy, Debug)]
pub struct SyscallDesc {
    pub nr: u32,
    pub ptrs: &'static [PtrArg],
    pub iovec: Option<IoVecArg>,
    pub str_arrays: &'static [StrArrayArg],
}

/// Syscall numbers, asm-generic table.
pub mod nr {
    pub const GETCWD: u32 = 17;
    pub const IOCTL: u32 = 29;
    pub const MKDIRAT: u32 = 34;
    pub const UNLINKAT: u32 = 35;
    pub const SYMLINKAT: u32 = 36;
    pub const LINKAT: u32 = 37;
    pub const RENAMEAT: u32 = 38;
    pub const FACCESSAT: u32 = 48;
    pub const CHDIR: u32 = 49;
    pub const OPENAT: u32 = 56;
    pub const CLOSE: u32 = 57;
    pub const PIPE2: u32 = 59;
    pub const GETDENTS64: u32 = 61;
    pub const LSEEK: u32 = 62;
    pub const READ: u32 = 63;
    pub const WRITE: u32 = 64;
    pub const READV: u32 = 65;
    pub const WRITEV: u32 = 66;
    pub const PREAD64: u32 = 67;
    pub const PWRITE64: u32 = 68;
    pub const READLINKAT: u32 = 78;
    pub const NEWFSTATAT: u32 = 79;
    pub const FSTAT: u32 = 80;
    pub const UTIMENSAT: u32 = 88;
    pub const EXIT: u32 = 93;
    pub const EXIT_GROUP: u32 = 94;
    pub const NANOSLEEP: u32 = 101;
    pub const CLOCK_GETTIME: u32 = 113;
    pub const SCHED_YIELD: u32 = 124;
    pub const KILL: u32 = 129;
    pub const RT_SIGACTION: u32 = 134;
    pub const RT_SIGPROCMASK: u32 = 135;
    pub const RT_SIGRETURN: u32 = 139;
    pub const UNAME: u32 = 160;
    pub const GETPID: u32 = 172;
    pub const GETTID: u32 = 178;
    pub const BRK: u32 = 214;
    pub const CLONE: u32 = 220;
    pub const EXECVE: u32 = 221;
    pub const MMAP: u32 = 222;
    pub const WAIT4: u32 = 260;
    pub const GETRANDOM: u32 = 278;
}

/// Guest structure sizes on the 32-bit Wasm ABI (64-bit `time_t`).
pub mod sizes {
    pub const IOVEC: u32 = 8;
    pub const TIMESPEC: u32 = 16;
    pub const STAT: u32 = 128;
    pub const UTSNAME: u32 = 390;
    pub const SIGACTION: u32 = 20;
    pub const SIGSET: u32 = 8;
    pub const WSTATUS: u32 = 4;
    pub const PIPE_FDS: u32 = 8;
}

const fn in_str(pos: usize) -> PtrArg {
    PtrArg {
        pos,
        dir: PtrDir::In,
        len: ArgLen::Fixed(0),
        string: true,
        ret_bounded: false,
    }
}

const fn in_buf(pos: usize, len: ArgLen) -> PtrArg {
    PtrArg {
        pos,
        dir: PtrDir::In,
        len,
        string: false,
        ret_bounded: false,
    }
}

const fn out_buf(pos: usize, len: ArgLen) -> PtrArg {
    PtrArg {
        pos,
        dir: PtrDir::Out,
        len,
        string: false,
        ret_bounded: false,
    }
}

/// Read-like output: sized by another argument, copied back by return
/// value.
const fn out_ret(pos: usize, len_pos: usize) -> PtrArg {
    PtrArg {
        pos,
        dir: PtrDir::Out,
        len: ArgLen::Arg(len_pos),
        string: false,
        ret_bounded: true,
    }
}

const fn plain(nr: u32, ptrs: &'static [PtrArg]) -> SyscallDesc {
    SyscallDesc {
        nr,
        ptrs,
        iovec: None,
        str_arrays: &[],
    }
}

use sizes::*;
use ArgLen::{Arg, Fixed};

/// The descriptor table, sorted by syscall number.
static DESCS: &[SyscallDesc] = &[
    plain(nr::GETCWD, &[out_ret(0, 1)]),
    plain(nr::MKDIRAT, &[in_str(1)]),
    plain(nr::UNLINKAT, &[in_str(1)]),
    plain(nr::SYMLINKAT, &[in_str(0), in_str(2)]),
    plain(nr::LINKAT, &[in_str(1), in_str(3)]),
    plain(nr::RENAMEAT, &[in_str(1), in_str(3)]),
    plain(nr::FACCESSAT, &[in_str(1)]),
    plain(nr::CHDIR, &[in_str(0)]),
    plain(nr::OPENAT, &[in_str(1)]),
    plain(nr::PIPE2, &[out_buf(0, Fixed(PIPE_FDS))]),
    plain(nr::GETDENTS64, &[out_ret(1, 2)]),
    plain(nr::READ, &[out_ret(1, 2)]),
    plain(nr::WRITE, &[in_buf(1, Arg(2))]),
    SyscallDesc {
        nr: nr::READV,
        ptrs: &[],
        iovec: Some(IoVecArg {
            pos: 1,
            count_pos: 2,
            dir: IoDir::Out,
        }),
        str_arrays: &[],
    },
    SyscallDesc {
        nr: nr::WRITEV,
        ptrs: &[],
        iovec: Some(IoVecArg {
            pos: 1,
            count_pos: 2,
            dir: IoDir::In,
        }),
        str_arrays: &[],
    },
    plain(nr::PREAD64, &[out_ret(1, 2)]),
    plain(nr::PWRITE64, &[in_buf(1, Arg(2))]),
    plain(nr::READLINKAT, &[in_str(1), out_ret(2, 3)]),
    plain(nr::NEWFSTATAT, &[in_str(1), out_buf(2, Fixed(STAT))]),
    plain(nr::FSTAT, &[out_buf(1, Fixed(STAT))]),
    plain(
        nr::UTIMENSAT,
        &[in_str(1), in_buf(2, Fixed(2 * TIMESPEC))],
    ),
    plain(
        nr::NANOSLEEP,
        &[in_buf(0, Fixed(TIMESPEC)), out_buf(1, Fixed(TIMESPEC))],
    ),
    plain(nr::CLOCK_GETTIME, &[out_buf(1, Fixed(TIMESPEC))]),
    plain(
        nr::RT_SIGACTION,
        &[in_buf(1, Fixed(SIGACTION)), out_buf(2, Fixed(SIGACTION))],
    ),
    plain(
        nr::RT_SIGPROCMASK,
        &[in_buf(1, Fixed(SIGSET)), out_buf(2, Fixed(SIGSET))],
    ),
    plain(nr::UNAME, &[out_buf(0, Fixed(UTSNAME))]),
    SyscallDesc {
        nr: nr::EXECVE,
        ptrs: &[in_str(0)],
        iovec: None,
        str_arrays: &[StrArrayArg { pos: 1 }, StrArrayArg { pos: 2 }],
    },
    plain(nr::WAIT4, &[out_buf(1, Fixed(WSTATUS))]),
    plain(nr::GETRANDOM, &[out_ret(0, 1)]),
];

/// Look up the descriptor for a syscall number; `None` means pass-through.
pub fn lookup(nr: u32) -> Option<&'static SyscallDesc> {
    DESCS
        .binary_search_by_key(&nr, |d| d.nr)
        .ok()
        .map(|i| &DESCS[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_by_number() {
        for pair in DESCS.windows(2) {
            assert!(pair[0].nr < pair[1].nr, "table out of order at {}", pair[1].nr);
        }
    }

    #[test]
    fn lookup_finds_described_calls() {
        assert!(lookup(nr::OPENAT).is_some());
        assert!(lookup(nr::READV).unwrap().iovec.is_some());
        assert_eq!(lookup(nr::EXECVE).unwrap().str_arrays.len(), 2);
    }

    #[test]
    fn pointerless_calls_pass_through() {
        assert!(lookup(nr::CLOSE).is_none());
        assert!(lookup(nr::SCHED_YIELD).is_none());
        assert!(lookup(nr::IOCTL).is_none());
        assert!(lookup(nr::BRK).is_none());
    }

    #[test]
    fn descriptor_length_references_are_in_range() {
        for desc in DESCS {
            for ptr in desc.ptrs {
                if let ArgLen::Arg(i) = ptr.len {
                    assert!(i < crate::translate::MAX_ARGS);
                }
                assert!(ptr.pos < crate::translate::MAX_ARGS);
            }
            if let Some(iov) = desc.iovec {
                assert!(iov.pos < crate::translate::MAX_ARGS);
                assert!(iov.count_pos < crate::translate::MAX_ARGS);
            }
        }
    }
}
