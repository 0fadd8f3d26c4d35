//! Memory isolation and syscall translation
//!
//! Each user process owns a private linear memory the kernel never sees.
//! The kernel, however, expects pointer arguments passed into its numbered
//! syscall entries to be dereferenceable in *kernel* memory. This crate
//! closes that gap: a translator, parameterized by a per-syscall pointer
//! descriptor, copies input buffers from user memory into a per-task
//! scratch window inside kernel memory, substitutes scratch addresses into
//! the argument list, invokes the kernel entry, and copies outputs back.
//!
//! The translator is generic over the memory representation through
//! [`MemorySpace`], so the same code runs against browser Wasm memories in
//! a Worker and against plain byte vectors in tests.
//!
//! ```
//! use weblinux_syscall::{nr, Translator, VecSpace, DEFAULT_SCRATCH_SIZE};
//!
//! let mut kernel = VecSpace::new(0x20000);
//! let mut user = VecSpace::new(0x10000);
//! user.fill_at(0x2000, b"/etc/motd\0").unwrap();
//!
//! // Scratch window at 0x10000 inside kernel memory.
//! let mut tr = Translator::new(0x10000, DEFAULT_SCRATCH_SIZE);
//! let ret = tr.run(
//!     nr::OPENAT,
//!     &mut [-100i32, 0x2000, 0, 0, 0, 0],
//!     Some(&mut user),
//!     &mut kernel,
//!     |_kernel, args| {
//!         // The kernel sees a scratch address, not 0x2000.
//!         assert_ne!(args[1], 0x2000);
//!         3
//!     },
//! );
//! assert_eq!(ret, 3);
//! ```

mod desc;
mod memory;
mod scratch;
mod translate;

pub use desc::{lookup, ArgLen, IoDir, IoVecArg, PtrArg, PtrDir, StrArrayArg, SyscallDesc};
pub use memory::{MemoryError, MemorySpace, VecSpace};
pub use scratch::ScratchRegion;
pub use translate::{translate, TranslateError, Translator, MAX_ARGS};

pub use desc::nr;
pub use desc::sizes;

/// Default size of the per-task syscall scratch window. Overridable
/// through runtime configuration; overflow of the window fails the
/// syscall, it never truncates.
pub const DEFAULT_SCRATCH_SIZE: u32 = 64 * 1024;
