//! The copy-in/copy-out translator.
//!
//! Wraps a kernel syscall entry so that pointer arguments referencing the
//! task's private user memory are staged through the per-task scratch
//! window in kernel memory. The kernel only ever dereferences scratch
//! addresses; the user program only ever sees its own.

use thiserror::Error;
use weblinux_abi::errno;

use crate::desc::{lookup, sizes, ArgLen, IoDir, PtrDir, SyscallDesc};
use crate::memory::{MemoryError, MemorySpace};
use crate::scratch::ScratchRegion;

/// Maximum syscall arity.
pub const MAX_ARGS: usize = 6;

/// Cap on iovec counts, matching the kernel's own `UIO_MAXIOV`.
const UIO_MAXIOV: u32 = 1024;

/// Cap on argv/envp entries walked before giving up.
const MAX_STR_ARRAY: u32 = 1024;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("scratch overflow: requested {requested} bytes, {remaining} remaining")]
    ScratchOverflow { requested: u32, remaining: u32 },
    #[error("string at user {addr:#x} has no terminator within the scratch budget")]
    UnterminatedString { addr: u32 },
    #[error("vector count {count} exceeds the per-call limit")]
    TooManyVectors { count: u32 },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl TranslateError {
    /// The negative errno the guest sees when translation fails.
    pub fn errno_return(&self) -> i32 {
        match self {
            TranslateError::ScratchOverflow { .. } => -errno::ENOMEM,
            TranslateError::UnterminatedString { .. } => -errno::EFAULT,
            TranslateError::Memory(_) => -errno::EFAULT,
            TranslateError::TooManyVectors { .. } => -errno::EINVAL,
        }
    }
}

/// A pending scratch → user copy, performed after the kernel entry
/// returns.
struct OutCopy {
    user: u32,
    scratch: u32,
    len: u32,
    ret_bounded: bool,
}

/// One staged iovec element awaiting copy-out.
struct IovOut {
    user_base: u32,
    scratch_base: u32,
    len: u32,
}

fn resolve_len(len: ArgLen, args: &[i32; MAX_ARGS]) -> u32 {
    match len {
        ArgLen::Fixed(n) => n,
        ArgLen::Arg(i) => args[i] as u32,
    }
}

/// Read a null-terminated string (terminator included) out of user
/// memory, walking at most `budget` bytes.
fn read_cstr<U: MemorySpace>(
    user: &U,
    addr: u32,
    budget: u32,
) -> Result<Vec<u8>, TranslateError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 64];
    let mut offset = 0u32;
    while offset < budget {
        let pos = addr.checked_add(offset).ok_or(MemoryError::OutOfBounds {
            addr,
            len: offset,
            size: user.size(),
        })?;
        let avail = user.size().saturating_sub(pos) as usize;
        if avail == 0 {
            return Err(MemoryError::OutOfBounds {
                addr: pos,
                len: 1,
                size: user.size(),
            }
            .into());
        }
        let want = chunk.len().min((budget - offset) as usize).min(avail);
        user.read(pos, &mut chunk[..want])?;
        if let Some(nul) = chunk[..want].iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..=nul]);
            return Ok(out);
        }
        out.extend_from_slice(&chunk[..want]);
        offset += want as u32;
    }
    Err(TranslateError::UnterminatedString { addr })
}

fn copy_user_to_kernel<U: MemorySpace, K: MemorySpace>(
    user: &U,
    kernel: &mut K,
    uaddr: u32,
    kaddr: u32,
    len: u32,
) -> Result<(), TranslateError> {
    if len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; len as usize];
    user.read(uaddr, &mut buf)?;
    kernel.write(kaddr, &buf)?;
    Ok(())
}

fn copy_kernel_to_user<U: MemorySpace, K: MemorySpace>(
    user: &mut U,
    kernel: &K,
    kaddr: u32,
    uaddr: u32,
    len: u32,
) -> Result<(), TranslateError> {
    if len == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; len as usize];
    kernel.read(kaddr, &mut buf)?;
    user.write(uaddr, &buf)?;
    Ok(())
}

/// Stage a string into scratch and return its kernel address.
fn stage_cstr<U: MemorySpace, K: MemorySpace>(
    user: &U,
    kernel: &mut K,
    scratch: &mut ScratchRegion,
    uaddr: u32,
) -> Result<u32, TranslateError> {
    let bytes = read_cstr(user, uaddr, scratch.remaining())?;
    let kaddr = scratch.alloc(bytes.len() as u32)?;
    kernel.write(kaddr, &bytes)?;
    Ok(kaddr)
}

/// Translate one syscall through its descriptor and invoke the kernel
/// entry with the substituted argument list.
pub fn translate<U, K, F>(
    desc: &SyscallDesc,
    args: &mut [i32; MAX_ARGS],
    user: &mut U,
    kernel: &mut K,
    scratch: &mut ScratchRegion,
    invoke: F,
) -> Result<i32, TranslateError>
where
    U: MemorySpace,
    K: MemorySpace,
    F: FnOnce(&mut K, &[i32; MAX_ARGS]) -> i32,
{
    scratch.reset();

    let mut outs: Vec<OutCopy> = Vec::new();
    let mut iov_outs: Vec<IovOut> = Vec::new();

    for ptr in desc.ptrs {
        let uaddr = args[ptr.pos] as u32;
        if uaddr == 0 {
            // A null user pointer stays a null kernel pointer.
            continue;
        }
        if ptr.string {
            args[ptr.pos] = stage_cstr(user, kernel, scratch, uaddr)? as i32;
            continue;
        }
        let len = resolve_len(ptr.len, args);
        let kaddr = scratch.alloc(len)?;
        if matches!(ptr.dir, PtrDir::In | PtrDir::InOut) {
            copy_user_to_kernel(user, kernel, uaddr, kaddr, len)?;
        }
        if matches!(ptr.dir, PtrDir::Out | PtrDir::InOut) {
            outs.push(OutCopy {
                user: uaddr,
                scratch: kaddr,
                len,
                ret_bounded: ptr.ret_bounded,
            });
        }
        args[ptr.pos] = kaddr as i32;
    }

    for sa in desc.str_arrays {
        let uarr = args[sa.pos] as u32;
        if uarr == 0 {
            continue;
        }
        let mut kernel_ptrs: Vec<u32> = Vec::new();
        loop {
            if kernel_ptrs.len() as u32 >= MAX_STR_ARRAY {
                return Err(TranslateError::TooManyVectors {
                    count: kernel_ptrs.len() as u32,
                });
            }
            let uptr = user.read_u32(uarr + 4 * kernel_ptrs.len() as u32)?;
            if uptr == 0 {
                break;
            }
            kernel_ptrs.push(stage_cstr(user, kernel, scratch, uptr)?);
        }
        let karr = scratch.alloc((kernel_ptrs.len() as u32 + 1) * 4)?;
        for (i, kptr) in kernel_ptrs.iter().enumerate() {
            kernel.write_u32(karr + 4 * i as u32, *kptr)?;
        }
        kernel.write_u32(karr + 4 * kernel_ptrs.len() as u32, 0)?;
        args[sa.pos] = karr as i32;
    }

    if let Some(iov) = desc.iovec {
        let uarr = args[iov.pos] as u32;
        if uarr != 0 {
            let count = args[iov.count_pos] as u32;
            if count > UIO_MAXIOV {
                return Err(TranslateError::TooManyVectors { count });
            }
            let mut staged: Vec<(u32, u32)> = Vec::with_capacity(count as usize);
            for i in 0..count {
                let ubase = user.read_u32(uarr + sizes::IOVEC * i)?;
                let len = user.read_u32(uarr + sizes::IOVEC * i + 4)?;
                let kbase = if ubase == 0 {
                    0
                } else {
                    let kbase = scratch.alloc(len)?;
                    if iov.dir == IoDir::In {
                        copy_user_to_kernel(user, kernel, ubase, kbase, len)?;
                    } else {
                        iov_outs.push(IovOut {
                            user_base: ubase,
                            scratch_base: kbase,
                            len,
                        });
                    }
                    kbase
                };
                staged.push((kbase, len));
            }
            let karr = scratch.alloc(count * sizes::IOVEC)?;
            for (i, (kbase, len)) in staged.iter().enumerate() {
                kernel.write_u32(karr + sizes::IOVEC * i as u32, *kbase)?;
                kernel.write_u32(karr + sizes::IOVEC * i as u32 + 4, *len)?;
            }
            args[iov.pos] = karr as i32;
        }
    }

    let ret = invoke(&mut *kernel, args);

    for out in &outs {
        let n = if out.ret_bounded {
            if ret > 0 {
                (ret as u32).min(out.len)
            } else {
                0
            }
        } else {
            out.len
        };
        copy_kernel_to_user(user, kernel, out.scratch, out.user, n)?;
    }

    // Read-like iovec: exactly `ret` bytes flow back, in element order.
    let mut remaining = if ret > 0 { ret as u32 } else { 0 };
    for iov in &iov_outs {
        if remaining == 0 {
            break;
        }
        let n = remaining.min(iov.len);
        copy_kernel_to_user(user, kernel, iov.scratch_base, iov.user_base, n)?;
        remaining -= n;
    }

    Ok(ret)
}

/// The per-task translation boundary: owns the scratch window and applies
/// the pass-through fallbacks.
pub struct Translator {
    scratch: ScratchRegion,
}

impl Translator {
    pub fn new(scratch_base: u32, scratch_size: u32) -> Self {
        Self {
            scratch: ScratchRegion::new(scratch_base, scratch_size),
        }
    }

    pub fn scratch(&self) -> &ScratchRegion {
        &self.scratch
    }

    /// Run syscall `nr` through translation.
    ///
    /// Pass-through when the task has no isolated user memory or the
    /// syscall has no descriptor; translation failures surface as the
    /// guest's negative errno without invoking the kernel entry.
    pub fn run<U, K, F>(
        &mut self,
        nr: u32,
        args: &mut [i32; MAX_ARGS],
        user: Option<&mut U>,
        kernel: &mut K,
        invoke: F,
    ) -> i32
    where
        U: MemorySpace,
        K: MemorySpace,
        F: FnOnce(&mut K, &[i32; MAX_ARGS]) -> i32,
    {
        let (desc, user) = match (lookup(nr), user) {
            (Some(desc), Some(user)) => (desc, user),
            _ => return invoke(kernel, args),
        };
        match translate(desc, args, user, kernel, &mut self.scratch, invoke) {
            Ok(ret) => ret,
            Err(err) => err.errno_return(),
        }
    }
}
