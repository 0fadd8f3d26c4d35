//! `MemorySpace` over a browser Wasm memory.
//!
//! Views are re-obtained for every access: both kernel memory and user
//! memories grow at runtime, and a stale `Uint8Array` silently detaches
//! from the replaced buffer.

use weblinux_syscall::{MemoryError, MemorySpace};

pub(crate) struct JsMemory {
    memory: js_sys::WebAssembly::Memory,
}

impl JsMemory {
    pub fn new(memory: js_sys::WebAssembly::Memory) -> Self {
        Self { memory }
    }

    fn view(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::new(&self.memory.buffer())
    }
}

impl MemorySpace for JsMemory {
    fn size(&self) -> u32 {
        self.view().length()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let view = self.view();
        let end = addr
            .checked_add(buf.len() as u32)
            .filter(|&end| end <= view.length())
            .ok_or(MemoryError::OutOfBounds {
                addr,
                len: buf.len() as u32,
                size: view.length(),
            })?;
        view.subarray(addr, end).copy_to(buf);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        let view = self.view();
        let end = addr
            .checked_add(data.len() as u32)
            .filter(|&end| end <= view.length())
            .ok_or(MemoryError::OutOfBounds {
                addr,
                len: data.len() as u32,
                size: view.length(),
            })?;
        view.subarray(addr, end).copy_from(data);
        Ok(())
    }
}

/// Read a null-terminated string out of kernel memory, for host callbacks
/// that receive C string pointers.
pub(crate) fn read_cstr_lossy(memory: &JsMemory, addr: u32, max: u32) -> String {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 64];
    let mut offset = 0;
    'outer: while offset < max {
        let want = buf.len().min((max - offset) as usize);
        if memory.read(addr + offset, &mut buf[..want]).is_err() {
            break;
        }
        for &b in &buf[..want] {
            if b == 0 {
                break 'outer;
            }
            bytes.push(b);
        }
        offset += want as u32;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
