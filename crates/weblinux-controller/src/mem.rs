//! Byte access to the shared kernel memory from the main thread.
//!
//! Views are re-obtained for every operation: kernel memory grows during
//! boot and under the guest allocator, and a cached view silently detaches
//! from the old buffer.

use wasm_bindgen::JsValue;

pub(crate) struct KernelMem {
    memory: js_sys::WebAssembly::Memory,
}

impl KernelMem {
    pub fn new(memory: js_sys::WebAssembly::Memory) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &js_sys::WebAssembly::Memory {
        &self.memory
    }

    fn bytes(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::new(&self.memory.buffer())
    }

    pub fn read(&self, offset: u32, len: u32) -> Result<Vec<u8>, JsValue> {
        let view = self.bytes();
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= view.length())
            .ok_or_else(|| JsValue::from_str("kernel memory read out of bounds"))?;
        Ok(view.subarray(offset, end).to_vec())
    }

    pub fn write(&self, offset: u32, data: &[u8]) -> Result<(), JsValue> {
        let view = self.bytes();
        let end = offset
            .checked_add(data.len() as u32)
            .filter(|&end| end <= view.length())
            .ok_or_else(|| JsValue::from_str("kernel memory write out of bounds"))?;
        view.subarray(offset, end).copy_from(data);
        Ok(())
    }
}
