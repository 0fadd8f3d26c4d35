//! Runtime configuration.

/// Tunables of the host runtime. Everything here has a working default;
/// the embedding page overrides through the `Controller` entry points.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Initial size of the shared kernel memory, in 64 KiB Wasm pages.
    pub kernel_memory_pages: u32,
    /// Growth ceiling of the shared kernel memory, in pages.
    pub kernel_memory_max_pages: u32,
    /// Size of each task's syscall scratch window.
    pub scratch_size: u32,
    /// Relay: pending opens not answered within this window are rejected.
    pub open_timeout_ms: u64,
    /// Relay: client-side connection cap.
    pub max_connections: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kernel_memory_pages: 1024,     // 64 MiB
            kernel_memory_max_pages: 4096, // 256 MiB
            scratch_size: 64 * 1024,
            open_timeout_ms: 10_000,
            max_connections: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.kernel_memory_pages <= cfg.kernel_memory_max_pages);
        assert_eq!(cfg.scratch_size, 64 * 1024);
    }
}
