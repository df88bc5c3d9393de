//! Bridge configuration.

/// Configuration for a bridge instance.
///
/// Controls the linear memory ceiling and the size of the region reserved
/// for the bridge allocator at instantiation time.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB), enforced via the
    /// store's resource limiter. Default: 256 pages = 16 MiB.
    pub max_memory_pages: u64,

    /// Pages claimed for the bridge allocator region right after
    /// instantiation (4 pages = 256 KiB). The region grows on demand up
    /// to the memory ceiling.
    pub heap_pages: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            heap_pages: 4,
        }
    }
}
