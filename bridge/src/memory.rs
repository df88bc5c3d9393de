//! Linear-memory allocator and bounds-checked guest memory access.
//!
//! The bridge claims a region of the guest's linear memory at
//! instantiation time (by growing the memory) and serves `malloc` /
//! `realloc` / `free` out of it with a sorted, coalescing free list.
//! When the region is full the allocator asks for more pages via
//! [`GrowNeeded`]; the caller grows the wasm memory and commits the new
//! capacity with [`LinearAllocator::extend_capacity`]. A failed grow is an
//! out-of-memory condition, never a truncated allocation.

/// Bytes per wasm linear-memory page.
pub const PAGE_BYTES: u64 = 65536;

/// Errors from allocator bookkeeping and raw memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Pointer/length range falls outside the accessible region.
    #[error("pointer out of range")]
    BadPointer,

    /// Alignment is zero, not a power of two, or larger than a page.
    #[error("bad alignment")]
    BadAlignment,

    /// A freed range overlaps a block that is already free.
    #[error("free of a range that is already free")]
    DoubleFree,
}

/// The region is exhausted; grow the wasm memory by `pages` and commit the
/// new capacity before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowNeeded {
    pub pages: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    off: u32,
    len: u32,
}

/// First-fit free-list allocator over `[base, base + capacity)` of the
/// guest's linear memory.
///
/// Offsets in the free list are relative to `base`; returned pointers are
/// absolute guest addresses. The list is kept sorted by offset and
/// adjacent blocks are coalesced on free, so a freed range can never be
/// handed out twice before a later allocate reclaims it.
#[derive(Debug, Clone)]
pub struct LinearAllocator {
    base: u32,
    capacity: u32,
    free: Vec<FreeBlock>,
}

impl LinearAllocator {
    /// Allocator over a region starting at `base` with `capacity` bytes.
    pub fn new(base: u32, capacity: u32) -> Self {
        let free = if capacity > 0 {
            vec![FreeBlock {
                off: 0,
                len: capacity,
            }]
        } else {
            Vec::new()
        };
        Self {
            base,
            capacity,
            free,
        }
    }

    /// Placeholder for state constructed before the instance's memory
    /// layout is known; replaced by the loader after instantiation.
    pub fn uninitialized() -> Self {
        Self::new(0, 0)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Total free bytes (fragmentation ignored).
    pub fn free_bytes(&self) -> u32 {
        self.free.iter().map(|b| b.len).sum()
    }

    /// Allocate `size` bytes at the requested alignment.
    ///
    /// `size == 0` returns the dangling pointer `align`: nonzero, aligned,
    /// outside the region, and valid only for a size-0 free.
    pub fn allocate(&mut self, size: u32, align: u32) -> Result<u32, AllocGrow> {
        let align = check_align(align).map_err(AllocGrow::Error)?;
        if size == 0 {
            return Ok(align);
        }
        for i in 0..self.free.len() {
            let block = self.free[i];
            let abs = self.base + block.off;
            let aligned = match round_up(abs, align) {
                Some(a) => a,
                None => continue,
            };
            let pad = aligned - abs;
            let need = match pad.checked_add(size) {
                Some(n) => n,
                None => continue,
            };
            if block.len >= need {
                self.free.remove(i);
                if pad > 0 {
                    self.insert_free_unchecked(block.off, pad);
                }
                let rest = block.len - need;
                if rest > 0 {
                    self.insert_free_unchecked(block.off + need, rest);
                }
                return Ok(aligned);
            }
        }
        // Nothing fits: request enough pages that a retry always succeeds.
        let pages = (size as u64 + align as u64).div_ceil(PAGE_BYTES);
        Err(AllocGrow::Grow(GrowNeeded { pages }))
    }

    /// Return a block to the free list.
    ///
    /// The `(ptr, size, align)` triple must be exactly what allocate (or
    /// reallocate) last returned for this block; overlap with an already
    /// free range is reported as `DoubleFree`.
    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<(), AllocError> {
        check_align(align)?;
        if size == 0 {
            return Ok(());
        }
        let off = ptr.checked_sub(self.base).ok_or(AllocError::BadPointer)?;
        let end = off.checked_add(size).ok_or(AllocError::BadPointer)?;
        if end > self.capacity {
            return Err(AllocError::BadPointer);
        }
        self.insert_free(off, size)
    }

    /// Shrink a live block in place, releasing its tail.
    pub fn shrink(&mut self, ptr: u32, old_size: u32, new_size: u32) -> Result<(), AllocError> {
        debug_assert!(new_size <= old_size);
        if new_size == old_size {
            return Ok(());
        }
        // Guest-supplied triple: every step of the offset math can overflow.
        let off = ptr.checked_sub(self.base).ok_or(AllocError::BadPointer)?;
        let tail_off = off.checked_add(new_size).ok_or(AllocError::BadPointer)?;
        let tail_len = old_size - new_size;
        let end = tail_off.checked_add(tail_len).ok_or(AllocError::BadPointer)?;
        if end > self.capacity {
            return Err(AllocError::BadPointer);
        }
        self.insert_free(tail_off, tail_len)
    }

    /// Try to grow a live block in place by consuming an adjacent free
    /// block. Returns `true` when the block now spans `new_size` bytes.
    pub fn try_extend(&mut self, ptr: u32, old_size: u32, new_size: u32) -> bool {
        debug_assert!(new_size >= old_size);
        let delta = new_size - old_size;
        if delta == 0 {
            return true;
        }
        let off = match ptr.checked_sub(self.base) {
            Some(o) => o,
            None => return false,
        };
        let tail = match off.checked_add(old_size) {
            Some(t) => t,
            None => return false,
        };
        if let Some(i) = self.free.iter().position(|b| b.off == tail) {
            if self.free[i].len >= delta {
                if self.free[i].len == delta {
                    self.free.remove(i);
                } else {
                    self.free[i].off += delta;
                    self.free[i].len -= delta;
                }
                return true;
            }
        }
        false
    }

    /// Commit extra capacity after the wasm memory has been grown.
    pub fn extend_capacity(&mut self, extra: u32) {
        let old = self.capacity;
        self.capacity += extra;
        self.insert_free_unchecked(old, extra);
        // Coalesce in case the old tail was free.
        let blocks = std::mem::take(&mut self.free);
        for b in blocks {
            let _ = self.insert_free(b.off, b.len);
        }
    }

    fn insert_free(&mut self, off: u32, len: u32) -> Result<(), AllocError> {
        let idx = self.free.partition_point(|b| b.off < off);
        if idx > 0 {
            let prev = self.free[idx - 1];
            if prev.off + prev.len > off {
                return Err(AllocError::DoubleFree);
            }
        }
        if idx < self.free.len() && off + len > self.free[idx].off {
            return Err(AllocError::DoubleFree);
        }
        self.free.insert(idx, FreeBlock { off, len });
        // Merge with right neighbor, then left.
        if idx + 1 < self.free.len() && self.free[idx].off + self.free[idx].len == self.free[idx + 1].off
        {
            self.free[idx].len += self.free[idx + 1].len;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].off + self.free[idx - 1].len == self.free[idx].off {
            self.free[idx - 1].len += self.free[idx].len;
            self.free.remove(idx);
        }
        Ok(())
    }

    fn insert_free_unchecked(&mut self, off: u32, len: u32) {
        let idx = self.free.partition_point(|b| b.off < off);
        self.free.insert(idx, FreeBlock { off, len });
    }
}

/// Outcome of [`LinearAllocator::allocate`] when it cannot return a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocGrow {
    /// Grow the memory and retry.
    Grow(GrowNeeded),
    /// Invalid request (bad alignment).
    Error(AllocError),
}

fn check_align(align: u32) -> Result<u32, AllocError> {
    if align == 0 || !align.is_power_of_two() || align as u64 > PAGE_BYTES {
        return Err(AllocError::BadAlignment);
    }
    Ok(align)
}

fn round_up(value: u32, align: u32) -> Option<u32> {
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

// ── Guest memory access helpers ──

/// Read `len` bytes from guest memory at `ptr`.
pub fn read_bytes(mem: &[u8], ptr: u32, len: u32) -> Result<Vec<u8>, AllocError> {
    let start = ptr as usize;
    let end = start.checked_add(len as usize).ok_or(AllocError::BadPointer)?;
    if end > mem.len() {
        return Err(AllocError::BadPointer);
    }
    Ok(mem[start..end].to_vec())
}

/// Write `data` to guest memory at `ptr`.
pub fn write_bytes(mem: &mut [u8], ptr: u32, data: &[u8]) -> Result<(), AllocError> {
    let start = ptr as usize;
    let end = start.checked_add(data.len()).ok_or(AllocError::BadPointer)?;
    if end > mem.len() {
        return Err(AllocError::BadPointer);
    }
    mem[start..end].copy_from_slice(data);
    Ok(())
}

/// Read a u64 value (little-endian) from guest memory at `ptr`.
pub fn read_u64(mem: &[u8], ptr: u32) -> Result<u64, AllocError> {
    let bytes = read_bytes(mem, ptr, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
}

/// Write a u64 value (little-endian) to guest memory at `ptr`.
pub fn write_u64(mem: &mut [u8], ptr: u32, value: u64) -> Result<(), AllocError> {
    write_bytes(mem, ptr, &value.to_le_bytes())
}

/// Validate that `[ptr, ptr + len)` lies within a memory of `mem_size` bytes.
pub fn validate_range(mem_size: usize, ptr: u32, len: u32) -> Result<(), AllocError> {
    let end = (ptr as usize)
        .checked_add(len as usize)
        .ok_or(AllocError::BadPointer)?;
    if end > mem_size {
        return Err(AllocError::BadPointer);
    }
    Ok(())
}
