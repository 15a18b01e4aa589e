//! Pooled sector-aligned buffers.
//!
//! Unbuffered disk I/O requires the backing memory of every transfer to be
//! 4 KiB-aligned. The pool is keyed by exact buffer size because concurrent
//! jobs may run with different buffer settings; buffers are zeroed before
//! they re-enter the pool.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::{LazyLock, Mutex};

use crate::SECTOR_SIZE;

/// Maximum buffers kept per size class; excess returns are freed.
const MAX_POOLED_PER_SIZE: usize = 8;

/// A heap buffer whose backing memory is aligned to [`SECTOR_SIZE`].
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    /// Allocate a zero-filled aligned buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0, "aligned buffer length must be non-zero");
        let layout =
            Layout::from_size_align(len, SECTOR_SIZE).expect("sector size is a power of two");
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { ptr, len }
    }

    /// Buffer length in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        let layout =
            Layout::from_size_align(self.len, SECTOR_SIZE).expect("sector size is a power of two");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

/// Shared pool of aligned buffers, keyed by exact size.
pub struct BufferPool {
    shelves: Mutex<HashMap<usize, Vec<AlignedBuf>>>,
}

static GLOBAL_POOL: LazyLock<BufferPool> = LazyLock::new(BufferPool::new);

impl BufferPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            shelves: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide pool shared by all flash jobs.
    pub fn global() -> &'static BufferPool {
        &GLOBAL_POOL
    }

    /// Check out a buffer of exactly `len` bytes. The buffer returns to the
    /// pool when the guard drops.
    pub fn get(&self, len: usize) -> PooledBuf<'_> {
        let reused = self
            .shelves
            .lock()
            .ok()
            .and_then(|mut shelves| shelves.get_mut(&len).and_then(Vec::pop));

        PooledBuf {
            buf: Some(reused.unwrap_or_else(|| AlignedBuf::zeroed(len))),
            pool: self,
        }
    }

    fn put(&self, mut buf: AlignedBuf) {
        buf.fill(0);
        if let Ok(mut shelves) = self.shelves.lock() {
            let shelf = shelves.entry(buf.len()).or_default();
            if shelf.len() < MAX_POOLED_PER_SIZE {
                shelf.push(buf);
            }
        }
    }

    #[cfg(test)]
    fn pooled_count(&self, len: usize) -> usize {
        self.shelves
            .lock()
            .map(|shelves| shelves.get(&len).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked-out pool buffer; returns itself (zeroed) to the pool on drop.
pub struct PooledBuf<'a> {
    buf: Option<AlignedBuf>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
