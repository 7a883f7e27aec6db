//! Heap arena.
//!
//! A fixed-capacity bump arena over a board-supplied buffer. It is
//! provisioned once at boot, hands out zeroed regions and never frees.

use core::alloc::{GlobalAlloc, Layout};
use core::mem;
use core::ptr;

use log::{error, info};
use spin::Mutex;

use crate::error::{EngineError, EngineResult};

/// Global arena backing `alloc` on bare-metal builds.
#[cfg(all(feature = "global-heap", target_os = "none"))]
#[global_allocator]
pub static HEAP: LockedArena = LockedArena::empty();

/// Arena usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Buffer size in bytes.
    pub capacity: usize,
    /// Bytes handed out, including alignment padding.
    pub used: usize,
    /// Successful allocations.
    pub allocations: usize,
    /// Rejected allocations.
    pub failures: usize,
}

/// Bump arena.
pub struct HeapArena {
    /// Unallocated tail of the buffer.
    free: &'static mut [u8],
    capacity: usize,
    allocations: usize,
    failures: usize,
}

impl HeapArena {
    /// Create an arena over `buffer`.
    pub fn new(buffer: &'static mut [u8]) -> Self {
        HeapArena {
            capacity: buffer.len(),
            free: buffer,
            allocations: 0,
            failures: 0,
        }
    }

    /// Buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes already handed out. Never exceeds `capacity`.
    pub fn cursor(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.free.len()
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate(&mut self, size: usize) -> EngineResult<&'static mut [u8]> {
        self.carve(0, size)
    }

    /// Allocate zeroed memory for `layout`.
    pub fn allocate_layout(&mut self, layout: Layout) -> EngineResult<&'static mut [u8]> {
        let padding = self.free.as_ptr().align_offset(layout.align());
        self.carve(padding, layout.size())
    }

    fn carve(&mut self, padding: usize, size: usize) -> EngineResult<&'static mut [u8]> {
        let needed = padding.checked_add(size).filter(|n| *n <= self.free.len());
        let Some(needed) = needed else {
            self.failures += 1;
            return Err(EngineError::OutOfMemory {
                requested: size,
                available: self.free.len().saturating_sub(padding),
            });
        };

        let free = mem::take(&mut self.free);
        let (taken, rest) = free.split_at_mut(needed);
        self.free = rest;
        self.allocations += 1;

        let region = &mut taken[padding..];
        region.fill(0);
        Ok(region)
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity,
            used: self.cursor(),
            allocations: self.allocations,
            failures: self.failures,
        }
    }
}

/// Arena behind a spin lock, provisioned once.
pub struct LockedArena {
    inner: Mutex<Option<HeapArena>>,
}

impl LockedArena {
    /// An arena with no backing buffer yet.
    pub const fn empty() -> Self {
        LockedArena {
            inner: Mutex::new(None),
        }
    }

    /// Install the backing buffer. Only the first call succeeds.
    pub fn provision(&self, buffer: &'static mut [u8]) -> EngineResult<()> {
        let capacity = buffer.len();
        {
            let mut inner = self.inner.lock();
            if inner.is_some() {
                return Err(EngineError::AlreadyProvisioned);
            }
            *inner = Some(HeapArena::new(buffer));
        }
        info!("[ARENA] provisioned {} bytes", capacity);
        Ok(())
    }

    pub fn is_provisioned(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Allocate `size` zeroed bytes.
    pub fn allocate(&self, size: usize) -> EngineResult<&'static mut [u8]> {
        self.with_arena(size, |arena| arena.allocate(size))
    }

    /// Allocate zeroed memory for `layout`.
    pub fn allocate_layout(&self, layout: Layout) -> EngineResult<&'static mut [u8]> {
        self.with_arena(layout.size(), |arena| arena.allocate_layout(layout))
    }

    fn with_arena(
        &self,
        size: usize,
        allocate: impl FnOnce(&mut HeapArena) -> EngineResult<&'static mut [u8]>,
    ) -> EngineResult<&'static mut [u8]> {
        let result = match self.inner.lock().as_mut() {
            Some(arena) => allocate(arena),
            None => Err(EngineError::OutOfMemory {
                requested: size,
                available: 0,
            }),
        };
        // the lock is released before logging
        if let Err(err) = &result {
            error!("[ARENA] {:?}", err);
        }
        result
    }

    pub fn stats(&self) -> ArenaStats {
        self.inner
            .lock()
            .as_ref()
            .map(HeapArena::stats)
            .unwrap_or_default()
    }
}

unsafe impl GlobalAlloc for LockedArena {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.inner.lock().as_mut() {
            Some(arena) => arena
                .allocate_layout(layout)
                .map_or(ptr::null_mut(), |region| region.as_mut_ptr()),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, _ptr: *mut u8, _layout: Layout) {
        // no individual free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use alloc::vec;

    fn buffer(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0xAAu8; len].into_boxed_slice())
    }

    #[test]
    fn test_allocate_zeroes_and_advances() {
        let mut arena = HeapArena::new(buffer(16));
        let a = arena.allocate(6).unwrap();
        assert_eq!(a.len(), 6);
        assert!(a.iter().all(|b| *b == 0));
        a[0] = 1;
        assert_eq!(arena.cursor(), 6);
        assert_eq!(arena.remaining(), 10);
        assert!(arena.allocate(10).is_ok());
        assert_eq!(arena.cursor(), arena.capacity());
    }

    #[test]
    fn test_exhaustion_leaves_cursor() {
        let mut arena = HeapArena::new(buffer(8));
        arena.allocate(5).unwrap();
        assert_eq!(
            arena.allocate(4).unwrap_err(),
            EngineError::OutOfMemory {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(arena.cursor(), 5);
        assert_eq!(arena.stats().failures, 1);
    }

    #[test]
    fn test_layout_alignment() {
        let mut arena = HeapArena::new(buffer(64));
        arena.allocate(1).unwrap();
        let region = arena.allocate_layout(Layout::from_size_align(8, 8).unwrap()).unwrap();
        assert_eq!(region.as_ptr() as usize % 8, 0);
        assert_eq!(region.len(), 8);
    }

    #[test]
    fn test_provision_once() {
        let arena = LockedArena::empty();
        assert!(!arena.is_provisioned());
        assert!(arena.allocate(1).is_err());
        arena.provision(buffer(32)).unwrap();
        assert_eq!(arena.provision(buffer(32)), Err(EngineError::AlreadyProvisioned));
        assert_eq!(arena.allocate(4).unwrap().len(), 4);
        assert_eq!(arena.stats().used, 4);
    }

    #[test]
    fn test_locked_layout_allocation() {
        let arena = LockedArena::empty();
        assert!(arena.allocate_layout(Layout::new::<u64>()).is_err());
        arena.provision(buffer(64)).unwrap();
        arena.allocate(3).unwrap();
        let region = arena.allocate_layout(Layout::new::<u64>()).unwrap();
        assert_eq!(region.as_ptr() as usize % mem::align_of::<u64>(), 0);
        let stats = arena.stats();
        assert!(stats.used >= 3 + 8);
        assert_eq!(stats.allocations, 2);
        assert!(arena.allocate_layout(Layout::array::<u64>(16).unwrap()).is_err());
        assert_eq!(arena.stats().failures, 1);
    }

    #[test]
    fn test_global_alloc_interface() {
        let arena = LockedArena::empty();
        arena.provision(buffer(32)).unwrap();
        let layout = Layout::from_size_align(4, 4).unwrap();
        let p = unsafe { arena.alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 4, 0);
        let big = Layout::from_size_align(64, 1).unwrap();
        assert!(unsafe { arena.alloc(big) }.is_null());
    }
}
