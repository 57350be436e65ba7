//! Scratch arena for transient input buffers.
//!
//! Every LOAD request copies its encoded payload into a scratch region, hands
//! the region to the engine and releases it before the result is reported.
//! Regions are separate heap allocations, so acquiring more scratch space never
//! moves the engine's pixel surface.

use std::collections::HashMap;

/// Default arena budget (64 MiB).
pub const DEFAULT_ARENA_LIMIT: usize = 64 * 1024 * 1024;

/// Opaque handle to a live scratch region.
///
/// Handles are never reused, so a stale handle is always detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchHandle(u64);

impl std::fmt::Display for ScratchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scratch#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("scratch regions must be at least one byte")]
    ZeroSize,

    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },

    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("unknown or released handle {0}")]
    UnknownHandle(ScratchHandle),

    #[error("region {handle} holds {expected} bytes, got {actual}")]
    SizeMismatch {
        handle: ScratchHandle,
        expected: usize,
        actual: usize,
    },
}

/// Worker-private scratch memory with an explicit byte budget.
#[derive(Debug)]
pub struct ScratchArena {
    limit: usize,
    in_use: usize,
    next_id: u64,
    regions: HashMap<ScratchHandle, Box<[u8]>>,
}

impl Default for ScratchArena {
    fn default() -> Self {
        Self::new(DEFAULT_ARENA_LIMIT)
    }
}

impl ScratchArena {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: 0,
            next_id: 0,
            regions: HashMap::new(),
        }
    }

    /// Acquire a zero-initialized region of exactly `size` bytes.
    pub fn acquire(&mut self, size: usize) -> Result<ScratchHandle, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSize);
        }

        let available = self.limit.saturating_sub(self.in_use);
        if size > available {
            tracing::warn!(requested = size, available, "Scratch arena exhausted");
            return Err(AllocationError::Exhausted {
                requested: size,
                available,
            });
        }

        let mut region = Vec::new();
        region
            .try_reserve_exact(size)
            .map_err(|_| AllocationError::OutOfMemory { requested: size })?;
        region.resize(size, 0);

        let handle = ScratchHandle(self.next_id);
        self.next_id += 1;
        self.in_use += size;
        self.regions.insert(handle, region.into_boxed_slice());

        tracing::debug!(%handle, size, in_use = self.in_use, "Acquired scratch region");
        Ok(handle)
    }

    /// Overwrite the whole region with `bytes`.
    pub fn fill(&mut self, handle: ScratchHandle, bytes: &[u8]) -> Result<(), AllocationError> {
        let region = self
            .regions
            .get_mut(&handle)
            .ok_or(AllocationError::UnknownHandle(handle))?;

        if region.len() != bytes.len() {
            return Err(AllocationError::SizeMismatch {
                handle,
                expected: region.len(),
                actual: bytes.len(),
            });
        }

        region.copy_from_slice(bytes);
        Ok(())
    }

    pub fn region(&self, handle: ScratchHandle) -> Result<&[u8], AllocationError> {
        self.regions
            .get(&handle)
            .map(|r| &r[..])
            .ok_or(AllocationError::UnknownHandle(handle))
    }

    /// Invalidate `handle` and return its bytes to the budget.
    pub fn release(&mut self, handle: ScratchHandle) -> Result<(), AllocationError> {
        let region = self
            .regions
            .remove(&handle)
            .ok_or(AllocationError::UnknownHandle(handle))?;
        self.in_use -= region.len();
        tracing::debug!(%handle, size = region.len(), in_use = self.in_use, "Released scratch region");
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn bytes_in_use(&self) -> usize {
        self.in_use
    }

    pub fn live_regions(&self) -> usize {
        self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_zeroed_region_of_requested_size() {
        let mut arena = ScratchArena::new(1024);
        let handle = arena.acquire(16).unwrap();

        assert_eq!(arena.region(handle).unwrap(), &[0u8; 16]);
        assert_eq!(arena.bytes_in_use(), 16);
        assert_eq!(arena.live_regions(), 1);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut arena = ScratchArena::new(1024);
        assert_eq!(arena.acquire(0), Err(AllocationError::ZeroSize));
        assert_eq!(arena.live_regions(), 0);
    }

    #[test]
    fn fill_then_read_back() {
        let mut arena = ScratchArena::new(1024);
        let handle = arena.acquire(4).unwrap();
        arena.fill(handle, &[1, 2, 3, 4]).unwrap();
        assert_eq!(arena.region(handle).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn fill_with_wrong_length_fails() {
        let mut arena = ScratchArena::new(1024);
        let handle = arena.acquire(4).unwrap();
        let err = arena.fill(handle, &[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            AllocationError::SizeMismatch {
                handle,
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn release_returns_budget() {
        let mut arena = ScratchArena::new(100);
        let handle = arena.acquire(60).unwrap();
        arena.release(handle).unwrap();

        assert_eq!(arena.bytes_in_use(), 0);
        assert_eq!(arena.live_regions(), 0);
        arena.acquire(100).unwrap();
    }

    #[test]
    fn double_release_is_an_error() {
        let mut arena = ScratchArena::new(100);
        let handle = arena.acquire(10).unwrap();
        arena.release(handle).unwrap();

        assert_eq!(
            arena.release(handle),
            Err(AllocationError::UnknownHandle(handle))
        );
        assert!(arena.region(handle).is_err());
    }

    #[test]
    fn exhaustion_reports_available_bytes() {
        let mut arena = ScratchArena::new(100);
        let _held = arena.acquire(70).unwrap();

        assert_eq!(
            arena.acquire(40),
            Err(AllocationError::Exhausted {
                requested: 40,
                available: 30
            })
        );
        assert_eq!(arena.bytes_in_use(), 70);
    }

    #[test]
    fn live_handles_never_alias() {
        let mut arena = ScratchArena::new(1024);
        let a = arena.acquire(4).unwrap();
        let b = arena.acquire(4).unwrap();
        assert_ne!(a, b);

        arena.fill(a, &[1; 4]).unwrap();
        arena.fill(b, &[2; 4]).unwrap();
        assert_eq!(arena.region(a).unwrap(), &[1; 4]);
        assert_eq!(arena.region(b).unwrap(), &[2; 4]);
    }

    #[test]
    fn handles_are_not_reused_after_release() {
        let mut arena = ScratchArena::new(1024);
        let a = arena.acquire(4).unwrap();
        arena.release(a).unwrap();
        let b = arena.acquire(4).unwrap();
        assert_ne!(a, b);
    }
}
