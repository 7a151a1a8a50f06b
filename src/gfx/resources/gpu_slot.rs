//! Lazily materialized GPU object slot
//!
//! Shared objects such as the capture framebuffer and the shadow samplers are
//! created on first use and destroyed once at teardown. `GpuSlot` makes that
//! lifecycle explicit: `Unallocated -> Allocated -> Freed`, with no way back
//! from `Freed`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuSlot<T> {
    #[default]
    Unallocated,
    Allocated(T),
    Freed,
}

impl<T: Copy> GpuSlot<T> {
    pub fn get(&self) -> Option<T> {
        match self {
            GpuSlot::Allocated(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self, GpuSlot::Allocated(_))
    }

    /// Runs `create` only if nothing has been allocated yet.
    /// Returns the live handle, or `None` once the slot has been freed.
    pub fn get_or_create(&mut self, create: impl FnOnce() -> T) -> Option<T> {
        if let GpuSlot::Unallocated = self {
            *self = GpuSlot::Allocated(create());
        }
        self.get()
    }

    /// Moves the slot to `Freed`, handing back the handle to release if any
    pub fn free(&mut self) -> Option<T> {
        let handle = self.get();
        *self = GpuSlot::Freed;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_once() {
        let mut slot = GpuSlot::default();
        let mut calls = 0;
        assert_eq!(
            slot.get_or_create(|| {
                calls += 1;
                5
            }),
            Some(5)
        );
        assert_eq!(
            slot.get_or_create(|| {
                calls += 1;
                6
            }),
            Some(5)
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_freed_slot_stays_freed() {
        let mut slot = GpuSlot::Allocated(3);
        assert_eq!(slot.free(), Some(3));
        assert_eq!(slot.free(), None);
        assert_eq!(slot.get_or_create(|| 9), None);
        assert_eq!(slot, GpuSlot::Freed);
    }

    #[test]
    fn test_free_unallocated_releases_nothing() {
        let mut slot: GpuSlot<u32> = GpuSlot::Unallocated;
        assert_eq!(slot.free(), None);
        assert!(!slot.is_allocated());
    }
}
