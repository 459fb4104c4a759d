//! The segment pool (component C2): attaches the fixed bank of
//! shared-memory segments once, at startup, and leases them out to
//! sessions first-come-first-served.

use std::mem::size_of;
use std::sync::Arc;

use crate::segment::{Segment, ShmTimeRaw};

/// `"NTP0"` as a big-endian-read 32-bit value — the base of the SysV key
/// range ntpd/gpsd both use. Segment `i` attaches at key `NTPD_BASE + i`.
pub const NTPD_BASE: i32 = 0x4e54_5030;

/// Default bank size. ntpd's own default is 0 (it only grows the bank
/// when configured); gpsd always attaches this many so it has two
/// segments (clock + pps) per device for up to 4 devices.
pub const NTPSHMSEGS: usize = 8;

/// Handle to a leased segment, returned by [`SegmentPool::alloc`] and
/// consumed by [`SegmentPool::free`].
///
/// Cloning a handle is cheap (it's an index plus an `Arc`) but the pool
/// and this crate's higher-level types never hand out more than one
/// live handle for a given index at a time; see [`SegmentPool::alloc`].
#[derive(Clone)]
pub struct SegmentHandle {
    index: usize,
    segment: Arc<Segment>,
}

impl SegmentHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::ops::Deref for SegmentHandle {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.segment
    }
}

struct Slot {
    segment: Option<Arc<Segment>>,
    in_use: bool,
}

/// Fixed bank of `NTPSHMSEGS` shared-memory slots.
///
/// Attachment happens once, in [`init`][Self::init], ideally while the
/// process still holds the privilege segments 0 and 1 need. Leasing
/// (`alloc`/`free`) happens continuously afterwards and is only ever
/// called from the main/decoder thread (see crate-level concurrency
/// notes); this type does not internally lock `in_use` bookkeeping.
pub struct SegmentPool {
    slots: Vec<Slot>,
}

impl SegmentPool {
    /// An empty pool with no segments attached. Exists so tests (and
    /// callers who want to inject segments directly) don't have to go
    /// through `init`'s real `shmget`/`shmat`.
    pub fn empty() -> Self {
        Self {
            slots: (0..NTPSHMSEGS)
                .map(|_| Slot {
                    segment: None,
                    in_use: false,
                })
                .collect(),
        }
    }

    /// Attach every segment the calling privilege permits.
    ///
    /// Segments 0 and 1 use permissions `0600` and are skipped entirely
    /// (left unattached) unless `privileged` is set — matching ntpd's own
    /// rule that only root-owned processes touch those two. Segments 2
    /// and up use `0666` and are always attempted.
    ///
    /// Attachment failure is not fatal: it's logged at error level and
    /// the slot is left unattached, so a later [`alloc`][Self::alloc]
    /// simply skips it.
    pub fn init(privileged: bool) -> Self {
        let mut pool = Self::empty();
        for i in 0..NTPSHMSEGS {
            if i < 2 && !privileged {
                continue;
            }
            let key = NTPD_BASE + i as i32;
            let perms: u32 = if i < 2 { 0o600 } else { 0o666 };
            match attach(key, perms) {
                Ok(segment) => pool.slots[i].segment = Some(Arc::new(segment)),
                Err(e) => log::error!("NTPD shmget/shmat for segment {i}: {e}"),
            }
        }
        pool
    }

    /// Return the first unattached-or-free slot, in index order, mark it
    /// in use, reset it to the documented initial state, and return a
    /// handle. `None` if every attached slot is already leased (or no
    /// slot attached at all).
    ///
    /// Scanning in index order is what makes devices activated earlier
    /// receive lower-indexed segments; the pair a single device ends up
    /// with (clock + pps) need not be adjacent.
    pub fn alloc(&mut self) -> Option<SegmentHandle> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(segment) = &slot.segment {
                if !slot.in_use {
                    slot.in_use = true;
                    segment.reset_for_lease();
                    return Some(SegmentHandle {
                        index,
                        segment: Arc::clone(segment),
                    });
                }
            }
        }
        None
    }

    /// Release a handle back to the pool. Returns `false` if the handle
    /// doesn't belong to this pool (which should not happen in normal
    /// use; it's not an error state this crate otherwise acts on).
    pub fn free(&mut self, handle: SegmentHandle) -> bool {
        match self.slots.get_mut(handle.index) {
            Some(slot) if slot.in_use => {
                slot.in_use = false;
                true
            }
            _ => false,
        }
    }

    /// Number of slots currently leased out. Exposed for tests asserting
    /// the alloc/free bijection §8 requires.
    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use).count()
    }
}

fn attach(key: i32, perms: u32) -> Result<Segment, crate::error::AttachError> {
    let size = size_of::<ShmTimeRaw>();
    let shmid = crate::ffi::shm::shmget(key, size, perms)?;
    let ptr = unsafe { crate::ffi::shm::shmat(shmid)? };
    Ok(unsafe { Segment::from_raw(ptr, shmid) })
}

#[cfg(test)]
impl SegmentPool {
    /// Attaches `n` heap-backed (not actually shared) segments in place
    /// of real `shmget`/`shmat` attachments, so tests can exercise
    /// `alloc`/`free`/`activate`/`deactivate` without root or SysV IPC.
    pub(crate) fn inject_fake_segments_for_test(&mut self, n: usize) {
        for slot in self.slots.iter_mut().take(n) {
            let layout = std::alloc::Layout::new::<ShmTimeRaw>();
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) } as *mut std::ffi::c_void;
            let segment = unsafe { Segment::from_raw(ptr, 0) };
            slot.segment = Some(Arc::new(segment));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pool_with_fake_segments(n: usize) -> SegmentPool {
        let mut pool = SegmentPool::empty();
        pool.inject_fake_segments_for_test(n);
        pool
    }

    #[test]
    fn alloc_scans_in_index_order() {
        let mut pool = pool_with_fake_segments(NTPSHMSEGS);
        let first = pool.alloc().unwrap();
        let second = pool.alloc().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
    }

    #[test]
    fn alloc_and_free_are_bijective() {
        let mut pool = pool_with_fake_segments(NTPSHMSEGS);
        let mut leased = Vec::new();
        while let Some(h) = pool.alloc() {
            leased.push(h);
        }
        assert_eq!(pool.in_use_count(), NTPSHMSEGS);
        assert!(pool.alloc().is_none());

        for h in leased {
            assert!(pool.free(h));
        }
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn exhaustion_after_n_plus_one_requests() {
        let mut pool = pool_with_fake_segments(8);
        let mut handles = Vec::new();
        for _ in 0..8 {
            handles.push(pool.alloc().unwrap());
        }
        assert!(pool.alloc().is_none(), "ninth allocation must fail");
    }

    #[test]
    fn unattached_slots_are_never_handed_out() {
        // Simulates an unprivileged start: slots 0 and 1 stay None.
        let mut pool = pool_with_fake_segments(NTPSHMSEGS);
        pool.slots[0].segment = None;
        pool.slots[1].segment = None;

        let first = pool.alloc().unwrap();
        assert_eq!(first.index(), 2);
    }

    #[test]
    fn freeing_unknown_handle_index_is_harmless() {
        let mut pool = pool_with_fake_segments(1);
        let handle = pool.alloc().unwrap();
        assert!(pool.free(handle.clone()));
        // Second free of the same (now-unleased) index reports failure
        // rather than panicking or double-releasing.
        assert!(!pool.free(handle));
    }
}
