//! The process-wide context (component C6): owns the segment bank and
//! the leap-second hint every publisher stamps onto its writes.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::pool::SegmentPool;
use crate::segment::LEAP_NOTINSYNC;

/// Created once at process start, torn down at process exit. `leap`
/// is written by one producer (the almanac/leap-second decoder, out of
/// this crate's scope) and read by every session's publishes; tearing
/// is acceptable the same way it is for [`crate::session::SessionShared`]
/// — a stale read self-corrects on the next publish.
pub struct Context {
    pub(crate) pool: SegmentPool,
    leap: AtomicI32,
}

impl Context {
    /// Attach the segment bank. `privileged` should reflect the
    /// process's effective uid at the time of the call — this must run
    /// before any privilege-dropping, since segments 0/1 require root.
    pub fn init(privileged: bool) -> Self {
        Self {
            pool: SegmentPool::init(privileged),
            leap: AtomicI32::new(LEAP_NOTINSYNC),
        }
    }

    pub fn with_pool(pool: SegmentPool) -> Self {
        Self {
            pool,
            leap: AtomicI32::new(LEAP_NOTINSYNC),
        }
    }

    pub fn pool_mut(&mut self) -> &mut SegmentPool {
        &mut self.pool
    }

    pub fn leap_notify(&self) -> i32 {
        self.leap.load(Ordering::Relaxed)
    }

    /// Called by the (out-of-scope) almanac/leap-second decoder whenever
    /// its hint changes.
    pub fn set_leap_notify(&self, value: i32) {
        self.leap.store(value, Ordering::Relaxed);
    }
}
