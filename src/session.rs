//! The per-device session façade (component C4): binds zero, one, or
//! two shared-memory segments plus an optional sample sink to one
//! device, and owns the PPS listener thread when one is running.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::context::Context;
use crate::pool::SegmentHandle;
use crate::pps::PpsListener;
use crate::segment::PRECISION_CLOCK;
use crate::sink::SampleSink;
use crate::time::TimeDrift;

/// Transport a device session is bound to.
///
/// gpsd's own `sourcetype` enum is considerably wider than this (it also
/// distinguishes Bluetooth, ACM, TCP/UDP feeds, and more); this crate
/// only needs enough of it to answer the two questions SPEC_FULL.md
/// §4.4/§9 ask: "is this a test harness session" and "is this a
/// PPS-capable transport". Every other real transport behaves like
/// [`Other`][SourceType::Other].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceType {
    /// A real USB GPS receiver. PPS-capable.
    Usb,
    /// A real serial (RS-232) GPS receiver. PPS-capable.
    Rs232,
    /// A pseudo-terminal session, used to replay captured GPS traffic
    /// for testing. `activate` is a no-op for these.
    Pty,
    /// Any other transport (network feed, Bluetooth, etc). Gets a
    /// `clock_segment` like any real device, but is never PPS-capable —
    /// preserving the original's explicit allow-list rather than
    /// guessing which other transports might carry a meaningful PPS
    /// edge.
    Other,
}

impl SourceType {
    fn is_test_harness(self) -> bool {
        matches!(self, SourceType::Pty)
    }

    fn is_pps_capable(self) -> bool {
        matches!(self, SourceType::Usb | SourceType::Rs232)
    }
}

/// Static configuration for a session, supplied once at creation.
pub struct SessionConfig {
    pub device_path: PathBuf,
    pub source_type: SourceType,
    /// Whether this process is running with the privilege that grants
    /// access to segments 0/1 and to `/var/run` (rather than `/tmp`) for
    /// the sample sink.
    pub privileged: bool,
}

/// The session fields [`crate::pps::report_hook`] reads, shared between
/// the main/decoder thread (which updates them as fixes arrive and leap
/// state changes) and the PPS listener thread (which only reads them).
///
/// Tearing on these reads is acceptable by the same reasoning
/// SPEC_FULL.md §2c/§5 apply to [`Context`]'s `leap_notify`: they're
/// small scalars and a stale read self-corrects on the next pulse.
pub struct SessionShared {
    ship_to_ntpd: AtomicBool,
    fix_count: AtomicU32,
    leap_notify: AtomicI32,
}

impl SessionShared {
    pub fn new(ship_to_ntpd: bool, fix_count: u32, leap_notify: i32) -> Self {
        Self {
            ship_to_ntpd: AtomicBool::new(ship_to_ntpd),
            fix_count: AtomicU32::new(fix_count),
            leap_notify: AtomicI32::new(leap_notify),
        }
    }

    pub fn ship_to_ntpd(&self) -> bool {
        self.ship_to_ntpd.load(Ordering::Relaxed)
    }

    pub fn set_ship_to_ntpd(&self, value: bool) {
        self.ship_to_ntpd.store(value, Ordering::Relaxed);
    }

    pub fn fix_count(&self) -> u32 {
        self.fix_count.load(Ordering::Relaxed)
    }

    pub fn record_fix(&self) {
        self.fix_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn leap_notify(&self) -> i32 {
        self.leap_notify.load(Ordering::Relaxed)
    }

    pub fn set_leap_notify(&self, value: i32) {
        self.leap_notify.store(value, Ordering::Relaxed);
    }
}

/// Per-device session state.
pub struct Session {
    config: SessionConfig,
    clock_segment: Option<SegmentHandle>,
    pps_segment: Option<SegmentHandle>,
    listener: Option<PpsListener>,
    shared: Arc<SessionShared>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            clock_segment: None,
            pps_segment: None,
            listener: None,
            shared: Arc::new(SessionShared::new(true, 0, crate::segment::LEAP_NOTINSYNC)),
        }
    }

    pub fn device_path(&self) -> &std::path::Path {
        &self.config.device_path
    }

    pub fn shared(&self) -> &SessionShared {
        &self.shared
    }

    pub fn clock_segment(&self) -> Option<&SegmentHandle> {
        self.clock_segment.as_ref()
    }

    pub fn pps_segment(&self) -> Option<&SegmentHandle> {
        self.pps_segment.as_ref()
    }

    pub fn is_pps_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Refresh this session's copy of the context's leap-second hint.
    /// The decoder layer updates [`Context`] asynchronously; callers on
    /// the main/decoder thread should call this before each
    /// [`publish_fix`][Self::publish_fix] so both the fix and PPS paths
    /// stamp a reasonably current value.
    pub fn sync_leap_notify(&self, ctx: &Context) {
        self.shared.set_leap_notify(ctx.leap_notify());
    }

    /// Publish a fix-derived (non-PPS) observation on `clock_segment`, if
    /// one is leased. Precision is always [`PRECISION_CLOCK`] for this
    /// path — the PPS path goes through [`crate::pps::report_hook`]
    /// instead, on the listener thread.
    pub fn publish_fix(&self, td: TimeDrift) {
        if let Some(seg) = &self.clock_segment {
            seg.publish(td, PRECISION_CLOCK, self.shared.leap_notify());
        }
    }

    /// Lease segments (and, for PPS-capable real devices, start the
    /// listener thread) for this session. A no-op for test/simulated
    /// sources.
    ///
    /// `spawn_pulse_source` is called only once both a clock segment and
    /// a PPS segment were successfully leased, and only then is the
    /// datagram sink opened and the listener started; its result becomes
    /// the listener's [`crate::pps::PulseSource`]. Production callers
    /// hand it a kernel-PPS-backed source; tests hand it a synthetic one.
    pub fn activate<F, S>(&mut self, ctx: &mut Context, spawn_pulse_source: F)
    where
        F: FnOnce() -> S,
        S: crate::pps::PulseSource,
    {
        if self.config.source_type.is_test_harness() {
            return;
        }

        self.sync_leap_notify(ctx);
        self.clock_segment = ctx.pool.alloc();
        if self.clock_segment.is_none() {
            log::info!("NTPD ntpshm_alloc() failed");
            return;
        }

        if !self.config.source_type.is_pps_capable() {
            return;
        }

        self.pps_segment = ctx.pool.alloc();
        if self.pps_segment.is_none() {
            log::info!("NTPD ntpshm_alloc(1) failed");
            return;
        }

        let mut sink = SampleSink::new();
        sink.open(&self.config.device_path, self.config.privileged);

        let source = spawn_pulse_source();
        self.listener = Some(PpsListener::spawn(
            source,
            Arc::clone(&self.shared),
            sink,
            self.pps_segment.clone(),
        ));
    }

    /// Return leased segments to the pool, stop and join the PPS
    /// listener if one is running, and close the sample sink.
    /// Idempotent: calling this on a session that was never activated
    /// (or was already deactivated) does nothing.
    pub fn deactivate(&mut self, ctx: &mut Context) {
        if let Some(handle) = self.clock_segment.take() {
            ctx.pool.free(handle);
        }
        if let Some(listener) = self.listener.take() {
            // Joining here drives `wrap_hook`, which closes the sink
            // this session opened in `activate` — the listener thread
            // owns it for the duration of its run.
            listener.stop();
        }
        if let Some(handle) = self.pps_segment.take() {
            ctx.pool.free(handle);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;

    struct NeverPulse;
    impl crate::pps::PulseSource for NeverPulse {
        fn next_pulse(&mut self) -> Option<TimeDrift> {
            None
        }
    }

    fn fake_ctx() -> Context {
        let mut ctx = Context::with_pool(crate::pool::SegmentPool::empty());
        ctx.pool_mut().inject_fake_segments_for_test(crate::pool::NTPSHMSEGS);
        ctx
    }

    #[test]
    fn pty_sessions_never_activate() {
        let mut ctx = fake_ctx();
        let mut session = Session::new(SessionConfig {
            device_path: "/dev/pts/3".into(),
            source_type: SourceType::Pty,
            privileged: true,
        });
        session.activate(&mut ctx, || NeverPulse);
        assert!(session.clock_segment().is_none());
        assert_eq!(ctx.pool_mut().in_use_count(), 0);
    }

    #[test]
    fn usb_session_gets_both_segments_and_a_listener() {
        let mut ctx = fake_ctx();
        let mut session = Session::new(SessionConfig {
            device_path: "/dev/ttyUSB0".into(),
            source_type: SourceType::Usb,
            privileged: true,
        });
        session.activate(&mut ctx, || NeverPulse);
        assert!(session.clock_segment().is_some());
        assert!(session.pps_segment().is_some());
        assert!(session.is_pps_active());
        session.deactivate(&mut ctx);
        assert_eq!(ctx.pool_mut().in_use_count(), 0);
    }

    #[test]
    fn other_source_gets_clock_segment_but_no_listener() {
        let mut ctx = fake_ctx();
        let mut session = Session::new(SessionConfig {
            device_path: "/dev/net-feed".into(),
            source_type: SourceType::Other,
            privileged: true,
        });
        session.activate(&mut ctx, || NeverPulse);
        assert!(session.clock_segment().is_some());
        assert!(session.pps_segment().is_none());
        assert!(!session.is_pps_active());
    }

    #[test]
    fn deactivate_without_activate_is_a_harmless_noop() {
        let mut ctx = fake_ctx();
        let mut session = Session::new(SessionConfig {
            device_path: "/dev/ttyUSB0".into(),
            source_type: SourceType::Usb,
            privileged: true,
        });
        session.deactivate(&mut ctx); // must not panic
        assert_eq!(ctx.pool_mut().in_use_count(), 0);
    }

    #[test]
    fn double_deactivate_is_idempotent() {
        let mut ctx = fake_ctx();
        let mut session = Session::new(SessionConfig {
            device_path: "/dev/ttyUSB0".into(),
            source_type: SourceType::Usb,
            privileged: true,
        });
        session.activate(&mut ctx, || NeverPulse);
        session.deactivate(&mut ctx);
        session.deactivate(&mut ctx); // must not panic or double-free
        assert_eq!(ctx.pool_mut().in_use_count(), 0);
    }

    #[test]
    fn reactivating_after_deactivate_reuses_the_same_indices() {
        let mut ctx = fake_ctx();
        let mut a = Session::new(SessionConfig {
            device_path: "/dev/ttyUSB0".into(),
            source_type: SourceType::Usb,
            privileged: true,
        });
        a.activate(&mut ctx, || NeverPulse);
        let first_clock_idx = a.clock_segment().unwrap().index();
        let first_pps_idx = a.pps_segment().unwrap().index();
        a.deactivate(&mut ctx);

        let mut b = Session::new(SessionConfig {
            device_path: "/dev/ttyUSB1".into(),
            source_type: SourceType::Usb,
            privileged: true,
        });
        b.activate(&mut ctx, || NeverPulse);
        assert_eq!(b.clock_segment().unwrap().index(), first_clock_idx);
        assert_eq!(b.pps_segment().unwrap().index(), first_pps_idx);
        b.deactivate(&mut ctx);
    }
}
