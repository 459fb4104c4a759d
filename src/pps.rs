//! Component C5 (the PPS report/wrap hooks) and the ambient thread
//! harness (SPEC_FULL.md §2a) standing in for the external PPS
//! edge-detection collaborator.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::pool::SegmentHandle;
use crate::session::SessionShared;
use crate::sink::SampleSink;
use crate::time::TimeDrift;

/// Fixes required before a pulse is trusted enough to ship. Early pulses
/// may arrive before the receiver has stabilized; shipping them would
/// hand the consumer wildly inaccurate times.
pub const PPS_MIN_FIXES: u32 = 3;

/// Invoked on every detected pulse edge.
///
/// Reads the handful of session fields that can change concurrently
/// (`ship_to_ntpd`, `fix_count`, `leap_notify`) through [`SessionShared`]
/// rather than a `&Session`, since this runs on the PPS listener thread
/// while the main/decoder thread continues to own the `Session` itself.
/// Never mutates the pool's `in_use` bookkeeping.
pub fn report_hook(
    shared: &SessionShared,
    sink: &SampleSink,
    pps_segment: Option<&SegmentHandle>,
    td: TimeDrift,
) -> &'static str {
    if !shared.ship_to_ntpd() {
        return "skipped ship_to_ntp=0";
    }
    if shared.fix_count() <= PPS_MIN_FIXES {
        return "no fix";
    }

    let leap = shared.leap_notify();
    let mut label = "accepted";
    if sink.is_open() {
        label = "accepted chrony sock";
        sink.send(td, leap);
    }
    if let Some(pps) = pps_segment {
        pps.publish(td, crate::segment::PRECISION_PPS, leap);
    }
    label
}

/// Invoked once, when the PPS listener is shutting down. Closes the
/// datagram sink; safe even if it was never opened.
pub fn wrap_hook(sink: &mut SampleSink) {
    sink.close();
}

/// Supplies pulse edges to a [`PpsListener`]. In production this is
/// backed by the kernel PPS API (out of scope here, per SPEC_FULL.md
/// §1); in tests it's a synthetic generator.
///
/// `next_pulse` blocks until the next edge (or cancellation) and returns
/// `None` to signal the listener should stop.
pub trait PulseSource: Send + 'static {
    fn next_pulse(&mut self) -> Option<TimeDrift>;
}

/// Owns the PPS listener thread for one session's PPS segment: runs
/// `source.next_pulse()` in a loop, calling [`report_hook`] per edge,
/// until cancelled or the source is exhausted, then calls [`wrap_hook`]
/// once before the thread exits.
///
/// Cancellation is an `mpsc` send rather than an `AtomicBool` spin — the
/// same pattern this codebase's own epoll waker thread uses to wake a
/// blocked reader without polling (see `sample::auxiliary::iter::cow`
/// in the upstream crate this one descends from).
pub struct PpsListener {
    cancel_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PpsListener {
    pub fn spawn<S: PulseSource>(
        mut source: S,
        shared: std::sync::Arc<SessionShared>,
        mut sink: SampleSink,
        pps_segment: Option<SegmentHandle>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if cancel_rx.try_recv().is_ok() {
                    break;
                }
                match source.next_pulse() {
                    Some(td) => {
                        let label = report_hook(&shared, &sink, pps_segment.as_ref(), td);
                        log::trace!("PPS report_hook result: {label}");
                    }
                    None => break,
                }
            }
            wrap_hook(&mut sink);
        });

        Self {
            cancel_tx,
            handle: Some(handle),
        }
    }

    /// Request the listener stop and block until its thread exits.
    ///
    /// The listener may be parked inside `next_pulse` when cancellation
    /// arrives; it's `PulseSource::next_pulse`'s responsibility to return
    /// within bounded time once it observes the request (the kernel-PPS
    /// implementation does this by polling its own blocking read against
    /// a short timeout).
    pub fn stop(mut self) {
        let _ = self.cancel_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
