//! Publishes GPS-derived wall-clock timestamps to external
//! time-keeping daemons (`ntpd`, `chrony`) over two IPC channels:
//!
//! - a lock-free SysV shared-memory refclock ([`segment`], [`pool`]),
//!   the mode-1 `shmTime` handshake `ntpd`'s `refclock_shm.c` and
//!   chrony's `refclock_shm.c` both understand;
//! - a connected `AF_UNIX` datagram socket ([`sink`]) carrying one
//!   nanosecond-resolution sample per PPS pulse, the format chrony's
//!   `SOCK` refclock driver expects.
//!
//! [`session::Session`] is the per-device façade that leases segments
//! from a process-wide [`context::Context`], and [`pps::report_hook`] /
//! [`pps::wrap_hook`] are what a PPS listener thread calls on every
//! pulse edge and at shutdown, respectively.
//!
//! ## Example
//!
//! ```rust
//! use ntpshm_bridge::context::Context;
//! use ntpshm_bridge::pps::PulseSource;
//! use ntpshm_bridge::session::{Session, SessionConfig, SourceType};
//! use ntpshm_bridge::time::{GpsTimestamp, TimeDrift};
//!
//! struct NoPulses;
//! impl PulseSource for NoPulses {
//!     fn next_pulse(&mut self) -> Option<TimeDrift> {
//!         None
//!     }
//! }
//!
//! let mut ctx = Context::init(false /* not running as root */);
//!
//! let mut session = Session::new(SessionConfig {
//!     device_path: "/dev/ttyUSB0".into(),
//!     source_type: SourceType::Usb,
//!     privileged: false,
//! });
//!
//! session.activate(&mut ctx, || NoPulses);
//! session.sync_leap_notify(&ctx);
//! session.publish_fix(TimeDrift::new(
//!     GpsTimestamp::new(1_700_000_000, 0),
//!     GpsTimestamp::new(1_700_000_000, 0),
//! ));
//! session.deactivate(&mut ctx);
//! ```

pub mod context;
mod error;
mod ffi;
pub mod pool;
pub mod pps;
pub mod segment;
pub mod session;
pub mod sink;
pub mod time;

pub use error::AttachError;
