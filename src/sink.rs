//! The chrony `SOCK` sample sink (component C3): a per-session connected
//! `AF_UNIX` datagram socket carrying one [`SockSample`] per pulse.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use crate::time::TimeDrift;

/// Magic value chrony's `SOCK` refclock driver requires to discriminate
/// this payload from anything else that might land on the socket.
pub const SOCK_MAGIC: i32 = 0x534F_434B;

/// Wire layout of one chrony `SOCK` sample. `tv` is a 64-bit LP64
/// `timeval` (the only ABI this crate targets).
#[repr(C)]
pub struct SockSample {
    pub tv_sec: i64,
    pub tv_usec: i64,
    pub offset: f64,
    pub pulse: i32,
    pub leap: i32,
    pub _pad: i32,
    pub magic: i32,
}

impl SockSample {
    fn from_pulse(td: TimeDrift, leap: i32) -> Self {
        Self {
            tv_sec: td.clock.sec,
            tv_usec: td.clock.usec() as i64,
            offset: td.offset_secs(),
            pulse: 0,
            leap,
            _pad: 0,
            magic: SOCK_MAGIC,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self as *const Self as *const u8,
                std::mem::size_of::<Self>(),
            )
        }
    }
}

/// Result of [`SampleSink::open`]. Absence of the endpoint file is the
/// common case (no chrony `SOCK` driver configured) and is not an error.
#[derive(Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Connected,
    Unavailable,
}

/// Per-session datagram endpoint. Starts closed; [`open`][Self::open] is
/// best-effort and [`send`][Self::send] never surfaces a failure to the
/// caller — the consumer may simply have restarted.
#[derive(Default)]
pub struct SampleSink {
    socket: Option<UnixDatagram>,
}

impl SampleSink {
    pub fn new() -> Self {
        Self { socket: None }
    }

    /// Derives `/var/run/chrony.<basename>.sock` (privileged) or
    /// `/tmp/chrony.<basename>.sock` (unprivileged) from `device_path`,
    /// and connects to it if it exists.
    ///
    /// Absence of the path is logged at debug level (gpsd's `LOG_PROG`);
    /// a connect failure once the path does exist is logged at info
    /// level. Neither is fatal to the caller.
    pub fn open(&mut self, device_path: &Path, privileged: bool) -> OpenOutcome {
        let path = endpoint_path(device_path, privileged);

        if !path.exists() {
            log::debug!("PPS chrony socket {} doesn't exist", path.display());
            return OpenOutcome::Unavailable;
        }

        match UnixDatagram::unbound().and_then(|s| s.connect(&path).map(|_| s)) {
            Ok(socket) => {
                log::debug!("PPS using chrony socket: {}", path.display());
                self.socket = Some(socket);
                OpenOutcome::Connected
            }
            Err(e) => {
                log::info!("PPS connect chrony socket failed: {}: {}", path.display(), e);
                OpenOutcome::Unavailable
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Synthesize and transmit one sample for this pulse. Best-effort:
    /// any send error is silently absorbed.
    pub fn send(&self, td: TimeDrift, leap: i32) {
        if let Some(socket) = &self.socket {
            let sample = SockSample::from_pulse(td, leap);
            let _ = socket.send(sample.as_bytes());
        }
    }

    /// Release the endpoint, if open. Safe to call more than once.
    pub fn close(&mut self) {
        self.socket = None;
    }
}

fn endpoint_path(device_path: &Path, privileged: bool) -> PathBuf {
    let basename = device_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = if privileged { "/var/run" } else { "/tmp" };
    PathBuf::from(format!("{dir}/chrony.{basename}.sock"))
}
