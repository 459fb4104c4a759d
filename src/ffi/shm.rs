use std::ffi::c_void;
use std::io::Error;

use crate::error::AttachError;

/// `shmget(2)` + `IPC_CREAT`, returning the segment id.
///
/// `perms` is the low 9 bits ntpd/chrony expect (`0600` or `0666`, see
/// [`crate::pool`]); `size` is `size_of::<ShmTimeRaw>()`.
pub fn shmget(key: i32, size: usize, perms: u32) -> Result<i32, AttachError> {
    let flags = libc::IPC_CREAT | perms as i32;
    let id = unsafe { libc::shmget(key as libc::key_t, size, flags) };
    if id == -1 {
        Err(AttachError::ShmGet {
            key,
            size,
            perms,
            source: Error::last_os_error(),
        })
    } else {
        Ok(id)
    }
}

/// `shmat(2)` with no address hint and no flags, the call ntpd/gpsd both
/// make. The returned pointer is valid for the lifetime of the process
/// (or until an explicit `shmdt`, which this crate never performs — see
/// [`crate::segment`]).
///
/// # Safety
///
/// `shmid` must be a segment id obtained from [`shmget`]. The returned
/// pointer aliases memory shared with other processes; all reads and
/// writes through it must follow the handshake in
/// [`crate::segment::Segment::publish`].
pub unsafe fn shmat(shmid: i32) -> Result<*mut c_void, AttachError> {
    let ptr = libc::shmat(shmid, std::ptr::null(), 0);
    if ptr as isize == -1 {
        Err(AttachError::ShmAt {
            shmid,
            source: Error::last_os_error(),
        })
    } else {
        Ok(ptr)
    }
}
