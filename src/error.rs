use std::io;

/// Failure attaching one shared-memory segment.
///
/// Surfaced only to [`SegmentPool::init`][crate::pool::SegmentPool::init],
/// which logs it at error level and leaves the slot unattached; nothing
/// public ever propagates this further.
#[derive(thiserror::Error, Debug)]
pub enum AttachError {
    #[error("shmget failed for key {key:#x}, size {size}, perms {perms:#o}: {source}")]
    ShmGet {
        key: i32,
        size: usize,
        perms: u32,
        source: io::Error,
    },

    #[error("shmat failed for shmid {shmid}: {source}")]
    ShmAt { shmid: i32, source: io::Error },
}
