//! Thin wrappers around the raw syscalls this crate needs: SysV shared
//! memory for the refclock segments, nothing else. Kept separate from
//! the higher-level [`crate::segment`]/[`crate::pool`] types the same
//! way the rest of this codebase keeps syscalls behind a thin `Result`
//! boundary rather than letting `errno` leak into callers.

pub mod shm;
