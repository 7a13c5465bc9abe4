//! Disk I/O.
//!
//! The only I/O this bootloader does is reading sectors through the firmware shim, cached by
//! [`block_cache`].

pub mod block_cache;
