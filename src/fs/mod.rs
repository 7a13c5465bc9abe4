//! Filesystem access.
//!
//! The bootloader only ever needs to look up a handful of files by absolute path and read
//! them start to finish, so this is a plain `mount`/`find`/`read` API rather than the
//! trait-object `File`/`Directory` abstraction a general-purpose kernel would want.

pub mod ext2;
pub mod partitions;
