//! An educational Unix-like block filesystem persisted in a single backing
//! image file.
//!
//! The filesystem offers hierarchical directories, files with random-access
//! I/O, hard links, reference-counted deletion and path resolution with `.`
//! and `..` traversal on top of a fixed 512-byte block device. A single
//! mounter at a time is assumed; there is no journal.

pub mod bitmap;
pub mod dentry;
pub mod device;
pub mod error;
pub mod fs;
pub mod inode;
pub mod path;
pub mod prompt;
pub mod superblock;
pub mod util;

pub use error::FsError;
pub use error::Result;
