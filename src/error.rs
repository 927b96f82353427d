//! Error type shared by every layer of the filesystem.

use std::io;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors reported by filesystem operations.
///
/// Each variant maps to a stable integer code (see [`FsError::code`]) so that
/// callers working with raw codes, such as the shell, can match on them.
#[derive(Debug, Error)]
pub enum FsError {
	/// Unexpected internal condition.
	#[error("internal error")]
	Generic,
	/// A path component or directory entry does not exist.
	#[error("no such file or directory")]
	NotFound,
	/// The target name is already present.
	#[error("file exists")]
	Exists,
	/// The block or inode bitmap is exhausted, or a file outgrew the
	/// direct + single-indirect addressing range.
	#[error("no space left on device")]
	NoSpace,
	/// Malformed path, wrong file type for the operation or nil argument.
	#[error("invalid argument")]
	Invalid,
	/// Underlying device error.
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	/// Open-flag mismatch on read or write.
	#[error("permission denied")]
	Permission,
}

impl FsError {
	/// Returns the stable integer code of the error.
	///
	/// `0` is reserved for success and never returned here.
	pub fn code(&self) -> i32 {
		match self {
			Self::Generic => 1,
			Self::NotFound => 2,
			Self::Exists => 3,
			Self::NoSpace => 4,
			Self::Invalid => 5,
			Self::Io(_) => 6,
			Self::Permission => 7,
		}
	}
}
