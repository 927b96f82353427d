//! Utility functions shared by the filesystem layers and the shell.

use std::fmt;
use std::mem::size_of;
use std::slice;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Returns the current timestamp since the Unix epoch.
pub fn get_timestamp() -> Duration {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or(Duration::ZERO)
}

/// Performs the division of `a` by `b`, rounding the result up.
pub fn ceil_division(a: u64, b: u64) -> u64 {
	(a + b - 1) / b
}

/// Reinterprets the given reference as a slice of bytes.
///
/// Meant for `#[repr(C, packed)]` on-disk structures only.
pub fn reinterpret<T>(val: &T) -> &[u8] {
	unsafe { slice::from_raw_parts(val as *const _ as *const u8, size_of::<T>()) }
}

/// Reinterprets the given mutable reference as a mutable slice of bytes.
///
/// Meant for `#[repr(C, packed)]` on-disk structures only.
pub fn reinterpret_mut<T>(val: &mut T) -> &mut [u8] {
	unsafe { slice::from_raw_parts_mut(val as *mut _ as *mut u8, size_of::<T>()) }
}

/// Performs the log2 operation on the given integer.
///
/// If the result is undefined, the function returns None.
pub fn log2(n: u64) -> Option<u64> {
	let num_bits = (size_of::<u64>() * 8) as u64;

	let n = num_bits - n.leading_zeros() as u64;
	if n > 0 {
		Some(n - 1)
	} else {
		None
	}
}

/// Structure representing a number of bytes.
pub struct ByteSize(pub u64);

impl fmt::Display for ByteSize {
	fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut order = log2(self.0).unwrap_or(0) / log2(1024).unwrap();

		let suffix = match order {
			0 => "bytes",
			1 => "KiB",
			2 => "MiB",
			3 => "GiB",
			4 => "TiB",

			_ => {
				order = 0;
				"bytes"
			}
		};

		let unit = 1024u64.pow(order as u32);
		write!(fmt, "{} {}", self.0 / unit, suffix)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ceil_div() {
		assert_eq!(ceil_division(0, 8), 0);
		assert_eq!(ceil_division(1, 8), 1);
		assert_eq!(ceil_division(8, 8), 1);
		assert_eq!(ceil_division(9, 8), 2);
		assert_eq!(ceil_division(1000, 512), 2);
	}

	#[test]
	fn bytesize() {
		assert_eq!(format!("{}", ByteSize(0)).as_str(), "0 bytes");
		assert_eq!(format!("{}", ByteSize(1)).as_str(), "1 bytes");
		assert_eq!(format!("{}", ByteSize(1023)).as_str(), "1023 bytes");
		assert_eq!(format!("{}", ByteSize(1024)).as_str(), "1 KiB");
		assert_eq!(format!("{}", ByteSize(1025)).as_str(), "1 KiB");
		assert_eq!(format!("{}", ByteSize(2048)).as_str(), "2 KiB");
		assert_eq!(format!("{}", ByteSize(1024 * 1024)).as_str(), "1 MiB");
		assert_eq!(format!("{}", ByteSize(512 * 1000)).as_str(), "500 KiB");
	}
}
