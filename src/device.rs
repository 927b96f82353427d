//! Block device layer: fixed-size block I/O over a backing image.
//!
//! The backing image is either a regular file or a device node. All accesses
//! go through explicit seek + read/write calls; a write is visible to every
//! later read on the same handle.

use crate::error::FsError;
use crate::error::Result;
use libc::ioctl;
use std::ffi::c_long;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::path::PathBuf;

/// The size of a device block in bytes.
pub const BLOCK_SIZE: usize = 512;

/// ioctl macro: Command.
macro_rules! ioc {
	($a:expr, $b:expr, $c:expr, $d:expr) => {
		(($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
	};
}

/// ioctl macro: Read command.
macro_rules! ior {
	($a:expr, $b:expr, $c:ty) => {
		ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
	};
}

/// ioctl command: Get size of disk in bytes.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the size in bytes of the backing image at the given path.
///
/// Regular files are sized from their metadata. Block and character devices
/// are sized through the `BLKGETSIZE64` ioctl.
fn get_image_size(path: &Path) -> io::Result<u64> {
	let metadata = fs::metadata(path)?;
	let file_type = metadata.file_type();

	if file_type.is_block_device() || file_type.is_char_device() {
		let dev = File::open(path)?;

		let mut size = 0u64;
		let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
		if ret < 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(size)
	} else {
		Ok(metadata.len())
	}
}

/// A block device backed by an image file.
pub struct BlockDevice {
	/// The path to the backing image.
	path: PathBuf,
	/// The backing image.
	file: File,
	/// The size of the image in bytes, truncated to a whole number of blocks.
	size: u64,
}

impl BlockDevice {
	/// Creates a fresh zero-filled backing image of `size` bytes at `path`
	/// and attaches to it.
	///
	/// `size` must be a non-zero multiple of the block size.
	pub fn create(path: &Path, size: u64) -> Result<Self> {
		if size == 0 || size % BLOCK_SIZE as u64 != 0 {
			return Err(FsError::Invalid);
		}

		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(path)?;
		file.set_len(size)?;

		Ok(Self {
			path: path.to_path_buf(),
			file,
			size,
		})
	}

	/// Attaches to the existing backing image at `path`.
	///
	/// Trailing bytes beyond the last whole block are ignored. Fails if the
	/// image is smaller than one block.
	pub fn open(path: &Path) -> Result<Self> {
		let file = OpenOptions::new().read(true).write(true).open(path)?;

		let size = get_image_size(path)?;
		let size = size - size % BLOCK_SIZE as u64;
		if size == 0 {
			return Err(FsError::Invalid);
		}

		Ok(Self {
			path: path.to_path_buf(),
			file,
			size,
		})
	}

	/// Returns the path to the backing image.
	pub fn get_path(&self) -> &Path {
		&self.path
	}

	/// Returns the size of the device in bytes.
	pub fn get_size(&self) -> u64 {
		self.size
	}

	/// Returns the number of blocks on the device.
	pub fn get_block_count(&self) -> u64 {
		self.size / BLOCK_SIZE as u64
	}

	/// Returns the size of a block in bytes.
	pub fn get_block_size(&self) -> usize {
		BLOCK_SIZE
	}

	/// Reads the block `blk` into `buf`.
	///
	/// `buf` must be exactly one block long.
	pub fn read_block(&mut self, blk: u64, buf: &mut [u8]) -> Result<()> {
		if buf.len() != BLOCK_SIZE || blk >= self.get_block_count() {
			return Err(FsError::Invalid);
		}

		self.file.seek(SeekFrom::Start(blk * BLOCK_SIZE as u64))?;
		self.file.read_exact(buf)?;

		Ok(())
	}

	/// Writes `buf` to the block `blk`.
	///
	/// `buf` must be exactly one block long.
	pub fn write_block(&mut self, blk: u64, buf: &[u8]) -> Result<()> {
		if buf.len() != BLOCK_SIZE || blk >= self.get_block_count() {
			return Err(FsError::Invalid);
		}

		self.file.seek(SeekFrom::Start(blk * BLOCK_SIZE as u64))?;
		self.file.write_all(buf)?;

		Ok(())
	}

	/// Reads `buf.len()` bytes starting at the byte offset `off`.
	pub fn read(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
		if off + buf.len() as u64 > self.size {
			return Err(FsError::Invalid);
		}

		self.file.seek(SeekFrom::Start(off))?;
		self.file.read_exact(buf)?;

		Ok(())
	}

	/// Writes `buf` starting at the byte offset `off`.
	pub fn write(&mut self, off: u64, buf: &[u8]) -> Result<()> {
		if off + buf.len() as u64 > self.size {
			return Err(FsError::Invalid);
		}

		self.file.seek(SeekFrom::Start(off))?;
		self.file.write_all(buf)?;

		Ok(())
	}

	/// Forces durability of all previous writes.
	pub fn sync(&mut self) -> Result<()> {
		self.file.sync_all()?;

		Ok(())
	}

	/// Detaches from the backing image, syncing it first.
	pub fn detach(mut self) -> Result<()> {
		self.sync()
	}
}
