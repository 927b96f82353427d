//! The filesystem core: format, mount, path resolution and the file and
//! directory operations.
//!
//! A mounted filesystem owns its device, an in-memory copy of the superblock
//! and both allocation bitmaps. Bitmaps and superblock are flushed to disk
//! after every structural change and on unmount. Operations touching several
//! on-disk structures roll their own mutations back when a later stage fails;
//! there is no journal.

use crate::bitmap::Bitmap;
use crate::dentry;
use crate::dentry::Dirent;
use crate::device::BlockDevice;
use crate::device::BLOCK_SIZE;
use crate::error::FsError;
use crate::error::Result;
use crate::inode;
use crate::inode::FileType;
use crate::inode::Inode;
use crate::inode::INODE_ROOT;
use crate::inode::MAX_FILE_BLOCKS;
use crate::inode::NDIRECT;
use crate::inode::POINTERS_PER_BLOCK;
use crate::path;
use crate::superblock::Superblock;
use crate::util::get_timestamp;
use log::debug;
use log::info;
use log::warn;
use std::cmp::min;

/// Open flag: read access.
pub const O_RDONLY: u32 = 0x01;
/// Open flag: write access.
pub const O_WRONLY: u32 = 0x02;
/// Open flag: read and write access.
pub const O_RDWR: u32 = 0x03;
/// Open flag: create the file if it does not exist.
pub const O_CREAT: u32 = 0x08;
/// Open flag: start with the offset at end of file.
pub const O_APPEND: u32 = 0x10;
/// Open flag: discard the file's content on open.
pub const O_TRUNC: u32 = 0x20;

/// The default permissions of files created through `open`.
const DEFAULT_FILE_PERMS: u16 = 0o644;
/// The maximum directory depth `inode_to_path` can walk.
const MAX_PATH_DEPTH: usize = 64;

/// An open file: a cursor over an inode.
///
/// The handle holds a snapshot of the inode taken at open time, refreshed by
/// the operations that go through the handle. It stays valid independently of
/// other handles; concurrent handles to the same file observe each other only
/// after the writer persists its inode and the reader reopens.
pub struct OpenFile {
	/// The number of the inode the handle refers to.
	inode_num: u32,
	/// A snapshot of the inode.
	inode: Inode,
	/// The current byte offset.
	offset: u32,
	/// The open flags.
	flags: u32,
}

impl OpenFile {
	/// Returns the number of the inode the handle refers to.
	pub fn get_inode_num(&self) -> u32 {
		self.inode_num
	}

	/// Returns the current byte offset.
	pub fn get_offset(&self) -> u32 {
		self.offset
	}

	/// Returns the open flags.
	pub fn get_flags(&self) -> u32 {
		self.flags
	}
}

/// A mounted filesystem.
pub struct Filesystem {
	/// The underlying device.
	dev: BlockDevice,
	/// In-memory copy of the superblock.
	sb: Superblock,
	/// In-memory copy of the block bitmap.
	block_bitmap: Bitmap,
	/// In-memory copy of the inode bitmap.
	inode_bitmap: Bitmap,
	/// The inode number of the current working directory.
	current_dir: u32,
}

impl Filesystem {
	/// Formats the device with a fresh filesystem of `total_inodes` inodes,
	/// using every block of the device.
	///
	/// The root directory receives inode 1 and is initialized with its `.`
	/// and `..` entries. On failure, any allocation made along the way is
	/// released and the superblock is rewritten before the error is reported.
	pub fn format(dev: &mut BlockDevice, total_inodes: u32) -> Result<()> {
		let total_blocks = dev.get_block_count() as u32;
		let mut sb = Superblock::init(total_blocks, total_inodes)?;
		sb.write(dev)?;

		let mut block_bitmap = Bitmap::new(total_blocks as usize);
		// Superblock, bitmap regions and inode table
		block_bitmap.set_range(0, sb.first_data_block as usize)?;
		let mut inode_bitmap = Bitmap::new(total_inodes as usize);
		inode_bitmap.set(0)?;

		let root = inode::alloc(
			dev,
			&sb,
			&mut inode_bitmap,
			FileType::Directory,
			0o755,
		)?;
		sb.free_inodes -= 1;

		let res = if root == INODE_ROOT {
			Self::format_root_dir(dev, &mut sb, &mut block_bitmap)
		} else {
			// Inode 0 is pre-reserved, so the first free must be 1
			Err(FsError::Generic)
		};
		if let Err(e) = res {
			warn!("format: failed, releasing root inode");
			let freed =
				inode::free(dev, &sb, root, &mut inode_bitmap, &mut block_bitmap)?;
			sb.free_blocks += freed;
			sb.free_inodes += 1;
			sb.write(dev)?;
			return Err(e);
		}

		Self::write_bitmap(dev, sb.block_bitmap_start, sb.block_bitmap_blocks, &block_bitmap)?;
		Self::write_bitmap(dev, sb.inode_bitmap_start, sb.inode_bitmap_blocks, &inode_bitmap)?;
		sb.write(dev)?;

		info!(
			"formatted filesystem: {} blocks, {} inodes",
			total_blocks, total_inodes
		);
		Ok(())
	}

	/// Writes the root directory's `.` and `..` entries.
	fn format_root_dir(
		dev: &mut BlockDevice,
		sb: &mut Superblock,
		block_bitmap: &mut Bitmap,
	) -> Result<()> {
		let mut root = inode::read(dev, sb, INODE_ROOT)?;

		let dot = Dirent::new_raw(path::CURRENT_DIR, INODE_ROOT, FileType::Directory)?;
		let dotdot = Dirent::new_raw(path::PARENT_DIR, INODE_ROOT, FileType::Directory)?;
		let mut allocated = dentry::add(dev, sb, INODE_ROOT, &mut root, &dot, block_bitmap)?;
		allocated += dentry::add(dev, sb, INODE_ROOT, &mut root, &dotdot, block_bitmap)?;
		sb.free_blocks -= allocated;

		// `.` plus the root's own name
		root.links_count = 2;
		inode::write(dev, sb, INODE_ROOT, &root)
	}

	/// Mounts the filesystem on the given device.
	///
	/// Reads and validates the superblock, loads the bitmaps, sets the
	/// current directory to the root and stamps the mount.
	pub fn mount(mut dev: BlockDevice) -> Result<Self> {
		let mut sb = Superblock::read(&mut dev)?;
		if !sb.is_valid() {
			return Err(FsError::Invalid);
		}

		let block_bitmap = Self::read_bitmap(
			&mut dev,
			sb.block_bitmap_start,
			sb.block_bitmap_blocks,
			sb.total_blocks as usize,
		)?;
		let inode_bitmap = Self::read_bitmap(
			&mut dev,
			sb.inode_bitmap_start,
			sb.inode_bitmap_blocks,
			sb.total_inodes as usize,
		)?;

		sb.last_mount = get_timestamp().as_secs() as u32;
		sb.mount_count += 1;
		sb.write(&mut dev)?;

		info!("mounted filesystem, mount count {}", sb.mount_count);
		Ok(Self {
			dev,
			sb,
			block_bitmap,
			inode_bitmap,
			current_dir: INODE_ROOT,
		})
	}

	/// Unmounts the filesystem, flushing bitmaps and superblock and syncing
	/// the device.
	pub fn unmount(mut self) -> Result<()> {
		self.flush_meta()?;
		info!("unmounted filesystem");
		self.dev.detach()
	}

	/// Returns a copy of the superblock.
	pub fn get_superblock(&self) -> Superblock {
		self.sb
	}

	/// Returns the inode number of the current working directory.
	pub fn get_current_dir(&self) -> u32 {
		self.current_dir
	}

	/// Returns the path of the current working directory.
	pub fn get_current_path(&mut self) -> Result<String> {
		let cwd = self.current_dir;
		self.inode_to_path(cwd)
	}

	/// Writes a bitmap to its on-disk region, zero-padding the last block.
	fn write_bitmap(
		dev: &mut BlockDevice,
		start: u32,
		blocks: u32,
		bitmap: &Bitmap,
	) -> Result<()> {
		let bytes = bitmap.as_bytes();

		for i in 0..blocks as usize {
			let mut buf = [0u8; BLOCK_SIZE];

			let off = i * BLOCK_SIZE;
			if off < bytes.len() {
				let end = min(bytes.len(), off + BLOCK_SIZE);
				buf[..(end - off)].copy_from_slice(&bytes[off..end]);
			}

			dev.write_block(start as u64 + i as u64, &buf)?;
		}

		Ok(())
	}

	/// Reads a bitmap of `bits` bits from its on-disk region.
	fn read_bitmap(
		dev: &mut BlockDevice,
		start: u32,
		blocks: u32,
		bits: usize,
	) -> Result<Bitmap> {
		let mut bytes = vec![0u8; blocks as usize * BLOCK_SIZE];

		for i in 0..blocks as usize {
			let off = i * BLOCK_SIZE;
			dev.read_block(start as u64 + i as u64, &mut bytes[off..(off + BLOCK_SIZE)])?;
		}

		Bitmap::from_bytes(bits, &bytes)
	}

	/// Flushes the bitmaps and the superblock to disk.
	fn flush_meta(&mut self) -> Result<()> {
		Self::write_bitmap(
			&mut self.dev,
			self.sb.block_bitmap_start,
			self.sb.block_bitmap_blocks,
			&self.block_bitmap,
		)?;
		Self::write_bitmap(
			&mut self.dev,
			self.sb.inode_bitmap_start,
			self.sb.inode_bitmap_blocks,
			&self.inode_bitmap,
		)?;
		self.sb.write(&mut self.dev)
	}

	/// Resolves a path to an inode number.
	///
	/// The path is validated and normalized first. Resolution starts at the
	/// root for absolute paths and at the current directory otherwise, then
	/// walks one component at a time through the directory entries.
	pub fn resolve(&mut self, pathname: &str) -> Result<u32> {
		if !path::is_valid(pathname) {
			return Err(FsError::Invalid);
		}

		let normalized = path::normalize(pathname)?;
		if normalized == "/" {
			return Ok(INODE_ROOT);
		}

		let parsed = path::parse(&normalized)?;
		let mut cur = if parsed.is_absolute {
			INODE_ROOT
		} else {
			self.current_dir
		};

		for comp in &parsed.components {
			// Normalization already dropped `.`, but a literal lookup of the
			// current directory is still harmless
			if comp == path::CURRENT_DIR {
				continue;
			}

			let cur_inode = inode::read(&mut self.dev, &self.sb, cur)?;
			if !cur_inode.is_directory() {
				return Err(FsError::NotFound);
			}

			if comp == path::PARENT_DIR && cur == INODE_ROOT {
				continue;
			}

			let (ent, _) = dentry::find(&mut self.dev, &cur_inode, comp)?;
			cur = ent.inode_num;
		}

		Ok(cur)
	}

	/// Resolves the parent directory of the given path, returning the parent
	/// inode number and the final component.
	fn resolve_parent(&mut self, pathname: &str) -> Result<(u32, String)> {
		if !path::is_valid(pathname) {
			return Err(FsError::Invalid);
		}

		let normalized = path::normalize(pathname)?;
		let (parent, name) = path::split(&normalized)?;
		let parent_num = self.resolve(&parent)?;

		Ok((parent_num, name))
	}

	/// Returns the block holding the `k`th block of the file, or zero when
	/// the position is a hole. Never allocates.
	fn map_block(&mut self, inode: &Inode, k: usize) -> Result<u32> {
		if k < NDIRECT {
			return Ok(inode.direct[k]);
		}

		let idx = k - NDIRECT;
		if idx >= POINTERS_PER_BLOCK {
			return Err(FsError::NoSpace);
		}
		if inode.indirect == 0 {
			return Ok(0);
		}

		let mut buf = [0u8; BLOCK_SIZE];
		self.dev.read_block(inode.indirect as u64, &mut buf)?;

		Ok(u32::from_le_bytes([
			buf[idx * 4],
			buf[idx * 4 + 1],
			buf[idx * 4 + 2],
			buf[idx * 4 + 3],
		]))
	}

	/// Allocates a data block, zeroing it on disk.
	///
	/// The block is recorded in `new_blocks` so the caller can roll the
	/// allocation back.
	fn alloc_data_block(&mut self, new_blocks: &mut Vec<u32>) -> Result<u32> {
		let blk = self.block_bitmap.find_first_free().ok_or(FsError::NoSpace)? as u32;
		self.block_bitmap.set(blk as usize)?;

		if let Err(e) = self.dev.write_block(blk as u64, &[0u8; BLOCK_SIZE]) {
			let _ = self.block_bitmap.clear(blk as usize);
			return Err(e);
		}

		new_blocks.push(blk);
		Ok(blk)
	}

	/// Returns the block holding the `k`th block of the file, allocating it
	/// (and the indirect block, when needed) if absent.
	fn map_block_alloc(
		&mut self,
		inode: &mut Inode,
		k: usize,
		new_blocks: &mut Vec<u32>,
	) -> Result<u32> {
		if k < NDIRECT {
			if inode.direct[k] == 0 {
				let blk = self.alloc_data_block(new_blocks)?;
				inode.direct[k] = blk;
				inode.blocks_used += 1;
			}
			return Ok(inode.direct[k]);
		}

		let idx = k - NDIRECT;
		if idx >= POINTERS_PER_BLOCK {
			return Err(FsError::NoSpace);
		}

		if inode.indirect == 0 {
			let blk = self.alloc_data_block(new_blocks)?;
			inode.indirect = blk;
			inode.blocks_used += 1;
		}

		let mut buf = [0u8; BLOCK_SIZE];
		self.dev.read_block(inode.indirect as u64, &mut buf)?;

		let mut ptr = u32::from_le_bytes([
			buf[idx * 4],
			buf[idx * 4 + 1],
			buf[idx * 4 + 2],
			buf[idx * 4 + 3],
		]);
		if ptr == 0 {
			ptr = self.alloc_data_block(new_blocks)?;
			buf[(idx * 4)..(idx * 4 + 4)].copy_from_slice(&ptr.to_le_bytes());
			self.dev.write_block(inode.indirect as u64, &buf)?;
			inode.blocks_used += 1;
		}

		Ok(ptr)
	}

	/// Reads up to `buf.len()` bytes from the file at byte `offset`.
	///
	/// The count is clipped to the file size; holes read as zeros. Returns
	/// the number of bytes read.
	fn read_at(&mut self, inode: &Inode, offset: u32, buf: &mut [u8]) -> Result<usize> {
		if offset >= inode.size {
			return Ok(0);
		}
		let n = min(buf.len(), (inode.size - offset) as usize);

		let mut done = 0;
		let mut off = offset as usize;
		while done < n {
			let k = off / BLOCK_SIZE;
			let intra = off % BLOCK_SIZE;
			let chunk = min(n - done, BLOCK_SIZE - intra);

			let ptr = self.map_block(inode, k)?;
			if ptr == 0 {
				// A hole reads as zeros
				buf[done..(done + chunk)].fill(0);
			} else {
				let mut block_buf = [0u8; BLOCK_SIZE];
				self.dev.read_block(ptr as u64, &mut block_buf)?;
				buf[done..(done + chunk)].copy_from_slice(&block_buf[intra..(intra + chunk)]);
			}

			done += chunk;
			off += chunk;
		}

		Ok(n)
	}

	/// Writes `buf` to the file at byte `offset`, allocating blocks as
	/// needed, growing the size on extension and persisting the inode.
	///
	/// On failure every block allocated by this call is released again and
	/// the in-memory inode is restored. Returns the number of bytes written.
	fn write_at(
		&mut self,
		inode_num: u32,
		inode: &mut Inode,
		offset: u32,
		buf: &[u8],
	) -> Result<usize> {
		if offset as u64 + buf.len() as u64 > (MAX_FILE_BLOCKS * BLOCK_SIZE) as u64 {
			return Err(FsError::NoSpace);
		}

		let saved = *inode;
		let mut new_blocks = Vec::new();
		match self.write_at_inner(inode_num, inode, offset, buf, &mut new_blocks) {
			Ok(n) => {
				self.sb.free_blocks -= new_blocks.len() as u32;
				Ok(n)
			}

			Err(e) => {
				if !new_blocks.is_empty() {
					warn!("write: rolling back {} allocated blocks", new_blocks.len());
				}
				for blk in new_blocks {
					let _ = self.block_bitmap.clear(blk as usize);
				}
				*inode = saved;
				Err(e)
			}
		}
	}

	fn write_at_inner(
		&mut self,
		inode_num: u32,
		inode: &mut Inode,
		offset: u32,
		buf: &[u8],
		new_blocks: &mut Vec<u32>,
	) -> Result<usize> {
		let mut done = 0;
		let mut off = offset as usize;
		while done < buf.len() {
			let k = off / BLOCK_SIZE;
			let intra = off % BLOCK_SIZE;
			let chunk = min(buf.len() - done, BLOCK_SIZE - intra);

			let ptr = self.map_block_alloc(inode, k, new_blocks)?;

			let mut block_buf = [0u8; BLOCK_SIZE];
			if intra != 0 || chunk < BLOCK_SIZE {
				// Partial write: preserve the untouched bytes
				self.dev.read_block(ptr as u64, &mut block_buf)?;
			}
			block_buf[intra..(intra + chunk)].copy_from_slice(&buf[done..(done + chunk)]);
			self.dev.write_block(ptr as u64, &block_buf)?;

			done += chunk;
			off += chunk;
		}

		if offset as usize + done > inode.size as usize {
			inode.size = (offset as usize + done) as u32;
		}
		inode.modified = get_timestamp().as_secs() as u32;
		inode::write(&mut self.dev, &self.sb, inode_num, inode)?;

		Ok(done)
	}

	/// Releases every data block of the file and zeroes its size.
	fn truncate_inode(&mut self, inode_num: u32, inode: &mut Inode) -> Result<()> {
		let mut freed = 0;

		for i in 0..NDIRECT {
			if inode.direct[i] != 0 {
				self.block_bitmap.clear(inode.direct[i] as usize)?;
				inode.direct[i] = 0;
				freed += 1;
			}
		}

		if inode.indirect != 0 {
			let mut buf = [0u8; BLOCK_SIZE];
			self.dev.read_block(inode.indirect as u64, &mut buf)?;

			for i in 0..POINTERS_PER_BLOCK {
				let ptr = u32::from_le_bytes([
					buf[i * 4],
					buf[i * 4 + 1],
					buf[i * 4 + 2],
					buf[i * 4 + 3],
				]);
				if ptr != 0 {
					self.block_bitmap.clear(ptr as usize)?;
					freed += 1;
				}
			}

			self.block_bitmap.clear(inode.indirect as usize)?;
			inode.indirect = 0;
			freed += 1;
		}

		inode.size = 0;
		inode.blocks_used = 0;
		inode.modified = get_timestamp().as_secs() as u32;
		inode::write(&mut self.dev, &self.sb, inode_num, inode)?;

		self.sb.free_blocks += freed;
		Ok(())
	}

	/// Creates a regular file at the given path, returning its inode number.
	pub fn create(&mut self, pathname: &str, permissions: u16) -> Result<u32> {
		let (parent_num, name) = self.resolve_parent(pathname)?;
		if !path::filename_is_valid(&name) {
			return Err(FsError::Invalid);
		}

		let mut parent = inode::read(&mut self.dev, &self.sb, parent_num)?;
		if !parent.is_directory() {
			return Err(FsError::Invalid);
		}
		if dentry::find(&mut self.dev, &parent, &name).is_ok() {
			return Err(FsError::Exists);
		}

		let ino = inode::alloc(
			&mut self.dev,
			&self.sb,
			&mut self.inode_bitmap,
			FileType::File,
			permissions,
		)?;
		self.sb.free_inodes -= 1;

		let ent = Dirent::new(&name, ino, FileType::File)?;
		match dentry::add(
			&mut self.dev,
			&self.sb,
			parent_num,
			&mut parent,
			&ent,
			&mut self.block_bitmap,
		) {
			Ok(allocated) => self.sb.free_blocks -= allocated,

			Err(e) => {
				warn!("create: rolling back inode {} allocation", ino);
				let freed = inode::free(
					&mut self.dev,
					&self.sb,
					ino,
					&mut self.inode_bitmap,
					&mut self.block_bitmap,
				)?;
				self.sb.free_blocks += freed;
				self.sb.free_inodes += 1;
				return Err(e);
			}
		}

		self.flush_meta()?;
		debug!("created file '{}' as inode {}", pathname, ino);
		Ok(ino)
	}

	/// Creates a directory at the given path, returning its inode number.
	///
	/// The new directory is initialized with its `.` and `..` entries and the
	/// parent's link count is incremented for the child's `..`.
	pub fn mkdir(&mut self, pathname: &str, permissions: u16) -> Result<u32> {
		let (parent_num, name) = self.resolve_parent(pathname)?;
		if !path::filename_is_valid(&name) {
			return Err(FsError::Invalid);
		}

		let mut parent = inode::read(&mut self.dev, &self.sb, parent_num)?;
		if !parent.is_directory() {
			return Err(FsError::Invalid);
		}
		if dentry::find(&mut self.dev, &parent, &name).is_ok() {
			return Err(FsError::Exists);
		}

		let ino = inode::alloc(
			&mut self.dev,
			&self.sb,
			&mut self.inode_bitmap,
			FileType::Directory,
			permissions,
		)?;
		self.sb.free_inodes -= 1;

		let res = self.mkdir_finish(parent_num, &mut parent, ino, &name);
		if let Err(e) = res {
			warn!("mkdir: rolling back inode {} allocation", ino);
			let freed = inode::free(
				&mut self.dev,
				&self.sb,
				ino,
				&mut self.inode_bitmap,
				&mut self.block_bitmap,
			)?;
			self.sb.free_blocks += freed;
			self.sb.free_inodes += 1;
			return Err(e);
		}

		self.flush_meta()?;
		debug!("created directory '{}' as inode {}", pathname, ino);
		Ok(ino)
	}

	/// Links the fresh directory inode `ino` into `parent_num` under `name`
	/// and populates its `.` and `..` entries.
	fn mkdir_finish(
		&mut self,
		parent_num: u32,
		parent: &mut Inode,
		ino: u32,
		name: &str,
	) -> Result<()> {
		let ent = Dirent::new(name, ino, FileType::Directory)?;
		let allocated = dentry::add(
			&mut self.dev,
			&self.sb,
			parent_num,
			parent,
			&ent,
			&mut self.block_bitmap,
		)?;
		self.sb.free_blocks -= allocated;

		let res = self.mkdir_init_child(parent_num, ino);
		if let Err(e) = res {
			// The caller frees the inode; only the parent entry is ours
			if dentry::remove(&mut self.dev, &self.sb, parent_num, parent, name).is_err() {
				warn!("mkdir: could not remove entry '{}' during rollback", name);
			}
			return Err(e);
		}

		// The child's `..` contributes a link to the parent
		parent.links_count += 1;
		if let Err(e) = inode::write(&mut self.dev, &self.sb, parent_num, parent) {
			parent.links_count -= 1;
			if dentry::remove(&mut self.dev, &self.sb, parent_num, parent, name).is_err() {
				warn!("mkdir: could not remove entry '{}' during rollback", name);
			}
			return Err(e);
		}

		Ok(())
	}

	/// Writes the `.` and `..` entries of the fresh directory `ino` and sets
	/// its link count.
	fn mkdir_init_child(&mut self, parent_num: u32, ino: u32) -> Result<()> {
		let mut child = inode::read(&mut self.dev, &self.sb, ino)?;

		let dot = Dirent::new_raw(path::CURRENT_DIR, ino, FileType::Directory)?;
		let dotdot = Dirent::new_raw(path::PARENT_DIR, parent_num, FileType::Directory)?;
		let mut allocated = dentry::add(
			&mut self.dev,
			&self.sb,
			ino,
			&mut child,
			&dot,
			&mut self.block_bitmap,
		)?;
		allocated += dentry::add(
			&mut self.dev,
			&self.sb,
			ino,
			&mut child,
			&dotdot,
			&mut self.block_bitmap,
		)?;
		self.sb.free_blocks -= allocated;

		// One link for the name in the parent, one for `.`
		child.links_count = 2;
		inode::write(&mut self.dev, &self.sb, ino, &child)
	}

	/// Removes the link at the given path.
	///
	/// Directories are rejected. When the link count reaches zero the inode
	/// and all of its data blocks are released.
	pub fn unlink(&mut self, pathname: &str) -> Result<()> {
		let (parent_num, name) = self.resolve_parent(pathname)?;

		let ino = self.resolve(pathname)?;
		let mut target = inode::read(&mut self.dev, &self.sb, ino)?;
		if target.is_directory() {
			return Err(FsError::Invalid);
		}

		target.links_count -= 1;
		if target.links_count == 0 {
			let freed = inode::free(
				&mut self.dev,
				&self.sb,
				ino,
				&mut self.inode_bitmap,
				&mut self.block_bitmap,
			)?;
			self.sb.free_blocks += freed;
			self.sb.free_inodes += 1;
		} else {
			inode::write(&mut self.dev, &self.sb, ino, &target)?;
		}

		let mut parent = inode::read(&mut self.dev, &self.sb, parent_num)?;
		dentry::remove(&mut self.dev, &self.sb, parent_num, &mut parent, &name)?;

		self.flush_meta()?;
		debug!("unlinked '{}'", pathname);
		Ok(())
	}

	/// Removes the directory at the given path.
	///
	/// The root cannot be removed and the directory must contain nothing but
	/// its `.` and `..` entries.
	pub fn rmdir(&mut self, pathname: &str) -> Result<()> {
		if !path::is_valid(pathname) {
			return Err(FsError::Invalid);
		}
		if path::normalize(pathname)? == "/" {
			return Err(FsError::Invalid);
		}

		let (parent_num, name) = self.resolve_parent(pathname)?;
		let ino = self.resolve(pathname)?;

		let target = inode::read(&mut self.dev, &self.sb, ino)?;
		if !target.is_directory() {
			return Err(FsError::Invalid);
		}

		let entries = dentry::list(&mut self.dev, &target)?;
		let only_special = entries
			.iter()
			.all(|e| e.get_name() == path::CURRENT_DIR || e.get_name() == path::PARENT_DIR);
		if !only_special {
			return Err(FsError::Generic);
		}

		let freed = inode::free(
			&mut self.dev,
			&self.sb,
			ino,
			&mut self.inode_bitmap,
			&mut self.block_bitmap,
		)?;
		self.sb.free_blocks += freed;
		self.sb.free_inodes += 1;

		let mut parent = inode::read(&mut self.dev, &self.sb, parent_num)?;
		dentry::remove(&mut self.dev, &self.sb, parent_num, &mut parent, &name)?;

		// The child's `..` no longer links the parent
		parent.links_count -= 1;
		inode::write(&mut self.dev, &self.sb, parent_num, &parent)?;

		self.flush_meta()?;
		debug!("removed directory '{}'", pathname);
		Ok(())
	}

	/// Creates a hard link `new` referencing the same inode as `existing`.
	pub fn link(&mut self, existing: &str, new: &str) -> Result<()> {
		let ino = self.resolve(existing)?;
		let mut target = inode::read(&mut self.dev, &self.sb, ino)?;
		if target.is_directory() {
			return Err(FsError::Invalid);
		}

		let (parent_num, name) = self.resolve_parent(new)?;
		if !path::filename_is_valid(&name) {
			return Err(FsError::Invalid);
		}

		let mut parent = inode::read(&mut self.dev, &self.sb, parent_num)?;
		if !parent.is_directory() {
			return Err(FsError::Invalid);
		}
		if dentry::find(&mut self.dev, &parent, &name).is_ok() {
			return Err(FsError::Exists);
		}

		let ent = Dirent::new(&name, ino, FileType::File)?;
		let allocated = dentry::add(
			&mut self.dev,
			&self.sb,
			parent_num,
			&mut parent,
			&ent,
			&mut self.block_bitmap,
		)?;
		self.sb.free_blocks -= allocated;

		target.links_count += 1;
		if let Err(e) = inode::write(&mut self.dev, &self.sb, ino, &target) {
			warn!("link: rolling back entry '{}'", name);
			let _ = dentry::remove(&mut self.dev, &self.sb, parent_num, &mut parent, &name);
			return Err(e);
		}

		self.flush_meta()?;
		debug!("linked '{}' -> '{}'", new, existing);
		Ok(())
	}

	/// Opens the file at the given path.
	///
	/// With `O_CREAT` a missing file is created first. With `O_TRUNC` the
	/// content is discarded. With `O_APPEND` the offset starts at end of
	/// file.
	pub fn open(&mut self, pathname: &str, flags: u32) -> Result<OpenFile> {
		let ino = match self.resolve(pathname) {
			Ok(ino) => ino,

			Err(FsError::NotFound) if flags & O_CREAT != 0 => {
				self.create(pathname, DEFAULT_FILE_PERMS)?
			}

			Err(e) => return Err(e),
		};

		let mut inode = inode::read(&mut self.dev, &self.sb, ino)?;
		if !inode.is_file() {
			return Err(FsError::Invalid);
		}

		if flags & O_TRUNC != 0 {
			self.truncate_inode(ino, &mut inode)?;
			self.flush_meta()?;
		}

		let offset = if flags & O_APPEND != 0 { inode.size } else { 0 };

		Ok(OpenFile {
			inode_num: ino,
			inode,
			offset,
			flags,
		})
	}

	/// Reads from the open file at its current offset, advancing it.
	///
	/// Fails with `Permission` unless the file was opened for reading.
	pub fn read(&mut self, file: &mut OpenFile, buf: &mut [u8]) -> Result<usize> {
		if file.flags & O_RDONLY == 0 {
			return Err(FsError::Permission);
		}

		let n = self.read_at(&file.inode, file.offset, buf)?;
		file.offset += n as u32;

		file.inode.accessed = get_timestamp().as_secs() as u32;
		inode::write(&mut self.dev, &self.sb, file.inode_num, &file.inode)?;

		Ok(n)
	}

	/// Writes to the open file at its current offset, advancing it.
	///
	/// Fails with `Permission` unless the file was opened for writing.
	pub fn write(&mut self, file: &mut OpenFile, buf: &[u8]) -> Result<usize> {
		if file.flags & O_WRONLY == 0 {
			return Err(FsError::Permission);
		}

		let inode_num = file.inode_num;
		let offset = file.offset;
		let n = self.write_at(inode_num, &mut file.inode, offset, buf)?;
		file.offset += n as u32;

		self.flush_meta()?;
		Ok(n)
	}

	/// Moves the open file's offset, clamped to `[0, size]`.
	pub fn seek(&mut self, file: &mut OpenFile, offset: u32) {
		file.offset = min(offset, file.inode.size);
	}

	/// Closes the open file.
	///
	/// The handle holds no on-disk state of its own; the inode was persisted
	/// by the writes that went through it.
	pub fn close(&mut self, file: OpenFile) {
		drop(file);
	}

	/// Lists the entries of the directory at the given path.
	pub fn list(&mut self, pathname: &str) -> Result<Vec<Dirent>> {
		let ino = self.resolve(pathname)?;
		let dir = inode::read(&mut self.dev, &self.sb, ino)?;
		if !dir.is_directory() {
			return Err(FsError::Invalid);
		}

		dentry::list(&mut self.dev, &dir)
	}

	/// Returns the inode of the file at the given path along with its number.
	pub fn stat(&mut self, pathname: &str) -> Result<(u32, Inode)> {
		let ino = self.resolve(pathname)?;
		let inode = inode::read(&mut self.dev, &self.sb, ino)?;

		Ok((ino, inode))
	}

	/// Changes the current working directory.
	pub fn cd(&mut self, pathname: &str) -> Result<()> {
		let ino = self.resolve(pathname)?;
		let inode = inode::read(&mut self.dev, &self.sb, ino)?;
		if !inode.is_directory() {
			return Err(FsError::Invalid);
		}

		self.current_dir = ino;
		Ok(())
	}

	/// Returns the absolute path of the given directory inode by walking the
	/// `..` entries up to the root.
	///
	/// Paths deeper than [`MAX_PATH_DEPTH`] components are rejected.
	pub fn inode_to_path(&mut self, inode_num: u32) -> Result<String> {
		if inode_num == INODE_ROOT {
			return Ok("/".to_owned());
		}

		let mut names = Vec::new();
		let mut cur = inode_num;
		while cur != INODE_ROOT {
			if names.len() >= MAX_PATH_DEPTH {
				return Err(FsError::NoSpace);
			}

			let cur_inode = inode::read(&mut self.dev, &self.sb, cur)?;
			if !cur_inode.is_directory() {
				return Err(FsError::Invalid);
			}

			let (parent_ent, _) = dentry::find(&mut self.dev, &cur_inode, path::PARENT_DIR)?;
			let parent_num = parent_ent.inode_num;
			let parent = inode::read(&mut self.dev, &self.sb, parent_num)?;

			// Find the name the parent knows the child by
			let name = dentry::list(&mut self.dev, &parent)?
				.into_iter()
				.filter(|e| {
					e.get_name() != path::CURRENT_DIR && e.get_name() != path::PARENT_DIR
				})
				.find(|e| e.inode_num == cur)
				.map(|e| e.get_name().to_owned())
				.ok_or(FsError::Generic)?;

			names.push(name);
			cur = parent_num;
		}

		names.reverse();
		Ok(format!("/{}", names.join("/")))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::env;
	use std::fs;
	use std::path::PathBuf;
	use std::process;

	fn temp_image(name: &str) -> PathBuf {
		let mut path = env::temp_dir();
		path.push(format!("rufs-fs-{}-{}.img", process::id(), name));
		path
	}

	/// Formats a 1000-block, 128-inode image and mounts it.
	fn setup(name: &str) -> (PathBuf, Filesystem) {
		let path = temp_image(name);
		let mut dev = BlockDevice::create(&path, 1000 * BLOCK_SIZE as u64).unwrap();
		Filesystem::format(&mut dev, 128).unwrap();
		let fs = Filesystem::mount(dev).unwrap();
		(path, fs)
	}

	fn teardown(path: PathBuf, fs: Filesystem) {
		fs.unmount().unwrap();
		fs::remove_file(&path).unwrap();
	}

	#[test]
	fn format_and_mount() {
		let (path, fs) = setup("format-mount");

		let sb = fs.get_superblock();
		assert!(sb.is_valid());
		assert_eq!(sb.total_blocks, 1000);
		assert_eq!(sb.total_inodes, 128);
		// Inode 0 and the root are taken
		assert_eq!(sb.free_inodes, 126);
		assert_eq!(sb.mount_count, 1);
		assert_eq!(fs.get_current_dir(), INODE_ROOT);

		teardown(path, fs);
	}

	#[test]
	fn root_directory_shape() {
		let (path, mut fs) = setup("root-shape");

		let (ino, root) = fs.stat("/").unwrap();
		assert_eq!(ino, INODE_ROOT);
		assert!(root.is_directory());
		assert_eq!(root.links_count, 2);

		let entries = fs.list("/").unwrap();
		let names: Vec<&str> = entries.iter().map(Dirent::get_name).collect();
		assert_eq!(names, [".", ".."]);
		assert!(entries.iter().all(|e| e.inode_num == INODE_ROOT));

		teardown(path, fs);
	}

	#[test]
	fn bitmap_accounting_matches_superblock() {
		let (path, mut fs) = setup("accounting");

		fs.mkdir("/d", 0o755).unwrap();
		fs.create("/d/f", 0o644).unwrap();
		let mut file = fs.open("/d/f", O_RDWR).unwrap();
		fs.write(&mut file, &[7u8; 3000]).unwrap();
		fs.close(file);

		let sb = fs.get_superblock();
		assert_eq!(sb.free_blocks as usize, fs.block_bitmap.count_free());
		assert_eq!(sb.free_inodes as usize, fs.inode_bitmap.count_free());

		teardown(path, fs);
	}

	#[test]
	fn mkdir_stat_list() {
		let (path, mut fs) = setup("mkdir");

		fs.mkdir("/dir1", 0o755).unwrap();

		let (_, inode) = fs.stat("/dir1").unwrap();
		assert!(inode.is_directory());
		assert_eq!(inode.links_count, 2);
		assert_eq!(inode.permissions, 0o755);

		let names: Vec<String> = fs
			.list("/")
			.unwrap()
			.iter()
			.map(|e| e.get_name().to_owned())
			.collect();
		assert!(names.contains(&"dir1".to_owned()));
		assert!(names.contains(&".".to_owned()));
		assert!(names.contains(&"..".to_owned()));

		// The parent gained a link for the child's `..`
		let (_, root) = fs.stat("/").unwrap();
		assert_eq!(root.links_count, 3);

		teardown(path, fs);
	}

	#[test]
	fn mkdir_rejects_duplicates_and_bad_parents() {
		let (path, mut fs) = setup("mkdir-dup");

		fs.mkdir("/d", 0o755).unwrap();
		assert!(matches!(fs.mkdir("/d", 0o755), Err(FsError::Exists)));
		assert!(matches!(
			fs.mkdir("/missing/d", 0o755),
			Err(FsError::NotFound)
		));

		fs.create("/f", 0o644).unwrap();
		// The parent resolves to a file
		assert!(matches!(fs.mkdir("/f/d", 0o755), Err(FsError::Invalid)));

		teardown(path, fs);
	}

	#[test]
	fn write_then_read() {
		let (path, mut fs) = setup("write-read");

		fs.create("/data.bin", 0o644).unwrap();
		let mut file = fs.open("/data.bin", O_RDWR).unwrap();

		let n = fs.write(&mut file, b"Hello filesystem!").unwrap();
		assert_eq!(n, 17);

		fs.seek(&mut file, 0);
		let mut buf = [0u8; 64];
		let n = fs.read(&mut file, &mut buf).unwrap();
		assert_eq!(n, 17);
		assert_eq!(&buf[..17], b"Hello filesystem!");

		fs.close(file);

		let (_, inode) = fs.stat("/data.bin").unwrap();
		assert_eq!(inode.size, 17);
		assert_eq!(inode.blocks_used, 1);

		teardown(path, fs);
	}

	#[test]
	fn multi_block_write_spills_into_indirect() {
		let (path, mut fs) = setup("indirect");

		let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

		fs.create("/big", 0o644).unwrap();
		let mut file = fs.open("/big", O_RDWR).unwrap();
		assert_eq!(fs.write(&mut file, &payload).unwrap(), payload.len());

		fs.seek(&mut file, 0);
		let mut back = vec![0u8; payload.len() + 100];
		let n = fs.read(&mut file, &mut back).unwrap();
		assert_eq!(n, payload.len());
		assert_eq!(&back[..n], &payload[..]);
		fs.close(file);

		let (_, inode) = fs.stat("/big").unwrap();
		assert_eq!(inode.size, 20_000);
		// 40 data blocks: 12 direct + 28 indirect children + the indirect
		// block itself
		assert_ne!(inode.indirect, 0);
		assert_eq!(inode.blocks_used, 41);

		teardown(path, fs);
	}

	#[test]
	fn write_beyond_max_file_size() {
		let (path, mut fs) = setup("max-size");

		fs.create("/f", 0o644).unwrap();
		let mut file = fs.open("/f", O_RDWR).unwrap();

		let max = (MAX_FILE_BLOCKS * BLOCK_SIZE) as u32;
		fs.seek(&mut file, 0);
		// A write that would end past the addressable range fails upfront
		let free_before = fs.get_superblock().free_blocks;
		fs.write(&mut file, &[0u8; 10]).unwrap();
		fs.seek(&mut file, 10);
		let err = fs.write_at(file.inode_num, &mut file.inode, max - 5, &[0u8; 10]);
		assert!(matches!(err, Err(FsError::NoSpace)));
		// Only the successful write changed the accounting
		assert_eq!(fs.get_superblock().free_blocks, free_before - 1);

		fs.close(file);
		teardown(path, fs);
	}

	#[test]
	fn partial_overwrite_preserves_rest() {
		let (path, mut fs) = setup("overwrite");

		fs.create("/f", 0o644).unwrap();
		let mut file = fs.open("/f", O_RDWR).unwrap();
		fs.write(&mut file, b"aaaaaaaaaa").unwrap();

		fs.seek(&mut file, 3);
		fs.write(&mut file, b"XY").unwrap();

		fs.seek(&mut file, 0);
		let mut buf = [0u8; 16];
		let n = fs.read(&mut file, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"aaaXYaaaaa");

		fs.close(file);
		teardown(path, fs);
	}

	#[test]
	fn hard_link_fanout() {
		let (path, mut fs) = setup("link");

		fs.create("/orig.txt", 0o644).unwrap();
		let mut file = fs.open("/orig.txt", O_RDWR).unwrap();
		fs.write(&mut file, b"hello through links").unwrap();
		fs.close(file);

		fs.link("/orig.txt", "/alias.txt").unwrap();

		let (ino_a, inode_a) = fs.stat("/orig.txt").unwrap();
		let (ino_b, inode_b) = fs.stat("/alias.txt").unwrap();
		assert_eq!(ino_a, ino_b);
		assert_eq!(inode_a.links_count, 2);
		assert_eq!(inode_b.links_count, 2);

		let mut alias = fs.open("/alias.txt", O_RDONLY).unwrap();
		let mut buf = [0u8; 32];
		let n = fs.read(&mut alias, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"hello through links");
		fs.close(alias);

		// A write through one name is visible through the other
		let mut file = fs.open("/alias.txt", O_RDWR).unwrap();
		fs.write(&mut file, b"HELLO").unwrap();
		fs.close(file);
		let mut orig = fs.open("/orig.txt", O_RDONLY).unwrap();
		let n = fs.read(&mut orig, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"HELLO through links");
		fs.close(orig);

		// Unlinking one name keeps the other alive
		fs.unlink("/orig.txt").unwrap();
		let (_, inode_b) = fs.stat("/alias.txt").unwrap();
		assert_eq!(inode_b.links_count, 1);
		assert!(matches!(fs.stat("/orig.txt"), Err(FsError::NotFound)));

		teardown(path, fs);
	}

	#[test]
	fn link_rejects_directories_and_duplicates() {
		let (path, mut fs) = setup("link-invalid");

		fs.mkdir("/d", 0o755).unwrap();
		assert!(matches!(fs.link("/d", "/d2"), Err(FsError::Invalid)));

		fs.create("/f", 0o644).unwrap();
		fs.create("/g", 0o644).unwrap();
		assert!(matches!(fs.link("/f", "/g"), Err(FsError::Exists)));
		assert!(matches!(fs.link("/missing", "/x"), Err(FsError::NotFound)));

		teardown(path, fs);
	}

	#[test]
	fn cd_traversal() {
		let (path, mut fs) = setup("cd");

		fs.mkdir("/a", 0o755).unwrap();
		fs.mkdir("/a/b", 0o755).unwrap();

		fs.cd("/a/b").unwrap();
		let b = fs.get_current_dir();
		assert_eq!(fs.get_current_path().unwrap(), "/a/b");

		fs.cd("..").unwrap();
		fs.cd("..").unwrap();
		assert_eq!(fs.get_current_dir(), INODE_ROOT);

		assert!(matches!(fs.cd("/no"), Err(FsError::NotFound)));

		fs.cd("/a/b/../..").unwrap();
		assert_eq!(fs.get_current_dir(), INODE_ROOT);

		// Relative resolution starts at the current directory
		fs.cd("a").unwrap();
		fs.cd("b").unwrap();
		assert_eq!(fs.get_current_dir(), b);

		// `..` at the root stays at the root
		fs.cd("/..").unwrap();
		assert_eq!(fs.get_current_dir(), INODE_ROOT);

		fs.create("/file", 0o644).unwrap();
		assert!(matches!(fs.cd("/file"), Err(FsError::Invalid)));

		teardown(path, fs);
	}

	#[test]
	fn rmdir_only_when_empty() {
		let (path, mut fs) = setup("rmdir");

		fs.mkdir("/d", 0o755).unwrap();
		fs.create("/d/f", 0o644).unwrap();

		assert!(matches!(fs.rmdir("/d"), Err(FsError::Generic)));

		fs.unlink("/d/f").unwrap();
		fs.rmdir("/d").unwrap();
		assert!(matches!(fs.stat("/d"), Err(FsError::NotFound)));

		// The parent's link count dropped back
		let (_, root) = fs.stat("/").unwrap();
		assert_eq!(root.links_count, 2);

		assert!(matches!(fs.rmdir("/"), Err(FsError::Invalid)));
		assert!(matches!(fs.rmdir("/missing"), Err(FsError::NotFound)));

		fs.create("/f", 0o644).unwrap();
		assert!(matches!(fs.rmdir("/f"), Err(FsError::Invalid)));

		teardown(path, fs);
	}

	#[test]
	fn create_unlink_restores_counters() {
		let (path, mut fs) = setup("counters");

		let sb = fs.get_superblock();
		let free_inodes = sb.free_inodes;
		let free_blocks = sb.free_blocks;

		fs.create("/tmp.txt", 0o644).unwrap();
		let mut file = fs.open("/tmp.txt", O_RDWR).unwrap();
		fs.write(&mut file, &[1u8; 2000]).unwrap();
		fs.close(file);

		fs.unlink("/tmp.txt").unwrap();

		let sb = fs.get_superblock();
		assert_eq!(sb.free_inodes, free_inodes);
		// The file's data blocks return; the entry block the root allocated
		// for the new name stays in place
		assert_eq!(sb.free_blocks, free_blocks - 1);
		assert!(matches!(fs.stat("/tmp.txt"), Err(FsError::NotFound)));

		teardown(path, fs);
	}

	#[test]
	fn unlink_rejects_directory() {
		let (path, mut fs) = setup("unlink-dir");

		fs.mkdir("/d", 0o755).unwrap();
		assert!(matches!(fs.unlink("/d"), Err(FsError::Invalid)));

		teardown(path, fs);
	}

	#[test]
	fn truncate_zeroes_file() {
		let (path, mut fs) = setup("trunc");

		fs.create("/f", 0o644).unwrap();
		let mut file = fs.open("/f", O_RDWR).unwrap();
		fs.write(&mut file, &[9u8; 8000]).unwrap();
		fs.close(file);

		let free_before = fs.get_superblock().free_blocks;
		let file = fs.open("/f", O_WRONLY | O_TRUNC).unwrap();
		fs.close(file);

		let (_, inode) = fs.stat("/f").unwrap();
		assert_eq!(inode.size, 0);
		assert_eq!(inode.blocks_used, 0);
		assert_eq!(inode.indirect, 0);
		// 8000 bytes: 16 data blocks + the indirect block
		assert_eq!(fs.get_superblock().free_blocks, free_before + 17);

		teardown(path, fs);
	}

	#[test]
	fn append_starts_at_end() {
		let (path, mut fs) = setup("append");

		fs.create("/log", 0o644).unwrap();
		let mut file = fs.open("/log", O_WRONLY).unwrap();
		fs.write(&mut file, b"one").unwrap();
		fs.close(file);

		let mut file = fs.open("/log", O_WRONLY | O_APPEND).unwrap();
		assert_eq!(file.get_offset(), 3);
		fs.write(&mut file, b"two").unwrap();
		fs.close(file);

		let mut file = fs.open("/log", O_RDONLY).unwrap();
		let mut buf = [0u8; 16];
		let n = fs.read(&mut file, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"onetwo");
		fs.close(file);

		teardown(path, fs);
	}

	#[test]
	fn open_flag_permissions() {
		let (path, mut fs) = setup("flags");

		fs.create("/f", 0o644).unwrap();

		let mut file = fs.open("/f", O_RDONLY).unwrap();
		assert!(matches!(
			fs.write(&mut file, b"x"),
			Err(FsError::Permission)
		));
		fs.close(file);

		let mut file = fs.open("/f", O_WRONLY).unwrap();
		let mut buf = [0u8; 4];
		assert!(matches!(
			fs.read(&mut file, &mut buf),
			Err(FsError::Permission)
		));
		fs.close(file);

		// O_CREAT creates missing files, directories stay invalid
		assert!(matches!(fs.open("/missing", O_RDONLY), Err(FsError::NotFound)));
		let file = fs.open("/created", O_RDWR | O_CREAT).unwrap();
		fs.close(file);
		assert!(fs.stat("/created").is_ok());

		fs.mkdir("/d", 0o755).unwrap();
		assert!(matches!(fs.open("/d", O_RDONLY), Err(FsError::Invalid)));

		teardown(path, fs);
	}

	#[test]
	fn seek_clamps_to_size() {
		let (path, mut fs) = setup("seek");

		fs.create("/f", 0o644).unwrap();
		let mut file = fs.open("/f", O_RDWR).unwrap();
		fs.write(&mut file, b"0123456789").unwrap();

		fs.seek(&mut file, 4);
		assert_eq!(file.get_offset(), 4);
		fs.seek(&mut file, 1000);
		assert_eq!(file.get_offset(), 10);

		fs.close(file);
		teardown(path, fs);
	}

	#[test]
	fn persistence_across_remount() {
		let path = temp_image("remount");
		let mut dev = BlockDevice::create(&path, 1000 * BLOCK_SIZE as u64).unwrap();
		Filesystem::format(&mut dev, 128).unwrap();

		let mut fs = Filesystem::mount(dev).unwrap();
		fs.mkdir("/keep", 0o755).unwrap();
		fs.create("/keep/data", 0o644).unwrap();
		let mut file = fs.open("/keep/data", O_RDWR).unwrap();
		fs.write(&mut file, b"still here").unwrap();
		fs.close(file);
		let free_blocks = fs.get_superblock().free_blocks;
		let free_inodes = fs.get_superblock().free_inodes;
		fs.unmount().unwrap();

		let dev = BlockDevice::open(&path).unwrap();
		let mut fs = Filesystem::mount(dev).unwrap();
		assert_eq!(fs.get_superblock().mount_count, 2);
		assert_eq!(fs.get_superblock().free_blocks, free_blocks);
		assert_eq!(fs.get_superblock().free_inodes, free_inodes);

		let mut file = fs.open("/keep/data", O_RDONLY).unwrap();
		let mut buf = [0u8; 32];
		let n = fs.read(&mut file, &mut buf).unwrap();
		assert_eq!(&buf[..n], b"still here");
		fs.close(file);

		teardown(path, fs);
	}

	#[test]
	fn mount_rejects_blank_image() {
		let path = temp_image("blank");
		let dev = BlockDevice::create(&path, 100 * BLOCK_SIZE as u64).unwrap();

		assert!(matches!(Filesystem::mount(dev), Err(FsError::Invalid)));

		fs::remove_file(&path).unwrap();
	}

	#[test]
	fn inode_exhaustion() {
		let path = temp_image("inode-exhaustion");
		let mut dev = BlockDevice::create(&path, 1000 * BLOCK_SIZE as u64).unwrap();
		Filesystem::format(&mut dev, 8).unwrap();
		let mut fs = Filesystem::mount(dev).unwrap();

		// 8 inodes: 0 reserved, 1 root, 6 usable
		for i in 0..6 {
			fs.create(&format!("/f{}", i), 0o644).unwrap();
		}
		assert!(matches!(fs.create("/overflow", 0o644), Err(FsError::NoSpace)));
		assert_eq!(fs.get_superblock().free_inodes, 0);

		teardown(path, fs);
	}

	#[test]
	fn paths_from_inodes() {
		let (path, mut fs) = setup("inode-path");

		fs.mkdir("/a", 0o755).unwrap();
		fs.mkdir("/a/b", 0o755).unwrap();

		let ino = fs.resolve("/a/b").unwrap();
		assert_eq!(fs.inode_to_path(ino).unwrap(), "/a/b");
		assert_eq!(fs.inode_to_path(INODE_ROOT).unwrap(), "/");

		teardown(path, fs);
	}

	#[test]
	fn resolve_odd_paths() {
		let (path, mut fs) = setup("resolve");

		fs.mkdir("/a", 0o755).unwrap();
		fs.create("/a/f", 0o644).unwrap();

		let direct = fs.resolve("/a/f").unwrap();
		assert_eq!(fs.resolve("//a///f").unwrap(), direct);
		assert_eq!(fs.resolve("/a/./f").unwrap(), direct);
		assert_eq!(fs.resolve("/a/../a/f").unwrap(), direct);
		assert_eq!(fs.resolve("/../a/f").unwrap(), direct);

		assert!(matches!(fs.resolve(""), Err(FsError::Invalid)));
		assert!(matches!(fs.resolve("/a/f/x"), Err(FsError::NotFound)));

		teardown(path, fs);
	}
}
