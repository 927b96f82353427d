//! Directory entries.
//!
//! A directory's data blocks form a flat array of fixed-size entry slots, two
//! per block, reached through the directory inode's direct pointers first and
//! the single-indirect block second. A slot with `inode_num == 0` is free.
//! Removal leaves holes that later insertions refill; blocks are never
//! compacted.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::device::BLOCK_SIZE;
use crate::error::FsError;
use crate::error::Result;
use crate::inode;
use crate::inode::FileType;
use crate::inode::Inode;
use crate::inode::NDIRECT;
use crate::inode::POINTERS_PER_BLOCK;
use crate::path;
use crate::superblock::Superblock;
use crate::util::get_timestamp;
use crate::util::reinterpret;
use crate::util::reinterpret_mut;
use log::warn;
use std::mem;
use std::mem::size_of;
use std::str;

/// The size of a directory entry in bytes.
pub const DIRENT_SIZE: usize = 256;
/// The number of directory entries per block.
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;
/// The capacity of the entry's name buffer, including the NUL terminator.
const NAME_CAPACITY: usize = path::MAX_NAME;

/// An on-disk directory entry, mapping a name to an inode number.
///
/// The field order leaves no padding; the size assertion below pins the
/// on-disk layout.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Dirent {
	/// The number of the target inode. Zero marks a free slot.
	pub inode_num: u32,
	/// The length of the name in bytes.
	pub name_len: u8,
	/// The type of the target (see [`FileType`]).
	pub file_type: u8,
	/// The entry's name, NUL-terminated.
	pub name: [u8; NAME_CAPACITY],
}

const _: () = assert!(size_of::<Dirent>() == DIRENT_SIZE);

impl Dirent {
	/// Builds a validated entry mapping `name` to `inode_num`.
	///
	/// The name must satisfy the filename rules, the inode number must be
	/// non-zero and the type must be a file or a directory. The special `.`
	/// and `..` entries are not built through here; the filesystem populates
	/// them directly with [`Dirent::new_raw`].
	pub fn new(name: &str, inode_num: u32, file_type: FileType) -> Result<Self> {
		if !path::filename_is_valid(name) {
			return Err(FsError::Invalid);
		}

		Self::new_raw(name, inode_num, file_type)
	}

	/// Builds an entry without applying the filename rules.
	///
	/// Used by the filesystem for the self-maintained `.` and `..` entries.
	pub fn new_raw(name: &str, inode_num: u32, file_type: FileType) -> Result<Self> {
		if name.is_empty() || name.len() >= NAME_CAPACITY || inode_num == 0 {
			return Err(FsError::Invalid);
		}
		if !matches!(file_type, FileType::File | FileType::Directory) {
			return Err(FsError::Invalid);
		}

		let mut ent = Self {
			inode_num,
			name_len: name.len() as u8,
			file_type: file_type.as_raw() as u8,
			name: [0; NAME_CAPACITY],
		};
		ent.name[..name.len()].copy_from_slice(name.as_bytes());

		Ok(ent)
	}

	/// Returns the entry's name.
	pub fn get_name(&self) -> &str {
		let len = self.name_len as usize;
		str::from_utf8(&self.name[..len]).unwrap_or("")
	}

	/// Tells whether the slot is free.
	pub fn is_free(&self) -> bool {
		self.inode_num == 0
	}
}

/// Decodes the two entry slots of a directory data block.
fn decode_block(buf: &[u8; BLOCK_SIZE]) -> [Dirent; DIRENTS_PER_BLOCK] {
	let mut slots: [Dirent; DIRENTS_PER_BLOCK] = unsafe { mem::zeroed() };
	for (i, slot) in slots.iter_mut().enumerate() {
		reinterpret_mut(slot).copy_from_slice(&buf[(i * DIRENT_SIZE)..((i + 1) * DIRENT_SIZE)]);
	}

	slots
}

/// Encodes an entry into its slot inside a directory data block.
fn encode_slot(buf: &mut [u8; BLOCK_SIZE], slot: usize, ent: &Dirent) {
	buf[(slot * DIRENT_SIZE)..((slot + 1) * DIRENT_SIZE)].copy_from_slice(reinterpret(ent));
}

/// Returns the data blocks of the directory `dir` in traversal order, paired
/// with their position in the inode's address space.
///
/// Zero pointers are skipped. Direct blocks come first, then the children of
/// the indirect block.
fn data_blocks(dev: &mut BlockDevice, dir: &Inode) -> Result<Vec<(usize, u32)>> {
	let mut blocks = Vec::new();

	for (i, ptr) in dir.direct.iter().enumerate() {
		if *ptr != 0 {
			blocks.push((i, *ptr));
		}
	}

	if dir.indirect != 0 {
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(dir.indirect as u64, &mut buf)?;

		for i in 0..POINTERS_PER_BLOCK {
			let ptr = u32::from_le_bytes([
				buf[i * 4],
				buf[i * 4 + 1],
				buf[i * 4 + 2],
				buf[i * 4 + 3],
			]);
			if ptr != 0 {
				blocks.push((NDIRECT + i, ptr));
			}
		}
	}

	Ok(blocks)
}

/// Searches the directory `dir` for the entry named `name`.
///
/// Returns the entry and its global slot index. The index is derived from the
/// slot's position in the inode's address space, so it is stable across
/// insertions into earlier holes.
pub fn find(
	dev: &mut BlockDevice,
	dir: &Inode,
	name: &str,
) -> Result<(Dirent, usize)> {
	for (pos, blk) in data_blocks(dev, dir)? {
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(blk as u64, &mut buf)?;

		for (slot, ent) in decode_block(&buf).iter().enumerate() {
			if !ent.is_free() && ent.get_name() == name {
				return Ok((*ent, pos * DIRENTS_PER_BLOCK + slot));
			}
		}
	}

	Err(FsError::NotFound)
}

/// Inserts `ent` into the first free slot of the directory `dir_inode_num`.
///
/// Scans the direct blocks first, then the indirect block's children. When a
/// zero pointer is reached before any free slot, a fresh zeroed block is
/// allocated from `block_bitmap` and linked in, allocating the indirect block
/// on the way if needed. Every allocation is rolled back if a later step
/// fails.
///
/// Returns the number of blocks allocated (0 to 2); the caller adjusts the
/// superblock counters. Fails with `Exists` when the name is already present
/// and `NoSpace` when the directory is full or the device is out of blocks.
pub fn add(
	dev: &mut BlockDevice,
	sb: &Superblock,
	dir_inode_num: u32,
	dir: &mut Inode,
	ent: &Dirent,
	block_bitmap: &mut Bitmap,
) -> Result<u32> {
	if find(dev, dir, ent.get_name()).is_ok() {
		return Err(FsError::Exists);
	}

	let now = get_timestamp().as_secs() as u32;

	// Direct blocks: reuse a free slot, or claim the first zero pointer
	for i in 0..NDIRECT {
		if dir.direct[i] == 0 {
			let blk = alloc_block(block_bitmap)?;

			let mut buf = [0u8; BLOCK_SIZE];
			encode_slot(&mut buf, 0, ent);
			if let Err(e) = dev.write_block(blk as u64, &buf) {
				warn!("dentry add: rolling back block {} allocation", blk);
				let _ = block_bitmap.clear(blk as usize);
				return Err(e);
			}

			dir.direct[i] = blk;
			dir.blocks_used += 1;
			dir.modified = now;
			if let Err(e) = inode::write(dev, sb, dir_inode_num, dir) {
				warn!("dentry add: rolling back block {} allocation", blk);
				dir.direct[i] = 0;
				dir.blocks_used -= 1;
				let _ = block_bitmap.clear(blk as usize);
				return Err(e);
			}

			return Ok(1);
		}

		let blk = dir.direct[i];
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(blk as u64, &mut buf)?;

		if let Some(slot) = find_free_slot(&buf) {
			encode_slot(&mut buf, slot, ent);
			dev.write_block(blk as u64, &buf)?;

			dir.modified = now;
			inode::write(dev, sb, dir_inode_num, dir)?;

			return Ok(0);
		}
	}

	// All direct blocks are full; go through the indirect block
	let mut allocated = 0;
	let indirect_was_absent = dir.indirect == 0;
	if indirect_was_absent {
		let blk = alloc_block(block_bitmap)?;

		if let Err(e) = dev.write_block(blk as u64, &[0u8; BLOCK_SIZE]) {
			warn!("dentry add: rolling back indirect block {} allocation", blk);
			let _ = block_bitmap.clear(blk as usize);
			return Err(e);
		}

		dir.indirect = blk;
		dir.blocks_used += 1;
		allocated += 1;
	}

	let rollback_indirect = |dir: &mut Inode, block_bitmap: &mut Bitmap| {
		if indirect_was_absent {
			let _ = block_bitmap.clear(dir.indirect as usize);
			dir.indirect = 0;
			dir.blocks_used -= 1;
		}
	};

	let mut ind_buf = [0u8; BLOCK_SIZE];
	if let Err(e) = dev.read_block(dir.indirect as u64, &mut ind_buf) {
		rollback_indirect(dir, block_bitmap);
		return Err(e);
	}

	for i in 0..POINTERS_PER_BLOCK {
		let ptr = u32::from_le_bytes([
			ind_buf[i * 4],
			ind_buf[i * 4 + 1],
			ind_buf[i * 4 + 2],
			ind_buf[i * 4 + 3],
		]);

		if ptr == 0 {
			let blk = match alloc_block(block_bitmap) {
				Ok(blk) => blk,
				Err(e) => {
					rollback_indirect(dir, block_bitmap);
					return Err(e);
				}
			};

			let mut buf = [0u8; BLOCK_SIZE];
			encode_slot(&mut buf, 0, ent);

			ind_buf[(i * 4)..(i * 4 + 4)].copy_from_slice(&blk.to_le_bytes());

			let res = dev
				.write_block(blk as u64, &buf)
				.and_then(|_| dev.write_block(dir.indirect as u64, &ind_buf));
			if let Err(e) = res {
				warn!("dentry add: rolling back block {} allocation", blk);
				let _ = block_bitmap.clear(blk as usize);
				rollback_indirect(dir, block_bitmap);
				return Err(e);
			}

			dir.blocks_used += 1;
			dir.modified = now;
			if let Err(e) = inode::write(dev, sb, dir_inode_num, dir) {
				warn!("dentry add: rolling back block {} allocation", blk);
				dir.blocks_used -= 1;
				let _ = block_bitmap.clear(blk as usize);
				rollback_indirect(dir, block_bitmap);
				return Err(e);
			}

			return Ok(allocated + 1);
		}

		let mut buf = [0u8; BLOCK_SIZE];
		if let Err(e) = dev.read_block(ptr as u64, &mut buf) {
			rollback_indirect(dir, block_bitmap);
			return Err(e);
		}

		if let Some(slot) = find_free_slot(&buf) {
			encode_slot(&mut buf, slot, ent);
			if let Err(e) = dev.write_block(ptr as u64, &buf) {
				rollback_indirect(dir, block_bitmap);
				return Err(e);
			}

			dir.modified = now;
			if let Err(e) = inode::write(dev, sb, dir_inode_num, dir) {
				rollback_indirect(dir, block_bitmap);
				return Err(e);
			}

			return Ok(allocated);
		}
	}

	// Every addressable slot is taken
	rollback_indirect(dir, block_bitmap);
	Err(FsError::NoSpace)
}

/// Removes the entry named `name` from the directory `dir_inode_num`.
///
/// The slot is zeroed in place; empty blocks are kept.
pub fn remove(
	dev: &mut BlockDevice,
	sb: &Superblock,
	dir_inode_num: u32,
	dir: &mut Inode,
	name: &str,
) -> Result<()> {
	for (_, blk) in data_blocks(dev, dir)? {
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(blk as u64, &mut buf)?;

		for (slot, ent) in decode_block(&buf).iter().enumerate() {
			if ent.is_free() || ent.get_name() != name {
				continue;
			}

			let free: Dirent = unsafe { mem::zeroed() };
			encode_slot(&mut buf, slot, &free);
			dev.write_block(blk as u64, &buf)?;

			dir.modified = get_timestamp().as_secs() as u32;
			inode::write(dev, sb, dir_inode_num, dir)?;

			return Ok(());
		}
	}

	Err(FsError::NotFound)
}

/// Lists the entries of the directory `dir` in traversal order.
pub fn list(dev: &mut BlockDevice, dir: &Inode) -> Result<Vec<Dirent>> {
	let blocks = data_blocks(dev, dir)?;

	// First pass: count the occupied slots
	let mut count = 0;
	for (_, blk) in &blocks {
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(*blk as u64, &mut buf)?;

		count += decode_block(&buf).iter().filter(|e| !e.is_free()).count();
	}

	// Second pass: fill, in the same order
	let mut entries = Vec::with_capacity(count);
	for (_, blk) in &blocks {
		let mut buf = [0u8; BLOCK_SIZE];
		dev.read_block(*blk as u64, &mut buf)?;

		entries.extend(decode_block(&buf).iter().filter(|e| !e.is_free()).copied());
	}

	Ok(entries)
}

/// Allocates a block from the bitmap, smallest index first.
fn alloc_block(block_bitmap: &mut Bitmap) -> Result<u32> {
	let blk = block_bitmap.find_first_free().ok_or(FsError::NoSpace)?;
	block_bitmap.set(blk)?;

	Ok(blk as u32)
}

/// Returns the first free slot of the given block, if any.
fn find_free_slot(buf: &[u8; BLOCK_SIZE]) -> Option<usize> {
	decode_block(buf).iter().position(Dirent::is_free)
}
