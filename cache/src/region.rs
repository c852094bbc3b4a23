//! The contiguous byte region and its persistent header. The header is a
//! plain little-endian byte layout read and written field by field, so a
//! reloaded file is usable on any build with the same version number.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::Error;
use crate::index;

/// Bump on any incompatible change to the header, node or entry layout.
pub const VERSION: u32 = 22;

/// Size of the persistent header at the front of the region.
pub const HEADER_LEN: usize = 128;

/// Regions below this cannot hold a useful node arena.
pub const MIN_SIZE: u32 = 102_400;

const COMMENT: &[u8] = b"\nDo not edit this file.\n";

// Header field offsets. All integers are little-endian.
const H_VERSION: usize = 0;
const H_SIZE: usize = 4;
const H_END: usize = 8;
const H_COUNT: usize = 12;
const H_ARENA: usize = 16;
const H_ARENA_CAP: usize = 20;
const H_ARENA_USED: usize = 24;
const H_COMMENT: usize = 32;

enum Backing {
	Memory(Box<[u8]>),
	File { map: MmapMut, _file: File },
}

pub struct Region {
	backing: Backing,
}

impl Region {
	/// A zeroed anonymous region.
	pub fn anonymous(size: u32) -> Self {
		Self { backing: Backing::Memory(vec![0; size as usize].into_boxed_slice()) }
	}

	/// Map `path` at exactly `size` bytes, creating or resizing the file
	/// as needed. The second value reports whether the file already
	/// existed; its header decides what it still holds.
	pub fn open_file(path: &Path, size: u32) -> Result<(Self, bool), Error> {
		let existed = path.exists();

		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)
			.map_err(|source| Error::Open { path: path.to_owned(), source })?;

		file.set_len(size as u64).map_err(Error::Map)?;

		// The mapping stays private to this process; concurrent external
		// writers are not supported.
		let map = unsafe { MmapMut::map_mut(&file) }.map_err(Error::Map)?;

		Ok((Self { backing: Backing::File { map, _file: file } }, existed))
	}

	pub fn bytes(&self) -> &[u8] {
		match &self.backing {
			Backing::Memory(b) => b,
			Backing::File { map, .. } => map,
		}
	}

	pub fn bytes_mut(&mut self) -> &mut [u8] {
		match &mut self.backing {
			Backing::Memory(b) => b,
			Backing::File { map, .. } => map,
		}
	}

	pub fn len(&self) -> usize {
		self.bytes().len()
	}

	/// Push dirty pages out for a file backing; a no-op in memory.
	pub fn flush(&self) -> io::Result<()> {
		match &self.backing {
			Backing::Memory(_) => Ok(()),
			Backing::File { map, .. } => map.flush(),
		}
	}

	fn get32(&self, at: usize) -> u32 {
		let b = self.bytes();
		u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
	}

	fn put32(&mut self, at: usize, v: u32) {
		self.bytes_mut()[at..at + 4].copy_from_slice(&v.to_le_bytes());
	}

	pub fn version(&self) -> u32 {
		self.get32(H_VERSION)
	}

	pub fn cache_size(&self) -> u32 {
		self.get32(H_SIZE)
	}

	/// First byte past the highest allocated slot.
	pub fn end_offset(&self) -> u32 {
		self.get32(H_END)
	}

	pub fn set_end_offset(&mut self, v: u32) {
		self.put32(H_END, v)
	}

	/// Number of live entries.
	pub fn entry_count(&self) -> u32 {
		self.get32(H_COUNT)
	}

	pub fn set_entry_count(&mut self, v: u32) {
		self.put32(H_COUNT, v)
	}

	pub fn arena_offset(&self) -> u32 {
		self.get32(H_ARENA)
	}

	pub fn arena_capacity(&self) -> u32 {
		self.get32(H_ARENA_CAP)
	}

	pub fn arena_used(&self) -> u32 {
		self.get32(H_ARENA_USED)
	}

	pub fn set_arena_used(&mut self, v: u32) {
		self.put32(H_ARENA_USED, v)
	}

	/// Zero the region and write a fresh header over it.
	pub fn format(&mut self, arena_capacity: u32) {
		let size = self.len() as u32;

		self.bytes_mut().fill(0);
		self.put32(H_VERSION, VERSION);
		self.put32(H_SIZE, size);
		self.put32(H_ARENA, HEADER_LEN as u32);
		self.put32(H_ARENA_CAP, arena_capacity);

		self.bytes_mut()[H_COMMENT..H_COMMENT + COMMENT.len()].copy_from_slice(COMMENT);
	}

	/// Decide whether an existing header can be attached to under the
	/// configured size.
	pub fn validate(&self, size: u32) -> Result<(), Error> {
		let found = self.version();

		if found != VERSION {
			return Err(Error::Version { found, expected: VERSION });
		}

		let held = self.cache_size();

		if held != size {
			return Err(Error::Size { found: held, expected: size });
		}

		if self.arena_offset() != HEADER_LEN as u32 || self.arena_capacity() != index::arena_capacity(size) {
			return Err(Error::Corrupt("index root does not match the region size"));
		}

		if self.arena_used() > self.arena_capacity() {
			return Err(Error::Corrupt("arena count exceeds its capacity"));
		}

		let end = self.end_offset();

		if end < index::data_start(self) || end > size {
			return Err(Error::Corrupt("end offset is out of bounds"));
		}

		Ok(())
	}
}
