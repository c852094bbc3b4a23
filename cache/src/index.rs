//! The node arena and its live view.
//!
//! Node records are persistent: 24-byte little-endian slots directly after
//! the header, so a remapped file brings its index back by itself. The
//! hash chains and the free pools are process state, rebuilt on attach by
//! one scan of the arena.


use ahash::RandomState;
use hashbrown::HashMap;
use log::warn;

use crate::entry;
use crate::region::Region;

/// Size of one persistent node record.
pub const NODE_LEN: usize = 24;

const N_OFFSET: usize = 0;
const N_LENGTH: usize = 4;
const N_TTL: usize = 8;
const N_TIME: usize = 12;

/// One slot of the region, as described by its arena record. `ttl == 0`
/// means not live; of those, a nonzero `length` marks a reusable freed
/// slot and a zero `length` a blank descriptor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
	pub offset: u32,
	pub length: u32,
	pub ttl: u32,
	pub time_added: u64,
}

pub fn round_up(n: u32, to: u32) -> u32 {
	n.div_ceil(to) * to
}

/// Node records the arena holds for a region of `size` bytes.
pub fn arena_capacity(size: u32) -> u32 {
	size / 128
}

/// First byte entries may occupy: header plus arena, aligned up.
pub fn data_start(region: &Region) -> u32 {
	round_up(region.arena_offset() + region.arena_capacity() * NODE_LEN as u32, 8)
}

pub fn node(region: &Region, sub: u32) -> Node {
	let at = region.arena_offset() as usize + sub as usize * NODE_LEN;
	let b = &region.bytes()[at..at + NODE_LEN];

	Node {
		offset: u32::from_le_bytes([b[N_OFFSET], b[N_OFFSET + 1], b[N_OFFSET + 2], b[N_OFFSET + 3]]),
		length: u32::from_le_bytes([b[N_LENGTH], b[N_LENGTH + 1], b[N_LENGTH + 2], b[N_LENGTH + 3]]),
		ttl: u32::from_le_bytes([b[N_TTL], b[N_TTL + 1], b[N_TTL + 2], b[N_TTL + 3]]),
		time_added: u64::from_le_bytes([
			b[N_TIME],
			b[N_TIME + 1],
			b[N_TIME + 2],
			b[N_TIME + 3],
			b[N_TIME + 4],
			b[N_TIME + 5],
			b[N_TIME + 6],
			b[N_TIME + 7],
		]),
	}
}

pub fn set_node(region: &mut Region, sub: u32, n: Node) {
	let at = region.arena_offset() as usize + sub as usize * NODE_LEN;
	let b = &mut region.bytes_mut()[at..at + NODE_LEN];

	b[N_OFFSET..N_OFFSET + 4].copy_from_slice(&n.offset.to_le_bytes());
	b[N_LENGTH..N_LENGTH + 4].copy_from_slice(&n.length.to_le_bytes());
	b[N_TTL..N_TTL + 4].copy_from_slice(&n.ttl.to_le_bytes());
	b[N_TIME..N_TIME + 8].copy_from_slice(&n.time_added.to_le_bytes());
}

pub struct Index {
	hasher: RandomState,
	/// Fingerprint hash to the subscripts bearing it. A chain may hold
	/// several entries for one fingerprint, and hash aliases on top;
	/// consumers verify candidates against the region bytes.
	chains: HashMap<u64, Vec<u32>, RandomState>,
	/// Freed nodes whose slot can be handed to a new entry.
	free_slots: Vec<u32>,
	/// Descriptors with no slot attached.
	blanks: Vec<u32>,
}

impl Index {
	pub fn new() -> Self {
		Self {
			hasher: RandomState::new(),
			chains: HashMap::with_hasher(RandomState::new()),
			free_slots: Vec::new(),
			blanks: Vec::new(),
		}
	}

	/// Rebuild the live view from a mapped region. Nodes that do not pass
	/// the shape checks are demoted rather than trusted. Returns the view
	/// and the live entry count.
	pub fn attach(region: &mut Region) -> (Self, u32) {
		let mut index = Self::new();
		let mut live = 0;

		let size = region.len() as u32;
		let start = data_start(region);

		for sub in 0..region.arena_used() {
			let mut n = node(region, sub);
			let bounded = n.length > 0 && n.offset >= start && n.offset.checked_add(n.length).is_some_and(|end| end <= size);

			if n.ttl > 0 {
				let fp = bounded.then(|| entry::fingerprint_of(region.bytes(), n.offset, n.length)).flatten();

				if let Some(fp) = fp {
					let key = index.hasher.hash_one(fp);
					index.chains.entry(key).or_default().push(sub);
					live += 1;
					continue;
				}

				warn!("Dropping corrupt entry record {sub}");
				n.ttl = 0;

				if bounded {
					region.bytes_mut()[n.offset as usize] = entry::FREED;
				} else {
					n.offset = 0;
					n.length = 0;
				}

				set_node(region, sub, n);
			}

			if bounded && n.length > 0 {
				index.free_slots.push(sub);
			} else {
				if n.length > 0 {
					n.offset = 0;
					n.length = 0;
					set_node(region, sub, n);
				}

				index.blanks.push(sub);
			}
		}

		(index, live)
	}

	pub fn key(&self, fingerprint: &[u8]) -> u64 {
		self.hasher.hash_one(fingerprint)
	}

	/// Candidate subscripts for a fingerprint hash, oldest first.
	pub fn candidates(&self, key: u64) -> impl Iterator<Item = u32> + '_ {
		self.chains.get(&key).into_iter().flatten().copied()
	}

	pub fn insert(&mut self, key: u64, sub: u32) {
		self.chains.entry(key).or_default().push(sub);
	}

	pub fn remove(&mut self, key: u64, sub: u32) {
		if let Some(chain) = self.chains.get_mut(&key) {
			chain.retain(|&s| s != sub);

			if chain.is_empty() {
				self.chains.remove(&key);
			}
		}
	}

	/// Detach the best-fitting freed slot of at least `rounded` bytes.
	/// Slots are reused whole; an oversized one keeps its length.
	pub fn take_fit(&mut self, region: &Region, rounded: u32) -> Option<u32> {
		let mut best: Option<(usize, u32)> = None;

		for (i, &sub) in self.free_slots.iter().enumerate() {
			let length = node(region, sub).length;

			if length >= rounded && best.is_none_or(|(_, held)| length < held) {
				best = Some((i, length));
			}
		}

		let (i, _) = best?;
		Some(self.free_slots.swap_remove(i))
	}

	/// A descriptor with no slot: a pooled blank, or a fresh subscript
	/// appended to the arena.
	pub fn take_blank(&mut self, region: &mut Region) -> Option<u32> {
		if let Some(sub) = self.blanks.pop() {
			return Some(sub);
		}

		let used = region.arena_used();

		if used < region.arena_capacity() {
			region.set_arena_used(used + 1);
			return Some(used);
		}

		None
	}

	pub fn push_free_slot(&mut self, sub: u32) {
		self.free_slots.push(sub);
	}

	/// Blank every pooled slot at or past `end`, so a later carve from
	/// `end` cannot overlap a pooled range.
	pub fn release_tail(&mut self, region: &mut Region, end: u32) {
		let mut i = 0;

		while i < self.free_slots.len() {
			let sub = self.free_slots[i];
			let mut n = node(region, sub);

			if n.offset >= end {
				n.offset = 0;
				n.length = 0;
				set_node(region, sub, n);

				self.blanks.push(sub);
				self.free_slots.swap_remove(i);
			} else {
				i += 1;
			}
		}
	}

	#[cfg(test)]
	pub fn free_slot_count(&self) -> usize {
		self.free_slots.len()
	}
}
