//! Everything that happens under the cache lock: slot allocation, entry
//! installation, the verified chain walks, CNAME chasing and record
//! re-synthesis, expiry and trailing-end reclaim.

use log::{debug, warn};
use utils::error::*;
use wire::{name, rdata, record, Question};

use crate::config::TtlPolicy;
use crate::entry;
use crate::index::{self, Index, Node};
use crate::region::Region;

/// CNAME hops followed before a chain is declared degenerate.
const MAX_CHAIN: usize = 16;

pub struct Store {
	pub region: Region,
	pub index: Index,
	policy: TtlPolicy,
}

impl Store {
	/// Format `region` and start empty.
	pub fn create(mut region: Region, policy: TtlPolicy) -> Self {
		region.format(index::arena_capacity(region.len() as u32));
		region.set_end_offset(index::data_start(&region));

		Self { region, index: Index::new(), policy }
	}

	/// Bind to an already validated region, rebuilding the live index
	/// from its arena.
	pub fn attach(mut region: Region, policy: TtlPolicy) -> Self {
		let (index, live) = Index::attach(&mut region);

		if live != region.entry_count() {
			warn!("Header count {} disagrees with the arena ({live} live), correcting", region.entry_count());
			region.set_entry_count(live);
		}

		Self { region, index, policy }
	}

	pub fn len(&self) -> u32 {
		self.region.entry_count()
	}

	fn data_start(&self) -> u32 {
		index::data_start(&self.region)
	}

	/// The slot bytes held by `n`.
	fn slot(&self, n: &Node) -> &[u8] {
		&self.region.bytes()[n.offset as usize..(n.offset + n.length) as usize]
	}

	/// Candidate subscripts whose entry begins with `key`. `fp` is the
	/// fingerprint prefix of `key` and picks the chain; the full key is
	/// then verified byte-for-byte against the region, so hash aliases
	/// and same-bucket neighbors fall out here.
	fn matches<'a>(&'a self, fp: &'a [u8], key: &'a [u8], now: u64) -> impl Iterator<Item = u32> + 'a {
		self.index.candidates(self.index.key(fp)).filter(move |&sub| {
			let n = index::node(&self.region, sub);

			if n.ttl == 0 {
				return false;
			}

			if !self.policy.ignore && now.saturating_sub(n.time_added) >= n.ttl as u64 {
				return false;
			}

			self.slot(&n).get(1..1 + key.len()).is_some_and(|held| held == key)
		})
	}

	/// TTL to put on the wire for a live node.
	fn remaining_ttl(&self, n: &Node, now: u64) -> u32 {
		if self.policy.ignore {
			n.ttl
		} else {
			(n.ttl as u64).saturating_sub(now.saturating_sub(n.time_added)) as u32
		}
	}

	/// Store every answer record of `msg`. `Err` means allocation failed
	/// mid-message and the rest was abandoned.
	pub fn add_items(&mut self, msg: &[u8], now: u64) -> Result {
		let Some(records) = record::answers(msg) else {
			warn!("Message has no parseable answer section");
			return Ok(());
		};

		for rec in records {
			self.add_one(msg, &rec, now)?;
		}

		Ok(())
	}

	fn add_one(&mut self, msg: &[u8], rec: &record::Record, now: u64) -> Result {
		let mut scratch = Vec::with_capacity(192);

		// Unknown types and unparseable RDATA are skipped, not errors.
		let Some(fp_len) = entry::render(msg, rec, &mut scratch) else {
			return Ok(());
		};

		let ttl = self.policy.effective(rec.ttl);

		if ttl == 0 {
			return Ok(());
		}

		let fp = &scratch[1..1 + fp_len];
		let body = &scratch[1..];

		// An identical live entry makes this one a silent duplicate.
		if self.matches(fp, body, now).next().is_some() {
			return Ok(());
		}

		let key = self.index.key(fp);
		let sub = self.allocate(scratch.len() as u32)?;
		let n = index::node(&self.region, sub);

		let at = n.offset as usize;
		let bytes = self.region.bytes_mut();
		bytes[at..at + scratch.len()].copy_from_slice(&scratch);
		bytes[at + scratch.len()..at + n.length as usize].fill(entry::PAD);

		index::set_node(&mut self.region, sub, Node { ttl, time_added: now, ..n });
		self.index.insert(key, sub);
		self.region.set_entry_count(self.region.entry_count() + 1);

		debug!("Cached {} for {ttl}s", String::from_utf8_lossy(&scratch[1..fp_len]));
		Ok(())
	}

	/// A node owning a slot of at least `len` bytes: the best-fitting
	/// freed slot, or a fresh carve past `end_offset` if the region still
	/// has room.
	fn allocate(&mut self, len: u32) -> Result<u32> {
		let rounded = index::round_up(len, 8);

		if let Some(sub) = self.index.take_fit(&self.region, rounded) {
			return Ok(sub);
		}

		let end = self.region.end_offset();
		let fits = end.checked_add(rounded).is_some_and(|carved| carved <= self.region.len() as u32);

		if !fits {
			warn!("No room for a {rounded} byte entry, the cache is full");
			return Err(());
		}

		let Some(sub) = self.index.take_blank(&mut self.region) else {
			warn!("Node arena is exhausted, the cache is full");
			return Err(());
		};

		index::set_node(&mut self.region, sub, Node { offset: end, length: rounded, ttl: 0, time_added: 0 });
		self.region.set_end_offset(end + rounded);
		Ok(sub)
	}

	/// Evict the entry held by `sub` and pool its slot.
	fn free(&mut self, sub: u32) {
		let mut n = index::node(&self.region, sub);

		let key = entry::fingerprint_of(self.region.bytes(), n.offset, n.length).map(|fp| self.index.key(fp));

		self.region.bytes_mut()[n.offset as usize] = entry::FREED;
		n.ttl = 0;
		index::set_node(&mut self.region, sub, n);

		if let Some(key) = key {
			self.index.remove(key, sub);
		}

		self.index.push_free_slot(sub);
		self.region.set_entry_count(self.region.entry_count().saturating_sub(1));
	}

	/// Subscripts of entries that have outlived their TTL, newest record
	/// first.
	pub fn scan_expired(&self, now: u64) -> Vec<u32> {
		let mut expired = Vec::new();

		for sub in (0..self.region.arena_used()).rev() {
			let n = index::node(&self.region, sub);

			if n.ttl > 0 && now.saturating_sub(n.time_added) >= n.ttl as u64 {
				expired.push(sub);
			}
		}

		expired
	}

	/// Evict `subs`, re-checking each against `now`, then reclaim the
	/// trailing end. Returns how many entries went away.
	pub fn evict(&mut self, subs: &[u32], now: u64) -> u32 {
		let mut evicted = 0;

		for &sub in subs {
			let n = index::node(&self.region, sub);

			if n.ttl > 0 && now.saturating_sub(n.time_added) >= n.ttl as u64 {
				debug!("Evicting {}", String::from_utf8_lossy(entry::fingerprint_of(self.region.bytes(), n.offset, n.length).unwrap_or_default()));
				self.free(sub);
				evicted += 1;
			}
		}

		if evicted > 0 {
			self.reclaim_end();
		}

		evicted
	}

	/// Pull `end_offset` back to the end of the highest live slot and
	/// release pooled slots stranded past it.
	pub fn reclaim_end(&mut self) {
		let mut end = self.data_start();

		for sub in 0..self.region.arena_used() {
			let n = index::node(&self.region, sub);

			if n.ttl > 0 {
				end = end.max(n.offset + n.length);
			}
		}

		self.region.set_end_offset(end);
		self.index.release_tail(&mut self.region, end);
	}

	/// The CNAME target cached for `name`, if any.
	fn cname_of(&self, name: &[u8], now: u64) -> Option<(Node, &[u8])> {
		let mut fp = Vec::new();
		entry::push_fingerprint(&mut fp, name, wire::TY_CNAME, wire::CLASS_IN);

		let sub = self.matches(&fp, &fp, now).next()?;
		let n = index::node(&self.region, sub);

		let target = entry::fields(&self.slot(&n)[1 + fp.len()..]).next()?;
		Some((n, target))
	}

	/// Walk the CNAME chain for the question, then emit the terminal
	/// records, all into `out`. Returns (answers, bytes, terminal
	/// answers); emission stops early when `out` runs out of space.
	pub fn lookup(&self, out: &mut [u8], q: &Question, now: u64) -> (u16, usize, u16) {
		let mut qname = q.name.clone();
		let mut written = 0;
		let mut count: u16 = 0;

		if q.ty != wire::TY_CNAME {
			for hop in 0.. {
				if hop == MAX_CHAIN {
					warn!("CNAME chain for {} does not terminate", String::from_utf8_lossy(&q.name));
					return (count, written, 0);
				}

				let Some((n, target)) = self.cname_of(&qname, now) else {
					break;
				};

				let head = record::emit_len(&qname);
				let rdlen = name::encoded_len(target);

				if written + head + rdlen > out.len() {
					// Out of space mid-walk: no terminal records can
					// follow, so the caller sees a miss.
					return (count, written, 0);
				}

				let ttl = self.remaining_ttl(&n, now);
				let target = target.to_vec();

				let Some((emitted, patch)) = record::emit(&mut out[written..], &qname, wire::TY_CNAME, wire::CLASS_IN, ttl) else {
					break;
				};

				let Some(rdata_len) = rdata::encode(rdata::Element::Name, &target, &mut out[written + emitted..]) else {
					break;
				};

				record::patch_rdlen(&mut out[written..], patch, rdata_len as u16);
				written += emitted + rdata_len;
				count += 1;
				qname = target;
			}
		}

		let (terminal, emitted) = self.emit_records(&mut out[written..], &qname, q.ty, q.class, now);
		(count + terminal, written + emitted, terminal)
	}

	/// Re-synthesize every cached record of (name, ty, class) into `out`.
	fn emit_records(&self, out: &mut [u8], qname: &[u8], ty: u16, class: u16, now: u64) -> (u16, usize) {
		let Some(els) = rdata::descriptor(ty) else {
			return (0, 0);
		};

		let mut fp = Vec::new();
		entry::push_fingerprint(&mut fp, qname, ty, class);

		let mut written = 0;
		let mut count: u16 = 0;

		for sub in self.matches(&fp, &fp, now) {
			let n = index::node(&self.region, sub);
			let stored: Vec<&[u8]> = entry::fields(&self.slot(&n)[1 + fp.len()..]).collect();

			if stored.len() != els.len() {
				warn!("Entry at {} does not match its descriptor, skipping it", n.offset);
				continue;
			}

			let Some(rdlen) = els.iter().zip(&stored).try_fold(0usize, |sum, (&el, field)| Some(sum + rdata::encoded_len(el, field)?)) else {
				warn!("Entry at {} does not re-encode, skipping it", n.offset);
				continue;
			};

			if written + record::emit_len(qname) + rdlen > out.len() {
				break;
			}

			let ttl = self.remaining_ttl(&n, now);

			let Some((emitted, patch)) = record::emit(&mut out[written..], qname, ty, class, ttl) else {
				break;
			};

			let mut at = written + emitted;
			let mut done = true;

			for (&el, field) in els.iter().zip(&stored) {
				match rdata::encode(el, field, &mut out[at..]) {
					Some(n) => at += n,
					None => {
						done = false;
						break;
					}
				}
			}

			if !done {
				// Leave the partial record out of the counts; the next
				// candidate overwrites it.
				continue;
			}

			record::patch_rdlen(&mut out[written..], patch, rdlen as u16);
			written = at;
			count += 1;
		}

		(count, written)
	}

	#[cfg(test)]
	pub fn node_of(&self, sub: u32) -> Node {
		index::node(&self.region, sub)
	}

	#[cfg(test)]
	pub fn check_invariants(&self) {
		let size = self.region.len() as u32;
		let start = self.data_start();
		let end = self.region.end_offset();

		assert!(start <= end && end <= size);

		let mut live: Vec<(u32, u32)> = Vec::new();
		let mut live_count = 0;

		for sub in 0..self.region.arena_used() {
			let n = index::node(&self.region, sub);

			if n.ttl > 0 {
				assert!(n.offset >= start && n.offset + n.length <= end);
				assert_eq!(self.region.bytes()[n.offset as usize], entry::START);
				live.push((n.offset, n.offset + n.length));
				live_count += 1;
			} else if n.length > 0 {
				assert_eq!(self.region.bytes()[n.offset as usize], entry::FREED);
			}
		}

		live.sort_unstable();

		for pair in live.windows(2) {
			assert!(pair[0].1 <= pair[1].0, "live slots overlap: {pair:?}");
		}

		assert_eq!(live_count, self.region.entry_count());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::region::MIN_SIZE;
	use pretty_assertions::assert_eq;

	fn policy() -> TtlPolicy {
		TtlPolicy { ignore: false, fixed: None, multiple: 1 }
	}

	fn store() -> Store {
		Store::create(Region::anonymous(MIN_SIZE), policy())
	}

	fn push_name(msg: &mut Vec<u8>, name: &str) {
		for label in name.split('.') {
			msg.push(label.len() as u8);
			msg.extend_from_slice(label.as_bytes());
		}

		msg.push(0);
	}

	fn labels(name: &str) -> Vec<u8> {
		let mut out = Vec::new();
		push_name(&mut out, name);
		out
	}

	fn query(name: &str, ty: u16) -> Vec<u8> {
		let mut msg = vec![0u8; wire::HEADER_LEN];
		msg[1] = 0x42;
		msg[2] = 0x01;
		msg[5] = 1;

		push_name(&mut msg, name);
		msg.extend_from_slice(&ty.to_be_bytes());
		msg.extend_from_slice(&wire::CLASS_IN.to_be_bytes());
		msg
	}

	fn answer(msg: &mut Vec<u8>, name: &str, ty: u16, ttl: u32, rdata: &[u8]) {
		let new_ancount = wire::ancount(msg) + 1;
		wire::set_ancount(msg, new_ancount);

		push_name(msg, name);
		msg.extend_from_slice(&ty.to_be_bytes());
		msg.extend_from_slice(&wire::CLASS_IN.to_be_bytes());
		msg.extend_from_slice(&ttl.to_be_bytes());
		msg.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
		msg.extend_from_slice(rdata);
	}

	fn question(name: &str, ty: u16) -> Question {
		Question { name: name.as_bytes().to_vec(), ty, class: wire::CLASS_IN }
	}

	/// Wrap emitted records in a question-less header so the wire
	/// iterator can pick them apart.
	fn parse(records: &[u8], count: u16) -> Vec<(Vec<u8>, u16, u32, Vec<u8>)> {
		let mut msg = vec![0u8; wire::HEADER_LEN];
		wire::set_ancount(&mut msg, count);
		msg.extend_from_slice(records);

		record::answers(&msg)
			.unwrap()
			.map(|r| {
				let mut owner = Vec::new();
				name::decode(&msg, r.owner, &mut owner).unwrap();
				(owner, r.ty, r.ttl, msg[r.rdata.clone()].to_vec())
			})
			.collect()
	}

	#[test]
	fn add_and_emit() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 34]);

		store.add_items(&msg, 1000).unwrap();
		assert_eq!(store.len(), 1);
		store.check_invariants();

		let mut out = [0u8; 512];
		let (count, written, terminal) = store.lookup(&mut out, &question("example.com", wire::TY_A), 1010);

		assert_eq!((count, terminal), (1, 1));

		let records = parse(&out[..written], count);
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].0, b"example.com");
		assert_eq!(records[0].1, wire::TY_A);
		assert_eq!(records[0].2, 290);
		assert_eq!(records[0].3, [93, 184, 216, 34]);
	}

	#[test]
	fn duplicates_collapse() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 34]);
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 34]);
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 35]);

		store.add_items(&msg, 1000).unwrap();
		store.add_items(&msg, 1000).unwrap();

		// One live entry per unique rdata.
		assert_eq!(store.len(), 2);
		store.check_invariants();

		let mut out = [0u8; 512];
		let (count, _, terminal) = store.lookup(&mut out, &question("example.com", wire::TY_A), 1000);
		assert_eq!((count, terminal), (2, 2));
	}

	#[test]
	fn cname_chain() {
		let mut store = store();

		let mut msg = query("www.example.com", wire::TY_A);
		answer(&mut msg, "www.example.com", wire::TY_CNAME, 3600, &labels("example.com"));
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 34]);

		store.add_items(&msg, 0).unwrap();
		assert_eq!(store.len(), 2);

		let mut out = [0u8; 512];
		let (count, written, terminal) = store.lookup(&mut out, &question("www.example.com", wire::TY_A), 10);

		assert_eq!((count, terminal), (2, 1));

		let records = parse(&out[..written], count);
		assert_eq!(records[0].0, b"www.example.com");
		assert_eq!(records[0].1, wire::TY_CNAME);
		assert_eq!(records[0].2, 3590);
		assert_eq!(records[0].3, labels("example.com"));

		assert_eq!(records[1].0, b"example.com");
		assert_eq!(records[1].1, wire::TY_A);
		assert_eq!(records[1].2, 290);
	}

	#[test]
	fn cname_loop_is_bounded() {
		let mut store = store();

		let mut msg = query("a.test", wire::TY_A);
		answer(&mut msg, "a.test", wire::TY_CNAME, 3600, &labels("b.test"));
		answer(&mut msg, "b.test", wire::TY_CNAME, 3600, &labels("a.test"));

		store.add_items(&msg, 0).unwrap();

		let mut out = [0u8; 4096];
		let (_, _, terminal) = store.lookup(&mut out, &question("a.test", wire::TY_A), 0);
		assert_eq!(terminal, 0);
	}

	#[test]
	fn expired_entries_are_invisible() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);
		answer(&mut msg, "example.com", wire::TY_A, 50, &[93, 184, 216, 34]);
		store.add_items(&msg, 1000).unwrap();

		let mut out = [0u8; 512];
		let (count, _, _) = store.lookup(&mut out, &question("example.com", wire::TY_A), 1050);
		assert_eq!(count, 0);
	}

	#[test]
	fn eviction_reclaims_and_reuses() {
		let mut store = store();
		let start = store.data_start();

		let mut msg = query("a.test", wire::TY_A);
		answer(&mut msg, "a.test", wire::TY_A, 50, &[1, 2, 3, 4]);
		answer(&mut msg, "b.test", wire::TY_A, 5000, &[5, 6, 7, 8]);
		store.add_items(&msg, 1000).unwrap();

		let first = store.node_of(0);
		assert_eq!(first.offset, start);

		// Only the first entry has expired by 1100.
		let expired = store.scan_expired(1100);
		assert_eq!(expired, [0]);
		assert_eq!(store.evict(&expired, 1100), 1);

		assert_eq!(store.len(), 1);
		assert_eq!(store.region.bytes()[first.offset as usize], entry::FREED);
		store.check_invariants();

		// Its slot is non-terminal, so it stays pooled and is reused.
		let mut msg = query("c.test", wire::TY_A);
		answer(&mut msg, "c.test", wire::TY_A, 5000, &[9, 9, 9, 9]);
		store.add_items(&msg, 1100).unwrap();

		assert_eq!(store.node_of(0).offset, first.offset);
		store.check_invariants();
	}

	#[test]
	fn trailing_reclaim_resets_empty_store() {
		let mut store = store();
		let start = store.data_start();

		let mut msg = query("a.test", wire::TY_A);
		answer(&mut msg, "a.test", wire::TY_A, 50, &[1, 2, 3, 4]);
		answer(&mut msg, "b.test", wire::TY_A, 60, &[5, 6, 7, 8]);
		store.add_items(&msg, 1000).unwrap();
		assert!(store.region.end_offset() > start);

		let expired = store.scan_expired(2000);
		assert_eq!(store.evict(&expired, 2000), 2);

		assert_eq!(store.len(), 0);
		assert_eq!(store.region.end_offset(), start);
		// Both slots sat past the new end and were blanked.
		assert_eq!(store.index.free_slot_count(), 0);
		store.check_invariants();
	}

	#[test]
	fn fills_up_and_refuses() {
		let mut store = store();
		let mut failed = false;

		for i in 0..4096 {
			let name = format!("host-{i:04}.example.com");
			let mut msg = query(&name, wire::TY_A);
			answer(&mut msg, &name, wire::TY_A, 3600, &[10, 0, (i >> 8) as u8, i as u8]);

			if store.add_items(&msg, 1000).is_err() {
				failed = true;
				break;
			}
		}

		assert!(failed);
		store.check_invariants();

		let before = store.len();
		let mut msg = query("straggler.example.com", wire::TY_A);
		answer(&mut msg, "straggler.example.com", wire::TY_A, 3600, &[10, 0, 0, 1]);

		assert!(store.add_items(&msg, 1000).is_err());
		assert_eq!(store.len(), before);
	}

	#[test]
	fn zero_ttl_is_not_cached() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);
		answer(&mut msg, "example.com", wire::TY_A, 0, &[93, 184, 216, 34]);

		store.add_items(&msg, 1000).unwrap();
		assert_eq!(store.len(), 0);
	}

	#[test]
	fn reattach_preserves_live_set() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);
		answer(&mut msg, "example.com", wire::TY_A, 300, &[93, 184, 216, 34]);
		answer(&mut msg, "example.com", wire::TY_AAAA, 300, b"\x20\x01\x0d\xb8\0\0\0\0\0\0\0\0\0\0\0\x01");
		store.add_items(&msg, 1000).unwrap();

		let reborn = Store::attach(store.region, policy());

		assert_eq!(reborn.len(), 2);
		reborn.check_invariants();

		let mut out = [0u8; 512];
		let (count, written, _) = reborn.lookup(&mut out, &question("example.com", wire::TY_AAAA), 1010);

		assert_eq!(count, 1);
		let records = parse(&out[..written], count);
		assert_eq!(records[0].3, b"\x20\x01\x0d\xb8\0\0\0\0\0\0\0\0\0\0\0\x01");
	}

	#[test]
	fn randomized_churn_upholds_invariants() {
		use rand::{Rng, SeedableRng};

		let mut rng = rand::rngs::StdRng::seed_from_u64(7);
		let mut store = store();

		for round in 0..40u64 {
			for _ in 0..rng.gen_range(1..20) {
				let name = format!("h{}.test", rng.gen_range(0..64u32));
				let mut msg = query(&name, wire::TY_A);
				answer(&mut msg, &name, wire::TY_A, rng.gen_range(1..120), &rng.gen::<[u8; 4]>());

				// Refusals are part of the churn once the region fills.
				let _ = store.add_items(&msg, round * 10);
			}

			let now = round * 10 + rng.gen_range(0..200);
			let expired = store.scan_expired(now);
			store.evict(&expired, now);
			store.check_invariants();
		}
	}

	#[test]
	fn buffer_exhaustion_keeps_what_fit() {
		let mut store = store();

		let mut msg = query("example.com", wire::TY_A);

		for i in 0..8 {
			answer(&mut msg, "example.com", wire::TY_A, 300, &[10, 0, 0, i]);
		}

		store.add_items(&msg, 1000).unwrap();

		// Room for two records of 27 bytes, not eight.
		let mut out = [0u8; 60];
		let (count, written, terminal) = store.lookup(&mut out, &question("example.com", wire::TY_A), 1000);

		assert_eq!((count, terminal), (2, 2));
		assert!(written <= out.len());
	}
}
