//! Resolver-side answer cache for a DNS forwarder.
//!
//! Observed answer records are decomposed into a textual form and stored
//! in one fixed-size region, optionally backed by a file so the cache
//! survives restarts. Lookups follow CNAME chains inside the cache and
//! synthesize a complete wire response, with TTLs recomputed, straight
//! into the caller's buffer. A background sweeper evicts entries whose
//! TTL has run out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};
use parking_lot::RwLock;
use utils::error::*;

mod config;
mod entry;
mod error;
mod index;
mod region;
mod store;
mod sweep;

pub use config::Config;
pub use error::Error;

use region::Region;
use store::Store;

pub(crate) struct Shared {
	pub(crate) store: RwLock<Store>,
	inited: AtomicBool,
	pub(crate) ctl: sweep::Control,
}

/// One cache instance. The host typically holds it in an `Arc` shared by
/// its worker threads; lookups run concurrently, ingest and the sweeper
/// serialize behind the write lock.
pub struct Cache {
	shared: Arc<Shared>,
	sweeper: Option<JoinHandle<()>>,
}

impl Cache {
	/// Bring a cache up according to `cfg`: fresh, reloaded from an
	/// existing file, or overwriting one that does not match. `Ok(None)`
	/// means caching is disabled by configuration.
	pub fn open(cfg: &Config) -> Result<Option<Cache>, Error> {
		if !cfg.use_cache {
			return Ok(None);
		}

		let policy = cfg.policy();
		let size = cfg.rounded_size();

		if size < region::MIN_SIZE {
			return Err(Error::SizeTooSmall(size));
		}

		let store = if cfg.memory_cache {
			Store::create(Region::anonymous(size), policy)
		} else {
			info!("Cache file: {}", cfg.cache_file.display());

			let (region, existed) = Region::open_file(&cfg.cache_file, size)?;

			if existed && cfg.reload_cache {
				match region.validate(size) {
					Ok(()) => {
						let store = Store::attach(region, policy);
						info!("Cache reloaded, {} entries", store.len());
						store
					}
					Err(e) if cfg.overwrite_cache => {
						warn!("Existing cache is unusable ({e}), overwriting it");
						Store::create(region, policy)
					}
					Err(e) => return Err(e),
				}
			} else {
				Store::create(region, policy)
			}
		};

		let shared = Arc::new(Shared {
			store: RwLock::new(store),
			inited: AtomicBool::new(true),
			ctl: sweep::Control::new(),
		});

		// With TTLs ignored nothing ever expires, so no sweeper runs.
		let sweeper = (!policy.ignore)
			.then(|| {
				let shared = Arc::clone(&shared);

				thread::Builder::new()
					.name("sweeper".into())
					.spawn(move || sweep::run(shared))
					.ok_or(|e| warn!("Failed to start the sweeper: {e}"))
			})
			.flatten();

		Ok(Some(Cache { shared, sweeper }))
	}

	pub fn is_initialized(&self) -> bool {
		self.shared.inited.load(Ordering::Acquire)
	}

	/// Number of live entries.
	pub fn len(&self) -> u32 {
		self.shared.store.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Store every answer record of `msg`, observed at `now` (UNIX
	/// seconds). `Err` means the region filled up mid-message and the
	/// remaining records were abandoned.
	pub fn add_items(&self, msg: &[u8], now: u64) -> Result {
		if !self.is_initialized() {
			return Ok(());
		}

		if msg.len() < wire::HEADER_LEN {
			warn!("Message too short to carry records");
			return Ok(());
		}

		self.shared.store.write().add_items(msg, now)
	}

	/// Answer the query in `buf[..request_len]` from the cache, writing
	/// the response over it. Returns the response length, or `None` when
	/// the cache holds no usable answer and the host must go upstream.
	pub fn fetch(&self, buf: &mut [u8], request_len: usize) -> Option<usize> {
		if !self.is_initialized() || request_len < wire::HEADER_LEN || request_len > buf.len() {
			return None;
		}

		let msg = &buf[..request_len];
		let qend = wire::question_end(msg)?;
		let q = wire::question(msg)?;

		// An EDNS OPT pseudo-record rides behind the question; clip it
		// off and re-append it after compression.
		let opt = (wire::arcount(msg) > 0).then(|| buf[qend..request_len].to_vec());
		let opt_len = opt.as_ref().map_or(0, Vec::len);

		let now = runtime::time::unix();

		let (head, tail) = buf.split_at_mut(qend);
		let room = tail.len().checked_sub(opt_len)?;

		let (count, written, terminal) = self.shared.store.read().lookup(&mut tail[..room], &q, now);

		// A walk that never reached a terminal record set does not
		// answer the question; the host forwards upstream.
		if count == 0 || terminal == 0 {
			return None;
		}

		wire::set_ancount(head, count);
		wire::set_arcount(head, 0);

		let mut flags = wire::flags(head);
		flags.set_qr(true);
		flags.set_aa(false);
		flags.set_ra(true);
		flags.set_opcode(wire::Opcode::Query);
		flags.set_rcode(wire::Rcode::Ok);
		wire::set_flags(head, flags);

		let mut len = wire::compress::compress(buf, qend + written);

		if let Some(opt) = opt {
			buf[len..len + opt.len()].copy_from_slice(&opt);
			len += opt.len();
			wire::set_arcount(buf, 1);
		}

		Some(len)
	}

	/// Run one expiry pass immediately, off the sweeper's schedule.
	pub fn sweep_now(&self) {
		sweep::sweep(&self.shared);
	}

	/// Tear the cache down. Equivalent to dropping it: stops the
	/// sweeper, fences in-flight callers and persists the region.
	pub fn close(self) {}
}

impl Drop for Cache {
	fn drop(&mut self) {
		self.shared.inited.store(false, Ordering::Release);

		*self.shared.ctl.stop.lock() = true;
		self.shared.ctl.wake.notify_all();

		if let Some(handle) = self.sweeper.take() {
			let _ = handle.join();
		}

		// Fence any caller still inside the lock, then let the mapping
		// write itself out.
		let store = self.shared.store.write();
		let _ = store.region.flush().ok_or(|e| warn!("Failed to flush the cache region: {e}"));
	}
}
