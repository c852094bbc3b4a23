//! The background expiry sweeper. One pass scans the arena newest-first
//! under the read lock; only when something actually expired does it take
//! the write lock to evict and reclaim the trailing end. Teardown rings
//! the condvar so close never waits out the full interval.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::Shared;

/// Pause between expiry passes.
pub(crate) const INTERVAL: Duration = Duration::from_secs(59);

/// Teardown handshake for the sweeper thread.
pub(crate) struct Control {
	pub stop: Mutex<bool>,
	pub wake: Condvar,
}

impl Control {
	pub fn new() -> Self {
		Self { stop: Mutex::new(false), wake: Condvar::new() }
	}
}

pub(crate) fn run(shared: Arc<Shared>) {
	loop {
		{
			let mut stop = shared.ctl.stop.lock();

			if *stop {
				break;
			}

			let _ = shared.ctl.wake.wait_for(&mut stop, INTERVAL);

			if *stop {
				break;
			}
		}

		sweep(&shared);
	}

	debug!("Sweeper exiting");
}

/// One expiry pass.
pub(crate) fn sweep(shared: &Shared) {
	let now = runtime::time::unix();
	let expired = shared.store.read().scan_expired(now);

	if expired.is_empty() {
		return;
	}

	let evicted = shared.store.write().evict(&expired, now);

	if evicted > 0 {
		info!("Evicted {evicted} expired entries");
	}
}
