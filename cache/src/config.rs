use std::path::PathBuf;

use log::warn;
use serde::Deserialize;

/// Cache configuration. The field names deserialize from the PascalCase
/// keys hosts put in their config files (`UseCache`, `CacheFile`, ...), so
/// the struct can be embedded in a larger host configuration as-is.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Config {
	pub use_cache: bool,
	pub cache_file: PathBuf,
	/// Region size in bytes; rounded up to a multiple of 8 on open.
	pub cache_size: u32,
	/// Back the region with an anonymous allocation instead of a file.
	pub memory_cache: bool,
	/// Attach to an existing cache file instead of starting fresh.
	pub reload_cache: bool,
	/// Recreate an existing cache file whose header does not match.
	pub overwrite_cache: bool,
	/// Serve entries forever and skip the expiry sweeper.
	#[serde(rename = "IgnoreTTL")]
	pub ignore_ttl: bool,
	/// Cache every record for exactly this many seconds; -1 disables.
	#[serde(rename = "OverrideTTL")]
	pub override_ttl: i32,
	/// Scale every record's own TTL; values below 1 fall back to 1.
	#[serde(rename = "MultipleTTL")]
	pub multiple_ttl: u32,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			use_cache: true,
			cache_file: "dns.cache".into(),
			cache_size: 1_048_576,
			memory_cache: false,
			reload_cache: true,
			overwrite_cache: false,
			ignore_ttl: false,
			override_ttl: -1,
			multiple_ttl: 1,
		}
	}
}

impl Config {
	pub(crate) fn rounded_size(&self) -> u32 {
		crate::index::round_up(self.cache_size, 8)
	}

	pub(crate) fn policy(&self) -> TtlPolicy {
		let fixed = (self.override_ttl >= 0).then_some(self.override_ttl as u32);

		let multiple = match self.multiple_ttl {
			_ if fixed.is_some() => 1,
			0 => {
				warn!("Invalid MultipleTTL, using 1");
				1
			}
			n => n,
		};

		TtlPolicy { ignore: self.ignore_ttl, fixed, multiple }
	}
}

/// The effective-TTL rule distilled from the config, fixed at open time.
#[derive(Clone, Copy)]
pub(crate) struct TtlPolicy {
	pub ignore: bool,
	pub fixed: Option<u32>,
	pub multiple: u32,
}

impl TtlPolicy {
	/// The TTL an arriving record is cached under. Zero means "do not
	/// cache".
	pub fn effective(&self, wire_ttl: u32) -> u32 {
		match self.fixed {
			Some(v) => v,
			None => wire_ttl.saturating_mul(self.multiple),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn override_wins() {
		let cfg = Config { override_ttl: 60, multiple_ttl: 4, ..Config::default() };
		let policy = cfg.policy();
		assert_eq!(policy.effective(300), 60);
		assert_eq!(policy.effective(0), 60);
	}

	#[test]
	fn multiple_scales() {
		let cfg = Config { multiple_ttl: 2, ..Config::default() };
		assert_eq!(cfg.policy().effective(120), 240);
	}

	#[test]
	fn zero_multiple_is_coerced() {
		let cfg = Config { multiple_ttl: 0, ..Config::default() };
		assert_eq!(cfg.policy().effective(120), 120);
	}

	#[test]
	fn sizes_are_rounded() {
		let cfg = Config { cache_size: 102_401, ..Config::default() };
		assert_eq!(cfg.rounded_size(), 102_408);
	}
}
