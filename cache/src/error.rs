use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::region;

/// Hard initialization failures. Everything past `Cache::open` is either
/// recoverable or a cache miss and stays out of this enum.
#[derive(Debug, Error)]
pub enum Error {
	#[error("cache size {0} is less than the {min} byte minimum", min = region::MIN_SIZE)]
	SizeTooSmall(u32),

	#[error("failed to open cache file {path}: {source}")]
	Open { path: PathBuf, source: io::Error },

	#[error("failed to map the cache region: {0}")]
	Map(#[source] io::Error),

	#[error("existing cache has version {found}, this build reads version {expected}")]
	Version { found: u32, expected: u32 },

	#[error("existing cache holds {found} bytes but {expected} are configured")]
	Size { found: u32, expected: u32 },

	#[error("existing cache header is corrupt: {0}")]
	Corrupt(&'static str),
}
