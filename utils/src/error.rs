//! The crate-wide convention for recoverable failures: log where the
//! problem is detected, then hand the caller a bare `()` error to act on.

pub type Result<T = (), E = ()> = result::Result<T, E>;

#[doc(hidden)]
pub trait Ext<T, E> {
	/// Consumes an error with `f`, turning the result into an `Option`.
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> Ext<T, E> for result::Result<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

#[doc(hidden)]
pub trait ExtOpaque<T> {
	/// Runs `f` if the value is absent, passing the `Option` through.
	fn some_or(self, f: impl FnOnce()) -> Option<T>;
}

impl<T> ExtOpaque<T> for Option<T> {
	fn some_or(self, f: impl FnOnce()) -> Option<T> {
		match self {
			Some(_) => {}
			None => f(),
		}

		self
	}
}

use core::result;

pub use Ext as _;
