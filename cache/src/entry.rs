//! The entry byte format. An entry occupies one slot and reads:
//!
//! ```text
//! 0xFF  name \x01 TYPE \x01 CLASS \0  field \0  ...  field \0  0x0A
//! ```
//!
//! with the record type and class in decimal ASCII and every RDATA field
//! in the textual form of its descriptor element. The bytes from the name
//! through the class NUL are the fingerprint, the lookup key.

use log::debug;
use utils::ascii;
use utils::error::ExtOpaque;
use wire::rdata;
use wire::record::Record;

/// Status byte of a live entry.
pub const START: u8 = 0xFF;
/// Status byte of an evicted entry.
pub const FREED: u8 = 0xFD;
/// Terminator after the last field.
pub const END: u8 = 0x0A;
/// Fill for the slot tail past the entry.
pub const PAD: u8 = 0xFE;

/// Append the lookup key `name\x01TYPE\x01CLASS\0`.
pub fn push_fingerprint(out: &mut Vec<u8>, name: &[u8], ty: u16, class: u16) {
	out.extend_from_slice(name);
	out.push(1);
	ascii::push_uint(out, ty as u64);
	out.push(1);
	ascii::push_uint(out, class as u64);
	out.push(0);
}

/// Render a full entry, status byte through END, from a record sitting in
/// `msg`. Returns the fingerprint length (the key occupies `out[1..]`), or
/// `None` for types without a descriptor or RDATA that does not parse.
pub fn render(msg: &[u8], rec: &Record, out: &mut Vec<u8>) -> Option<usize> {
	let els = rdata::descriptor(rec.ty).some_or(|| debug!("No descriptor for record type {}, not caching", rec.ty))?;

	out.push(START);

	let mut name = Vec::new();
	wire::name::decode(msg, rec.owner, &mut name)?;
	push_fingerprint(out, &name, rec.ty, rec.class);

	let fp_len = out.len() - 1;
	let mut pos = rec.rdata.start;

	for &el in els {
		pos = rdata::decode(el, msg, pos, out)?;

		// An element running past the RDATA means the record lied about
		// its own length.
		if pos > rec.rdata.end {
			return None;
		}

		out.push(0);
	}

	out.push(END);
	Some(fp_len)
}

/// The fingerprint bytes of the entry at `offset`, including the NUL, or
/// `None` when the slot does not hold a live entry shape.
pub fn fingerprint_of(region: &[u8], offset: u32, length: u32) -> Option<&[u8]> {
	let slot = region.get(offset as usize..(offset + length) as usize)?;

	if slot.first() != Some(&START) {
		return None;
	}

	let nul = slot.iter().position(|&b| b == 0)?;
	Some(&slot[1..=nul])
}

/// Iterator over the NUL-terminated field texts that follow a fingerprint,
/// ending at the END marker.
pub fn fields(after_fp: &[u8]) -> Fields<'_> {
	Fields { rest: after_fp }
}

pub struct Fields<'a> {
	rest: &'a [u8],
}

impl<'a> Iterator for Fields<'a> {
	type Item = &'a [u8];

	fn next(&mut self) -> Option<&'a [u8]> {
		if self.rest.first().copied().unwrap_or(END) == END {
			return None;
		}

		let nul = self.rest.iter().position(|&b| b == 0)?;
		let field = &self.rest[..nul];
		self.rest = &self.rest[nul + 1..];

		Some(field)
	}
}
