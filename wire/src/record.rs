//! Resource-record iteration and synthesis.

use core::ops::Range;

use log::warn;
use utils::error::ExtOpaque;

use crate::name;

/// A resource record located inside a message.
pub struct Record {
	/// Offset of the owner name.
	pub owner: usize,
	pub ty: u16,
	pub class: u16,
	pub ttl: u32,
	/// Byte range of the RDATA within the message.
	pub rdata: Range<usize>,
}

/// Iterator over the answer section. Stops early, with a warning, on a
/// malformed record.
pub struct Answers<'a> {
	msg: &'a [u8],
	pos: usize,
	left: u16,
}

pub fn answers(msg: &[u8]) -> Option<Answers<'_>> {
	Some(Answers {
		msg,
		pos: crate::question_end(msg)?,
		left: crate::ancount(msg),
	})
}

impl Iterator for Answers<'_> {
	type Item = Record;

	fn next(&mut self) -> Option<Record> {
		self.left = self.left.checked_sub(1)?;

		let owner = self.pos;
		let at = name::skip(self.msg, owner).some_or(|| warn!("Malformed owner name in answer record"))?;
		let fixed = self.msg.get(at..at + 10).some_or(|| warn!("Truncated answer record"))?;

		let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
		let rdata = at + 10..at + 10 + rdlen;

		if rdata.end > self.msg.len() {
			warn!("Answer record RDATA is truncated");
			return None;
		}

		self.pos = rdata.end;

		Some(Record {
			owner,
			ty: u16::from_be_bytes([fixed[0], fixed[1]]),
			class: u16::from_be_bytes([fixed[2], fixed[3]]),
			ttl: u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
			rdata,
		})
	}
}

/// Wire size of a record's fixed part (owner name through RDLENGTH).
pub fn emit_len(owner: &[u8]) -> usize {
	name::encoded_len(owner) + 10
}

/// Write a record's fixed part with a zeroed RDLENGTH. Returns the bytes
/// written and the offset of the RDLENGTH field for later patching.
pub fn emit(out: &mut [u8], owner: &[u8], ty: u16, class: u16, ttl: u32) -> Option<(usize, usize)> {
	let at = name::encode(owner, out)?;
	let fixed = out.get_mut(at..at + 10)?;

	fixed[0..2].copy_from_slice(&ty.to_be_bytes());
	fixed[2..4].copy_from_slice(&class.to_be_bytes());
	fixed[4..8].copy_from_slice(&ttl.to_be_bytes());
	fixed[8..10].fill(0);

	Some((at + 10, at + 8))
}

pub fn patch_rdlen(out: &mut [u8], at: usize, len: u16) {
	out[at..at + 2].copy_from_slice(&len.to_be_bytes());
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{CLASS_IN, HEADER_LEN, TY_A};

	#[test]
	fn iterates_answers() {
		// Header with one question and two answers.
		let mut msg = vec![0u8; HEADER_LEN];
		msg[5] = 1;
		msg[7] = 2;

		// Question: example.com A IN.
		msg.extend_from_slice(b"\x07example\x03com\0");
		msg.extend_from_slice(&[0, 1, 0, 1]);

		for last in [1u8, 2] {
			let mut buf = [0u8; 64];
			let (n, rdlen_at) = emit(&mut buf, b"example.com", TY_A, CLASS_IN, 300).unwrap();
			buf[n..n + 4].copy_from_slice(&[93, 184, 216, last]);
			patch_rdlen(&mut buf, rdlen_at, 4);
			msg.extend_from_slice(&buf[..n + 4]);
		}

		let records: Vec<_> = answers(&msg).unwrap().collect();
		assert_eq!(records.len(), 2);

		for (i, r) in records.iter().enumerate() {
			assert_eq!(r.ty, TY_A);
			assert_eq!(r.class, CLASS_IN);
			assert_eq!(r.ttl, 300);
			assert_eq!(&msg[r.rdata.clone()], &[93, 184, 216, i as u8 + 1]);
		}
	}

	#[test]
	fn stops_on_truncation() {
		let mut msg = vec![0u8; HEADER_LEN];
		msg[7] = 1;

		// No question; answer owner name runs past the end.
		msg.extend_from_slice(&[5, b'a']);

		assert_eq!(answers(&msg).unwrap().count(), 0);
	}
}
