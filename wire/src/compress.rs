//! Message compression, run once over a fully synthesized response:
//! every domain name that repeats an earlier one becomes a 2-byte pointer
//! to the first occurrence. Owner names and the name fields of known
//! RDATA layouts are covered; everything else passes through untouched.

use log::warn;

use crate::{name, rdata};

/// Compress `msg[..len]` in place, returning the new length. A message
/// that does not parse is left as it is.
pub fn compress(msg: &mut [u8], len: usize) -> usize {
	match rebuild(&msg[..len]) {
		Some(out) => {
			msg[..out.len()].copy_from_slice(&out);
			out.len()
		}
		None => {
			warn!("Message did not parse cleanly, leaving it uncompressed");
			len
		}
	}
}

/// Names already written to the output, with their offsets.
type Seen = Vec<(Vec<u8>, u16)>;

fn rebuild(msg: &[u8]) -> Option<Vec<u8>> {
	let mut out = Vec::with_capacity(msg.len());
	let mut seen = Seen::new();

	out.extend_from_slice(msg.get(..crate::HEADER_LEN)?);

	let mut pos = crate::HEADER_LEN;

	for _ in 0..crate::qdcount(msg) {
		pos = transfer_name(msg, pos, &mut out, &mut seen)?;
		out.extend_from_slice(msg.get(pos..pos + 4)?);
		pos += 4;
	}

	for _ in 0..crate::ancount(msg) {
		pos = transfer_record(msg, pos, &mut out, &mut seen)?;
	}

	// Authority and additional sections pass through verbatim.
	out.extend_from_slice(&msg[pos..]);

	// Expanding a message would mean the input was already compressed
	// more tightly than the exact-match dictionary can reproduce.
	(out.len() <= msg.len()).then_some(out)
}

/// Decode the name at `pos` and re-emit it compressed.
fn transfer_name(msg: &[u8], pos: usize, out: &mut Vec<u8>, seen: &mut Seen) -> Option<usize> {
	let mut text = Vec::new();
	let next = name::decode(msg, pos, &mut text)?;

	emit_name(&text, out, seen);
	Some(next)
}

fn emit_name(text: &[u8], out: &mut Vec<u8>, seen: &mut Seen) {
	if !text.is_empty() {
		if let Some((_, at)) = seen.iter().find(|(n, _)| n == text) {
			out.push(0xC0 | (at >> 8) as u8);
			out.push(*at as u8);
			return;
		}

		// Pointers only reach the first 16 KiB of the message.
		if out.len() <= 0x3FFF {
			seen.push((text.to_vec(), out.len() as u16));
		}

		for label in text.split(|&b| b == b'.') {
			out.push(label.len() as u8);
			out.extend_from_slice(label);
		}
	}

	out.push(0);
}

fn transfer_record(msg: &[u8], pos: usize, out: &mut Vec<u8>, seen: &mut Seen) -> Option<usize> {
	let pos = transfer_name(msg, pos, out, seen)?;
	let fixed = msg.get(pos..pos + 10)?;

	let ty = u16::from_be_bytes([fixed[0], fixed[1]]);
	let rdlen = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;

	let rdata_at = pos + 10;
	let rdata_end = rdata_at.checked_add(rdlen)?;

	if rdata_end > msg.len() {
		return None;
	}

	out.extend_from_slice(&fixed[..8]);

	match rdata::descriptor(ty).filter(|els| els.contains(&rdata::Element::Name)) {
		// Name fields may shrink, so RDLENGTH is recomputed.
		Some(els) => {
			let patch = out.len();
			out.extend_from_slice(&[0, 0]);

			let start = out.len();
			let mut at = rdata_at;

			for &el in els {
				match el {
					rdata::Element::Name => at = transfer_name(msg, at, out, seen)?,
					_ => {
						let n = rdata::wire_len(el, msg, at)?;
						out.extend_from_slice(msg.get(at..at + n)?);
						at += n;
					}
				}
			}

			if at != rdata_end {
				return None;
			}

			let n = u16::try_from(out.len() - start).ok()?;
			out[patch..patch + 2].copy_from_slice(&n.to_be_bytes());
		}
		None => out.extend_from_slice(&msg[pos + 8..rdata_end]),
	}

	Some(rdata_end)
}
