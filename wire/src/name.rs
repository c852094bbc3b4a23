//! Domain name codec. Names cross this boundary in dotted text form
//! (`www.example.com`, empty text for the root) and live on the wire as
//! length-prefixed labels, optionally ending in a compression pointer.

use log::warn;

/// Compression pointer hops tolerated before a name is declared malformed.
const MAX_HOPS: usize = 16;
/// Longest accepted dotted text form.
const MAX_TEXT: usize = 255;

/// Decode the name at `pos`, following compression pointers, appending its
/// dotted text to `out`. Returns the offset one past the name as stored.
pub fn decode(msg: &[u8], pos: usize, out: &mut Vec<u8>) -> Option<usize> {
	let start = out.len();
	let end = walk(msg, pos, out);

	if end.is_none() {
		out.truncate(start);
	}

	end
}

fn walk(msg: &[u8], mut pos: usize, out: &mut Vec<u8>) -> Option<usize> {
	let start = out.len();
	// The offset one past the name in its original position, pinned by the
	// first pointer hop.
	let mut end = None;
	let mut hops = 0;

	loop {
		let len = *msg.get(pos)?;

		match len >> 6 {
			0b00 if len == 0 => break,
			0b00 => {
				let label = msg.get(pos + 1..pos + 1 + len as usize)?;

				if out.len() > start {
					out.push(b'.');
				}

				out.extend_from_slice(label);

				if out.len() - start > MAX_TEXT {
					warn!("Name is longer than {MAX_TEXT} octets");
					return None;
				}

				pos += 1 + len as usize;
			}
			0b11 => {
				let lo = *msg.get(pos + 1)?;

				end.get_or_insert(pos + 2);

				hops += 1;

				if hops > MAX_HOPS {
					warn!("Compression pointer chain exceeds {MAX_HOPS} hops");
					return None;
				}

				pos = ((len & 0x3F) as usize) << 8 | lo as usize;
			}
			ty => {
				warn!("Unsupported label type {ty:#04b}");
				return None;
			}
		}
	}

	Some(end.unwrap_or(pos + 1))
}

/// Step over the name at `pos` without decoding it.
pub fn skip(msg: &[u8], mut pos: usize) -> Option<usize> {
	loop {
		let len = *msg.get(pos)?;

		match len >> 6 {
			0b00 if len == 0 => return Some(pos + 1),
			0b00 => pos += 1 + len as usize,
			0b11 => return (pos + 2 <= msg.len()).then_some(pos + 2),
			_ => return None,
		}
	}
}

/// Wire size of `text` in uncompressed label form.
pub fn encoded_len(text: &[u8]) -> usize {
	if text.is_empty() {
		1
	} else {
		text.len() + 2
	}
}

/// Write the uncompressed label form of `text` into `out`. Fails when the
/// buffer is too small or the text is not a well-formed name.
pub fn encode(text: &[u8], out: &mut [u8]) -> Option<usize> {
	if text.len() > MAX_TEXT - 2 || out.len() < encoded_len(text) {
		return None;
	}

	let mut at = 0;

	if !text.is_empty() {
		for label in text.split(|&b| b == b'.') {
			if label.is_empty() || label.len() > 63 {
				warn!("Name has an invalid label");
				return None;
			}

			out[at] = label.len() as u8;
			out[at + 1..at + 1 + label.len()].copy_from_slice(label);
			at += 1 + label.len();
		}
	}

	out[at] = 0;
	Some(at + 1)
}
