//! RDATA field descriptors. Each supported record type maps to a list of
//! typed elements; matching on the element drives both directions of the
//! wire/text conversion.

use core::str::FromStr;
use std::net::{Ipv4Addr, Ipv6Addr};

use log::warn;
use utils::ascii;

use crate::name;

/// One typed field of a record's RDATA.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Element {
	/// 32-bit address, dotted-quad text form.
	Ipv4,
	/// 128-bit address, RFC 5952 text form.
	Ipv6,
	/// Domain name, possibly compressed on the wire.
	Name,
	/// Length-prefixed character string.
	CharStr,
	U8,
	U16,
	U32,
	I8,
	I16,
	I32,
}

/// The field list for a record type, or `None` for types this build does
/// not understand.
pub fn descriptor(ty: u16) -> Option<&'static [Element]> {
	use Element::*;

	Some(match ty {
		crate::TY_A => &[Ipv4],
		crate::TY_NS | crate::TY_CNAME | crate::TY_PTR => &[Name],
		crate::TY_SOA => &[Name, Name, U32, U32, U32, U32, U32],
		crate::TY_MX => &[U16, Name],
		crate::TY_TXT => &[CharStr],
		crate::TY_AAAA => &[Ipv6],
		crate::TY_SRV => &[U16, U16, U16, Name],
		_ => return None,
	})
}

/// Decode one field at the absolute offset `pos`, appending its text form
/// to `out`. `msg` is the whole message so name fields can follow
/// compression pointers. Returns the offset one past the field.
pub fn decode(el: Element, msg: &[u8], pos: usize, out: &mut Vec<u8>) -> Option<usize> {
	match el {
		Element::Ipv4 => {
			let raw: [u8; 4] = msg.get(pos..pos + 4)?.try_into().ok()?;
			out.extend_from_slice(Ipv4Addr::from(raw).to_string().as_bytes());
			Some(pos + 4)
		}
		Element::Ipv6 => {
			let raw: [u8; 16] = msg.get(pos..pos + 16)?.try_into().ok()?;
			out.extend_from_slice(Ipv6Addr::from(raw).to_string().as_bytes());
			Some(pos + 16)
		}
		Element::Name => name::decode(msg, pos, out),
		Element::CharStr => {
			let len = *msg.get(pos)? as usize;
			out.extend_from_slice(msg.get(pos + 1..pos + 1 + len)?);
			Some(pos + 1 + len)
		}
		Element::U8 => {
			ascii::push_uint(out, *msg.get(pos)? as u64);
			Some(pos + 1)
		}
		Element::U16 => {
			let raw: [u8; 2] = msg.get(pos..pos + 2)?.try_into().ok()?;
			ascii::push_uint(out, u16::from_be_bytes(raw) as u64);
			Some(pos + 2)
		}
		Element::U32 => {
			let raw: [u8; 4] = msg.get(pos..pos + 4)?.try_into().ok()?;
			ascii::push_uint(out, u32::from_be_bytes(raw) as u64);
			Some(pos + 4)
		}
		Element::I8 => {
			ascii::push_int(out, *msg.get(pos)? as i8 as i64);
			Some(pos + 1)
		}
		Element::I16 => {
			let raw: [u8; 2] = msg.get(pos..pos + 2)?.try_into().ok()?;
			ascii::push_int(out, i16::from_be_bytes(raw) as i64);
			Some(pos + 2)
		}
		Element::I32 => {
			let raw: [u8; 4] = msg.get(pos..pos + 4)?.try_into().ok()?;
			ascii::push_int(out, i32::from_be_bytes(raw) as i64);
			Some(pos + 4)
		}
	}
}

/// Wire size of one field as it sits at `pos`, without decoding it.
pub fn wire_len(el: Element, msg: &[u8], pos: usize) -> Option<usize> {
	Some(match el {
		Element::Ipv4 => 4,
		Element::Ipv6 => 16,
		Element::Name => name::skip(msg, pos)? - pos,
		Element::CharStr => 1 + *msg.get(pos)? as usize,
		Element::U8 | Element::I8 => 1,
		Element::U16 | Element::I16 => 2,
		Element::U32 | Element::I32 => 4,
	})
}

/// Wire size the text form of one field will re-encode to, or `None` for
/// text that does not parse as the element.
pub fn encoded_len(el: Element, text: &[u8]) -> Option<usize> {
	Some(match el {
		Element::Ipv4 => 4,
		Element::Ipv6 => 16,
		Element::Name => name::encoded_len(text),
		Element::CharStr if text.len() > 255 => return None,
		Element::CharStr => 1 + text.len(),
		Element::U8 | Element::I8 => 1,
		Element::U16 | Element::I16 => 2,
		Element::U32 | Element::I32 => 4,
	})
}

/// Encode the text form of one field back into wire bytes.
pub fn encode(el: Element, text: &[u8], out: &mut [u8]) -> Option<usize> {
	let done = match el {
		Element::Ipv4 => put(out, &parse::<Ipv4Addr>(text)?.octets()),
		Element::Ipv6 => put(out, &parse::<Ipv6Addr>(text)?.octets()),
		Element::Name => name::encode(text, out),
		Element::CharStr => {
			if text.len() > 255 || out.len() < 1 + text.len() {
				return None;
			}

			out[0] = text.len() as u8;
			out[1..1 + text.len()].copy_from_slice(text);
			Some(1 + text.len())
		}
		Element::U8 => put(out, &[u8::try_from(ascii::parse_uint(text)?).ok()?]),
		Element::U16 => put(out, &u16::try_from(ascii::parse_uint(text)?).ok()?.to_be_bytes()),
		Element::U32 => put(out, &u32::try_from(ascii::parse_uint(text)?).ok()?.to_be_bytes()),
		Element::I8 => put(out, &i8::try_from(ascii::parse_int(text)?).ok()?.to_be_bytes()),
		Element::I16 => put(out, &i16::try_from(ascii::parse_int(text)?).ok()?.to_be_bytes()),
		Element::I32 => put(out, &i32::try_from(ascii::parse_int(text)?).ok()?.to_be_bytes()),
	};

	if done.is_none() {
		warn!("Field does not encode as {el:?}");
	}

	done
}

fn parse<T: FromStr>(text: &[u8]) -> Option<T> {
	core::str::from_utf8(text).ok()?.parse().ok()
}

fn put(out: &mut [u8], bytes: &[u8]) -> Option<usize> {
	out.get_mut(..bytes.len())?.copy_from_slice(bytes);
	Some(bytes.len())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{TY_A, TY_MX, TY_SOA};

	fn text_of(el: Element, wire: &[u8]) -> Vec<u8> {
		let mut out = Vec::new();
		assert_eq!(decode(el, wire, 0, &mut out), Some(wire.len()));
		out
	}

	#[test]
	fn a_record_text() {
		let text = text_of(descriptor(TY_A).unwrap()[0], &[93, 184, 216, 34]);
		assert_eq!(text, b"93.184.216.34");

		let mut wire = [0u8; 4];
		assert_eq!(encode(Element::Ipv4, &text, &mut wire), Some(4));
		assert_eq!(wire, [93, 184, 216, 34]);
	}

	#[test]
	fn mx_fields() {
		let els = descriptor(TY_MX).unwrap();

		let mut wire = vec![0, 10];
		wire.extend_from_slice(b"\x04mail\x07example\x03com\0");

		let mut out = Vec::new();
		let mid = decode(els[0], &wire, 0, &mut out).unwrap();
		assert_eq!(out, b"10");

		out.clear();
		assert_eq!(decode(els[1], &wire, mid, &mut out), Some(wire.len()));
		assert_eq!(out, b"mail.example.com");
	}

	#[test]
	fn soa_descriptor_shape() {
		let els = descriptor(TY_SOA).unwrap();
		assert_eq!(els.len(), 7);
		assert_eq!(els[2], Element::U32);
	}

	#[test]
	fn int_round_trip() {
		for (el, wire) in [(Element::I16, [0xFF, 0x85].as_slice()), (Element::U16, &[0x01, 0x00])] {
			let text = text_of(el, wire);
			let mut back = [0u8; 2];
			assert_eq!(encode(el, &text, &mut back), Some(2));
			assert_eq!(&back, wire);
		}
	}

	#[test]
	fn char_str() {
		let text = text_of(Element::CharStr, b"\x05hello");
		assert_eq!(text, b"hello");

		let mut wire = [0u8; 8];
		assert_eq!(encode(Element::CharStr, &text, &mut wire), Some(6));
		assert_eq!(&wire[..6], b"\x05hello");
	}

	#[test]
	fn rejects_out_of_range() {
		let mut wire = [0u8; 2];
		assert_eq!(encode(Element::U16, b"65536", &mut wire), None);
		assert_eq!(encode(Element::Ipv4, b"1.2.3", &mut wire), None);
	}
}
