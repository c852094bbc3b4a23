//! DNS message plumbing: header accessors, the name codec, record
//! iteration and synthesis, RDATA field descriptors and the message
//! compressor. Everything operates on plain byte slices; messages never
//! own their storage here.

use bilge::prelude::*;

pub mod compress;
pub mod name;
pub mod rdata;
pub mod record;

/// Size of the fixed message header, and the offset of the first question.
pub const HEADER_LEN: usize = 12;

pub const TY_A: u16 = 1;
pub const TY_NS: u16 = 2;
pub const TY_CNAME: u16 = 5;
pub const TY_SOA: u16 = 6;
pub const TY_PTR: u16 = 12;
pub const TY_MX: u16 = 15;
pub const TY_TXT: u16 = 16;
pub const TY_AAAA: u16 = 28;
pub const TY_SRV: u16 = 33;
pub const TY_OPT: u16 = 41;

pub const CLASS_IN: u16 = 1;

fn get16(msg: &[u8], at: usize) -> u16 {
	u16::from_be_bytes([msg[at], msg[at + 1]])
}

fn put16(msg: &mut [u8], at: usize, v: u16) {
	msg[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

// The counters below index into the fixed header; callers hand in
// messages that are at least HEADER_LEN long.

pub fn id(msg: &[u8]) -> u16 {
	get16(msg, 0)
}

pub fn flags(msg: &[u8]) -> Flags {
	Flags::from(get16(msg, 2))
}

pub fn set_flags(msg: &mut [u8], flags: Flags) {
	put16(msg, 2, flags.into())
}

pub fn qdcount(msg: &[u8]) -> u16 {
	get16(msg, 4)
}

pub fn ancount(msg: &[u8]) -> u16 {
	get16(msg, 6)
}

pub fn set_ancount(msg: &mut [u8], n: u16) {
	put16(msg, 6, n)
}

pub fn arcount(msg: &[u8]) -> u16 {
	get16(msg, 10)
}

pub fn set_arcount(msg: &mut [u8], n: u16) {
	put16(msg, 10, n)
}

/// The offset one past the question section, or `None` for a truncated
/// message.
pub fn question_end(msg: &[u8]) -> Option<usize> {
	let mut pos = HEADER_LEN;

	for _ in 0..qdcount(msg) {
		pos = name::skip(msg, pos)? + 4;

		if pos > msg.len() {
			return None;
		}
	}

	Some(pos)
}

/// The first question of a message, with its name in dotted text form.
pub struct Question {
	pub name: Vec<u8>,
	pub ty: u16,
	pub class: u16,
}

pub fn question(msg: &[u8]) -> Option<Question> {
	let mut name = Vec::new();
	let pos = name::decode(msg, HEADER_LEN, &mut name)?;
	let fixed = msg.get(pos..pos + 4)?;

	Some(Question {
		name,
		ty: u16::from_be_bytes([fixed[0], fixed[1]]),
		class: u16::from_be_bytes([fixed[2], fixed[3]]),
	})
}

#[bitsize(4)]
#[derive(FromBits, PartialEq, Debug)]
pub enum Opcode {
	/// a standard query
	Query = 0,
	/// an inverse query
	IQuery = 1,
	/// a server status request
	Status = 2,
	/// reserved
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits, PartialEq, Debug)]
pub enum Rcode {
	/// No error condition
	Ok = 0,
	/// Format error - The name server was unable to interpret the query.
	FormatErr = 1,
	/// Server failure - The name server was unable to process this query due to a problem with the name server.
	ServerFailure = 2,
	/// Name Error - the domain name referenced in the query does not exist.
	NameErr = 3,
	/// Not Implemented - The name server does not support the requested kind of query.
	NotImplemented = 4,
	/// Refused - The name server refuses to perform the specified operation for policy reasons.
	Refused = 5,
	/// Reserved
	#[fallback]
	Reserved,
}

#[bitsize(16)]
#[derive(FromBits)]
pub struct Flags {
	/// Response code - this 4 bit field is set as part of responses.
	pub rcode: Rcode,
	/// Reserved for future use.  Must be zero in all queries and responses.
	pub z: u3,
	/// Recursion Available - denotes whether recursive query support is available in the name server.
	pub ra: bool,
	/// Recursion Desired - directs the name server to pursue the query recursively.
	pub rd: bool,
	/// TrunCation - specifies that this message was truncated.
	pub tc: bool,
	/// Authoritative Answer - the responding name server is an authority for the domain name in question section.
	pub aa: bool,
	/// A four bit field that specifies kind of query in this message.
	pub opcode: Opcode,
	/// Whether this message is a query (0), or a response (1).
	pub qr: bool,
}
