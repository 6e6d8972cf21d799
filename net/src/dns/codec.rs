use core::mem::size_of;
use core::net::{Ipv4Addr, Ipv6Addr};

use bilge::prelude::*;
use utils::bytes::{self, Cast};
use utils::endian::{u16be, u32be, BigEndian};
use utils::error::Kind;

pub const TY_A: u16 = 1;
pub const TY_NS: u16 = 2;
pub const TY_CNAME: u16 = 5;
pub const TY_PTR: u16 = 12;
pub const TY_AAAA: u16 = 28;
pub const CLASS_IN: u16 = 1;

/// Maximum number of compression-pointer hops a name may follow before it's
/// treated as malformed, guarding against pointer loops in untrusted input.
const MAX_POINTER_HOPS: usize = 16;

#[bitsize(4)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
	Query = 0,
	IQuery = 1,
	Status = 2,
	#[fallback]
	Reserved,
}

#[bitsize(4)]
#[derive(FromBits, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rcode {
	Ok = 0,
	FormatErr = 1,
	ServerFailure = 2,
	NameErr = 3,
	NotImplemented = 4,
	Refused = 5,
	#[fallback]
	Reserved,
}

/// Wire layout of the header's flag word, bit 15 (`qr`) down to bit 0
/// (the low bit of `rcode`). `z` is the one reserved bit left over after
/// splitting the original 3-bit reserved field into `ad`/`cd`.
#[bitsize(16)]
#[derive(FromBits, Clone, Copy)]
pub struct RawFlags {
	pub rcode: Rcode,
	pub z: bool,
	pub ad: bool,
	pub cd: bool,
	pub ra: bool,
	pub rd: bool,
	pub tc: bool,
	pub aa: bool,
	pub opcode: Opcode,
	pub qr: bool,
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
struct Header {
	id: u16be,
	flags: BigEndian<RawFlags>,
	qdcount: u16be,
	ancount: u16be,
	nscount: u16be,
	arcount: u16be,
}

const HEADER_SIZE: usize = size_of::<Header>();

#[derive(Cast, Clone, Copy)]
#[repr(C)]
struct RRHeader {
	ty: u16be,
	class: u16be,
	ttl: u32be,
	rdlength: u16be,
}

/// A message's flags, in plain (non-bitfield) form for callers that don't
/// need to reason about wire packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
	pub qr: bool,
	pub opcode: u8,
	pub aa: bool,
	pub tc: bool,
	pub rd: bool,
	pub ra: bool,
	pub ad: bool,
	pub cd: bool,
	pub rcode: u8,
}

impl Flags {
	pub fn query(opcode: u8, rd: bool) -> Self {
		Self { qr: false, opcode, aa: false, tc: false, rd, ra: false, ad: false, cd: false, rcode: 0 }
	}
}

impl From<RawFlags> for Flags {
	fn from(raw: RawFlags) -> Self {
		Self {
			qr: raw.qr(),
			opcode: raw.opcode() as u8,
			aa: raw.aa(),
			tc: raw.tc(),
			rd: raw.rd(),
			ra: raw.ra(),
			ad: raw.ad(),
			cd: raw.cd(),
			rcode: raw.rcode() as u8,
		}
	}
}

impl From<Flags> for RawFlags {
	fn from(f: Flags) -> Self {
		RawFlags::new(
			Rcode::from(u4::new(f.rcode & 0xf)),
			false,
			f.ad,
			f.cd,
			f.ra,
			f.rd,
			f.tc,
			f.aa,
			Opcode::from(u4::new(f.opcode & 0xf)),
			f.qr,
		)
	}
}

/// A parsed question section entry.
#[derive(Debug, Clone)]
pub struct Question {
	pub name: String,
	pub qtype: u16,
	pub qclass: u16,
}

/// A parsed resource record. `rdata` is interpreted eagerly for the record
/// types the resolver understands; anything else passes through opaque.
#[derive(Debug, Clone)]
pub struct Record {
	pub name: String,
	pub ty: u16,
	pub class: u16,
	pub ttl: u32,
	pub rdata: RData,
}

#[derive(Debug, Clone)]
pub enum RData {
	A(Ipv4Addr),
	Aaaa(Ipv6Addr),
	Cname(String),
	Ptr(String),
	Other(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Message {
	pub id: u16,
	pub flags: Flags,
	pub questions: Vec<Question>,
	pub answers: Vec<Record>,
	pub authorities: Vec<Record>,
	pub additional: Vec<Record>,
}

impl Message {
	pub fn query(id: u16, name: &str, qtype: u16) -> Self {
		Self {
			id,
			flags: Flags::query(Opcode::Query as u8, true),
			questions: vec![Question { name: name.into(), qtype, qclass: CLASS_IN }],
			answers: Vec::new(),
			authorities: Vec::new(),
			additional: Vec::new(),
		}
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = vec![0u8; HEADER_SIZE];

		for q in &self.questions {
			encode_name(&mut out, &q.name);
			out.extend_from_slice(&q.qtype.to_be_bytes());
			out.extend_from_slice(&q.qclass.to_be_bytes());
		}

		for section in [&self.answers, &self.authorities, &self.additional] {
			for rr in section {
				encode_record(&mut out, rr);
			}
		}

		let header = Header {
			id: self.id.into(),
			flags: RawFlags::from(self.flags).into(),
			qdcount: (self.questions.len() as u16).into(),
			ancount: (self.answers.len() as u16).into(),
			nscount: (self.authorities.len() as u16).into(),
			arcount: (self.additional.len() as u16).into(),
		};

		*bytes::cast_mut::<Header, _>(&mut out[..HEADER_SIZE]) = header;

		out
	}

	pub fn decode(buf: &[u8]) -> Result<Self, Kind> {
		if buf.len() < HEADER_SIZE {
			return Err(Kind::EndOfInput);
		}

		let header = *bytes::cast::<Header, _>(&buf[..HEADER_SIZE]);
		let flags = Flags::from(header.flags.get());

		let mut pos = HEADER_SIZE;
		let mut questions = Vec::with_capacity(header.qdcount.get() as usize);

		for _ in 0..header.qdcount.get() {
			let (name, next) = decode_name(buf, pos)?;
			pos = next;

			if pos + 4 > buf.len() {
				return Err(Kind::EndOfInput);
			}

			let qtype = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
			let qclass = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]);
			pos += 4;

			questions.push(Question { name, qtype, qclass });
		}

		let mut decode_section = |count: u16, pos: &mut usize| -> Result<Vec<Record>, Kind> {
			let mut out = Vec::with_capacity(count as usize);

			for _ in 0..count {
				out.push(decode_record(buf, pos)?);
			}

			Ok(out)
		};

		let answers = decode_section(header.ancount.get(), &mut pos)?;
		let authorities = decode_section(header.nscount.get(), &mut pos)?;
		let additional = decode_section(header.arcount.get(), &mut pos)?;

		Ok(Message { id: header.id.get(), flags, questions, answers, authorities, additional })
	}
}

fn encode_name(out: &mut Vec<u8>, name: &str) {
	if name.is_empty() || name == "." {
		out.push(0);
		return;
	}

	for label in name.trim_end_matches('.').split('.') {
		let bytes = label.as_bytes();
		let len = bytes.len().min(63) as u8;
		out.push(len);
		out.extend_from_slice(&bytes[..len as usize]);
	}

	out.push(0);
}

fn decode_name(buf: &[u8], start: usize) -> Result<(String, usize), Kind> {
	let mut labels = Vec::new();
	let mut pos = start;
	let mut end = None;
	let mut hops = 0;

	loop {
		let len = *buf.get(pos).ok_or(Kind::EndOfInput)?;

		match len >> 6 {
			0b00 => {
				if len == 0 {
					pos += 1;
					if end.is_none() {
						end = Some(pos);
					}
					break;
				}

				let label_start = pos + 1;
				let label_end = label_start.checked_add(len as usize).ok_or(Kind::Invalid)?;

				if label_end > buf.len() {
					return Err(Kind::EndOfInput);
				}

				labels.push(String::from_utf8_lossy(&buf[label_start..label_end]).into_owned());
				pos = label_end;
			}
			0b11 => {
				let hi = (len & 0x3f) as usize;
				let lo = *buf.get(pos + 1).ok_or(Kind::EndOfInput)? as usize;

				if end.is_none() {
					end = Some(pos + 2);
				}

				hops += 1;
				if hops > MAX_POINTER_HOPS {
					return Err(Kind::Invalid);
				}

				pos = (hi << 8) | lo;
			}
			_ => return Err(Kind::Invalid),
		}
	}

	Ok((labels.join("."), end.unwrap_or(pos)))
}

fn encode_record(out: &mut Vec<u8>, rr: &Record) {
	encode_name(out, &rr.name);
	out.extend_from_slice(&rr.ty.to_be_bytes());
	out.extend_from_slice(&rr.class.to_be_bytes());
	out.extend_from_slice(&rr.ttl.to_be_bytes());

	let rdata_start = out.len() + 2;
	out.extend_from_slice(&[0, 0]);

	match &rr.rdata {
		RData::A(addr) => out.extend_from_slice(&addr.octets()),
		RData::Aaaa(addr) => out.extend_from_slice(&addr.octets()),
		RData::Cname(name) | RData::Ptr(name) => encode_name(out, name),
		RData::Other(bytes) => out.extend_from_slice(bytes),
	}

	let rdlength = (out.len() - rdata_start) as u16;
	out[rdata_start - 2..rdata_start].copy_from_slice(&rdlength.to_be_bytes());
}

fn decode_record(buf: &[u8], pos: &mut usize) -> Result<Record, Kind> {
	let (name, next) = decode_name(buf, *pos)?;

	let header_end = next.checked_add(size_of::<RRHeader>()).ok_or(Kind::Invalid)?;
	if header_end > buf.len() {
		return Err(Kind::EndOfInput);
	}

	let header = *bytes::cast::<RRHeader, _>(&buf[next..header_end]);
	let rdlength = header.rdlength.get() as usize;
	let rdata_end = header_end.checked_add(rdlength).ok_or(Kind::Invalid)?;

	if rdata_end > buf.len() {
		return Err(Kind::EndOfInput);
	}

	let ty = header.ty.get();
	let rdata_buf = &buf[header_end..rdata_end];

	let rdata = match ty {
		TY_A if rdlength == 4 => RData::A(Ipv4Addr::new(rdata_buf[0], rdata_buf[1], rdata_buf[2], rdata_buf[3])),
		TY_AAAA if rdlength == 16 => RData::Aaaa(Ipv6Addr::from(<[u8; 16]>::try_from(rdata_buf).unwrap())),
		TY_CNAME => RData::Cname(decode_name(buf, header_end)?.0),
		TY_PTR => RData::Ptr(decode_name(buf, header_end)?.0),
		_ => RData::Other(rdata_buf.to_vec()),
	};

	*pos = rdata_end;

	Ok(Record { name, ty, class: header.class.get(), ttl: header.ttl.get(), rdata })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_round_trips() {
		let msg = Message::query(0xbeef, "example.com", TY_A);
		let buf = msg.encode();

		let decoded = Message::decode(&buf).unwrap();
		assert_eq!(decoded.id, 0xbeef);
		assert_eq!(decoded.questions.len(), 1);
		assert_eq!(decoded.questions[0].name, "example.com");
		assert_eq!(decoded.questions[0].qtype, TY_A);
		assert!(decoded.flags.rd);
		assert!(!decoded.flags.qr);
	}

	#[test]
	fn answer_with_a_record_round_trips() {
		let mut msg = Message::query(1, "example.com", TY_A);
		msg.flags.qr = true;
		msg.flags.ra = true;
		msg.answers.push(Record {
			name: "example.com".into(),
			ty: TY_A,
			class: CLASS_IN,
			ttl: 300,
			rdata: RData::A(Ipv4Addr::new(93, 184, 216, 34)),
		});

		let buf = msg.encode();
		let decoded = Message::decode(&buf).unwrap();

		assert_eq!(decoded.answers.len(), 1);
		assert!(matches!(decoded.answers[0].rdata, RData::A(addr) if addr == Ipv4Addr::new(93, 184, 216, 34)));
		assert_eq!(decoded.answers[0].ttl, 300);
	}

	#[test]
	fn name_with_compression_pointer_decodes() {
		let mut buf = vec![0u8; HEADER_SIZE];
		encode_name(&mut buf, "example.com");
		let name_offset = HEADER_SIZE as u16;

		// second name is a pure pointer back to the first
		buf.push(0xc0);
		buf.push(name_offset as u8);

		let (name, end) = decode_name(&buf, HEADER_SIZE + 13).unwrap();
		assert_eq!(name, "example.com");
		assert_eq!(end, buf.len());
	}

	#[test]
	fn truncated_message_is_end_of_input() {
		let buf = [0u8; HEADER_SIZE - 1];
		assert!(matches!(Message::decode(&buf), Err(Kind::EndOfInput)));
	}

	#[test]
	fn pointer_loop_is_rejected() {
		let mut buf = vec![0u8; HEADER_SIZE];
		// a pointer to itself
		buf.extend_from_slice(&[0xc0, HEADER_SIZE as u8]);

		assert!(matches!(decode_name(&buf, HEADER_SIZE), Err(Kind::Invalid)));
	}
}
