use core::mem::size_of;

use utils::bytes::{self, Cast};
use utils::endian::{u16le, u32le};
use utils::error::Kind;

/// `"HDR\0"` read as a little-endian `u32`.
pub const HEADER_MAGIC: u32 = u32::from_le_bytes(*b"HDR\0");
/// `"FTR\0"` read as a little-endian `u32`.
pub const FOOTER_MAGIC: u32 = u32::from_le_bytes(*b"FTR\0");

pub const RAW: u8 = 1;
pub const RLE: u8 = 2;

/// The fixed 16-byte record preceding every frame's blocks.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct Header {
	pub magic: u32le,
	pub length: u32le,
	pub flags: u32le,
	pub checksum: u32le,
}

pub const HEADER_SIZE: usize = size_of::<Header>();

impl Header {
	pub fn new(length: u32, flags: u32, checksum: u32) -> Self {
		Self { magic: HEADER_MAGIC.into(), length: length.into(), flags: flags.into(), checksum: checksum.into() }
	}

	/// Writes the record to the front of `dest`, returning the number of
	/// bytes written.
	///
	/// # Panics
	/// Panics if `dest` is shorter than [`HEADER_SIZE`].
	pub fn encode(&self, dest: &mut [u8]) -> usize {
		*bytes::cast_mut::<Header, _>(&mut dest[..HEADER_SIZE]) = *self;
		HEADER_SIZE
	}

	/// Decodes a header from the front of `src`.
	pub fn decode(src: &[u8]) -> Result<(Self, usize), Kind> {
		if src.len() < HEADER_SIZE {
			return Err(Kind::WouldBlock);
		}

		let header = *bytes::cast::<Header, _>(&src[..HEADER_SIZE]);

		if header.magic.get() != HEADER_MAGIC {
			return Err(Kind::Invalid);
		}

		Ok((header, HEADER_SIZE))
	}
}

/// The fixed 4-byte record preceding each block's payload (if any).
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct Block {
	pub length: u16le,
	pub literal: u8,
	pub flags: u8,
}

pub const BLOCK_SIZE: usize = size_of::<Block>();

impl Block {
	pub fn raw(length: u16) -> Self {
		Self { length: length.into(), literal: 0, flags: RAW }
	}

	pub fn rle(length: u16, literal: u8) -> Self {
		Self { length: length.into(), literal, flags: RLE }
	}

	pub fn encode(&self, dest: &mut [u8]) -> usize {
		*bytes::cast_mut::<Block, _>(&mut dest[..BLOCK_SIZE]) = *self;
		BLOCK_SIZE
	}

	pub fn decode(src: &[u8]) -> Result<(Self, usize), Kind> {
		if src.len() < BLOCK_SIZE {
			return Err(Kind::WouldBlock);
		}

		let block = *bytes::cast::<Block, _>(&src[..BLOCK_SIZE]);

		if !matches!(block.flags, RAW | RLE) {
			return Err(Kind::Invalid);
		}

		Ok((block, BLOCK_SIZE))
	}
}

/// The fixed 8-byte record closing a frame.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct Footer {
	pub magic: u32le,
	pub checksum: u32le,
}

pub const FOOTER_SIZE: usize = size_of::<Footer>();

impl Footer {
	pub fn new(checksum: u32) -> Self {
		Self { magic: FOOTER_MAGIC.into(), checksum: checksum.into() }
	}

	pub fn encode(&self, dest: &mut [u8]) -> usize {
		*bytes::cast_mut::<Footer, _>(&mut dest[..FOOTER_SIZE]) = *self;
		FOOTER_SIZE
	}

	pub fn decode(src: &[u8]) -> Result<(Self, usize), Kind> {
		if src.len() < FOOTER_SIZE {
			return Err(Kind::WouldBlock);
		}

		let footer = *bytes::cast::<Footer, _>(&src[..FOOTER_SIZE]);

		if footer.magic.get() != FOOTER_MAGIC {
			return Err(Kind::Invalid);
		}

		Ok((footer, FOOTER_SIZE))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_round_trip() {
		let header = Header::new(16, 0, 0xdead_beef);
		let mut buf = [0u8; HEADER_SIZE];
		assert_eq!(header.encode(&mut buf), HEADER_SIZE);

		let (decoded, n) = Header::decode(&buf).unwrap();
		assert_eq!(n, HEADER_SIZE);
		assert_eq!(decoded.length.get(), 16);
		assert_eq!(decoded.checksum.get(), 0xdead_beef);
	}

	#[test]
	fn header_decode_short_input_would_block() {
		let buf = [0u8; HEADER_SIZE - 1];
		assert!(matches!(Header::decode(&buf), Err(Kind::WouldBlock)));
	}

	#[test]
	fn header_decode_bad_magic_invalid() {
		let mut buf = [0u8; HEADER_SIZE];
		Header::new(0, 0, 0).encode(&mut buf);
		buf[0] ^= 0xff;
		assert!(matches!(Header::decode(&buf), Err(Kind::Invalid)));
	}

	#[test]
	fn block_round_trip() {
		let block = Block::rle(5, b'x');
		let mut buf = [0u8; BLOCK_SIZE];
		block.encode(&mut buf);

		let (decoded, _) = Block::decode(&buf).unwrap();
		assert_eq!(decoded.flags, RLE);
		assert_eq!(decoded.literal, b'x');
		assert_eq!(decoded.length.get(), 5);
	}
}
