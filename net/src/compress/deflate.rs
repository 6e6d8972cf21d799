use collections::queue::ByteQueue;
use utils::error::Kind;

use super::{frame, lz};

/// Which block encoding a frame carries. Stored verbatim in the header's
/// `flags` field so a frame is self-describing on decode; mixing the two
/// within a single frame is rejected with `Kind::Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
	Rle = 1,
	Lz = 2,
}

impl Algorithm {
	fn from_flags(flags: u32) -> Result<Self, Kind> {
		match flags {
			1 => Ok(Algorithm::Rle),
			2 => Ok(Algorithm::Lz),
			_ => Err(Kind::Invalid),
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
	pub algorithm: Algorithm,
}

enum Run {
	Same { byte: u8, count: u32 },
	Different { bytes: Vec<u8> },
}

/// Incremental encoder driven by `deflate_begin`/`deflate_next`/`deflate_end`
/// (spec.md §4.4).
pub struct Deflate {
	config: Config,
	header_at: usize,
	length: u32,
	crc: u32,
	bytes_written: usize,
	run: Option<Run>,
	lz_input: Vec<u8>,
}

impl Deflate {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			header_at: 0,
			length: 0,
			crc: 0,
			bytes_written: 0,
			run: None,
			lz_input: Vec::new(),
		}
	}

	/// Total bytes appended to the output buffer(s) passed to this encoder
	/// since `deflate_begin`.
	pub fn bytes_written(&self) -> usize {
		self.bytes_written
	}

	pub fn deflate_begin(&mut self, out: &mut Vec<u8>) -> Result<(), Kind> {
		self.header_at = out.len();
		out.extend_from_slice(&[0u8; frame::HEADER_SIZE]);
		self.bytes_written = frame::HEADER_SIZE;
		self.length = 0;
		self.crc = 0;
		self.run = None;
		self.lz_input.clear();

		Ok(())
	}

	/// Idempotent for empty `input`.
	pub fn deflate_next(&mut self, out: &mut Vec<u8>, input: &[u8]) -> Result<(), Kind> {
		if input.is_empty() {
			return Ok(());
		}

		self.crc = crc32c::crc32c_append(self.crc, input);
		self.length += input.len() as u32;

		match self.config.algorithm {
			Algorithm::Rle => self.rle_process(out, input),
			Algorithm::Lz => self.lz_input.extend_from_slice(input),
		}

		Ok(())
	}

	pub fn deflate_end(&mut self, out: &mut Vec<u8>) -> Result<(), Kind> {
		match self.config.algorithm {
			Algorithm::Rle => self.rle_flush(out),
			Algorithm::Lz => {
				let input = core::mem::take(&mut self.lz_input);
				self.bytes_written += lz::encode(&input, out);
			}
		}

		let mut tmp = [0u8; frame::HEADER_SIZE];
		frame::Header::new(self.length, self.config.algorithm as u32, self.crc).encode(&mut tmp);
		out[self.header_at..self.header_at + frame::HEADER_SIZE].copy_from_slice(&tmp);

		let mut footer_buf = [0u8; frame::FOOTER_SIZE];
		let n = frame::Footer::new(self.crc).encode(&mut footer_buf);
		out.extend_from_slice(&footer_buf[..n]);
		self.bytes_written += n;

		Ok(())
	}

	fn emit_rle(&mut self, out: &mut Vec<u8>, count: u32, byte: u8) {
		let mut remaining = count;

		while remaining > 0 {
			let chunk = remaining.min(u16::MAX as u32);
			let mut buf = [0u8; frame::BLOCK_SIZE];
			let n = frame::Block::rle(chunk as u16, byte).encode(&mut buf);
			out.extend_from_slice(&buf[..n]);
			self.bytes_written += n;
			remaining -= chunk;
		}
	}

	fn emit_raw(&mut self, out: &mut Vec<u8>, bytes: &[u8]) {
		for chunk in bytes.chunks(u16::MAX as usize) {
			let mut buf = [0u8; frame::BLOCK_SIZE];
			let n = frame::Block::raw(chunk.len() as u16).encode(&mut buf);
			out.extend_from_slice(&buf[..n]);
			out.extend_from_slice(chunk);
			self.bytes_written += n + chunk.len();
		}
	}

	fn rle_process(&mut self, out: &mut Vec<u8>, input: &[u8]) {
		for &b in input {
			match self.run.take() {
				None => self.run = Some(Run::Same { byte: b, count: 1 }),
				Some(Run::Same { byte, count }) => {
					if b == byte {
						self.run = Some(Run::Same { byte, count: count + 1 });
					} else if count >= 2 {
						self.emit_rle(out, count, byte);
						self.run = Some(Run::Same { byte: b, count: 1 });
					} else {
						self.run = Some(Run::Different { bytes: vec![byte, b] });
					}
				}
				Some(Run::Different { mut bytes }) => {
					let prev = *bytes.last().expect("a different-run always holds at least one byte");

					if b == prev {
						bytes.pop();
						self.emit_raw(out, &bytes);
						self.run = Some(Run::Same { byte: prev, count: 2 });
					} else {
						bytes.push(b);
						self.run = Some(Run::Different { bytes });
					}
				}
			}
		}
	}

	fn rle_flush(&mut self, out: &mut Vec<u8>) {
		match self.run.take() {
			None => {}
			Some(Run::Same { byte, count }) => self.emit_rle(out, count, byte),
			Some(Run::Different { bytes }) => self.emit_raw(out, &bytes),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	WantHeader,
	WantBlock,
	WantFooter,
	Error,
}

/// Incremental decoder mirroring [`Deflate`]; see spec.md §4.4 for the exact
/// state transitions. Feeding arbitrary chunk sizes through `inflate_next`
/// yields the same output as feeding the whole stream at once.
pub struct Inflate {
	config: Config,
	state: State,
	queue: ByteQueue,
	remaining: u32,
	crc: u32,
}

impl Inflate {
	pub fn new(config: Config) -> Self {
		Self { config, state: State::WantHeader, queue: ByteQueue::new(), remaining: 0, crc: 0 }
	}

	pub fn is_error(&self) -> bool {
		self.state == State::Error
	}

	/// Exits the `Error` state and discards any buffered input, readying the
	/// decoder for a fresh frame.
	pub fn reset(&mut self) {
		self.state = State::WantHeader;
		self.queue = ByteQueue::new();
		self.remaining = 0;
		self.crc = 0;
	}

	fn peek(&self, n: usize) -> Option<Vec<u8>> {
		if self.queue.length() < n {
			return None;
		}

		if let Some(view) = self.queue.peek_contiguous(0, n) {
			return Some(view.to_vec());
		}

		Some((0..n).map(|i| self.queue.peek(i)).collect())
	}

	pub fn inflate_next(&mut self, out: &mut Vec<u8>, input: &[u8]) -> Result<(), Kind> {
		if self.state == State::Error {
			return Err(Kind::Invalid);
		}

		self.queue.append(input);

		loop {
			match self.state {
				State::WantHeader => {
					let Some(buf) = self.peek(frame::HEADER_SIZE) else { break };

					match frame::Header::decode(&buf) {
						Ok((header, n)) => {
							if Algorithm::from_flags(header.flags.get()) != Ok(self.config.algorithm) {
								self.state = State::Error;
								return Err(Kind::Invalid);
							}

							self.queue.pop(n);
							self.remaining = header.length.get();
							self.crc = 0;
							self.state = if self.remaining == 0 { State::WantFooter } else { State::WantBlock };
						}
						Err(Kind::WouldBlock) => break,
						Err(_) => {
							self.state = State::Error;
							return Err(Kind::Invalid);
						}
					}
				}
				State::WantBlock => match self.config.algorithm {
					Algorithm::Rle => {
						let Some(buf) = self.peek(frame::BLOCK_SIZE) else { break };

						match frame::Block::decode(&buf) {
							Ok((block, n)) => {
								let len = block.length.get() as usize;

								if len as u32 > self.remaining {
									self.state = State::Error;
									return Err(Kind::Invalid);
								}

								if block.flags == frame::RAW {
									if self.queue.length() < n + len {
										break;
									}

									self.queue.pop(n);
									let data = self.queue.pop(len);
									self.crc = crc32c::crc32c_append(self.crc, &data);
									out.extend_from_slice(&data);
								} else {
									self.queue.pop(n);
									let run = vec![block.literal; len];
									self.crc = crc32c::crc32c_append(self.crc, &run);
									out.extend_from_slice(&run);
								}

								self.remaining -= len as u32;
								self.state = if self.remaining == 0 { State::WantFooter } else { State::WantBlock };
							}
							Err(Kind::WouldBlock) => break,
							Err(_) => {
								self.state = State::Error;
								return Err(Kind::Invalid);
							}
						}
					}
					Algorithm::Lz => match lz::decode_token(&mut self.queue, out) {
						Ok(Some(n)) => {
							if n as u32 > self.remaining {
								self.state = State::Error;
								return Err(Kind::Invalid);
							}

							self.crc = crc32c::crc32c_append(self.crc, &out[out.len() - n..]);
							self.remaining -= n as u32;
							self.state = if self.remaining == 0 { State::WantFooter } else { State::WantBlock };
						}
						Ok(None) => break,
						Err(_) => {
							self.state = State::Error;
							return Err(Kind::Invalid);
						}
					},
				},
				State::WantFooter => {
					let Some(buf) = self.peek(frame::FOOTER_SIZE) else { break };

					match frame::Footer::decode(&buf) {
						Ok((footer, n)) => {
							if footer.checksum.get() != self.crc {
								self.state = State::Error;
								return Err(Kind::Invalid);
							}

							self.queue.pop(n);
							self.state = State::WantHeader;
						}
						Err(Kind::WouldBlock) => break,
						Err(_) => {
							self.state = State::Error;
							return Err(Kind::Invalid);
						}
					}
				}
				State::Error => unreachable!("checked at function entry"),
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn deflate_all(algorithm: Algorithm, input: &[u8]) -> Vec<u8> {
		let mut out = Vec::new();
		let mut d = Deflate::new(Config { algorithm });
		d.deflate_begin(&mut out).unwrap();
		d.deflate_next(&mut out, input).unwrap();
		d.deflate_end(&mut out).unwrap();
		out
	}

	#[test]
	fn rle_end_to_end_example() {
		let input = b"abbcccddddeeeffg";
		let encoded = deflate_all(Algorithm::Rle, input);

		let (header, _) = frame::Header::decode(&encoded).unwrap();
		assert_eq!(header.length.get(), input.len() as u32);

		let mut inflate = Inflate::new(Config { algorithm: Algorithm::Rle });
		let mut out = Vec::new();
		inflate.inflate_next(&mut out, &encoded).unwrap();

		assert_eq!(out, input);
	}

	#[test]
	fn rle_chunked_inflate_matches_whole() {
		let input = b"abbcccddddeeeffg";
		let encoded = deflate_all(Algorithm::Rle, input);

		let mut inflate = Inflate::new(Config { algorithm: Algorithm::Rle });
		let mut out = Vec::new();

		for byte in &encoded {
			inflate.inflate_next(&mut out, core::slice::from_ref(byte)).unwrap();
		}

		assert_eq!(out, input);
	}

	#[test]
	fn rle_round_trip_arbitrary_input() {
		let input: Vec<u8> = (0..2000).map(|i| (i % 17) as u8).collect();
		let encoded = deflate_all(Algorithm::Rle, &input);

		let mut inflate = Inflate::new(Config { algorithm: Algorithm::Rle });
		let mut out = Vec::new();
		inflate.inflate_next(&mut out, &encoded).unwrap();

		assert_eq!(out, input);
	}

	#[test]
	fn lz_round_trip() {
		let input = b"the quick brown fox jumps over the quick brown fox again and again".repeat(3);
		let encoded = deflate_all(Algorithm::Lz, &input);

		let mut inflate = Inflate::new(Config { algorithm: Algorithm::Lz });
		let mut out = Vec::new();
		inflate.inflate_next(&mut out, &encoded).unwrap();

		assert_eq!(out, input);
	}

	#[test]
	fn header_checksum_matches_payload_crc() {
		let input = b"abbcccddddeeeffg";
		let encoded = deflate_all(Algorithm::Rle, input);

		let (header, _) = frame::Header::decode(&encoded).unwrap();
		assert_eq!(header.checksum.get(), crc32c::crc32c(input));
	}

	#[test]
	fn corrupted_checksum_rejected() {
		let input = b"abbcccddddeeeffg";
		let mut encoded = deflate_all(Algorithm::Rle, input);

		let last = encoded.len() - 1;
		encoded[last] ^= 0xff;

		let mut inflate = Inflate::new(Config { algorithm: Algorithm::Rle });
		let mut out = Vec::new();
		let err = inflate.inflate_next(&mut out, &encoded).unwrap_err();

		assert_eq!(err, Kind::Invalid);
		assert!(inflate.is_error());
	}
}
