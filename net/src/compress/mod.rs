//! Framed, incremental compression (spec.md §4.3/§4.4): a fixed little-endian
//! header/block/footer envelope wrapping either a fully-specified RLE block
//! stream or an interface-compatible LZ77-style token stream.

mod deflate;
mod frame;
mod lz;

pub use deflate::{Algorithm, Config, Deflate, Inflate};
pub use frame::{Block, Footer, Header, BLOCK_SIZE, FOOTER_SIZE, HEADER_SIZE, RAW, RLE};
