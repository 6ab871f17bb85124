use std::io::{Read as _, Write as _};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

pub fn decode_zlib(data: &[u8], size_hint: usize) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::with_capacity(size_hint);
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Compresses `data` with zlib. `level` is clamped to `0..=9`.
pub fn encode_zlib(data: &[u8], level: u32) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;
    encoder.finish()
}
