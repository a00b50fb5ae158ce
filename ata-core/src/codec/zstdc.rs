use super::{Codec, CodecId};
use crate::error::{AtaError, Result};

pub const DEFAULT_LEVEL: i32 = 3;

pub struct ZstdCodec;

impl Codec for ZstdCodec {
    fn id(&self) -> CodecId {
        CodecId::Zstd
    }

    fn encode(&self, src: &[u8], level: i32) -> Result<Vec<u8>> {
        Ok(zstd::bulk::compress(src, level.clamp(1, 22))?)
    }

    fn decode(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        // Capacity is the recorded plaintext length, so a hostile frame cannot
        // inflate beyond what the manifest promised.
        let out = zstd::bulk::decompress(src, expected_len)
            .map_err(|e| AtaError::CorruptData(format!("zstd: {e}")))?;
        if out.len() != expected_len {
            return Err(AtaError::CorruptData(format!(
                "zstd produced {} bytes, expected {expected_len}",
                out.len()
            )));
        }
        Ok(out)
    }
}
