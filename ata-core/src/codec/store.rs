use super::{Codec, CodecId};
use crate::error::{AtaError, Result};

/// Identity codec for `--compression none` and already-compressed content.
pub struct Store;

impl Codec for Store {
    fn id(&self) -> CodecId {
        CodecId::None
    }

    fn encode(&self, src: &[u8], _level: i32) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }

    fn decode(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if src.len() != expected_len {
            return Err(AtaError::CorruptData(format!(
                "stored chunk is {} bytes, expected {expected_len}",
                src.len()
            )));
        }
        Ok(src.to_vec())
    }
}
