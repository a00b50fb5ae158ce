use crate::error::{AtaError, Result};
use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    #[serde(alias = "store")]
    None = 0,
    Zstd = 1,
}

impl CodecId {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CodecId::None),
            1 => Ok(CodecId::Zstd),
            other => Err(AtaError::Format(format!("unknown compression id {other}"))),
        }
    }
}

/// Buffer-level compression. Each chunk is coded on its own, so
/// implementations keep no state between calls.
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;
    fn encode(&self, src: &[u8], level: i32) -> Result<Vec<u8>>;
    /// Must fail with `CorruptData` unless exactly `expected_len` bytes come out.
    fn decode(&self, src: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

/// Algorithm plus level; identical for every chunk of an archive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionContext {
    pub codec: CodecId,
    pub level: i32,
}

impl Default for CompressionContext {
    fn default() -> Self {
        Self {
            codec: CodecId::Zstd,
            level: zstdc::DEFAULT_LEVEL,
        }
    }
}

pub fn codec_for(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(store::Store),
        CodecId::Zstd => Box::new(zstdc::ZstdCodec),
    }
}

pub mod store;
pub mod zstdc;
