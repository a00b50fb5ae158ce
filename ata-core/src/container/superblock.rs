//! Archive header (32 bytes, at offset 0).
//!
//! ```text
//! magic "ATAR" (4) | format_version (1) | flags (1) | compression_id (1)
//! | encryption_id (1) | kdf_salt (16) | reserved (8)
//! ```
//! When the archive is encrypted the reserved bytes carry the KDF parameters:
//! `mem_cost_kib u32 | iterations u16 | parallelism u8 | 0`.

use crate::codec::CodecId;
use crate::crypto::aead::CipherId;
use crate::crypto::kdf::{KdfParams, SALT_LEN};
use crate::error::{AtaError, Result};
use crate::util::buf::ByteReader;
use std::io::{Read, Write};

pub const MAGIC: &[u8; 4] = b"ATAR";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: u64 = 32;

pub const FLAG_ENCRYPTED: u8 = 0b0000_0001;
const KNOWN_FLAGS: u8 = FLAG_ENCRYPTED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    pub flags: u8,
    pub compression: CodecId,
    pub encryption: CipherId,
    pub kdf_salt: [u8; SALT_LEN],
    /// Present iff the archive is encrypted.
    pub kdf: Option<KdfParams>,
}

impl Superblock {
    pub fn new(
        compression: CodecId,
        encryption: CipherId,
        kdf_salt: [u8; SALT_LEN],
        kdf: Option<KdfParams>,
    ) -> Result<Self> {
        let encrypted = encryption != CipherId::None;
        if encrypted != kdf.is_some() {
            return Err(AtaError::InvalidOption(
                "KDF parameters must be given exactly when encrypting".into(),
            ));
        }
        if let Some(k) = kdf {
            if k.iterations > u16::MAX as u32 || k.parallelism > u8::MAX as u32 {
                return Err(AtaError::InvalidOption(format!(
                    "KDF parameters do not fit the header: {k:?}"
                )));
            }
        }
        Ok(Self {
            version: VERSION,
            flags: if encrypted { FLAG_ENCRYPTED } else { 0 },
            compression,
            encryption,
            kdf_salt,
            kdf,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = self.version;
        out[5] = self.flags;
        out[6] = self.compression as u8;
        out[7] = self.encryption as u8;
        out[8..24].copy_from_slice(&self.kdf_salt);
        if let Some(k) = self.kdf {
            out[24..28].copy_from_slice(&k.mem_cost_kib.to_le_bytes());
            out[28..30].copy_from_slice(&(k.iterations as u16).to_le_bytes());
            out[30] = k.parallelism as u8;
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes, "header");
        let magic: [u8; 4] = r.array()?;
        if &magic != MAGIC {
            return Err(AtaError::Format("bad header magic: not an ata archive".into()));
        }
        let version = r.u8()?;
        if version != VERSION {
            return Err(AtaError::Format(format!(
                "unsupported format version {version} (expected {VERSION})"
            )));
        }
        let flags = r.u8()?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(AtaError::Format(format!("unknown header flags {flags:#04x}")));
        }
        let compression = CodecId::from_u8(r.u8()?)?;
        let encryption = CipherId::from_u8(r.u8()?)?;
        let kdf_salt: [u8; SALT_LEN] = r.array()?;
        let mem_cost_kib = r.u32_le()?;
        let iterations = r.u16_le()? as u32;
        let parallelism = r.u8()? as u32;
        let pad = r.u8()?;

        let encrypted = flags & FLAG_ENCRYPTED != 0;
        if encrypted != (encryption != CipherId::None) {
            return Err(AtaError::Format(
                "encryption flag disagrees with encryption id".into(),
            ));
        }
        let kdf = if encrypted {
            Some(KdfParams {
                mem_cost_kib,
                iterations,
                parallelism,
            })
        } else {
            if mem_cost_kib != 0 || iterations != 0 || parallelism != 0 {
                return Err(AtaError::Format("reserved header bytes not zero".into()));
            }
            None
        };
        if pad != 0 {
            return Err(AtaError::Format("reserved header bytes not zero".into()));
        }
        Ok(Self {
            version,
            flags,
            compression,
            encryption,
            kdf_salt,
            kdf,
        })
    }

    pub fn write_to(&self, mut w: impl Write) -> Result<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN as usize];
        r.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                AtaError::Format("file too small for header".into())
            }
            _ => e.into(),
        })?;
        Self::decode(&buf)
    }
}
