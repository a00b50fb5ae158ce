//! Per-chunk transform.
//!
//! create:  plaintext → codec.encode → cipher.encrypt → (stored, tag)
//! extract: cipher.decrypt (tag verified) → codec.decode(expected_len)
//!
//! Decoding never sees bytes that failed verification. Without encryption the
//! tag slot holds a truncated BLAKE3 checksum of the stored bytes instead.

use crate::codec::{Codec, CodecId, CompressionContext, codec_for};
use crate::container::chunktab::ChunkDescriptor;
use crate::container::manifest::{CHECKSUM_LEN, ManifestEntry};
use crate::crypto::aead::{Cipher, CipherId, TAG_LEN, cipher_for};
use crate::crypto::kdf::{SALT_LEN, SessionKeys};
use crate::crypto::nonce::nonce_for;
use crate::error::{AtaError, Result};
use crate::util::sanitize::EntryPath;
use crate::util::varint::put_uvarint;
use zeroize::Zeroizing;

#[derive(Debug)]
pub struct SealedChunk {
    pub seq: u64,
    pub stored: Vec<u8>,
    pub tag: [u8; TAG_LEN],
    pub plain_len: u64,
    pub compressed_len: u64,
}

pub struct ChunkPipeline {
    compression: CompressionContext,
    codec: Box<dyn Codec>,
    cipher: Box<dyn Cipher>,
    nonce_base: [u8; SALT_LEN],
    checksum_key: Option<Zeroizing<[u8; 32]>>,
}

impl ChunkPipeline {
    /// `keys` must be present exactly when `encryption` is not `None`.
    pub fn new(
        compression: CompressionContext,
        encryption: CipherId,
        nonce_base: [u8; SALT_LEN],
        keys: Option<&SessionKeys>,
    ) -> Result<Self> {
        let cipher = cipher_for(encryption, keys.map(|k| &k.chunk))?;
        let checksum_key = match encryption {
            CipherId::None => None,
            _ => keys.map(|k| Zeroizing::new(*k.checksum_key())),
        };
        Ok(Self {
            compression,
            codec: codec_for(compression.codec),
            cipher,
            nonce_base,
            checksum_key,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.id() != CipherId::None
    }

    pub fn codec(&self) -> CodecId {
        self.codec.id()
    }

    pub fn seal(&self, seq: u64, plaintext: &[u8]) -> Result<SealedChunk> {
        let plain_len = plaintext.len() as u64;
        let mut stored = self.codec.encode(plaintext, self.compression.level)?;
        let compressed_len = stored.len() as u64;
        let tag = if self.is_encrypted() {
            let nonce = nonce_for(&self.nonce_base, seq);
            self.cipher.encrypt(&nonce, &chunk_ad(seq, plain_len), &mut stored)?
        } else {
            integrity_tag(&stored)
        };
        Ok(SealedChunk {
            seq,
            stored,
            tag,
            plain_len,
            compressed_len,
        })
    }

    /// Verify then decode one stored chunk. Returns nothing on any failure.
    pub fn open(&self, desc: &ChunkDescriptor, mut stored: Vec<u8>) -> Result<Vec<u8>> {
        if stored.len() as u64 != desc.stored_len {
            return Err(AtaError::CorruptData(format!(
                "chunk {}: read {} bytes, expected {}",
                desc.seq,
                stored.len(),
                desc.stored_len
            )));
        }
        if self.is_encrypted() {
            let nonce = nonce_for(&self.nonce_base, desc.seq);
            self.cipher
                .decrypt(&nonce, &chunk_ad(desc.seq, desc.plain_len), &mut stored, &desc.tag)
                .map_err(|e| match e {
                    AtaError::Authentication(_) => {
                        AtaError::Authentication(format!("chunk {}: tag mismatch", desc.seq))
                    }
                    other => other,
                })?;
        } else if integrity_tag(&stored) != desc.tag {
            return Err(AtaError::CorruptData(format!(
                "chunk {}: checksum mismatch",
                desc.seq
            )));
        }
        let plain_len = usize::try_from(desc.plain_len)
            .map_err(|_| AtaError::CorruptData("chunk length overflow".into()))?;
        self.codec
            .decode(&stored, plain_len)
            .map_err(|e| match e {
                AtaError::CorruptData(m) => AtaError::CorruptData(format!("chunk {}: {m}", desc.seq)),
                other => other,
            })
    }

    pub fn entry_digest(&self, entry: &ManifestEntry) -> EntryDigest {
        EntryDigest::new(self.checksum_key.as_deref(), entry)
    }
}

// AAD binds the ciphertext to its position and plaintext length.
fn chunk_ad(seq: u64, plain_len: u64) -> [u8; 16] {
    let mut ad = [0u8; 16];
    ad[..8].copy_from_slice(&seq.to_le_bytes());
    ad[8..].copy_from_slice(&plain_len.to_le_bytes());
    ad
}

fn integrity_tag(stored: &[u8]) -> [u8; TAG_LEN] {
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&blake3::hash(stored).as_bytes()[..TAG_LEN]);
    tag
}

/// Whole-entry checksum:
/// `H(kind || path_len || path || mode || mtime || content || size)`, keyed
/// when encrypted. Every manifest field except the chunk table is covered;
/// chunk descriptors are bound by their tags and by `size`.
pub struct EntryDigest {
    hasher: blake3::Hasher,
    keyed: bool,
}

impl EntryDigest {
    pub fn new(key: Option<&[u8; 32]>, entry: &ManifestEntry) -> Self {
        let mut hasher = match key {
            Some(k) => blake3::Hasher::new_keyed(k),
            None => blake3::Hasher::new(),
        };
        let path = entry.path.to_string();
        let mut prefix = Vec::with_capacity(path.len() + 23);
        prefix.push(entry.kind as u8);
        put_uvarint(&mut prefix, path.len() as u64);
        prefix.extend_from_slice(path.as_bytes());
        prefix.extend_from_slice(&entry.mode.to_le_bytes());
        prefix.extend_from_slice(&entry.mtime.to_le_bytes());
        hasher.update(&prefix);
        Self {
            hasher,
            keyed: key.is_some(),
        }
    }

    pub fn update(&mut self, content: &[u8]) {
        self.hasher.update(content);
    }

    pub fn hasher_mut(&mut self) -> &mut blake3::Hasher {
        &mut self.hasher
    }

    pub fn finalize(mut self, size: u64) -> [u8; CHECKSUM_LEN] {
        self.hasher.update(&size.to_le_bytes());
        *self.hasher.finalize().as_bytes()
    }

    /// Compare in constant time against the recorded checksum.
    pub fn verify(self, size: u64, expected: &[u8; CHECKSUM_LEN], path: &EntryPath) -> Result<()> {
        let keyed = self.keyed;
        let got = blake3::Hash::from(self.finalize(size));
        if got == blake3::Hash::from(*expected) {
            return Ok(());
        }
        if keyed {
            Err(AtaError::Authentication(format!("entry {path}: checksum mismatch")))
        } else {
            Err(AtaError::CorruptData(format!("entry {path}: checksum mismatch")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::manifest::EntryKind;
    use crate::crypto::aead::AeadKey;
    use crate::crypto::kdf::{KdfParams, SessionKeys};
    use secrecy::SecretString;

    fn keys(pass: &str) -> SessionKeys {
        SessionKeys::from_passphrase(&SecretString::from(pass), &[4; SALT_LEN], &KdfParams::FLOOR)
            .unwrap()
    }

    fn zstd() -> CompressionContext {
        CompressionContext {
            codec: CodecId::Zstd,
            level: 3,
        }
    }

    fn desc_for(s: &SealedChunk) -> ChunkDescriptor {
        ChunkDescriptor {
            seq: s.seq,
            offset: 0,
            stored_len: s.stored.len() as u64,
            plain_len: s.plain_len,
            tag: s.tag,
        }
    }

    #[test]
    fn late_workers_do_not_change_sealed_layout() {
        use crate::sched::{CancelToken, Scheduler};
        use std::time::Duration;

        let k = keys("pw");
        let p = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&k)).unwrap();
        let chunks: Vec<Vec<u8>> = (0..32u8).map(|i| vec![i; 512 + i as usize * 13]).collect();
        let layout = |workers: usize, delayed: bool| {
            let mut out = Vec::new();
            Scheduler::new(workers, 2)
                .unwrap()
                .run(
                    chunks.iter().enumerate().map(|(i, c)| Ok((i as u64, c))),
                    |(seq, c): (u64, &Vec<u8>)| {
                        if delayed {
                            // later chunks of each window finish first
                            std::thread::sleep(Duration::from_millis((7 - seq % 8) * 2));
                        }
                        p.seal(seq, c)
                    },
                    |sealed: Result<SealedChunk>| {
                        let s = sealed?;
                        out.extend_from_slice(&s.stored);
                        out.extend_from_slice(&s.tag);
                        Ok(())
                    },
                    &CancelToken::new(),
                )
                .unwrap();
            out
        };
        let inline = layout(1, false);
        assert_eq!(layout(4, true), inline);
        assert_eq!(layout(3, true), inline);
    }

    #[test]
    fn encrypted_roundtrip() {
        let k = keys("pw");
        let p = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&k)).unwrap();
        let data = b"hello hello hello hello".repeat(10);
        let sealed = p.seal(7, &data).unwrap();
        assert_eq!(sealed.plain_len, data.len() as u64);
        assert!(sealed.compressed_len < sealed.plain_len);
        let d = desc_for(&sealed);
        assert_eq!(p.open(&d, sealed.stored).unwrap(), data);
    }

    #[test]
    fn tampering_is_authentication_error() {
        let k = keys("pw");
        let p = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&k)).unwrap();
        let sealed = p.seal(0, b"some payload bytes").unwrap();
        let d = desc_for(&sealed);

        let mut flipped = sealed.stored.clone();
        flipped[0] ^= 0x80;
        assert!(matches!(p.open(&d, flipped), Err(AtaError::Authentication(_))));

        let mut bad_tag = d;
        bad_tag.tag[3] ^= 1;
        assert!(matches!(p.open(&bad_tag, sealed.stored.clone()), Err(AtaError::Authentication(_))));

        // Moving a chunk to a different position changes its nonce and AAD.
        let mut moved = d;
        moved.seq = 1;
        assert!(matches!(p.open(&moved, sealed.stored), Err(AtaError::Authentication(_))));
    }

    #[test]
    fn wrong_key_fails_before_decompression() {
        let p1 = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&keys("a"))).unwrap();
        let p2 = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&keys("b"))).unwrap();
        let sealed = p1.seal(0, &[0u8; 4096]).unwrap();
        let d = desc_for(&sealed);
        assert!(matches!(p2.open(&d, sealed.stored), Err(AtaError::Authentication(_))));
    }

    #[test]
    fn plain_pipeline_detects_corruption() {
        let p = ChunkPipeline::new(zstd(), CipherId::None, [0; SALT_LEN], None).unwrap();
        let sealed = p.seal(0, &[9u8; 1000]).unwrap();
        let d = desc_for(&sealed);
        let mut bad = sealed.stored.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        assert!(matches!(p.open(&d, bad), Err(AtaError::CorruptData(_))));
        assert_eq!(p.open(&d, sealed.stored).unwrap(), vec![9u8; 1000]);
    }

    #[test]
    fn plain_length_mismatch_is_corrupt() {
        let p = ChunkPipeline::new(
            CompressionContext { codec: CodecId::None, level: 0 },
            CipherId::None,
            [0; SALT_LEN],
            None,
        )
        .unwrap();
        let sealed = p.seal(0, b"abcd").unwrap();
        let mut d = desc_for(&sealed);
        d.plain_len = 5;
        assert!(matches!(p.open(&d, sealed.stored), Err(AtaError::CorruptData(_))));
    }

    #[test]
    fn sealing_is_deterministic() {
        let k = keys("pw");
        let p = ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [4; SALT_LEN], Some(&k)).unwrap();
        let a = p.seal(3, b"same input").unwrap();
        let b = p.seal(3, b"same input").unwrap();
        assert_eq!(a.stored, b.stored);
        assert_eq!(a.tag, b.tag);
        let c = p.seal(4, b"same input").unwrap();
        assert_ne!(a.stored, c.stored);
    }

    #[test]
    fn encrypted_pipeline_requires_keys() {
        assert!(ChunkPipeline::new(zstd(), CipherId::XChaCha20Poly1305, [0; SALT_LEN], None).is_err());
        let _ = AeadKey::from_bytes([0; 32]);
    }

    #[test]
    fn entry_digest_binds_path_and_key() {
        let a = ManifestEntry::new(EntryPath::parse("a").unwrap(), EntryKind::File, 0o644, 10);
        let b = ManifestEntry::new(EntryPath::parse("b").unwrap(), EntryKind::File, 0o644, 10);
        let digest = |key: Option<&[u8; 32]>, e: &ManifestEntry| {
            let mut d = EntryDigest::new(key, e);
            d.update(b"xyz");
            d.finalize(3)
        };
        assert_ne!(digest(None, &a), digest(None, &b));
        assert_ne!(digest(None, &a), digest(Some(&[1; 32]), &a));

        let expected = digest(Some(&[1; 32]), &a);
        let mut wrong = EntryDigest::new(Some(&[2; 32]), &a);
        wrong.update(b"xyz");
        assert!(matches!(
            wrong.verify(3, &expected, &a.path),
            Err(AtaError::Authentication(_))
        ));
    }

    #[test]
    fn entry_digest_binds_mode_and_mtime() {
        let path = EntryPath::parse("bin/tool").unwrap();
        let base = ManifestEntry::new(path.clone(), EntryKind::File, 0o755, 1_700_000_000);
        let setuid = ManifestEntry::new(path.clone(), EntryKind::File, 0o4755, 1_700_000_000);
        let touched = ManifestEntry::new(path.clone(), EntryKind::File, 0o755, 1_700_000_001);
        let key = Some(&[7u8; 32]);
        let sum = EntryDigest::new(key, &base).finalize(0);
        assert_ne!(sum, EntryDigest::new(key, &setuid).finalize(0));
        assert_ne!(sum, EntryDigest::new(key, &touched).finalize(0));
        assert!(matches!(
            EntryDigest::new(key, &setuid).verify(0, &sum, &path),
            Err(AtaError::Authentication(_))
        ));
        assert!(matches!(
            EntryDigest::new(None, &setuid).verify(0, &EntryDigest::new(None, &base).finalize(0), &path),
            Err(AtaError::CorruptData(_))
        ));
    }
}
