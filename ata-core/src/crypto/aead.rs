use crate::error::{AtaError, Result};
use chacha20poly1305::{
    Key, Tag, XChaCha20Poly1305, XNonce,
    aead::{AeadInPlace, KeyInit},
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherId {
    None = 0,
    XChaCha20Poly1305 = 1,
}

impl CipherId {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CipherId::None),
            1 => Ok(CipherId::XChaCha20Poly1305),
            other => Err(AtaError::Format(format!("unknown encryption id {other}"))),
        }
    }
}

/// Raw 32-byte chunk key. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey(pub(crate) [u8; KEY_LEN]);

impl AeadKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for AeadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadKey([REDACTED])")
    }
}

/// Authenticated encryption of one buffer, tag kept separate from the
/// ciphertext because the manifest stores it next to the chunk descriptor.
pub trait Cipher: Send + Sync {
    fn id(&self) -> CipherId;
    /// Encrypt `buf` in place and return its tag.
    fn encrypt(&self, nonce: &[u8; NONCE_LEN], ad: &[u8], buf: &mut [u8]) -> Result<[u8; TAG_LEN]>;
    /// Verify `tag` and decrypt in place. On failure `buf` must not be used.
    fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<()>;
}

/// Encryption disabled: no tag is produced and none is checked.
pub struct NoCipher;

impl Cipher for NoCipher {
    fn id(&self) -> CipherId {
        CipherId::None
    }

    fn encrypt(&self, _nonce: &[u8; NONCE_LEN], _ad: &[u8], _buf: &mut [u8]) -> Result<[u8; TAG_LEN]> {
        Ok([0u8; TAG_LEN])
    }

    fn decrypt(
        &self,
        _nonce: &[u8; NONCE_LEN],
        _ad: &[u8],
        _buf: &mut [u8],
        _tag: &[u8; TAG_LEN],
    ) -> Result<()> {
        Ok(())
    }
}

pub struct XChaCha {
    aead: XChaCha20Poly1305,
}

impl XChaCha {
    pub fn new(key: &AeadKey) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(Key::from_slice(&key.0)),
        }
    }
}

impl Cipher for XChaCha {
    fn id(&self) -> CipherId {
        CipherId::XChaCha20Poly1305
    }

    fn encrypt(&self, nonce: &[u8; NONCE_LEN], ad: &[u8], buf: &mut [u8]) -> Result<[u8; TAG_LEN]> {
        let tag = self
            .aead
            .encrypt_in_place_detached(XNonce::from_slice(nonce), ad, buf)
            .map_err(|_| AtaError::InvalidState("chunk too large to encrypt".into()))?;
        let mut out = [0u8; TAG_LEN];
        out.copy_from_slice(tag.as_slice());
        Ok(out)
    }

    fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        ad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<()> {
        self.aead
            .decrypt_in_place_detached(XNonce::from_slice(nonce), ad, buf, Tag::from_slice(tag))
            .map_err(|_| AtaError::Authentication("chunk tag mismatch".into()))
    }
}

pub fn cipher_for(id: CipherId, key: Option<&AeadKey>) -> Result<Box<dyn Cipher>> {
    match (id, key) {
        (CipherId::None, _) => Ok(Box::new(NoCipher)),
        (CipherId::XChaCha20Poly1305, Some(k)) => Ok(Box::new(XChaCha::new(k))),
        (CipherId::XChaCha20Poly1305, None) => Err(AtaError::MissingPassphrase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> AeadKey {
        AeadKey::from_bytes([b; KEY_LEN])
    }

    #[test]
    fn seal_open_roundtrip() {
        let c = XChaCha::new(&key(1));
        let nonce = [9u8; NONCE_LEN];
        let mut buf = b"attack at dawn".to_vec();
        let tag = c.encrypt(&nonce, b"ad", &mut buf).unwrap();
        assert_ne!(buf, b"attack at dawn");
        c.decrypt(&nonce, b"ad", &mut buf, &tag).unwrap();
        assert_eq!(buf, b"attack at dawn");
    }

    #[test]
    fn wrong_key_nonce_or_ad_fails() {
        let nonce = [3u8; NONCE_LEN];
        let mut ct = b"payload".to_vec();
        let tag = XChaCha::new(&key(1)).encrypt(&nonce, b"ad", &mut ct).unwrap();

        let mut b = ct.clone();
        assert!(XChaCha::new(&key(2)).decrypt(&nonce, b"ad", &mut b, &tag).is_err());
        let mut b = ct.clone();
        assert!(XChaCha::new(&key(1)).decrypt(&[4u8; NONCE_LEN], b"ad", &mut b, &tag).is_err());
        let mut b = ct.clone();
        let err = XChaCha::new(&key(1)).decrypt(&nonce, b"xx", &mut b, &tag).unwrap_err();
        assert!(matches!(err, AtaError::Authentication(_)));
    }

    #[test]
    fn flipped_tag_bit_fails() {
        let c = XChaCha::new(&key(7));
        let nonce = [0u8; NONCE_LEN];
        let mut buf = vec![0u8; 64];
        let mut tag = c.encrypt(&nonce, &[], &mut buf).unwrap();
        tag[15] ^= 0x01;
        assert!(c.decrypt(&nonce, &[], &mut buf, &tag).is_err());
    }

    #[test]
    fn no_cipher_is_transparent() {
        let mut buf = b"plain".to_vec();
        let tag = NoCipher.encrypt(&[0; NONCE_LEN], &[], &mut buf).unwrap();
        assert_eq!(tag, [0u8; TAG_LEN]);
        NoCipher.decrypt(&[0; NONCE_LEN], &[], &mut buf, &[1; TAG_LEN]).unwrap();
        assert_eq!(buf, b"plain");
    }

    #[test]
    fn encrypted_id_requires_key() {
        assert!(matches!(
            cipher_for(CipherId::XChaCha20Poly1305, None),
            Err(AtaError::MissingPassphrase)
        ));
    }
}
