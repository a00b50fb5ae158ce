//! Key derivation: Argon2id passphrase → master key → session subkeys

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::aead::{AeadKey, KEY_LEN};
use crate::error::{AtaError, Result};

pub const SALT_LEN: usize = 16;

/// Lowest accepted Argon2id time cost.
pub const MIN_ITERATIONS: u32 = 2;
/// Lowest accepted Argon2id memory cost (8 MiB).
pub const MIN_MEM_COST_KIB: u32 = 8 * 1024;
/// Highest accepted time cost.
pub const MAX_ITERATIONS: u32 = 64;
/// Highest accepted memory cost (4 GiB).
pub const MAX_MEM_COST_KIB: u32 = 4 * 1024 * 1024;
pub const MAX_PARALLELISM: u32 = 64;

const CHUNK_KEY_CONTEXT: &str = "ata 2026-10 chunk encryption key";
const CHECKSUM_KEY_CONTEXT: &str = "ata 2026-10 entry checksum key";

/// Argon2id parameters. Persisted in the archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub iterations: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters the policy floor allows.
    pub const FLOOR: KdfParams = KdfParams {
        mem_cost_kib: MIN_MEM_COST_KIB,
        iterations: MIN_ITERATIONS,
        parallelism: 1,
    };

    /// Reject parameters below the floor or above the ceiling. Never adjusts
    /// them. Runs before any passphrase is asked for or memory is committed.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(AtaError::WeakParameter(format!(
                "KDF iterations {} below minimum {MIN_ITERATIONS}",
                self.iterations
            )));
        }
        if self.mem_cost_kib < MIN_MEM_COST_KIB {
            return Err(AtaError::WeakParameter(format!(
                "KDF memory {} KiB below minimum {MIN_MEM_COST_KIB} KiB",
                self.mem_cost_kib
            )));
        }
        if self.parallelism == 0 {
            return Err(AtaError::WeakParameter("KDF parallelism must be >= 1".into()));
        }
        if self.iterations > MAX_ITERATIONS
            || self.mem_cost_kib > MAX_MEM_COST_KIB
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(AtaError::LimitExceeded(format!(
                "KDF cost m={} KiB, t={}, p={} exceeds m={MAX_MEM_COST_KIB} KiB, t={MAX_ITERATIONS}, p={MAX_PARALLELISM}",
                self.mem_cost_kib, self.iterations, self.parallelism
            )));
        }
        Ok(())
    }
}

/// A 256-bit master key derived from a passphrase. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the master key from a passphrase and the archive salt using Argon2id.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<MasterKey> {
    params.validate()?;
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| AtaError::WeakParameter(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut bytes = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut bytes)
        .map_err(|e| AtaError::WeakParameter(format!("Argon2id KDF failed: {e}")))?;
    Ok(MasterKey { bytes })
}

/// Keys used for one archive session; never written anywhere.
pub struct SessionKeys {
    pub chunk: AeadKey,
    checksum: ChecksumKey,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct ChecksumKey([u8; KEY_LEN]);

impl SessionKeys {
    pub fn derive(master: &MasterKey) -> Self {
        Self {
            chunk: AeadKey::from_bytes(blake3::derive_key(CHUNK_KEY_CONTEXT, master.as_bytes())),
            checksum: ChecksumKey(blake3::derive_key(
                CHECKSUM_KEY_CONTEXT,
                master.as_bytes(),
            )),
        }
    }

    pub fn from_passphrase(
        passphrase: &SecretString,
        salt: &[u8; SALT_LEN],
        params: &KdfParams,
    ) -> Result<Self> {
        let master = derive_key(passphrase, salt, params)?;
        Ok(Self::derive(&master))
    }

    pub fn checksum_key(&self) -> &[u8; KEY_LEN] {
        &self.checksum.0
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}

pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(salt)
}
