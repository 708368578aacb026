//! Per-operation context records.
//!
//! The first command descriptor of every chain points at a context record:
//! two control words selecting the cipher/hash configuration, followed by the
//! already-expanded key material the engine units consume directly. Each
//! request slot owns one record region in the ring's DMA arena; it is
//! rewritten in place from the session template on every submission, which
//! also makes per-operation key overrides cheap.
//!
//! Key-schedule math (AES round keys, GHASH/XCBC subkey derivation) happens
//! outside this crate; the record stores what the caller hands the session.

use crate::error::Error;

/// Context record size in bytes. One per request slot.
pub const CTX_RECORD_SIZE: usize = 128;

/// Byte offsets within a context record.
pub const CTX_OFF_CTRL0: usize = 0;
pub const CTX_OFF_CTRL1: usize = 4;
pub const CTX_OFF_CIPHER_KEY: usize = 8;
pub const CTX_OFF_HASH_KEY: usize = 40;
pub const CTX_OFF_GHASH_KEY: usize = 104;

/// Maximum cipher key bytes stored in the record.
pub const CTX_CIPHER_KEY_MAX: usize = 32;
/// Maximum hash key bytes stored in the record.
pub const CTX_HASH_KEY_MAX: usize = 64;

// ── Control word 0 ───────────────────────────────────────────────────────
// [2:0] cipher algorithm, [6:4] cipher mode, [8] encrypt, [23:16] digest len.

const CTRL0_CIPHER_SHIFT: u32 = 0;
const CTRL0_CIPHER_MASK: u32 = 0x7;
const CTRL0_MODE_SHIFT: u32 = 4;
const CTRL0_MODE_MASK: u32 = 0x7;
const CTRL0_ENCRYPT: u32 = 1 << 8;
const CTRL0_DIGEST_SHIFT: u32 = 16;
const CTRL0_DIGEST_MASK: u32 = 0xff;

// ── Control word 1 ───────────────────────────────────────────────────────
// [3:0] hash algorithm.

const CTRL1_HASH_SHIFT: u32 = 0;
const CTRL1_HASH_MASK: u32 = 0xf;

/// Cipher-unit algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherAlg {
    #[default]
    None,
    Aes128,
    Aes192,
    Aes256,
}

impl CipherAlg {
    /// Expected key length in bytes; 0 for [`CipherAlg::None`].
    pub fn key_len(self) -> usize {
        match self {
            CipherAlg::None => 0,
            CipherAlg::Aes128 => 16,
            CipherAlg::Aes192 => 24,
            CipherAlg::Aes256 => 32,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            CipherAlg::None => 0,
            CipherAlg::Aes128 => 1,
            CipherAlg::Aes192 => 2,
            CipherAlg::Aes256 => 3,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(CipherAlg::None),
            1 => Some(CipherAlg::Aes128),
            2 => Some(CipherAlg::Aes192),
            3 => Some(CipherAlg::Aes256),
            _ => None,
        }
    }
}

/// Cipher-unit block mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    #[default]
    None,
    Cbc,
    Ctr,
    Gcm,
    Ccm,
}

impl CipherMode {
    fn to_bits(self) -> u32 {
        match self {
            CipherMode::None => 0,
            CipherMode::Cbc => 1,
            CipherMode::Ctr => 2,
            CipherMode::Gcm => 3,
            CipherMode::Ccm => 4,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(CipherMode::None),
            1 => Some(CipherMode::Cbc),
            2 => Some(CipherMode::Ctr),
            3 => Some(CipherMode::Gcm),
            4 => Some(CipherMode::Ccm),
            _ => None,
        }
    }
}

/// Hash-unit algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlg {
    #[default]
    None,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    HmacSha1,
    HmacSha256,
    HmacSha384,
    HmacSha512,
    Ghash,
    CbcMac,
    Xcbc,
}

impl HashAlg {
    /// Full digest length in bytes (the maximum tag length for this
    /// algorithm).
    pub fn digest_len(self) -> u32 {
        match self {
            HashAlg::None => 0,
            HashAlg::Sha1 | HashAlg::HmacSha1 => 20,
            HashAlg::Sha256 | HashAlg::HmacSha256 => 32,
            HashAlg::Sha384 | HashAlg::HmacSha384 => 48,
            HashAlg::Sha512 | HashAlg::HmacSha512 => 64,
            HashAlg::Ghash | HashAlg::CbcMac | HashAlg::Xcbc => 16,
        }
    }

    /// Whether the algorithm consumes a key through the context record.
    pub fn keyed(self) -> bool {
        !matches!(
            self,
            HashAlg::None | HashAlg::Sha1 | HashAlg::Sha256 | HashAlg::Sha384 | HashAlg::Sha512
        )
    }

    fn to_bits(self) -> u32 {
        match self {
            HashAlg::None => 0,
            HashAlg::Sha1 => 1,
            HashAlg::Sha256 => 2,
            HashAlg::Sha384 => 3,
            HashAlg::Sha512 => 4,
            HashAlg::HmacSha1 => 5,
            HashAlg::HmacSha256 => 6,
            HashAlg::HmacSha384 => 7,
            HashAlg::HmacSha512 => 8,
            HashAlg::Ghash => 9,
            HashAlg::CbcMac => 10,
            HashAlg::Xcbc => 11,
        }
    }

    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(HashAlg::None),
            1 => Some(HashAlg::Sha1),
            2 => Some(HashAlg::Sha256),
            3 => Some(HashAlg::Sha384),
            4 => Some(HashAlg::Sha512),
            5 => Some(HashAlg::HmacSha1),
            6 => Some(HashAlg::HmacSha256),
            7 => Some(HashAlg::HmacSha384),
            8 => Some(HashAlg::HmacSha512),
            9 => Some(HashAlg::Ghash),
            10 => Some(HashAlg::CbcMac),
            11 => Some(HashAlg::Xcbc),
            _ => None,
        }
    }
}

/// Operation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Session-held key material and algorithm selectors, copied into a slot's
/// context record per request.
#[derive(Clone)]
pub(crate) struct ContextTemplate {
    pub(crate) cipher: CipherAlg,
    pub(crate) cipher_mode: CipherMode,
    pub(crate) hash: HashAlg,
    pub(crate) cipher_key: [u8; CTX_CIPHER_KEY_MAX],
    pub(crate) cipher_key_len: u8,
    pub(crate) hash_key: [u8; CTX_HASH_KEY_MAX],
    pub(crate) hash_key_len: u8,
    pub(crate) ghash_key: [u8; 16],
}

impl ContextTemplate {
    /// Write the record for one request. `key_override` replaces the cipher
    /// key for this request only and must match the template key length.
    pub(crate) fn write_record(
        &self,
        record: &mut [u8],
        dir: Direction,
        digest_len: u32,
        key_override: Option<&[u8]>,
    ) -> Result<(), Error> {
        debug_assert_eq!(record.len(), CTX_RECORD_SIZE);
        let cipher_key = match key_override {
            Some(key) => {
                if key.len() != self.cipher_key_len as usize {
                    return Err(Error::InvalidRequest("cipher key override length"));
                }
                key
            }
            None => &self.cipher_key[..self.cipher_key_len as usize],
        };

        record.fill(0);
        let ctrl0 = (self.cipher.to_bits() & CTRL0_CIPHER_MASK) << CTRL0_CIPHER_SHIFT
            | (self.cipher_mode.to_bits() & CTRL0_MODE_MASK) << CTRL0_MODE_SHIFT
            | if dir == Direction::Encrypt { CTRL0_ENCRYPT } else { 0 }
            | (digest_len & CTRL0_DIGEST_MASK) << CTRL0_DIGEST_SHIFT;
        let ctrl1 = (self.hash.to_bits() & CTRL1_HASH_MASK) << CTRL1_HASH_SHIFT;
        record[CTX_OFF_CTRL0..CTX_OFF_CTRL0 + 4].copy_from_slice(&ctrl0.to_le_bytes());
        record[CTX_OFF_CTRL1..CTX_OFF_CTRL1 + 4].copy_from_slice(&ctrl1.to_le_bytes());
        record[CTX_OFF_CIPHER_KEY..CTX_OFF_CIPHER_KEY + cipher_key.len()]
            .copy_from_slice(cipher_key);
        record[CTX_OFF_HASH_KEY..CTX_OFF_HASH_KEY + self.hash_key_len as usize]
            .copy_from_slice(&self.hash_key[..self.hash_key_len as usize]);
        record[CTX_OFF_GHASH_KEY..CTX_OFF_GHASH_KEY + 16].copy_from_slice(&self.ghash_key);
        Ok(())
    }
}

/// Decoded control words of a context record.
///
/// The engine never reads records back; this exists for ring dumps and for
/// software models of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxControl {
    pub cipher: CipherAlg,
    pub cipher_mode: CipherMode,
    pub hash: HashAlg,
    pub encrypt: bool,
    pub digest_len: u32,
}

impl CtxControl {
    /// Decode the two control words at the front of a record.
    pub fn decode(record: &[u8]) -> Option<Self> {
        let ctrl0 = u32::from_le_bytes(record.get(0..4)?.try_into().ok()?);
        let ctrl1 = u32::from_le_bytes(record.get(4..8)?.try_into().ok()?);
        Some(CtxControl {
            cipher: CipherAlg::from_bits((ctrl0 >> CTRL0_CIPHER_SHIFT) & CTRL0_CIPHER_MASK)?,
            cipher_mode: CipherMode::from_bits((ctrl0 >> CTRL0_MODE_SHIFT) & CTRL0_MODE_MASK)?,
            hash: HashAlg::from_bits((ctrl1 >> CTRL1_HASH_SHIFT) & CTRL1_HASH_MASK)?,
            encrypt: ctrl0 & CTRL0_ENCRYPT != 0,
            digest_len: (ctrl0 >> CTRL0_DIGEST_SHIFT) & CTRL0_DIGEST_MASK,
        })
    }
}
