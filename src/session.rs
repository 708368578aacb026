//! Sessions: long-lived algorithm and key bindings.
//!
//! A session fixes the algorithm pair, the key-material template, and the
//! ring the work runs on. The ring assignment is made round-robin at creation
//! and never changes, so one operation's whole lifetime touches a single
//! lock. The token compiler variant is also chosen here, once, instead of
//! being re-dispatched per request.

use std::sync::Arc;

use crate::completion::CompletionHandler;
use crate::context::{CipherAlg, CipherMode, ContextTemplate, HashAlg};
use crate::error::Error;
use crate::ring::RingId;
use crate::token::TokenCompiler;

/// Operation shape bound by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// Cipher only (CBC/CTR), no digest.
    Cipher,
    /// Encrypt-then-authenticate on encrypt, authenticate-then-decrypt on
    /// decrypt (cipher + keyed hash over AAD and ciphertext).
    Eta,
    /// Digest generation only, no cipher.
    Hash,
    /// AEAD counter mode.
    Gcm,
    /// GCM authentication only: all data is AAD, no payload.
    Gmac,
    /// AEAD CCM.
    Ccm,
}

impl OpMode {
    /// Whether the mode produces or verifies an authentication tag.
    pub fn authenticated(self) -> bool {
        !matches!(self, OpMode::Cipher)
    }

    /// Whether the mode writes transformed payload to the result stream.
    pub fn produces_payload(self) -> bool {
        matches!(self, OpMode::Cipher | OpMode::Eta | OpMode::Gcm | OpMode::Ccm)
    }

    /// Whether the mode accepts additional authenticated data.
    pub fn uses_aad(self) -> bool {
        matches!(self, OpMode::Eta | OpMode::Gcm | OpMode::Gmac | OpMode::Ccm)
    }

    /// Whether the mode drives the cipher unit.
    pub fn uses_cipher(self) -> bool {
        !matches!(self, OpMode::Hash)
    }
}

/// Parameters for [`PacketEngine::create_session`](crate::engine::PacketEngine::create_session).
///
/// Key material arrives already expanded: AES keys as raw key bytes for the
/// cipher unit, HMAC/XCBC key blocks for the hash unit, and the GHASH subkey
/// (`E_K(0^128)`) for GCM/GMAC sessions. Key-schedule math happens in the
/// caller's key layer, not here.
pub struct SessionParams<'a> {
    pub mode: OpMode,
    pub cipher: CipherAlg,
    pub cipher_mode: CipherMode,
    pub hash: HashAlg,
    pub cipher_key: &'a [u8],
    pub hash_key: &'a [u8],
    pub ghash_key: &'a [u8],
    /// Digest bytes produced/verified per operation. Overridable per request.
    pub tag_len: u8,
    pub handler: Arc<dyn CompletionHandler>,
}

/// A live session. Created by the engine, shared via `Arc`; in-flight
/// requests hold a clone, so dropping the last handle after quiescence is the
/// teardown path.
pub struct Session {
    pub(crate) ring: RingId,
    pub(crate) mode: OpMode,
    pub(crate) compiler: TokenCompiler,
    pub(crate) tpl: ContextTemplate,
    pub(crate) tag_len: u8,
    pub(crate) handler: Arc<dyn CompletionHandler>,
}

impl Session {
    /// Validate parameters and build the session, pinned to `ring`.
    pub(crate) fn build(params: SessionParams<'_>, ring: RingId) -> Result<Self, Error> {
        let SessionParams {
            mode,
            cipher,
            cipher_mode,
            hash,
            cipher_key,
            hash_key,
            ghash_key,
            tag_len,
            handler,
        } = params;

        match mode {
            OpMode::Cipher | OpMode::Eta => {
                if cipher == CipherAlg::None
                    || !matches!(cipher_mode, CipherMode::Cbc | CipherMode::Ctr)
                {
                    return Err(Error::InvalidSession("mode requires a CBC/CTR cipher"));
                }
            }
            OpMode::Hash => {
                if cipher != CipherAlg::None || cipher_mode != CipherMode::None {
                    return Err(Error::InvalidSession("hash sessions take no cipher"));
                }
            }
            OpMode::Gcm | OpMode::Gmac => {
                if cipher == CipherAlg::None || cipher_mode != CipherMode::Gcm {
                    return Err(Error::InvalidSession("GCM requires an AES/GCM cipher"));
                }
                if hash != HashAlg::Ghash {
                    return Err(Error::InvalidSession("GCM requires the GHASH unit"));
                }
                if ghash_key.len() != 16 {
                    return Err(Error::InvalidSession("GHASH subkey must be 16 bytes"));
                }
            }
            OpMode::Ccm => {
                if cipher == CipherAlg::None || cipher_mode != CipherMode::Ccm {
                    return Err(Error::InvalidSession("CCM requires an AES/CCM cipher"));
                }
                if hash != HashAlg::CbcMac {
                    return Err(Error::InvalidSession("CCM requires the CBC-MAC unit"));
                }
            }
        }

        if cipher_key.len() != cipher.key_len() {
            return Err(Error::InvalidSession("cipher key length"));
        }
        match mode {
            OpMode::Cipher => {
                if hash != HashAlg::None || tag_len != 0 {
                    return Err(Error::InvalidSession("cipher sessions take no digest"));
                }
            }
            _ => {
                if hash == HashAlg::None {
                    return Err(Error::InvalidSession("mode requires a hash algorithm"));
                }
                if tag_len == 0 || tag_len as u32 > hash.digest_len() {
                    return Err(Error::InvalidSession("tag length out of range"));
                }
            }
        }
        if hash.keyed() && hash != HashAlg::Ghash && hash != HashAlg::CbcMac && hash_key.is_empty()
        {
            return Err(Error::InvalidSession("keyed hash needs key material"));
        }
        if hash_key.len() > crate::context::CTX_HASH_KEY_MAX {
            return Err(Error::InvalidSession("hash key too long"));
        }

        let mut tpl = ContextTemplate {
            cipher,
            cipher_mode,
            hash,
            cipher_key: [0; crate::context::CTX_CIPHER_KEY_MAX],
            cipher_key_len: cipher_key.len() as u8,
            hash_key: [0; crate::context::CTX_HASH_KEY_MAX],
            hash_key_len: hash_key.len() as u8,
            ghash_key: [0; 16],
        };
        tpl.cipher_key[..cipher_key.len()].copy_from_slice(cipher_key);
        tpl.hash_key[..hash_key.len()].copy_from_slice(hash_key);
        if ghash_key.len() == 16 {
            tpl.ghash_key.copy_from_slice(ghash_key);
        }

        Ok(Session {
            ring,
            mode,
            compiler: TokenCompiler::for_mode(mode),
            tpl,
            tag_len,
            handler,
        })
    }

    /// The ring this session's requests run on.
    pub fn ring(&self) -> RingId {
        self.ring
    }

    /// The session's operation mode.
    pub fn mode(&self) -> OpMode {
        self.mode
    }

    /// The configured tag length in bytes.
    pub fn tag_len(&self) -> u8 {
        self.tag_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Outcome;

    struct NopHandler;

    impl CompletionHandler for NopHandler {
        fn complete(&self, _cookie: u64, _outcome: Outcome) {}
    }

    fn gcm_params<'a>(key: &'a [u8], ghash: &'a [u8], tag: u8) -> SessionParams<'a> {
        // Borrows both slices with the same lifetime.
        SessionParams {
            mode: OpMode::Gcm,
            cipher: CipherAlg::Aes256,
            cipher_mode: CipherMode::Gcm,
            hash: HashAlg::Ghash,
            cipher_key: key,
            hash_key: &[],
            ghash_key: ghash,
            tag_len: tag,
            handler: Arc::new(NopHandler),
        }
    }

    #[test]
    fn gcm_session_builds() {
        let key = [0u8; 32];
        let ghash = [0u8; 16];
        let s = Session::build(gcm_params(&key, &ghash, 16), 3).unwrap();
        assert_eq!(s.ring(), 3);
        assert_eq!(s.mode(), OpMode::Gcm);
        assert_eq!(s.tag_len(), 16);
    }

    #[test]
    fn gcm_rejects_wrong_key_length() {
        let key = [0u8; 24];
        let ghash = [0u8; 16];
        assert!(Session::build(gcm_params(&key, &ghash, 16), 0).is_err());
    }

    #[test]
    fn gcm_rejects_missing_ghash_subkey() {
        let key = [0u8; 32];
        assert!(Session::build(gcm_params(&key, &[], 16), 0).is_err());
    }

    #[test]
    fn tag_len_bounded_by_digest() {
        let key = [0u8; 32];
        let ghash = [0u8; 16];
        assert!(Session::build(gcm_params(&key, &ghash, 17), 0).is_err());
        assert!(Session::build(gcm_params(&key, &ghash, 0), 0).is_err());
    }

    #[test]
    fn cipher_session_rejects_digest() {
        let key = [0u8; 16];
        let params = SessionParams {
            mode: OpMode::Cipher,
            cipher: CipherAlg::Aes128,
            cipher_mode: CipherMode::Cbc,
            hash: HashAlg::None,
            cipher_key: &key,
            hash_key: &[],
            ghash_key: &[],
            tag_len: 16,
            handler: Arc::new(NopHandler),
        };
        assert!(Session::build(params, 0).is_err());
    }

    #[test]
    fn eta_requires_keyed_hash_material() {
        let key = [0u8; 16];
        let params = SessionParams {
            mode: OpMode::Eta,
            cipher: CipherAlg::Aes128,
            cipher_mode: CipherMode::Cbc,
            hash: HashAlg::HmacSha256,
            cipher_key: &key,
            hash_key: &[],
            ghash_key: &[],
            tag_len: 16,
            handler: Arc::new(NopHandler),
        };
        assert!(Session::build(params, 0).is_err());
    }
}
