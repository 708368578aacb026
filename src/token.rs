//! Instruction token compiler.
//!
//! Every packet the engine processes is driven by a token: a short program of
//! fixed-size micro-instructions telling the packet engine how to route the
//! input stream between the cipher unit, the hash unit, and the output
//! stream, plus any immediate data injected into those streams (CCM
//! authentication blocks, zero padding). Compilation is a pure function of
//! the operation parameters into a caller-provided [`TokenBuf`]: no I/O, no
//! allocation.
//!
//! Instruction word layout:
//!
//! ```text
//! Bits 31..28: opcode
//! Bits 27..19: instruction flags (destinations, insert source)
//! Bits 18..17: status (last-hash, last-packet)
//! Bits 16..0:  length
//! ```
//!
//! Immediate data follows its insert instruction in the word stream,
//! little-endian packed and zero-padded to a word boundary.

use crate::context::Direction;
use crate::descr::{INLINE_TOKEN_WORDS, TOKEN_HEADER_WORDS};
use crate::error::Error;
use crate::session::OpMode;

/// Auxiliary token buffer capacity in words (per request slot). Bounds the
/// worst-case CCM token with maximal padding immediates.
pub const MAX_TOKEN_WORDS: usize = 64;

pub const INSTR_LEN_MASK: u32 = 0x1ffff;
/// This instruction carries the final bytes seen by the hash unit.
pub const STAT_LAST_HASH: u32 = 1 << 17;
/// This instruction ends the packet.
pub const STAT_LAST_PACKET: u32 = 1 << 18;
/// Route the bytes through the cipher unit.
pub const INS_DEST_CIPHER: u32 = 1 << 19;
/// Route the bytes through the hash unit.
pub const INS_DEST_HASH: u32 = 1 << 20;
/// Emit the bytes on the output stream.
pub const INS_DEST_OUTPUT: u32 = 1 << 21;
/// Insert source: immediate words following this instruction.
pub const INS_IMMEDIATE: u32 = 1 << 22;
/// Insert source: the hash unit's digest.
pub const INS_HASH_DIGEST: u32 = 1 << 23;

const OPCODE_SHIFT: u32 = 28;

/// Token instruction opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Move `len` input bytes to the flagged destinations.
    Direction = 0x0,
    /// Insert `len` bytes from the flagged source into the flagged streams.
    Insert = 0x2,
    /// Strip `len` engine-generated bytes from the result stream; paired with
    /// an insert to reserve scratch space.
    RemoveResult = 0xa,
    /// Compare `len` input bytes against the hash unit's digest; failure
    /// raises the authentication error bit.
    Verify = 0xd,
    /// Padding slot, no effect.
    Noop = 0xe,
}

impl Opcode {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Direction),
            0x2 => Some(Opcode::Insert),
            0xa => Some(Opcode::RemoveResult),
            0xd => Some(Opcode::Verify),
            0xe => Some(Opcode::Noop),
            _ => None,
        }
    }
}

/// Encode one instruction word.
pub fn instr(op: Opcode, len: u32, flags: u32) -> u32 {
    debug_assert!(len <= INSTR_LEN_MASK, "instruction length overflow");
    ((op as u32) << OPCODE_SHIFT) | flags | (len & INSTR_LEN_MASK)
}

/// Decoded view of one instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr(pub u32);

impl Instr {
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_bits(self.0 >> OPCODE_SHIFT)
    }

    pub fn len(self) -> u32 {
        self.0 & INSTR_LEN_MASK
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Words of trailing immediate data for this instruction.
    pub fn imm_words(self) -> usize {
        if self.opcode() == Some(Opcode::Insert) && self.has(INS_IMMEDIATE) {
            (self.len() as usize).div_ceil(4)
        } else {
            0
        }
    }
}

/// Fixed-capacity token under construction: the 16-byte header plus the
/// instruction/immediate word stream.
pub struct TokenBuf {
    header: [u32; TOKEN_HEADER_WORDS],
    words: [u32; MAX_TOKEN_WORDS],
    len: usize,
}

impl TokenBuf {
    pub fn new() -> Self {
        TokenBuf {
            header: [0; TOKEN_HEADER_WORDS],
            words: [0; MAX_TOKEN_WORDS],
            len: 0,
        }
    }

    /// The per-packet header block (IV / counter / authentication block).
    pub fn header(&self) -> &[u32; TOKEN_HEADER_WORDS] {
        &self.header
    }

    /// The compiled instruction and immediate words.
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    /// Whether the word stream fits inline in a command descriptor.
    pub fn fits_inline(&self) -> bool {
        self.len <= INLINE_TOKEN_WORDS
    }

    fn clear(&mut self) {
        self.header = [0; TOKEN_HEADER_WORDS];
        self.len = 0;
    }

    fn set_header_block(&mut self, block: &[u8; 16]) {
        for (i, chunk) in block.chunks_exact(4).enumerate() {
            self.header[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
    }

    fn push(&mut self, word: u32) -> Result<(), Error> {
        if self.len == MAX_TOKEN_WORDS {
            return Err(Error::InvalidRequest("token overflow"));
        }
        self.words[self.len] = word;
        self.len += 1;
        Ok(())
    }

    /// Append immediate data, little-endian packed and zero-padded to a word.
    fn push_imm(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for chunk in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.push(u32::from_le_bytes(word))?;
        }
        Ok(())
    }
}

impl Default for TokenBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-operation inputs to token compilation.
pub(crate) struct TokenParams<'a> {
    pub(crate) dir: Direction,
    pub(crate) aad_len: u32,
    pub(crate) payload_len: u32,
    /// Resolved tag length: the session's configured value unless overridden
    /// per operation.
    pub(crate) digest_len: u32,
    pub(crate) iv: &'a [u8],
}

/// Per-mode token builder, selected once at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenCompiler {
    Cipher,
    Eta,
    Hash,
    Gcm,
    Gmac,
    Ccm,
}

impl TokenCompiler {
    pub(crate) fn for_mode(mode: OpMode) -> Self {
        match mode {
            OpMode::Cipher => TokenCompiler::Cipher,
            OpMode::Eta => TokenCompiler::Eta,
            OpMode::Hash => TokenCompiler::Hash,
            OpMode::Gcm => TokenCompiler::Gcm,
            OpMode::Gmac => TokenCompiler::Gmac,
            OpMode::Ccm => TokenCompiler::Ccm,
        }
    }

    /// Compile the token for one operation into `out`.
    pub(crate) fn compile(self, p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
        out.clear();
        match self {
            TokenCompiler::Cipher => compile_cipher(p, out),
            TokenCompiler::Eta => compile_eta(p, out),
            TokenCompiler::Hash => compile_hash(p, out),
            TokenCompiler::Gcm => compile_gcm(p, out, false),
            TokenCompiler::Gmac => compile_gcm(p, out, true),
            TokenCompiler::Ccm => compile_ccm(p, out),
        }
    }
}

fn block_iv(iv: &[u8]) -> Result<[u8; 16], Error> {
    iv.try_into().map_err(|_| Error::InvalidRequest("IV must be 16 bytes"))
}

/// Terminal digest instruction: insert on encrypt, verify on decrypt. Always
/// the one instruction carrying both last-status bits.
fn push_terminal(p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
    match p.dir {
        Direction::Encrypt => out.push(instr(
            Opcode::Insert,
            p.digest_len,
            STAT_LAST_HASH | STAT_LAST_PACKET | INS_HASH_DIGEST | INS_DEST_OUTPUT,
        )),
        Direction::Decrypt => out.push(instr(
            Opcode::Verify,
            p.digest_len,
            STAT_LAST_HASH | STAT_LAST_PACKET,
        )),
    }
}

fn compile_cipher(p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
    out.set_header_block(&block_iv(p.iv)?);
    out.push(instr(
        Opcode::Direction,
        p.payload_len,
        STAT_LAST_HASH | STAT_LAST_PACKET | INS_DEST_CIPHER | INS_DEST_OUTPUT,
    ))
}

fn compile_eta(p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
    out.set_header_block(&block_iv(p.iv)?);
    if p.aad_len > 0 {
        out.push(instr(Opcode::Direction, p.aad_len, INS_DEST_HASH))?;
    }
    if p.payload_len > 0 {
        out.push(instr(
            Opcode::Direction,
            p.payload_len,
            INS_DEST_CIPHER | INS_DEST_HASH | INS_DEST_OUTPUT,
        ))?;
    }
    push_terminal(p, out)
}

fn compile_hash(p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
    if p.dir != Direction::Encrypt {
        return Err(Error::InvalidRequest("hash operations only generate digests"));
    }
    out.push(instr(Opcode::Direction, p.payload_len, INS_DEST_HASH))?;
    out.push(instr(
        Opcode::Insert,
        p.digest_len,
        STAT_LAST_HASH | STAT_LAST_PACKET | INS_HASH_DIGEST | INS_DEST_OUTPUT,
    ))?;
    // The engine requires hash-only tokens to fill the inline slots.
    while out.words().len() < INLINE_TOKEN_WORDS {
        out.push(instr(Opcode::Noop, 0, 0))?;
    }
    Ok(())
}

/// Reserve one cipher-block scratch region in the result stream. The insert
/// carries no source flag: the engine materializes the block itself.
fn push_temp_block(out: &mut TokenBuf) -> Result<(), Error> {
    out.push(instr(Opcode::RemoveResult, 16, 0))?;
    out.push(instr(Opcode::Insert, 16, INS_DEST_OUTPUT))
}

fn compile_gcm(p: &TokenParams<'_>, out: &mut TokenBuf, gmac: bool) -> Result<(), Error> {
    if p.iv.len() != 12 {
        return Err(Error::InvalidRequest("GCM IV must be 12 bytes"));
    }
    if gmac && p.payload_len != 0 {
        return Err(Error::InvalidRequest("GMAC carries no payload"));
    }
    // Per-packet counter block: IV || 1.
    let mut block = [0u8; 16];
    block[..12].copy_from_slice(p.iv);
    block[12..].copy_from_slice(&1u32.to_be_bytes());
    out.set_header_block(&block);

    if p.aad_len > 0 {
        out.push(instr(Opcode::Direction, p.aad_len, INS_DEST_HASH))?;
    }
    push_temp_block(out)?;
    if !gmac && p.payload_len > 0 {
        out.push(instr(
            Opcode::Direction,
            p.payload_len,
            INS_DEST_CIPHER | INS_DEST_HASH | INS_DEST_OUTPUT,
        ))?;
    }
    push_terminal(p, out)
}

/// Zero padding routed to the hash unit, aligning a CCM authenticated region
/// to the cipher block size. Omitted entirely when already aligned.
fn push_hash_pad(region_len: u32, out: &mut TokenBuf) -> Result<(), Error> {
    let rem = (region_len % 16) as usize;
    if rem == 0 {
        return Ok(());
    }
    let pad = 16 - rem;
    out.push(instr(Opcode::Insert, pad as u32, INS_IMMEDIATE | INS_DEST_HASH))?;
    out.push_imm(&[0u8; 16][..pad])
}

fn compile_ccm(p: &TokenParams<'_>, out: &mut TokenBuf) -> Result<(), Error> {
    let nonce = p.iv;
    if !(7..=13).contains(&nonce.len()) {
        return Err(Error::InvalidRequest("CCM nonce must be 7..=13 bytes"));
    }
    if !(4..=16).contains(&p.digest_len) || p.digest_len % 2 != 0 {
        return Err(Error::InvalidRequest("CCM tag must be an even 4..=16 bytes"));
    }
    let l = 15 - nonce.len();
    if l < 4 && (p.payload_len as u64) >= 1u64 << (8 * l) {
        return Err(Error::InvalidRequest("CCM payload too long for nonce length"));
    }

    // A0: counter block with a zeroed counter field, used for the packet's
    // keystream and the tag mask.
    let mut a0 = [0u8; 16];
    a0[0] = (l - 1) as u8;
    a0[1..1 + nonce.len()].copy_from_slice(nonce);
    out.set_header_block(&a0);

    // B0: first authentication block, carrying the flags and payload length.
    let mut b0 = [0u8; 16];
    b0[0] = (l - 1) as u8 | (((p.digest_len as u8 - 2) / 2) << 3);
    if p.aad_len > 0 {
        b0[0] |= 1 << 6;
    }
    b0[1..1 + nonce.len()].copy_from_slice(nonce);
    let len_bytes = (p.payload_len as u64).to_be_bytes();
    b0[16 - l..].copy_from_slice(&len_bytes[8 - l..]);

    // In-stream authentication block: B0, then the 2-byte big-endian AAD
    // length prefix when AAD is present.
    let mut imm = [0u8; 18];
    imm[..16].copy_from_slice(&b0);
    let imm_len = if p.aad_len > 0 {
        imm[16..].copy_from_slice(&(p.aad_len as u16).to_be_bytes());
        18
    } else {
        16
    };
    out.push(instr(Opcode::Insert, imm_len as u32, INS_IMMEDIATE | INS_DEST_HASH))?;
    out.push_imm(&imm[..imm_len])?;

    if p.aad_len > 0 {
        out.push(instr(Opcode::Direction, p.aad_len, INS_DEST_HASH))?;
        push_hash_pad(2 + p.aad_len, out)?;
    }
    if p.payload_len > 0 {
        out.push(instr(
            Opcode::Direction,
            p.payload_len,
            INS_DEST_CIPHER | INS_DEST_HASH | INS_DEST_OUTPUT,
        ))?;
        push_hash_pad(p.payload_len, out)?;
    }
    push_terminal(p, out)
}
