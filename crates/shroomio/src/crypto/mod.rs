//! The cipher stack: rolling round keys, the version-bound header codec,
//! and the per-direction composition of scramble + keystream.

pub mod ig;
pub mod shanda;
pub mod stream;

use std::sync::Arc;

use crate::crypto::ig::IgContext;
use crate::crypto::ig::DEFAULT_IG;
use crate::crypto::stream::KeystreamCipher;
use crate::crypto::stream::DEFAULT_STREAM_KEY;
use crate::NetError;
use crate::MAX_PACKET_LEN;

/// A 32-bit rolling key. Value semantics; advancing it yields a new key
/// and happens exactly once per encrypted or decrypted packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RoundKey(u32);

impl RoundKey {
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(b))
    }

    pub fn random() -> Self {
        let mut b = [0u8; 4];
        getrandom::getrandom(&mut b).expect("getrandom");
        Self::from_bytes(b)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// The 16-byte keystream seed: the key's little-endian bytes, four
    /// times over.
    pub fn expand(self) -> [u8; 16] {
        let b = self.to_bytes();
        let mut out = [0u8; 16];
        for chunk in out.chunks_exact_mut(4) {
            chunk.copy_from_slice(&b);
        }
        out
    }

    /// The 16-bit header integrity key, taken from the high half.
    pub fn header_key(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn update(self, ctx: &IgContext) -> Self {
        Self(ctx.next_key(self.0))
    }
}

/// The protocol version word. Send and receive directions are bound to
/// the version and its 16-bit complement respectively; [`NetCipher`]
/// computes which one applies, never its callers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ShroomVersion(u16);

impl ShroomVersion {
    pub const fn new(v: u16) -> Self {
        Self(v)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn invert(self) -> Self {
        Self(!self.0)
    }
}

/// Which way packets flow through a cipher state, from the local peer's
/// point of view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dir {
    Send,
    Recv,
}

/// Which side of the handshake the local peer is. The accepting side's
/// send direction pairs with the initiating side's receive direction, so
/// the two of them share the inverted version word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Client,
    Server,
}

/// Immutable per-process cipher material: the keystream primitive and the
/// key-schedule table.
pub struct CryptoContext {
    pub(crate) stream: KeystreamCipher,
    pub(crate) ig: IgContext,
}

impl CryptoContext {
    pub fn new(stream_key: &[u8; 32]) -> Arc<Self> {
        Arc::new(Self {
            stream: KeystreamCipher::new(stream_key),
            ig: DEFAULT_IG,
        })
    }

    pub fn default_keys() -> Arc<Self> {
        Self::new(&DEFAULT_STREAM_KEY)
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoContext")
    }
}

/// One direction's cipher state: the current round key and the
/// direction-bound version word.
pub struct NetCipher {
    key: RoundKey,
    version: u16,
    ctx: Arc<CryptoContext>,
}

impl NetCipher {
    /// Build the state for one direction. Whether the version word gets
    /// inverted follows from role and direction; callers never compute it.
    pub fn new(
        key: RoundKey,
        version: ShroomVersion,
        role: Role,
        dir: Dir,
        ctx: Arc<CryptoContext>,
    ) -> Self {
        let inverted = matches!((role, dir), (Role::Server, Dir::Send) | (Role::Client, Dir::Recv));
        let version = if inverted {
            version.invert().raw()
        } else {
            version.raw()
        };
        Self { key, version, ctx }
    }

    pub fn round_key(&self) -> RoundKey {
        self.key
    }

    /// Encode the 4-byte frame header for a payload of `len` bytes using
    /// the current key.
    pub fn encode_header(&self, len: u16) -> [u8; 4] {
        let low = self.key.header_key() ^ self.version;
        let high = low ^ len;
        (u32::from(low) | (u32::from(high) << 16)).to_le_bytes()
    }

    /// Decode a frame header, failing on a key mismatch. A mismatch is
    /// indistinguishable from a desynced cipher; callers close the
    /// connection.
    pub fn decode_header(&self, raw: [u8; 4]) -> Result<u16, NetError> {
        self.try_decode_header(raw).ok_or(NetError::InvalidHeader)
    }

    /// Lenient header decode: `None` instead of an error on mismatch.
    pub fn try_decode_header(&self, raw: [u8; 4]) -> Option<u16> {
        let word = u32::from_le_bytes(raw);
        let low = word as u16;
        let high = (word >> 16) as u16;
        if low ^ self.version != self.key.header_key() {
            return None;
        }
        Some(low ^ high)
    }

    /// Scramble, keystream, then advance the key.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        shanda::encrypt(data);
        self.ctx.stream.apply(self.key, data);
        self.key = self.key.update(&self.ctx.ig);
    }

    /// Keystream, advance the key, then unscramble.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.ctx.stream.apply(self.key, data);
        self.key = self.key.update(&self.ctx.ig);
        shanda::decrypt(data);
    }
}

impl std::fmt::Debug for NetCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetCipher")
            .field("key", &self.key)
            .field("version", &self.version)
            .finish()
    }
}

/// Reject impossible payload lengths before any buffer is rented.
pub fn check_frame_len(len: usize) -> Result<(), NetError> {
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(NetError::FrameLength(len));
    }
    Ok(())
}
