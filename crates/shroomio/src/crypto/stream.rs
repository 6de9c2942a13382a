use aes::cipher::generic_array::GenericArray;
use aes::cipher::BlockEncrypt;
use aes::cipher::KeyInit;
use aes::Aes256;

use crate::crypto::RoundKey;

/// The fixed 256-bit key the legacy client ships with. Only every fourth
/// byte is significant; the rest are zero.
pub const DEFAULT_STREAM_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

/// First fragment of a payload; leaves room for the 4-byte frame header
/// inside one legacy TCP segment.
const FIRST_FRAGMENT: usize = 1456;
/// Every fragment after the first.
const FRAGMENT: usize = 1460;

/// AES-ECB driven as an OFB keystream.
///
/// The round key expands to a 16-byte seed; each fragment restarts from
/// that seed and re-encrypts it per 16-byte block, XORing the block into
/// the payload. A partial tail block consumes only as many keystream bytes
/// as the payload has left. Applying it twice with the same key is the
/// identity, so encrypt and decrypt are the same call.
pub struct KeystreamCipher {
    aes: Aes256,
}

impl KeystreamCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            aes: Aes256::new(GenericArray::from_slice(key)),
        }
    }

    pub fn apply(&self, key: RoundKey, data: &mut [u8]) {
        let seed = key.expand();
        let mut offset = 0;
        let mut fragment = FIRST_FRAGMENT;
        while offset < data.len() {
            let end = (offset + fragment).min(data.len());
            self.apply_fragment(&seed, &mut data[offset..end]);
            offset = end;
            fragment = FRAGMENT;
        }
    }

    fn apply_fragment(&self, seed: &[u8; 16], chunk: &mut [u8]) {
        let mut block = GenericArray::clone_from_slice(seed);
        for part in chunk.chunks_mut(16) {
            self.aes.encrypt_block(&mut block);
            for (b, k) in part.iter_mut().zip(block.iter()) {
                *b ^= k;
            }
        }
    }
}

impl Default for KeystreamCipher {
    fn default() -> Self {
        Self::new(&DEFAULT_STREAM_KEY)
    }
}

impl std::fmt::Debug for KeystreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeystreamCipher")
    }
}
