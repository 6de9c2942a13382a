use crate::pool::BufferPool;
use crate::pool::PooledBuf;
use crate::reader::PacketReader;

/// One decrypted game packet: a pooled buffer plus the authoritative
/// logical length of the bytes inside it.
///
/// A `Packet` is the single owner of its buffer. Moving it transfers the
/// buffer; dropping it returns the buffer to the pool. The first two bytes
/// are the opcode, little-endian.
pub struct Packet {
    buf: PooledBuf,
    len: usize,
}

impl Packet {
    /// Wrap a rented buffer. The logical length is clamped to what the
    /// buffer actually holds.
    pub fn from_buf(buf: PooledBuf) -> Self {
        let len = buf.len();
        Self { buf, len }
    }

    /// Copy `data` into a freshly rented buffer.
    pub fn copy_from(pool: &BufferPool, data: &[u8]) -> Self {
        let mut buf = pool.rent(data.len());
        buf.as_mut_vec().extend_from_slice(data);
        Self::from_buf(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The leading opcode, if the packet is long enough to carry one.
    pub fn opcode(&self) -> Option<u16> {
        let b = self.as_slice();
        if b.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(self.as_slice())
    }

    /// Copy the payload out without giving up ownership of the buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len)
            .field("opcode", &self.opcode())
            .finish()
    }
}
