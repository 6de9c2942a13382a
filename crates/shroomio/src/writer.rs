use std::time::Duration;

use crate::packet::Packet;
use crate::pool::BufferPool;
use crate::pool::PooledBuf;
use crate::NetError;

/// Typed encode for composite wire messages.
pub trait NetEncode {
    fn encode(&self, w: &mut PacketWriter) -> Result<(), NetError>;
}

/// Builds a packet in a rented buffer, little-endian throughout.
///
/// The terminal [`into_packet`](PacketWriter::into_packet) hands the buffer
/// to the [`Packet`] without copying.
pub struct PacketWriter {
    buf: PooledBuf,
}

impl PacketWriter {
    pub fn new(pool: &BufferPool) -> Self {
        Self::with_capacity(pool, 64)
    }

    pub fn with_capacity(pool: &BufferPool, cap: usize) -> Self {
        Self {
            buf: pool.rent(cap),
        }
    }

    /// Start a packet with its opcode already written.
    pub fn with_opcode(pool: &BufferPool, opcode: u16) -> Self {
        let mut w = Self::new(pool);
        w.write_u16(opcode);
        w
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.as_mut_vec().extend_from_slice(data);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u128(&mut self, v: u128) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i128(&mut self, v: i128) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    /// Length-prefixed Latin-1 string (i16 prefix).
    pub fn write_str(&mut self, s: &str) -> Result<(), NetError> {
        let bytes = latin1_bytes(s)?;
        if bytes.len() > i16::MAX as usize {
            return Err(NetError::StringTooLong {
                len: bytes.len(),
                max: i16::MAX as usize,
            });
        }
        self.write_i16(bytes.len() as i16);
        self.write_bytes(&bytes);
        Ok(())
    }

    /// Exactly the string's Latin-1 bytes, no prefix.
    pub fn write_fixed_str(&mut self, s: &str) -> Result<(), NetError> {
        let bytes = latin1_bytes(s)?;
        self.write_bytes(&bytes);
        Ok(())
    }

    /// Fixed-size field: the value, a NUL, then zero padding out to `n`.
    /// Fails if the value plus its trailing NUL does not fit.
    pub fn write_padded_str(&mut self, s: &str, n: usize) -> Result<(), NetError> {
        let bytes = latin1_bytes(s)?;
        if bytes.len() + 1 > n {
            return Err(NetError::StringTooLong {
                len: bytes.len(),
                max: n.saturating_sub(1),
            });
        }
        self.write_bytes(&bytes);
        for _ in bytes.len()..n {
            self.write_u8(0);
        }
        Ok(())
    }

    pub fn write_duration_ms16(&mut self, d: Duration) {
        self.write_u16(d.as_millis().min(u128::from(u16::MAX)) as u16);
    }

    pub fn write_duration_ms32(&mut self, d: Duration) {
        self.write_u32(d.as_millis().min(u128::from(u32::MAX)) as u32);
    }

    pub fn encode<T: NetEncode>(&mut self, v: &T) -> Result<(), NetError> {
        v.encode(self)
    }

    /// Finalise the written bytes into a [`Packet`]. The buffer moves; no
    /// copy happens.
    pub fn into_packet(self) -> Packet {
        Packet::from_buf(self.buf)
    }
}

fn latin1_bytes(s: &str) -> Result<Vec<u8>, NetError> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        let cp = c as u32;
        if cp > 0xFF {
            return Err(NetError::NonLatin1(c));
        }
        out.push(cp as u8);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> &'static BufferPool {
        BufferPool::global()
    }

    #[test]
    fn writer_mirrors_reader() {
        let mut w = PacketWriter::new(pool());
        w.write_u8(7);
        w.write_i16(-2);
        w.write_u32(0xdead_beef);
        w.write_u64(42);
        w.write_u128(1 << 100);
        w.write_bool(true);
        w.write_str("Hello World").unwrap();
        w.write_duration_ms32(Duration::from_millis(1500));
        let pkt = w.into_packet();

        let mut r = pkt.reader();
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), 42);
        assert_eq!(r.read_u128().unwrap(), 1 << 100);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_str().unwrap(), "Hello World");
        assert_eq!(r.read_duration_ms32().unwrap(), Duration::from_millis(1500));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn padded_string_rejects_overflow() {
        let mut w = PacketWriter::new(pool());
        // 12 chars + NUL does not fit in 12.
        assert!(matches!(
            w.write_padded_str("abcdefghijkl", 12),
            Err(NetError::StringTooLong { .. })
        ));
        w.write_padded_str("abcdefghijk", 12).unwrap();
        let pkt = w.into_packet();
        assert_eq!(pkt.len(), 12);
        assert_eq!(pkt.reader().read_padded_str(12).unwrap(), "abcdefghijk");
    }

    #[test]
    fn non_latin1_is_rejected() {
        let mut w = PacketWriter::new(pool());
        assert!(matches!(w.write_str("日本"), Err(NetError::NonLatin1(_))));
    }

    #[test]
    fn opcode_constructor_writes_the_leading_word() {
        let w = PacketWriter::with_opcode(pool(), 0x012c);
        let pkt = w.into_packet();
        assert_eq!(pkt.opcode(), Some(0x012c));
    }
}
