use std::time::Duration;

use crate::NetError;

/// Typed decode for composite wire messages.
pub trait NetDecode: Sized {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, NetError>;
}

/// Little-endian cursor over a packet's bytes.
///
/// Every accessor checks the remaining length first and fails with
/// [`NetError::TooShort`] rather than slicing out of range. Strings are
/// Latin-1: each byte maps to the Unicode code point of the same value.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], NetError> {
        if self.remaining() < n {
            return Err(NetError::TooShort {
                need: n,
                got: self.remaining(),
            });
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], NetError> {
        let s = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(s);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, NetError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, NetError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, NetError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, NetError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, NetError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, NetError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, NetError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, NetError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, NetError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn read_i128(&mut self) -> Result<i128, NetError> {
        Ok(i128::from_le_bytes(self.read_array()?))
    }

    /// A boolean is any nonzero byte.
    pub fn read_bool(&mut self) -> Result<bool, NetError> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed Latin-1 string: i16 length, negative is a format
    /// error, zero is the empty string.
    pub fn read_str(&mut self) -> Result<String, NetError> {
        let len = self.read_i16()?;
        if len < 0 {
            return Err(NetError::NegativeLength(len));
        }
        self.read_latin1(len as usize)
    }

    /// Exactly `n` Latin-1 bytes, no prefix.
    pub fn read_fixed_str(&mut self, n: usize) -> Result<String, NetError> {
        self.read_latin1(n)
    }

    /// Fixed field read as a zero-padded string: the value ends at the
    /// first NUL byte.
    pub fn read_padded_str(&mut self, n: usize) -> Result<String, NetError> {
        let raw = self.read_bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(n);
        Ok(raw[..end].iter().map(|&b| b as char).collect())
    }

    fn read_latin1(&mut self, n: usize) -> Result<String, NetError> {
        let raw = self.read_bytes(n)?;
        Ok(raw.iter().map(|&b| b as char).collect())
    }

    /// A span stored as unsigned 16-bit milliseconds.
    pub fn read_duration_ms16(&mut self) -> Result<Duration, NetError> {
        Ok(Duration::from_millis(u64::from(self.read_u16()?)))
    }

    /// A span stored as unsigned 32-bit milliseconds.
    pub fn read_duration_ms32(&mut self) -> Result<Duration, NetError> {
        Ok(Duration::from_millis(u64::from(self.read_u32()?)))
    }

    pub fn decode<T: NetDecode>(&mut self) -> Result<T, NetError> {
        T::decode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_come_back_little_endian() {
        let data = [0x2c, 0x01, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x012c);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_fails_without_advancing() {
        let data = [0x01];
        let mut r = PacketReader::new(&data);
        assert!(matches!(
            r.read_u32(),
            Err(NetError::TooShort { need: 4, got: 1 })
        ));
        assert_eq!(r.read_u8().unwrap(), 1);
    }

    #[test]
    fn negative_string_length_is_a_format_error() {
        let data = [0xff, 0xff, b'x'];
        let mut r = PacketReader::new(&data);
        assert!(matches!(r.read_str(), Err(NetError::NegativeLength(-1))));
    }

    #[test]
    fn latin1_bytes_map_to_code_points() {
        let data = [0x02, 0x00, 0xe9, 0x41];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_str().unwrap(), "\u{e9}A");
    }

    #[test]
    fn padded_string_stops_at_nul() {
        let data = [b'a', b'b', 0, 0, 0];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_padded_str(5).unwrap(), "ab");
        assert_eq!(r.remaining(), 0);
    }
}
