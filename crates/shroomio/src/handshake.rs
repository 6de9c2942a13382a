use crate::crypto::RoundKey;
use crate::crypto::ShroomVersion;
use crate::reader::NetDecode;
use crate::reader::PacketReader;
use crate::writer::NetEncode;
use crate::writer::PacketWriter;
use crate::NetError;

/// Bounds on the encoded handshake body, enforced before any allocation.
pub const HANDSHAKE_MIN_LEN: usize = 1;
pub const HANDSHAKE_MAX_LEN: usize = 128;

/// Service regions the legacy client understands.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Locale {
    Korea = 1,
    KoreaTest = 2,
    Japan = 3,
    China = 4,
    Test = 5,
    Taiwan = 6,
    Sea = 7,
    Global = 8,
    Europe = 9,
    Rls = 10,
}

impl Locale {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Locale::Korea,
            2 => Locale::KoreaTest,
            3 => Locale::Japan,
            4 => Locale::China,
            5 => Locale::Test,
            6 => Locale::Taiwan,
            7 => Locale::Sea,
            8 => Locale::Global,
            9 => Locale::Europe,
            10 => Locale::Rls,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// The plaintext first message from the server: version, subversion, the
/// two initial round keys, and the locale. Sent inside a two-byte length
/// prefix before any encryption starts.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Handshake {
    pub version: ShroomVersion,
    pub sub_version: String,
    pub send_key: RoundKey,
    pub recv_key: RoundKey,
    pub locale: Locale,
}

impl Handshake {
    /// A fresh handshake with random initial keys.
    pub fn generate(version: u16, sub_version: &str, locale: Locale) -> Self {
        Self {
            version: ShroomVersion::new(version),
            sub_version: sub_version.to_string(),
            send_key: RoundKey::random(),
            recv_key: RoundKey::random(),
            locale,
        }
    }
}

impl NetEncode for Handshake {
    fn encode(&self, w: &mut PacketWriter) -> Result<(), NetError> {
        w.write_u16(self.version.raw());
        w.write_str(&self.sub_version)?;
        w.write_u32(self.send_key.value());
        w.write_u32(self.recv_key.value());
        w.write_u8(self.locale.as_u8());
        Ok(())
    }
}

impl NetDecode for Handshake {
    fn decode(r: &mut PacketReader<'_>) -> Result<Self, NetError> {
        let version = ShroomVersion::new(r.read_u16()?);
        let sub_version = r.read_str()?;
        let send_key = RoundKey::new(r.read_u32()?);
        let recv_key = RoundKey::new(r.read_u32()?);
        let locale = Locale::from_u8(r.read_u8()?)
            .ok_or(NetError::BadHandshake("locale out of range"))?;
        Ok(Self {
            version,
            sub_version,
            send_key,
            recv_key,
            locale,
        })
    }
}
