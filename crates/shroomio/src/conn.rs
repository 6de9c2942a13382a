use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;

use crate::crypto::check_frame_len;
use crate::crypto::CryptoContext;
use crate::crypto::Dir;
use crate::crypto::NetCipher;
use crate::crypto::Role;
use crate::crypto::RoundKey;
use crate::handshake::Handshake;
use crate::handshake::HANDSHAKE_MAX_LEN;
use crate::handshake::HANDSHAKE_MIN_LEN;
use crate::packet::Packet;
use crate::pool::BufferPool;
use crate::reader::PacketReader;
use crate::writer::PacketWriter;
use crate::NetError;
use crate::HEADER_LEN;
use crate::MAX_PACKET_LEN;

/// Accept side: write the plaintext handshake, then derive both cipher
/// directions. The server's send direction pairs with the client's
/// receive direction, hence the crossed keys.
pub async fn accept<S>(
    mut stream: S,
    hello: &Handshake,
    ctx: &Arc<CryptoContext>,
    pool: &BufferPool,
) -> Result<(FrameRx<ReadHalf<S>>, FrameTx<WriteHalf<S>>), NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_hello(&mut stream, hello, pool).await?;
    let (rd, wr) = tokio::io::split(stream);
    let rx = FrameRx::new(
        rd,
        NetCipher::new(hello.send_key, hello.version, Role::Server, Dir::Recv, ctx.clone()),
        pool.clone(),
    );
    let tx = FrameTx::new(
        wr,
        NetCipher::new(hello.recv_key, hello.version, Role::Server, Dir::Send, ctx.clone()),
    );
    Ok((rx, tx))
}

/// Connect side: read the plaintext handshake, then derive both cipher
/// directions.
pub async fn connect<S>(
    mut stream: S,
    ctx: &Arc<CryptoContext>,
    pool: &BufferPool,
) -> Result<(FrameRx<ReadHalf<S>>, FrameTx<WriteHalf<S>>, Handshake), NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = read_hello(&mut stream).await?;
    let (rd, wr) = tokio::io::split(stream);
    let rx = FrameRx::new(
        rd,
        NetCipher::new(hello.recv_key, hello.version, Role::Client, Dir::Recv, ctx.clone()),
        pool.clone(),
    );
    let tx = FrameTx::new(
        wr,
        NetCipher::new(hello.send_key, hello.version, Role::Client, Dir::Send, ctx.clone()),
    );
    Ok((rx, tx, hello))
}

async fn write_hello<W: AsyncWrite + Unpin>(
    wr: &mut W,
    hello: &Handshake,
    pool: &BufferPool,
) -> Result<(), NetError> {
    let mut w = PacketWriter::new(pool);
    w.encode(hello)?;
    let body = w.into_packet();
    if body.len() < HANDSHAKE_MIN_LEN || body.len() > HANDSHAKE_MAX_LEN {
        return Err(NetError::BadHandshake("encoded size out of range"));
    }
    wr.write_all(&(body.len() as u16).to_le_bytes()).await?;
    wr.write_all(body.as_slice()).await?;
    wr.flush().await?;
    Ok(())
}

async fn read_hello<R: AsyncRead + Unpin>(rd: &mut R) -> Result<Handshake, NetError> {
    let mut prefix = [0u8; 2];
    rd.read_exact(&mut prefix).await?;
    let len = u16::from_le_bytes(prefix) as usize;
    if !(HANDSHAKE_MIN_LEN..=HANDSHAKE_MAX_LEN).contains(&len) {
        return Err(NetError::BadHandshake("length prefix out of range"));
    }
    let mut body = [0u8; HANDSHAKE_MAX_LEN];
    rd.read_exact(&mut body[..len]).await?;
    PacketReader::new(&body[..len]).decode()
}

/// The receive half: 4-byte header, key check, exact-length body, decrypt
/// in place, hand the buffer to a [`Packet`].
pub struct FrameRx<R> {
    inner: R,
    cipher: NetCipher,
    pool: BufferPool,
}

impl<R: AsyncRead + Unpin> FrameRx<R> {
    fn new(inner: R, cipher: NetCipher, pool: BufferPool) -> Self {
        Self {
            inner,
            cipher,
            pool,
        }
    }

    /// Read one encrypted frame.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` for a decrypted frame,
    /// - `Ok(None)` on clean EOF between frames.
    ///
    /// A buffer rented for a frame that then fails to arrive or decode is
    /// returned to the pool before the error propagates.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>, NetError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof inside frame header",
                )
                .into());
            }
            filled += n;
        }

        let len = usize::from(self.cipher.decode_header(header)?);
        check_frame_len(len)?;

        let mut buf = self.pool.rent(len);
        buf.as_mut_vec().resize(len, 0);
        self.inner.read_exact(&mut buf[..]).await?;
        self.cipher.decrypt(&mut buf[..]);
        Ok(Some(Packet::from_buf(buf)))
    }

    pub fn round_key(&self) -> RoundKey {
        self.cipher.round_key()
    }
}

/// The send half: header plus payload staged into one buffer, encrypted
/// in place, flushed as a single write. Writes must be serialised by the
/// caller; the pump's send loop is the only writer in practice.
pub struct FrameTx<W> {
    inner: W,
    cipher: NetCipher,
    send_buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameTx<W> {
    fn new(inner: W, cipher: NetCipher) -> Self {
        Self {
            inner,
            cipher,
            send_buf: Vec::with_capacity(MAX_PACKET_LEN + HEADER_LEN),
        }
    }

    pub async fn write_packet(&mut self, pkt: &Packet) -> Result<(), NetError> {
        let len = pkt.len();
        check_frame_len(len)?;

        self.send_buf.clear();
        self.send_buf
            .extend_from_slice(&self.cipher.encode_header(len as u16));
        self.send_buf.extend_from_slice(pkt.as_slice());
        self.cipher.encrypt(&mut self.send_buf[HEADER_LEN..]);

        self.inner.write_all(&self.send_buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn round_key(&self) -> RoundKey {
        self.cipher.round_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::Locale;

    fn hello() -> Handshake {
        Handshake {
            version: crate::crypto::ShroomVersion::new(95),
            sub_version: "1".to_string(),
            send_key: RoundKey::new(0xE878_3052),
            recv_key: RoundKey::new(0x1337_BEEF),
            locale: Locale::Global,
        }
    }

    #[tokio::test]
    async fn framed_echo_round_trips() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let ctx = CryptoContext::default_keys();
        let pool = BufferPool::global();

        let server_ctx = ctx.clone();
        let server = tokio::spawn(async move {
            let (mut rx, mut tx) = accept(server_io, &hello(), &server_ctx, BufferPool::global())
                .await
                .unwrap();
            let pkt = rx.read_packet().await.unwrap().unwrap();
            let text = pkt.reader().read_str().unwrap();
            assert_eq!(text, "Hello World");

            let echo = Packet::copy_from(BufferPool::global(), pkt.as_slice());
            tx.write_packet(&echo).await.unwrap();
            (rx.round_key(), tx.round_key())
        });

        let (mut rx, mut tx, seen) = connect(client_io, &ctx, pool).await.unwrap();
        assert_eq!(seen.version.raw(), 95);
        assert_eq!(seen.sub_version, "1");
        assert_eq!(seen.locale, Locale::Global);

        let mut w = PacketWriter::new(pool);
        w.write_str("Hello World").unwrap();
        tx.write_packet(&w.into_packet()).await.unwrap();

        let echo = rx.read_packet().await.unwrap().unwrap();
        assert_eq!(echo.reader().read_str().unwrap(), "Hello World");

        // After exactly one packet each way, both ends advanced each
        // direction's key by the same single update.
        let (server_rx_key, server_tx_key) = server.await.unwrap();
        assert_eq!(tx.round_key(), server_rx_key);
        assert_eq!(rx.round_key(), server_tx_key);
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let ctx = CryptoContext::default_keys();

        let server = tokio::spawn(async move {
            let (mut rx, _tx) = accept(server_io, &hello(), &ctx, BufferPool::global())
                .await
                .unwrap();
            rx.read_packet().await.unwrap()
        });

        let ctx = CryptoContext::default_keys();
        let (rx, tx, _) = connect(client_io, &ctx, BufferPool::global()).await.unwrap();
        drop((rx, tx));

        assert!(server.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_header_is_a_crypto_error() {
        let (mut client_io, server_io) = tokio::io::duplex(4096);
        let ctx = CryptoContext::default_keys();

        let server = tokio::spawn(async move {
            let (mut rx, _tx) = accept(server_io, &hello(), &ctx, BufferPool::global())
                .await
                .unwrap();
            rx.read_packet().await
        });

        // Swallow the handshake, then write four bytes that cannot pass
        // the header key check.
        let mut prefix = [0u8; 2];
        client_io.read_exact(&mut prefix).await.unwrap();
        let mut body = vec![0u8; u16::from_le_bytes(prefix) as usize];
        client_io.read_exact(&mut body).await.unwrap();
        client_io.write_all(&[0xAA, 0xAA, 0xAA, 0xAA]).await.unwrap();

        assert!(matches!(
            server.await.unwrap(),
            Err(NetError::InvalidHeader)
        ));
    }

    #[tokio::test]
    async fn oversized_write_is_rejected_before_the_wire() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let ctx = CryptoContext::default_keys();

        tokio::spawn(async move {
            let _ = accept(server_io, &hello(), &ctx, BufferPool::global()).await;
        });

        let ctx = CryptoContext::default_keys();
        let (_rx, mut tx, _) = connect(client_io, &ctx, BufferPool::global()).await.unwrap();

        let big = Packet::copy_from(BufferPool::global(), &vec![0u8; MAX_PACKET_LEN + 1]);
        assert!(matches!(
            tx.write_packet(&big).await,
            Err(NetError::FrameLength(_))
        ));

        let empty = Packet::copy_from(BufferPool::global(), &[]);
        assert!(matches!(
            tx.write_packet(&empty).await,
            Err(NetError::FrameLength(0))
        ));
    }
}
