//! The login-port flow: account lookup, character list, migration ticket.
//!
//! Login is plain request/response, so it talks straight frame IO rather
//! than going through a pump: one connection, a handful of packets, then
//! the client reconnects to a channel port with its ticket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use shroomio::conn;
use shroomio::crypto::CryptoContext;
use shroomio::handshake::Handshake;
use shroomio::pool::BufferPool;
use shroomio::writer::PacketWriter;
use shroomworld::manager::SessionManager;
use shroomworld::CharacterId;
use shroomworld::ChannelId;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tracing::info;

/// Client -> server: log in. Body: Latin-1 username; empty means guest.
pub const OP_LOGIN: u16 = 0x0001;
/// Client -> server: pick a character. Body: u32 character id.
pub const OP_SELECT_CHARACTER: u16 = 0x0002;

/// Server -> client: account id plus the character list.
pub const OP_CHARACTER_LIST: u16 = 0x0081;
/// Server -> client: migration grant. Body: u64 client session id,
/// u8 channel id, u16 channel port.
pub const OP_MIGRATE: u16 = 0x0082;

/// A channel clients can migrate to.
#[derive(Clone, Copy, Debug)]
pub struct ChannelEndpoint {
    pub id: ChannelId,
    pub port: u16,
}

pub async fn serve_login_conn<S>(
    stream: S,
    peer: SocketAddr,
    hello: &Handshake,
    ctx: &Arc<CryptoContext>,
    manager: &SessionManager,
    channels: &[ChannelEndpoint],
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pool = BufferPool::global();
    let (mut rx, mut tx) = conn::accept(stream, hello, ctx, pool).await?;

    // Login request.
    let Some(pkt) = rx.read_packet().await? else {
        bail!("closed before login");
    };
    let mut r = pkt.reader();
    if r.read_u16()? != OP_LOGIN {
        bail!("expected login as the first packet");
    }
    let username = r.read_str()?;
    drop(pkt);

    let account = if username.trim().is_empty() {
        manager.create_guest_account()?
    } else {
        manager.get_or_create_account(&username)?
    };
    manager
        .ensure_default_character(account.id)
        .context("ensure default character")?;
    let characters = manager.characters_of(account.id)?;

    let mut w = PacketWriter::with_opcode(pool, OP_CHARACTER_LIST);
    w.write_u32(account.id.0);
    w.write_u8(characters.len() as u8);
    for c in &characters {
        w.write_u32(c.id.0);
        w.write_str(&c.name)?;
        w.write_u8(c.level);
        w.write_u32(c.map.0);
    }
    tx.write_packet(&w.into_packet()).await?;

    // Character selection.
    let Some(pkt) = rx.read_packet().await? else {
        bail!("closed before character select");
    };
    let mut r = pkt.reader();
    if r.read_u16()? != OP_SELECT_CHARACTER {
        bail!("expected character select");
    }
    let chosen = CharacterId(r.read_u32()?);
    drop(pkt);

    if !characters.iter().any(|c| c.id == chosen) {
        bail!("character {chosen} does not belong to account {}", account.id);
    }

    let channel = channels.first().context("no channels configured")?;
    let ticket = manager.create_ticket(account.id, chosen, peer);
    info!(
        peer = %peer,
        account = %account.id,
        character = %chosen,
        channel = %channel.id,
        "migration ticket issued"
    );

    let mut w = PacketWriter::with_opcode(pool, OP_MIGRATE);
    w.write_u64(ticket.client_session_id);
    w.write_u8(channel.id.0 as u8);
    w.write_u16(channel.port);
    tx.write_packet(&w.into_packet()).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroomio::handshake::Locale;
    use shroomworld::store::MemoryStore;

    #[tokio::test]
    async fn guest_login_gets_a_character_and_a_ticket() {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let ctx = CryptoContext::default_keys();
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let peer: SocketAddr = "127.0.0.1:55000".parse().unwrap();
        let channels = [ChannelEndpoint {
            id: ChannelId(0),
            port: 8485,
        }];

        let server = {
            let ctx = ctx.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                let hello = Handshake::generate(95, "1", Locale::Global);
                serve_login_conn(server_io, peer, &hello, &ctx, &manager, &channels).await
            })
        };

        let pool = BufferPool::global();
        let (mut rx, mut tx, _) = conn::connect(client_io, &ctx, pool).await.unwrap();

        let mut w = PacketWriter::with_opcode(pool, OP_LOGIN);
        w.write_str("").unwrap();
        tx.write_packet(&w.into_packet()).await.unwrap();

        let list = rx.read_packet().await.unwrap().unwrap();
        let mut r = list.reader();
        assert_eq!(r.read_u16().unwrap(), OP_CHARACTER_LIST);
        let _account = r.read_u32().unwrap();
        assert_eq!(r.read_u8().unwrap(), 1);
        let character_id = r.read_u32().unwrap();
        let name = r.read_str().unwrap();
        assert!(name.starts_with("guest"));
        drop(list);

        let mut w = PacketWriter::with_opcode(pool, OP_SELECT_CHARACTER);
        w.write_u32(character_id);
        tx.write_packet(&w.into_packet()).await.unwrap();

        let grant = rx.read_packet().await.unwrap().unwrap();
        let mut r = grant.reader();
        assert_eq!(r.read_u16().unwrap(), OP_MIGRATE);
        let client_session_id = r.read_u64().unwrap();
        assert_ne!(client_session_id, 0);
        assert_eq!(r.read_u8().unwrap(), 0);
        assert_eq!(r.read_u16().unwrap(), 8485);
        drop(grant);

        server.await.unwrap().unwrap();

        // The ticket is live, bound to the login connection's address.
        let ticket = manager
            .try_consume_ticket(client_session_id, "127.0.0.1:60000".parse().unwrap())
            .unwrap();
        assert_eq!(ticket.character, CharacterId(character_id));
    }

    #[tokio::test]
    async fn selecting_a_foreign_character_fails() {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let ctx = CryptoContext::default_keys();
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        let peer: SocketAddr = "127.0.0.1:55001".parse().unwrap();
        let channels = [ChannelEndpoint {
            id: ChannelId(0),
            port: 8485,
        }];

        let server = {
            let ctx = ctx.clone();
            let manager = manager.clone();
            tokio::spawn(async move {
                let hello = Handshake::generate(95, "1", Locale::Global);
                serve_login_conn(server_io, peer, &hello, &ctx, &manager, &channels).await
            })
        };

        let pool = BufferPool::global();
        let (mut rx, mut tx, _) = conn::connect(client_io, &ctx, pool).await.unwrap();

        let mut w = PacketWriter::with_opcode(pool, OP_LOGIN);
        w.write_str("mallory").unwrap();
        tx.write_packet(&w.into_packet()).await.unwrap();
        let _ = rx.read_packet().await.unwrap().unwrap();

        let mut w = PacketWriter::with_opcode(pool, OP_SELECT_CHARACTER);
        w.write_u32(424242);
        tx.write_packet(&w.into_packet()).await.unwrap();

        assert!(server.await.unwrap().is_err());
    }
}
