use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use shroomio::conn;
use shroomio::crypto::CryptoContext;
use shroomio::handshake::Handshake;
use shroomio::pool::BufferPool;
use shroomio::pump::ConnPump;
use shroomio::pump::PumpConfig;
use shroomtick::ActorRef;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ids::AccountId;
use crate::ids::CharacterId;
use crate::manager::SessionManager;
use crate::player::PlayerSession;
use crate::room::RoomMsg;
use crate::session::Session;
use crate::session::SessionSender;
use crate::session::SlowFlag;

pub type GameSession = Session<PlayerSession>;
pub type GameRoomRef = ActorRef<RoomMsg<GameSession>>;

/// The migration handshake: u64 client session id, i32 account id,
/// i32 character id, little-endian.
const MIGRATE_MIN_LEN: usize = 8 + 4 + 4;

/// Serve one freshly accepted channel connection end to end: handshake,
/// migration-ticket validation, session registration, then pump the
/// connection until the client goes away or the token fires. Cleanup
/// (room removal, registry removal) always runs once the session was
/// added.
///
/// Any pre-session failure tears the pump down and surfaces the specific
/// reason; the caller logs it against the peer address.
pub async fn serve_channel_conn<S>(
    stream: S,
    peer: SocketAddr,
    hello: &Handshake,
    ctx: &Arc<CryptoContext>,
    manager: &SessionManager,
    room: &GameRoomRef,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let pool = BufferPool::global();
    let (rx, tx) = conn::accept(stream, hello, ctx, pool).await?;
    let mut pump = ConnPump::spawn(rx, tx, PumpConfig::default(), cancel.clone());
    let completion = pump.completion();

    let first = tokio::select! {
        _ = cancel.cancelled() => None,
        p = pump.recv() => p,
    };
    let Some(first) = first else {
        pump.cancel();
        bail!("connection closed before the migration handshake");
    };
    if first.len() < MIGRATE_MIN_LEN {
        pump.cancel();
        bail!("migration handshake too short: {} bytes", first.len());
    }
    let mut r = first.reader();
    let client_session_id = r.read_u64()?;
    let account = AccountId(r.read_i32()? as u32);
    let character_id = CharacterId(r.read_i32()? as u32);
    drop(first);

    let Some(ticket) = manager.try_consume_ticket(client_session_id, peer) else {
        pump.cancel();
        bail!("no valid migration ticket for {client_session_id}");
    };
    if (ticket.account, ticket.character) != (account, character_id) {
        pump.cancel();
        bail!(
            "ticket is for {}/{}, client presented {account}/{character_id}",
            ticket.account,
            ticket.character
        );
    }

    let Some(character) = manager.load_character(character_id)? else {
        pump.cancel();
        bail!("character {character_id} not in the store");
    };

    let session_id = manager.next_session_id();
    let slow = SlowFlag::default();
    let sender = SessionSender::new(pump.sender(), slow.clone());
    let logic = manager.create_player_session(session_id, sender, &character, peer);
    let session = Session::new(session_id, pump, slow, logic);
    room.post(RoomMsg::AddSession(session)).await;
    info!(
        peer = %peer,
        session = %session_id,
        character = %character.name,
        "session joined the room"
    );

    completion.wait().await;

    room.post(RoomMsg::RemoveSession(session_id)).await;
    manager.notify_closed(session_id);
    info!(peer = %peer, session = %session_id, "session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MapId;
    use crate::ids::RoomId;
    use crate::ids::WorldId;
    use crate::ids::ChannelId;
    use crate::store::MemoryStore;
    use crate::topology::RoomServer;
    use shroomio::writer::PacketWriter;
    use shroomtick::GlobalClock;
    use shroomtick::Ticks;
    use shroomtick::TickScheduler;
    use std::time::Duration;

    fn hello() -> Handshake {
        Handshake::generate(95, "1", shroomio::handshake::Locale::Global)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:42000".parse().unwrap()
    }

    struct Fixture {
        scheduler: TickScheduler,
        manager: SessionManager,
        room: GameRoomRef,
        ctx: Arc<CryptoContext>,
    }

    fn fixture() -> Fixture {
        let scheduler = TickScheduler::new(GlobalClock::start(), Duration::from_millis(5));
        let rs = RoomServer::new(scheduler.clone());
        let world = rs.create_world::<GameSession>(WorldId(0));
        let channel = rs.create_channel(&world, ChannelId(0));
        let room = rs.create_room(&channel, RoomId::new(0, MapId(100)));
        Fixture {
            scheduler,
            manager: SessionManager::new(Arc::new(MemoryStore::new())),
            room: room.actor.clone(),
            ctx: CryptoContext::default_keys(),
        }
    }

    fn migrate_packet(client_session_id: u64, account: AccountId, character: CharacterId) -> shroomio::packet::Packet {
        let mut w = PacketWriter::new(BufferPool::global());
        w.write_u64(client_session_id);
        w.write_i32(account.0 as i32);
        w.write_i32(character.0 as i32);
        w.into_packet()
    }

    fn room_population(f: &Fixture, at: Ticks) -> usize {
        let (tx, rx) = std::sync::mpsc::channel();
        f.room.try_post(RoomMsg::Action(Box::new(move |room, _| {
            let _ = tx.send(room.session_count());
        })));
        f.scheduler.run_tick(at);
        rx.recv().unwrap()
    }

    #[tokio::test]
    async fn a_valid_ticket_admits_the_session_and_cleanup_runs() {
        let f = fixture();
        let account = f.manager.create_guest_account().unwrap();
        let character = f.manager.ensure_default_character(account.id).unwrap();
        let ticket = f.manager.create_ticket(account.id, character.id, peer());

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let handler = {
            let hello = hello();
            let ctx = f.ctx.clone();
            let manager = f.manager.clone();
            let room = f.room.clone();
            tokio::spawn(async move {
                serve_channel_conn(
                    server_io,
                    peer(),
                    &hello,
                    &ctx,
                    &manager,
                    &room,
                    CancellationToken::new(),
                )
                .await
            })
        };

        let (_rx, mut tx, _) = conn::connect(client_io, &f.ctx, BufferPool::global())
            .await
            .unwrap();
        tx.write_packet(&migrate_packet(
            ticket.client_session_id,
            account.id,
            character.id,
        ))
        .await
        .unwrap();

        // Let the handler authenticate and post AddSession, then drain it.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(room_population(&f, Ticks::from_millis(5)), 1);
        assert_eq!(f.manager.active_count(), 1);

        // Client disconnects; the handler's final block must empty both
        // the room and the registry.
        drop(tx);
        drop(_rx);
        handler.await.unwrap().unwrap();
        assert_eq!(room_population(&f, Ticks::from_millis(10)), 0);
        assert_eq!(f.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn a_missing_ticket_rejects_the_migration() {
        let f = fixture();
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);

        let handler = {
            let hello = hello();
            let ctx = f.ctx.clone();
            let manager = f.manager.clone();
            let room = f.room.clone();
            tokio::spawn(async move {
                serve_channel_conn(
                    server_io,
                    peer(),
                    &hello,
                    &ctx,
                    &manager,
                    &room,
                    CancellationToken::new(),
                )
                .await
            })
        };

        let (_rx, mut tx, _) = conn::connect(client_io, &f.ctx, BufferPool::global())
            .await
            .unwrap();
        tx.write_packet(&migrate_packet(0xDEAD, AccountId(1), CharacterId(1)))
            .await
            .unwrap();

        let res = handler.await.unwrap();
        assert!(res.is_err());
        assert_eq!(f.manager.active_count(), 0);
    }

    #[tokio::test]
    async fn a_short_first_packet_rejects_the_migration() {
        let f = fixture();
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);

        let handler = {
            let hello = hello();
            let ctx = f.ctx.clone();
            let manager = f.manager.clone();
            let room = f.room.clone();
            tokio::spawn(async move {
                serve_channel_conn(
                    server_io,
                    peer(),
                    &hello,
                    &ctx,
                    &manager,
                    &room,
                    CancellationToken::new(),
                )
                .await
            })
        };

        let (_rx, mut tx, _) = conn::connect(client_io, &f.ctx, BufferPool::global())
            .await
            .unwrap();
        let mut w = PacketWriter::new(BufferPool::global());
        w.write_u64(0x1234);
        tx.write_packet(&w.into_packet()).await.unwrap();

        assert!(handler.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn mismatched_ids_reject_even_with_a_real_ticket() {
        let f = fixture();
        let account = f.manager.create_guest_account().unwrap();
        let character = f.manager.ensure_default_character(account.id).unwrap();
        let ticket = f.manager.create_ticket(account.id, character.id, peer());

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let handler = {
            let hello = hello();
            let ctx = f.ctx.clone();
            let manager = f.manager.clone();
            let room = f.room.clone();
            tokio::spawn(async move {
                serve_channel_conn(
                    server_io,
                    peer(),
                    &hello,
                    &ctx,
                    &manager,
                    &room,
                    CancellationToken::new(),
                )
                .await
            })
        };

        let (_rx, mut tx, _) = conn::connect(client_io, &f.ctx, BufferPool::global())
            .await
            .unwrap();
        tx.write_packet(&migrate_packet(
            ticket.client_session_id,
            AccountId(9999),
            character.id,
        ))
        .await
        .unwrap();

        assert!(handler.await.unwrap().is_err());
        // The ticket burned on the failed attempt.
        assert!(f
            .manager
            .try_consume_ticket(ticket.client_session_id, peer())
            .is_none());
    }
}
