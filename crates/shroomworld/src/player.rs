use shroomio::pool::BufferPool;
use shroomio::reader::PacketReader;
use shroomio::writer::PacketWriter;
use shroomio::NetError;
use shroomtick::Ticks;
use tracing::debug;
use tracing::warn;

use crate::ids::SessionId;
use crate::session::PlayerLogic;
use crate::session::SessionSender;
use crate::store::Character;

/// Client keepalive probe; answered in place.
pub const OP_PING: u16 = 0x0011;
/// Keepalive answer.
pub const OP_PONG: u16 = 0x0012;

/// How many consecutive slow-consumer ticks a session gets before it is
/// asked to go away.
const SLOW_TICK_LIMIT: u32 = 3;

/// The gameplay object for one migrated player.
///
/// Opcode-level gameplay lives elsewhere; this object owns the lifecycle
/// concerns every handler shares: keepalive, unknown-opcode accounting,
/// and the slow-consumer policy.
pub struct PlayerSession {
    id: SessionId,
    character: Character,
    sender: SessionSender,
    slow_streak: u32,
    slow_this_tick: bool,
    packets_seen: u64,
    wants_close: bool,
}

impl PlayerSession {
    pub fn new(id: SessionId, character: Character, sender: SessionSender) -> Self {
        Self {
            id,
            character,
            sender,
            slow_streak: 0,
            slow_this_tick: false,
            packets_seen: 0,
            wants_close: false,
        }
    }

    pub fn character(&self) -> &Character {
        &self.character
    }

    pub fn packets_seen(&self) -> u64 {
        self.packets_seen
    }

    /// Set when the slow-consumer policy decided this session should be
    /// dropped; the room acts on it.
    pub fn wants_close(&self) -> bool {
        self.wants_close
    }
}

impl PlayerLogic for PlayerSession {
    fn handle_packet(&mut self, r: &mut PacketReader<'_>, _now: Ticks) -> Result<(), NetError> {
        let opcode = r.read_u16()?;
        self.packets_seen += 1;
        match opcode {
            OP_PING => {
                let pong = PacketWriter::with_opcode(BufferPool::global(), OP_PONG).into_packet();
                self.sender.try_send(pong);
            }
            other => {
                debug!(session = %self.id, opcode = %format_args!("{other:#06x}"), "unhandled opcode");
            }
        }
        Ok(())
    }

    fn on_slow_consumer(&mut self, now: Ticks) {
        self.slow_streak += 1;
        self.slow_this_tick = true;
        warn!(
            session = %self.id,
            streak = self.slow_streak,
            tick = %now,
            "outbound queue refused packets this tick"
        );
        if self.slow_streak >= SLOW_TICK_LIMIT {
            self.wants_close = true;
        }
    }

    fn on_tick_end(&mut self, _now: Ticks) {
        // on_slow_consumer runs first on a slow tick; a tick-end without
        // it means the connection kept up, and the streak starts over.
        if !self.slow_this_tick {
            self.slow_streak = 0;
        }
        self.slow_this_tick = false;
    }

    fn on_send_succeeded(&mut self) {}
}
