use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use shroomio::packet::Packet;
use shroomio::pump::ConnPump;
use shroomio::pump::PumpSender;
use shroomio::reader::PacketReader;
use shroomio::NetError;
use shroomtick::Ticks;
use tracing::warn;

use crate::ids::SessionId;
use crate::room::RoomSession;

/// The gameplay side of a session. Hooks run on the tick thread with no
/// concurrent access; a decode failure from `handle_packet` closes the
/// connection.
pub trait PlayerLogic: Send + 'static {
    fn handle_packet(&mut self, r: &mut PacketReader<'_>, now: Ticks) -> Result<(), NetError>;

    fn on_tick(&mut self, now: Ticks) {
        let _ = now;
    }

    fn on_tick_end(&mut self, now: Ticks) {
        let _ = now;
    }

    /// Called at tick-end of any tick in which the outbound queue
    /// refused a packet. Shed load, schedule removal, or recover.
    fn on_slow_consumer(&mut self, now: Ticks) {
        let _ = now;
    }

    fn on_send_succeeded(&mut self) {}
}

/// The flag a tick sets when the outbound queue refuses a packet, checked
/// and cleared at tick-end. Shared between the session and its senders.
#[derive(Clone, Default)]
pub struct SlowFlag(Arc<AtomicBool>);

impl SlowFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Clonable sending handle given to gameplay code. Failing to queue marks
/// the shared slow flag; the session reacts at tick-end.
#[derive(Clone)]
pub struct SessionSender {
    tx: PumpSender,
    slow: SlowFlag,
}

impl SessionSender {
    pub fn new(tx: PumpSender, slow: SlowFlag) -> Self {
        Self { tx, slow }
    }

    pub fn try_send(&self, pkt: Packet) -> bool {
        if self.tx.try_send(pkt) {
            true
        } else {
            self.slow.mark();
            false
        }
    }

    pub async fn send(&self, pkt: Packet) -> bool {
        self.tx.send(pkt).await
    }
}

/// One connected player inside a room: the connection pump, the gameplay
/// object, and the transient slow-consumer flag.
///
/// The owning room drives [`tick`](RoomSession::tick) (drain inbound,
/// then gameplay) and [`tick_end`](RoomSession::tick_end) (slow-consumer
/// handling, then gameplay tick-end).
pub struct Session<L: PlayerLogic> {
    id: SessionId,
    pump: ConnPump,
    logic: L,
    slow: SlowFlag,
}

impl<L: PlayerLogic> Session<L> {
    /// Assemble a session around an already-spawned pump. The `slow` flag
    /// must be the one any [`SessionSender`] handed to `logic` shares.
    pub fn new(id: SessionId, pump: ConnPump, slow: SlowFlag, logic: L) -> Self {
        Self {
            id,
            pump,
            logic,
            slow,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut L {
        &mut self.logic
    }

    /// A sending handle sharing this session's slow flag.
    pub fn sender(&self) -> SessionSender {
        SessionSender::new(self.pump.sender(), self.slow.clone())
    }

    /// Queue a packet toward the wire; `false` marks the session slow.
    pub fn try_send(&mut self, pkt: Packet) -> bool {
        if self.pump.try_send(pkt) {
            self.logic.on_send_succeeded();
            true
        } else {
            self.slow.mark();
            false
        }
    }

    /// Queue a packet, waiting for space. `false` means the pump is gone.
    pub async fn send(&mut self, pkt: Packet) -> bool {
        if self.pump.send(pkt).await {
            self.logic.on_send_succeeded();
            true
        } else {
            false
        }
    }

    /// Tear the connection down; the pump's completion future resolves
    /// once both loops exit.
    pub fn close(&self) {
        self.pump.cancel();
    }
}

impl<L: PlayerLogic> RoomSession for Session<L> {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn tick(&mut self, now: Ticks) {
        while let Some(pkt) = self.pump.try_recv() {
            let mut r = pkt.reader();
            if let Err(e) = self.logic.handle_packet(&mut r, now) {
                warn!(session = %self.id, err = %e, "packet rejected, closing session");
                self.pump.cancel();
                break;
            }
            // `pkt` drops here, returning its buffer, whatever happened.
        }
        self.logic.on_tick(now);
    }

    fn tick_end(&mut self, now: Ticks) {
        if self.slow.take() {
            self.logic.on_slow_consumer(now);
        }
        self.logic.on_tick_end(now);
    }
}
