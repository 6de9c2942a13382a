use std::sync::Arc;

use shroomtick::ActorRef;
use shroomtick::DelayQueue;
use shroomtick::TickNotifier;
use shroomtick::Ticks;
use shroomtick::TickWaiter;
use tokio_util::sync::CancellationToken;

use crate::room::RoomAction;
use crate::room::RoomActor;
use crate::room::RoomMsg;
use crate::room::RoomSession;

/// Translates due delayed entries into room actions.
///
/// The loop waits on the tick notifier, drains everything due at the
/// published tick, and posts each entry to the room (non-blocking first,
/// then a blocking post if the mailbox refuses). The action runs inside
/// the room actor during that tick's message drain.
pub struct RoomTimer<S: RoomSession> {
    queue: Arc<DelayQueue<RoomAction<S>>>,
    last: TickWaiter,
}

impl<S: RoomSession> RoomTimer<S> {
    pub fn spawn(
        room: ActorRef<RoomMsg<S>>,
        notifier: &TickNotifier,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(DelayQueue::new());
        let last = notifier.subscribe();

        let loop_queue = queue.clone();
        let mut waiter = notifier.subscribe();
        tokio::spawn(async move {
            'ticks: while let Some(now) = waiter.wait_next(&cancel).await {
                for action in loop_queue.drain_due(now) {
                    match room.offer(RoomMsg::Action(action)) {
                        Ok(()) => {}
                        Err(msg) => tokio::select! {
                            _ = cancel.cancelled() => break 'ticks,
                            _ = room.post(msg) => {}
                        },
                    }
                }
            }
        });

        Self { queue, last }
    }

    /// Schedule at an absolute tick.
    pub fn schedule_at(
        &self,
        due: Ticks,
        action: impl FnOnce(&mut RoomActor<S>, Ticks) + Send + 'static,
    ) {
        self.queue.enqueue(due, Box::new(action));
    }

    /// Schedule relative to the most recently published tick.
    pub fn schedule_after_ms(
        &self,
        delay_ms: u64,
        action: impl FnOnce(&mut RoomActor<S>, Ticks) + Send + 'static,
    ) {
        self.schedule_at(self.last.last_tick() + delay_ms, action);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MapId;
    use crate::ids::RoomId;
    use crate::ids::SessionId;
    use shroomtick::GlobalClock;
    use shroomtick::TickScheduler;
    use std::time::Duration;

    struct NullSession;

    impl RoomSession for NullSession {
        fn session_id(&self) -> SessionId {
            SessionId(0)
        }

        fn tick(&mut self, _now: Ticks) {}

        fn tick_end(&mut self, _now: Ticks) {}
    }

    #[tokio::test]
    async fn delayed_action_fires_at_or_after_its_due_tick() {
        let scheduler = TickScheduler::new(GlobalClock::start(), Duration::from_millis(5));
        let (room, _sub) =
            scheduler.register(RoomActor::<NullSession>::new(RoomId::new(0, MapId(1))));

        let cancel = CancellationToken::new();
        let timer = RoomTimer::spawn(room, scheduler.notifier(), cancel.clone());

        let loop_sched = scheduler.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move { loop_sched.run(loop_cancel).await });

        // Scheduled 20ms out against a 5ms tick: the action must observe a
        // tick at or past the due time, delivered through the room's
        // message drain.
        let (tx, rx) = tokio::sync::oneshot::channel();
        timer.schedule_after_ms(20, move |_room, now| {
            let _ = tx.send(now);
        });
        assert_eq!(timer.pending(), 1);

        let observed = rx.await.unwrap();
        assert!(observed.millis() >= 20);
        assert_eq!(observed.millis() % 5, 0);
        assert_eq!(timer.pending(), 0);

        cancel.cancel();
    }

    #[tokio::test]
    async fn absolute_scheduling_orders_by_due_tick() {
        let scheduler = TickScheduler::new(GlobalClock::start(), Duration::from_millis(5));
        let (room, _sub) =
            scheduler.register(RoomActor::<NullSession>::new(RoomId::new(0, MapId(1))));

        let cancel = CancellationToken::new();
        let timer = RoomTimer::spawn(room, scheduler.notifier(), cancel.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for (due, tag) in [(30u64, "late"), (10, "early")] {
            let tx = tx.clone();
            timer.schedule_at(Ticks::from_millis(due), move |_room, _now| {
                let _ = tx.send(tag);
            });
        }

        let loop_sched = scheduler.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move { loop_sched.run(loop_cancel).await });

        assert_eq!(rx.recv().await, Some("early"));
        assert_eq!(rx.recv().await, Some("late"));
        cancel.cancel();
    }
}
