use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::actor::Actor;
use crate::actor::ActorCell;
use crate::actor::ActorRef;
use crate::actor::TickTarget;
use crate::clock::GlobalClock;
use crate::clock::Ticks;
use crate::mailbox::mailbox;
use crate::mailbox::OverflowPolicy;
use crate::notifier::TickNotifier;
use crate::notifier::TickWaiter;

const DEFAULT_MAILBOX_CAPACITY: usize = 128;

#[derive(Clone)]
struct Registration {
    id: u64,
    name: Arc<str>,
    cell: Arc<Mutex<dyn TickTarget>>,
}

struct Shared {
    actors: Mutex<Vec<Registration>>,
    interval: Duration,
    clock: GlobalClock,
    notifier: TickNotifier,
    next_id: AtomicU64,
}

/// The fixed-interval tick loop.
///
/// Actors register under a mutex; the loop snapshots the list at the top
/// of each tick, so changes land on the next tick at the latest. Each tick
/// runs two phases over the snapshot in registration order: mailbox drain
/// plus tick body for every actor, then the tick-end hook for every actor.
/// A panicking hook is logged and isolated to that actor for that tick.
#[derive(Clone)]
pub struct TickScheduler {
    shared: Arc<Shared>,
}

impl TickScheduler {
    pub fn new(clock: GlobalClock, interval: Duration) -> Self {
        assert!(interval > Duration::ZERO, "tick interval must be positive");
        Self {
            shared: Arc::new(Shared {
                actors: Mutex::new(Vec::new()),
                interval,
                clock,
                notifier: TickNotifier::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn clock(&self) -> GlobalClock {
        self.shared.clock
    }

    pub fn notifier(&self) -> &TickNotifier {
        &self.shared.notifier
    }

    pub fn subscribe(&self) -> TickWaiter {
        self.shared.notifier.subscribe()
    }

    /// Register an actor with a default drop-oldest mailbox.
    pub fn register<A: Actor>(&self, actor: A) -> (ActorRef<A::Msg>, TickSubscription) {
        self.register_with(actor, DEFAULT_MAILBOX_CAPACITY, OverflowPolicy::DropOldest)
    }

    /// Register an actor with an explicit mailbox depth and policy.
    pub fn register_with<A: Actor>(
        &self,
        actor: A,
        mailbox_capacity: usize,
        policy: OverflowPolicy,
    ) -> (ActorRef<A::Msg>, TickSubscription) {
        let name: Arc<str> = Arc::from(actor.name());
        let (tx, rx) = mailbox(mailbox_capacity, policy);
        let cell: Arc<Mutex<dyn TickTarget>> = Arc::new(Mutex::new(ActorCell::new(actor, rx)));

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let reg = Registration {
            id,
            name: name.clone(),
            cell,
        };
        self.shared
            .actors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reg);

        (
            ActorRef::new(name.clone(), tx),
            TickSubscription {
                id,
                name,
                shared: Arc::downgrade(&self.shared),
            },
        )
    }

    /// Drive exactly one tick labelled `now`. The loop calls this; tests
    /// may call it directly for deterministic stepping.
    pub fn run_tick(&self, now: Ticks) {
        let snapshot: Vec<Registration> = self
            .shared
            .actors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for reg in &snapshot {
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let mut cell = reg.cell.lock().unwrap_or_else(|e| e.into_inner());
                cell.drive_tick(now);
            }));
            if res.is_err() {
                error!(actor = %reg.name, tick = %now, "tick hook panicked");
            }
        }

        for reg in &snapshot {
            let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let mut cell = reg.cell.lock().unwrap_or_else(|e| e.into_inner());
                cell.drive_tick_end(now);
            }));
            if res.is_err() {
                error!(actor = %reg.name, tick = %now, "tick-end hook panicked");
            }
        }

        self.shared.notifier.publish(now);
    }

    /// The hosted loop. Ticks are labelled with their scheduled time; a
    /// late tick runs immediately and the schedule never skips ahead.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut target = self.shared.clock.now() + self.shared.interval;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(self.shared.clock.instant_at(target)) => {}
            }
            self.run_tick(target);
            target = target + self.shared.interval;
        }
    }

    fn unregister(&self, id: u64) -> bool {
        let mut actors = self.shared.actors.lock().unwrap_or_else(|e| e.into_inner());
        let before = actors.len();
        actors.retain(|r| r.id != id);
        actors.len() != before
    }

    pub fn actor_count(&self) -> usize {
        self.shared
            .actors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// The slot an actor occupies in the scheduler. Consuming it removes the
/// actor from the tick loop; its mailbox and any outstanding refs keep
/// working but nothing drains them afterwards.
pub struct TickSubscription {
    id: u64,
    name: Arc<str>,
    shared: Weak<Shared>,
}

impl TickSubscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unregister(self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => TickScheduler { shared }.unregister(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for TickSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickSubscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
