use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::clock::Ticks;

/// Fan-out of tick events. The scheduler publishes once per tick; any
/// number of waiters observe the same value.
#[derive(Debug)]
pub struct TickNotifier {
    tx: watch::Sender<Ticks>,
}

impl TickNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Ticks::ZERO);
        Self { tx }
    }

    pub fn publish(&self, now: Ticks) {
        self.tx.send_replace(now);
    }

    /// The most recently published tick.
    pub fn last_tick(&self) -> Ticks {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> TickWaiter {
        TickWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for TickNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the tick stream.
#[derive(Clone, Debug)]
pub struct TickWaiter {
    rx: watch::Receiver<Ticks>,
}

impl TickWaiter {
    /// Wait for the next published tick. `None` when cancelled or when
    /// the notifier is gone.
    pub async fn wait_next(&mut self, cancel: &CancellationToken) -> Option<Ticks> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            changed = self.rx.changed() => match changed {
                Ok(()) => Some(*self.rx.borrow_and_update()),
                Err(_) => None,
            },
        }
    }

    pub fn last_tick(&self) -> Ticks {
        *self.rx.borrow()
    }
}
