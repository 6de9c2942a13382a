use std::sync::Arc;

use crate::clock::Ticks;
use crate::mailbox::MailboxReceiver;
use crate::mailbox::MailboxSender;

/// A tick-driven entity with a private mailbox.
///
/// The scheduler guarantees serialised access: between consecutive tick
/// calls nothing else touches the actor's state, so implementations hold
/// no locks. Per tick the runtime drains the mailbox through
/// [`on_message`](Actor::on_message), then calls
/// [`on_tick`](Actor::on_tick); after every actor has ticked it runs the
/// [`on_tick_end`](Actor::on_tick_end) phase in the same order.
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    fn name(&self) -> &str;

    fn on_message(&mut self, msg: Self::Msg, now: Ticks);

    fn on_tick(&mut self, now: Ticks) {
        let _ = now;
    }

    fn on_tick_end(&mut self, now: Ticks) {
        let _ = now;
    }
}

/// Address of a registered actor. Cloneable; posting never touches the
/// actor's state, only its mailbox.
pub struct ActorRef<M> {
    name: Arc<str>,
    tx: MailboxSender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> ActorRef<M> {
    pub(crate) fn new(name: Arc<str>, tx: MailboxSender<M>) -> Self {
        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking post; `false` only under a rejecting mailbox policy.
    pub fn try_post(&self, msg: M) -> bool {
        self.tx.try_post(msg)
    }

    /// Non-blocking post that returns the message on refusal.
    pub fn offer(&self, msg: M) -> Result<(), M> {
        self.tx.offer(msg)
    }

    /// Post, waiting for mailbox space if necessary.
    pub async fn post(&self, msg: M) {
        self.tx.post(msg).await;
    }

    /// Messages this mailbox has evicted on overflow.
    pub fn dropped(&self) -> u64 {
        self.tx.dropped()
    }
}

impl<M> std::fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

/// Object-safe face the scheduler drives; pairs an actor with the receive
/// side of its mailbox.
pub(crate) trait TickTarget: Send {
    fn name(&self) -> &str;
    fn drive_tick(&mut self, now: Ticks);
    fn drive_tick_end(&mut self, now: Ticks);
}

pub(crate) struct ActorCell<A: Actor> {
    actor: A,
    mailbox: MailboxReceiver<A::Msg>,
}

impl<A: Actor> ActorCell<A> {
    pub(crate) fn new(actor: A, mailbox: MailboxReceiver<A::Msg>) -> Self {
        Self { actor, mailbox }
    }
}

impl<A: Actor> TickTarget for ActorCell<A> {
    fn name(&self) -> &str {
        self.actor.name()
    }

    fn drive_tick(&mut self, now: Ticks) {
        // Everything queued before this tick is delivered before the tick
        // body runs.
        while let Some(msg) = self.mailbox.try_recv() {
            self.actor.on_message(msg, now);
        }
        self.actor.on_tick(now);
    }

    fn drive_tick_end(&mut self, now: Ticks) {
        self.actor.on_tick_end(now);
    }
}
