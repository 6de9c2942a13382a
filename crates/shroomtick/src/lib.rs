//! `shroomtick`: the timing substrate for gameplay.
//!
//! One scheduler task drives every registered actor on a fixed millisecond
//! interval. Actors own their state outright; the scheduler's serialised
//! dispatch is the only thing that touches it, so actor code takes no
//! locks. Everything else crosses actor boundaries through bounded
//! mailboxes.

pub mod actor;
pub mod clock;
pub mod delay;
pub mod mailbox;
pub mod notifier;
pub mod scheduler;

pub use actor::Actor;
pub use actor::ActorRef;
pub use clock::GlobalClock;
pub use clock::Ticks;
pub use delay::DelayQueue;
pub use mailbox::OverflowPolicy;
pub use notifier::TickNotifier;
pub use notifier::TickWaiter;
pub use scheduler::TickScheduler;
pub use scheduler::TickSubscription;
