use shroomtick::ActorRef;
use shroomtick::TickScheduler;
use shroomtick::TickSubscription;

use crate::ids::ChannelId;
use crate::ids::RoomId;
use crate::ids::WorldId;
use crate::room::RoomActor;
use crate::room::RoomMsg;
use crate::room::RoomSession;
use crate::world::ChannelActor;
use crate::world::ChannelMsg;
use crate::world::WorldActor;
use crate::world::WorldMsg;

/// Composes scheduler registration with parent notification. Every
/// `create_*` call registers the new actor for ticking, tells the parent
/// about it, and leaves behind a guard that undoes both.
pub struct RoomServer {
    scheduler: TickScheduler,
}

impl RoomServer {
    pub fn new(scheduler: TickScheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn create_world<S: RoomSession>(&self, id: WorldId) -> WorldHandle<S> {
        let (actor, sub) = self.scheduler.register(WorldActor::<S>::new(id));
        WorldHandle {
            id,
            actor,
            guard: TopologyGuard::new(sub, None),
        }
    }

    pub fn create_channel<S: RoomSession>(
        &self,
        world: &WorldHandle<S>,
        id: ChannelId,
    ) -> ChannelHandle<S> {
        let (actor, sub) = self.scheduler.register(ChannelActor::<S>::new(id));
        world.actor.try_post(WorldMsg::RegisterChannel {
            id,
            channel: actor.clone(),
        });

        let parent = world.actor.clone();
        ChannelHandle {
            id,
            actor,
            guard: TopologyGuard::new(
                sub,
                Some(Box::new(move || {
                    parent.try_post(WorldMsg::RemoveChannel(id));
                })),
            ),
        }
    }

    pub fn create_room<S: RoomSession>(
        &self,
        channel: &ChannelHandle<S>,
        id: RoomId,
    ) -> RoomHandle<S> {
        let (actor, sub) = self.scheduler.register(RoomActor::<S>::new(id));
        channel.actor.try_post(ChannelMsg::RegisterRoom {
            id,
            room: actor.clone(),
        });

        let parent = channel.actor.clone();
        RoomHandle {
            id,
            actor,
            guard: TopologyGuard::new(
                sub,
                Some(Box::new(move || {
                    parent.try_post(ChannelMsg::RemoveRoom(id));
                })),
            ),
        }
    }
}

/// Undo for one topology node: notify the parent, then free the tick
/// slot. Consumed explicitly; an undisposed handle simply keeps its actor
/// ticking for the life of the scheduler.
pub struct TopologyGuard {
    sub: TickSubscription,
    undo: Option<Box<dyn FnOnce() + Send>>,
}

impl TopologyGuard {
    fn new(sub: TickSubscription, undo: Option<Box<dyn FnOnce() + Send>>) -> Self {
        Self { sub, undo }
    }

    fn dispose(self) {
        if let Some(undo) = self.undo {
            undo();
        }
        self.sub.unregister();
    }
}

pub struct WorldHandle<S: RoomSession> {
    pub id: WorldId,
    pub actor: ActorRef<WorldMsg<S>>,
    guard: TopologyGuard,
}

impl<S: RoomSession> WorldHandle<S> {
    pub fn dispose(self) {
        self.guard.dispose();
    }
}

pub struct ChannelHandle<S: RoomSession> {
    pub id: ChannelId,
    pub actor: ActorRef<ChannelMsg<S>>,
    guard: TopologyGuard,
}

impl<S: RoomSession> ChannelHandle<S> {
    pub fn dispose(self) {
        self.guard.dispose();
    }
}

pub struct RoomHandle<S: RoomSession> {
    pub id: RoomId,
    pub actor: ActorRef<RoomMsg<S>>,
    guard: TopologyGuard,
}

impl<S: RoomSession> RoomHandle<S> {
    pub fn dispose(self) {
        self.guard.dispose();
    }
}
