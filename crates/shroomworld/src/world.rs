use std::collections::HashMap;

use shroomtick::Actor;
use shroomtick::ActorRef;
use shroomtick::Ticks;

use crate::ids::ChannelId;
use crate::ids::RoomId;
use crate::ids::WorldId;
use crate::room::RoomMsg;
use crate::room::RoomSession;

pub type WorldAction<S> = Box<dyn FnOnce(&mut WorldActor<S>, Ticks) + Send>;
pub type ChannelAction<S> = Box<dyn FnOnce(&mut ChannelActor<S>, Ticks) + Send>;

pub enum WorldMsg<S: RoomSession> {
    RegisterChannel {
        id: ChannelId,
        channel: ActorRef<ChannelMsg<S>>,
    },
    RemoveChannel(ChannelId),
    Action(WorldAction<S>),
}

pub enum ChannelMsg<S: RoomSession> {
    RegisterRoom {
        id: RoomId,
        room: ActorRef<RoomMsg<S>>,
    },
    RemoveRoom(RoomId),
    Action(ChannelAction<S>),
}

/// Top of the topology: a registry of channels. Registration commands
/// mutate the map immediately; actions queue up and run at the next tick
/// body, then the queue clears.
pub struct WorldActor<S: RoomSession> {
    name: String,
    id: WorldId,
    channels: HashMap<ChannelId, ActorRef<ChannelMsg<S>>>,
    pending: Vec<WorldAction<S>>,
}

impl<S: RoomSession> WorldActor<S> {
    pub fn new(id: WorldId) -> Self {
        Self {
            name: format!("world-{id}"),
            id,
            channels: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ActorRef<ChannelMsg<S>>> {
        self.channels.get(&id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl<S: RoomSession> Actor for WorldActor<S> {
    type Msg = WorldMsg<S>;

    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, msg: WorldMsg<S>, _now: Ticks) {
        match msg {
            WorldMsg::RegisterChannel { id, channel } => {
                self.channels.insert(id, channel);
            }
            WorldMsg::RemoveChannel(id) => {
                self.channels.remove(&id);
            }
            WorldMsg::Action(a) => self.pending.push(a),
        }
    }

    fn on_tick(&mut self, now: Ticks) {
        for action in std::mem::take(&mut self.pending) {
            action(self, now);
        }
    }
}

/// One game channel inside a world: a registry of rooms, with the same
/// deferred-action semantics as the world.
pub struct ChannelActor<S: RoomSession> {
    name: String,
    id: ChannelId,
    rooms: HashMap<RoomId, ActorRef<RoomMsg<S>>>,
    pending: Vec<ChannelAction<S>>,
}

impl<S: RoomSession> ChannelActor<S> {
    pub fn new(id: ChannelId) -> Self {
        Self {
            name: format!("channel-{id}"),
            id,
            rooms: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn room(&self, id: RoomId) -> Option<&ActorRef<RoomMsg<S>>> {
        self.rooms.get(&id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl<S: RoomSession> Actor for ChannelActor<S> {
    type Msg = ChannelMsg<S>;

    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, msg: ChannelMsg<S>, _now: Ticks) {
        match msg {
            ChannelMsg::RegisterRoom { id, room } => {
                self.rooms.insert(id, room);
            }
            ChannelMsg::RemoveRoom(id) => {
                self.rooms.remove(&id);
            }
            ChannelMsg::Action(a) => self.pending.push(a),
        }
    }

    fn on_tick(&mut self, now: Ticks) {
        for action in std::mem::take(&mut self.pending) {
            action(self, now);
        }
    }
}
