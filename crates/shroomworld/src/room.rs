use std::collections::HashMap;

use shroomtick::Actor;
use shroomtick::Ticks;
use tracing::debug;

use crate::ids::RoomId;
use crate::ids::SessionId;

/// What a room needs from the things it contains. Implemented by
/// [`Session`](crate::session::Session); tests substitute lighter types.
pub trait RoomSession: Send + 'static {
    fn session_id(&self) -> SessionId;
    fn tick(&mut self, now: Ticks);
    fn tick_end(&mut self, now: Ticks);
}

/// A deferred piece of work executed inside the room actor, with access
/// to its state.
pub type RoomAction<S> = Box<dyn FnOnce(&mut RoomActor<S>, Ticks) + Send>;

pub enum RoomMsg<S: RoomSession> {
    /// Hand a session to the room. The room becomes its sole owner; a
    /// duplicate session id is ignored (and the duplicate dropped).
    AddSession(S),
    /// Remove and drop a session. Unknown ids are ignored.
    RemoveSession(SessionId),
    /// Run an action against the room during message drain.
    Action(RoomAction<S>),
}

/// One map instance. Owns an ordered list of sessions plus an id lookup;
/// every tick it drives each session's inbound drain and logic, and at
/// tick-end each session's slow-consumer handling.
pub struct RoomActor<S: RoomSession> {
    name: String,
    id: RoomId,
    sessions: Vec<S>,
    index: HashMap<SessionId, usize>,
}

impl<S: RoomSession> RoomActor<S> {
    pub fn new(id: RoomId) -> Self {
        Self {
            name: format!("room-{id}"),
            id,
            sessions: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut S> {
        let i = *self.index.get(&id)?;
        Some(&mut self.sessions[i])
    }

    /// Visit every session in join order.
    pub fn for_each_session(&mut self, mut f: impl FnMut(&mut S)) {
        for s in &mut self.sessions {
            f(s);
        }
    }

    fn add_session(&mut self, session: S) {
        let id = session.session_id();
        if self.index.contains_key(&id) {
            debug!(room = %self.id, session = %id, "duplicate session ignored");
            return;
        }
        self.index.insert(id, self.sessions.len());
        self.sessions.push(session);
    }

    fn remove_session(&mut self, id: SessionId) {
        let Some(i) = self.index.remove(&id) else {
            return;
        };
        // Order matters to gameplay, so shift rather than swap.
        self.sessions.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
    }
}

impl<S: RoomSession> Actor for RoomActor<S> {
    type Msg = RoomMsg<S>;

    fn name(&self) -> &str {
        &self.name
    }

    fn on_message(&mut self, msg: RoomMsg<S>, now: Ticks) {
        match msg {
            RoomMsg::AddSession(s) => self.add_session(s),
            RoomMsg::RemoveSession(id) => self.remove_session(id),
            RoomMsg::Action(action) => action(self, now),
        }
    }

    fn on_tick(&mut self, now: Ticks) {
        for s in &mut self.sessions {
            s.tick(now);
        }
    }

    fn on_tick_end(&mut self, now: Ticks) {
        for s in &mut self.sessions {
            s.tick_end(now);
        }
    }
}
