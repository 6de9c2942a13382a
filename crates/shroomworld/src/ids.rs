//! Opaque identifiers for the topology and the character store. Equality
//! and hashing only; none of these support arithmetic.

use serde::Deserialize;
use serde::Serialize;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(WorldId);
id_type!(ChannelId);
id_type!(MapId);
id_type!(AccountId);
id_type!(CharacterId);
id_type!(
    /// One connected player, as the room and session manager track it.
    SessionId
);

/// A room is one instance of one map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RoomId {
    pub instance: u32,
    pub map: MapId,
}

impl RoomId {
    pub fn new(instance: u32, map: MapId) -> Self {
        Self { instance, map }
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.instance, self.map)
    }
}
