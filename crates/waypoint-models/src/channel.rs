use std::fmt;

/// A broadcast domain: either a DM thread or a place-chat room.
///
/// The two id spaces are kept disjoint by construction; a thread id and a
/// place id can never collide inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Dm(i64),
    Place(i64),
}

impl ChannelId {
    pub fn kind(self) -> ChannelKind {
        match self {
            Self::Dm(_) => ChannelKind::Dm,
            Self::Place(_) => ChannelKind::Place,
        }
    }

    /// The raw thread or place id, without the kind discriminant.
    pub fn raw(self) -> i64 {
        match self {
            Self::Dm(id) | Self::Place(id) => id,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dm(id) => write!(f, "dm:{id}"),
            Self::Place(id) => write!(f, "place:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Dm,
    Place,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Place => "place",
        }
    }
}
