/// WebSocket close codes used by the messaging gateway.
///
/// Clients rely on distinct codes to tell an expired token apart from a
/// membership problem, so these are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Missing, malformed or expired bearer token.
    Unauthenticated,
    /// Authenticated but not allowed: not a participant, thread not
    /// accepted, no recent check-in, or blocked.
    Forbidden,
    /// The thread or place does not exist.
    NotFound,
    /// A newer connection for the same (channel, user) replaced this one.
    Superseded,
    /// Evicted by the reaper after missing pings past the staleness cutoff.
    Stale,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Unauthenticated => 4401,
            Self::Forbidden => 4403,
            Self::NotFound => 4404,
            Self::Superseded => 4405,
            Self::Stale => 4406,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not found",
            Self::Superseded => "superseded by a newer connection",
            Self::Stale => "connection idle past staleness threshold",
        }
    }
}
