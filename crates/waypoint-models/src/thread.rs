use serde::{Deserialize, Serialize};

/// Lifecycle of a two-party DM thread.
///
/// `Accepted` is the only status under which socket messaging is allowed;
/// the pending → accepted/rejected transition may only be performed by the
/// participant who did not initiate the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Pending,
    Accepted,
    Rejected,
    Blocked,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// Order a pair of user ids canonically so a thread between two users is
/// keyed the same way regardless of who initiated it.
pub fn normalize_pair(user_a: i64, user_b: i64) -> (i64, i64) {
    if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    }
}
