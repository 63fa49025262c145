use crate::protocol::{ClientId, ObjectId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ClientJoined {
        client_id: ClientId,
    },
    ClientLeft {
        client_id: ClientId,
        reason: DisconnectReason,
    },
    HostMigrated {
        client_id: ClientId,
    },
    AuthorityRequested {
        object_id: ObjectId,
        owner: ClientId,
        requester: ClientId,
    },
    AuthorityTransferred {
        object_id: ObjectId,
        from: ClientId,
        to: ClientId,
    },
    ObjectDestroyed {
        object_id: ObjectId,
        owner: ClientId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    SendFailed,
    Removed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Closed => "disconnected",
            DisconnectReason::SendFailed => "lost (send failed)",
            DisconnectReason::Removed => "removed",
        }
    }
}
