//! Object control authority: who owns which object, and the
//! request -> transfer handoff between clients.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::{ClientId, MessageType, ObjectId};
use crate::session::ClientSession;

pub type Members = BTreeMap<ClientId, ClientSession>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Owned(ClientId),
    /// The owner has been asked to relinquish the object to `requester`.
    /// There is no timeout; an owner that never answers leaves it here.
    TransferPending {
        owner: ClientId,
        requester: ClientId,
    },
}

impl ObjectState {
    pub fn owner(&self) -> ClientId {
        match *self {
            Self::Owned(owner) => owner,
            Self::TransferPending { owner, .. } => owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    #[error("object {0:#010x} is not tracked")]
    UnknownObject(ObjectId),
    #[error("object {0:#010x} already exists")]
    DuplicateObject(ObjectId),
    #[error("client {client_id} does not own object {object_id:#010x}")]
    NotOwner {
        object_id: ObjectId,
        client_id: ClientId,
    },
    #[error("ownership conflict on object {object_id:#010x}: {reason}")]
    OwnershipConflict {
        object_id: ObjectId,
        reason: &'static str,
    },
    #[error("client {0} is not in the room")]
    UnknownClient(ClientId),
    #[error("payload too short for {0:?}")]
    Malformed(MessageType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    AlreadyOwner,
    Forwarded { owner: ClientId },
}

/// A completed change of owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub object_id: ObjectId,
    pub from: ClientId,
    pub to: ClientId,
}

#[derive(Debug, Default)]
pub struct ObjectAuthority {
    objects: HashMap<ObjectId, ObjectState>,
}

impl ObjectAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, object_id: ObjectId) -> Option<ObjectState> {
        self.objects.get(&object_id).copied()
    }

    pub fn owner_of(&self, object_id: ObjectId) -> Option<ClientId> {
        self.state(object_id).map(|s| s.owner())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn instantiate(
        &mut self,
        members: &mut Members,
        owner: ClientId,
        object_id: ObjectId,
    ) -> Result<(), AuthorityError> {
        if self.objects.contains_key(&object_id) {
            return Err(AuthorityError::DuplicateObject(object_id));
        }
        let session = members
            .get_mut(&owner)
            .ok_or(AuthorityError::UnknownClient(owner))?;

        session.add_object(object_id);
        self.objects.insert(object_id, ObjectState::Owned(owner));
        Ok(())
    }

    pub fn destroy(
        &mut self,
        members: &mut Members,
        sender: ClientId,
        object_id: ObjectId,
    ) -> Result<(), AuthorityError> {
        self.check_owner(sender, object_id)?;

        self.objects.remove(&object_id);
        if let Some(session) = members.get_mut(&sender) {
            session.remove_object(object_id);
        }
        Ok(())
    }

    pub fn request(
        &mut self,
        requester: ClientId,
        object_id: ObjectId,
    ) -> Result<RequestOutcome, AuthorityError> {
        let state = self
            .objects
            .get_mut(&object_id)
            .ok_or(AuthorityError::UnknownObject(object_id))?;

        match *state {
            ObjectState::Owned(owner) if owner == requester => Ok(RequestOutcome::AlreadyOwner),
            ObjectState::Owned(owner) => {
                *state = ObjectState::TransferPending { owner, requester };
                Ok(RequestOutcome::Forwarded { owner })
            }
            ObjectState::TransferPending { owner, .. } if owner == requester => {
                Ok(RequestOutcome::AlreadyOwner)
            }
            ObjectState::TransferPending { .. } => Err(AuthorityError::OwnershipConflict {
                object_id,
                reason: "a transfer is already pending",
            }),
        }
    }

    /// Completes a pending transfer on the owner's acknowledgement.
    /// Returns `None` when nothing is pending for the object.
    pub fn acknowledge(
        &mut self,
        members: &mut Members,
        sender: ClientId,
        object_id: ObjectId,
    ) -> Result<Option<Handoff>, AuthorityError> {
        match self.check_owner(sender, object_id)? {
            ObjectState::TransferPending { requester, .. } => self
                .transfer(members, sender, object_id, requester)
                .map(Some),
            ObjectState::Owned(_) => Ok(None),
        }
    }

    pub fn transfer(
        &mut self,
        members: &mut Members,
        sender: ClientId,
        object_id: ObjectId,
        to: ClientId,
    ) -> Result<Handoff, AuthorityError> {
        let state = self.check_owner(sender, object_id)?;

        if let ObjectState::TransferPending { requester, .. } = state {
            if requester != to {
                return Err(AuthorityError::OwnershipConflict {
                    object_id,
                    reason: "transfer is pending to another client",
                });
            }
        }
        if !members.contains_key(&to) {
            return Err(AuthorityError::OwnershipConflict {
                object_id,
                reason: "recipient is not in the room",
            });
        }

        self.move_object(members, object_id, sender, to);
        Ok(Handoff {
            object_id,
            from: sender,
            to,
        })
    }

    /// Drops pending requests made by a client that has left.
    pub fn cancel_requests_from(&mut self, requester: ClientId) -> Vec<ObjectId> {
        let mut cancelled = Vec::new();
        for (&object_id, state) in self.objects.iter_mut() {
            if let ObjectState::TransferPending { owner, requester: r } = *state {
                if r == requester {
                    *state = ObjectState::Owned(owner);
                    cancelled.push(object_id);
                }
            }
        }
        cancelled.sort_unstable();
        cancelled
    }

    /// Hands the objects of a departed client to whoever was waiting on
    /// them, otherwise to `heir`. Objects with no remaining recipient are
    /// forgotten.
    pub fn release_client(
        &mut self,
        members: &mut Members,
        leaver: ClientId,
        heir: Option<ClientId>,
    ) -> Vec<Handoff> {
        let mut orphaned: Vec<(ObjectId, ObjectState)> = self
            .objects
            .iter()
            .filter(|(_, state)| state.owner() == leaver)
            .map(|(&id, &state)| (id, state))
            .collect();
        orphaned.sort_unstable_by_key(|&(id, _)| id);

        let heir = heir.filter(|id| members.contains_key(id));
        let mut handoffs = Vec::new();
        for (object_id, state) in orphaned {
            let pending = match state {
                ObjectState::TransferPending { requester, .. } => Some(requester),
                ObjectState::Owned(_) => None,
            };
            let recipient = pending
                .filter(|id| members.contains_key(id))
                .or(heir);

            match recipient {
                Some(to) => {
                    self.move_object(members, object_id, leaver, to);
                    handoffs.push(Handoff {
                        object_id,
                        from: leaver,
                        to,
                    });
                }
                None => {
                    self.objects.remove(&object_id);
                }
            }
        }
        handoffs
    }

    fn check_owner(
        &self,
        client_id: ClientId,
        object_id: ObjectId,
    ) -> Result<ObjectState, AuthorityError> {
        let state = self
            .state(object_id)
            .ok_or(AuthorityError::UnknownObject(object_id))?;
        if state.owner() != client_id {
            return Err(AuthorityError::NotOwner {
                object_id,
                client_id,
            });
        }
        Ok(state)
    }

    fn move_object(
        &mut self,
        members: &mut Members,
        object_id: ObjectId,
        from: ClientId,
        to: ClientId,
    ) {
        if let Some(session) = members.get_mut(&from) {
            session.remove_object(object_id);
        }
        if let Some(session) = members.get_mut(&to) {
            session.add_object(object_id);
        }
        self.objects.insert(object_id, ObjectState::Owned(to));
    }
}
