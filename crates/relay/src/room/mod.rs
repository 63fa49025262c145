mod authority;
mod buffer;
mod events;
mod handle;

use std::collections::VecDeque;
use std::sync::Arc;

pub use authority::{
    AuthorityError, Handoff, Members, ObjectAuthority, ObjectState, RequestOutcome,
};
pub use buffer::{ReplayBuffer, ReplayEntry, ReplayKey};
pub use events::{DisconnectReason, RoomEvent};
pub use handle::{RoomCommand, RoomHandle, spawn_room};

use crate::protocol::{
    AddressingMode, ClientId, FrameBytes, FrameError, InboundFrame, MessageType, ObjectId,
    decode_inbound, encode_outbound, object_client_pair, object_client_payload, object_id,
};
use crate::session::{ClientSession, FrameSender};

pub type RoomId = u64;

pub const DEFAULT_MAX_CLIENTS: usize = 32;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_clients: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("room is full ({max} clients)")]
    RoomFull { max: usize },
    #[error("no free client id")]
    IdsExhausted,
    #[error("room is closed")]
    RoomClosed,
}

/// Why an inbound frame was dropped. None of these disconnect the sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("client {0} is not in the room")]
    UnknownSender(ClientId),
    #[error(transparent)]
    Malformed(#[from] FrameError),
    #[error("unrecognized addressing mode {0}")]
    UnrecognizedAddressing(u8),
    #[error("unrecognized message type {0} for the server")]
    UnrecognizedMessageType(u8),
    #[error("message type {0} is reserved for the server")]
    ReservedMessageType(u8),
    #[error("message type {message_type} cannot be sent with addressing mode {target}")]
    Misaddressed { target: u8, message_type: u8 },
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub members: usize,
    pub replay_len: usize,
    pub objects: usize,
    pub frames_received: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
}

/// One broadcast domain.
///
/// All mutation goes through `join`, `receive` and `leave`; the owner of a
/// `Room` must call them one at a time (see [`spawn_room`]). Sends never
/// block: each one is an enqueue on the recipient's channel, and a closed
/// channel evicts that recipient once the current operation has finished
/// its fan-out.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    members: Members,
    replay: ReplayBuffer,
    authority: ObjectAuthority,
    next_client_id: ClientId,
    departing: VecDeque<(ClientSession, DisconnectReason)>,
    pending_events: VecDeque<RoomEvent>,
    frames_received: u64,
    frames_relayed: u64,
    frames_dropped: u64,
    bytes_received: u64,
}

impl Room {
    pub fn new(id: RoomId, config: RoomConfig) -> Self {
        Self {
            id,
            config,
            members: Members::new(),
            replay: ReplayBuffer::new(),
            authority: ObjectAuthority::new(),
            next_client_id: 1,
            departing: VecDeque::new(),
            pending_events: VecDeque::new(),
            frames_received: 0,
            frames_relayed: 0,
            frames_dropped: 0,
            bytes_received: 0,
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.members.contains_key(&client_id)
    }

    pub fn member(&self, client_id: ClientId) -> Option<&ClientSession> {
        self.members.get(&client_id)
    }

    pub fn member_ids(&self) -> Vec<ClientId> {
        self.members.keys().copied().collect()
    }

    pub fn host_id(&self) -> Option<ClientId> {
        self.members
            .values()
            .find(|s| s.is_host())
            .map(|s| s.id())
    }

    pub fn authority(&self) -> &ObjectAuthority {
        &self.authority
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = RoomEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn stats(&self) -> RoomStats {
        RoomStats {
            members: self.members.len(),
            replay_len: self.replay.len(),
            objects: self.authority.len(),
            frames_received: self.frames_received,
            frames_relayed: self.frames_relayed,
            frames_dropped: self.frames_dropped,
            bytes_received: self.bytes_received,
        }
    }

    /// Admits a new client. Existing members hear about it first, then the
    /// joiner gets its id and the full replay buffer before anything else.
    pub fn join(&mut self, sender: FrameSender) -> Result<ClientId, JoinError> {
        if self.members.len() >= self.config.max_clients {
            return Err(JoinError::RoomFull {
                max: self.config.max_clients,
            });
        }
        let client_id = self.allocate_client_id().ok_or(JoinError::IdsExhausted)?;

        let announce = server_frame(client_id, MessageType::NewConnection, &[]);
        self.fan_out(&announce, |_| true);

        self.members
            .insert(client_id, ClientSession::new(client_id, sender));
        self.pending_events
            .push_back(RoomEvent::ClientJoined { client_id });
        self.deliver_replay(client_id);
        self.replay
            .push(ReplayKey::Connection(client_id), announce);

        // The old host may have been evicted by the announce above.
        if self.host_id().is_none() {
            self.elect_host();
        }

        self.settle();
        Ok(client_id)
    }

    /// Relays one inbound frame from `sender`. Errors mean the frame was
    /// dropped; the sender stays connected.
    pub fn receive(&mut self, sender: ClientId, data: &[u8]) -> Result<(), DropReason> {
        self.frames_received += 1;
        self.bytes_received += data.len() as u64;

        let result = self.dispatch(sender, data);
        if result.is_err() {
            self.frames_dropped += 1;
        }

        self.settle();
        result
    }

    /// Removes a client. Returns false if it was not a member.
    pub fn leave(&mut self, client_id: ClientId, reason: DisconnectReason) -> bool {
        let present = self.evict(client_id, reason);
        self.settle();
        present
    }

    fn dispatch(&mut self, sender: ClientId, data: &[u8]) -> Result<(), DropReason> {
        if !self.members.contains_key(&sender) {
            return Err(DropReason::UnknownSender(sender));
        }

        let frame = decode_inbound(data)?;
        if let Some(kind) = frame.kind().filter(|k| k.is_server_only()) {
            return Err(DropReason::ReservedMessageType(kind.as_byte()));
        }

        match frame.addressing() {
            Some(AddressingMode::Server) => self.handle_control(sender, &frame),
            Some(AddressingMode::Host) => {
                if frame.kind().is_some_and(|k| k.is_authority_control()) {
                    return Err(DropReason::Misaddressed {
                        target: frame.target,
                        message_type: frame.message_type,
                    });
                }
                if let Some(host) = self.host_id() {
                    let outbound = encode_outbound(sender, frame.message_type, frame.payload);
                    self.unicast(host, outbound.into());
                }
                Ok(())
            }
            Some(mode) => self.relay(sender, mode, &frame),
            None => Err(DropReason::UnrecognizedAddressing(frame.target)),
        }
    }

    fn relay(
        &mut self,
        sender: ClientId,
        mode: AddressingMode,
        frame: &InboundFrame<'_>,
    ) -> Result<(), DropReason> {
        let key = match frame.kind() {
            Some(MessageType::Instantiate) => {
                let object_id = parse_object_id(MessageType::Instantiate, frame.payload)?;
                self.authority
                    .instantiate(&mut self.members, sender, object_id)?;
                Some(ReplayKey::Object(object_id))
            }
            Some(MessageType::Destroy) => {
                let object_id = parse_object_id(MessageType::Destroy, frame.payload)?;
                self.destroy_object(sender, object_id)?;
                // A destroy obsoletes the buffered frames instead of joining them.
                None
            }
            Some(
                MessageType::RequestObjectControlAuthority
                | MessageType::TransferObjectControlAuthority,
            ) => {
                return Err(DropReason::Misaddressed {
                    target: frame.target,
                    message_type: frame.message_type,
                });
            }
            _ => Some(ReplayKey::Opaque),
        };

        let outbound: FrameBytes =
            encode_outbound(sender, frame.message_type, frame.payload).into();
        self.broadcast(sender, mode.includes_sender(), &outbound);

        if let Some(key) = key.filter(|_| mode.is_buffered()) {
            self.replay.push(key, outbound);
        }

        log::debug!(
            "room {}: relayed type {} from client {} ({:?})",
            self.id,
            frame.message_type,
            sender,
            mode
        );
        Ok(())
    }

    fn handle_control(
        &mut self,
        sender: ClientId,
        frame: &InboundFrame<'_>,
    ) -> Result<(), DropReason> {
        let Some(kind) = frame.kind() else {
            return Err(DropReason::UnrecognizedMessageType(frame.message_type));
        };

        match kind {
            MessageType::Instantiate => {
                let object_id = parse_object_id(kind, frame.payload)?;
                self.authority
                    .instantiate(&mut self.members, sender, object_id)?;

                let outbound: FrameBytes =
                    encode_outbound(sender, frame.message_type, frame.payload).into();
                self.broadcast(sender, true, &outbound);
                self.replay.push(ReplayKey::Object(object_id), outbound);
            }
            MessageType::Destroy => {
                let object_id = parse_object_id(kind, frame.payload)?;
                match self
                    .authority
                    .acknowledge(&mut self.members, sender, object_id)?
                {
                    Some(handoff) => self.notify_handoff(handoff),
                    None => {
                        self.destroy_object(sender, object_id)?;
                        let outbound: FrameBytes =
                            encode_outbound(sender, frame.message_type, frame.payload).into();
                        self.broadcast(sender, true, &outbound);
                    }
                }
            }
            MessageType::RequestObjectControlAuthority => {
                let object_id = parse_object_id(kind, frame.payload)?;
                if let RequestOutcome::Forwarded { owner } =
                    self.authority.request(sender, object_id)?
                {
                    self.pending_events
                        .push_back(RoomEvent::AuthorityRequested {
                            object_id,
                            owner,
                            requester: sender,
                        });
                    let payload = object_client_payload(object_id, sender);
                    self.unicast(
                        owner,
                        server_frame(sender, MessageType::TransferObjectControlAuthority, &payload),
                    );
                }
            }
            MessageType::TransferObjectControlAuthority => {
                let (object_id, to) = object_client_pair(frame.payload)
                    .ok_or(AuthorityError::Malformed(kind))?;
                let handoff = self
                    .authority
                    .transfer(&mut self.members, sender, object_id, to)?;
                self.notify_handoff(handoff);
            }
            _ => return Err(DropReason::UnrecognizedMessageType(frame.message_type)),
        }

        Ok(())
    }

    fn destroy_object(&mut self, sender: ClientId, object_id: ObjectId) -> Result<(), DropReason> {
        self.authority
            .destroy(&mut self.members, sender, object_id)?;
        let compacted = self.replay.remove_object(object_id);
        log::debug!(
            "room {}: object {:#010x} destroyed, {} buffered frames dropped",
            self.id,
            object_id,
            compacted
        );
        self.pending_events
            .push_back(RoomEvent::ObjectDestroyed {
                object_id,
                owner: sender,
            });
        Ok(())
    }

    /// Tells the new owner it now holds the object, on behalf of the old one.
    /// Buffered objects keep their latest handoff for later joiners.
    fn notify_handoff(&mut self, handoff: Handoff) {
        self.pending_events
            .push_back(RoomEvent::AuthorityTransferred {
                object_id: handoff.object_id,
                from: handoff.from,
                to: handoff.to,
            });
        let payload = object_client_payload(handoff.object_id, handoff.to);
        let frame = server_frame(
            handoff.from,
            MessageType::TransferObjectControlAuthority,
            &payload,
        );
        if self.replay.contains_object(handoff.object_id) {
            self.replay
                .replace(ReplayKey::Handoff(handoff.object_id), Arc::clone(&frame));
        }
        self.unicast(handoff.to, frame);
    }

    fn broadcast(&mut self, sender: ClientId, include_sender: bool, frame: &FrameBytes) {
        self.fan_out(frame, |id| include_sender || id != sender);
    }

    fn fan_out(&mut self, frame: &FrameBytes, include: impl Fn(ClientId) -> bool) {
        let mut failed = Vec::new();
        for session in self.members.values_mut() {
            if !include(session.id()) {
                continue;
            }
            match session.send(Arc::clone(frame)) {
                Ok(()) => self.frames_relayed += 1,
                Err(e) => failed.push(e.0),
            }
        }

        for client_id in failed {
            self.evict(client_id, DisconnectReason::SendFailed);
        }
    }

    fn unicast(&mut self, client_id: ClientId, frame: FrameBytes) -> bool {
        let Some(session) = self.members.get_mut(&client_id) else {
            return false;
        };
        if session.send(frame).is_err() {
            self.evict(client_id, DisconnectReason::SendFailed);
            return false;
        }
        self.frames_relayed += 1;
        true
    }

    fn deliver_replay(&mut self, client_id: ClientId) {
        let Some(session) = self.members.get_mut(&client_id) else {
            return;
        };

        let register = server_frame(client_id, MessageType::Register, &[]);
        let mut delivered = session.send(register).is_ok();
        for frame in self.replay.frames() {
            if !delivered {
                break;
            }
            delivered = session.send(Arc::clone(frame)).is_ok();
        }

        if delivered {
            self.frames_relayed += 1 + self.replay.len() as u64;
        } else {
            self.evict(client_id, DisconnectReason::SendFailed);
        }
    }

    fn promote(&mut self, client_id: ClientId) {
        let Some(session) = self.members.get_mut(&client_id) else {
            return;
        };
        session.set_host(true);
        log::info!("room {}: client {} is now host", self.id, client_id);
        self.pending_events
            .push_back(RoomEvent::HostMigrated { client_id });
        self.unicast(
            client_id,
            server_frame(client_id, MessageType::MigrateHost, &[]),
        );
    }

    /// Lowest remaining client id wins.
    fn elect_host(&mut self) {
        if let Some(&client_id) = self.members.keys().next() {
            self.promote(client_id);
        }
    }

    fn evict(&mut self, client_id: ClientId, reason: DisconnectReason) -> bool {
        match self.members.remove(&client_id) {
            Some(session) => {
                self.departing.push_back((session, reason));
                true
            }
            None => false,
        }
    }

    /// Finishes every pending departure, including ones caused by sends
    /// that fail while announcing earlier departures.
    fn settle(&mut self) {
        while let Some((session, reason)) = self.departing.pop_front() {
            self.finish_departure(session, reason);
        }
    }

    fn finish_departure(&mut self, session: ClientSession, reason: DisconnectReason) {
        let client_id = session.id();
        drop(session);

        match reason {
            DisconnectReason::SendFailed => {
                log::warn!("room {}: client {} {}", self.id, client_id, reason.as_str())
            }
            _ => log::info!("room {}: client {} {}", self.id, client_id, reason.as_str()),
        }
        self.pending_events
            .push_back(RoomEvent::ClientLeft { client_id, reason });

        self.replay.remove_connection(client_id);
        self.authority.cancel_requests_from(client_id);

        let exit = server_frame(client_id, MessageType::ExitConnection, &[]);
        self.fan_out(&exit, |_| true);

        if self.host_id().is_none() {
            self.elect_host();
        }

        let heir = self.host_id();
        for handoff in self
            .authority
            .release_client(&mut self.members, client_id, heir)
        {
            self.notify_handoff(handoff);
        }
    }

    fn allocate_client_id(&mut self) -> Option<ClientId> {
        for _ in 0..=ClientId::MAX {
            let candidate = self.next_client_id;
            self.next_client_id = self.next_client_id.wrapping_add(1);
            if candidate != 0 && !self.members.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn server_frame(sender_id: ClientId, kind: MessageType, payload: &[u8]) -> FrameBytes {
    encode_outbound(sender_id, kind.as_byte(), payload).into()
}

fn parse_object_id(kind: MessageType, payload: &[u8]) -> Result<ObjectId, AuthorityError> {
    object_id(payload).ok_or(AuthorityError::Malformed(kind))
}
