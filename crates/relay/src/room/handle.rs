use tokio::sync::{mpsc, oneshot};

use super::{DisconnectReason, DropReason, JoinError, Room, RoomEvent, RoomId, RoomStats};
use crate::protocol::ClientId;
use crate::session::FrameSender;

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        sender: FrameSender,
        reply: oneshot::Sender<Result<ClientId, JoinError>>,
    },
    Receive {
        client_id: ClientId,
        data: Vec<u8>,
    },
    Leave {
        client_id: ClientId,
        reason: DisconnectReason,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

/// Cheap, cloneable address of a running room task.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    commands: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// True once the room task has exited (its last member left).
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn join(&self, sender: FrameSender) -> Result<ClientId, JoinError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(RoomCommand::Join { sender, reply })
            .map_err(|_| JoinError::RoomClosed)?;
        response.await.map_err(|_| JoinError::RoomClosed)?
    }

    pub fn receive(&self, client_id: ClientId, data: Vec<u8>) -> bool {
        self.commands
            .send(RoomCommand::Receive { client_id, data })
            .is_ok()
    }

    pub fn leave(&self, client_id: ClientId, reason: DisconnectReason) -> bool {
        self.commands
            .send(RoomCommand::Leave { client_id, reason })
            .is_ok()
    }

    pub async fn stats(&self) -> Option<RoomStats> {
        let (reply, response) = oneshot::channel();
        self.commands.send(RoomCommand::Stats { reply }).ok()?;
        response.await.ok()
    }
}

/// Moves `room` into its own task. The task is the only code that touches
/// the room, so commands from all connections apply one at a time in
/// arrival order. It exits when a command leaves the room empty.
///
/// Must be called from within a tokio runtime.
pub fn spawn_room(room: Room) -> RoomHandle {
    let (commands, receiver) = mpsc::unbounded_channel();
    let handle = RoomHandle {
        id: room.id(),
        commands,
    };
    tokio::spawn(run_room(room, receiver));
    handle
}

async fn run_room(mut room: Room, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
    log::info!("room {} opened", room.id());

    while let Some(command) = commands.recv().await {
        let mutated = !matches!(command, RoomCommand::Stats { .. });

        match command {
            RoomCommand::Join { sender, reply } => {
                let result = room.join(sender);
                if let Err(e) = &result {
                    log::warn!("room {}: join rejected: {}", room.id(), e);
                }
                let _ = reply.send(result);
            }
            RoomCommand::Receive { client_id, data } => {
                if let Err(reason) = room.receive(client_id, &data) {
                    log_dropped(room.id(), client_id, &reason);
                }
            }
            RoomCommand::Leave { client_id, reason } => {
                room.leave(client_id, reason);
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(room.stats());
            }
        }

        log_events(&mut room);

        if mutated && room.is_empty() {
            break;
        }
    }

    let stats = room.stats();
    log::info!(
        "room {} closed: {} frames received, {} relayed, {} dropped",
        room.id(),
        stats.frames_received,
        stats.frames_relayed,
        stats.frames_dropped
    );
}

fn log_dropped(room_id: RoomId, client_id: ClientId, reason: &DropReason) {
    match reason {
        // Frames still in flight from a client the room already removed.
        DropReason::UnknownSender(_) => {
            log::debug!("room {}: dropped frame: {}", room_id, reason)
        }
        _ => log::warn!(
            "room {}: dropped frame from client {}: {}",
            room_id,
            client_id,
            reason
        ),
    }
}

fn log_events(room: &mut Room) {
    let room_id = room.id();
    for event in room.drain_events() {
        match event {
            RoomEvent::ClientJoined { client_id } => {
                log::info!("room {}: client {} joined", room_id, client_id);
            }
            RoomEvent::ClientLeft { client_id, reason } => {
                log::info!("room {}: client {} {}", room_id, client_id, reason.as_str());
            }
            RoomEvent::HostMigrated { client_id } => {
                log::info!("room {}: host is client {}", room_id, client_id);
            }
            RoomEvent::AuthorityRequested {
                object_id,
                owner,
                requester,
            } => {
                log::debug!(
                    "room {}: client {} requested object {:#010x} from client {}",
                    room_id,
                    requester,
                    object_id,
                    owner
                );
            }
            RoomEvent::AuthorityTransferred {
                object_id,
                from,
                to,
            } => {
                log::debug!(
                    "room {}: object {:#010x} moved from client {} to client {}",
                    room_id,
                    object_id,
                    from,
                    to
                );
            }
            RoomEvent::ObjectDestroyed { object_id, owner } => {
                log::debug!(
                    "room {}: client {} destroyed object {:#010x}",
                    room_id,
                    owner,
                    object_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AddressingMode, MessageType, decode_outbound, encode_inbound};
    use crate::room::RoomConfig;

    #[tokio::test]
    async fn test_join_and_relay_through_handle() {
        let handle = spawn_room(Room::new(7, RoomConfig::default()));
        assert_eq!(handle.id(), 7);

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = handle.join(tx_a).await.unwrap();
        let b = handle.join(tx_b).await.unwrap();
        assert_ne!(a, b);

        let data = encode_inbound(AddressingMode::OtherClients, MessageType::Rpc.as_byte(), b"hi");
        assert!(handle.receive(a, data));

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.members, 2);
        assert_eq!(stats.frames_received, 1);

        let mut last_b = None;
        while let Ok(frame) = rx_b.try_recv() {
            last_b = Some(decode_outbound(&frame).unwrap());
        }
        let last_b = last_b.unwrap();
        assert_eq!(last_b.sender_id, a);
        assert_eq!(last_b.payload, b"hi");

        while let Ok(frame) = rx_a.try_recv() {
            let frame = decode_outbound(&frame).unwrap();
            assert_ne!(frame.kind(), Some(MessageType::Rpc));
        }
    }

    #[tokio::test]
    async fn test_room_task_exits_when_last_member_leaves() {
        let handle = spawn_room(Room::new(1, RoomConfig::default()));

        let (tx, _rx) = mpsc::unbounded_channel();
        let client_id = handle.join(tx).await.unwrap();
        assert!(handle.leave(client_id, DisconnectReason::Closed));

        // The task drops its receiver on exit; stats can no longer be answered.
        assert!(handle.stats().await.is_none());
        assert!(handle.is_closed());

        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(handle.join(tx).await, Err(JoinError::RoomClosed));
    }
}
