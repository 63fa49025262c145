use std::net::SocketAddr;

use roomcast::{ClientId, RoomId};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        addr: SocketAddr,
        room_id: RoomId,
        client_id: ClientId,
    },
    ClientDisconnected {
        addr: SocketAddr,
        room_id: RoomId,
        client_id: ClientId,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::ClientConnected {
                addr,
                room_id,
                client_id,
            } => {
                log::info!(
                    "Client {} connected from {} (room {})",
                    client_id,
                    addr,
                    room_id
                );
            }
            ServerEvent::ClientDisconnected {
                addr,
                room_id,
                client_id,
            } => {
                log::info!(
                    "Client {} at {} disconnected (room {})",
                    client_id,
                    addr,
                    room_id
                );
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection denied to {}: {}", addr, reason);
            }
            ServerEvent::Error { message } => {
                log::error!("{}", message);
            }
        }
    }
}
