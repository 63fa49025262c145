use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use roomcast::{
    Connection, DirectoryError, JoinError, RoomDirectory, RoomHandle, RoomId, RoomStore,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;

type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Sends every new connection to one shared room, opening a fresh room
/// when the current one has closed.
#[derive(Debug)]
struct RoomAssigner {
    directory: RoomDirectory,
    current: Option<RoomId>,
}

impl RoomAssigner {
    fn new(directory: RoomDirectory) -> Self {
        Self {
            directory,
            current: None,
        }
    }

    fn assign(&mut self) -> Result<RoomHandle, DirectoryError> {
        if let Some(room_id) = self.current {
            match self.directory.lookup_room(room_id) {
                Ok(handle) => return Ok(handle),
                Err(DirectoryError::NotFound(_)) => self.current = None,
                Err(e) => return Err(e),
            }
        }

        let room_id = self.directory.allocate_room()?;
        self.current = Some(room_id);
        self.directory.lookup_room(room_id)
    }

    fn retire(&mut self, room_id: RoomId) {
        if self.current == Some(room_id) {
            self.current = None;
        }
    }
}

type SharedAssigner = Arc<Mutex<RoomAssigner>>;

pub struct RelayServer {
    listener: TcpListener,
    config: ServerConfig,
    rooms: SharedAssigner,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl RelayServer {
    pub async fn bind(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let directory = RoomDirectory::new(config.directory.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            config,
            rooms: Arc::new(Mutex::new(RoomAssigner::new(directory))),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until ctrl-c.
    pub async fn run(mut self) -> io::Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => ServerEvent::Error {
                        message: format!("accept failed: {}", e),
                    }
                    .log(),
                },
                Some(event) = self.events_rx.recv() => event.log(),
                result = &mut shutdown => {
                    result?;
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            log::debug!("set_nodelay failed for {}: {}", addr, e);
        }

        let rooms = Arc::clone(&self.rooms);
        let events = self.events_tx.clone();
        tokio::spawn(handle_connection(stream, addr, rooms, events));
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: SharedAssigner,
    events: EventSender,
) {
    let mut connection = Connection::new(stream);
    let mut retried = false;

    let (room_id, client_id) = loop {
        let assigned = rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .assign();
        let handle = match assigned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = events.send(ServerEvent::ConnectionDenied {
                    addr,
                    reason: e.to_string(),
                });
                return;
            }
        };

        match connection.join(&handle).await {
            Ok(client_id) => break (handle.id(), client_id),
            // The room emptied between lookup and join.
            Err(JoinError::RoomClosed) if !retried => {
                retried = true;
                rooms
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retire(handle.id());
            }
            Err(e) => {
                let _ = events.send(ServerEvent::ConnectionDenied {
                    addr,
                    reason: e.to_string(),
                });
                return;
            }
        }
    };

    let _ = events.send(ServerEvent::ClientConnected {
        addr,
        room_id,
        client_id,
    });

    if let Err(e) = connection.run().await {
        log::debug!("connection from {} ended with error: {}", addr, e);
    }

    let _ = events.send(ServerEvent::ClientDisconnected {
        addr,
        room_id,
        client_id,
    });
}
