use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::protocol::{ClientId, FrameBytes, ObjectId};

pub type FrameSender = mpsc::UnboundedSender<FrameBytes>;
pub type FrameReceiver = mpsc::UnboundedReceiver<FrameBytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection to client {0} is closed")]
pub struct SendError(pub ClientId);

/// One connected peer of a room.
///
/// Frames handed to [`ClientSession::send`] enter a FIFO channel drained by
/// the connection's single writer task, so the peer sees them in enqueue
/// order and never interleaved.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    owned_objects: HashSet<ObjectId>,
    is_host: bool,
    sender: FrameSender,
    pub joined_at: Instant,
    pub frames_sent: u64,
}

impl ClientSession {
    pub fn new(id: ClientId, sender: FrameSender) -> Self {
        Self {
            id,
            owned_objects: HashSet::new(),
            is_host: false,
            sender,
            joined_at: Instant::now(),
            frames_sent: 0,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn owned_objects(&self) -> &HashSet<ObjectId> {
        &self.owned_objects
    }

    pub fn owns(&self, object_id: ObjectId) -> bool {
        self.owned_objects.contains(&object_id)
    }

    pub fn send(&mut self, frame: FrameBytes) -> Result<(), SendError> {
        self.sender.send(frame).map_err(|_| SendError(self.id))?;
        self.frames_sent += 1;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn set_host(&mut self, is_host: bool) {
        self.is_host = is_host;
    }

    pub(crate) fn add_object(&mut self, object_id: ObjectId) {
        self.owned_objects.insert(object_id);
    }

    pub(crate) fn remove_object(&mut self, object_id: ObjectId) -> bool {
        self.owned_objects.remove(&object_id)
    }
}
