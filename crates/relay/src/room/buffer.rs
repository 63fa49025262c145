use crate::protocol::{ClientId, FrameBytes, ObjectId};

/// What a buffered frame describes, so it can be dropped once obsolete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayKey {
    Connection(ClientId),
    Object(ObjectId),
    /// Latest change of owner for a buffered object.
    Handoff(ObjectId),
    Opaque,
}

#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub key: ReplayKey,
    pub frame: FrameBytes,
}

/// Frames every new joiner receives before live traffic, in buffering order.
#[derive(Debug, Default)]
pub struct ReplayBuffer {
    entries: Vec<ReplayEntry>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: ReplayKey, frame: FrameBytes) {
        self.entries.push(ReplayEntry { key, frame });
    }

    /// Pushes `frame` after dropping any earlier entry with the same key.
    pub fn replace(&mut self, key: ReplayKey, frame: FrameBytes) {
        self.remove_key(key);
        self.push(key, frame);
    }

    pub fn contains_object(&self, object_id: ObjectId) -> bool {
        self.entries
            .iter()
            .any(|e| e.key == ReplayKey::Object(object_id))
    }

    pub fn frames(&self) -> impl Iterator<Item = &FrameBytes> {
        self.entries.iter().map(|e| &e.frame)
    }

    pub fn remove_connection(&mut self, client_id: ClientId) -> usize {
        self.remove_key(ReplayKey::Connection(client_id))
    }

    pub fn remove_object(&mut self, object_id: ObjectId) -> usize {
        self.remove_key(ReplayKey::Object(object_id))
            + self.remove_key(ReplayKey::Handoff(object_id))
    }

    fn remove_key(&mut self, key: ReplayKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
