use std::collections::HashMap;

use crate::room::{Room, RoomConfig, RoomHandle, RoomId, spawn_room};

pub const DEFAULT_MAX_ROOMS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("room {0} not found")]
    NotFound(RoomId),
    #[error("room limit reached ({max_rooms})")]
    Exhausted { max_rooms: usize },
}

/// Where rooms are created and looked up by id.
pub trait RoomStore {
    fn allocate_room(&mut self) -> Result<RoomId, DirectoryError>;
    fn lookup_room(&mut self, room_id: RoomId) -> Result<RoomHandle, DirectoryError>;
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub max_rooms: usize,
    pub room: RoomConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_rooms: DEFAULT_MAX_ROOMS,
            room: RoomConfig::default(),
        }
    }
}

/// In-process room directory. Room ids count up from 1 and are never
/// reused; a room disappears from the directory once its task has closed.
#[derive(Debug)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, RoomHandle>,
    next_room_id: RoomId,
    config: DirectoryConfig,
}

impl RoomDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            rooms: HashMap::new(),
            next_room_id: 1,
            config,
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn room_count(&mut self) -> usize {
        self.prune();
        self.rooms.len()
    }

    pub fn room_ids(&mut self) -> Vec<RoomId> {
        self.prune();
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn prune(&mut self) {
        self.rooms.retain(|_, handle| !handle.is_closed());
    }
}

impl Default for RoomDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

impl RoomStore for RoomDirectory {
    /// Spawns the room task, so this must run inside a tokio runtime.
    fn allocate_room(&mut self) -> Result<RoomId, DirectoryError> {
        self.prune();
        if self.rooms.len() >= self.config.max_rooms {
            return Err(DirectoryError::Exhausted {
                max_rooms: self.config.max_rooms,
            });
        }

        let room_id = self.next_room_id;
        self.next_room_id += 1;

        let handle = spawn_room(Room::new(room_id, self.config.room.clone()));
        self.rooms.insert(room_id, handle);
        Ok(room_id)
    }

    fn lookup_room(&mut self, room_id: RoomId) -> Result<RoomHandle, DirectoryError> {
        match self.rooms.get(&room_id) {
            Some(handle) if !handle.is_closed() => Ok(handle.clone()),
            Some(_) => {
                self.rooms.remove(&room_id);
                Err(DirectoryError::NotFound(room_id))
            }
            None => Err(DirectoryError::NotFound(room_id)),
        }
    }
}
