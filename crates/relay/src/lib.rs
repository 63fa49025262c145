pub mod directory;
pub mod protocol;
pub mod room;
pub mod session;
pub mod transport;

pub use directory::{DirectoryConfig, DirectoryError, RoomDirectory, RoomStore};
pub use protocol::{
    AddressingMode, ClientId, DEFAULT_PORT, FrameBytes, FrameError, InboundFrame,
    MAX_FRAME_LEN, MessageType, ObjectId, OutboundFrame, compose_object_id, decode_inbound,
    decode_outbound, encode_inbound, encode_outbound,
};
pub use room::{
    AuthorityError, DisconnectReason, DropReason, JoinError, ObjectState, Room, RoomConfig,
    RoomEvent, RoomHandle, RoomId, RoomStats, spawn_room,
};
pub use session::{ClientSession, FrameReceiver, FrameSender, SendError};
pub use transport::{Connection, read_frame, write_frame};
