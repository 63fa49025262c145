use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 4000;

/// Largest frame the length-prefixed transport can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

pub const INBOUND_HEADER_LEN: usize = 2;
pub const OUTBOUND_HEADER_LEN: usize = CLIENT_ID_LEN + 1;

/// Outbound frames are one byte longer than the inbound frame they relay.
pub const MAX_INBOUND_LEN: usize = MAX_FRAME_LEN - (OUTBOUND_HEADER_LEN - INBOUND_HEADER_LEN);

const CLIENT_ID_LEN: usize = 2;
const OBJECT_ID_LEN: usize = 4;

pub type ClientId = u16;
pub type ObjectId = u32;

/// Encoded outbound frame, shared between every recipient and the replay buffer.
pub type FrameBytes = Arc<[u8]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressingMode {
    OtherClients = 0,
    AllClients = 1,
    OtherClientsBuffered = 2,
    AllClientsBuffered = 3,
    Host = 4,
    Server = 5,
}

impl AddressingMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::OtherClients),
            1 => Some(Self::AllClients),
            2 => Some(Self::OtherClientsBuffered),
            3 => Some(Self::AllClientsBuffered),
            4 => Some(Self::Host),
            5 => Some(Self::Server),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_buffered(self) -> bool {
        matches!(self, Self::OtherClientsBuffered | Self::AllClientsBuffered)
    }

    #[inline]
    pub fn includes_sender(self) -> bool {
        matches!(self, Self::AllClients | Self::AllClientsBuffered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Register = 0,
    NewConnection = 1,
    ExitConnection = 2,
    Instantiate = 3,
    Destroy = 4,
    RequestObjectControlAuthority = 5,
    TransferObjectControlAuthority = 6,
    MigrateHost = 7,
    Transform = 8,
    Rpc = 9,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Register),
            1 => Some(Self::NewConnection),
            2 => Some(Self::ExitConnection),
            3 => Some(Self::Instantiate),
            4 => Some(Self::Destroy),
            5 => Some(Self::RequestObjectControlAuthority),
            6 => Some(Self::TransferObjectControlAuthority),
            7 => Some(Self::MigrateHost),
            8 => Some(Self::Transform),
            9 => Some(Self::Rpc),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Types that change object ownership and must reach the server.
    pub fn is_authority_control(self) -> bool {
        matches!(
            self,
            Self::Instantiate
                | Self::Destroy
                | Self::RequestObjectControlAuthority
                | Self::TransferObjectControlAuthority
        )
    }

    /// Types only the server may put on the wire.
    pub fn is_server_only(self) -> bool {
        matches!(
            self,
            Self::Register | Self::NewConnection | Self::ExitConnection | Self::MigrateHost
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {len} bytes, need at least {min}")]
    Malformed { len: usize, min: usize },
    #[error("oversized frame: {len} bytes, limit is {max}")]
    Oversized { len: usize, max: usize },
}

/// Client to server frame. Borrows its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundFrame<'a> {
    pub target: u8,
    pub message_type: u8,
    pub payload: &'a [u8],
}

impl InboundFrame<'_> {
    pub fn addressing(&self) -> Option<AddressingMode> {
        AddressingMode::from_byte(self.target)
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_byte(self.message_type)
    }
}

/// Server to client frame as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub sender_id: ClientId,
    pub message_type: u8,
    pub payload: Vec<u8>,
}

impl OutboundFrame {
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_byte(self.message_type)
    }
}

pub fn decode_inbound(data: &[u8]) -> Result<InboundFrame<'_>, FrameError> {
    if data.len() < INBOUND_HEADER_LEN {
        return Err(FrameError::Malformed {
            len: data.len(),
            min: INBOUND_HEADER_LEN,
        });
    }
    if data.len() > MAX_INBOUND_LEN {
        return Err(FrameError::Oversized {
            len: data.len(),
            max: MAX_INBOUND_LEN,
        });
    }

    Ok(InboundFrame {
        target: data[0],
        message_type: data[1],
        payload: &data[INBOUND_HEADER_LEN..],
    })
}

pub fn encode_inbound(target: AddressingMode, message_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(INBOUND_HEADER_LEN + payload.len());
    data.push(target.as_byte());
    data.push(message_type);
    data.extend_from_slice(payload);
    data
}

pub fn encode_outbound(sender_id: ClientId, message_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(OUTBOUND_HEADER_LEN + payload.len());
    data.extend_from_slice(&sender_id.to_le_bytes());
    data.push(message_type);
    data.extend_from_slice(payload);
    data
}

pub fn decode_outbound(data: &[u8]) -> Result<OutboundFrame, FrameError> {
    if data.len() < OUTBOUND_HEADER_LEN {
        return Err(FrameError::Malformed {
            len: data.len(),
            min: OUTBOUND_HEADER_LEN,
        });
    }

    Ok(OutboundFrame {
        sender_id: ClientId::from_le_bytes([data[0], data[1]]),
        message_type: data[CLIENT_ID_LEN],
        payload: data[OUTBOUND_HEADER_LEN..].to_vec(),
    })
}

/// Reads the leading object id of an instantiate, destroy or authority payload.
pub fn object_id(payload: &[u8]) -> Option<ObjectId> {
    let bytes: [u8; OBJECT_ID_LEN] = payload.get(..OBJECT_ID_LEN)?.try_into().ok()?;
    Some(ObjectId::from_le_bytes(bytes))
}

/// Reads the `(object, client)` pair carried by transfer payloads.
pub fn object_client_pair(payload: &[u8]) -> Option<(ObjectId, ClientId)> {
    let object_id = object_id(payload)?;
    let end = OBJECT_ID_LEN + CLIENT_ID_LEN;
    let bytes: [u8; CLIENT_ID_LEN] = payload.get(OBJECT_ID_LEN..end)?.try_into().ok()?;
    Some((object_id, ClientId::from_le_bytes(bytes)))
}

pub fn object_client_payload(object_id: ObjectId, client_id: ClientId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(OBJECT_ID_LEN + CLIENT_ID_LEN);
    payload.extend_from_slice(&object_id.to_le_bytes());
    payload.extend_from_slice(&client_id.to_le_bytes());
    payload
}

/// Object ids carry their creator's client id in the high 16 bits.
#[inline]
pub fn compose_object_id(client_id: ClientId, local: u16) -> ObjectId {
    ((client_id as ObjectId) << 16) | local as ObjectId
}
