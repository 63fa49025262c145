//! Length-prefixed framing over a byte stream, and the per-connection
//! read loop / writer task pair that connects a socket to a room.
//!
//! Each frame on the wire is `[len: u16 LE][frame]`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::protocol::{ClientId, MAX_FRAME_LEN};
use crate::room::{DisconnectReason, JoinError, RoomHandle, RoomId};
use crate::session::FrameReceiver;

const LENGTH_PREFIX_LEN: usize = 2;

/// Reads one frame. `Ok(None)` means the peer closed the stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u16_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(frame.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds {}", frame.len(), MAX_FRAME_LEN),
        )
    })?;

    let mut data = Vec::with_capacity(LENGTH_PREFIX_LEN + frame.len());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(frame);
    writer.write_all(&data).await
}

struct Membership {
    room: RoomHandle,
    client_id: ClientId,
    frames: FrameReceiver,
}

/// A client stream bound to at most one room.
pub struct Connection<S> {
    stream: S,
    membership: Option<Membership>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            membership: None,
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.membership.as_ref().map(|m| m.client_id)
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.membership.as_ref().map(|m| m.room.id())
    }

    /// Joins `room`. On error the connection is untouched and may try
    /// another room.
    pub async fn join(&mut self, room: &RoomHandle) -> Result<ClientId, JoinError> {
        let (sender, frames) = mpsc::unbounded_channel();
        let client_id = room.join(sender).await?;
        self.membership = Some(Membership {
            room: room.clone(),
            client_id,
            frames,
        });
        Ok(client_id)
    }

    /// Pumps frames both ways until the peer closes, a write fails, or the
    /// room drops this client. Always leaves the room on return.
    pub async fn run(self) -> io::Result<()> {
        let Some(membership) = self.membership else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection has not joined a room",
            ));
        };
        let Membership {
            room,
            client_id,
            frames,
        } = membership;

        let (mut reader, writer) = tokio::io::split(self.stream);
        let mut writer_task = tokio::spawn(write_loop(writer, frames));

        let mut reason = DisconnectReason::Closed;
        let result = loop {
            tokio::select! {
                frame = read_frame(&mut reader) => match frame {
                    Ok(Some(data)) => {
                        if !room.receive(client_id, data) {
                            break Ok(());
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
                written = &mut writer_task => {
                    if !matches!(written, Ok(Ok(()))) {
                        reason = DisconnectReason::SendFailed;
                    }
                    break Ok(());
                }
            }
        };

        room.leave(client_id, reason);
        result
    }
}

async fn write_loop<W>(mut writer: W, mut frames: FrameReceiver) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            log::debug!("write failed: {}", e);
            return Err(e);
        }
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_frame(&mut client, &[1, 2, 3]).await.unwrap();
        write_frame(&mut client, &[]).await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(read_frame(&mut server).await.unwrap(), Some(vec![]));
        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = vec![7u8; 258];

        write_frame(&mut client, &frame).await.unwrap();

        let mut prefix = [0u8; 2];
        server.read_exact(&mut prefix).await.unwrap();
        assert_eq!(prefix, [0x02, 0x01]);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, _server) = tokio::io::duplex(64);
        let frame = vec![0u8; MAX_FRAME_LEN + 1];

        let err = write_frame(&mut client, &frame).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_run_without_join_fails() {
        let (stream, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(stream);
        assert!(connection.client_id().is_none());

        let err = connection.run().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
