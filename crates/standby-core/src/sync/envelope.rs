//! Replication channel envelope and framing
//!
//! Every message on the active → passive channel (live replicated operations
//! and synchronization units alike) travels as a [`ReplicationEnvelope`].
//! Receivers look at the discriminant first and only then interpret the
//! type-specific fields.
//!
//! Frame format (little endian):
//!
//! ```text
//! [message_type:1][length:4][bincode body:N][crc32:4]
//! ```
//!
//! The CRC covers type + length + body.

use crate::types::{ClientId, EntityId, NO_VERSION, TransactionId};
use crate::{Error, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HEADER_LEN: usize = 5;
const CRC_LEN: usize = 4;

/// Largest body accepted from the wire
pub const MAX_FRAME_BODY: usize = 64 * 1024 * 1024;

/// Frame body reserved for the envelope fields other than the payload
pub const ENVELOPE_HEADROOM: usize = 64 * 1024;

/// Largest opaque payload a single envelope may carry
pub const MAX_PAYLOAD_CHUNK: usize = MAX_FRAME_BODY - ENVELOPE_HEADROOM;

/// Envelope discriminant
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationType {
    /// Ordering placeholder with no effect
    Noop = 0x01,
    /// Create an entity
    CreateEntity = 0x02,
    /// Replace an entity's configuration
    ReconfigureEntity = 0x03,
    /// Invoke an action on an entity
    InvokeAction = 0x04,
    /// Destroy an entity
    DestroyEntity = 0x05,
    /// A client disconnected from the active
    DisconnectClient = 0x06,
    /// Synchronization stream start
    SyncBegin = 0x40,
    /// Entity start, carries the entity configuration
    SyncEntityBegin = 0x41,
    /// Partition start
    SyncEntityConcurrencyBegin = 0x42,
    /// Partition state chunk
    SyncEntityConcurrencyPayload = 0x43,
    /// Partition end
    SyncEntityConcurrencyEnd = 0x44,
    /// Entity end
    SyncEntityEnd = 0x45,
    /// Synchronization stream end, carries the trailer
    SyncEnd = 0x46,
}

impl ReplicationType {
    /// True for the passive synchronization sub-protocol
    pub fn is_sync(self) -> bool {
        matches!(
            self,
            Self::SyncBegin
                | Self::SyncEntityBegin
                | Self::SyncEntityConcurrencyBegin
                | Self::SyncEntityConcurrencyPayload
                | Self::SyncEntityConcurrencyEnd
                | Self::SyncEntityEnd
                | Self::SyncEnd
        )
    }
}

impl TryFrom<u8> for ReplicationType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Noop),
            0x02 => Ok(Self::CreateEntity),
            0x03 => Ok(Self::ReconfigureEntity),
            0x04 => Ok(Self::InvokeAction),
            0x05 => Ok(Self::DestroyEntity),
            0x06 => Ok(Self::DisconnectClient),
            0x40 => Ok(Self::SyncBegin),
            0x41 => Ok(Self::SyncEntityBegin),
            0x42 => Ok(Self::SyncEntityConcurrencyBegin),
            0x43 => Ok(Self::SyncEntityConcurrencyPayload),
            0x44 => Ok(Self::SyncEntityConcurrencyEnd),
            0x45 => Ok(Self::SyncEntityEnd),
            0x46 => Ok(Self::SyncEnd),
            _ => Err(Error::codec(format!("Unknown message type: {:#04x}", value))),
        }
    }
}

/// Shared envelope of the replication channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEnvelope {
    /// Discriminant
    pub message_type: ReplicationType,
    /// Target entity (`EntityId::null()` when none)
    pub entity: EntityId,
    /// Entity version (`NO_VERSION` when none)
    pub version: u64,
    /// Originating client
    pub source: ClientId,
    /// Client-local transaction id
    pub transaction: TransactionId,
    /// Oldest transaction the client still needs
    pub oldest_transaction: TransactionId,
    /// Concurrency (partition) key
    pub concurrency: u32,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl ReplicationEnvelope {
    /// Envelope with every field at its placeholder value
    pub fn empty(message_type: ReplicationType) -> Self {
        Self {
            message_type,
            entity: EntityId::null(),
            version: NO_VERSION,
            source: ClientId::NULL,
            transaction: TransactionId::NULL,
            oldest_transaction: TransactionId::NULL,
            concurrency: 0,
            payload: Vec::new(),
        }
    }

    /// Encode to a checksummed frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::codec(format!("Serialization failed: {}", e)))?;
        if body.len() > MAX_FRAME_BODY {
            return Err(Error::codec(format!(
                "Frame body of {} bytes exceeds limit of {}",
                body.len(),
                MAX_FRAME_BODY
            )));
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + body.len() + CRC_LEN);
        buf.push(self.message_type as u8);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());

        Ok(buf)
    }

    /// Decode a complete frame
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN + CRC_LEN {
            return Err(Error::codec("Message too short"));
        }

        let crc_offset = buf.len() - CRC_LEN;
        let stored_crc = le_u32(&buf[crc_offset..]);
        let mut hasher = Hasher::new();
        hasher.update(&buf[..crc_offset]);
        let computed_crc = hasher.finalize();
        if stored_crc != computed_crc {
            return Err(Error::codec(format!(
                "CRC mismatch: expected {:x}, got {:x}",
                stored_crc, computed_crc
            )));
        }

        let header_type = ReplicationType::try_from(buf[0])?;
        let length = le_u32(&buf[1..HEADER_LEN]) as usize;
        if HEADER_LEN + length != crc_offset {
            return Err(Error::codec(format!(
                "Length mismatch: header says {} bytes, frame holds {}",
                length,
                crc_offset - HEADER_LEN
            )));
        }

        let envelope: Self = bincode::deserialize(&buf[HEADER_LEN..crc_offset])
            .map_err(|e| Error::codec(format!("Deserialization failed: {}", e)))?;
        if envelope.message_type != header_type {
            return Err(Error::codec(format!(
                "Header type {:?} does not match body type {:?}",
                header_type, envelope.message_type
            )));
        }
        Ok(envelope)
    }

    /// Write to an async stream
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame from an async stream
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let mut frame = frame_buffer(&header)?;
        reader.read_exact(&mut frame[HEADER_LEN..]).await?;
        Self::decode(&frame)
    }

    /// Write to a blocking stream
    pub fn write_to_sync<W: Write>(&self, writer: &mut W) -> Result<()> {
        let buf = self.encode()?;
        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one frame from a blocking stream
    pub fn read_from_sync<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;
        let mut frame = frame_buffer(&header)?;
        reader.read_exact(&mut frame[HEADER_LEN..])?;
        Self::decode(&frame)
    }
}

/// Allocate a frame buffer prefixed by `header`, sized from its length field
fn frame_buffer(header: &[u8; HEADER_LEN]) -> Result<Vec<u8>> {
    let length = le_u32(&header[1..]) as usize;
    if length > MAX_FRAME_BODY {
        return Err(Error::codec(format!(
            "Frame body of {} bytes exceeds limit of {}",
            length, MAX_FRAME_BODY
        )));
    }
    let mut frame = vec![0u8; HEADER_LEN + length + CRC_LEN];
    frame[..HEADER_LEN].copy_from_slice(header);
    Ok(frame)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}
