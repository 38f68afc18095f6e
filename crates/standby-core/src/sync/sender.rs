//! Active side of a synchronization attempt
//!
//! The sender:
//! - Builds sync units and validates each before handing it out
//! - Splits partition state into chunks of `sync.max_payload_chunk` bytes
//! - Streams whole entity snapshots to an async writer

use super::message::SyncMessage;
use super::state::{SyncState, SyncValidator};
use crate::config::SyncConfig;
use crate::types::{EntityId, PartitionKey};
use crate::{Error, Result};
use tokio::io::AsyncWrite;
use uuid::Uuid;

/// Full state of one entity, ready to be streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Entity being synchronized
    pub entity: EntityId,
    /// Entity version
    pub version: u64,
    /// Entity configuration
    pub config: Vec<u8>,
    /// Whether the passive may later delete it
    pub deletable: bool,
    /// Partition states, in the order they are sent
    pub partitions: Vec<(PartitionKey, Vec<u8>)>,
}

impl EntitySnapshot {
    /// Snapshot with no partitions
    pub fn new(entity: EntityId, version: u64, config: Vec<u8>, deletable: bool) -> Self {
        Self {
            entity,
            version,
            config,
            deletable,
            partitions: Vec::new(),
        }
    }

    /// Add one partition's state
    pub fn with_partition(mut self, key: PartitionKey, state: Vec<u8>) -> Self {
        self.partitions.push((key, state));
        self
    }
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Units handed out
    pub units: u64,
    /// Entities fully sent
    pub entities: u64,
    /// Partitions fully sent
    pub partitions: u64,
    /// Partition payload bytes
    pub payload_bytes: u64,
}

/// Produces one legal synchronization stream
pub struct ActiveSyncSender {
    attempt_id: Uuid,
    config: SyncConfig,
    validator: SyncValidator,
    stats: SyncStats,
    entity: Option<(EntityId, u64)>,
    partition: Option<PartitionKey>,
}

impl ActiveSyncSender {
    /// Start a new attempt
    pub fn new(config: SyncConfig) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            config,
            validator: SyncValidator::new(),
            stats: SyncStats::default(),
            entity: None,
            partition: None,
        }
    }

    /// Attempt id, for correlating logs on both sides
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Stream position
    pub fn state(&self) -> SyncState {
        self.validator.state()
    }

    /// Statistics so far
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// `StreamBegin`
    pub fn begin_stream(&mut self) -> Result<SyncMessage> {
        let message = self.emit(SyncMessage::StreamBegin)?;
        tracing::info!("Sync attempt {} started", self.attempt_id);
        Ok(message)
    }

    /// `EntityBegin`
    pub fn begin_entity(
        &mut self,
        entity: EntityId,
        version: u64,
        config: Vec<u8>,
        deletable: bool,
    ) -> Result<SyncMessage> {
        if entity.is_null() {
            self.validator.fail();
            return Err(Error::protocol("EntityBegin requires an entity"));
        }
        let message = self.emit(SyncMessage::EntityBegin {
            entity: entity.clone(),
            version,
            config,
            deletable,
        })?;
        self.entity = Some((entity, version));
        Ok(message)
    }

    /// `PartitionBegin` for the open entity
    pub fn begin_partition(&mut self, key: u32) -> Result<SyncMessage> {
        let key = match PartitionKey::new(key) {
            Ok(key) => key,
            Err(err) => {
                self.validator.fail();
                return Err(err);
            }
        };
        let (entity, version) = self.open_entity("PartitionBegin")?;
        let message = self.emit(SyncMessage::PartitionBegin { entity, version, key })?;
        self.partition = Some(key);
        Ok(message)
    }

    /// `PartitionPayload` units for the open partition, at most
    /// `max_payload_chunk` bytes each. Empty data yields no units.
    pub fn payload(&mut self, data: &[u8]) -> Result<Vec<SyncMessage>> {
        let (entity, version) = self.open_entity("PartitionPayload")?;
        let key = match self.partition {
            Some(key) if self.validator.state() == SyncState::InPartition => key,
            _ => {
                self.validator.fail();
                return Err(Error::protocol("PartitionPayload outside a partition"));
            }
        };

        let mut units = Vec::with_capacity(data.len().div_ceil(self.config.max_payload_chunk.max(1)));
        for chunk in data.chunks(self.config.max_payload_chunk.max(1)) {
            units.push(self.emit(SyncMessage::PartitionPayload {
                entity: entity.clone(),
                version,
                key,
                payload: chunk.to_vec(),
            })?);
            self.stats.payload_bytes += chunk.len() as u64;
        }
        Ok(units)
    }

    /// `PartitionEnd` for the open partition
    pub fn end_partition(&mut self) -> Result<SyncMessage> {
        let (entity, version) = self.open_entity("PartitionEnd")?;
        let Some(key) = self.partition else {
            self.validator.fail();
            return Err(Error::protocol("PartitionEnd outside a partition"));
        };
        let message = self.emit(SyncMessage::PartitionEnd { entity, version, key })?;
        self.partition = None;
        self.stats.partitions += 1;
        Ok(message)
    }

    /// `EntityEnd` for the open entity
    pub fn end_entity(&mut self) -> Result<SyncMessage> {
        let (entity, version) = self.open_entity("EntityEnd")?;
        let message = self.emit(SyncMessage::EntityEnd { entity, version })?;
        self.entity = None;
        self.stats.entities += 1;
        Ok(message)
    }

    /// `StreamEnd`
    pub fn end_stream(&mut self, trailer: Vec<u8>) -> Result<SyncMessage> {
        let message = self.emit(SyncMessage::StreamEnd { trailer })?;
        tracing::info!(
            "Sync attempt {} complete ({} entities, {} payload bytes)",
            self.attempt_id,
            self.stats.entities,
            self.stats.payload_bytes
        );
        Ok(message)
    }

    /// Stream a whole entity (begin, partitions, end) to `writer`
    pub async fn send_entity<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        snapshot: &EntitySnapshot,
    ) -> Result<()> {
        let begin = self.begin_entity(
            snapshot.entity.clone(),
            snapshot.version,
            snapshot.config.clone(),
            snapshot.deletable,
        )?;
        self.write(writer, &begin).await?;

        for (key, state) in &snapshot.partitions {
            let begin = self.begin_partition(key.get())?;
            self.write(writer, &begin).await?;
            for unit in self.payload(state)? {
                self.write(writer, &unit).await?;
            }
            let end = self.end_partition()?;
            self.write(writer, &end).await?;
        }

        let end = self.end_entity()?;
        self.write(writer, &end).await?;

        tracing::debug!(
            "Sync attempt {}: sent {} v{} ({} partitions)",
            self.attempt_id,
            snapshot.entity,
            snapshot.version,
            snapshot.partitions.len()
        );
        Ok(())
    }

    /// Stream a complete attempt: begin, every entity, end with `trailer`
    pub async fn send_stream<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        snapshots: &[EntitySnapshot],
        trailer: Vec<u8>,
    ) -> Result<()> {
        let begin = self.begin_stream()?;
        self.write(writer, &begin).await?;
        for snapshot in snapshots {
            self.send_entity(writer, snapshot).await?;
        }
        let end = self.end_stream(trailer)?;
        self.write(writer, &end).await
    }

    async fn write<W: AsyncWrite + Unpin>(&mut self, writer: &mut W, message: &SyncMessage) -> Result<()> {
        if let Err(err) = message.to_envelope().write_to(writer).await {
            tracing::warn!("Sync attempt {} aborted: {}", self.attempt_id, err);
            self.validator.fail();
            return Err(err);
        }
        Ok(())
    }

    fn emit(&mut self, message: SyncMessage) -> Result<SyncMessage> {
        self.validator.advance(&message)?;
        self.stats.units += 1;
        Ok(message)
    }

    fn open_entity(&mut self, unit: &str) -> Result<(EntityId, u64)> {
        match &self.entity {
            Some((entity, version)) => Ok((entity.clone(), *version)),
            None => {
                self.validator.fail();
                Err(Error::protocol(format!("{} with no open entity", unit)))
            }
        }
    }
}
