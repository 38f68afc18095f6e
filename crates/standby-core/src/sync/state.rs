//! Synchronization stream state machine
//!
//! ```text
//! Init --StreamBegin--> Streaming
//! Streaming --EntityBegin--> InEntity
//! InEntity --PartitionBegin--> InPartition
//! InPartition --PartitionPayload--> InPartition
//! InPartition --PartitionEnd--> InEntity
//! InEntity --EntityEnd--> Streaming
//! Streaming --StreamEnd--> Done
//! ```
//!
//! Any other transition moves the validator to `Failed`, where it stays.

use super::message::SyncMessage;
use crate::types::{EntityId, PartitionKey};
use crate::{Error, Result};

/// Position within a synchronization stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing received yet
    Init,
    /// Between entities
    Streaming,
    /// Inside an entity, between partitions
    InEntity,
    /// Inside a partition
    InPartition,
    /// `StreamEnd` accepted
    Done,
    /// A violation was observed; the attempt is over
    Failed,
}

impl SyncState {
    /// True once no further unit can be accepted
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone)]
struct OpenEntity {
    entity: EntityId,
    version: u64,
    partition: Option<PartitionKey>,
}

/// Checks that a sequence of units forms a legal stream
#[derive(Debug, Clone)]
pub struct SyncValidator {
    state: SyncState,
    open: Option<OpenEntity>,
}

impl Default for SyncValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncValidator {
    /// Validator positioned before `StreamBegin`
    pub fn new() -> Self {
        Self {
            state: SyncState::Init,
            open: None,
        }
    }

    /// Current position
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Entity currently open, if any
    pub fn open_entity(&self) -> Option<&EntityId> {
        self.open.as_ref().map(|o| &o.entity)
    }

    /// Accept `message` or fail the stream
    pub fn advance(&mut self, message: &SyncMessage) -> Result<SyncState> {
        match self.transition(message) {
            Ok(next) => {
                self.state = next;
                Ok(next)
            }
            Err(err) => {
                self.state = SyncState::Failed;
                self.open = None;
                Err(err)
            }
        }
    }

    /// Mark the stream failed from outside (transport loss, sink failure)
    pub fn fail(&mut self) {
        self.state = SyncState::Failed;
        self.open = None;
    }

    fn transition(&mut self, message: &SyncMessage) -> Result<SyncState> {
        use SyncState::*;

        match (self.state, message) {
            (Failed, _) => Err(Error::protocol(format!(
                "{} after the stream already failed",
                message.name()
            ))),
            (Done, _) => Err(Error::protocol(format!(
                "{} after StreamEnd",
                message.name()
            ))),
            (Init, SyncMessage::StreamBegin) => Ok(Streaming),
            (Streaming, SyncMessage::EntityBegin { entity, version, .. }) => {
                if entity.is_null() {
                    return Err(Error::protocol("EntityBegin is missing its entity"));
                }
                self.open = Some(OpenEntity {
                    entity: entity.clone(),
                    version: *version,
                    partition: None,
                });
                Ok(InEntity)
            }
            (InEntity, SyncMessage::PartitionBegin { entity, version, key }) => {
                let open = self.expect_entity(message, entity, *version)?;
                open.partition = Some(*key);
                Ok(InPartition)
            }
            (InPartition, SyncMessage::PartitionPayload { entity, version, key, .. }) => {
                self.expect_partition(message, entity, *version, *key)?;
                Ok(InPartition)
            }
            (InPartition, SyncMessage::PartitionEnd { entity, version, key }) => {
                let open = self.expect_partition(message, entity, *version, *key)?;
                open.partition = None;
                Ok(InEntity)
            }
            (InEntity, SyncMessage::EntityEnd { entity, version }) => {
                self.expect_entity(message, entity, *version)?;
                self.open = None;
                Ok(Streaming)
            }
            (Streaming, SyncMessage::StreamEnd { .. }) => Ok(Done),
            (state, message) => Err(Error::protocol(format!(
                "{} is not legal in state {:?}",
                message.name(),
                state
            ))),
        }
    }

    fn expect_entity(
        &mut self,
        message: &SyncMessage,
        entity: &EntityId,
        version: u64,
    ) -> Result<&mut OpenEntity> {
        match self.open.as_mut() {
            Some(open) if open.entity == *entity && open.version == version => Ok(open),
            Some(open) => Err(Error::protocol(format!(
                "{} names {} v{} but {} v{} is open",
                message.name(),
                entity,
                version,
                open.entity,
                open.version
            ))),
            None => Err(Error::invariant("entity state lost while inside an entity")),
        }
    }

    fn expect_partition(
        &mut self,
        message: &SyncMessage,
        entity: &EntityId,
        version: u64,
        key: PartitionKey,
    ) -> Result<&mut OpenEntity> {
        let open = self.expect_entity(message, entity, version)?;
        let current = open.partition;
        if current == Some(key) {
            return Ok(open);
        }
        Err(Error::protocol(format!(
            "{} names partition {} but {:?} is open",
            message.name(),
            key,
            current.map(|k| k.get())
        )))
    }
}
