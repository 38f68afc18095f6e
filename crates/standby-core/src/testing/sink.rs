//! Sync sink that rebuilds what it receives

use crate::sync::{ReplicationEnvelope, SyncSink};
use crate::types::{EntityId, PartitionKey};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// One entity as rebuilt by [`RecordingSink`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedEntity {
    /// Entity version
    pub version: u64,
    /// Entity configuration
    pub config: Vec<u8>,
    /// Deletable flag
    pub deletable: bool,
    /// Concatenated payloads per partition
    pub partitions: BTreeMap<PartitionKey, Vec<u8>>,
    /// True once `EntityEnd` was seen
    pub complete: bool,
}

/// In-memory [`SyncSink`] for tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Entities received in the current attempt
    pub entities: BTreeMap<EntityId, ReceivedEntity>,
    /// Trailer of a completed stream
    pub trailer: Option<Vec<u8>>,
    /// Times `discard` was called
    pub discards: usize,
    /// Live envelopes passed through
    pub replicated: Vec<ReplicationEnvelope>,
    /// Make `begin_entity` fail for this entity
    pub fail_on_entity: Option<EntityId>,
}

impl RecordingSink {
    /// Rebuilt state of one partition
    pub fn partition_state(&self, entity: &EntityId, key: PartitionKey) -> Option<Vec<u8>> {
        self.entities.get(entity)?.partitions.get(&key).cloned()
    }

    fn entity_mut(&mut self, entity: &EntityId) -> Result<&mut ReceivedEntity> {
        self.entities
            .get_mut(entity)
            .ok_or_else(|| Error::invariant(format!("{} was never begun", entity)))
    }
}

impl SyncSink for RecordingSink {
    fn begin_stream(&mut self) -> Result<()> {
        self.entities.clear();
        self.trailer = None;
        Ok(())
    }

    fn begin_entity(&mut self, entity: &EntityId, version: u64, config: &[u8], deletable: bool) -> Result<()> {
        if self.fail_on_entity.as_ref() == Some(entity) {
            return Err(Error::storage(format!("cannot store {}", entity)));
        }
        self.entities.insert(
            entity.clone(),
            ReceivedEntity {
                version,
                config: config.to_vec(),
                deletable,
                ..ReceivedEntity::default()
            },
        );
        Ok(())
    }

    fn begin_partition(&mut self, entity: &EntityId, _version: u64, key: PartitionKey) -> Result<()> {
        self.entity_mut(entity)?.partitions.insert(key, Vec::new());
        Ok(())
    }

    fn apply_payload(&mut self, entity: &EntityId, _version: u64, key: PartitionKey, payload: &[u8]) -> Result<()> {
        self.entity_mut(entity)?
            .partitions
            .entry(key)
            .or_default()
            .extend_from_slice(payload);
        Ok(())
    }

    fn end_partition(&mut self, _entity: &EntityId, _version: u64, _key: PartitionKey) -> Result<()> {
        Ok(())
    }

    fn end_entity(&mut self, entity: &EntityId, _version: u64) -> Result<()> {
        self.entity_mut(entity)?.complete = true;
        Ok(())
    }

    fn complete(&mut self, trailer: Vec<u8>) -> Result<()> {
        self.trailer = Some(trailer);
        Ok(())
    }

    fn discard(&mut self) {
        self.discards += 1;
        self.entities.clear();
    }

    fn replicated(&mut self, envelope: ReplicationEnvelope) -> Result<()> {
        self.replicated.push(envelope);
        Ok(())
    }
}
