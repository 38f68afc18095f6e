//! Typed synchronization units
//!
//! On the wire every unit is a [`ReplicationEnvelope`] whose fields are reused
//! differently per type; in particular `SyncEntityBegin` carries the
//! deletable flag in the concurrency slot (0 = deletable, 1 = pinned) and
//! `SyncBegin` carries [`PROTOCOL_VERSION`] in the same slot. In
//! memory each unit is a variant with named fields, and the mapping to and
//! from the envelope lives only in this module.

use super::PROTOCOL_VERSION;
use super::envelope::{ReplicationEnvelope, ReplicationType};
use crate::types::{EntityId, NO_VERSION, PartitionKey};
use crate::{Error, Result};

const DELETABLE: u32 = 0;
const NOT_DELETABLE: u32 = 1;

/// One unit of an entity snapshot stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Opens the stream; tagged with the protocol version on the wire
    StreamBegin,
    /// Opens one entity
    EntityBegin {
        /// Entity being synchronized
        entity: EntityId,
        /// Entity version
        version: u64,
        /// Entity configuration
        config: Vec<u8>,
        /// Whether the passive may later delete the entity
        deletable: bool,
    },
    /// Opens one partition of the current entity
    PartitionBegin {
        /// Owning entity
        entity: EntityId,
        /// Entity version
        version: u64,
        /// Partition key
        key: PartitionKey,
    },
    /// State chunk of the current partition
    PartitionPayload {
        /// Owning entity
        entity: EntityId,
        /// Entity version
        version: u64,
        /// Partition key
        key: PartitionKey,
        /// Opaque state bytes
        payload: Vec<u8>,
    },
    /// Closes the current partition
    PartitionEnd {
        /// Owning entity
        entity: EntityId,
        /// Entity version
        version: u64,
        /// Partition key
        key: PartitionKey,
    },
    /// Closes the current entity
    EntityEnd {
        /// Entity being closed
        entity: EntityId,
        /// Entity version
        version: u64,
    },
    /// Closes the stream
    StreamEnd {
        /// Opaque summary handed to the receiver uninterpreted
        trailer: Vec<u8>,
    },
}

impl SyncMessage {
    /// Envelope discriminant of this unit
    pub fn message_type(&self) -> ReplicationType {
        match self {
            Self::StreamBegin => ReplicationType::SyncBegin,
            Self::EntityBegin { .. } => ReplicationType::SyncEntityBegin,
            Self::PartitionBegin { .. } => ReplicationType::SyncEntityConcurrencyBegin,
            Self::PartitionPayload { .. } => ReplicationType::SyncEntityConcurrencyPayload,
            Self::PartitionEnd { .. } => ReplicationType::SyncEntityConcurrencyEnd,
            Self::EntityEnd { .. } => ReplicationType::SyncEntityEnd,
            Self::StreamEnd { .. } => ReplicationType::SyncEnd,
        }
    }

    /// Short name, for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamBegin => "StreamBegin",
            Self::EntityBegin { .. } => "EntityBegin",
            Self::PartitionBegin { .. } => "PartitionBegin",
            Self::PartitionPayload { .. } => "PartitionPayload",
            Self::PartitionEnd { .. } => "PartitionEnd",
            Self::EntityEnd { .. } => "EntityEnd",
            Self::StreamEnd { .. } => "StreamEnd",
        }
    }

    /// Shape this unit as a channel envelope
    pub fn to_envelope(&self) -> ReplicationEnvelope {
        let mut envelope = ReplicationEnvelope::empty(self.message_type());
        match self {
            Self::StreamBegin => {
                envelope.concurrency = PROTOCOL_VERSION;
            }
            Self::EntityBegin {
                entity,
                version,
                config,
                deletable,
            } => {
                envelope.entity = entity.clone();
                envelope.version = *version;
                envelope.concurrency = if *deletable { DELETABLE } else { NOT_DELETABLE };
                envelope.payload = config.clone();
            }
            Self::PartitionBegin { entity, version, key } | Self::PartitionEnd { entity, version, key } => {
                envelope.entity = entity.clone();
                envelope.version = *version;
                envelope.concurrency = key.get();
            }
            Self::PartitionPayload {
                entity,
                version,
                key,
                payload,
            } => {
                envelope.entity = entity.clone();
                envelope.version = *version;
                envelope.concurrency = key.get();
                envelope.payload = payload.clone();
            }
            Self::EntityEnd { entity, version } => {
                envelope.entity = entity.clone();
                envelope.version = *version;
            }
            Self::StreamEnd { trailer } => {
                envelope.payload = trailer.clone();
            }
        }
        envelope
    }

    /// Encode straight to a checksummed frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.to_envelope().encode()
    }
}

impl TryFrom<ReplicationEnvelope> for SyncMessage {
    type Error = crate::Error;

    fn try_from(envelope: ReplicationEnvelope) -> Result<Self> {
        let ReplicationEnvelope {
            message_type,
            entity,
            version,
            concurrency,
            payload,
            ..
        } = envelope;

        let message = match message_type {
            ReplicationType::SyncBegin => {
                require_placeholders(message_type, &entity, version)?;
                if concurrency != PROTOCOL_VERSION {
                    return Err(Error::protocol(format!(
                        "StreamBegin speaks protocol version {}, expected {}",
                        concurrency, PROTOCOL_VERSION
                    )));
                }
                Self::StreamBegin
            }
            ReplicationType::SyncEnd => {
                require_placeholders(message_type, &entity, version)?;
                Self::StreamEnd { trailer: payload }
            }
            ReplicationType::SyncEntityBegin => {
                require_entity(message_type, &entity)?;
                let deletable = match concurrency {
                    DELETABLE => true,
                    NOT_DELETABLE => false,
                    other => {
                        return Err(Error::protocol(format!(
                            "EntityBegin for {} carries deletable flag {}, expected 0 or 1",
                            entity, other
                        )));
                    }
                };
                Self::EntityBegin {
                    entity,
                    version,
                    config: payload,
                    deletable,
                }
            }
            ReplicationType::SyncEntityConcurrencyBegin => {
                require_entity(message_type, &entity)?;
                Self::PartitionBegin {
                    entity,
                    version,
                    key: PartitionKey::new(concurrency)?,
                }
            }
            ReplicationType::SyncEntityConcurrencyPayload => {
                require_entity(message_type, &entity)?;
                Self::PartitionPayload {
                    entity,
                    version,
                    key: PartitionKey::new(concurrency)?,
                    payload,
                }
            }
            ReplicationType::SyncEntityConcurrencyEnd => {
                require_entity(message_type, &entity)?;
                Self::PartitionEnd {
                    entity,
                    version,
                    key: PartitionKey::new(concurrency)?,
                }
            }
            ReplicationType::SyncEntityEnd => {
                require_entity(message_type, &entity)?;
                Self::EntityEnd { entity, version }
            }
            other => {
                return Err(Error::protocol(format!(
                    "{:?} is not a synchronization message",
                    other
                )));
            }
        };
        Ok(message)
    }
}

fn require_placeholders(message_type: ReplicationType, entity: &EntityId, version: u64) -> Result<()> {
    if !entity.is_null() || version != NO_VERSION {
        return Err(Error::protocol(format!(
            "{:?} must carry the null entity and version 0, got {} v{}",
            message_type, entity, version
        )));
    }
    Ok(())
}

fn require_entity(message_type: ReplicationType, entity: &EntityId) -> Result<()> {
    if entity.is_null() {
        return Err(Error::protocol(format!("{:?} is missing its entity", message_type)));
    }
    Ok(())
}

/// A demultiplexed inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Unit of a synchronization stream
    Sync(SyncMessage),
    /// Any other replicated operation, passed through untouched
    Replicated(ReplicationEnvelope),
}

impl Inbound {
    /// Demultiplex by discriminant; sync units are parsed and validated
    pub fn classify(envelope: ReplicationEnvelope) -> Result<Self> {
        if envelope.message_type.is_sync() {
            Ok(Self::Sync(SyncMessage::try_from(envelope)?))
        } else {
            Ok(Self::Replicated(envelope))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> EntityId {
        EntityId::new("cache", "sessions")
    }

    fn key(raw: u32) -> PartitionKey {
        PartitionKey::new(raw).unwrap()
    }

    #[test]
    fn test_stream_units_use_placeholders() {
        let begin = SyncMessage::StreamBegin.to_envelope();
        assert!(begin.entity.is_null());
        assert_eq!(begin.version, NO_VERSION);

        let end = SyncMessage::StreamEnd { trailer: vec![1, 2] }.to_envelope();
        assert!(end.entity.is_null());
        assert_eq!(end.payload, vec![1, 2]);
    }

    #[test]
    fn test_stream_begin_carries_protocol_version() {
        let mut envelope = SyncMessage::StreamBegin.to_envelope();
        assert_eq!(envelope.concurrency, PROTOCOL_VERSION);
        assert_eq!(SyncMessage::try_from(envelope.clone()).unwrap(), SyncMessage::StreamBegin);

        envelope.concurrency = PROTOCOL_VERSION + 1;
        let err = SyncMessage::try_from(envelope).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(err.to_string().contains("protocol version"));
    }

    #[test]
    fn test_deletable_flag_mapping() {
        let pinned = SyncMessage::EntityBegin {
            entity: entity(),
            version: 2,
            config: b"cfg".to_vec(),
            deletable: false,
        };
        let envelope = pinned.to_envelope();
        assert_eq!(envelope.concurrency, NOT_DELETABLE);
        assert_eq!(envelope.payload, b"cfg".to_vec());
        assert_eq!(SyncMessage::try_from(envelope).unwrap(), pinned);

        let mut envelope = pinned.to_envelope();
        envelope.concurrency = 0;
        match SyncMessage::try_from(envelope).unwrap() {
            SyncMessage::EntityBegin { deletable, .. } => assert!(deletable),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_deletable_flag() {
        let mut envelope = ReplicationEnvelope::empty(ReplicationType::SyncEntityBegin);
        envelope.entity = entity();
        envelope.concurrency = 7;
        assert!(SyncMessage::try_from(envelope).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn test_rejects_zero_partition_key() {
        for message_type in [
            ReplicationType::SyncEntityConcurrencyBegin,
            ReplicationType::SyncEntityConcurrencyPayload,
            ReplicationType::SyncEntityConcurrencyEnd,
        ] {
            let mut envelope = ReplicationEnvelope::empty(message_type);
            envelope.entity = entity();
            envelope.version = 1;
            envelope.concurrency = 0;
            let err = SyncMessage::try_from(envelope).unwrap_err();
            assert!(err.is_protocol_violation(), "{:?}", message_type);
        }
    }

    #[test]
    fn test_rejects_stream_units_with_entity() {
        let mut envelope = ReplicationEnvelope::empty(ReplicationType::SyncBegin);
        envelope.version = 4;
        assert!(SyncMessage::try_from(envelope).unwrap_err().is_protocol_violation());

        let mut envelope = ReplicationEnvelope::empty(ReplicationType::SyncEnd);
        envelope.entity = entity();
        assert!(SyncMessage::try_from(envelope).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn test_rejects_partition_without_entity() {
        let mut envelope = ReplicationEnvelope::empty(ReplicationType::SyncEntityConcurrencyBegin);
        envelope.concurrency = 1;
        assert!(SyncMessage::try_from(envelope).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn test_payload_through_frame() {
        let message = SyncMessage::PartitionPayload {
            entity: entity(),
            version: 5,
            key: key(3),
            payload: vec![0xAB; 300],
        };
        let frame = message.encode().unwrap();
        let envelope = ReplicationEnvelope::decode(&frame).unwrap();
        assert_eq!(envelope.concurrency, 3);
        assert_eq!(SyncMessage::try_from(envelope).unwrap(), message);
    }

    #[test]
    fn test_classify() {
        let sync = Inbound::classify(SyncMessage::StreamBegin.to_envelope()).unwrap();
        assert_eq!(sync, Inbound::Sync(SyncMessage::StreamBegin));

        let live = ReplicationEnvelope::empty(ReplicationType::InvokeAction);
        assert_eq!(Inbound::classify(live.clone()).unwrap(), Inbound::Replicated(live));

        let bad = ReplicationEnvelope::empty(ReplicationType::SyncEntityEnd);
        assert!(Inbound::classify(bad).is_err());
    }

    #[test]
    fn test_non_sync_envelope_is_not_a_sync_message() {
        let err = SyncMessage::try_from(ReplicationEnvelope::empty(ReplicationType::Noop)).unwrap_err();
        assert!(err.is_protocol_violation());
    }
}
