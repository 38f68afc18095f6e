//! Passive side of a synchronization attempt
//!
//! The receiver validates every unit before forwarding it to a [`SyncSink`].
//! Any violation, sink failure or transport loss ends the attempt and the
//! sink is told to discard what it has built so far. A new attempt always
//! restarts from `StreamBegin`.

use super::envelope::ReplicationEnvelope;
use super::message::{Inbound, SyncMessage};
use super::state::{SyncState, SyncValidator};
use crate::types::{EntityId, PartitionKey};
use crate::{Error, Result};
use tokio::io::AsyncRead;

/// Consumer of a validated synchronization stream
pub trait SyncSink: Send {
    /// A new attempt started
    fn begin_stream(&mut self) -> Result<()>;

    /// An entity starts
    fn begin_entity(&mut self, entity: &EntityId, version: u64, config: &[u8], deletable: bool) -> Result<()>;

    /// A partition of the open entity starts
    fn begin_partition(&mut self, entity: &EntityId, version: u64, key: PartitionKey) -> Result<()>;

    /// One state chunk of the open partition, in send order
    fn apply_payload(&mut self, entity: &EntityId, version: u64, key: PartitionKey, payload: &[u8]) -> Result<()>;

    /// The open partition is complete
    fn end_partition(&mut self, entity: &EntityId, version: u64, key: PartitionKey) -> Result<()>;

    /// The open entity is complete
    fn end_entity(&mut self, entity: &EntityId, version: u64) -> Result<()>;

    /// The stream ended cleanly
    fn complete(&mut self, trailer: Vec<u8>) -> Result<()>;

    /// The attempt ended abnormally; drop any partial state
    fn discard(&mut self);

    /// A live replicated operation interleaved with the stream
    fn replicated(&mut self, envelope: ReplicationEnvelope) -> Result<()> {
        tracing::trace!("Ignoring replicated {:?} during sync", envelope.message_type);
        Ok(())
    }
}

impl<S: SyncSink + ?Sized> SyncSink for &mut S {
    fn begin_stream(&mut self) -> Result<()> {
        (**self).begin_stream()
    }

    fn begin_entity(&mut self, entity: &EntityId, version: u64, config: &[u8], deletable: bool) -> Result<()> {
        (**self).begin_entity(entity, version, config, deletable)
    }

    fn begin_partition(&mut self, entity: &EntityId, version: u64, key: PartitionKey) -> Result<()> {
        (**self).begin_partition(entity, version, key)
    }

    fn apply_payload(&mut self, entity: &EntityId, version: u64, key: PartitionKey, payload: &[u8]) -> Result<()> {
        (**self).apply_payload(entity, version, key, payload)
    }

    fn end_partition(&mut self, entity: &EntityId, version: u64, key: PartitionKey) -> Result<()> {
        (**self).end_partition(entity, version, key)
    }

    fn end_entity(&mut self, entity: &EntityId, version: u64) -> Result<()> {
        (**self).end_entity(entity, version)
    }

    fn complete(&mut self, trailer: Vec<u8>) -> Result<()> {
        (**self).complete(trailer)
    }

    fn discard(&mut self) {
        (**self).discard()
    }

    fn replicated(&mut self, envelope: ReplicationEnvelope) -> Result<()> {
        (**self).replicated(envelope)
    }
}

/// Counters for one received attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Sync units accepted
    pub units: u64,
    /// Entities completed
    pub entities: u64,
    /// Live envelopes passed through
    pub replicated: u64,
}

/// Validates one incoming stream and drives a sink
pub struct PassiveSyncReceiver<S: SyncSink> {
    sink: S,
    validator: SyncValidator,
    stats: ReceiveStats,
    discarded: bool,
}

impl<S: SyncSink> PassiveSyncReceiver<S> {
    /// Receiver positioned before `StreamBegin`
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            validator: SyncValidator::new(),
            stats: ReceiveStats::default(),
            discarded: false,
        }
    }

    /// Stream position
    pub fn state(&self) -> SyncState {
        self.validator.state()
    }

    /// Statistics so far
    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give the sink back
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Validate one unit and forward it
    pub fn accept(&mut self, message: SyncMessage) -> Result<SyncState> {
        if let Err(err) = self.validator.advance(&message) {
            tracing::warn!("Sync stream rejected: {}", err);
            self.discard();
            return Err(err);
        }
        let name = message.name();
        if let Err(err) = self.forward(message) {
            tracing::warn!("Sync sink failed on {}: {}", name, err);
            self.validator.fail();
            self.discard();
            return Err(err);
        }
        self.stats.units += 1;
        Ok(self.validator.state())
    }

    /// Route one channel envelope: sync units are accepted, anything else is
    /// handed to [`SyncSink::replicated`]
    pub fn accept_envelope(&mut self, envelope: ReplicationEnvelope) -> Result<SyncState> {
        let inbound = match Inbound::classify(envelope) {
            Ok(inbound) => inbound,
            Err(err) => {
                self.abort(&err.to_string());
                return Err(err);
            }
        };
        match inbound {
            Inbound::Sync(message) => self.accept(message),
            Inbound::Replicated(envelope) => {
                if let Err(err) = self.sink.replicated(envelope) {
                    self.abort(&err.to_string());
                    return Err(err);
                }
                self.stats.replicated += 1;
                Ok(self.validator.state())
            }
        }
    }

    /// End the attempt abnormally (transport loss, cancellation)
    pub fn abort(&mut self, reason: &str) {
        if self.validator.state() == SyncState::Done {
            return;
        }
        tracing::warn!("Sync attempt aborted in state {:?}: {}", self.validator.state(), reason);
        self.validator.fail();
        self.discard();
    }

    /// Succeeds only if the stream reached `StreamEnd`
    pub fn finish(&mut self) -> Result<()> {
        match self.validator.state() {
            SyncState::Done => Ok(()),
            state => {
                self.validator.fail();
                self.discard();
                Err(Error::protocol(format!(
                    "synchronization stream ended in state {:?} before StreamEnd",
                    state
                )))
            }
        }
    }

    fn discard(&mut self) {
        if !self.discarded {
            self.discarded = true;
            self.sink.discard();
        }
    }

    fn forward(&mut self, message: SyncMessage) -> Result<()> {
        match message {
            SyncMessage::StreamBegin => self.sink.begin_stream(),
            SyncMessage::EntityBegin {
                entity,
                version,
                config,
                deletable,
            } => self.sink.begin_entity(&entity, version, &config, deletable),
            SyncMessage::PartitionBegin { entity, version, key } => {
                self.sink.begin_partition(&entity, version, key)
            }
            SyncMessage::PartitionPayload {
                entity,
                version,
                key,
                payload,
            } => self.sink.apply_payload(&entity, version, key, &payload),
            SyncMessage::PartitionEnd { entity, version, key } => {
                self.sink.end_partition(&entity, version, key)
            }
            SyncMessage::EntityEnd { entity, version } => {
                self.sink.end_entity(&entity, version)?;
                self.stats.entities += 1;
                Ok(())
            }
            SyncMessage::StreamEnd { trailer } => self.sink.complete(trailer),
        }
    }
}

/// Drive one whole attempt from `reader` into `sink`.
///
/// Returns once `StreamEnd` has been applied. A transport or codec error, or
/// a protocol violation, makes the sink discard and is returned as is.
pub async fn receive_stream<R, S>(reader: &mut R, sink: S) -> Result<ReceiveStats>
where
    R: AsyncRead + Unpin,
    S: SyncSink,
{
    let mut receiver = PassiveSyncReceiver::new(sink);
    while receiver.state() != SyncState::Done {
        let envelope = match ReplicationEnvelope::read_from(reader).await {
            Ok(envelope) => envelope,
            Err(err) => {
                receiver.abort(&err.to_string());
                return Err(err);
            }
        };
        receiver.accept_envelope(envelope)?;
    }
    receiver.finish()?;
    tracing::info!(
        "Sync stream received ({} units, {} entities)",
        receiver.stats().units,
        receiver.stats().entities
    );
    Ok(receiver.stats().clone())
}
