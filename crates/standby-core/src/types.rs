//! Identifier types shared by the ledger and the sync protocol

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Identity of a connected client (a source of transactions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Placeholder for envelopes that carry no client
    pub const NULL: ClientId = ClientId(u64::MAX);

    /// Create a client id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for the placeholder id
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Big-endian key bytes, so stored buckets iterate in id order
    pub(crate) fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub(crate) fn from_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| Error::storage(format!("client key has {} bytes, expected 8", key.len())))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "client#null")
        } else {
            write!(f, "client#{}", self.0)
        }
    }
}

/// Client-local transaction id, assigned monotonically by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(i64);

impl TransactionId {
    /// The absent transaction id
    pub const NULL: TransactionId = TransactionId(-1);

    /// Create a transaction id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw value
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Negative values mean "absent"
    pub fn is_null(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Identifies a server-managed entity by type and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    /// Entity type name
    pub kind: String,
    /// Entity instance name
    pub name: String,
}

impl EntityId {
    /// Create an entity id
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The placeholder entity carried by stream-level units
    pub fn null() -> Self {
        Self {
            kind: String::new(),
            name: String::new(),
        }
    }

    /// True for the placeholder entity
    pub fn is_null(&self) -> bool {
        self.kind.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "{}:{}", self.kind, self.name)
        }
    }
}

/// Version placeholder for units that carry no entity
pub const NO_VERSION: u64 = 0;

/// Partition (concurrency) key of an entity.
///
/// Zero means "no partition" elsewhere in the replication channel and is not
/// representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey(NonZeroU32);

impl PartitionKey {
    /// Validate a raw key; zero is a protocol violation
    pub fn new(raw: u32) -> Result<Self> {
        NonZeroU32::new(raw)
            .map(Self)
            .ok_or_else(|| Error::protocol("partition key 0 is reserved and cannot be synchronized"))
    }

    /// Raw value (always > 0)
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
