//! The unit of intermediate data exchanged between map and reduce.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// An opaque payload keyed by an ordered byte key.
///
/// Records order by `key` alone, compared as unsigned bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Record {
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| anyhow::anyhow!("Bincode serialization failed: {}", e))
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        let (record, consumed): (Self, usize) =
            bincode::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| anyhow::anyhow!("Bincode deserialization failed: {}", e))?;
        if consumed != data.len() {
            anyhow::bail!(
                "record frame has {} trailing bytes",
                data.len() - consumed
            );
        }
        Ok(record)
    }
}
