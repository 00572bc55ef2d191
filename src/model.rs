//! Block model: evidence payloads, block hashing and proof-of-work sealing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::EvidenceError;
use crate::fingerprint::{CaptureMetadata, CaptureTime, Coordinate};

/// What a block records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockData {
    /// Fixed sentinel content of block 0.
    Genesis,
    Photo(EvidencePayload),
}

impl BlockData {
    /// Fingerprint of the recorded evidence; `None` for genesis.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            BlockData::Genesis => None,
            BlockData::Photo(p) => Some(&p.fingerprint),
        }
    }
}

/// A photo fingerprint together with the capture metadata it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePayload {
    pub fingerprint: String,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
    /// Claimed capture time, independent of the block's own timestamp.
    pub timestamp: CaptureTime,
}

impl EvidencePayload {
    pub fn new(fingerprint: String, meta: CaptureMetadata) -> Self {
        EvidencePayload {
            fingerprint,
            latitude: meta.latitude,
            longitude: meta.longitude,
            timestamp: meta.timestamp,
        }
    }
}

/// One ledger entry. The hash is kept consistent with the other fields by
/// every constructor and by [`Block::seal`]; fields are read-only outside
/// the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub(crate) index: u64,
    /// Creation time, ms since epoch.
    pub(crate) timestamp: u64,
    pub(crate) data: BlockData,
    /// Hash of the preceding block (empty for genesis).
    pub(crate) previous_hash: String,
    pub(crate) hash: String,
    pub(crate) nonce: u64,
}

impl Block {
    /// Build an unsealed block with `nonce = 0` and its hash computed.
    pub fn new(index: u64, timestamp: u64, data: BlockData, previous_hash: String) -> Self {
        let hash = block_hash(index, &previous_hash, timestamp, &data_json(&data), 0);
        Block {
            index,
            timestamp,
            data,
            previous_hash,
            hash,
            nonce: 0,
        }
    }

    /// The genesis block. Its timestamp is fixed so its hash is the same on
    /// every start.
    pub fn genesis() -> Self {
        Block::new(0, 0, BlockData::Genesis, String::new())
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &BlockData {
        &self.data
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Hash recomputed from the five non-hash fields.
    pub fn compute_hash(&self) -> String {
        block_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &data_json(&self.data),
            self.nonce,
        )
    }

    /// Whether the stored hash matches a fresh recomputation.
    pub fn hash_is_consistent(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Whether the stored hash carries at least `difficulty` leading zero hex digits.
    pub fn is_sealed(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Search nonces `0..=max_nonce` in order until the hash has `difficulty`
    /// leading zero hex digits. On `SealTimeout` the block is left untouched.
    pub fn seal(&mut self, difficulty: usize, max_nonce: u64) -> Result<(), EvidenceError> {
        let data = data_json(&self.data);
        for nonce in 0..=max_nonce {
            let hash = block_hash(self.index, &self.previous_hash, self.timestamp, &data, nonce);
            if meets_difficulty(&hash, difficulty) {
                debug!(index = self.index, nonce, difficulty, %hash, "block sealed");
                self.nonce = nonce;
                self.hash = hash;
                return Ok(());
            }
        }
        warn!(index = self.index, difficulty, max_nonce, "nonce ceiling reached");
        Err(EvidenceError::SealTimeout { max_nonce })
    }
}

/// Hash inputs (concatenate as bytes, SHA-256) and return lowercase hex.
pub fn hash_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hex::encode(hasher.finalize())
}

/// Block hash over `index || previous_hash || timestamp || data || nonce`,
/// numbers in decimal.
pub fn block_hash(
    index: u64,
    previous_hash: &str,
    timestamp: u64,
    data: &str,
    nonce: u64,
) -> String {
    hash_concat(&[
        index.to_string().as_bytes(),
        previous_hash.as_bytes(),
        timestamp.to_string().as_bytes(),
        data.as_bytes(),
        nonce.to_string().as_bytes(),
    ])
}

/// Number of leading `'0'` characters of a hex digest.
pub fn leading_zero_hex(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    leading_zero_hex(hash) >= difficulty
}

/// Current wall-clock time in ms since epoch.
pub fn now_millis() -> u64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    u64::try_from(nanos / 1_000_000).unwrap_or_default()
}

fn data_json(data: &BlockData) -> String {
    match serde_json::to_string(data) {
        Ok(json) => json,
        Err(e) => {
            // Only reachable for exotic payloads; fall back to a stable textual form.
            warn!(error = %e, "failed to serialize block data, hashing debug form");
            format!("{data:?}")
        }
    }
}
