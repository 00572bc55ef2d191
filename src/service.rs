//! Evidence submission and verification on top of the ledger and its store.
//!
//! The store is the source of truth: [`EvidenceService::open`] rebuilds the
//! in-memory [`Ledger`] from it, and [`EvidenceService::submit`] persists a
//! sealed block before appending it in memory. A failed write therefore
//! leaves nothing to roll back.

use std::sync::{Mutex, PoisonError, RwLock};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{ChainError, EvidenceError};
use crate::fingerprint::{fingerprint, CaptureMetadata};
use crate::ledger::Ledger;
use crate::model::{now_millis, Block, BlockData, EvidencePayload};
use crate::storage::BlockStore;

/// Hex digits in a SHA-256 digest; no difficulty above this can be met.
pub const MAX_DIFFICULTY: usize = 64;

/// Tunables the core exposes to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Required leading zero hex digits of a sealed block hash.
    pub difficulty: usize,
    /// Highest nonce tried before giving up with `SealTimeout`.
    pub max_nonce: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: 2,
            max_nonce: 50_000_000,
        }
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub index: u64,
    pub fingerprint: String,
}

/// Result of a verification lookup. A miss is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,
    pub block_index: Option<u64>,
    /// Creation time of the matching block (not the claimed capture time).
    pub block_timestamp: Option<u64>,
}

impl Verification {
    fn miss() -> Self {
        Verification {
            verified: false,
            block_index: None,
            block_timestamp: None,
        }
    }

    fn hit(block: &Block) -> Self {
        Verification {
            verified: true,
            block_index: Some(block.index()),
            block_timestamp: Some(block.timestamp()),
        }
    }
}

/// Outcome of a full chain audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub ok: bool,
    pub length: u64,
    pub errors: Vec<String>,
}

/// Orchestrates fingerprinting, sealing, appending and persisting.
///
/// Submissions are serialized by an internal writer lock; reads take a
/// shared lock on the ledger and never wait for sealing.
pub struct EvidenceService<S> {
    ledger: RwLock<Ledger>,
    store: S,
    writer: Mutex<()>,
    config: LedgerConfig,
}

impl<S: BlockStore> EvidenceService<S> {
    /// Rebuild the ledger from `store`, writing the genesis block on first use.
    /// Fails with `TamperDetected` if the stored chain is not intact.
    pub fn open(store: S, config: LedgerConfig) -> Result<Self, EvidenceError> {
        if config.difficulty > MAX_DIFFICULTY {
            return Err(EvidenceError::invalid(format!(
                "difficulty {} exceeds {MAX_DIFFICULTY} hex digits",
                config.difficulty
            )));
        }

        let mut blocks = store.load_all()?;
        if blocks.is_empty() {
            let genesis = Block::genesis();
            store.put(&genesis)?;
            blocks.push(genesis);
        }

        let ledger = Ledger::from_blocks(blocks).map_err(|e| {
            warn!(error = %e, "stored chain failed validation");
            e
        })?;

        let stored = store.length()?;
        if stored != ledger.len() as u64 {
            return Err(ChainError::TamperDetected {
                index: stored.min(ledger.len() as u64),
                reason: format!("store holds {stored} blocks, chain has {}", ledger.len()),
            }
            .into());
        }

        info!(
            blocks = ledger.len(),
            tip = ledger.tip().hash(),
            difficulty = config.difficulty,
            "evidence ledger ready"
        );
        Ok(EvidenceService {
            ledger: RwLock::new(ledger),
            store,
            writer: Mutex::new(()),
            config,
        })
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record `media` captured at `meta` as a new sealed block.
    #[instrument(level = "debug", skip(self, media), fields(bytes = media.len()))]
    pub fn submit(
        &self,
        media: &[u8],
        meta: &CaptureMetadata,
    ) -> Result<Submission, EvidenceError> {
        let fingerprint = fingerprint(media, meta)?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let index = self.store.length()?;
        let previous_hash = self.read_ledger().tip().hash().to_string();
        let data = BlockData::Photo(EvidencePayload::new(fingerprint.clone(), meta.clone()));

        let mut block = Block::new(index, now_millis(), data, previous_hash);
        block.seal(self.config.difficulty, self.config.max_nonce)?;

        self.read_ledger().check_candidate(&block)?;
        self.store.put(&block)?;
        self.ledger
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(block)?;

        info!(index, %fingerprint, "evidence recorded");
        Ok(Submission { index, fingerprint })
    }

    /// Look up the fingerprint of the presented media and metadata.
    ///
    /// A miss cannot tell altered content from wrong claimed metadata: both
    /// are hashed together. A stored record that no longer matches its own
    /// hash or the chain held in memory fails with `TamperDetected`.
    #[instrument(level = "debug", skip(self, media), fields(bytes = media.len()))]
    pub fn verify(
        &self,
        media: &[u8],
        meta: &CaptureMetadata,
    ) -> Result<Verification, EvidenceError> {
        let fingerprint = fingerprint(media, meta)?;
        let Some(block) = self.store.find_by_fingerprint(&fingerprint)? else {
            return Ok(Verification::miss());
        };

        let reason = match self.read_ledger().get(block.index()) {
            // Persisted by a submission that has not been acknowledged yet.
            None => return Ok(Verification::miss()),
            Some(_) if !block.hash_is_consistent() => "stored hash does not match recomputed hash",
            Some(held) if held != &block => "stored record differs from the chain",
            Some(_) => return Ok(Verification::hit(&block)),
        };
        warn!(index = block.index(), reason, "refusing to verify against a tampered record");
        Err(ChainError::TamperDetected {
            index: block.index(),
            reason: reason.to_string(),
        }
        .into())
    }

    /// Number of blocks in the chain, genesis included.
    pub fn len(&self) -> usize {
        self.read_ledger().len()
    }

    /// Always `false`: the genesis block exists from `open` on.
    pub fn is_empty(&self) -> bool {
        self.read_ledger().is_empty()
    }

    pub fn tip(&self) -> Block {
        self.read_ledger().tip().clone()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.read_ledger().get(index).cloned()
    }

    /// Snapshot of the whole chain.
    pub fn blocks(&self) -> Vec<Block> {
        self.read_ledger().blocks().to_vec()
    }

    /// Whether both the chain in memory and its persisted records are intact
    /// and agree with each other.
    pub fn validate(&self) -> bool {
        self.audit_report().ok
    }

    /// Audit the chain in memory, then re-read every persisted record and
    /// compare it against that chain. Waits for an in-flight submission.
    pub fn audit_report(&self) -> AuditReport {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = self.read_ledger();

        let mut errors: Vec<String> = ledger.problems().iter().map(ToString::to_string).collect();
        match self.store.load_all() {
            Ok(stored) => errors.extend(ledger.divergence(&stored).iter().map(ToString::to_string)),
            Err(e) => errors.push(EvidenceError::from(e).to_string()),
        }
        if !errors.is_empty() {
            warn!(problems = errors.len(), "chain audit failed");
        }
        AuditReport {
            ok: errors.is_empty(),
            length: ledger.len() as u64,
            errors,
        }
    }

    fn read_ledger(&self) -> std::sync::RwLockReadGuard<'_, Ledger> {
        self.ledger.read().unwrap_or_else(PoisonError::into_inner)
    }
}
