//! Hash-chained evidence ledger.
//!
//! Media fingerprints, bound to their claimed capture place and time, are
//! recorded in proof-of-work sealed blocks. The chain is persisted one record
//! per block and can be audited for tampering at any time.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod model;
pub mod routes;
pub mod service;
pub mod storage;

pub use error::{ChainError, EvidenceError, StorageError};
pub use fingerprint::{fingerprint, CaptureMetadata, CaptureTime, Coordinate};
pub use ledger::Ledger;
pub use model::{Block, BlockData, EvidencePayload};
pub use service::{AuditReport, EvidenceService, LedgerConfig, Submission, Verification};
pub use storage::{BlockStore, FileStore, MemoryStore};
