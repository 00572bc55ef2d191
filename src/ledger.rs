//! The append-only, hash-linked chain of blocks.

use tracing::{info, warn};

use crate::error::ChainError;
use crate::model::Block;

/// Ordered chain of blocks, position == `index`. Always holds the genesis
/// block; only [`Ledger::append`] mutates it.
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Vec<Block>,
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::new()
    }
}

impl Ledger {
    /// A chain holding only the genesis block.
    pub fn new() -> Self {
        Ledger {
            blocks: vec![Block::genesis()],
        }
    }

    /// Rebuild a chain from stored blocks (ordered by index). The result
    /// must pass [`Ledger::audit`].
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Err(ChainError::TamperDetected {
                index: 0,
                reason: "genesis block missing".into(),
            });
        }
        let ledger = Ledger { blocks };
        ledger.audit()?;
        Ok(ledger)
    }

    /// The most recently appended block.
    pub fn tip(&self) -> &Block {
        // Never empty: constructors guarantee the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`; kept for API symmetry with [`Ledger::len`].
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Check that `candidate` links onto the current tip without appending it.
    pub fn check_candidate(&self, candidate: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        let expected_index = tip.index() + 1;
        if candidate.index() != expected_index || candidate.previous_hash() != tip.hash() {
            return Err(ChainError::LinkageMismatch {
                expected_index,
                got_index: candidate.index(),
                expected_previous: tip.hash().to_string(),
                got_previous: candidate.previous_hash().to_string(),
            });
        }
        Ok(())
    }

    /// Append a candidate built on the current tip and return its index.
    /// On `LinkageMismatch` the chain is left unchanged.
    pub fn append(&mut self, candidate: Block) -> Result<u64, ChainError> {
        if let Err(e) = self.check_candidate(&candidate) {
            warn!(index = candidate.index(), error = %e, "rejected candidate block");
            return Err(e);
        }
        let index = candidate.index();
        info!(index, hash = candidate.hash(), "block appended");
        self.blocks.push(candidate);
        Ok(index)
    }

    /// Walk the whole chain and report the first integrity problem.
    pub fn audit(&self) -> Result<(), ChainError> {
        match self.problems().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether every block is intact and correctly linked. Read-only.
    pub fn validate(&self) -> bool {
        self.audit().is_ok()
    }

    /// Every integrity problem in the chain, in index order.
    pub fn problems(&self) -> Vec<ChainError> {
        chain_problems(&self.blocks)
    }

    /// Problems of a stored copy of this chain: its own integrity problems,
    /// then every record that is missing, extra, or different from the
    /// block held here.
    pub fn divergence(&self, stored: &[Block]) -> Vec<ChainError> {
        let mut out = chain_problems(stored);
        if stored.len() != self.blocks.len() {
            out.push(tamper(
                stored.len().min(self.blocks.len()) as u64,
                format!("store holds {} blocks, chain has {}", stored.len(), self.blocks.len()),
            ));
        }
        for (held, record) in self.blocks.iter().zip(stored) {
            if held != record {
                out.push(tamper(held.index(), "stored record differs from the chain".into()));
            }
        }
        out
    }
}

fn tamper(index: u64, reason: String) -> ChainError {
    ChainError::TamperDetected { index, reason }
}

/// Integrity problems of `blocks` read as a chain: position == index, the
/// genesis sentinel, previousHash linkage and hash recomputation.
pub fn chain_problems(blocks: &[Block]) -> Vec<ChainError> {
    let mut out = vec![];
    for (i, b) in blocks.iter().enumerate() {
        let pos = i as u64;

        if b.index() != pos {
            out.push(tamper(pos, format!("index field is {}, expected {pos}", b.index())));
        }

        if i == 0 {
            if b != &Block::genesis() {
                out.push(tamper(0, "genesis block does not match sentinel".into()));
            }
        } else if b.previous_hash() != blocks[i - 1].hash() {
            out.push(tamper(pos, format!("previousHash does not match block {}", pos - 1)));
        }

        if !b.hash_is_consistent() {
            out.push(tamper(pos, "stored hash does not match recomputed hash".into()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{CaptureTime, Coordinate};
    use crate::model::{BlockData, EvidencePayload};

    fn candidate(ledger: &Ledger, fp: &str) -> Block {
        let tip = ledger.tip();
        let mut b = Block::new(
            tip.index() + 1,
            1_700_000_000_000 + tip.index(),
            BlockData::Photo(EvidencePayload {
                fingerprint: fp.to_string(),
                latitude: Coordinate::parse("35.6586").unwrap(),
                longitude: Coordinate::parse("139.7454").unwrap(),
                timestamp: CaptureTime::Text("2024-05-01T10:00:00Z".into()),
            }),
            tip.hash().to_string(),
        );
        b.seal(1, u64::MAX).unwrap();
        b
    }

    fn chain_of(n: usize) -> Ledger {
        let mut ledger = Ledger::new();
        for i in 0..n {
            let b = candidate(&ledger, &format!("{i:064x}"));
            ledger.append(b).unwrap();
        }
        ledger
    }

    #[test]
    fn starts_with_genesis() {
        let ledger = Ledger::new();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.tip(), &Block::genesis());
        assert!(ledger.validate());
    }

    #[test]
    fn appended_chain_is_linked_and_valid() {
        let ledger = chain_of(5);
        assert_eq!(ledger.len(), 6);
        assert!(ledger.validate());
        for i in 1..ledger.len() {
            let blocks = ledger.blocks();
            assert_eq!(blocks[i].previous_hash(), blocks[i - 1].hash());
            assert_eq!(blocks[i].index(), i as u64);
        }
    }

    #[test]
    fn append_returns_new_index() {
        let mut ledger = Ledger::new();
        let b = candidate(&ledger, "aa");
        assert_eq!(ledger.append(b).unwrap(), 1);
        assert_eq!(ledger.tip().index(), 1);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let mut ledger = chain_of(2);
        let mut stale = Ledger::new();
        let dup = candidate(&stale, "dd");
        stale.append(dup.clone()).unwrap();

        let err = ledger.append(dup).unwrap_err();
        assert!(matches!(
            err,
            ChainError::LinkageMismatch { expected_index: 3, got_index: 1, .. }
        ));
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn stale_tip_is_rejected() {
        let mut ledger = Ledger::new();
        let first = candidate(&ledger, "aa");
        let racing = candidate(&ledger, "bb");
        ledger.append(first).unwrap();

        assert!(matches!(
            ledger.append(racing),
            Err(ChainError::LinkageMismatch { .. })
        ));
        assert_eq!(ledger.len(), 2);
        assert!(ledger.validate());
    }

    #[test]
    fn tampered_fingerprint_is_detected() {
        let mut ledger = chain_of(3);
        if let BlockData::Photo(p) = &mut ledger.blocks[2].data {
            p.fingerprint.replace_range(0..1, "f");
        }
        assert!(!ledger.validate());
        assert_eq!(
            ledger.audit().unwrap_err(),
            ChainError::TamperDetected {
                index: 2,
                reason: "stored hash does not match recomputed hash".into(),
            }
        );
    }

    #[test]
    fn rehashed_tampering_breaks_linkage() {
        let mut ledger = chain_of(3);
        let forged = &mut ledger.blocks[1];
        forged.timestamp += 1;
        forged.hash = forged.compute_hash();

        let problems = ledger.problems();
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], ChainError::TamperDetected { index: 2, .. }));
    }

    #[test]
    fn from_blocks_rejects_broken_chains() {
        let ledger = chain_of(2);
        let rebuilt = Ledger::from_blocks(ledger.blocks().to_vec()).unwrap();
        assert_eq!(rebuilt.len(), 3);

        let mut gap = ledger.blocks().to_vec();
        gap.remove(1);
        assert!(Ledger::from_blocks(gap).is_err());
        assert!(Ledger::from_blocks(vec![]).is_err());
    }

    #[test]
    fn divergence_reports_edited_and_missing_records() {
        let ledger = chain_of(2);
        assert!(ledger.divergence(ledger.blocks()).is_empty());

        let mut stored = ledger.blocks().to_vec();
        stored[1].timestamp = 42;
        let problems = ledger.divergence(&stored);
        assert!(problems.contains(&ChainError::TamperDetected {
            index: 1,
            reason: "stored hash does not match recomputed hash".into(),
        }));
        assert!(problems.contains(&ChainError::TamperDetected {
            index: 1,
            reason: "stored record differs from the chain".into(),
        }));

        let truncated = &ledger.blocks()[..2];
        assert_eq!(
            ledger.divergence(truncated),
            vec![ChainError::TamperDetected {
                index: 2,
                reason: "store holds 2 blocks, chain has 3".into(),
            }]
        );
    }
}
