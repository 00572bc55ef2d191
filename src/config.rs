//! Host configuration: command-line flags with environment fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::service::{LedgerConfig, MAX_DIFFICULTY};

/// Evidence ledger server.
#[derive(Parser, Debug, Clone)]
#[command(name = "evidence-ledger", version, about)]
pub struct Config {
    /// Directory holding one JSON record per block
    #[arg(long, env = "EVIDENCE_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Address to listen on
    #[arg(long, env = "EVIDENCE_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Leading zero hex digits required of a sealed block hash
    #[arg(
        long,
        env = "EVIDENCE_DIFFICULTY",
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(0..=MAX_DIFFICULTY as i64)
    )]
    pub difficulty: u8,

    /// Highest nonce tried before a submission fails to seal
    #[arg(long, env = "EVIDENCE_MAX_NONCE", default_value_t = 50_000_000)]
    pub max_nonce: u64,

    /// Maximum accepted request body, in bytes
    #[arg(long, env = "EVIDENCE_MAX_UPLOAD_BYTES", default_value_t = 25 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

impl Config {
    /// The part of the configuration the ledger core consumes.
    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: usize::from(self.difficulty),
            max_nonce: self.max_nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::try_parse_from(["evidence-ledger"]).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.bind.port(), 5000);
        assert_eq!(cfg.ledger(), LedgerConfig::default());
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "evidence-ledger",
            "--difficulty",
            "4",
            "--max-nonce",
            "1000",
            "--data-dir",
            "/tmp/chain",
        ])
        .unwrap();
        assert_eq!(
            cfg.ledger(),
            LedgerConfig {
                difficulty: 4,
                max_nonce: 1000
            }
        );
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/chain"));
    }

    #[test]
    fn rejects_unreachable_difficulty() {
        assert!(Config::try_parse_from(["evidence-ledger", "--difficulty", "65"]).is_err());
    }
}
