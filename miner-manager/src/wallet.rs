//! Coin-specific miner configuration and its local validation.
//!
//! Validation runs before anything is sent to a worker, so a rejected
//! wallet never costs a remote round trip.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// XDagger addresses are 32 characters of the base64 alphabet.
static XDAGGER_WALLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]{32}$").expect("valid regex"));

static ETH_WALLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));

static WORKER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{0,32}$").expect("valid regex"));

/// Which coin a miner works on, with its wallet and pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "coin", rename_all = "lowercase")]
pub enum CoinConfig {
    XDagger {
        wallet: String,
        pool: String,
    },
    Ethereum {
        wallet: String,
        /// `host:port` of the stratum endpoint.
        pool_host: String,
        /// Worker name reported to the pool. May be empty.
        worker: String,
    },
}

impl CoinConfig {
    pub fn wallet(&self) -> &str {
        match self {
            CoinConfig::XDagger { wallet, .. } | CoinConfig::Ethereum { wallet, .. } => wallet,
        }
    }

    /// Pool address as handed to the miner.
    pub fn pool_address(&self) -> String {
        match self {
            CoinConfig::XDagger { pool, .. } => pool.clone(),
            CoinConfig::Ethereum {
                wallet,
                pool_host,
                worker,
            } if worker.is_empty() => format!("stratum1+tcp://{wallet}@{pool_host}"),
            CoinConfig::Ethereum {
                wallet,
                pool_host,
                worker,
            } => format!("stratum1+tcp://{wallet}.{worker}@{pool_host}"),
        }
    }

    /// Trim every field and check it against the coin's format rules.
    pub fn validated(&self) -> Result<Self> {
        match self {
            CoinConfig::XDagger { wallet, pool } => {
                let wallet = wallet.trim();
                let pool = pool.trim();
                if pool.is_empty() {
                    return Err(Error::Validation("pool address is required".into()));
                }
                if wallet.is_empty() {
                    return Err(Error::Validation("wallet address is required".into()));
                }
                if !XDAGGER_WALLET.is_match(wallet) {
                    return Err(Error::Validation(
                        "XDagger wallet must be 32 base64 characters".into(),
                    ));
                }
                Ok(CoinConfig::XDagger {
                    wallet: wallet.to_string(),
                    pool: pool.to_string(),
                })
            }
            CoinConfig::Ethereum {
                wallet,
                pool_host,
                worker,
            } => {
                let wallet = wallet.trim();
                let pool_host = pool_host.trim();
                let worker = worker.trim();
                if wallet.is_empty() {
                    return Err(Error::Validation("wallet address is required".into()));
                }
                if !wallet.starts_with("0x") {
                    return Err(Error::Validation("Ethereum wallet must start with 0x".into()));
                }
                if !ETH_WALLET.is_match(wallet) {
                    return Err(Error::Validation(
                        "Ethereum wallet must be 0x followed by 40 hex digits".into(),
                    ));
                }
                if pool_host.is_empty() {
                    return Err(Error::Validation("pool host is required".into()));
                }
                if !WORKER_NAME.is_match(worker) {
                    return Err(Error::Validation(format!("invalid worker name {worker:?}")));
                }
                Ok(CoinConfig::Ethereum {
                    wallet: wallet.to_string(),
                    pool_host: pool_host.to_string(),
                    worker: worker.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn xdag(wallet: &str) -> CoinConfig {
        CoinConfig::XDagger {
            wallet: wallet.into(),
            pool: "xdag.coolmine.top:13654".into(),
        }
    }

    fn eth(wallet: &str) -> CoinConfig {
        CoinConfig::Ethereum {
            wallet: wallet.into(),
            pool_host: "eth.f2pool.com:8008".into(),
            worker: "rig01".into(),
        }
    }

    #[test_case("abcdefghijklmnopqrstuvwxyz012345" ; "lowercase alphanumeric")]
    #[test_case("ABCDEFGHIJKLMNOPQRSTUVWXYZ012345" ; "uppercase alphanumeric")]
    #[test_case("  gKNRtSL1pUaTpzMuPMznKw49ILtP6qX3 " ; "surrounding whitespace")]
    fn xdagger_wallet_accepted(wallet: &str) {
        let coin = xdag(wallet).validated().unwrap();
        assert_eq!(coin.wallet(), wallet.trim());
    }

    #[test_case("" ; "empty")]
    #[test_case("abc" ; "too short")]
    #[test_case("abcdefghijklmnopqrstuvwxyz0123456" ; "too long")]
    #[test_case("abcdefghijklmnopqrstuvwxyz01234!" ; "punctuation")]
    fn xdagger_wallet_rejected(wallet: &str) {
        assert!(matches!(xdag(wallet).validated(), Err(Error::Validation(_))));
    }

    #[test]
    fn xdagger_requires_pool() {
        let coin = CoinConfig::XDagger {
            wallet: "a".repeat(32),
            pool: " ".into(),
        };
        assert!(matches!(coin.validated(), Err(Error::Validation(_))));
    }

    #[test_case("0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5" ; "lowercase hex")]
    #[test_case("0x52BC44D5378309EE2ABF1539BF71DE1B7D7BE3B5" ; "uppercase hex")]
    fn ethereum_wallet_accepted(wallet: &str) {
        assert!(eth(wallet).validated().is_ok());
    }

    #[test_case("52bc44d5378309ee2abf1539bf71de1b7d7be3b5" ; "missing prefix")]
    #[test_case("1x52bc44d5378309ee2abf1539bf71de1b7d7be3b5" ; "wrong prefix")]
    #[test_case("0x52bc44" ; "too short")]
    #[test_case("0xzzbc44d5378309ee2abf1539bf71de1b7d7be3b5" ; "not hex")]
    fn ethereum_wallet_rejected(wallet: &str) {
        assert!(matches!(eth(wallet).validated(), Err(Error::Validation(_))));
    }

    #[test]
    fn ethereum_without_prefix_names_the_prefix() {
        let err = eth("52bc44d5378309ee2abf1539bf71de1b7d7be3b5")
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("0x"), "{err}");
    }

    #[test]
    fn ethereum_pool_address_includes_worker() {
        let coin = eth("0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5");
        assert_eq!(
            coin.pool_address(),
            "stratum1+tcp://0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5.rig01@eth.f2pool.com:8008"
        );
    }

    #[test]
    fn ethereum_pool_address_without_worker() {
        let coin = CoinConfig::Ethereum {
            wallet: "0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5".into(),
            pool_host: "eth.f2pool.com:8008".into(),
            worker: String::new(),
        };
        assert_eq!(
            coin.pool_address(),
            "stratum1+tcp://0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5@eth.f2pool.com:8008"
        );
    }
}
