use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NexusError;

/// Chains the control plane can provision wallets and paymasters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Arbitrum,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Ethereum, Chain::Arbitrum, Chain::Solana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Arbitrum => "arbitrum",
            Chain::Solana => "solana",
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Chain::Ethereum | Chain::Arbitrum)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = NexusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Chain::Ethereum),
            "arbitrum" => Ok(Chain::Arbitrum),
            "solana" => Ok(Chain::Solana),
            other => Err(NexusError::validation_field(
                "UNSUPPORTED_CHAIN",
                format!("chain '{}' is not supported", other),
                "chain",
            )
            .with_suggestions(&["supported chains: ethereum, arbitrum, solana"])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
    }

    #[test]
    fn unknown_chain_is_a_validation_error() {
        let err = "dogecoin".parse::<Chain>().unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_CHAIN");
        assert_eq!(err.field(), Some("chain"));
    }

    #[test]
    fn evm_split() {
        assert!(Chain::Ethereum.is_evm());
        assert!(Chain::Arbitrum.is_evm());
        assert!(!Chain::Solana.is_evm());
    }
}
