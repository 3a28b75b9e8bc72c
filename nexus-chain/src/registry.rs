use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use nexus_common::{Chain, NexusError, Result};

/// Static per-chain wiring. Adding a chain is a registry entry plus an
/// adapter binding; nothing upstream changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub chain_id: u64,
    pub name: String,
    pub native_token: String,
    /// Base-unit exponent: 18 for wei, 9 for lamports.
    pub decimals: u32,
    pub rpc_url: String,
    pub block_explorer: String,
    /// Confirmations before a receipt counts as final.
    pub confirmations: u64,
    /// CREATE2 wallet factory (EVM) or wallet program id (Solana).
    pub wallet_factory: String,
    /// ERC-4337 EntryPoint (EVM only; empty for Solana).
    pub entry_point: String,
    /// Paymaster proxy factory (EVM) or paymaster program id (Solana).
    pub paymaster_factory: String,
    pub is_testnet: bool,
}

impl ChainConfig {
    /// Convert a raw base-unit amount into the display amount.
    pub fn to_native(&self, raw: u128) -> f64 {
        raw as f64 / 10f64.powi(self.decimals as i32)
    }
}

#[derive(Debug, Clone)]
pub struct ChainRegistry {
    configs: HashMap<Chain, ChainConfig>,
}

impl ChainRegistry {
    /// Built-in defaults; RPC URLs and contract addresses are overridable
    /// through `NEXUS_RPC_URL_<CHAIN>` / `NEXUS_WALLET_FACTORY_<CHAIN>` /
    /// `NEXUS_ENTRY_POINT_<CHAIN>` / `NEXUS_PAYMASTER_FACTORY_<CHAIN>`.
    pub fn from_env() -> Self {
        let mut configs = HashMap::new();

        configs.insert(
            Chain::Ethereum,
            ChainConfig {
                chain: Chain::Ethereum,
                chain_id: 1,
                name: "Ethereum".into(),
                native_token: "ETH".into(),
                decimals: 18,
                rpc_url: env_override("NEXUS_RPC_URL_ETHEREUM", "https://eth.llamarpc.com"),
                block_explorer: "https://etherscan.io".into(),
                confirmations: 2,
                wallet_factory: env_override(
                    "NEXUS_WALLET_FACTORY_ETHEREUM",
                    "0x9406cc6185a346906296840746125a0e44976454",
                ),
                entry_point: env_override(
                    "NEXUS_ENTRY_POINT_ETHEREUM",
                    "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
                ),
                paymaster_factory: env_override(
                    "NEXUS_PAYMASTER_FACTORY_ETHEREUM",
                    "0x7bc06c482dead17c0e297afbc32f6e63d3846650",
                ),
                is_testnet: false,
            },
        );

        configs.insert(
            Chain::Arbitrum,
            ChainConfig {
                chain: Chain::Arbitrum,
                chain_id: 42_161,
                name: "Arbitrum One".into(),
                native_token: "ETH".into(),
                decimals: 18,
                rpc_url: env_override("NEXUS_RPC_URL_ARBITRUM", "https://arb1.arbitrum.io/rpc"),
                block_explorer: "https://arbiscan.io".into(),
                confirmations: 2,
                wallet_factory: env_override(
                    "NEXUS_WALLET_FACTORY_ARBITRUM",
                    "0x9406cc6185a346906296840746125a0e44976454",
                ),
                entry_point: env_override(
                    "NEXUS_ENTRY_POINT_ARBITRUM",
                    "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789",
                ),
                paymaster_factory: env_override(
                    "NEXUS_PAYMASTER_FACTORY_ARBITRUM",
                    "0x7bc06c482dead17c0e297afbc32f6e63d3846650",
                ),
                is_testnet: false,
            },
        );

        configs.insert(
            Chain::Solana,
            ChainConfig {
                chain: Chain::Solana,
                chain_id: 101,
                name: "Solana".into(),
                native_token: "SOL".into(),
                decimals: 9,
                rpc_url: env_override("NEXUS_RPC_URL_SOLANA", "https://api.mainnet-beta.solana.com"),
                block_explorer: "https://explorer.solana.com".into(),
                confirmations: 1,
                wallet_factory: env_override(
                    "NEXUS_WALLET_FACTORY_SOLANA",
                    "NexWa11etFact0ry11111111111111111111111111",
                ),
                entry_point: String::new(),
                paymaster_factory: env_override(
                    "NEXUS_PAYMASTER_FACTORY_SOLANA",
                    "NexPayMaster1111111111111111111111111111111",
                ),
                is_testnet: false,
            },
        );

        Self { configs }
    }

    pub fn get(&self, chain: Chain) -> Result<&ChainConfig> {
        self.configs
            .get(&chain)
            .ok_or_else(|| NexusError::Internal(format!("no registry entry for {}", chain)))
    }

    pub fn all(&self) -> impl Iterator<Item = &ChainConfig> {
        self.configs.values()
    }
}

fn env_override(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chain_has_an_entry() {
        let registry = ChainRegistry::from_env();
        for chain in Chain::ALL {
            let cfg = registry.get(chain).unwrap();
            assert_eq!(cfg.chain, chain);
            assert!(!cfg.rpc_url.is_empty());
        }
    }

    #[test]
    fn native_conversion_uses_decimals() {
        let registry = ChainRegistry::from_env();
        let eth = registry.get(Chain::Ethereum).unwrap();
        assert!((eth.to_native(1_500_000_000_000_000_000u128) - 1.5).abs() < 1e-9);
        let sol = registry.get(Chain::Solana).unwrap();
        assert!((sol.to_native(2_000_000_000u128) - 2.0).abs() < 1e-9);
    }
}
