pub mod adapter;
pub mod evm;
pub mod mock;
pub mod oracle;
pub mod registry;
pub mod solana;

pub use adapter::{AdapterSet, ChainAdapter, SponsoredOp, TxReceipt};
pub use oracle::{HttpPriceOracle, PriceOracle, StaticPriceOracle};
pub use registry::{ChainConfig, ChainRegistry};
