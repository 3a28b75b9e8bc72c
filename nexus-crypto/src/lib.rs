pub mod derive;
pub mod evm;
pub mod password;
pub mod vault;

pub use derive::MasterSecret;
pub use vault::KeyVault;
