use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NexusError;

/// Fixed permission set handlers declare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "wallets:create")]
    WalletsCreate,
    #[serde(rename = "wallets:deploy")]
    WalletsDeploy,
    #[serde(rename = "wallets:read")]
    WalletsRead,
    #[serde(rename = "paymaster:fund")]
    PaymasterFund,
    #[serde(rename = "analytics:read")]
    AnalyticsRead,
    #[serde(rename = "admin:*")]
    AdminAll,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::WalletsCreate => "wallets:create",
            Permission::WalletsDeploy => "wallets:deploy",
            Permission::WalletsRead => "wallets:read",
            Permission::PaymasterFund => "paymaster:fund",
            Permission::AnalyticsRead => "analytics:read",
            Permission::AdminAll => "admin:*",
        }
    }

    /// Default grant for a freshly created API key with no explicit set.
    pub fn default_key_set() -> Vec<Permission> {
        vec![Permission::WalletsCreate, Permission::WalletsDeploy, Permission::WalletsRead]
    }

    pub fn full_set() -> Vec<Permission> {
        vec![
            Permission::WalletsCreate,
            Permission::WalletsDeploy,
            Permission::WalletsRead,
            Permission::PaymasterFund,
            Permission::AnalyticsRead,
            Permission::AdminAll,
        ]
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = NexusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallets:create" => Ok(Permission::WalletsCreate),
            "wallets:deploy" => Ok(Permission::WalletsDeploy),
            "wallets:read" => Ok(Permission::WalletsRead),
            "paymaster:fund" => Ok(Permission::PaymasterFund),
            "analytics:read" => Ok(Permission::AnalyticsRead),
            "admin:*" => Ok(Permission::AdminAll),
            other => Err(NexusError::validation_field(
                "UNKNOWN_PERMISSION",
                format!("unknown permission '{}'", other),
                "permissions",
            )),
        }
    }
}

/// `admin:*` implies everything; otherwise the grant must contain the
/// required permission exactly.
pub fn grant_allows(granted: &[Permission], required: Permission) -> bool {
    granted.contains(&Permission::AdminAll) || granted.contains(&required)
}
