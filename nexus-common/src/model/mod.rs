pub mod apikey;
pub mod logs;
pub mod paymaster;
pub mod project;
pub mod user;
pub mod wallet;

pub use apikey::{key_preview, ApiKey, ApiKeyStatus, ApiKeyType, IpAllowEntry};
pub use logs::{ApiKeyUsage, TransactionLog, TransactionStatus, UserActivity};
pub use paymaster::{
    OperationType, PaymasterBalance, PaymasterPayment, PaymentStatus, ProjectPaymaster,
};
pub use project::{
    Project, ProjectMember, ProjectRole, ProjectSettings, ProjectStatus,
    MAX_RATE_LIMIT_PER_MINUTE, MIN_RATE_LIMIT_PER_MINUTE,
};
pub use user::{User, UserStatus, LOCKOUT_HOURS, MAX_LOGIN_ATTEMPTS};
pub use wallet::{DeployState, DeployStatus, Wallet};
