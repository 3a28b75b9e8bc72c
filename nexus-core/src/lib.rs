pub mod analytics;
pub mod apikey;
pub mod email;
pub mod identity;
pub mod paymaster;
pub mod project;
pub mod wallet;
pub mod webhook;

pub use analytics::AnalyticsService;
pub use apikey::ApiKeyService;
pub use identity::IdentityService;
pub use paymaster::PaymasterService;
pub use project::ProjectService;
pub use wallet::WalletService;
pub use webhook::{WebhookEvent, WebhookSender};
