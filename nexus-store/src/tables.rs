use redb::TableDefinition;

// Primary tables: id -> bincode record.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("project_members");
pub const API_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");
pub const PAYMASTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("project_paymasters");
pub const BALANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("paymaster_balances");
pub const PAYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("paymaster_payments");
pub const WALLETS: TableDefinition<&str, &[u8]> = TableDefinition::new("wallets");
pub const TX_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("transaction_logs");
pub const ACTIVITY: TableDefinition<&str, &[u8]> = TableDefinition::new("user_activity");
pub const USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("api_key_usage");

// Secondary indexes: index key -> id.
pub const USERS_BY_EMAIL: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");
pub const USERS_BY_OAUTH: TableDefinition<&str, &str> = TableDefinition::new("users_by_oauth");
pub const USERS_BY_TOKEN: TableDefinition<&str, &str> = TableDefinition::new("users_by_token");
pub const PROJECTS_BY_SLUG: TableDefinition<&str, &str> = TableDefinition::new("projects_by_slug");
pub const PROJECTS_BY_OWNER: TableDefinition<&str, &str> = TableDefinition::new("projects_by_owner");
pub const MEMBERS_BY_USER: TableDefinition<&str, &str> = TableDefinition::new("members_by_user");
pub const API_KEYS_BY_PROJECT: TableDefinition<&str, &str> =
    TableDefinition::new("api_keys_by_project");
/// Keyed HMAC of the plaintext key -> keyId, the O(1) lookup path.
pub const API_KEY_LOOKUP: TableDefinition<&str, &str> = TableDefinition::new("api_key_lookup");
pub const PAYMASTER_BY_PROJECT_CHAIN: TableDefinition<&str, &str> =
    TableDefinition::new("paymaster_by_project_chain");
pub const PAYMENT_BY_TXHASH: TableDefinition<&str, &str> =
    TableDefinition::new("payment_by_txhash");
pub const PAYMENTS_BY_PROJECT: TableDefinition<&str, &str> =
    TableDefinition::new("payments_by_project");
pub const WALLET_BY_SOCIAL: TableDefinition<&str, &str> = TableDefinition::new("wallet_by_social");
pub const WALLETS_BY_PROJECT: TableDefinition<&str, &str> =
    TableDefinition::new("wallets_by_project");
pub const TXLOG_BY_TXHASH: TableDefinition<&str, &str> = TableDefinition::new("txlog_by_txhash");
pub const TXLOGS_BY_PROJECT: TableDefinition<&str, &str> =
    TableDefinition::new("txlogs_by_project");
pub const TXLOGS_BY_USER: TableDefinition<&str, &str> = TableDefinition::new("txlogs_by_user");
pub const USAGE_BY_KEY: TableDefinition<&str, &str> = TableDefinition::new("usage_by_key");
pub const USAGE_BY_PROJECT: TableDefinition<&str, &str> = TableDefinition::new("usage_by_project");
