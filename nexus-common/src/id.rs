use uuid::Uuid;

/// All entity ids are opaque prefixed strings: `user_…`, `proj_…`, `key_…`,
/// `pm_…`, `wal_…`, `tx_…`. The tail is UUID entropy without dashes.
fn prefixed(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

pub fn user_id() -> String {
    prefixed("user")
}

pub fn project_id() -> String {
    prefixed("proj")
}

pub fn key_record_id() -> String {
    prefixed("key")
}

pub fn paymaster_id() -> String {
    prefixed("pm")
}

pub fn wallet_id() -> String {
    prefixed("wal")
}

pub fn tx_id() -> String {
    prefixed("tx")
}

pub fn usage_id() -> String {
    prefixed("use")
}

pub fn request_id() -> String {
    prefixed("req")
}
