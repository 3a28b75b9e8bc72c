use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::perms::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyType {
    Dev,
    Production,
    Restricted,
}

impl ApiKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyType::Dev => "dev",
            ApiKeyType::Production => "production",
            ApiKeyType::Restricted => "restricted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dev" => Some(ApiKeyType::Dev),
            "production" => Some(ApiKeyType::Production),
            "restricted" => Some(ApiKeyType::Restricted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
    Expired,
    Rotated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAllowEntry {
    /// Exact IPv4 address or IPv4 CIDR block.
    pub ip: String,
    pub description: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Stored key record. The plaintext key
/// `npay_proj_<projectId>_<keyId>_<type>_<hash>` is shown once at creation;
/// at rest only the AEAD blob and the preview remain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub encrypted_key: Vec<u8>,
    /// `first-8…last-4` of the plaintext, the most identifying output
    /// ever returned after creation.
    pub key_preview: String,
    pub key_type: ApiKeyType,
    pub permissions: Vec<Permission>,
    pub ip_allowlist: Vec<IpAllowEntry>,
    pub created_by: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ApiKeyStatus,
    /// Set when the key is rotated; the old key keeps authenticating until
    /// this instant.
    pub grace_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// Active keys always authenticate; rotated keys only inside the grace
    /// window.
    pub fn accepts_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ApiKeyStatus::Active => true,
            ApiKeyStatus::Rotated => self.grace_until.map(|g| g > now).unwrap_or(false),
            ApiKeyStatus::Revoked | ApiKeyStatus::Expired => false,
        }
    }
}

pub fn key_preview(plaintext: &str) -> String {
    if plaintext.len() <= 12 {
        return plaintext.to_string();
    }
    format!("{}...{}", &plaintext[..8], &plaintext[plaintext.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn preview_shape() {
        let p = key_preview("npay_proj_abc123_deadbeef_dev_0123456789abcdef");
        assert!(p.starts_with("npay_pro"));
        assert!(p.ends_with("cdef"));
        assert!(p.contains("..."));
    }

    #[test]
    fn rotated_keys_respect_grace() {
        let now = Utc::now();
        let key = ApiKey {
            id: "key_1".into(),
            project_id: "proj_1".into(),
            name: "test".into(),
            encrypted_key: vec![],
            key_preview: String::new(),
            key_type: ApiKeyType::Dev,
            permissions: Permission::default_key_set(),
            ip_allowlist: vec![],
            created_by: "user_1".into(),
            last_used_at: None,
            usage_count: 0,
            expires_at: None,
            status: ApiKeyStatus::Rotated,
            grace_until: Some(now + Duration::hours(24)),
            created_at: now,
        };
        assert!(key.accepts_at(now));
        assert!(!key.accepts_at(now + Duration::hours(25)));
    }
}
