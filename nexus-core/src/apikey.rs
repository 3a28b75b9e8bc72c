use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use nexus_common::model::{
    key_preview, ApiKey, ApiKeyStatus, ApiKeyType, IpAllowEntry, Project, ProjectStatus,
};
use nexus_common::perms::Permission;
use nexus_common::security::{random_hex_token, secrets_equal};
use nexus_common::{Environment, NexusError, Result};
use nexus_crypto::KeyVault;
use nexus_store::Store;

const KEY_INDEX_CONTEXT: &str = "key-index";
pub const ROTATION_GRACE_HOURS: i64 = 24;

/// Pieces of a presented `npay_proj_<projectId>_<keyId>_<type>_<hash>` key.
/// The projectId itself contains underscores, so it is everything between
/// the fixed prefix and the trailing three segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedApiKey {
    pub project_id: String,
    pub key_id: String,
    pub key_type: ApiKeyType,
    pub hash: String,
}

pub fn parse_api_key(presented: &str) -> Result<ParsedApiKey> {
    let invalid = || {
        NexusError::auth("INVALID_API_KEY_FORMAT", "API key does not match the expected format")
    };
    let parts: Vec<&str> = presented.split('_').collect();
    if parts.len() < 6 || parts[0] != "npay" || parts[1] != "proj" {
        return Err(invalid());
    }
    let hash = parts[parts.len() - 1];
    let key_type = ApiKeyType::parse(parts[parts.len() - 2]).ok_or_else(invalid)?;
    let key_id = parts[parts.len() - 3];
    let project_id = parts[2..parts.len() - 3].join("_");
    if project_id.is_empty() || key_id.is_empty() || hash.is_empty() {
        return Err(invalid());
    }
    Ok(ParsedApiKey {
        project_id,
        key_id: key_id.to_string(),
        key_type,
        hash: hash.to_string(),
    })
}

/// An authenticated key plus its project, as attached to the request.
#[derive(Debug, Clone)]
pub struct AuthenticatedKey {
    pub key: ApiKey,
    pub project: Project,
}

pub struct ApiKeyService {
    store: Arc<Store>,
    vault: KeyVault,
}

impl ApiKeyService {
    pub fn new(store: Arc<Store>, vault: KeyVault) -> Self {
        Self { store, vault }
    }

    /// Mints a key. The plaintext is returned exactly once; at rest only the
    /// AEAD blob (under the project subkey), the preview, and a keyed-MAC
    /// lookup tag survive.
    pub fn create_key(
        &self,
        project_id: &str,
        created_by: &str,
        name: &str,
        key_type: ApiKeyType,
        permissions: Option<Vec<Permission>>,
        ip_allowlist: Vec<IpAllowEntry>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApiKey, String)> {
        if name.trim().is_empty() {
            return Err(NexusError::validation_field("INVALID_NAME", "key name is required", "name"));
        }
        if let Some(at) = expires_at {
            if at <= Utc::now() {
                return Err(NexusError::validation_field(
                    "INVALID_EXPIRY",
                    "expiresAt must be in the future",
                    "expiresAt",
                ));
            }
        }
        for entry in &ip_allowlist {
            validate_allowlist_entry(&entry.ip)?;
        }

        let key_id = random_hex_token(4);
        let secret = random_hex_token(16);
        let plaintext = format!(
            "npay_proj_{}_{}_{}_{}",
            project_id,
            key_id,
            key_type.as_str(),
            secret
        );

        let key = ApiKey {
            id: format!("key_{}", key_id),
            project_id: project_id.to_string(),
            name: name.trim().to_string(),
            encrypted_key: self.vault.encrypt_str(project_id, &plaintext)?,
            key_preview: key_preview(&plaintext),
            key_type,
            permissions: permissions.unwrap_or_else(Permission::default_key_set),
            ip_allowlist,
            created_by: created_by.to_string(),
            last_used_at: None,
            usage_count: 0,
            expires_at,
            status: ApiKeyStatus::Active,
            grace_until: None,
            created_at: Utc::now(),
        };
        let tag = self.vault.mac_hex(KEY_INDEX_CONTEXT, plaintext.as_bytes())?;
        self.store.insert_api_key(&key, &tag)?;
        Ok((key, plaintext))
    }

    /// The full §4.1 reject matrix, in order. `caller_ip` is consulted only
    /// for production-type keys in the production environment.
    pub fn authenticate(
        &self,
        presented: &str,
        caller_ip: Option<&str>,
        environment: Environment,
    ) -> Result<AuthenticatedKey> {
        let parsed = parse_api_key(presented)?;
        let now = Utc::now();

        let mut key = self
            .find_by_plaintext(presented, &parsed)?
            .ok_or_else(|| NexusError::auth("INVALID_API_KEY", "API key not recognized"))?;

        if key.is_expired(now) {
            if key.status == ApiKeyStatus::Active {
                key.status = ApiKeyStatus::Expired;
                let _ = self.store.update_api_key(&key);
            }
            return Err(NexusError::auth("API_KEY_EXPIRED", "API key has expired"));
        }
        if !key.accepts_at(now) {
            return Err(NexusError::auth("API_KEY_REVOKED", "API key has been revoked"));
        }
        if parsed.project_id != key.project_id {
            return Err(NexusError::forbidden(
                "PROJECT_MISMATCH",
                "API key does not belong to the project it names",
            ));
        }

        let project = self
            .store
            .get_project(&key.project_id)?
            .filter(|p| p.status == ProjectStatus::Active)
            .ok_or_else(|| NexusError::auth("PROJECT_NOT_FOUND", "project is not available"))?;

        if environment.is_production()
            && key.key_type == ApiKeyType::Production
            && !key.ip_allowlist.is_empty()
        {
            let allowed = caller_ip
                .map(|ip| ip_allowed(&key.ip_allowlist, ip))
                .unwrap_or(false);
            if !allowed {
                return Err(NexusError::forbidden(
                    "IP_NOT_WHITELISTED",
                    "caller IP is not on this key's allowlist",
                ));
            }
        }

        key.last_used_at = Some(now);
        key.usage_count += 1;
        // usage bookkeeping must not fail the request
        if let Err(e) = self.store.update_api_key(&key) {
            tracing::warn!(target: "apikey", "usage bookkeeping failed for {}: {}", key.id, e);
        }

        Ok(AuthenticatedKey { key, project })
    }

    /// Keyed-MAC index first; decrypt-scan over the parsed project's
    /// active/rotated keys as the fallback.
    fn find_by_plaintext(&self, presented: &str, parsed: &ParsedApiKey) -> Result<Option<ApiKey>> {
        let tag = self.vault.mac_hex(KEY_INDEX_CONTEXT, presented.as_bytes())?;
        if let Some(key_id) = self.store.get_key_id_by_lookup(&tag)? {
            return self.store.get_api_key(&key_id);
        }

        for candidate in self.store.scan_candidate_keys(&parsed.project_id)? {
            match self.vault.decrypt_str(&candidate.project_id, &candidate.encrypted_key) {
                Ok(plaintext) if secrets_equal(&plaintext, presented) => {
                    return Ok(Some(candidate));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    pub fn list_keys(&self, project_id: &str) -> Result<Vec<ApiKey>> {
        self.store.list_api_keys(project_id)
    }

    pub fn get_key(&self, project_id: &str, key_id: &str) -> Result<ApiKey> {
        self.store
            .get_api_key(key_id)?
            .filter(|k| k.project_id == project_id)
            .ok_or_else(|| NexusError::not_found(format!("API key {}", key_id)))
    }

    /// Issues a replacement and marks the old key rotated with a 24-hour
    /// grace window during which both plaintexts authenticate.
    pub fn rotate_key(&self, project_id: &str, key_id: &str, actor: &str) -> Result<(ApiKey, String, ApiKey)> {
        let mut old = self.get_key(project_id, key_id)?;
        if old.status != ApiKeyStatus::Active {
            return Err(NexusError::conflict("KEY_NOT_ACTIVE", "only active keys can be rotated"));
        }

        let (new_key, plaintext) = self.create_key(
            project_id,
            actor,
            &old.name,
            old.key_type,
            Some(old.permissions.clone()),
            old.ip_allowlist.clone(),
            old.expires_at,
        )?;

        old.status = ApiKeyStatus::Rotated;
        old.grace_until = Some(Utc::now() + Duration::hours(ROTATION_GRACE_HOURS));
        self.store.update_api_key(&old)?;

        Ok((new_key, plaintext, old))
    }

    pub fn revoke_key(&self, project_id: &str, key_id: &str) -> Result<ApiKey> {
        let mut key = self.get_key(project_id, key_id)?;
        key.status = ApiKeyStatus::Revoked;
        key.grace_until = None;
        self.store.update_api_key(&key)?;
        Ok(key)
    }

    pub fn update_allowlist(
        &self,
        project_id: &str,
        key_id: &str,
        add: Vec<IpAllowEntry>,
        remove: Vec<String>,
    ) -> Result<ApiKey> {
        let mut key = self.get_key(project_id, key_id)?;
        for entry in &add {
            validate_allowlist_entry(&entry.ip)?;
        }
        key.ip_allowlist.retain(|e| !remove.contains(&e.ip));
        for entry in add {
            if !key.ip_allowlist.iter().any(|e| e.ip == entry.ip) {
                key.ip_allowlist.push(entry);
            }
        }
        self.store.update_api_key(&key)?;
        Ok(key)
    }
}

fn validate_allowlist_entry(entry: &str) -> Result<()> {
    let ok = match entry.split_once('/') {
        Some((addr, prefix)) => {
            addr.parse::<Ipv4Addr>().is_ok()
                && prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false)
        }
        None => entry.parse::<Ipv4Addr>().is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(NexusError::validation_field(
            "INVALID_IP_ENTRY",
            format!("'{}' is not an IPv4 address or CIDR block", entry),
            "ipAllowlist",
        ))
    }
}

/// Exact IPv4 equality or CIDR membership. An empty allowlist means any IP.
pub fn ip_allowed(entries: &[IpAllowEntry], caller_ip: &str) -> bool {
    if entries.is_empty() {
        return true;
    }
    let Ok(ip) = caller_ip.parse::<Ipv4Addr>() else {
        return false;
    };
    entries.iter().any(|entry| match entry.ip.split_once('/') {
        Some((net, prefix)) => {
            let (Ok(net), Ok(prefix)) = (net.parse::<Ipv4Addr>(), prefix.parse::<u8>()) else {
                return false;
            };
            if prefix > 32 {
                return false;
            }
            if prefix == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - prefix as u32);
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        None => entry.ip.parse::<Ipv4Addr>().map(|net| net == ip).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ip: &str) -> IpAllowEntry {
        IpAllowEntry { ip: ip.into(), description: None, added_at: Utc::now() }
    }

    #[test]
    fn parse_extracts_embedded_project_id() {
        let parsed =
            parse_api_key("npay_proj_proj_abc123_deadbeef_production_0123456789abcdef").unwrap();
        assert_eq!(parsed.project_id, "proj_abc123");
        assert_eq!(parsed.key_id, "deadbeef");
        assert_eq!(parsed.key_type, ApiKeyType::Production);
        assert_eq!(parsed.hash, "0123456789abcdef");
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for bad in [
            "",
            "npay",
            "npay_proj",
            "npay_proj_p_k",
            "npay_proj_p_k_production",
            "nkey_proj_p_k_production_h",
            "npay_user_p_k_production_h",
            "npay_proj_p_k_banana_h",
        ] {
            assert_eq!(parse_api_key(bad).unwrap_err().code(), "INVALID_API_KEY_FORMAT", "{}", bad);
        }
    }

    #[test]
    fn cidr_membership() {
        let entries = vec![entry("10.0.0.0/24")];
        assert!(ip_allowed(&entries, "10.0.0.1"));
        assert!(ip_allowed(&entries, "10.0.0.255"));
        assert!(!ip_allowed(&entries, "10.0.1.0"));
        assert!(!ip_allowed(&entries, "11.0.0.1"));
    }

    #[test]
    fn exact_ip_and_empty_list() {
        assert!(ip_allowed(&[], "1.2.3.4"));
        let entries = vec![entry("203.0.113.5")];
        assert!(ip_allowed(&entries, "203.0.113.5"));
        assert!(!ip_allowed(&entries, "203.0.113.6"));
        assert!(!ip_allowed(&entries, "not-an-ip"));
    }

    #[test]
    fn allowlist_entry_validation() {
        assert!(validate_allowlist_entry("10.0.0.0/24").is_ok());
        assert!(validate_allowlist_entry("203.0.113.5").is_ok());
        assert!(validate_allowlist_entry("10.0.0.0/33").is_err());
        assert!(validate_allowlist_entry("banana").is_err());
    }
}
