use redb::ReadableTable;

use nexus_common::model::{ApiKey, ApiKeyStatus};
use nexus_common::Result;

use crate::tables::{API_KEYS, API_KEYS_BY_PROJECT, API_KEY_LOOKUP};
use crate::{db_err, decode, encode, Store};

/// Bound on the decrypt-scan fallback; the HMAC index is the fast path.
pub const KEY_SCAN_LIMIT: usize = 512;

impl Store {
    pub fn insert_api_key(&self, key: &ApiKey, lookup_hmac: &str) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut keys = txn.open_table(API_KEYS).map_err(db_err)?;
            keys.insert(key.id.as_str(), encode(key)?.as_slice()).map_err(db_err)?;

            let mut by_project = txn.open_table(API_KEYS_BY_PROJECT).map_err(db_err)?;
            by_project
                .insert(format!("{}|{}", key.project_id, key.id).as_str(), key.id.as_str())
                .map_err(db_err)?;

            let mut lookup = txn.open_table(API_KEY_LOOKUP).map_err(db_err)?;
            lookup.insert(lookup_hmac, key.id.as_str()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_api_key(&self, key_id: &str) -> Result<Option<ApiKey>> {
        self.get_record(API_KEYS, key_id)
    }

    pub fn update_api_key(&self, key: &ApiKey) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut keys = txn.open_table(API_KEYS).map_err(db_err)?;
            keys.insert(key.id.as_str(), encode(key)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_key_id_by_lookup(&self, lookup_hmac: &str) -> Result<Option<String>> {
        self.get_index(API_KEY_LOOKUP, lookup_hmac)
    }

    pub fn list_api_keys(&self, project_id: &str) -> Result<Vec<ApiKey>> {
        let ids = self.scan_index(API_KEYS_BY_PROJECT, project_id, None, None)?;
        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(k) = self.get_api_key(&id)? {
                keys.push(k);
            }
        }
        Ok(keys)
    }

    /// Candidates for the decrypt-scan fallback: active and rotated keys of
    /// the parsed project, bounded.
    pub fn scan_candidate_keys(&self, project_id: &str) -> Result<Vec<ApiKey>> {
        let keys = self.list_api_keys(project_id)?;
        Ok(keys
            .into_iter()
            .filter(|k| matches!(k.status, ApiKeyStatus::Active | ApiKeyStatus::Rotated))
            .take(KEY_SCAN_LIMIT)
            .collect())
    }

    /// Soft-delete support: flips every active key of a project to revoked.
    pub fn revoke_project_keys(&self, project_id: &str) -> Result<usize> {
        let txn = self.db().begin_write().map_err(db_err)?;
        let mut revoked = 0;
        {
            let by_project = txn.open_table(API_KEYS_BY_PROJECT).map_err(db_err)?;
            let start = format!("{}|", project_id);
            let end = format!("{}|~", project_id);
            let mut ids = Vec::new();
            for entry in by_project.range(start.as_str()..=end.as_str()).map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                ids.push(v.value().to_string());
            }
            drop(by_project);

            let mut keys = txn.open_table(API_KEYS).map_err(db_err)?;
            for id in ids {
                let record: Option<ApiKey> = match keys.get(id.as_str()).map_err(db_err)? {
                    Some(guard) => Some(decode(guard.value())?),
                    None => None,
                };
                if let Some(mut key) = record {
                    if key.status == ApiKeyStatus::Active || key.status == ApiKeyStatus::Rotated {
                        key.status = ApiKeyStatus::Revoked;
                        keys.insert(id.as_str(), encode(&key)?.as_slice()).map_err(db_err)?;
                        revoked += 1;
                    }
                }
            }
        }
        txn.commit().map_err(db_err)?;
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nexus_common::model::ApiKeyType;
    use nexus_common::perms::Permission;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        (dir, store)
    }

    fn key(id: &str, project: &str, status: ApiKeyStatus) -> ApiKey {
        ApiKey {
            id: id.into(),
            project_id: project.into(),
            name: "server key".into(),
            encrypted_key: vec![1, 2, 3],
            key_preview: "npay_pro...beef".into(),
            key_type: ApiKeyType::Dev,
            permissions: Permission::default_key_set(),
            ip_allowlist: vec![],
            created_by: "user_1".into(),
            last_used_at: None,
            usage_count: 0,
            expires_at: None,
            status,
            grace_until: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_index_resolves() {
        let (_dir, store) = store();
        store.insert_api_key(&key("key_1", "proj_1", ApiKeyStatus::Active), "hmac_abc").unwrap();
        assert_eq!(store.get_key_id_by_lookup("hmac_abc").unwrap().unwrap(), "key_1");
        assert!(store.get_key_id_by_lookup("hmac_missing").unwrap().is_none());
    }

    #[test]
    fn candidates_exclude_revoked() {
        let (_dir, store) = store();
        store.insert_api_key(&key("key_1", "proj_1", ApiKeyStatus::Active), "h1").unwrap();
        store.insert_api_key(&key("key_2", "proj_1", ApiKeyStatus::Rotated), "h2").unwrap();
        store.insert_api_key(&key("key_3", "proj_1", ApiKeyStatus::Revoked), "h3").unwrap();
        store.insert_api_key(&key("key_4", "proj_2", ApiKeyStatus::Active), "h4").unwrap();

        let candidates = store.scan_candidate_keys("proj_1").unwrap();
        let ids: Vec<_> = candidates.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["key_1", "key_2"]);
    }

    #[test]
    fn revoke_project_keys_flips_active_and_rotated() {
        let (_dir, store) = store();
        store.insert_api_key(&key("key_1", "proj_1", ApiKeyStatus::Active), "h1").unwrap();
        store.insert_api_key(&key("key_2", "proj_1", ApiKeyStatus::Rotated), "h2").unwrap();
        store.insert_api_key(&key("key_3", "proj_1", ApiKeyStatus::Expired), "h3").unwrap();

        assert_eq!(store.revoke_project_keys("proj_1").unwrap(), 2);
        assert_eq!(store.get_api_key("key_1").unwrap().unwrap().status, ApiKeyStatus::Revoked);
        assert_eq!(store.get_api_key("key_3").unwrap().unwrap().status, ApiKeyStatus::Expired);
    }
}
