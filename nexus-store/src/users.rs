use redb::ReadableTable;

use nexus_common::model::User;
use nexus_common::{NexusError, Result};

use crate::tables::{USERS, USERS_BY_EMAIL, USERS_BY_OAUTH, USERS_BY_TOKEN};
use crate::{db_err, decode, encode, Store};

fn oauth_key(provider: &str, oauth_id: &str) -> String {
    format!("{}|{}", provider, oauth_id)
}

fn verify_token_key(token: &str) -> String {
    format!("v|{}", token)
}

fn reset_token_key(token: &str) -> String {
    format!("r|{}", token)
}

impl Store {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut emails = txn.open_table(USERS_BY_EMAIL).map_err(db_err)?;
            if emails.get(user.email.as_str()).map_err(db_err)?.is_some() {
                return Err(NexusError::conflict(
                    "EMAIL_TAKEN",
                    format!("an account already exists for {}", user.email),
                ));
            }
            emails.insert(user.email.as_str(), user.id.as_str()).map_err(db_err)?;

            if let (Some(provider), Some(oauth_id)) = (&user.oauth_provider, &user.oauth_id) {
                let mut oauth = txn.open_table(USERS_BY_OAUTH).map_err(db_err)?;
                oauth
                    .insert(oauth_key(provider, oauth_id).as_str(), user.id.as_str())
                    .map_err(db_err)?;
            }
            if let Some(token) = &user.verification_token {
                let mut tokens = txn.open_table(USERS_BY_TOKEN).map_err(db_err)?;
                tokens.insert(verify_token_key(token).as_str(), user.id.as_str()).map_err(db_err)?;
            }

            let mut users = txn.open_table(USERS).map_err(db_err)?;
            users.insert(user.id.as_str(), encode(user)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.get_record(USERS, id)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.get_index(USERS_BY_EMAIL, email)? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    pub fn get_user_by_oauth(&self, provider: &str, oauth_id: &str) -> Result<Option<User>> {
        match self.get_index(USERS_BY_OAUTH, &oauth_key(provider, oauth_id))? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    pub fn get_user_by_verification_token(&self, token: &str) -> Result<Option<User>> {
        match self.get_index(USERS_BY_TOKEN, &verify_token_key(token))? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    pub fn get_user_by_reset_token(&self, token: &str) -> Result<Option<User>> {
        match self.get_index(USERS_BY_TOKEN, &reset_token_key(token))? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    /// Writes the record back and keeps the token indexes in sync with the
    /// (possibly cleared or replaced) token fields.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut users = txn.open_table(USERS).map_err(db_err)?;
            let previous: Option<User> = match users.get(user.id.as_str()).map_err(db_err)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let previous =
                previous.ok_or_else(|| NexusError::not_found(format!("user {}", user.id)))?;

            let mut tokens = txn.open_table(USERS_BY_TOKEN).map_err(db_err)?;
            if previous.verification_token != user.verification_token {
                if let Some(old) = &previous.verification_token {
                    tokens.remove(verify_token_key(old).as_str()).map_err(db_err)?;
                }
                if let Some(new) = &user.verification_token {
                    tokens.insert(verify_token_key(new).as_str(), user.id.as_str()).map_err(db_err)?;
                }
            }
            if previous.reset_token != user.reset_token {
                if let Some(old) = &previous.reset_token {
                    tokens.remove(reset_token_key(old).as_str()).map_err(db_err)?;
                }
                if let Some(new) = &user.reset_token {
                    tokens.insert(reset_token_key(new).as_str(), user.id.as_str()).map_err(db_err)?;
                }
            }

            users.insert(user.id.as_str(), encode(user)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nexus_common::model::UserStatus;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        (dir, store)
    }

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.into(),
            email: email.into(),
            password_hash: Some("$argon2id$stub".into()),
            oauth_id: None,
            oauth_provider: None,
            name: "Test User".into(),
            company: None,
            email_verified: false,
            verification_token: Some("aabbcc".into()),
            verification_expires: Some(Utc::now()),
            reset_token: None,
            reset_expires: None,
            last_login: None,
            login_attempts: 0,
            locked_until: None,
            status: UserStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_lookup_paths() {
        let (_dir, store) = store();
        let u = user("user_1", "alice@acme.com");
        store.insert_user(&u).unwrap();

        assert_eq!(store.get_user("user_1").unwrap().unwrap().email, "alice@acme.com");
        assert_eq!(store.get_user_by_email("alice@acme.com").unwrap().unwrap().id, "user_1");
        assert_eq!(store.get_user_by_verification_token("aabbcc").unwrap().unwrap().id, "user_1");
    }

    #[test]
    fn duplicate_email_conflicts() {
        let (_dir, store) = store();
        store.insert_user(&user("user_1", "alice@acme.com")).unwrap();
        let err = store.insert_user(&user("user_2", "alice@acme.com")).unwrap_err();
        assert_eq!(err.code(), "EMAIL_TAKEN");
    }

    #[test]
    fn token_index_follows_updates() {
        let (_dir, store) = store();
        let mut u = user("user_1", "alice@acme.com");
        store.insert_user(&u).unwrap();

        u.verification_token = None;
        u.email_verified = true;
        u.reset_token = Some("reset123".into());
        store.update_user(&u).unwrap();

        assert!(store.get_user_by_verification_token("aabbcc").unwrap().is_none());
        assert_eq!(store.get_user_by_reset_token("reset123").unwrap().unwrap().id, "user_1");
    }
}
