use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use nexus_common::model::{User, UserStatus};
use nexus_common::security::random_hex_token;
use nexus_common::{id, NexusError, Result};
use nexus_crypto::password::{hash_password, verify_password};
use nexus_store::Store;

use crate::email::{validate_email, EmailSender};

const JWT_ISSUER: &str = "nexuspay";
const JWT_AUDIENCE: &str = "nexuspay-api";
const VERIFICATION_TOKEN_HOURS: i64 = 24;
const RESET_TOKEN_HOURS: i64 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct IdentityService {
    store: Arc<Store>,
    email: Arc<dyn EmailSender>,
    jwt_secret: String,
    jwt_ttl_hours: i64,
}

impl IdentityService {
    pub fn new(store: Arc<Store>, email: Arc<dyn EmailSender>, jwt_secret: String) -> Self {
        Self { store, email, jwt_secret, jwt_ttl_hours: 24 }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        company: Option<String>,
    ) -> Result<User> {
        validate_email(email)?;
        check_password_complexity(password)?;
        if name.trim().len() < 2 {
            return Err(NexusError::validation_field(
                "INVALID_NAME",
                "name must be at least 2 characters",
                "name",
            ));
        }

        let email = email.trim().to_ascii_lowercase();
        let now = Utc::now();
        let token = random_hex_token(32);
        let user = User {
            id: id::user_id(),
            email: email.clone(),
            password_hash: Some(hash_password(password)?),
            oauth_id: None,
            oauth_provider: None,
            name: name.trim().to_string(),
            company,
            email_verified: false,
            verification_token: Some(token.clone()),
            verification_expires: Some(now + Duration::hours(VERIFICATION_TOKEN_HOURS)),
            reset_token: None,
            reset_expires: None,
            last_login: None,
            login_attempts: 0,
            locked_until: None,
            status: UserStatus::Active,
            created_at: now,
        };
        self.store.insert_user(&user)?;

        // mail failure must not lose the account
        if let Err(e) = self.email.send_verification(&user.email, &token).await {
            tracing::warn!(target: "identity", "verification mail failed for {}: {}", user.email, e);
        }
        Ok(user)
    }

    pub fn verify_email(&self, token: &str) -> Result<User> {
        let mut user = self
            .store
            .get_user_by_verification_token(token)?
            .ok_or_else(|| NexusError::auth("INVALID_TOKEN", "verification token is invalid"))?;
        let now = Utc::now();
        if user.verification_expires.map(|at| at < now).unwrap_or(true) {
            return Err(NexusError::auth("TOKEN_EXPIRED", "verification token has expired"));
        }
        user.email_verified = true;
        user.verification_token = None;
        user.verification_expires = None;
        self.store.update_user(&user)?;
        Ok(user)
    }

    /// Password login. Failures are uniform (`INVALID_CREDENTIALS`) so the
    /// response does not reveal which factor was wrong; the lockout check
    /// comes first and is explicit.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let email = email.trim().to_ascii_lowercase();
        let now = Utc::now();
        let mut user = self
            .store
            .get_user_by_email(&email)?
            .ok_or_else(|| NexusError::auth("INVALID_CREDENTIALS", "invalid email or password"))?;

        if user.status != UserStatus::Active {
            return Err(NexusError::forbidden("ACCOUNT_DISABLED", "this account is not active"));
        }
        if user.is_locked(now) {
            return Err(NexusError::forbidden(
                "ACCOUNT_LOCKED",
                "too many failed logins; try again later",
            ));
        }

        let stored = user
            .password_hash
            .clone()
            .ok_or_else(|| NexusError::auth("INVALID_CREDENTIALS", "invalid email or password"))?;
        if !verify_password(password, &stored) {
            user.record_failed_login(now);
            self.store.update_user(&user)?;
            return Err(NexusError::auth("INVALID_CREDENTIALS", "invalid email or password"));
        }

        user.record_successful_login(now);
        self.store.update_user(&user)?;
        let token = self.issue_jwt(&user)?;
        Ok((user, token))
    }

    /// OAuth sign-in: link by oauthId first, then by email (trusted, so the
    /// address auto-verifies); otherwise create the account.
    pub fn oauth_login(
        &self,
        provider: &str,
        oauth_id: &str,
        email: &str,
        name: &str,
    ) -> Result<(User, String)> {
        let email = email.trim().to_ascii_lowercase();
        let now = Utc::now();

        let user = if let Some(mut user) = self.store.get_user_by_oauth(provider, oauth_id)? {
            user.record_successful_login(now);
            self.store.update_user(&user)?;
            user
        } else if let Some(mut user) = self.store.get_user_by_email(&email)? {
            // linking converts the account to OAuth-type; exactly one of
            // password_hash / oauth_id is ever set
            user.oauth_id = Some(oauth_id.to_string());
            user.oauth_provider = Some(provider.to_string());
            user.password_hash = None;
            user.email_verified = true;
            user.record_successful_login(now);
            self.store.update_user(&user)?;
            user
        } else {
            let user = User {
                id: id::user_id(),
                email,
                password_hash: None,
                oauth_id: Some(oauth_id.to_string()),
                oauth_provider: Some(provider.to_string()),
                name: name.to_string(),
                company: None,
                email_verified: true,
                verification_token: None,
                verification_expires: None,
                reset_token: None,
                reset_expires: None,
                last_login: Some(now),
                login_attempts: 0,
                locked_until: None,
                status: UserStatus::Active,
                created_at: now,
            };
            self.store.insert_user(&user)?;
            user
        };

        if user.status != UserStatus::Active {
            return Err(NexusError::forbidden("ACCOUNT_DISABLED", "this account is not active"));
        }
        let token = self.issue_jwt(&user)?;
        Ok((user, token))
    }

    /// Always succeeds from the caller's perspective; whether the address
    /// exists is not disclosed.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = email.trim().to_ascii_lowercase();
        if let Some(mut user) = self.store.get_user_by_email(&email)? {
            let token = random_hex_token(32);
            user.reset_token = Some(token.clone());
            user.reset_expires = Some(Utc::now() + Duration::hours(RESET_TOKEN_HOURS));
            self.store.update_user(&user)?;
            if let Err(e) = self.email.send_password_reset(&user.email, &token).await {
                tracing::warn!(target: "identity", "reset mail failed for {}: {}", user.email, e);
            }
        }
        Ok(())
    }

    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<User> {
        check_password_complexity(new_password)?;
        let mut user = self
            .store
            .get_user_by_reset_token(token)?
            .ok_or_else(|| NexusError::auth("INVALID_TOKEN", "reset token is invalid"))?;
        if user.reset_expires.map(|at| at < Utc::now()).unwrap_or(true) {
            return Err(NexusError::auth("TOKEN_EXPIRED", "reset token has expired"));
        }
        user.password_hash = Some(hash_password(new_password)?);
        user.reset_token = None;
        user.reset_expires = None;
        user.login_attempts = 0;
        user.locked_until = None;
        self.store.update_user(&user)?;
        Ok(user)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<User> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| NexusError::not_found(format!("user {}", user_id)))
    }

    pub fn update_profile(
        &self,
        user_id: &str,
        name: Option<String>,
        company: Option<String>,
    ) -> Result<User> {
        let mut user = self.get_profile(user_id)?;
        if let Some(name) = name {
            if name.trim().len() < 2 {
                return Err(NexusError::validation_field(
                    "INVALID_NAME",
                    "name must be at least 2 characters",
                    "name",
                ));
            }
            user.name = name.trim().to_string();
        }
        if company.is_some() {
            user.company = company;
        }
        self.store.update_user(&user)?;
        Ok(user)
    }

    pub fn issue_jwt(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            iss: JWT_ISSUER.to_string(),
            aud: JWT_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.jwt_ttl_hours)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(|e| NexusError::Internal(format!("jwt encode: {}", e)))
    }

    /// Validates signature, issuer, audience, and expiry, then requires the
    /// subject to still be an active user.
    pub fn validate_jwt(&self, token: &str) -> Result<User> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[JWT_ISSUER]);
        validation.set_audience(&[JWT_AUDIENCE]);
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|_| NexusError::auth("INVALID_TOKEN", "session token is invalid or expired"))?;

        let user = self
            .store
            .get_user(&data.claims.sub)?
            .ok_or_else(|| NexusError::auth("INVALID_TOKEN", "session token is invalid or expired"))?;
        if user.status != UserStatus::Active {
            return Err(NexusError::auth("INVALID_TOKEN", "session token is invalid or expired"));
        }
        Ok(user)
    }
}

/// ≥8 chars with upper, lower, digit, and symbol.
pub fn check_password_complexity(password: &str) -> Result<()> {
    let long_enough = password.len() >= 8;
    let upper = password.chars().any(|c| c.is_ascii_uppercase());
    let lower = password.chars().any(|c| c.is_ascii_lowercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if long_enough && upper && lower && digit && symbol {
        Ok(())
    } else {
        Err(NexusError::validation_field(
            "WEAK_PASSWORD",
            "password must be at least 8 characters with upper and lower case letters, a digit, and a symbol",
            "password",
        )
        .with_suggestions(&["example shape: Aa1!aaaa"]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::LogEmailSender;

    fn service() -> (tempfile::TempDir, IdentityService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("nexus.redb")).unwrap());
        let service = IdentityService::new(store, Arc::new(LogEmailSender), "test-secret".into());
        (dir, service)
    }

    #[tokio::test]
    async fn register_verify_login_round_trip() {
        let (_dir, svc) = service();
        let user = svc.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
        assert!(!user.email_verified);
        let token = user.verification_token.clone().unwrap();

        let verified = svc.verify_email(&token).unwrap();
        assert!(verified.email_verified);
        assert!(verified.verification_token.is_none());

        let (logged_in, jwt) = svc.login("alice@acme.com", "P@ssw0rd1").unwrap();
        assert_eq!(logged_in.id, user.id);

        let from_token = svc.validate_jwt(&jwt).unwrap();
        assert_eq!(from_token.id, user.id);
    }

    #[tokio::test]
    async fn registration_validation() {
        let (_dir, svc) = service();
        assert_eq!(
            svc.register("bad-email", "P@ssw0rd1", "Alice", None).await.unwrap_err().code(),
            "INVALID_EMAIL"
        );
        assert_eq!(
            svc.register("a@b.co", "weak", "Alice", None).await.unwrap_err().code(),
            "WEAK_PASSWORD"
        );
        assert_eq!(
            svc.register("a@b.co", "P@ssw0rd1", "A", None).await.unwrap_err().code(),
            "INVALID_NAME"
        );
    }

    #[tokio::test]
    async fn lockout_after_five_failures() {
        let (_dir, svc) = service();
        svc.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();

        for _ in 0..4 {
            assert_eq!(
                svc.login("alice@acme.com", "wrong-P4ss!").unwrap_err().code(),
                "INVALID_CREDENTIALS"
            );
        }
        // a success at four failures clears the counter
        svc.login("alice@acme.com", "P@ssw0rd1").unwrap();
        for _ in 0..5 {
            let _ = svc.login("alice@acme.com", "wrong-P4ss!");
        }
        assert_eq!(svc.login("alice@acme.com", "P@ssw0rd1").unwrap_err().code(), "ACCOUNT_LOCKED");
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let (_dir, svc) = service();
        svc.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
        svc.request_password_reset("alice@acme.com").await.unwrap();

        let token = svc
            .store
            .get_user_by_email("alice@acme.com")
            .unwrap()
            .unwrap()
            .reset_token
            .unwrap();
        svc.reset_password(&token, "N3w-P@ssw0rd").unwrap();
        assert_eq!(svc.reset_password(&token, "N3w-P@ssw0rd2").unwrap_err().code(), "INVALID_TOKEN");
        svc.login("alice@acme.com", "N3w-P@ssw0rd").unwrap();
    }

    #[tokio::test]
    async fn oauth_links_existing_account_by_email() {
        let (_dir, svc) = service();
        let registered = svc.register("alice@acme.com", "P@ssw0rd1", "Alice", None).await.unwrap();
        assert!(registered.password_hash.is_some());
        assert!(registered.oauth_id.is_none());

        let (linked, _) = svc.oauth_login("google", "goog-123", "alice@acme.com", "Alice").unwrap();
        assert_eq!(linked.id, registered.id);
        assert!(linked.email_verified);
        // the account is OAuth-type now: exactly one credential is set
        assert_eq!(linked.oauth_id.as_deref(), Some("goog-123"));
        assert!(linked.password_hash.is_none());

        // subsequent sign-ins resolve by oauth id
        let (again, _) = svc.oauth_login("google", "goog-123", "alice@acme.com", "Alice").unwrap();
        assert_eq!(again.id, registered.id);

        // the password credential is gone along with the hash
        assert_eq!(
            svc.login("alice@acme.com", "P@ssw0rd1").unwrap_err().code(),
            "INVALID_CREDENTIALS"
        );
    }

    #[tokio::test]
    async fn exactly_one_credential_on_every_path() {
        let (_dir, svc) = service();
        let password_user = svc.register("p@acme.com", "P@ssw0rd1", "Pat", None).await.unwrap();
        assert!(password_user.password_hash.is_some() && password_user.oauth_id.is_none());

        let (oauth_user, _) = svc.oauth_login("github", "gh-9", "o@acme.com", "Ola").unwrap();
        assert!(oauth_user.oauth_id.is_some() && oauth_user.password_hash.is_none());
    }

    #[test]
    fn complexity_rules() {
        assert!(check_password_complexity("P@ssw0rd1").is_ok());
        assert!(check_password_complexity("short1!A").is_ok());
        assert!(check_password_complexity("alllowercase1!").is_err());
        assert!(check_password_complexity("NOLOWER1!").is_err());
        assert!(check_password_complexity("NoDigits!!").is_err());
        assert!(check_password_complexity("NoSymbol11").is_err());
        assert!(check_password_complexity("Aa1!").is_err());
    }
}
