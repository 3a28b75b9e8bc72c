use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_LOGIN_ATTEMPTS: u32 = 5;
pub const LOCKOUT_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

/// A platform account. Exactly one of `password_hash` or `oauth_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub oauth_id: Option<String>,
    pub oauth_provider: Option<String>,
    pub name: String,
    pub company: Option<String>,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub verification_expires: Option<DateTime<Utc>>,
    pub reset_token: Option<String>,
    pub reset_expires: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Bump the failed-login counter; the fifth consecutive failure locks
    /// the account for two hours.
    pub fn record_failed_login(&mut self, now: DateTime<Utc>) {
        self.login_attempts += 1;
        if self.login_attempts >= MAX_LOGIN_ATTEMPTS {
            self.locked_until = Some(now + Duration::hours(LOCKOUT_HOURS));
        }
    }

    pub fn record_successful_login(&mut self, now: DateTime<Utc>) {
        self.login_attempts = 0;
        self.locked_until = None;
        self.last_login = Some(now);
    }
}
