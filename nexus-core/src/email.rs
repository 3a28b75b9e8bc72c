use async_trait::async_trait;
use once_cell::sync::Lazy;

use nexus_common::{NexusError, Result};

/// Outbound mail collaborator. Real delivery lives outside the core; the
/// default implementation just logs.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str) -> Result<()>;
    async fn send_password_reset(&self, email: &str, token: &str) -> Result<()>;
    async fn send_project_invite(&self, email: &str, project_name: &str, invited_by: &str) -> Result<()>;
}

pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification(&self, email: &str, token: &str) -> Result<()> {
        tracing::info!(target: "email", %email, token, "verification mail");
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, token: &str) -> Result<()> {
        tracing::info!(target: "email", %email, token, "password reset mail");
        Ok(())
    }

    async fn send_project_invite(&self, email: &str, project_name: &str, invited_by: &str) -> Result<()> {
        tracing::info!(target: "email", %email, project_name, invited_by, "project invite mail");
        Ok(())
    }
}

/// Domains that never receive real mail. Deliverability checking proper is
/// an external collaborator; this list catches the obvious throwaways.
static DISPOSABLE_DOMAINS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "mailinator.com",
        "guerrillamail.com",
        "10minutemail.com",
        "tempmail.com",
        "temp-mail.org",
        "throwawaymail.com",
        "yopmail.com",
        "trashmail.com",
        "sharklasers.com",
        "getnada.com",
    ]
});

pub fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    let invalid = || {
        NexusError::validation_field("INVALID_EMAIL", format!("'{}' is not a valid email address", email), "email")
            .with_suggestions(&["check the address for typos"])
    };

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || email.contains(' ') || email.len() > 254 {
        return Err(invalid());
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    let domain_lower = domain.to_ascii_lowercase();
    if DISPOSABLE_DOMAINS.iter().any(|d| domain_lower == *d) {
        return Err(NexusError::validation_field(
            "DISPOSABLE_EMAIL",
            "disposable email addresses are not accepted",
            "email",
        )
        .with_suggestions(&["use a permanent work or personal address"]));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(validate_email("alice@acme.com").is_ok());
        assert!(validate_email("a.b+tag@sub.domain.io").is_ok());
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "no-at-sign", "@acme.com", "a@", "a b@acme.com", "a@nodot"] {
            let err = validate_email(bad).unwrap_err();
            assert_eq!(err.code(), "INVALID_EMAIL", "{}", bad);
        }
    }

    #[test]
    fn rejects_disposable_domains() {
        let err = validate_email("spam@mailinator.com").unwrap_err();
        assert_eq!(err.code(), "DISPOSABLE_EMAIL");
        // case-insensitive on the domain
        assert!(validate_email("spam@Mailinator.COM").is_err());
    }
}
