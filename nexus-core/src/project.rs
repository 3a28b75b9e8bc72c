use std::sync::Arc;

use chrono::Utc;

use nexus_common::model::{
    Project, ProjectMember, ProjectRole, ProjectSettings, ProjectStatus, User,
    MAX_RATE_LIMIT_PER_MINUTE, MIN_RATE_LIMIT_PER_MINUTE,
};
use nexus_common::{id, Chain, NexusError, Result};
use nexus_store::Store;

use crate::email::EmailSender;
use crate::paymaster::PaymasterService;

/// Lowercase, non-alphanumerics collapsed to single dashes, trimmed.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.to_ascii_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("project");
    }
    slug
}

pub struct ProjectService {
    store: Arc<Store>,
    paymasters: Arc<PaymasterService>,
    email: Arc<dyn EmailSender>,
}

impl ProjectService {
    pub fn new(store: Arc<Store>, paymasters: Arc<PaymasterService>, email: Arc<dyn EmailSender>) -> Self {
        Self { store, paymasters, email }
    }

    /// Creates the project, its owner membership, and one paymaster per
    /// requested chain. Paymaster provisioning is part of the creation: if
    /// any chain fails, everything rolls back and the error surfaces.
    pub fn create_project(
        &self,
        owner: &User,
        name: &str,
        description: Option<String>,
        website: Option<String>,
        chains: Vec<Chain>,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(NexusError::validation_field("INVALID_NAME", "project name is required", "name"));
        }
        if chains.is_empty() {
            return Err(NexusError::validation_field(
                "INVALID_CHAINS",
                "at least one chain is required",
                "chains",
            )
            .with_suggestions(&["supported chains: ethereum, arbitrum, solana"]));
        }
        let mut chains = chains;
        chains.sort();
        chains.dedup();

        let slug = self.unique_slug(name)?;
        let now = Utc::now();
        let project = Project {
            id: id::project_id(),
            name: name.trim().to_string(),
            slug,
            description,
            website,
            owner_id: owner.id.clone(),
            chains: chains.clone(),
            settings: ProjectSettings::default(),
            status: ProjectStatus::Active,
            created_at: now,
        };
        self.store.insert_project(&project)?;

        // provision paymasters synchronously; unwind on the first failure
        let mut provisioned = Vec::new();
        for chain in &chains {
            match self.paymasters.provision(&project.id, *chain) {
                Ok(_) => provisioned.push(*chain),
                Err(e) => {
                    tracing::error!(target: "project", project_id = %project.id, %chain, "paymaster provisioning failed: {}", e);
                    for done in provisioned {
                        let _ = self.paymasters.deprovision(&project.id, done);
                    }
                    self.store.delete_project_hard(&project)?;
                    return Err(e);
                }
            }
        }

        self.store.upsert_member(&ProjectMember {
            project_id: project.id.clone(),
            user_id: owner.id.clone(),
            role: ProjectRole::Owner,
            invited_by: owner.id.clone(),
            invited_at: now,
            accepted_at: Some(now),
        })?;

        Ok(project)
    }

    fn unique_slug(&self, name: &str) -> Result<String> {
        let base = slugify(name);
        if !self.store.slug_exists(&base)? {
            return Ok(base);
        }
        for n in 2..1000 {
            let candidate = format!("{}-{}", base, n);
            if !self.store.slug_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(NexusError::conflict("SLUG_TAKEN", format!("could not find a free slug for '{}'", base)))
    }

    /// Project fetch scoped to deleted-ness: soft-deleted projects are
    /// unreachable through the API.
    pub fn get_project(&self, project_id: &str) -> Result<Project> {
        let project = self
            .store
            .get_project(project_id)?
            .ok_or_else(|| NexusError::not_found(format!("project {}", project_id)))?;
        if project.status == ProjectStatus::Deleted {
            return Err(NexusError::not_found(format!("project {}", project_id)));
        }
        Ok(project)
    }

    pub fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        let mut projects = self.store.list_projects_for_user(user_id)?;
        projects.retain(|p| p.status != ProjectStatus::Deleted);
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    /// Role of `user_id` in the project; the owner holds `owner` implicitly.
    pub fn role_of(&self, project: &Project, user_id: &str) -> Result<ProjectRole> {
        if project.owner_id == user_id {
            return Ok(ProjectRole::Owner);
        }
        let member = self
            .store
            .get_member(&project.id, user_id)?
            .ok_or_else(|| NexusError::forbidden("NOT_A_MEMBER", "you are not a member of this project"))?;
        if member.accepted_at.is_none() {
            return Err(NexusError::forbidden("INVITE_PENDING", "your invite has not been accepted yet"));
        }
        Ok(member.role)
    }

    pub fn require_role(
        &self,
        project: &Project,
        user_id: &str,
        check: impl Fn(ProjectRole) -> bool,
    ) -> Result<ProjectRole> {
        let role = self.role_of(project, user_id)?;
        if check(role) {
            Ok(role)
        } else {
            Err(NexusError::forbidden(
                "INSUFFICIENT_PERMISSIONS",
                "your project role does not allow this operation",
            ))
        }
    }

    pub fn update_project(
        &self,
        project_id: &str,
        user_id: &str,
        name: Option<String>,
        description: Option<String>,
        website: Option<String>,
        webhook_url: Option<String>,
        paymaster_enabled: Option<bool>,
        rate_limit_per_minute: Option<u32>,
    ) -> Result<Project> {
        let mut project = self.get_project(project_id)?;
        self.require_role(&project, user_id, |r| r.can_manage())?;

        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(NexusError::validation_field("INVALID_NAME", "project name is required", "name"));
            }
            // renames keep the slug; it is part of issued key plaintexts' world
            project.name = name.trim().to_string();
        }
        if description.is_some() {
            project.description = description;
        }
        if website.is_some() {
            project.website = website;
        }
        if webhook_url.is_some() {
            project.settings.webhook_url = webhook_url.filter(|u| !u.is_empty());
        }
        if let Some(enabled) = paymaster_enabled {
            project.settings.paymaster_enabled = enabled;
        }
        if let Some(limit) = rate_limit_per_minute {
            if !(MIN_RATE_LIMIT_PER_MINUTE..=MAX_RATE_LIMIT_PER_MINUTE).contains(&limit) {
                return Err(NexusError::validation_field(
                    "INVALID_RATE_LIMIT",
                    format!(
                        "rateLimitPerMinute must be between {} and {}",
                        MIN_RATE_LIMIT_PER_MINUTE, MAX_RATE_LIMIT_PER_MINUTE
                    ),
                    "rateLimitPerMinute",
                ));
            }
            project.settings.rate_limit_per_minute = limit;
        }

        self.store.update_project(&project)?;
        Ok(project)
    }

    /// Soft delete: unreachable through the API, active keys revoked,
    /// paymasters frozen (sponsorship checks see the status), history kept.
    pub fn delete_project(&self, project_id: &str, user_id: &str) -> Result<()> {
        let mut project = self.get_project(project_id)?;
        self.require_role(&project, user_id, |r| r.can_delete_project())?;

        project.status = ProjectStatus::Deleted;
        self.store.update_project(&project)?;
        let revoked = self.store.revoke_project_keys(project_id)?;
        tracing::info!(target: "project", project_id, revoked, "project soft-deleted");
        Ok(())
    }

    pub fn transfer_ownership(&self, project_id: &str, user_id: &str, new_owner_id: &str) -> Result<Project> {
        let mut project = self.get_project(project_id)?;
        self.require_role(&project, user_id, |r| r.can_delete_project())?;

        let new_owner = self
            .store
            .get_user(new_owner_id)?
            .ok_or_else(|| NexusError::not_found(format!("user {}", new_owner_id)))?;

        let now = Utc::now();
        // previous owner stays on as admin
        self.store.upsert_member(&ProjectMember {
            project_id: project.id.clone(),
            user_id: project.owner_id.clone(),
            role: ProjectRole::Admin,
            invited_by: project.owner_id.clone(),
            invited_at: now,
            accepted_at: Some(now),
        })?;
        self.store.upsert_member(&ProjectMember {
            project_id: project.id.clone(),
            user_id: new_owner.id.clone(),
            role: ProjectRole::Owner,
            invited_by: user_id.to_string(),
            invited_at: now,
            accepted_at: Some(now),
        })?;
        project.owner_id = new_owner.id;
        self.store.update_project(&project)?;
        Ok(project)
    }

    /// Invite by email: existing accounts join immediately, unknown
    /// addresses get a pending membership and an invite mail.
    pub async fn invite_member(
        &self,
        project_id: &str,
        inviter_id: &str,
        email: &str,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        let project = self.get_project(project_id)?;
        self.require_role(&project, inviter_id, |r| r.can_manage())?;
        if role == ProjectRole::Owner {
            return Err(NexusError::validation_field(
                "INVALID_ROLE",
                "ownership is granted through transfer, not invites",
                "role",
            ));
        }

        let email = email.trim().to_ascii_lowercase();
        let now = Utc::now();
        let (user_id, accepted_at) = match self.store.get_user_by_email(&email)? {
            Some(user) => (user.id, Some(now)),
            None => (format!("invite:{}", email), None),
        };

        let member = ProjectMember {
            project_id: project.id.clone(),
            user_id,
            role,
            invited_by: inviter_id.to_string(),
            invited_at: now,
            accepted_at,
        };
        self.store.upsert_member(&member)?;

        if member.accepted_at.is_none() {
            if let Err(e) = self.email.send_project_invite(&email, &project.name, inviter_id).await {
                tracing::warn!(target: "project", "invite mail failed for {}: {}", email, e);
            }
        }
        Ok(member)
    }

    pub fn update_member_role(
        &self,
        project_id: &str,
        actor_id: &str,
        member_user_id: &str,
        role: ProjectRole,
    ) -> Result<ProjectMember> {
        let project = self.get_project(project_id)?;
        self.require_role(&project, actor_id, |r| r.can_manage())?;
        if role == ProjectRole::Owner || project.owner_id == member_user_id {
            return Err(NexusError::validation_field(
                "INVALID_ROLE",
                "ownership is granted through transfer, not role updates",
                "role",
            ));
        }
        let mut member = self
            .store
            .get_member(project_id, member_user_id)?
            .ok_or_else(|| NexusError::not_found(format!("member {}", member_user_id)))?;
        member.role = role;
        self.store.upsert_member(&member)?;
        Ok(member)
    }

    pub fn remove_member(&self, project_id: &str, actor_id: &str, member_user_id: &str) -> Result<()> {
        let project = self.get_project(project_id)?;
        self.require_role(&project, actor_id, |r| r.can_manage())?;
        if project.owner_id == member_user_id {
            return Err(NexusError::validation(
                "CANNOT_REMOVE_OWNER",
                "transfer ownership before removing the owner",
            ));
        }
        self.store.remove_member(project_id, member_user_id)
    }

    pub fn list_members(&self, project_id: &str, user_id: &str) -> Result<Vec<ProjectMember>> {
        let project = self.get_project(project_id)?;
        self.require_role(&project, user_id, |r| r.can_read())?;
        self.store.list_members(project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_rules() {
        assert_eq!(slugify("DeFi App"), "defi-app");
        assert_eq!(slugify("My App"), "my-app");
        assert_eq!(slugify("  --Weird__ Name!!  "), "weird-name");
        assert_eq!(slugify("ALLCAPS123"), "allcaps123");
        assert_eq!(slugify("!!!"), "project");
    }

    #[test]
    fn slug_shape_is_url_safe() {
        for name in ["DeFi App", "a   b", "x__y--z", "Ü ber"] {
            let slug = slugify(name);
            assert!(
                slug.split('-').all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())),
                "bad slug {:?} for {:?}",
                slug,
                name
            );
        }
    }
}
