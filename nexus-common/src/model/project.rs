use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;

pub const MIN_RATE_LIMIT_PER_MINUTE: u32 = 100;
pub const MAX_RATE_LIMIT_PER_MINUTE: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub paymaster_enabled: bool,
    pub webhook_url: Option<String>,
    pub rate_limit_per_minute: u32,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self { paymaster_enabled: true, webhook_url: None, rate_limit_per_minute: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Globally unique, URL-safe (`^[a-z0-9]+(-[a-z0-9]+)*$`).
    pub slug: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub owner_id: String,
    pub chains: Vec<Chain>,
    pub settings: ProjectSettings,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Owner,
    Admin,
    Developer,
    Viewer,
}

impl ProjectRole {
    /// Role matrix: owner = all; admin = all except delete and ownership
    /// transfer; developer = read + create keys + create/deploy wallets;
    /// viewer = read-only.
    pub fn can_read(&self) -> bool {
        true
    }

    pub fn can_write(&self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Admin | ProjectRole::Developer)
    }

    pub fn can_manage(&self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Admin)
    }

    pub fn can_delete_project(&self) -> bool {
        matches!(self, ProjectRole::Owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub project_id: String,
    pub user_id: String,
    pub role: ProjectRole,
    pub invited_by: String,
    pub invited_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}
