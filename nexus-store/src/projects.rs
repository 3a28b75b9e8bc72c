use redb::ReadableTable;

use nexus_common::model::{Project, ProjectMember};
use nexus_common::{NexusError, Result};

use crate::tables::{MEMBERS, MEMBERS_BY_USER, PROJECTS, PROJECTS_BY_OWNER, PROJECTS_BY_SLUG};
use crate::{db_err, decode, encode, Store};

fn member_key(project_id: &str, user_id: &str) -> String {
    format!("{}|{}", project_id, user_id)
}

impl Store {
    pub fn insert_project(&self, project: &Project) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut slugs = txn.open_table(PROJECTS_BY_SLUG).map_err(db_err)?;
            if slugs.get(project.slug.as_str()).map_err(db_err)?.is_some() {
                return Err(NexusError::conflict(
                    "SLUG_TAKEN",
                    format!("slug '{}' is already in use", project.slug),
                ));
            }
            slugs.insert(project.slug.as_str(), project.id.as_str()).map_err(db_err)?;

            let mut owners = txn.open_table(PROJECTS_BY_OWNER).map_err(db_err)?;
            owners
                .insert(
                    format!("{}|{}", project.owner_id, project.id).as_str(),
                    project.id.as_str(),
                )
                .map_err(db_err)?;

            let mut projects = txn.open_table(PROJECTS).map_err(db_err)?;
            projects.insert(project.id.as_str(), encode(project)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    /// Removes the project and its indexes. Only used to roll back a
    /// creation whose paymaster provisioning failed; lifecycle deletion is
    /// the soft kind.
    pub fn delete_project_hard(&self, project: &Project) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut slugs = txn.open_table(PROJECTS_BY_SLUG).map_err(db_err)?;
            slugs.remove(project.slug.as_str()).map_err(db_err)?;
            let mut owners = txn.open_table(PROJECTS_BY_OWNER).map_err(db_err)?;
            owners
                .remove(format!("{}|{}", project.owner_id, project.id).as_str())
                .map_err(db_err)?;
            let mut projects = txn.open_table(PROJECTS).map_err(db_err)?;
            projects.remove(project.id.as_str()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.get_record(PROJECTS, id)
    }

    pub fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        match self.get_index(PROJECTS_BY_SLUG, slug)? {
            Some(id) => self.get_project(&id),
            None => Ok(None),
        }
    }

    pub fn slug_exists(&self, slug: &str) -> Result<bool> {
        Ok(self.get_index(PROJECTS_BY_SLUG, slug)?.is_some())
    }

    pub fn update_project(&self, project: &Project) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(db_err)?;
            let previous: Project = match projects.get(project.id.as_str()).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(NexusError::not_found(format!("project {}", project.id))),
            };
            // Ownership transfer re-homes the owner index entry.
            if previous.owner_id != project.owner_id {
                let mut owners = txn.open_table(PROJECTS_BY_OWNER).map_err(db_err)?;
                owners
                    .remove(format!("{}|{}", previous.owner_id, project.id).as_str())
                    .map_err(db_err)?;
                owners
                    .insert(
                        format!("{}|{}", project.owner_id, project.id).as_str(),
                        project.id.as_str(),
                    )
                    .map_err(db_err)?;
            }
            projects.insert(project.id.as_str(), encode(project)?.as_slice()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn list_projects_by_owner(&self, owner_id: &str) -> Result<Vec<Project>> {
        let ids = self.scan_index(PROJECTS_BY_OWNER, owner_id, None, None)?;
        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.get_project(&id)? {
                projects.push(p);
            }
        }
        Ok(projects)
    }

    /// Every project in the store, for background sweeps.
    pub fn list_all_projects(&self) -> Result<Vec<Project>> {
        let txn = self.db().begin_read().map_err(db_err)?;
        let t = txn.open_table(PROJECTS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    pub fn upsert_member(&self, member: &ProjectMember) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut members = txn.open_table(MEMBERS).map_err(db_err)?;
            members
                .insert(
                    member_key(&member.project_id, &member.user_id).as_str(),
                    encode(member)?.as_slice(),
                )
                .map_err(db_err)?;
            let mut by_user = txn.open_table(MEMBERS_BY_USER).map_err(db_err)?;
            by_user
                .insert(
                    member_key(&member.user_id, &member.project_id).as_str(),
                    member.project_id.as_str(),
                )
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn get_member(&self, project_id: &str, user_id: &str) -> Result<Option<ProjectMember>> {
        self.get_record(MEMBERS, &member_key(project_id, user_id))
    }

    pub fn remove_member(&self, project_id: &str, user_id: &str) -> Result<()> {
        let txn = self.db().begin_write().map_err(db_err)?;
        {
            let mut members = txn.open_table(MEMBERS).map_err(db_err)?;
            members.remove(member_key(project_id, user_id).as_str()).map_err(db_err)?;
            let mut by_user = txn.open_table(MEMBERS_BY_USER).map_err(db_err)?;
            by_user.remove(member_key(user_id, project_id).as_str()).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    pub fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        let txn = self.db().begin_read().map_err(db_err)?;
        let t = txn.open_table(MEMBERS).map_err(db_err)?;
        let start = format!("{}|", project_id);
        let end = format!("{}|~", project_id);
        let mut out = Vec::new();
        for entry in t.range(start.as_str()..=end.as_str()).map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    /// Projects a user can reach through membership (including ownership,
    /// which always has a member row).
    pub fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let ids = self.scan_index(MEMBERS_BY_USER, user_id, None, None)?;
        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(p) = self.get_project(&id)? {
                projects.push(p);
            }
        }
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nexus_common::model::{ProjectRole, ProjectSettings, ProjectStatus};
    use nexus_common::Chain;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nexus.redb")).unwrap();
        (dir, store)
    }

    fn project(id: &str, slug: &str, owner: &str) -> Project {
        Project {
            id: id.into(),
            name: "DeFi App".into(),
            slug: slug.into(),
            description: None,
            website: None,
            owner_id: owner.into(),
            chains: vec![Chain::Ethereum, Chain::Solana],
            settings: ProjectSettings::default(),
            status: ProjectStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn slug_uniqueness_is_enforced() {
        let (_dir, store) = store();
        store.insert_project(&project("proj_1", "defi-app", "user_1")).unwrap();
        let err = store.insert_project(&project("proj_2", "defi-app", "user_2")).unwrap_err();
        assert_eq!(err.code(), "SLUG_TAKEN");
        assert!(store.slug_exists("defi-app").unwrap());
        assert!(!store.slug_exists("defi-app-2").unwrap());
    }

    #[test]
    fn membership_round_trip() {
        let (_dir, store) = store();
        store.insert_project(&project("proj_1", "defi-app", "user_1")).unwrap();
        let member = ProjectMember {
            project_id: "proj_1".into(),
            user_id: "user_2".into(),
            role: ProjectRole::Developer,
            invited_by: "user_1".into(),
            invited_at: Utc::now(),
            accepted_at: Some(Utc::now()),
        };
        store.upsert_member(&member).unwrap();

        assert_eq!(
            store.get_member("proj_1", "user_2").unwrap().unwrap().role,
            ProjectRole::Developer
        );
        assert_eq!(store.list_members("proj_1").unwrap().len(), 1);
        assert_eq!(store.list_projects_for_user("user_2").unwrap()[0].id, "proj_1");

        store.remove_member("proj_1", "user_2").unwrap();
        assert!(store.get_member("proj_1", "user_2").unwrap().is_none());
    }

    #[test]
    fn ownership_transfer_moves_index() {
        let (_dir, store) = store();
        let mut p = project("proj_1", "defi-app", "user_1");
        store.insert_project(&p).unwrap();

        p.owner_id = "user_9".into();
        store.update_project(&p).unwrap();

        assert!(store.list_projects_by_owner("user_1").unwrap().is_empty());
        assert_eq!(store.list_projects_by_owner("user_9").unwrap()[0].id, "proj_1");
    }
}
