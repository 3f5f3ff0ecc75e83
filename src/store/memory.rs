//! In-process [`Datastore`] backed by plain vectors.
//!
//! Mirrors the constraints of the Postgres schema (unique message-ids per
//! project and per patch, case-insensitive person/user email) closely enough
//! that the ingester behaves identically on either backend.

use parking_lot::Mutex;

use super::{Datastore, StoreError};
use crate::models::{
    Comment, DelegationRule, NewComment, NewPatch, NewPerson, Patch, PatchTag, Person, Project,
    State, Tag, User,
};
use crate::parser::TagCounts;

/// `(name, ordering, action_required)` for the states seeded by the schema.
pub const DEFAULT_STATES: [(&str, i32, bool); 10] = [
    ("New", 0, true),
    ("Under Review", 1, true),
    ("Accepted", 2, false),
    ("Rejected", 3, false),
    ("RFC", 4, false),
    ("Not Applicable", 5, false),
    ("Changes Requested", 6, false),
    ("Awaiting Upstream", 7, false),
    ("Superseded", 8, false),
    ("Deferred", 9, false),
];

/// `(name, pattern, abbrev)` for the tags seeded by the schema.
pub const DEFAULT_TAGS: [(&str, &str, &str); 3] = [
    ("Acked-by", "^Acked-by:", "A"),
    ("Reviewed-by", "^Reviewed-by:", "R"),
    ("Tested-by", "^Tested-by:", "T"),
];

#[derive(Default)]
struct Inner {
    next_id: i64,
    projects: Vec<Project>,
    users: Vec<User>,
    states: Vec<State>,
    tags: Vec<Tag>,
    rules: Vec<DelegationRule>,
    people: Vec<Person>,
    patches: Vec<Patch>,
    comments: Vec<Comment>,
    patch_tags: Vec<PatchTag>,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_patch(&mut self, patch: NewPatch) -> Result<Patch, StoreError> {
        if self
            .patches
            .iter()
            .any(|p| p.project_id == patch.project_id && p.msgid == patch.msgid)
        {
            return Err(StoreError::Duplicate { msgid: patch.msgid });
        }

        let saved = Patch {
            id: self.allocate_id(),
            project_id: patch.project_id,
            msgid: patch.msgid,
            name: patch.name,
            date: patch.date,
            submitter_id: patch.submitter_id,
            delegate_id: patch.delegate_id,
            state_id: patch.state_id,
            archived: false,
            headers: patch.headers,
            content: patch.content,
            pull_url: patch.pull_url,
            hash: patch.hash,
        };
        self.patches.push(saved.clone());
        Ok(saved)
    }

    fn insert_comment(&mut self, comment: NewComment) -> Result<Comment, StoreError> {
        if !self.patches.iter().any(|p| p.id == comment.patch_id) {
            return Err(StoreError::NotFound(format!("patch {}", comment.patch_id)));
        }
        if self
            .comments
            .iter()
            .any(|c| c.patch_id == comment.patch_id && c.msgid == comment.msgid)
        {
            return Err(StoreError::Duplicate {
                msgid: comment.msgid,
            });
        }

        let saved = Comment {
            id: self.allocate_id(),
            patch_id: comment.patch_id,
            msgid: comment.msgid,
            submitter_id: comment.submitter_id,
            date: comment.date,
            headers: comment.headers,
            content: comment.content,
        };
        self.comments.push(saved.clone());
        Ok(saved)
    }
}

/// Email comparison matching Postgres `lower(a) = lower(b)`.
fn same_address(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the default states and tags, as a fresh database
    /// would after migrations.
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for (name, ordering, action_required) in DEFAULT_STATES {
            store.add_state(name, ordering, action_required);
        }
        for (name, pattern, abbrev) in DEFAULT_TAGS {
            store.add_tag(name, pattern, abbrev);
        }
        store
    }

    pub fn add_project(&self, linkname: &str, listid: &str, listemail: &str) -> Project {
        let mut inner = self.inner.lock();
        let project = Project {
            id: inner.allocate_id(),
            linkname: linkname.to_string(),
            name: linkname.to_string(),
            listid: listid.to_string(),
            listemail: listemail.to_string(),
            use_tags: true,
        };
        inner.projects.push(project.clone());
        project
    }

    pub fn set_use_tags(&self, project_id: i64, use_tags: bool) {
        let mut inner = self.inner.lock();
        if let Some(project) = inner.projects.iter_mut().find(|p| p.id == project_id) {
            project.use_tags = use_tags;
        }
    }

    pub fn add_user(&self, username: &str, email: &str) -> User {
        let mut inner = self.inner.lock();
        let user = User {
            id: inner.allocate_id(),
            username: username.to_string(),
            email: email.to_string(),
        };
        inner.users.push(user.clone());
        user
    }

    pub fn add_state(&self, name: &str, ordering: i32, action_required: bool) -> State {
        let mut inner = self.inner.lock();
        let state = State {
            id: inner.allocate_id(),
            name: name.to_string(),
            ordering,
            action_required,
        };
        inner.states.push(state.clone());
        state
    }

    pub fn add_tag(&self, name: &str, pattern: &str, abbrev: &str) -> Tag {
        let mut inner = self.inner.lock();
        let tag = Tag {
            id: inner.allocate_id(),
            name: name.to_string(),
            pattern: pattern.to_string(),
            abbrev: abbrev.to_string(),
        };
        inner.tags.push(tag.clone());
        tag
    }

    pub fn add_delegation_rule(
        &self,
        project_id: i64,
        user_id: i64,
        path: &str,
        priority: i32,
    ) -> DelegationRule {
        let mut inner = self.inner.lock();
        let rule = DelegationRule {
            id: inner.allocate_id(),
            project_id,
            user_id,
            path: path.to_string(),
            priority,
        };
        inner.rules.push(rule.clone());
        rule
    }

    pub fn tag_by_name(&self, name: &str) -> Option<Tag> {
        self.inner.lock().tags.iter().find(|t| t.name == name).cloned()
    }

    pub fn patches(&self) -> Vec<Patch> {
        self.inner.lock().patches.clone()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.inner.lock().comments.clone()
    }

    pub fn people(&self) -> Vec<Person> {
        self.inner.lock().people.clone()
    }

    pub fn patch_tags(&self, patch_id: i64) -> Vec<PatchTag> {
        self.inner
            .lock()
            .patch_tags
            .iter()
            .filter(|pt| pt.patch_id == patch_id)
            .cloned()
            .collect()
    }
}

impl Datastore for MemoryStore {
    async fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut projects = self.inner.lock().projects.clone();
        projects.sort_by(|a, b| a.linkname.cmp(&b.linkname));
        Ok(projects)
    }

    async fn find_project_by_listid(&self, listid: &str) -> Result<Option<Project>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.projects.iter().find(|p| p.listid == listid).cloned())
    }

    async fn find_project_by_linkname(
        &self,
        linkname: &str,
    ) -> Result<Option<Project>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.projects.iter().find(|p| p.linkname == linkname).cloned())
    }

    async fn find_person_by_email(&self, email: &str) -> Result<Option<Person>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .people
            .iter()
            .find(|p| same_address(&p.email, email))
            .cloned())
    }

    async fn save_person(&self, person: NewPerson) -> Result<Person, StoreError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner
            .people
            .iter_mut()
            .find(|p| same_address(&p.email, &person.email))
        {
            if person.name.is_some() {
                existing.name = person.name;
            }
            return Ok(existing.clone());
        }

        let user_id = inner
            .users
            .iter()
            .find(|u| same_address(&u.email, &person.email))
            .map(|u| u.id);
        let saved = Person {
            id: inner.allocate_id(),
            email: person.email,
            name: person.name,
            user_id,
        };
        inner.people.push(saved.clone());
        Ok(saved)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .iter()
            .find(|u| same_address(&u.email, email))
            .cloned())
    }

    async fn find_state_by_name(&self, name: &str) -> Result<Option<State>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .states
            .iter()
            .filter(|s| s.name.to_lowercase() == name.to_lowercase())
            .min_by_key(|s| s.ordering)
            .cloned())
    }

    async fn default_state(&self) -> Result<Option<State>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.states.iter().min_by_key(|s| s.ordering).cloned())
    }

    async fn project_tags(&self, project: &Project) -> Result<Vec<Tag>, StoreError> {
        if !project.use_tags {
            return Ok(Vec::new());
        }
        let mut tags = self.inner.lock().tags.clone();
        tags.sort_by(|a, b| a.abbrev.cmp(&b.abbrev));
        Ok(tags)
    }

    async fn delegation_rules(&self, project_id: i64) -> Result<Vec<DelegationRule>, StoreError> {
        let inner = self.inner.lock();
        let mut rules: Vec<DelegationRule> = inner
            .rules
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn find_patch_by_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .patches
            .iter()
            .find(|p| p.project_id == project_id && p.msgid == msgid)
            .cloned())
    }

    async fn find_patch_for_comment_msgid(
        &self,
        project_id: i64,
        msgid: &str,
    ) -> Result<Option<Patch>, StoreError> {
        let inner = self.inner.lock();
        let found = inner
            .comments
            .iter()
            .rev()
            .filter(|c| c.msgid == msgid)
            .find_map(|c| {
                inner
                    .patches
                    .iter()
                    .find(|p| p.id == c.patch_id && p.project_id == project_id)
            });
        Ok(found.cloned())
    }

    async fn comment_exists(&self, patch_id: i64, msgid: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .comments
            .iter()
            .any(|c| c.patch_id == patch_id && c.msgid == msgid))
    }

    async fn create_patch(&self, patch: NewPatch) -> Result<Patch, StoreError> {
        self.inner.lock().insert_patch(patch)
    }

    async fn create_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        self.inner.lock().insert_comment(comment)
    }

    async fn create_patch_with_comment(
        &self,
        patch: NewPatch,
        comment: Option<NewComment>,
    ) -> Result<(Patch, Option<Comment>), StoreError> {
        let mut inner = self.inner.lock();
        let saved = inner.insert_patch(patch)?;

        let Some(comment) = comment else {
            return Ok((saved, None));
        };
        match inner.insert_comment(NewComment {
            patch_id: saved.id,
            ..comment
        }) {
            Ok(created) => Ok((saved, Some(created))),
            Err(err) => {
                inner.patches.retain(|p| p.id != saved.id);
                Err(err)
            }
        }
    }

    async fn patch_tag_sources(&self, patch_id: i64) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let patch = inner
            .patches
            .iter()
            .find(|p| p.id == patch_id)
            .ok_or_else(|| StoreError::NotFound(format!("patch {patch_id}")))?;

        let mut comments: Vec<&Comment> = inner
            .comments
            .iter()
            .filter(|c| c.patch_id == patch_id)
            .collect();
        comments.sort_by_key(|c| (c.date, c.id));

        Ok(patch
            .content
            .iter()
            .cloned()
            .chain(comments.into_iter().map(|c| c.content.clone()))
            .collect())
    }

    async fn replace_patch_tags(
        &self,
        patch_id: i64,
        counts: &TagCounts,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.patch_tags.retain(|pt| pt.patch_id != patch_id);
        inner
            .patch_tags
            .extend(counts.iter().map(|(tag_id, count)| PatchTag {
                patch_id,
                tag_id,
                count,
            }));
        Ok(())
    }

    async fn patch_ids(&self, project_id: Option<i64>) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .patches
            .iter()
            .filter(|p| project_id.is_none_or(|id| p.project_id == id))
            .map(|p| p.id)
            .collect())
    }

    async fn patches_for_rehash(&self) -> Result<Vec<(i64, String)>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .patches
            .iter()
            .filter_map(|p| p.content.clone().map(|content| (p.id, content)))
            .collect())
    }

    async fn set_patch_hash(&self, patch_id: i64, hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let patch = inner
            .patches
            .iter_mut()
            .find(|p| p.id == patch_id)
            .ok_or_else(|| StoreError::NotFound(format!("patch {patch_id}")))?;
        patch.hash = Some(hash.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_patch(project_id: i64, msgid: &str, submitter_id: i64) -> NewPatch {
        NewPatch {
            project_id,
            msgid: msgid.to_string(),
            name: "test".to_string(),
            date: Utc::now(),
            submitter_id,
            delegate_id: None,
            state_id: None,
            headers: String::new(),
            content: Some("Acked-by: x\n".to_string()),
            pull_url: None,
            hash: None,
        }
    }

    #[tokio::test]
    async fn test_save_person_is_case_insensitive_upsert() {
        let store = MemoryStore::new();
        let first = store
            .save_person(NewPerson {
                email: "User@Example.com".to_string(),
                name: None,
            })
            .await
            .unwrap();
        let second = store
            .save_person(NewPerson {
                email: "user@example.com".to_string(),
                name: Some("User".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("User"));
        assert_eq!(store.people().len(), 1);
    }

    #[tokio::test]
    async fn test_save_person_links_user() {
        let store = MemoryStore::new();
        let user = store.add_user("maint", "maint@example.com");
        let person = store
            .save_person(NewPerson {
                email: "MAINT@example.com".to_string(),
                name: None,
            })
            .await
            .unwrap();
        assert_eq!(person.user_id, Some(user.id));
    }

    #[tokio::test]
    async fn test_duplicate_patch_is_reported() {
        let store = MemoryStore::new();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        store.create_patch(new_patch(project.id, "<a@x>", 1)).await.unwrap();
        let err = store
            .create_patch(new_patch(project.id, "<a@x>", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { msgid } if msgid == "<a@x>"));
    }

    #[tokio::test]
    async fn test_save_person_folds_non_ascii_case() {
        let store = MemoryStore::new();
        let user = store.add_user("emile", "\u{c9}mile@example.com");
        let first = store
            .save_person(NewPerson {
                email: "\u{e9}mile@example.com".to_string(),
                name: None,
            })
            .await
            .unwrap();
        assert_eq!(first.user_id, Some(user.id));

        let found = store
            .find_person_by_email("\u{c9}MILE@EXAMPLE.COM")
            .await
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(first.id));
    }

    fn new_comment(msgid: &str) -> NewComment {
        NewComment {
            patch_id: 0,
            msgid: msgid.to_string(),
            submitter_id: 1,
            date: Utc::now(),
            headers: String::new(),
            content: "Tested-by: t\n".to_string(),
        }
    }

    #[tokio::test]
    async fn test_patch_with_comment_is_stored_together() {
        let store = MemoryStore::new();
        let project = store.add_project("test", "test.example.com", "test@example.com");

        let (patch, comment) = store
            .create_patch_with_comment(
                new_patch(project.id, "<a@x>", 1),
                Some(new_comment("<a@x>")),
            )
            .await
            .unwrap();
        assert_eq!(comment.unwrap().patch_id, patch.id);

        let err = store
            .create_patch_with_comment(
                new_patch(project.id, "<a@x>", 1),
                Some(new_comment("<a@x>")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.patches().len(), 1);
        assert_eq!(store.comments().len(), 1);
    }

    #[tokio::test]
    async fn test_same_msgid_in_two_projects() {
        let store = MemoryStore::new();
        let one = store.add_project("one", "one.example.com", "one@example.com");
        let two = store.add_project("two", "two.example.com", "two@example.com");
        store.create_patch(new_patch(one.id, "<a@x>", 1)).await.unwrap();
        store.create_patch(new_patch(two.id, "<a@x>", 1)).await.unwrap();
        assert_eq!(store.patches().len(), 2);
    }

    #[tokio::test]
    async fn test_default_state_and_lookup() {
        let store = MemoryStore::with_defaults();
        assert_eq!(store.default_state().await.unwrap().unwrap().name, "New");
        let state = store.find_state_by_name("under review").await.unwrap();
        assert_eq!(state.unwrap().name, "Under Review");
        assert!(store.find_state_by_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_project_tags_respect_use_tags() {
        let store = MemoryStore::with_defaults();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        assert_eq!(store.project_tags(&project).await.unwrap().len(), 3);
        store.set_use_tags(project.id, false);
        let project = store.find_project_by_listid("test.example.com").await.unwrap().unwrap();
        assert!(store.project_tags(&project).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_patch_tags() {
        let store = MemoryStore::with_defaults();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        let patch = store.create_patch(new_patch(project.id, "<a@x>", 1)).await.unwrap();

        let mut counts = TagCounts::default();
        counts.add(1, 2);
        counts.add(2, 1);
        store.replace_patch_tags(patch.id, &counts).await.unwrap();
        assert_eq!(store.patch_tags(patch.id).len(), 2);

        let mut counts = TagCounts::default();
        counts.add(1, 3);
        store.replace_patch_tags(patch.id, &counts).await.unwrap();
        assert_eq!(
            store.patch_tags(patch.id),
            vec![PatchTag {
                patch_id: patch.id,
                tag_id: 1,
                count: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_delegation_rules_by_priority() {
        let store = MemoryStore::new();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        store.add_delegation_rule(project.id, 1, "*", 0);
        store.add_delegation_rule(project.id, 2, "drivers/*", 10);
        let rules = store.delegation_rules(project.id).await.unwrap();
        assert_eq!(rules[0].path, "drivers/*");
        assert_eq!(rules[1].path, "*");
    }
}
