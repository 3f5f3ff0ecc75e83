//! Keeping per-patch derived data current: tag counts and diff hashes.

use crate::models::Project;
use crate::parser::{TagCounts, compile_tags, extract_tags, hash_diff};
use crate::store::{Datastore, StoreError};

/// Recount every tag over a patch's content and all of its comments, and
/// store the result. Tags that no longer occur lose their row.
pub async fn refresh_patch_tags<S: Datastore>(
    store: &S,
    project: &Project,
    patch_id: i64,
) -> Result<TagCounts, StoreError> {
    let tags = compile_tags(&store.project_tags(project).await?);
    let sources = store.patch_tag_sources(patch_id).await?;

    let mut counts = TagCounts::default();
    for text in &sources {
        counts.merge(&extract_tags(text, &tags));
    }

    store.replace_patch_tags(patch_id, &counts).await?;
    Ok(counts)
}

/// Recount tags for every patch of one project, or of all projects.
/// Returns the number of patches processed.
pub async fn retag<S: Datastore>(store: &S, project: Option<&Project>) -> Result<usize, StoreError> {
    let projects = match project {
        Some(project) => vec![project.clone()],
        None => store.projects().await?,
    };

    let mut processed = 0;
    for project in &projects {
        let patch_ids = store.patch_ids(Some(project.id)).await?;
        log::info!("retagging {} patches in {}", patch_ids.len(), project.linkname);

        for patch_id in patch_ids {
            refresh_patch_tags(store, project, patch_id).await?;
            processed += 1;
        }
    }

    Ok(processed)
}

/// Recompute the diff hash of every patch that carries a diff.
pub async fn rehash<S: Datastore>(store: &S) -> Result<usize, StoreError> {
    let patches = store.patches_for_rehash().await?;
    log::info!("rehashing {} patches", patches.len());

    for (patch_id, content) in &patches {
        store.set_patch_hash(*patch_id, &hash_diff(content)).await?;
    }

    Ok(patches.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewComment, NewPatch};
    use crate::store::MemoryStore;
    use chrono::Utc;

    async fn seed(store: &MemoryStore, project: &Project, content: Option<&str>) -> i64 {
        store
            .create_patch(NewPatch {
                project_id: project.id,
                msgid: format!("<{}@x>", store.patches().len()),
                name: "patch".to_string(),
                date: Utc::now(),
                submitter_id: 1,
                delegate_id: None,
                state_id: None,
                headers: String::new(),
                content: content.map(str::to_string),
                pull_url: None,
                hash: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn comment(store: &MemoryStore, patch_id: i64, msgid: &str, content: &str) {
        store
            .create_comment(NewComment {
                patch_id,
                msgid: msgid.to_string(),
                submitter_id: 1,
                date: Utc::now(),
                headers: String::new(),
                content: content.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_counts_accumulate_over_comments() {
        let store = MemoryStore::with_defaults();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        let acked = store.tag_by_name("Acked-by").unwrap();
        let reviewed = store.tag_by_name("Reviewed-by").unwrap();

        let patch_id = seed(&store, &project, Some("--- a/x\n+++ b/x\n")).await;
        comment(&store, patch_id, "<c1@x>", "Acked-by: A <a@x>").await;
        comment(&store, patch_id, "<c2@x>", "ACKED-BY: B <b@x>\nReviewed-by: C <c@x>").await;
        comment(&store, patch_id, "<c3@x>", "> Acked-by: A <a@x>\nthanks").await;

        let counts = refresh_patch_tags(&store, &project, patch_id).await.unwrap();
        assert_eq!(counts.get(acked.id), 2);
        assert_eq!(counts.get(reviewed.id), 1);
        assert_eq!(store.patch_tags(patch_id).len(), 2);
    }

    #[tokio::test]
    async fn test_zero_counts_remove_rows() {
        let store = MemoryStore::with_defaults();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        let patch_id = seed(&store, &project, Some("Tested-by: T <t@x>\n")).await;

        refresh_patch_tags(&store, &project, patch_id).await.unwrap();
        assert_eq!(store.patch_tags(patch_id).len(), 1);

        store.set_use_tags(project.id, false);
        let project = store.find_project_by_listid("test.example.com").await.unwrap().unwrap();
        refresh_patch_tags(&store, &project, patch_id).await.unwrap();
        assert!(store.patch_tags(patch_id).is_empty());
    }

    #[tokio::test]
    async fn test_retag_all_projects() {
        let store = MemoryStore::with_defaults();
        let one = store.add_project("one", "one.example.com", "one@example.com");
        let two = store.add_project("two", "two.example.com", "two@example.com");
        seed(&store, &one, Some("Acked-by: x\n")).await;
        seed(&store, &two, None).await;

        assert_eq!(retag(&store, None).await.unwrap(), 2);
        assert_eq!(retag(&store, Some(&one)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rehash_sets_hashes() {
        let store = MemoryStore::new();
        let project = store.add_project("test", "test.example.com", "test@example.com");
        seed(&store, &project, Some("--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n")).await;
        seed(&store, &project, None).await;

        assert_eq!(rehash(&store).await.unwrap(), 1);
        let patches = store.patches();
        assert!(patches[0].hash.is_some());
        assert!(patches[1].hash.is_none());
    }
}
