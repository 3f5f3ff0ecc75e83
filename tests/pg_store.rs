use chrono::Utc;
use patchwork_ingest::ingest::tags;
use patchwork_ingest::models::{NewComment, NewPatch, NewPerson};
use patchwork_ingest::test_support::{TestDatabase, TestDatabaseError, TestFixtures};
use patchwork_ingest::{Datastore, MailIngester, Outcome, PgStore, StoreError};

const DIFF: &str = "--- a/lib/list.c\n\
                    +++ b/lib/list.c\n\
                    @@ -4,2 +4,2 @@\n\
                    -\tlist->next = NULL;\n\
                    +\tlist->next = list;\n";

macro_rules! test_database {
    ($name:literal) => {
        match TestDatabase::new_from_env().await {
            Ok(db) => db,
            Err(TestDatabaseError::MissingUrl) => {
                eprintln!("skipping {}: TEST_DATABASE_URL not set", $name);
                return;
            }
            Err(err) => panic!("failed to provision test database: {err:?}"),
        }
    };
}

fn new_patch(project_id: i64, submitter_id: i64, msgid: &str) -> NewPatch {
    NewPatch {
        project_id,
        msgid: msgid.to_string(),
        name: "list: fix self reference".to_string(),
        date: Utc::now(),
        submitter_id,
        delegate_id: None,
        state_id: None,
        headers: String::new(),
        content: Some(DIFF.to_string()),
        pull_url: None,
        hash: None,
    }
}

#[tokio::test]
async fn duplicate_patch_insert_is_reported() {
    let test_db = test_database!("duplicate patch test");
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let project_id = fixtures
        .insert_project("lib", "lib.lists.example.com", "lib@lists.example.com")
        .await
        .expect("insert project");

    let store = PgStore::new(pool.clone());
    let person = store
        .save_person(NewPerson {
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
        })
        .await
        .expect("save person");

    store
        .create_patch(new_patch(project_id, person.id, "<dup@example.com>"))
        .await
        .expect("first insert");

    match store
        .create_patch(new_patch(project_id, person.id, "<dup@example.com>"))
        .await
    {
        Err(StoreError::Duplicate { msgid }) => assert_eq!(msgid, "<dup@example.com>"),
        other => panic!("expected duplicate, got {other:?}"),
    }

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn failed_comment_rolls_back_its_patch() {
    let test_db = test_database!("patch with comment rollback test");
    let pool = test_db.pool_clone();
    let project_id = TestFixtures::new(&pool)
        .insert_project("lib", "lib.lists.example.com", "lib@lists.example.com")
        .await
        .expect("insert project");

    let store = PgStore::new(pool.clone());
    let person = store
        .save_person(NewPerson {
            email: "alice@example.com".to_string(),
            name: None,
        })
        .await
        .expect("save person");

    let comment = |submitter_id| NewComment {
        patch_id: 0,
        msgid: "<tx@example.com>".to_string(),
        submitter_id,
        date: Utc::now(),
        headers: String::new(),
        content: "Point the list head at itself.".to_string(),
    };

    let result = store
        .create_patch_with_comment(
            new_patch(project_id, person.id, "<tx@example.com>"),
            Some(comment(person.id + 1000)),
        )
        .await;
    assert!(matches!(result, Err(StoreError::Database(_))));
    assert!(
        store
            .find_patch_by_msgid(project_id, "<tx@example.com>")
            .await
            .expect("lookup")
            .is_none()
    );

    let (patch, comment) = store
        .create_patch_with_comment(
            new_patch(project_id, person.id, "<tx@example.com>"),
            Some(comment(person.id)),
        )
        .await
        .expect("insert patch and comment");
    assert_eq!(comment.map(|c| c.patch_id), Some(patch.id));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn person_upsert_is_case_insensitive_and_links_users() {
    let test_db = test_database!("person upsert test");
    let pool = test_db.pool_clone();
    let user_id = TestFixtures::new(&pool)
        .insert_user("alice", "Alice@Example.com")
        .await
        .expect("insert user");

    let store = PgStore::new(pool.clone());
    let first = store
        .save_person(NewPerson {
            email: "alice@example.com".to_string(),
            name: Some("A. Example".to_string()),
        })
        .await
        .expect("insert person");
    assert_eq!(first.user_id, Some(user_id));

    let renamed = store
        .save_person(NewPerson {
            email: "ALICE@example.com".to_string(),
            name: Some("Alice Example".to_string()),
        })
        .await
        .expect("rename person");
    assert_eq!(renamed.id, first.id);
    assert_eq!(renamed.email, "alice@example.com");
    assert_eq!(renamed.name.as_deref(), Some("Alice Example"));

    let unnamed = store
        .save_person(NewPerson {
            email: "alice@example.com".to_string(),
            name: None,
        })
        .await
        .expect("upsert without name");
    assert_eq!(unnamed.name.as_deref(), Some("Alice Example"));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn ingest_thread_into_postgres() {
    let test_db = test_database!("postgres ingest test");
    let pool = test_db.pool_clone();
    TestFixtures::new(&pool)
        .insert_project("lib", "lib.lists.example.com", "lib@lists.example.com")
        .await
        .expect("insert project");

    let ingester = MailIngester::new(PgStore::new(pool.clone()));

    let patch = format!(
        "Message-Id: <pg-patch@example.com>\n\
         From: Alice Example <alice@example.com>\n\
         Subject: [PATCH] list: fix self reference\n\
         List-Id: <lib.lists.example.com>\n\
         \n\
         Point the list head at itself.\n\
         ---\n\
         {DIFF}"
    );
    let reply = "Message-Id: <pg-reply@example.com>\n\
                 From: Bob Reviewer <bob@example.com>\n\
                 Subject: Re: [PATCH] list: fix self reference\n\
                 In-Reply-To: <pg-patch@example.com>\n\
                 List-Id: <lib.lists.example.com>\n\
                 \n\
                 Reviewed-by: Bob Reviewer <bob@example.com>\n";

    let outcome = ingester.parse_mail(patch.as_bytes(), None).await.unwrap();
    let patch_id = match outcome {
        Outcome::Accepted {
            patch: Some(patch), ..
        } => patch.id,
        other => panic!("expected a patch, got {other:?}"),
    };

    assert!(ingester.parse_mail(reply.as_bytes(), None).await.unwrap().is_stored());
    assert!(matches!(
        ingester.parse_mail(reply.as_bytes(), None).await.unwrap(),
        Outcome::Duplicate { .. }
    ));

    let reviewed: i32 = sqlx::query_scalar(
        "SELECT pt.count FROM patch_tags pt JOIN tags t ON t.id = pt.tag_id WHERE pt.patch_id = $1 AND t.name = 'Reviewed-by'",
    )
    .bind(patch_id)
    .fetch_one(&pool)
    .await
    .expect("tag count");
    assert_eq!(reviewed, 1);

    let store = ingester.store();
    assert_eq!(tags::retag(store, None).await.expect("retag"), 1);
    assert_eq!(tags::rehash(store).await.expect("rehash"), 1);

    test_db.close().await.expect("failed to drop test database");
}
