use std::path::Path;

use tempfile::TempDir;

use notekeeper::backend::{Backend, HostedBackend, OwnerContext};
use notekeeper::bucket::ImageBucket;
use notekeeper::config::BucketConfig;
use notekeeper::db;
use notekeeper::error::ErrorKind;
use notekeeper::images::ImageUpload;
use notekeeper::migrate::run_migrations;
use notekeeper::models::{CategoryPatch, NewNote, NotePatch, SearchQuery};

const PUBLIC_URL: &str = "http://files.test/bucket";

async fn pool(tmp: &Path) -> sqlx::SqlitePool {
    let url = format!("sqlite:{}", tmp.join("data").join("notes.db").display());
    let pool = db::connect(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

fn bucket(tmp: &Path) -> ImageBucket {
    ImageBucket::from_config(&BucketConfig::Directory {
        root: tmp.join("bucket"),
        public_url: PUBLIC_URL.to_string(),
    })
}

async fn backend_for(tmp: &TempDir, user: &str) -> HostedBackend {
    HostedBackend::new(
        pool(tmp.path()).await,
        OwnerContext::new(user),
        bucket(tmp.path()),
    )
}

fn new_note(subcategory_id: &str, title: &str, content: &str) -> NewNote {
    NewNote {
        title: title.into(),
        content: content.into(),
        subcategory_id: subcategory_id.into(),
        tags: vec!["one".into(), "one".into(), "two".into()],
        images: Vec::new(),
    }
}

#[tokio::test]
async fn test_rows_are_scoped_to_their_owner() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;
    let bob = backend_for(&tmp, "bob").await;

    let c = alice.create_category("Work", "#3b82f6").await.unwrap();
    let s = alice.create_subcategory(&c.id, "Meetings").await.unwrap();
    let n = alice
        .create_note(&new_note(&s.id, "Standup", "daily sync"))
        .await
        .unwrap();
    assert_eq!(n.tags, vec!["one", "two"]);

    assert!(bob.list_categories().await.unwrap().is_empty());
    assert!(bob.list_notes().await.unwrap().is_empty());
    assert!(bob.get_note(&n.id).await.unwrap().is_none());

    // Bob can neither write under Alice's subcategory nor touch her rows.
    let err = bob
        .create_note(&new_note(&s.id, "Intruder", ""))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    bob.update_category(
        &c.id,
        &CategoryPatch {
            name: Some("Hijacked".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    bob.delete_category(&c.id).await.unwrap();

    let mine = alice.list_categories().await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].name, "Work");
    assert_eq!(mine[0].subcategories.len(), 1);
    assert_eq!(alice.list_notes().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_category_delete_cascades() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;

    let work = alice.create_category("Work", "#3b82f6").await.unwrap();
    let meetings = alice.create_subcategory(&work.id, "Meetings").await.unwrap();
    let projects = alice.create_subcategory(&work.id, "Projects").await.unwrap();
    let home = alice.create_category("Home", "#10b981").await.unwrap();
    let chores = alice.create_subcategory(&home.id, "Chores").await.unwrap();
    alice.create_note(&new_note(&meetings.id, "A", "")).await.unwrap();
    alice.create_note(&new_note(&projects.id, "B", "")).await.unwrap();
    let kept = alice.create_note(&new_note(&chores.id, "C", "")).await.unwrap();

    alice.delete_category(&work.id).await.unwrap();

    let categories = alice.list_categories().await.unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].id, home.id);
    assert!(alice.list_subcategories(Some(&work.id)).await.unwrap().is_empty());
    let notes = alice.list_notes().await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, kept.id);
}

#[tokio::test]
async fn test_missing_parent_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;
    let err = alice.create_subcategory("nope", "Ideas").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_notes_ordered_by_last_update() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;
    let c = alice.create_category("Work", "#3b82f6").await.unwrap();
    let s = alice.create_subcategory(&c.id, "Meetings").await.unwrap();
    let first = alice.create_note(&new_note(&s.id, "First", "")).await.unwrap();
    let second = alice.create_note(&new_note(&s.id, "Second", "")).await.unwrap();

    alice
        .update_note(
            &first.id,
            &NotePatch {
                content: Some("edited".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let notes = alice.list_notes().await.unwrap();
    assert_eq!(notes[0].id, first.id);
    assert_eq!(notes[1].id, second.id);
    assert!(notes[0].updated_at > first.updated_at);
    assert_eq!(notes[0].created_at, first.created_at);
    assert_eq!(notes[0].content, "edited");
}

#[tokio::test]
async fn test_search_scoped_to_category() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;
    let work = alice.create_category("Work", "#3b82f6").await.unwrap();
    let meetings = alice.create_subcategory(&work.id, "Meetings").await.unwrap();
    let home = alice.create_category("Home", "#10b981").await.unwrap();
    let chores = alice.create_subcategory(&home.id, "Chores").await.unwrap();
    alice
        .create_note(&new_note(&meetings.id, "Budget review", ""))
        .await
        .unwrap();
    alice
        .create_note(&new_note(&chores.id, "Groceries", "stay under BUDGET"))
        .await
        .unwrap();

    let all = alice.search_notes(&SearchQuery::new("budget")).await.unwrap();
    assert_eq!(all.len(), 2);

    let scoped = alice
        .search_notes(&SearchQuery::new("budget").in_category(home.id.clone()))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].title, "Groceries");

    let by_tag = alice.search_notes(&SearchQuery::new("TWO")).await.unwrap();
    assert_eq!(by_tag.len(), 2);
}

#[tokio::test]
async fn test_image_upload_and_delete_hit_the_bucket() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;

    let upload = ImageUpload::new("white board.png", "image/png", b"\x89PNG".to_vec());
    let url = alice.upload_image(&upload).await.unwrap();
    assert!(url.starts_with(&format!("{}/alice/", PUBLIC_URL)));
    assert!(url.ends_with("_white_board.png"));

    let key = url.strip_prefix(&format!("{}/", PUBLIC_URL)).unwrap();
    let on_disk = tmp.path().join("bucket").join(key);
    assert_eq!(std::fs::read(&on_disk).unwrap(), b"\x89PNG");

    alice.delete_image(&url).await.unwrap();
    assert!(!on_disk.exists());

    // Foreign URLs are left alone.
    alice
        .delete_image("https://elsewhere.test/cat.png")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_repeated_uploads_keep_their_own_objects() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;

    let mut urls = Vec::new();
    for i in 0u32..200 {
        let upload = ImageUpload::new("image.png", "image/png", i.to_le_bytes().to_vec());
        urls.push(alice.upload_image(&upload).await.unwrap());
    }

    let distinct: std::collections::HashSet<&String> = urls.iter().collect();
    assert_eq!(distinct.len(), urls.len());
    for (i, url) in urls.iter().enumerate() {
        let key = url.strip_prefix(&format!("{}/", PUBLIC_URL)).unwrap();
        let bytes = std::fs::read(tmp.path().join("bucket").join(key)).unwrap();
        assert_eq!(bytes, (i as u32).to_le_bytes());
    }

    alice.delete_image(&urls[0]).await.unwrap();
    let second = urls[1].strip_prefix(&format!("{}/", PUBLIC_URL)).unwrap();
    assert!(tmp.path().join("bucket").join(second).exists());
}

#[tokio::test]
async fn test_delete_image_is_scoped_to_owner() {
    let tmp = TempDir::new().unwrap();
    let alice = backend_for(&tmp, "alice").await;
    let bob = backend_for(&tmp, "bob").await;
    assert_eq!(bob.owner().user_id, "bob");

    let upload = ImageUpload::new("mine.png", "image/png", b"\x89PNG".to_vec());
    let url = alice.upload_image(&upload).await.unwrap();
    let key = url.strip_prefix(&format!("{}/", PUBLIC_URL)).unwrap();
    let on_disk = tmp.path().join("bucket").join(key);

    let err = bob.delete_image(&url).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert!(err.to_string().contains("not found"));
    assert!(on_disk.exists());

    alice.delete_image(&url).await.unwrap();
    assert!(!on_disk.exists());
}

#[tokio::test]
async fn test_data_survives_reconnect() {
    let tmp = TempDir::new().unwrap();
    let id = {
        let alice = backend_for(&tmp, "alice").await;
        alice.create_category("Work", "#3b82f6").await.unwrap().id
    };
    let alice = backend_for(&tmp, "alice").await;
    assert!(alice.get_category(&id).await.unwrap().is_some());
}
