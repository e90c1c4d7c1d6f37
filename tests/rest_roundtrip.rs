use std::net::TcpListener as StdListener;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use notekeeper::api::{NoteFilter, SearchType, TagCount};
use notekeeper::backend::{Backend, RestBackend};
use notekeeper::bucket::ImageBucket;
use notekeeper::config::{BucketConfig, RestConfig};
use notekeeper::db;
use notekeeper::error::ErrorKind;
use notekeeper::images::ImageUpload;
use notekeeper::kv::{keys, LocalKv};
use notekeeper::migrate::run_migrations;
use notekeeper::models::{CategoryPatch, NewNote, NotePatch};
use notekeeper::selector::DataSourceSelector;
use notekeeper::server::{self, ServerState};
use notekeeper::store::NoteStore;

fn find_free_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{}/health", base_url)).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("server did not start at {}", base_url);
}

/// Start a server on a free port and return its base URL.
async fn start_server(tmp: &TempDir) -> String {
    let port = find_free_port();
    let base_url = format!("http://127.0.0.1:{}", port);

    let url = format!("sqlite:{}", tmp.path().join("server.db").display());
    let pool = db::connect(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let bucket = ImageBucket::from_config(&BucketConfig::Directory {
        root: tmp.path().join("files"),
        public_url: format!("{}/files", base_url),
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(server::serve(listener, ServerState::new(pool, bucket)));
    wait_for_server(&base_url).await;
    base_url
}

fn client(tmp: &TempDir, name: &str, base_url: &str) -> RestBackend {
    let kv = LocalKv::open(tmp.path().join(name)).unwrap();
    RestBackend::new(
        &RestConfig {
            base_url: base_url.to_string(),
            timeout_secs: 10,
        },
        kv,
    )
    .unwrap()
}

fn new_note(subcategory_id: &str, title: &str, tags: &[&str]) -> NewNote {
    NewNote {
        title: title.into(),
        content: format!("<p>{} body</p>", title),
        subcategory_id: subcategory_id.into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        images: Vec::new(),
    }
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let base_url = start_server(&tmp).await;
    let rest = client(&tmp, "anon", &base_url);

    let err = rest.list_categories().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    assert_eq!(err.to_string(), "Authentication required");

    let err = rest.login("nobody", "wrong").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid username or password");
    assert!(rest.token().unwrap().is_none());
}

#[tokio::test]
async fn test_register_login_me_logout() {
    let tmp = TempDir::new().unwrap();
    let base_url = start_server(&tmp).await;
    let rest = client(&tmp, "alice", &base_url);

    let registered = rest
        .register("alice", "alice@example.com", "s3cret")
        .await
        .unwrap();
    assert_eq!(rest.token().unwrap().as_deref(), Some(registered.token.as_str()));

    let err = rest.register("ALICE", "", "other").await.unwrap_err();
    assert!(err.to_string().contains("already taken"));

    let logged_in = rest.login("alice", "s3cret").await.unwrap();
    assert_eq!(logged_in.user.id, registered.user.id);
    assert_eq!(rest.me().await.unwrap().username, "alice");

    rest.logout().await.unwrap();
    assert!(rest.token().unwrap().is_none());
    assert!(rest.me().await.is_err());
}

#[tokio::test]
async fn test_crud_filters_and_lookups() {
    let tmp = TempDir::new().unwrap();
    let base_url = start_server(&tmp).await;
    let rest = client(&tmp, "alice", &base_url);
    rest.register("alice", "", "pw").await.unwrap();

    let work = rest.create_category("Work", "#3b82f6").await.unwrap();
    let meetings = rest.create_subcategory(&work.id, "Meetings").await.unwrap();
    let projects = rest.create_subcategory(&work.id, "Projects").await.unwrap();
    let home = rest.create_category("Home", "#10b981").await.unwrap();
    let chores = rest.create_subcategory(&home.id, "Chores").await.unwrap();

    let standup = rest
        .create_note(&new_note(&meetings.id, "Standup", &["daily", "team"]))
        .await
        .unwrap();
    rest.create_note(&new_note(&projects.id, "Roadmap", &["team"]))
        .await
        .unwrap();
    rest.create_note(&new_note(&chores.id, "Laundry", &["weekly"]))
        .await
        .unwrap();

    rest.update_category(
        &work.id,
        &CategoryPatch {
            name: Some("Office".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let categories = rest.list_categories().await.unwrap();
    assert_eq!(categories[0].name, "Office");
    assert_eq!(categories[0].subcategories.len(), 2);
    assert_eq!(rest.list_subcategories(Some(&home.id)).await.unwrap().len(), 1);

    let in_work = rest
        .list_notes_filtered(&NoteFilter {
            category_id: Some(work.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(in_work.len(), 2);

    let tagged = rest
        .list_notes_filtered(&NoteFilter {
            tags: Some("daily,weekly".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tagged.len(), 2);

    let paged = rest
        .list_notes_filtered(&NoteFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);

    let counts = rest.tag_counts().await.unwrap();
    assert_eq!(
        counts[0],
        TagCount {
            tag: "team".into(),
            count: 2
        }
    );

    let found = rest
        .global_search("meet", SearchType::All, None)
        .await
        .unwrap();
    assert_eq!(found.subcategories.len(), 1);
    assert!(found.notes.is_empty());
    let found = rest
        .global_search("standup", SearchType::Notes, Some(5))
        .await
        .unwrap();
    assert_eq!(found.notes.len(), 1);
    assert!(found.categories.is_empty());

    rest.update_note(
        &standup.id,
        &NotePatch {
            title: Some("Daily standup".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let fetched = rest.get_note(&standup.id).await.unwrap();
    assert_eq!(fetched.title, "Daily standup");
    assert!(fetched.updated_at > standup.updated_at);

    rest.delete_category(&work.id).await.unwrap();
    let remaining = rest.list_notes().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].title, "Laundry");

    let err = rest.get_note(&standup.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Note not found");
    let err = rest.delete_category(&work.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Category not found");
}

#[tokio::test]
async fn test_users_cannot_see_each_other() {
    let tmp = TempDir::new().unwrap();
    let base_url = start_server(&tmp).await;
    let alice = client(&tmp, "alice", &base_url);
    let bob = client(&tmp, "bob", &base_url);
    alice.register("alice", "", "pw").await.unwrap();
    bob.register("bob", "", "pw").await.unwrap();

    let c = alice.create_category("Private", "#000000").await.unwrap();
    assert!(bob.list_categories().await.unwrap().is_empty());
    let err = bob.delete_category(&c.id).await.unwrap_err();
    assert_eq!(err.to_string(), "Category not found");
    assert_eq!(alice.list_categories().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_image_flow_through_store() {
    let tmp = TempDir::new().unwrap();
    let base_url = start_server(&tmp).await;
    let rest = Arc::new(client(&tmp, "alice", &base_url));
    rest.register("alice", "", "pw").await.unwrap();

    let local = Arc::new(notekeeper::backend::LocalBackend::new(
        LocalKv::open(tmp.path().join("local")).unwrap(),
    ));
    let selector = DataSourceSelector::new(
        local,
        None,
        Some(rest.clone() as Arc<dyn Backend>),
        notekeeper::backend::DataSource::Rest,
    );
    let mut store = NoteStore::new(selector);
    store.load().await.unwrap();

    let c = store.add_category("Work", "#3b82f6").await.unwrap();
    let s = store.add_subcategory(&c.id, "Meetings").await.unwrap();
    let n = store.add_note(new_note(&s.id, "Whiteboard", &[])).await.unwrap();

    let png = ImageUpload::new("board.png", "image/png", b"\x89PNG\r\n\x1a\n".to_vec());
    let url = store.attach_image(&n.id, &png).await.unwrap();
    assert!(url.starts_with(&format!("{}/files/", base_url)));

    let served = reqwest::get(&url).await.unwrap();
    assert!(served.status().is_success());
    assert_eq!(
        served.headers()[reqwest::header::CONTENT_TYPE],
        "image/png"
    );
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"\x89PNG\r\n\x1a\n");
    assert_eq!(rest.get_note(&n.id).await.unwrap().images, vec![url.clone()]);

    store.detach_image(&n.id, &url).await.unwrap();
    assert_eq!(reqwest::get(&url).await.unwrap().status().as_u16(), 404);
    assert!(rest.get_note(&n.id).await.unwrap().images.is_empty());

    // A rejected upload never reaches the server.
    let gif = ImageUpload::new("huge.gif", "image/gif", vec![0; 11 * 1024 * 1024]);
    let err = store.attach_image(&n.id, &gif).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(std::fs::read_dir(tmp.path().join("files").join(&rest.me().await.unwrap().id))
        .unwrap()
        .next()
        .is_none());
    assert!(LocalKv::open(tmp.path().join("alice"))
        .unwrap()
        .get(keys::TOKEN)
        .unwrap()
        .is_some());
}
