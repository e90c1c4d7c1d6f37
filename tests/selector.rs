use std::sync::Arc;

use tempfile::TempDir;

use notekeeper::app::App;
use notekeeper::backend::{Backend, DataSource, LocalBackend};
use notekeeper::config::{BucketConfig, Config, HostedConfig};
use notekeeper::error::ErrorKind;
use notekeeper::kv::{keys, LocalKv};
use notekeeper::selector::DataSourceSelector;
use notekeeper::store::NoteStore;

fn hosted_config(tmp: &TempDir, owner: Option<&str>) -> Config {
    let mut config = Config::minimal(tmp.path().join("local"));
    config.hosted = Some(HostedConfig {
        database_url: format!("sqlite:{}", tmp.path().join("hosted.db").display()),
        owner: owner.map(str::to_string),
        bucket: Some(BucketConfig::Directory {
            root: tmp.path().join("bucket"),
            public_url: "http://files.test".into(),
        }),
    });
    config
}

#[tokio::test]
async fn test_toggle_without_hosted_is_a_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let kv = LocalKv::open(tmp.path()).unwrap();
    let local: Arc<dyn Backend> = Arc::new(LocalBackend::new(kv));
    let mut store = NoteStore::new(DataSourceSelector::local_only(local));

    let err = store.toggle_source().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("Database Not Configured"));
    assert_eq!(store.active_source(), DataSource::Local);

    let err = store.switch_source(DataSource::Rest).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(store.active_source(), DataSource::Local);
    assert_eq!(store.selector().available(), vec![DataSource::Local]);
}

#[tokio::test]
async fn test_unavailable_initial_source_falls_back_to_local() {
    let tmp = TempDir::new().unwrap();
    let kv = LocalKv::open(tmp.path()).unwrap();
    let local: Arc<dyn Backend> = Arc::new(LocalBackend::new(kv));
    let selector = DataSourceSelector::new(local, None, None, DataSource::Hosted);
    assert_eq!(selector.active(), DataSource::Local);
    assert_eq!(selector.backend().kind(), DataSource::Local);
}

#[tokio::test]
async fn test_hosted_needs_an_owner() {
    let tmp = TempDir::new().unwrap();
    let app = App::bootstrap(hosted_config(&tmp, None), None).await.unwrap();
    assert!(!app.store.selector().is_available(DataSource::Hosted));
    assert_eq!(app.store.active_source(), DataSource::Local);

    let err = App::bootstrap(hosted_config(&tmp, None), Some(DataSource::Hosted))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_toggle_between_local_and_hosted_keeps_data_apart() {
    let tmp = TempDir::new().unwrap();
    let mut app = App::bootstrap(hosted_config(&tmp, Some("alice")), None)
        .await
        .unwrap();
    app.load().await.unwrap();
    app.store.add_category("Local only", "#6b7280").await.unwrap();

    assert_eq!(app.store.toggle_source().await.unwrap(), DataSource::Hosted);
    assert!(app.store.categories().is_empty());
    app.store.add_category("Hosted only", "#3b82f6").await.unwrap();

    assert_eq!(app.store.toggle_source().await.unwrap(), DataSource::Local);
    assert_eq!(app.store.categories().len(), 1);
    assert_eq!(app.store.categories()[0].name, "Local only");
}

#[tokio::test]
async fn test_last_used_source_is_remembered() {
    let tmp = TempDir::new().unwrap();
    {
        let mut app = App::bootstrap(hosted_config(&tmp, Some("alice")), None)
            .await
            .unwrap();
        app.store.switch_source(DataSource::Hosted).await.unwrap();
        app.remember_source().unwrap();
    }

    let kv = LocalKv::open(tmp.path().join("local")).unwrap();
    assert_eq!(kv.get(keys::DATA_SOURCE).unwrap().as_deref(), Some("hosted"));

    let app = App::bootstrap(hosted_config(&tmp, Some("alice")), None)
        .await
        .unwrap();
    assert_eq!(app.store.active_source(), DataSource::Hosted);

    // Without hosted config the remembered choice degrades to local.
    let app = App::bootstrap(Config::minimal(tmp.path().join("local")), None)
        .await
        .unwrap();
    assert_eq!(app.store.active_source(), DataSource::Local);
}
