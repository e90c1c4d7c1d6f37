//! Explicit construction of every state container.
//!
//! [`App::bootstrap`] wires things up in a fixed order:
//!
//! 1. local key/value store
//! 2. selection state (persistent only when `[selection] persist = true`)
//! 3. saved session (24 h validity)
//! 4. backends and the data-source selector (last used source, else the
//!    configured default)
//! 5. note store (empty until [`App::load`])

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::{Authenticator, LocalUsers, RestLogin, Session, StaticCredential};
use crate::backend::{Backend, DataSource, HostedBackend, LocalBackend, OwnerContext, RestBackend};
use crate::bucket::ImageBucket;
use crate::config::Config;
use crate::error::{NoteError, Result};
use crate::kv::{keys, LocalKv};
use crate::selection::SelectionState;
use crate::selector::DataSourceSelector;
use crate::store::NoteStore;
use crate::{db, migrate};

pub struct App {
    pub config: Config,
    pub kv: LocalKv,
    pub selection: SelectionState,
    pub session: Option<Session>,
    pub store: NoteStore,
    local: Arc<LocalBackend>,
    rest: Option<Arc<RestBackend>>,
}

impl App {
    /// Build everything from config. `source` overrides `[data_source] default`
    /// and, unlike the default, fails when that source is unavailable.
    pub async fn bootstrap(config: Config, source: Option<DataSource>) -> Result<Self> {
        let kv = LocalKv::open(&config.local.dir)?;

        let selection = if config.selection.persist {
            SelectionState::persistent(kv.clone())
        } else {
            SelectionState::transient()
        };

        let session = Authenticator::new(kv.clone()).restore_session()?;

        let local = Arc::new(LocalBackend::new(kv.clone()));

        let rest = match &config.rest {
            Some(rest_config) => Some(Arc::new(RestBackend::new(rest_config, kv.clone())?)),
            None => None,
        };

        let hosted = match &config.hosted {
            Some(hosted_config) => {
                let owner = session
                    .as_ref()
                    .map(|s| s.owner_id.clone())
                    .or_else(|| hosted_config.owner.clone());
                match owner {
                    Some(owner) => {
                        let pool = db::connect(&hosted_config.database_url).await?;
                        migrate::run_migrations(&pool).await?;
                        let bucket = ImageBucket::from_config(
                            &hosted_config.bucket_or_default(&config.local.dir),
                        );
                        debug!(owner = %owner, "hosted storage ready");
                        Some(Arc::new(HostedBackend::new(
                            pool,
                            OwnerContext::new(owner),
                            bucket,
                        )))
                    }
                    None => {
                        debug!("hosted storage configured but nobody is logged in");
                        None
                    }
                }
            }
            None => None,
        };

        let configured = config
            .default_source()
            .map_err(|e| NoteError::config(e.to_string()))?;
        let default = match kv.get(keys::DATA_SOURCE)? {
            Some(saved) => saved.trim().parse::<DataSource>().unwrap_or(configured),
            None => configured,
        };
        let mut selector = DataSourceSelector::new(
            local.clone() as Arc<dyn Backend>,
            hosted.map(|h| h as Arc<dyn Backend>),
            rest.clone().map(|r| r as Arc<dyn Backend>),
            default,
        );
        if selector.active() != default {
            warn!(requested = %default, "default data source unavailable, using local storage");
        }
        if let Some(kind) = source {
            selector.select(kind)?;
        }

        let store = NoteStore::new(selector);

        Ok(Self {
            config,
            kv,
            selection,
            session,
            store,
            local,
            rest,
        })
    }

    /// Fill the note store from the active backend.
    pub async fn load(&mut self) -> Result<()> {
        self.store.load().await
    }

    /// Remember the active data source for later runs.
    pub fn remember_source(&self) -> Result<()> {
        self.kv
            .set(keys::DATA_SOURCE, self.store.active_source().as_str())
    }

    pub fn local(&self) -> &Arc<LocalBackend> {
        &self.local
    }

    pub fn rest(&self) -> Option<&Arc<RestBackend>> {
        self.rest.as_ref()
    }

    pub fn local_users(&self) -> LocalUsers {
        LocalUsers::new(self.kv.clone())
    }

    /// The login chain: REST (when configured), local users, then the demo
    /// credential (when configured).
    pub fn authenticator(&self) -> Authenticator {
        let mut auth = Authenticator::new(self.kv.clone());
        if let Some(rest) = &self.rest {
            auth = auth.with(RestLogin::new(Arc::clone(rest)));
        }
        auth = auth.with(self.local_users());
        if let Some(demo) = &self.config.auth.demo {
            auth = auth.with(StaticCredential::new(demo.clone()));
        }
        auth
    }
}
