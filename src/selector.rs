//! Chooses which [`Backend`] is active.
//!
//! A variant is available only when it was constructed: hosted needs a
//! database URL and an authenticated owner, REST needs a base URL. Selecting
//! an unavailable variant is a configuration error and leaves the active
//! source as it was. There is no automatic failover.

use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, DataSource};
use crate::error::{NoteError, Result};

pub struct DataSourceSelector {
    local: Arc<dyn Backend>,
    hosted: Option<Arc<dyn Backend>>,
    rest: Option<Arc<dyn Backend>>,
    active: DataSource,
}

impl DataSourceSelector {
    /// Build a selector. Falls back to local when `initial` is unavailable.
    pub fn new(
        local: Arc<dyn Backend>,
        hosted: Option<Arc<dyn Backend>>,
        rest: Option<Arc<dyn Backend>>,
        initial: DataSource,
    ) -> Self {
        let mut selector = Self {
            local,
            hosted,
            rest,
            active: DataSource::Local,
        };
        if selector.is_available(initial) {
            selector.active = initial;
        }
        selector
    }

    pub fn local_only(local: Arc<dyn Backend>) -> Self {
        Self::new(local, None, None, DataSource::Local)
    }

    pub fn is_available(&self, kind: DataSource) -> bool {
        self.slot(kind).is_some()
    }

    fn slot(&self, kind: DataSource) -> Option<&Arc<dyn Backend>> {
        match kind {
            DataSource::Local => Some(&self.local),
            DataSource::Hosted => self.hosted.as_ref(),
            DataSource::Rest => self.rest.as_ref(),
        }
    }

    pub fn select(&mut self, kind: DataSource) -> Result<()> {
        if !self.is_available(kind) {
            return Err(unavailable(kind));
        }
        if self.active != kind {
            info!(from = %self.active, to = %kind, "data source switched");
        }
        self.active = kind;
        Ok(())
    }

    /// Flip between local and hosted storage.
    pub fn toggle(&mut self) -> Result<DataSource> {
        let target = match self.active {
            DataSource::Hosted => DataSource::Local,
            DataSource::Local | DataSource::Rest => DataSource::Hosted,
        };
        self.select(target)?;
        Ok(target)
    }

    pub fn active(&self) -> DataSource {
        self.active
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        match self.slot(self.active) {
            Some(b) => Arc::clone(b),
            None => Arc::clone(&self.local),
        }
    }

    /// All variants that can currently be selected.
    pub fn available(&self) -> Vec<DataSource> {
        [DataSource::Local, DataSource::Hosted, DataSource::Rest]
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }
}

fn unavailable(kind: DataSource) -> NoteError {
    let hint = match kind {
        DataSource::Local => "local storage is always available",
        DataSource::Hosted => {
            "set [hosted].database_url in the config and log in (or set [hosted].owner)"
        }
        DataSource::Rest => "set [rest].base_url in the config",
    };
    NoteError::config(format!("Database Not Configured: {} is unavailable; {}", kind, hint))
}
