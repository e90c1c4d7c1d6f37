//! Persistence abstraction for categories, subcategories, notes, and images.
//!
//! The [`Backend`] trait is the single contract every storage variant
//! implements, so the [`NoteStore`](crate::store::NoteStore) can delegate to
//! whichever one the [`DataSourceSelector`](crate::selector::DataSourceSelector)
//! has active.
//!
//! | Variant | Module | Storage | Image reference |
//! |---------|--------|---------|-----------------|
//! | [`LocalBackend`] | [`local`] | key/value files | image id |
//! | [`HostedBackend`] | [`hosted`] | SQLite via sqlx, scoped by owner | bucket URL |
//! | [`RestBackend`] | [`rest`] | JSON over HTTP | server URL |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod hosted;
pub mod local;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::images::ImageUpload;
use crate::models::{
    Category, CategoryPatch, NewNote, Note, NotePatch, SearchQuery, Subcategory, SubcategoryPatch,
};

pub use hosted::HostedBackend;
pub use local::LocalBackend;
pub use rest::RestBackend;

/// Which persistence variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Local,
    Hosted,
    Rest,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Local => "local",
            DataSource::Hosted => "hosted",
            DataSource::Rest => "rest",
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(DataSource::Local),
            "hosted" => Ok(DataSource::Hosted),
            "rest" => Ok(DataSource::Rest),
            other => Err(format!(
                "unknown data source '{}'. Must be local, hosted, or rest.",
                other
            )),
        }
    }
}

/// Authenticated user identifier scoping every hosted query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerContext {
    pub user_id: String,
}

impl OwnerContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Abstract persistence backend.
///
/// Deletes cascade: removing a category removes its subcategories and their
/// notes; removing a subcategory removes its notes. Updating an id that does
/// not exist is storage-dependent (local and hosted ignore it, REST reports
/// the server's error).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> DataSource;

    /// Categories with nested subcategories.
    async fn list_categories(&self) -> Result<Vec<Category>>;

    async fn create_category(&self, name: &str, color: &str) -> Result<Category>;

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<()>;

    /// Delete a category and everything under it.
    async fn delete_category(&self, id: &str) -> Result<()>;

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory>;

    async fn update_subcategory(&self, id: &str, patch: &SubcategoryPatch) -> Result<()>;

    /// Delete a subcategory and its notes.
    async fn delete_subcategory(&self, id: &str) -> Result<()>;

    async fn list_notes(&self) -> Result<Vec<Note>>;

    async fn create_note(&self, note: &NewNote) -> Result<Note>;

    /// Apply a partial update and refresh `updated_at`.
    async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<()>;

    async fn delete_note(&self, id: &str) -> Result<()>;

    /// Store an image and return its reference.
    async fn upload_image(&self, image: &ImageUpload) -> Result<String>;

    async fn delete_image(&self, reference: &str) -> Result<()>;

    /// Case-insensitive substring search over title, content, and tags.
    async fn search_notes(&self, query: &SearchQuery) -> Result<Vec<Note>>;
}
