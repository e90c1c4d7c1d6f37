//! Local-storage [`Backend`] over [`LocalKv`].
//!
//! The whole category tree lives under one key and the whole note list
//! under another; every write loads, mutates, and saves the document under a
//! mutex. Images are stored inline as base64 data URLs, one key per image.
//! There is no quota check and no network failure mode.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{Backend, DataSource};
use crate::error::{NoteError, Result};
use crate::images::{generate_image_id, ImageUpload};
use crate::kv::{keys, LocalKv};
use crate::models::{
    new_id, normalize_tags, Category, CategoryPatch, NewNote, Note, NotePatch, SearchQuery,
    Subcategory, SubcategoryPatch,
};
use crate::search;

pub struct LocalBackend {
    kv: LocalKv,
    write_lock: Mutex<()>,
}

impl LocalBackend {
    pub fn new(kv: LocalKv) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub fn kv(&self) -> &LocalKv {
        &self.kv
    }

    fn load_categories(&self) -> Result<Vec<Category>> {
        Ok(self.kv.get_json(keys::CATEGORIES)?.unwrap_or_default())
    }

    fn save_categories(&self, categories: &[Category]) -> Result<()> {
        self.kv.set_json(keys::CATEGORIES, &categories)
    }

    fn load_notes(&self) -> Result<Vec<Note>> {
        Ok(self.kv.get_json(keys::NOTES)?.unwrap_or_default())
    }

    fn save_notes(&self, notes: &[Note]) -> Result<()> {
        self.kv.set_json(keys::NOTES, &notes)
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| NoteError::backend("local storage lock poisoned"))?;
        f()
    }

    /// Fetch a stored image as a data URL.
    pub fn get_image(&self, id: &str) -> Result<Option<String>> {
        self.kv.get(&keys::image(id))
    }

    /// Remove the category tree, notes, app state, and every stored image.
    pub fn clear_all(&self) -> Result<()> {
        self.locked(|| {
            for key in [keys::CATEGORIES, keys::NOTES, keys::APP_STATE] {
                self.kv.remove(key)?;
            }
            for key in self.kv.keys()? {
                if key.starts_with(keys::IMAGE_PREFIX) {
                    self.kv.remove(&key)?;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> DataSource {
        DataSource::Local
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories = self.load_categories()?;
        categories.sort_by_key(|c| c.created_at);
        for c in &mut categories {
            c.subcategories.sort_by_key(|s| s.created_at);
        }
        Ok(categories)
    }

    async fn create_category(&self, name: &str, color: &str) -> Result<Category> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            let category = Category {
                id: new_id(),
                name: name.to_string(),
                color: color.to_string(),
                subcategories: Vec::new(),
                created_at: Utc::now(),
            };
            categories.push(category.clone());
            self.save_categories(&categories)?;
            debug!(id = %category.id, "local: created category");
            Ok(category)
        })
    }

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<()> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            if let Some(c) = categories.iter_mut().find(|c| c.id == id) {
                c.apply(patch);
                self.save_categories(&categories)?;
            }
            Ok(())
        })
    }

    async fn delete_category(&self, id: &str) -> Result<()> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            let doomed: Vec<String> = categories
                .iter()
                .filter(|c| c.id == id)
                .flat_map(|c| c.subcategory_ids().map(str::to_string))
                .collect();
            categories.retain(|c| c.id != id);
            self.save_categories(&categories)?;

            let mut notes = self.load_notes()?;
            notes.retain(|n| !doomed.contains(&n.subcategory_id));
            self.save_notes(&notes)?;
            debug!(id, subcategories = doomed.len(), "local: deleted category");
            Ok(())
        })
    }

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            let parent = categories
                .iter_mut()
                .find(|c| c.id == category_id)
                .ok_or_else(|| NoteError::not_found("category", category_id))?;
            let sub = Subcategory {
                id: new_id(),
                name: name.to_string(),
                category_id: category_id.to_string(),
                created_at: Utc::now(),
            };
            parent.subcategories.push(sub.clone());
            self.save_categories(&categories)?;
            Ok(sub)
        })
    }

    async fn update_subcategory(&self, id: &str, patch: &SubcategoryPatch) -> Result<()> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            let found = categories
                .iter_mut()
                .flat_map(|c| c.subcategories.iter_mut())
                .find(|s| s.id == id);
            if let Some(sub) = found {
                sub.apply(patch);
                self.save_categories(&categories)?;
            }
            Ok(())
        })
    }

    async fn delete_subcategory(&self, id: &str) -> Result<()> {
        self.locked(|| {
            let mut categories = self.load_categories()?;
            for c in &mut categories {
                c.subcategories.retain(|s| s.id != id);
            }
            self.save_categories(&categories)?;

            let mut notes = self.load_notes()?;
            notes.retain(|n| n.subcategory_id != id);
            self.save_notes(&notes)
        })
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        self.load_notes()
    }

    async fn create_note(&self, new: &NewNote) -> Result<Note> {
        self.locked(|| {
            let mut notes = self.load_notes()?;
            let now = Utc::now();
            let note = Note {
                id: new_id(),
                title: new.title.clone(),
                content: new.content.clone(),
                subcategory_id: new.subcategory_id.clone(),
                tags: normalize_tags(&new.tags),
                images: new.images.clone(),
                created_at: now,
                updated_at: now,
            };
            notes.push(note.clone());
            self.save_notes(&notes)?;
            Ok(note)
        })
    }

    async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<()> {
        self.locked(|| {
            let mut notes = self.load_notes()?;
            let changed = notes
                .iter_mut()
                .find(|n| n.id == id)
                .map(|n| n.apply(patch))
                .unwrap_or(false);
            if changed {
                self.save_notes(&notes)?;
            }
            Ok(())
        })
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        self.locked(|| {
            let mut notes = self.load_notes()?;
            notes.retain(|n| n.id != id);
            self.save_notes(&notes)
        })
    }

    async fn upload_image(&self, image: &ImageUpload) -> Result<String> {
        let id = generate_image_id();
        self.kv.set(&keys::image(&id), &image.to_data_url())?;
        debug!(id = %id, bytes = image.bytes.len(), "local: stored image");
        Ok(id)
    }

    async fn delete_image(&self, reference: &str) -> Result<()> {
        self.kv.remove(&keys::image(reference))
    }

    async fn search_notes(&self, query: &SearchQuery) -> Result<Vec<Note>> {
        let categories = self.load_categories()?;
        let notes = self.load_notes()?;
        Ok(
            search::search_notes(&notes, &categories, &query.text, query.category_id.as_deref())
                .into_iter()
                .cloned()
                .collect(),
        )
    }
}
