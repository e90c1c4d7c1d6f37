//! In-memory cache of categories and notes over the active backend.
//!
//! Every mutation validates its input, calls the backend, and only then
//! applies the result to the cache. A failed backend call leaves the cache
//! untouched. Category and subcategory deletes reload everything so cascades
//! done by the backend show up.

use tracing::{debug, warn};

use crate::backend::{Backend, DataSource};
use crate::error::{NoteError, Result};
use crate::images::ImageUpload;
use crate::models::{
    normalize_tags, Category, CategoryPatch, NewNote, Note, NotePatch, SearchQuery, Subcategory,
    SubcategoryPatch,
};
use crate::search;
use crate::selector::DataSourceSelector;

pub struct NoteStore {
    selector: DataSourceSelector,
    categories: Vec<Category>,
    notes: Vec<Note>,
}

impl NoteStore {
    pub fn new(selector: DataSourceSelector) -> Self {
        Self {
            selector,
            categories: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn selector(&self) -> &DataSourceSelector {
        &self.selector
    }

    pub fn active_source(&self) -> DataSource {
        self.selector.active()
    }

    fn backend(&self) -> std::sync::Arc<dyn Backend> {
        self.selector.backend()
    }

    /// Replace the cache with the active backend's contents.
    pub async fn load(&mut self) -> Result<()> {
        let backend = self.backend();
        let categories = backend.list_categories().await?;
        let notes = backend.list_notes().await?;
        debug!(
            source = %backend.kind(),
            categories = categories.len(),
            notes = notes.len(),
            "store: loaded"
        );
        self.categories = categories;
        self.notes = notes;
        Ok(())
    }

    pub async fn switch_source(&mut self, kind: DataSource) -> Result<()> {
        self.selector.select(kind)?;
        self.load().await
    }

    pub async fn toggle_source(&mut self) -> Result<DataSource> {
        let kind = self.selector.toggle()?;
        self.load().await?;
        Ok(kind)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn subcategory(&self, id: &str) -> Option<&Subcategory> {
        self.categories
            .iter()
            .flat_map(|c| c.subcategories.iter())
            .find(|s| s.id == id)
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    // ── Categories ──

    pub async fn add_category(&mut self, name: &str, color: &str) -> Result<Category> {
        let name = required("category name", name)?;
        let category = self.backend().create_category(name, color).await?;
        self.categories.push(category.clone());
        Ok(category)
    }

    pub async fn update_category(&mut self, id: &str, mut patch: CategoryPatch) -> Result<()> {
        if let Some(name) = patch.name.take() {
            patch.name = Some(required("category name", &name)?.to_string());
        }
        self.backend().update_category(id, &patch).await?;
        if let Some(c) = self.categories.iter_mut().find(|c| c.id == id) {
            c.apply(&patch);
        }
        Ok(())
    }

    pub async fn delete_category(&mut self, id: &str) -> Result<()> {
        self.backend().delete_category(id).await?;
        self.load().await
    }

    // ── Subcategories ──

    pub async fn add_subcategory(&mut self, category_id: &str, name: &str) -> Result<Subcategory> {
        let name = required("subcategory name", name)?;
        if self.category(category_id).is_none() {
            return Err(NoteError::validation(format!(
                "category {} does not exist",
                category_id
            )));
        }
        let sub = self.backend().create_subcategory(category_id, name).await?;
        if let Some(c) = self.categories.iter_mut().find(|c| c.id == category_id) {
            c.subcategories.push(sub.clone());
        }
        Ok(sub)
    }

    pub async fn update_subcategory(&mut self, id: &str, mut patch: SubcategoryPatch) -> Result<()> {
        if let Some(name) = patch.name.take() {
            patch.name = Some(required("subcategory name", &name)?.to_string());
        }
        self.backend().update_subcategory(id, &patch).await?;
        if let Some(s) = self
            .categories
            .iter_mut()
            .flat_map(|c| c.subcategories.iter_mut())
            .find(|s| s.id == id)
        {
            s.apply(&patch);
        }
        Ok(())
    }

    pub async fn delete_subcategory(&mut self, id: &str) -> Result<()> {
        self.backend().delete_subcategory(id).await?;
        self.load().await
    }

    // ── Notes ──

    pub async fn add_note(&mut self, new: NewNote) -> Result<Note> {
        let title = required("note title", &new.title)?.to_string();
        if self.subcategory(&new.subcategory_id).is_none() {
            return Err(NoteError::validation(format!(
                "subcategory {} does not exist",
                new.subcategory_id
            )));
        }
        let new = NewNote {
            title,
            tags: normalize_tags(&new.tags),
            ..new
        };
        let note = self.backend().create_note(&new).await?;
        self.notes.push(note.clone());
        Ok(note)
    }

    pub async fn update_note(&mut self, id: &str, mut patch: NotePatch) -> Result<()> {
        if let Some(title) = patch.title.take() {
            patch.title = Some(required("note title", &title)?.to_string());
        }
        if patch.is_empty() {
            return Ok(());
        }
        self.backend().update_note(id, &patch).await?;
        if let Some(n) = self.notes.iter_mut().find(|n| n.id == id) {
            n.apply(&patch);
        }
        Ok(())
    }

    pub async fn delete_note(&mut self, id: &str) -> Result<()> {
        self.backend().delete_note(id).await?;
        self.notes.retain(|n| n.id != id);
        Ok(())
    }

    // ── Images ──

    /// Validate, upload, and append the image reference to a note.
    pub async fn attach_image(&mut self, note_id: &str, upload: &ImageUpload) -> Result<String> {
        upload.validate()?;
        let mut images = self
            .note(note_id)
            .ok_or_else(|| NoteError::not_found("note", note_id))?
            .images
            .clone();

        let backend = self.backend();
        let reference = backend.upload_image(upload).await?;
        images.push(reference.clone());
        let patch = NotePatch {
            images: Some(images),
            ..Default::default()
        };
        if let Err(e) = self.update_note(note_id, patch).await {
            // Don't leave an orphaned object behind.
            if let Err(cleanup) = backend.delete_image(&reference).await {
                warn!(reference = %reference, error = %cleanup, "failed to remove orphaned image");
            }
            return Err(e);
        }
        Ok(reference)
    }

    /// Delete a stored image and drop its reference from the note.
    pub async fn detach_image(&mut self, note_id: &str, reference: &str) -> Result<()> {
        let note = self
            .note(note_id)
            .ok_or_else(|| NoteError::not_found("note", note_id))?;
        if !note.images.iter().any(|r| r == reference) {
            return Err(NoteError::not_found("image", reference));
        }
        let images: Vec<String> = note
            .images
            .iter()
            .filter(|r| *r != reference)
            .cloned()
            .collect();

        self.backend().delete_image(reference).await?;
        self.update_note(
            note_id,
            NotePatch {
                images: Some(images),
                ..Default::default()
            },
        )
        .await
    }

    // ── Queries over the cache ──

    pub fn notes_by_subcategory(&self, subcategory_id: &str) -> Vec<&Note> {
        search::notes_by_subcategory(&self.notes, subcategory_id)
    }

    pub fn notes_by_category(&self, category_id: &str) -> Vec<&Note> {
        search::notes_by_category(&self.notes, &self.categories, category_id)
    }

    pub fn notes_by_tags(&self, tags: &[String]) -> Vec<&Note> {
        search::notes_by_tags(&self.notes, tags)
    }

    pub fn search(&self, query: &str, category_id: Option<&str>) -> Vec<&Note> {
        search::search_notes(&self.notes, &self.categories, query, category_id)
    }

    pub fn all_tags(&self) -> Vec<String> {
        search::all_tags(&self.notes)
    }

    /// Search on the backend rather than the cache.
    pub async fn remote_search(&self, query: &SearchQuery) -> Result<Vec<Note>> {
        self.backend().search_notes(query).await
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NoteError::validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}
