//! Hosted [`Backend`]: a relational database plus an image bucket, with
//! every row scoped to the authenticated owner.
//!
//! Timestamps are stored as epoch milliseconds. Categories and
//! subcategories come back in ascending creation order, notes most recently
//! updated first. Cascading deletes run inside one transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::{Backend, DataSource, OwnerContext};
use crate::bucket::{object_key, ImageBucket};
use crate::error::{NoteError, Result};
use crate::images::ImageUpload;
use crate::models::{
    from_millis, new_id, normalize_tags, Category, CategoryPatch, NewNote, Note, NotePatch,
    SearchQuery, Subcategory, SubcategoryPatch,
};
use crate::search;

const NOTE_COLUMNS: &str = "n.id, n.subcategory_id, n.title, n.content, n.tags_json, \
                            n.images_json, n.created_at, n.updated_at";

pub struct HostedBackend {
    pool: SqlitePool,
    owner: OwnerContext,
    bucket: ImageBucket,
}

impl HostedBackend {
    pub fn new(pool: SqlitePool, owner: OwnerContext, bucket: ImageBucket) -> Self {
        Self {
            pool,
            owner,
            bucket,
        }
    }

    pub fn owner(&self) -> &OwnerContext {
        &self.owner
    }

    fn user_id(&self) -> &str {
        &self.owner.user_id
    }

    /// Subcategories of the owner, optionally restricted to one category.
    pub async fn list_subcategories(&self, category_id: Option<&str>) -> Result<Vec<Subcategory>> {
        let rows = match category_id {
            Some(cid) => {
                sqlx::query(
                    "SELECT id, category_id, name, created_at FROM subcategories \
                     WHERE user_id = ? AND category_id = ? ORDER BY created_at ASC",
                )
                .bind(self.user_id())
                .bind(cid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, category_id, name, created_at FROM subcategories \
                     WHERE user_id = ? ORDER BY created_at ASC",
                )
                .bind(self.user_id())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(subcategory_from_row).collect())
    }

    pub async fn get_category(&self, id: &str) -> Result<Option<Category>> {
        Ok(self
            .list_categories()
            .await?
            .into_iter()
            .find(|c| c.id == id))
    }

    pub async fn get_subcategory(&self, id: &str) -> Result<Option<Subcategory>> {
        let row = sqlx::query(
            "SELECT id, category_id, name, created_at FROM subcategories \
             WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(self.user_id())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(subcategory_from_row))
    }

    pub async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let sql = format!(
            "SELECT {} FROM notes n WHERE n.id = ? AND n.user_id = ?",
            NOTE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(self.user_id())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(note_from_row).transpose()
    }

    async fn notes_in_category(&self, category_id: &str) -> Result<Vec<Note>> {
        let sql = format!(
            "SELECT {} FROM notes n JOIN subcategories s ON s.id = n.subcategory_id \
             WHERE n.user_id = ? AND s.category_id = ? ORDER BY n.updated_at DESC",
            NOTE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.user_id())
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(note_from_row).collect()
    }
}

fn subcategory_from_row(row: &SqliteRow) -> Subcategory {
    Subcategory {
        id: row.get("id"),
        name: row.get("name"),
        category_id: row.get("category_id"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn note_from_row(row: &SqliteRow) -> Result<Note> {
    let tags_json: String = row.get("tags_json");
    let images_json: String = row.get("images_json");
    Ok(Note {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        subcategory_id: row.get("subcategory_id"),
        tags: serde_json::from_str(&tags_json)?,
        images: serde_json::from_str(&images_json)?,
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

#[async_trait]
impl Backend for HostedBackend {
    fn kind(&self) -> DataSource {
        DataSource::Hosted
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, name, color, created_at FROM categories \
             WHERE user_id = ? ORDER BY created_at ASC",
        )
        .bind(self.user_id())
        .fetch_all(&self.pool)
        .await?;

        let mut subcategories = self.list_subcategories(None).await?;
        let categories = rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut subcategories)
                    .into_iter()
                    .partition(|s| s.category_id == id);
                subcategories = rest;
                Category {
                    id,
                    name: row.get("name"),
                    color: row.get("color"),
                    subcategories: mine,
                    created_at: from_millis(row.get("created_at")),
                }
            })
            .collect();
        Ok(categories)
    }

    async fn create_category(&self, name: &str, color: &str) -> Result<Category> {
        let id = new_id();
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO categories (id, user_id, name, color, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(self.user_id())
        .bind(name)
        .bind(color)
        .bind(now)
        .execute(&self.pool)
        .await?;
        debug!(id = %id, owner = self.user_id(), "hosted: created category");

        Ok(Category {
            id,
            name: name.to_string(),
            color: color.to_string(),
            subcategories: Vec::new(),
            created_at: from_millis(now),
        })
    }

    async fn update_category(&self, id: &str, patch: &CategoryPatch) -> Result<()> {
        sqlx::query(
            "UPDATE categories SET name = COALESCE(?, name), color = COALESCE(?, color) \
             WHERE id = ? AND user_id = ?",
        )
        .bind(patch.name.as_deref())
        .bind(patch.color.as_deref())
        .bind(id)
        .bind(self.user_id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_category(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM notes WHERE user_id = ? AND subcategory_id IN \
             (SELECT id FROM subcategories WHERE category_id = ? AND user_id = ?)",
        )
        .bind(self.user_id())
        .bind(id)
        .bind(self.user_id())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM subcategories WHERE category_id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM categories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(id, owner = self.user_id(), "hosted: deleted category");
        Ok(())
    }

    async fn create_subcategory(&self, category_id: &str, name: &str) -> Result<Subcategory> {
        let parent: Option<String> =
            sqlx::query_scalar("SELECT id FROM categories WHERE id = ? AND user_id = ?")
                .bind(category_id)
                .bind(self.user_id())
                .fetch_optional(&self.pool)
                .await?;
        if parent.is_none() {
            return Err(NoteError::not_found("category", category_id));
        }

        let id = new_id();
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO subcategories (id, user_id, category_id, name, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(self.user_id())
        .bind(category_id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Subcategory {
            id,
            name: name.to_string(),
            category_id: category_id.to_string(),
            created_at: from_millis(now),
        })
    }

    async fn update_subcategory(&self, id: &str, patch: &SubcategoryPatch) -> Result<()> {
        sqlx::query(
            "UPDATE subcategories SET name = COALESCE(?, name) WHERE id = ? AND user_id = ?",
        )
        .bind(patch.name.as_deref())
        .bind(id)
        .bind(self.user_id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subcategory(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM notes WHERE subcategory_id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM subcategories WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_notes(&self) -> Result<Vec<Note>> {
        let sql = format!(
            "SELECT {} FROM notes n WHERE n.user_id = ? ORDER BY n.updated_at DESC",
            NOTE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(self.user_id())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(note_from_row).collect()
    }

    async fn create_note(&self, new: &NewNote) -> Result<Note> {
        let owned: Option<String> =
            sqlx::query_scalar("SELECT id FROM subcategories WHERE id = ? AND user_id = ?")
                .bind(&new.subcategory_id)
                .bind(self.user_id())
                .fetch_optional(&self.pool)
                .await?;
        if owned.is_none() {
            return Err(NoteError::not_found("subcategory", new.subcategory_id.clone()));
        }

        let now = from_millis(Utc::now().timestamp_millis());
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

        sqlx::query(
            "INSERT INTO notes (id, user_id, subcategory_id, title, content, tags_json, \
             images_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&note.id)
        .bind(self.user_id())
        .bind(&note.subcategory_id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(serde_json::to_string(&note.tags)?)
        .bind(serde_json::to_string(&note.images)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;
        debug!(id = %note.id, owner = self.user_id(), "hosted: created note");

        Ok(note)
    }

    async fn update_note(&self, id: &str, patch: &NotePatch) -> Result<()> {
        let mut note = match self.get_note(id).await? {
            Some(n) => n,
            None => return Ok(()),
        };
        let previous = note.updated_at.timestamp_millis();
        if !note.apply(patch) {
            return Ok(());
        }
        // Stored at millisecond precision, so step at least one millisecond.
        let updated = Utc::now().timestamp_millis().max(previous + 1);

        sqlx::query(
            "UPDATE notes SET title = ?, content = ?, tags_json = ?, images_json = ?, \
             updated_at = ? WHERE id = ? AND user_id = ?",
        )
        .bind(&note.title)
        .bind(&note.content)
        .bind(serde_json::to_string(&note.tags)?)
        .bind(serde_json::to_string(&note.images)?)
        .bind(updated)
        .bind(id)
        .bind(self.user_id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_note(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM notes WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upload_image(&self, image: &ImageUpload) -> Result<String> {
        let key = object_key(self.user_id(), &image.file_name);
        let url = self
            .bucket
            .put(&key, &image.content_type, &image.bytes)
            .await?;
        debug!(key = %key, bytes = image.bytes.len(), "hosted: uploaded image");
        Ok(url)
    }

    async fn delete_image(&self, reference: &str) -> Result<()> {
        if let Some(key) = self.bucket.key_for_url(reference) {
            if !key.starts_with(&format!("{}/", self.user_id())) {
                return Err(NoteError::not_found("image", reference));
            }
        }
        self.bucket.delete_url(reference).await
    }

    async fn search_notes(&self, query: &SearchQuery) -> Result<Vec<Note>> {
        let candidates = match &query.category_id {
            Some(cid) => self.notes_in_category(cid).await?,
            None => self.list_notes().await?,
        };
        Ok(candidates
            .into_iter()
            .filter(|n| search::matches_query(n, &query.text))
            .collect())
    }
}
