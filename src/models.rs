//! Core data models: categories, subcategories, notes, and their patches.
//!
//! Serialized field names are snake_case, which is also the REST wire format
//! (`category_id`, `subcategory_id`, `created_at`, `updated_at`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Top-level grouping; carries a display color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub subcategories: Vec<Subcategory>,
    pub created_at: DateTime<Utc>,
}

/// Second-level grouping nested under exactly one [`Category`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: String,
    pub name: String,
    pub category_id: String,
    pub created_at: DateTime<Utc>,
}

/// The primary content unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    /// Opaque rich-text markup.
    pub content: String,
    pub subcategory_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Image references: ids for local storage, URLs for hosted/REST.
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Refresh `updated_at` so that it strictly increases, even if the
    /// wall clock has not advanced since the previous write.
    pub fn touch(&mut self) {
        self.updated_at = next_updated_at(self.updated_at);
    }

    /// Merge a partial update. Returns `false` (and leaves the note alone)
    /// when the patch carries no fields.
    pub fn apply(&mut self, patch: &NotePatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(images) = &patch.images {
            self.images = images.clone();
        }
        self.touch();
        true
    }
}

/// Next `updated_at` value after `previous`: now, or one millisecond past
/// `previous` when the clock has not moved on.
pub fn next_updated_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

impl Category {
    pub fn apply(&mut self, patch: &CategoryPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
    }

    pub fn subcategory_ids(&self) -> impl Iterator<Item = &str> {
        self.subcategories.iter().map(|s| s.id.as_str())
    }
}

impl Subcategory {
    pub fn apply(&mut self, patch: &SubcategoryPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
    }
}

/// Partial update for a category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Partial update for a subcategory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Fields for a new note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub subcategory_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// Partial update for a note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.tags.is_none() && self.images.is_none()
    }
}

/// Parameters for backend search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub category_id: Option<String>,
    /// Honoured by the REST backend only.
    pub limit: Option<u32>,
    /// Honoured by the REST backend only.
    pub offset: Option<u32>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }
}

/// Trim tags, drop empty ones, and remove duplicates keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || out.iter().any(|t| t == trimmed) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Convert epoch milliseconds (as stored in SQL) to a UTC timestamp.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
