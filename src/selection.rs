//! Current navigation state: which category, subcategory, and note are
//! selected, plus the search text and tag filter.
//!
//! Selecting a level clears everything below it. With persistence enabled the
//! state is written to `noteapp_state` after every change.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::kv::{keys, LocalKv};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub selected_category_id: Option<String>,
    #[serde(default)]
    pub selected_subcategory_id: Option<String>,
    #[serde(default)]
    pub selected_note_id: Option<String>,
    #[serde(default)]
    pub search_query: String,
    #[serde(default)]
    pub selected_tags: Vec<String>,
}

pub struct SelectionState {
    current: Selection,
    kv: Option<LocalKv>,
}

impl SelectionState {
    /// Transient state that is never written anywhere.
    pub fn transient() -> Self {
        Self {
            current: Selection::default(),
            kv: None,
        }
    }

    /// State restored from (and saved to) the local key/value store.
    /// An unreadable saved state starts fresh.
    pub fn persistent(kv: LocalKv) -> Self {
        let current = match kv.get_json::<Selection>(keys::APP_STATE) {
            Ok(Some(s)) => s,
            Ok(None) => Selection::default(),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable saved selection");
                Selection::default()
            }
        };
        Self {
            current,
            kv: Some(kv),
        }
    }

    pub fn current(&self) -> &Selection {
        &self.current
    }

    fn save(&self) -> Result<()> {
        match &self.kv {
            Some(kv) => kv.set_json(keys::APP_STATE, &self.current),
            None => Ok(()),
        }
    }

    pub fn select_category(&mut self, id: Option<String>) -> Result<()> {
        self.current.selected_category_id = id;
        self.current.selected_subcategory_id = None;
        self.current.selected_note_id = None;
        self.save()
    }

    pub fn select_subcategory(&mut self, id: Option<String>) -> Result<()> {
        self.current.selected_subcategory_id = id;
        self.current.selected_note_id = None;
        self.save()
    }

    pub fn select_note(&mut self, id: Option<String>) -> Result<()> {
        self.current.selected_note_id = id;
        self.save()
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) -> Result<()> {
        self.current.search_query = query.into();
        self.save()
    }

    pub fn set_selected_tags(&mut self, tags: Vec<String>) -> Result<()> {
        self.current.selected_tags = tags;
        self.save()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.current = Selection::default();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn selecting_category_clears_lower_levels() {
        let mut state = SelectionState::transient();
        state.select_category(Some("work".into())).unwrap();
        state.select_subcategory(Some("meetings".into())).unwrap();
        state.select_note(Some("standup".into())).unwrap();

        state.select_category(Some("personal".into())).unwrap();
        let s = state.current();
        assert_eq!(s.selected_category_id.as_deref(), Some("personal"));
        assert_eq!(s.selected_subcategory_id, None);
        assert_eq!(s.selected_note_id, None);
    }

    #[test]
    fn selecting_subcategory_clears_note_only() {
        let mut state = SelectionState::transient();
        state.select_category(Some("work".into())).unwrap();
        state.select_subcategory(Some("meetings".into())).unwrap();
        state.select_note(Some("standup".into())).unwrap();

        state.select_subcategory(Some("projects".into())).unwrap();
        let s = state.current();
        assert_eq!(s.selected_category_id.as_deref(), Some("work"));
        assert_eq!(s.selected_note_id, None);
    }

    #[test]
    fn search_and_tags_survive_navigation() {
        let mut state = SelectionState::transient();
        state.set_search_query("agenda").unwrap();
        state.set_selected_tags(vec!["team".into()]).unwrap();
        state.select_category(Some("work".into())).unwrap();
        assert_eq!(state.current().search_query, "agenda");
        assert_eq!(state.current().selected_tags, vec!["team"]);
        state.clear().unwrap();
        assert_eq!(state.current(), &Selection::default());
    }

    #[test]
    fn persistent_state_reloads() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        {
            let mut state = SelectionState::persistent(kv.clone());
            state.select_category(Some("work".into())).unwrap();
            state.select_subcategory(Some("meetings".into())).unwrap();
        }
        let state = SelectionState::persistent(kv);
        assert_eq!(
            state.current().selected_subcategory_id.as_deref(),
            Some("meetings")
        );
    }

    #[test]
    fn corrupt_saved_state_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let kv = LocalKv::open(tmp.path()).unwrap();
        kv.set(keys::APP_STATE, "{not json").unwrap();
        let state = SelectionState::persistent(kv);
        assert_eq!(state.current(), &Selection::default());
    }
}
