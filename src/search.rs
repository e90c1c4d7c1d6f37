//! Pure note queries shared by the store cache and the backends.
//!
//! Matching is a case-insensitive substring test over a note's title,
//! content, and tags. There is no ranking; results keep input order.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Category, Note};

/// Whether `note` matches `query` (already lowercased).
fn matches_lowered(note: &Note, query: &str) -> bool {
    note.title.to_lowercase().contains(query)
        || note.content.to_lowercase().contains(query)
        || note.tags.iter().any(|t| t.to_lowercase().contains(query))
}

/// Case-insensitive substring match over title, content, and tags.
///
/// An empty query matches every note.
pub fn matches_query(note: &Note, query: &str) -> bool {
    matches_lowered(note, &query.to_lowercase())
}

/// Filter `notes` by free text, optionally scoped to one category.
pub fn search_notes<'a>(
    notes: &'a [Note],
    categories: &[Category],
    query: &str,
    category_id: Option<&str>,
) -> Vec<&'a Note> {
    let lowered = query.to_lowercase();
    let scope: Option<Vec<&str>> = category_id.map(|id| subcategory_ids_of(categories, id));
    notes
        .iter()
        .filter(|n| match &scope {
            Some(ids) => ids.contains(&n.subcategory_id.as_str()),
            None => true,
        })
        .filter(|n| matches_lowered(n, &lowered))
        .collect()
}

/// Subcategory ids belonging to `category_id`, empty if the category is unknown.
pub fn subcategory_ids_of<'a>(categories: &'a [Category], category_id: &str) -> Vec<&'a str> {
    categories
        .iter()
        .find(|c| c.id == category_id)
        .map(|c| c.subcategory_ids().collect())
        .unwrap_or_default()
}

pub fn notes_by_subcategory<'a>(notes: &'a [Note], subcategory_id: &str) -> Vec<&'a Note> {
    notes
        .iter()
        .filter(|n| n.subcategory_id == subcategory_id)
        .collect()
}

pub fn notes_by_category<'a>(
    notes: &'a [Note],
    categories: &[Category],
    category_id: &str,
) -> Vec<&'a Note> {
    let ids = subcategory_ids_of(categories, category_id);
    notes
        .iter()
        .filter(|n| ids.contains(&n.subcategory_id.as_str()))
        .collect()
}

/// Notes carrying at least one of `tags` (logical OR, exact match).
pub fn notes_by_tags<'a>(notes: &'a [Note], tags: &[String]) -> Vec<&'a Note> {
    notes
        .iter()
        .filter(|n| tags.iter().any(|t| n.tags.contains(t)))
        .collect()
}

/// Every tag in use, deduplicated and sorted lexicographically.
pub fn all_tags(notes: &[Note]) -> Vec<String> {
    notes
        .iter()
        .flat_map(|n| n.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Usage count per tag, most used first, ties broken alphabetically.
pub fn tag_counts(notes: &[Note]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tag in notes.iter().flat_map(|n| n.tags.iter()) {
        *counts.entry(tag.as_str()).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subcategory;
    use chrono::Utc;

    fn note(id: &str, sub: &str, title: &str, content: &str, tags: &[&str]) -> Note {
        let now = Utc::now();
        Note {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            subcategory_id: sub.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            images: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    fn fixture() -> (Vec<Category>, Vec<Note>) {
        let now = Utc::now();
        let categories = vec![
            Category {
                id: "work".into(),
                name: "Work".into(),
                color: "#3b82f6".into(),
                subcategories: vec![Subcategory {
                    id: "meetings".into(),
                    name: "Meetings".into(),
                    category_id: "work".into(),
                    created_at: now,
                }],
                created_at: now,
            },
            Category {
                id: "home".into(),
                name: "Home".into(),
                color: "#10b981".into(),
                subcategories: vec![Subcategory {
                    id: "ideas".into(),
                    name: "Ideas".into(),
                    category_id: "home".into(),
                    created_at: now,
                }],
                created_at: now,
            },
        ];
        let notes = vec![
            note("n1", "meetings", "Standup", "Blockers: none", &["daily", "team"]),
            note("n2", "ideas", "Garden", "Plant <b>tomatoes</b>", &["outdoor"]),
            note("n3", "meetings", "Retro", "What went well", &["team"]),
        ];
        (categories, notes)
    }

    #[test]
    fn search_matches_title_content_and_tags_case_insensitively() {
        let (cats, notes) = fixture();
        let ids = |v: Vec<&Note>| v.into_iter().map(|n| n.id.clone()).collect::<Vec<_>>();

        assert_eq!(ids(search_notes(&notes, &cats, "STAND", None)), vec!["n1"]);
        assert_eq!(ids(search_notes(&notes, &cats, "tomatoes", None)), vec!["n2"]);
        assert_eq!(ids(search_notes(&notes, &cats, "Dail", None)), vec!["n1"]);
        assert!(search_notes(&notes, &cats, "kubernetes", None).is_empty());
    }

    #[test]
    fn search_respects_category_scope() {
        let (cats, notes) = fixture();
        let hits = search_notes(&notes, &cats, "e", Some("home"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "n2");
        assert!(search_notes(&notes, &cats, "e", Some("missing")).is_empty());
    }

    #[test]
    fn tag_filter_is_logical_or() {
        let (_, notes) = fixture();
        let hits = notes_by_tags(&notes, &["daily".to_string(), "outdoor".to_string()]);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn all_tags_sorted_and_unique() {
        let (_, notes) = fixture();
        assert_eq!(all_tags(&notes), vec!["daily", "outdoor", "team"]);
    }

    #[test]
    fn category_membership_goes_through_subcategories() {
        let (cats, notes) = fixture();
        assert_eq!(notes_by_category(&notes, &cats, "work").len(), 2);
        assert_eq!(notes_by_subcategory(&notes, "ideas").len(), 1);
    }

    #[test]
    fn tag_counts_most_used_first() {
        let (_, notes) = fixture();
        assert_eq!(
            tag_counts(&notes),
            vec![
                ("team".to_string(), 2),
                ("daily".to_string(), 1),
                ("outdoor".to_string(), 1),
            ]
        );
    }
}
