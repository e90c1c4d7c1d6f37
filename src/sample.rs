//! Starter content for `nk init --sample`.

use crate::error::Result;
use crate::models::NewNote;
use crate::store::NoteStore;

struct SampleCategory {
    name: &'static str,
    color: &'static str,
    subcategories: &'static [&'static str],
}

struct SampleNote {
    category: &'static str,
    subcategory: &'static str,
    title: &'static str,
    content: &'static str,
    tags: &'static [&'static str],
}

const CATEGORIES: &[SampleCategory] = &[
    SampleCategory {
        name: "Work",
        color: "#3b82f6",
        subcategories: &["Meetings", "Projects"],
    },
    SampleCategory {
        name: "Personal",
        color: "#10b981",
        subcategories: &["Ideas", "Journal"],
    },
    SampleCategory {
        name: "Learning",
        color: "#f59e0b",
        subcategories: &["Tutorials", "Resources"],
    },
];

const NOTES: &[SampleNote] = &[
    SampleNote {
        category: "Work",
        subcategory: "Meetings",
        title: "Project Planning Meeting",
        content: "<h2>Agenda</h2><ul><li>Scope for the next release</li><li>Owners and deadlines</li></ul>",
        tags: &["planning", "project", "deadline"],
    },
    SampleNote {
        category: "Personal",
        subcategory: "Ideas",
        title: "App Ideas",
        content: "<p>A habit tracker that syncs with the calendar.</p>",
        tags: &["mobile", "apps", "brainstorming"],
    },
    SampleNote {
        category: "Learning",
        subcategory: "Tutorials",
        title: "Rust Ownership Notes",
        content: "<p>Borrow immutably as often as you like, mutably once at a time.</p>",
        tags: &["rust", "development", "best-practices"],
    },
    SampleNote {
        category: "Personal",
        subcategory: "Journal",
        title: "Daily Reflection",
        content: "<p>Finished the migration. Tomorrow: write the release notes.</p>",
        tags: &["reflection", "progress", "goals"],
    },
    SampleNote {
        category: "Learning",
        subcategory: "Resources",
        title: "Useful Development Resources",
        content: "<ul><li>The Rust book</li><li>API design guidelines</li></ul>",
        tags: &["resources", "tools", "development"],
    },
];

/// Create the sample tree through `store`. Returns (categories, notes) created.
pub async fn seed(store: &mut NoteStore) -> Result<(usize, usize)> {
    for category in CATEGORIES {
        let created = store.add_category(category.name, category.color).await?;
        for sub in category.subcategories {
            store.add_subcategory(&created.id, sub).await?;
        }
    }

    let mut notes = 0;
    for note in NOTES {
        let subcategory_id = store
            .categories()
            .iter()
            .filter(|c| c.name == note.category)
            .flat_map(|c| c.subcategories.iter())
            .find(|s| s.name == note.subcategory)
            .map(|s| s.id.clone());
        if let Some(subcategory_id) = subcategory_id {
            store
                .add_note(NewNote {
                    title: note.title.to_string(),
                    content: note.content.to_string(),
                    subcategory_id,
                    tags: note.tags.iter().map(|t| t.to_string()).collect(),
                    images: Vec::new(),
                })
                .await?;
            notes += 1;
        }
    }
    Ok((CATEGORIES.len(), notes))
}
