//! # notekeeper CLI (`nk`)
//!
//! ## Usage
//!
//! ```bash
//! nk --config ./config/nk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nk init [--sample]` | Prepare storage, optionally seed sample content |
//! | `nk category list\|add\|rename\|recolor\|delete` | Manage categories |
//! | `nk subcategory add\|rename\|delete` | Manage subcategories |
//! | `nk note list\|show\|add\|edit\|delete\|attach\|detach` | Manage notes and images |
//! | `nk tags` | All tags in use |
//! | `nk search "<query>"` | Substring search over notes |
//! | `nk source show\|use\|toggle` | Inspect or switch the data source |
//! | `nk login` / `nk logout` / `nk register` | Authentication |
//! | `nk select` | Show or change the current selection |
//! | `nk serve` | Run the REST API server |
//!
//! Categories and subcategories can be referred to by id or by name.
//! Failures print a single `error[<kind>]: <message>` line and exit 1.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use notekeeper::app::App;
use notekeeper::backend::DataSource;
use notekeeper::config;
use notekeeper::error::NoteError;
use notekeeper::images::ImageUpload;
use notekeeper::models::{CategoryPatch, NewNote, Note, NotePatch, SearchQuery, SubcategoryPatch};
use notekeeper::store::NoteStore;
use notekeeper::{logging, sample, server};

const DEFAULT_COLOR: &str = "#6b7280";

/// notekeeper: categories, subcategories, and notes stored locally, in a
/// hosted database, or behind a REST API.
#[derive(Parser)]
#[command(name = "nk", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nk.toml")]
    config: PathBuf,

    /// Data source for this invocation: local, hosted, or rest.
    #[arg(long, global = true)]
    source: Option<DataSource>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare storage for the active data source.
    Init {
        /// Seed Work, Personal, and Learning sample content.
        #[arg(long)]
        sample: bool,
    },

    /// Manage categories.
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },

    /// Manage subcategories.
    Subcategory {
        #[command(subcommand)]
        action: SubcategoryAction,
    },

    /// Manage notes.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// List every tag in use.
    Tags,

    /// Search note titles, content, and tags.
    Search {
        query: String,

        /// Restrict to one category (id or name).
        #[arg(long)]
        category: Option<String>,

        /// Ask the backend instead of filtering the loaded notes.
        #[arg(long)]
        remote: bool,

        /// Maximum results (remote REST search only).
        #[arg(long)]
        limit: Option<u32>,

        /// Results to skip (remote REST search only).
        #[arg(long)]
        offset: Option<u32>,
    },

    /// Inspect or switch the data source.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Log in through the configured authentication chain.
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the current session.
    Logout,

    /// Create a user (local by default, on the REST server with --remote).
    Register {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        remote: bool,
    },

    /// Show or change the current selection.
    Select {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        search: Option<String>,
        /// Comma-separated tag filter.
        #[arg(long)]
        tags: Option<String>,
        /// Clear everything first.
        #[arg(long)]
        clear: bool,
    },

    /// Run the REST API server from the `[server]` section.
    Serve,
}

#[derive(Subcommand)]
enum CategoryAction {
    /// Print the category tree.
    List,
    Add {
        name: String,
        #[arg(long, default_value = DEFAULT_COLOR)]
        color: String,
    },
    Rename {
        category: String,
        name: String,
    },
    Recolor {
        category: String,
        color: String,
    },
    /// Delete a category with its subcategories and notes.
    Delete { category: String },
}

#[derive(Subcommand)]
enum SubcategoryAction {
    Add { category: String, name: String },
    Rename { subcategory: String, name: String },
    /// Delete a subcategory with its notes.
    Delete { subcategory: String },
}

#[derive(Subcommand)]
enum NoteAction {
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        /// Match any of these tags (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Show {
        id: String,
    },
    Add {
        /// Subcategory (id or name).
        #[arg(long)]
        subcategory: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        /// Replace the tags with this comma-separated list.
        #[arg(long)]
        tags: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Upload an image file and attach it.
    Attach {
        id: String,
        path: PathBuf,
    },
    /// Remove an attached image.
    Detach {
        id: String,
        reference: String,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    Show,
    /// Switch to a data source and remember it.
    Use { source: DataSource },
    /// Flip between local and hosted storage.
    Toggle,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<NoteError>() {
                Some(note_err) => eprintln!("{}", note_err.notification()),
                None => eprintln!("error[configuration]: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let mut app = App::bootstrap(cfg, cli.source).await?;

    match cli.command {
        Commands::Init { sample } => init(&mut app, sample).await?,
        Commands::Category { action } => category(&mut app, action).await?,
        Commands::Subcategory { action } => subcategory(&mut app, action).await?,
        Commands::Note { action } => note(&mut app, action).await?,
        Commands::Tags => {
            app.load().await?;
            for tag in app.store.all_tags() {
                println!("{}", tag);
            }
        }
        Commands::Search {
            query,
            category,
            remote,
            limit,
            offset,
        } => {
            app.load().await?;
            let category_id = match &category {
                Some(c) => Some(category_id(&app.store, c)?),
                None => None,
            };
            let hits: Vec<Note> = if remote {
                let mut q = SearchQuery::new(query);
                q.category_id = category_id;
                q.limit = limit;
                q.offset = offset;
                app.store.remote_search(&q).await?
            } else {
                app.store
                    .search(&query, category_id.as_deref())
                    .into_iter()
                    .cloned()
                    .collect()
            };
            print_notes(&hits);
        }
        Commands::Source { action } => source(&mut app, action).await?,
        Commands::Login { username, password } => {
            let session = app.authenticator().login(&username, &password).await?;
            println!(
                "Logged in as {} (via {}).",
                session.username, session.strategy
            );
        }
        Commands::Logout => {
            if let Some(rest) = app.rest() {
                if rest.token()?.is_some() {
                    if let Err(e) = rest.logout().await {
                        tracing::warn!(error = %e, "server logout failed");
                    }
                }
            }
            app.authenticator().logout()?;
            println!("Logged out.");
        }
        Commands::Register {
            username,
            password,
            email,
            remote,
        } => {
            if remote {
                let rest = app.rest().ok_or_else(|| {
                    NoteError::config("set [rest].base_url to register on the server")
                })?;
                let payload = rest.register(&username, &email, &password).await?;
                println!("Registered {} on {}.", payload.user.username, rest.base_url());
            } else {
                let user = app.local_users().register(&username, &email, &password)?;
                println!("Registered local user {} ({}).", user.username, user.id);
            }
        }
        Commands::Select {
            category,
            subcategory,
            note,
            search,
            tags,
            clear,
        } => {
            app.load().await?;
            if clear {
                app.selection.clear()?;
            }
            let path = selection_path(
                &app.store,
                category.as_deref(),
                subcategory.as_deref(),
                note.as_deref(),
            )?;
            if let Some((category_id, subcategory_id, note_id)) = path {
                app.selection.select_category(Some(category_id))?;
                if subcategory_id.is_some() {
                    app.selection.select_subcategory(subcategory_id)?;
                }
                if note_id.is_some() {
                    app.selection.select_note(note_id)?;
                }
            }
            if let Some(q) = search {
                app.selection.set_search_query(q)?;
            }
            if let Some(t) = tags {
                app.selection.set_selected_tags(split_tags(&t))?;
            }
            println!("{}", serde_json::to_string_pretty(app.selection.current())?);
        }
        // Handled before bootstrap.
        Commands::Serve => {}
    }

    Ok(())
}

async fn init(app: &mut App, with_sample: bool) -> anyhow::Result<()> {
    app.load().await?;
    println!("Storage ready ({}).", app.store.active_source());
    if with_sample {
        if !app.store.categories().is_empty() {
            return Err(NoteError::validation(
                "refusing to seed sample data: storage already has categories",
            )
            .into());
        }
        let (categories, notes) = sample::seed(&mut app.store).await?;
        println!("Seeded {} categories and {} notes.", categories, notes);
    }
    Ok(())
}

async fn category(app: &mut App, action: CategoryAction) -> anyhow::Result<()> {
    app.load().await?;
    let store = &mut app.store;
    match action {
        CategoryAction::List => {
            for c in store.categories() {
                println!("{}  {} ({})", c.id, c.name, c.color);
                for s in &c.subcategories {
                    let count = store.notes_by_subcategory(&s.id).len();
                    println!("  {}  {} [{} notes]", s.id, s.name, count);
                }
            }
        }
        CategoryAction::Add { name, color } => {
            let c = store.add_category(&name, &color).await?;
            println!("{}", c.id);
        }
        CategoryAction::Rename { category, name } => {
            let id = category_id(store, &category)?;
            let patch = CategoryPatch {
                name: Some(name),
                ..Default::default()
            };
            store.update_category(&id, patch).await?;
        }
        CategoryAction::Recolor { category, color } => {
            let id = category_id(store, &category)?;
            let patch = CategoryPatch {
                color: Some(color),
                ..Default::default()
            };
            store.update_category(&id, patch).await?;
        }
        CategoryAction::Delete { category } => {
            let id = category_id(store, &category)?;
            store.delete_category(&id).await?;
            if app.selection.current().selected_category_id.as_deref() == Some(id.as_str()) {
                app.selection.select_category(None)?;
            }
        }
    }
    Ok(())
}

async fn subcategory(app: &mut App, action: SubcategoryAction) -> anyhow::Result<()> {
    app.load().await?;
    let store = &mut app.store;
    match action {
        SubcategoryAction::Add { category, name } => {
            let parent = category_id(store, &category)?;
            let s = store.add_subcategory(&parent, &name).await?;
            println!("{}", s.id);
        }
        SubcategoryAction::Rename { subcategory, name } => {
            let id = subcategory_id(store, &subcategory)?;
            let patch = SubcategoryPatch { name: Some(name) };
            store.update_subcategory(&id, patch).await?;
        }
        SubcategoryAction::Delete { subcategory } => {
            let id = subcategory_id(store, &subcategory)?;
            store.delete_subcategory(&id).await?;
            if app.selection.current().selected_subcategory_id.as_deref() == Some(id.as_str()) {
                app.selection.select_subcategory(None)?;
            }
        }
    }
    Ok(())
}

async fn note(app: &mut App, action: NoteAction) -> anyhow::Result<()> {
    app.load().await?;
    let store = &mut app.store;
    match action {
        NoteAction::List {
            category,
            subcategory,
            tags,
        } => {
            let mut notes: Vec<&Note> = match (&subcategory, &category) {
                (Some(s), _) => store.notes_by_subcategory(&subcategory_id(store, s)?),
                (None, Some(c)) => store.notes_by_category(&category_id(store, c)?),
                (None, None) => store.notes().iter().collect(),
            };
            if !tags.is_empty() {
                notes.retain(|n| tags.iter().any(|t| n.tags.contains(t)));
            }
            let owned: Vec<Note> = notes.into_iter().cloned().collect();
            print_notes(&owned);
        }
        NoteAction::Show { id } => {
            let note = store
                .note(&id)
                .ok_or_else(|| NoteError::not_found("note", id.clone()))?;
            println!("{}", serde_json::to_string_pretty(note)?);
        }
        NoteAction::Add {
            subcategory,
            title,
            content,
            tags,
        } => {
            let subcategory_id = subcategory_id(store, &subcategory)?;
            let note = store
                .add_note(NewNote {
                    title,
                    content,
                    subcategory_id,
                    tags,
                    images: Vec::new(),
                })
                .await?;
            println!("{}", note.id);
        }
        NoteAction::Edit {
            id,
            title,
            content,
            tags,
        } => {
            let patch = NotePatch {
                title,
                content,
                tags: tags.as_deref().map(split_tags),
                images: None,
            };
            if patch.is_empty() {
                return Err(NoteError::validation(
                    "nothing to change: pass --title, --content, or --tags",
                )
                .into());
            }
            if store.note(&id).is_none() {
                return Err(NoteError::not_found("note", id).into());
            }
            store.update_note(&id, patch).await?;
        }
        NoteAction::Delete { id } => {
            store.delete_note(&id).await?;
            if app.selection.current().selected_note_id.as_deref() == Some(id.as_str()) {
                app.selection.select_note(None)?;
            }
        }
        NoteAction::Attach { id, path } => {
            let upload = ImageUpload::from_path(&path)?;
            let reference = store.attach_image(&id, &upload).await?;
            println!("{}", reference);
        }
        NoteAction::Detach { id, reference } => {
            store.detach_image(&id, &reference).await?;
        }
    }
    Ok(())
}

async fn source(app: &mut App, action: SourceAction) -> anyhow::Result<()> {
    match action {
        SourceAction::Show => {
            let selector = app.store.selector();
            println!("active: {}", selector.active());
            let available: Vec<&str> = selector.available().iter().map(|s| s.as_str()).collect();
            println!("available: {}", available.join(", "));
        }
        SourceAction::Use { source } => {
            app.store.switch_source(source).await?;
            app.remember_source()?;
            println!("Now using {} storage.", source);
        }
        SourceAction::Toggle => {
            let kind = app.store.toggle_source().await?;
            app.remember_source()?;
            println!("Now using {} storage.", kind);
        }
    }
    Ok(())
}

type SelectionPath = (String, Option<String>, Option<String>);

/// Resolve the requested selection levels, filling in parents of the lowest
/// level given. Levels that contradict each other are rejected.
fn selection_path(
    store: &NoteStore,
    category: Option<&str>,
    subcategory: Option<&str>,
    note: Option<&str>,
) -> Result<Option<SelectionPath>, NoteError> {
    let note_id = match note {
        Some(n) => match store.note(n) {
            Some(found) => Some((found.id.clone(), found.subcategory_id.clone())),
            None => return Err(NoteError::not_found("note", n)),
        },
        None => None,
    };

    let mut sub_id = subcategory.map(|s| subcategory_id(store, s)).transpose()?;
    if let Some((_, parent)) = &note_id {
        if sub_id.as_ref().is_some_and(|id| id != parent) {
            return Err(NoteError::validation(format!(
                "note {} is not in subcategory {}",
                note.unwrap_or_default(),
                subcategory.unwrap_or_default()
            )));
        }
        sub_id = Some(parent.clone());
    }

    let mut cat_id = category.map(|c| category_id(store, c)).transpose()?;
    if let Some(sid) = &sub_id {
        let parent = store
            .subcategory(sid)
            .map(|s| s.category_id.clone())
            .ok_or_else(|| NoteError::not_found("subcategory", sid.clone()))?;
        if cat_id.as_ref().is_some_and(|id| *id != parent) {
            return Err(NoteError::validation(format!(
                "subcategory {} is not in category {}",
                subcategory.unwrap_or(sid.as_str()),
                category.unwrap_or_default()
            )));
        }
        cat_id = Some(parent);
    }

    Ok(cat_id.map(|c| (c, sub_id, note_id.map(|(id, _)| id))))
}

fn category_id(store: &NoteStore, key: &str) -> Result<String, NoteError> {
    store
        .categories()
        .iter()
        .find(|c| c.id == key)
        .or_else(|| {
            store
                .categories()
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(key))
        })
        .map(|c| c.id.clone())
        .ok_or_else(|| NoteError::not_found("category", key))
}

fn subcategory_id(store: &NoteStore, key: &str) -> Result<String, NoteError> {
    let all = || store.categories().iter().flat_map(|c| c.subcategories.iter());
    all()
        .find(|s| s.id == key)
        .or_else(|| all().find(|s| s.name.eq_ignore_ascii_case(key)))
        .map(|s| s.id.clone())
        .ok_or_else(|| NoteError::not_found("subcategory", key))
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_notes(notes: &[Note]) {
    if notes.is_empty() {
        println!("No notes.");
        return;
    }
    for n in notes {
        let tags = if n.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", n.tags.join(", "))
        };
        println!(
            "{}  {}  {}{}",
            n.id,
            n.updated_at.format("%Y-%m-%d %H:%M"),
            n.title,
            tags
        );
    }
}
