//! # notekeeper
//!
//! The data layer of a personal note-taking application: categories hold
//! subcategories, subcategories hold notes, notes carry tags and images.
//! Everything is persisted through one of three interchangeable backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐
//! │    CLI     │──▶│  NoteStore   │──▶│ DataSourceSelector   │
//! │   (nk)     │   │ (cache)     │   │ local/hosted/rest    │
//! └────────────┘   └─────────────┘   └──────────┬───────────┘
//!                                               │
//!              ┌────────────────────┬───────────┴─────────┐
//!              ▼                    ▼                     ▼
//!        ┌──────────┐        ┌────────────┐        ┌───────────┐
//!        │ LocalKv  │        │ SQLite +   │        │ HTTP API  │
//!        │ files    │        │ bucket     │        │ (nk serve)│
//!        └──────────┘        └────────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nk init --sample
//! nk category list
//! nk note add --subcategory Meetings --title "Standup" --tag daily
//! nk search standup
//! nk serve                      # REST API for the rest backend
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Category, subcategory, note, and patch types |
//! | [`backend`] | The `Backend` trait and its local, hosted, and REST variants |
//! | [`selector`] | Active data-source selection |
//! | [`store`] | Cached categories and notes, validation, image flow |
//! | [`selection`] | Current category/subcategory/note selection |
//! | [`auth`] | Ordered authentication strategies and sessions |
//! | [`app`] | Explicit bootstrap of all state containers |
//! | [`search`] | Substring search and tag helpers |
//! | [`images`] | Upload validation and data URLs |
//! | [`kv`] | File-backed key/value store |
//! | [`bucket`] | Directory and S3 image buckets |
//! | [`server`] | REST API server |
//! | [`api`] | Wire types shared by server and client |
//! | [`accounts`] | Server-side users and sessions |
//! | [`config`] | TOML configuration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | Tracing subscriber setup |
//! | [`sample`] | Sample content |

pub mod accounts;
pub mod api;
pub mod app;
pub mod auth;
pub mod backend;
pub mod bucket;
pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod kv;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod sample;
pub mod search;
pub mod selection;
pub mod selector;
pub mod server;
pub mod store;
