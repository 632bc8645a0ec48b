//! # docharbor
//!
//! A self-hosted documentation publishing service for versioned doc sets.
//!
//! docharbor ingests the JSON-builder output of static site generators
//! (one `.fjson` document per page plus a `globalcontext.json` metadata
//! file, e.g. `sphinx-build -b json`), stores pages, images, and navigation
//! metadata in SQLite, and serves everything back through a CLI and an
//! authenticated JSON HTTP API with full-text search and faceted filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Doc bundle  │──▶│   Importer   │──▶│   SQLite   │
//! │ zip or dir  │   │ rewrite+link │   │ FTS5+media │
//! └─────────────┘   └──────────────┘   └────┬───────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │  (dock)  │       │  (REST)  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dock init                                # create database
//! dock project add my-project "My Project" # register a project
//! dock import build/mydocs.zip             # import a doc bundle
//! dock search "configuration" --latest
//! dock serve                               # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and version ordering |
//! | [`importer`] | Doc bundle import pipeline |
//! | [`rewrite`] | HTML body rewriting and text extraction |
//! | [`toc`] | Page tree and global table-of-contents reconstruction |
//! | [`classifiers`] | Hierarchical project classifiers |
//! | [`projects`] | Project and version management |
//! | [`search`] | Full-text search with facets |
//! | [`get`] | Page retrieval |
//! | [`server`] | JSON HTTP API |
//! | [`stats`] | Database statistics |
//! | [`media`] | Image file storage |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classifiers;
pub mod config;
pub mod db;
pub mod get;
pub mod importer;
pub mod media;
pub mod migrate;
pub mod models;
pub mod projects;
pub mod rewrite;
pub mod search;
pub mod server;
pub mod stats;
pub mod toc;
