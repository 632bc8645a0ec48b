//! Page retrieval.
//!
//! Fetches one page of a version along with its navigation neighbors.
//! Used by both the `dock get` CLI command and the pages API endpoint.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::Page;
use crate::projects;

/// A navigation reference to another page of the same version.
#[derive(Debug, Clone, Serialize)]
pub struct PageRef {
    pub path: String,
    pub title: String,
}

/// Full page detail as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PageResponse {
    pub project: String,
    pub version: String,
    pub path: String,
    pub title: String,
    pub body: String,
    pub local_toc: Option<String>,
    pub searchable: bool,
    pub parent: Option<PageRef>,
    pub prev: Option<PageRef>,
    pub next: Option<PageRef>,
}

async fn page_ref(pool: &SqlitePool, page_id: &str) -> Result<Option<PageRef>> {
    let row = sqlx::query("SELECT relative_path, title FROM pages WHERE id = ?")
        .bind(page_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| PageRef {
        path: row.get("relative_path"),
        title: row.get("title"),
    }))
}

pub async fn get_page(
    pool: &SqlitePool,
    machine_name: &str,
    version: &str,
    path: &str,
) -> Result<Option<PageResponse>> {
    let Some(project) = projects::get_project(pool, machine_name).await? else {
        return Ok(None);
    };
    let Some(found) = projects::get_version(pool, &project.id, version).await? else {
        return Ok(None);
    };

    let path = path.trim_matches('/');
    let row = sqlx::query(
        "SELECT id, title, body, local_toc, searchable, parent_id, next_page_id \
         FROM pages WHERE version_id = ? AND relative_path = ?",
    )
    .bind(&found.id)
    .bind(path)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let page = Page {
        id: row.get("id"),
        version_id: found.id,
        relative_path: path.to_string(),
        title: row.get("title"),
        body: row.get("body"),
        local_toc: row.get("local_toc"),
        searchable: row.get("searchable"),
        parent_id: row.get("parent_id"),
        next_page_id: row.get("next_page_id"),
    };

    let parent = match page.parent_id.as_deref() {
        Some(id) => page_ref(pool, id).await?,
        None => None,
    };
    let next = match page.next_page_id.as_deref() {
        Some(id) => page_ref(pool, id).await?,
        None => None,
    };

    // The bundle only records forward links; previous is the inverse.
    let prev_row = sqlx::query(
        "SELECT relative_path, title FROM pages WHERE version_id = ? AND next_page_id = ?",
    )
    .bind(&page.version_id)
    .bind(&page.id)
    .fetch_optional(pool)
    .await?;
    let prev = prev_row.map(|row| PageRef {
        path: row.get("relative_path"),
        title: row.get("title"),
    });

    Ok(Some(PageResponse {
        project: machine_name.to_string(),
        version: version.to_string(),
        path: page.relative_path,
        title: page.title,
        body: page.body,
        local_toc: page.local_toc,
        searchable: page.searchable,
        parent,
        prev,
        next,
    }))
}

/// CLI entry point for `dock get`.
pub async fn run_get(config: &Config, machine_name: &str, version: &str, path: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let page = get_page(&pool, machine_name, version, path).await?;
    pool.close().await;

    let Some(page) = page else {
        bail!("page not found: {} {} {}", machine_name, version, path);
    };

    println!("--- Page ---");
    println!("project:  {}", page.project);
    println!("version:  {}", page.version);
    println!("path:     {}", page.path);
    println!("title:    {}", page.title);
    if let Some(parent) = &page.parent {
        println!("parent:   {} [{}]", parent.title, parent.path);
    }
    if let Some(prev) = &page.prev {
        println!("prev:     {} [{}]", prev.title, prev.path);
    }
    if let Some(next) = &page.next {
        println!("next:     {} [{}]", next.title, next.path);
    }
    println!();

    if let Some(toc) = &page.local_toc {
        println!("--- Contents ---");
        println!("{}", toc);
        println!();
    }

    println!("--- Body ---");
    println!("{}", page.body);

    Ok(())
}
