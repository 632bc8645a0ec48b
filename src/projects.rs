//! Project and version management.
//!
//! Projects are registered before any documentation can be imported for
//! them; the importer refuses bundles for unknown projects. Core functions
//! take a pool so the HTTP server can reuse them; `run_*` functions wrap
//! them for the CLI.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::media;
use crate::models::{valid_machine_name, Project, RelatedLink, Version};

pub fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        machine_name: row.get("machine_name"),
        title: row.get("title"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub fn version_from_row(row: &sqlx::sqlite::SqliteRow) -> Version {
    Version {
        id: row.get("id"),
        project_id: row.get("project_id"),
        version: row.get("version"),
        generator_version: row.get("generator_version"),
        head_page_id: row.get("head_page_id"),
        global_toc: row.get("global_toc"),
        is_latest: row.get("is_latest"),
        archived: row.get("archived"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn get_project(pool: &SqlitePool, machine_name: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT * FROM projects WHERE machine_name = ?")
        .bind(machine_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(project_from_row))
}

pub async fn create_project(
    pool: &SqlitePool,
    machine_name: &str,
    title: &str,
    description: Option<&str>,
) -> Result<Project> {
    if !valid_machine_name(machine_name) {
        bail!(
            "invalid machine name: {} (letters, digits, '-', '_', '.' only)",
            machine_name
        );
    }
    if title.trim().is_empty() {
        bail!("project title must not be empty");
    }
    if get_project(pool, machine_name).await?.is_some() {
        bail!("project already exists: {}", machine_name);
    }

    let now = Utc::now().timestamp();
    let project = Project {
        id: Uuid::new_v4().to_string(),
        machine_name: machine_name.to_string(),
        title: title.trim().to_string(),
        description: description.map(|d| d.to_string()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO projects (id, machine_name, title, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&project.id)
    .bind(&project.machine_name)
    .bind(&project.title)
    .bind(&project.description)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(pool)
    .await?;

    Ok(project)
}

/// List projects, optionally filtered by classifier name (substring match)
/// and/or a title/machine-name substring.
pub async fn list_projects(
    pool: &SqlitePool,
    classifier: Option<&str>,
    q: Option<&str>,
) -> Result<Vec<Project>> {
    let rows = match classifier {
        Some(name) => {
            sqlx::query(
                r#"
                SELECT DISTINCT p.* FROM projects p
                JOIN project_classifiers pc ON pc.project_id = p.id
                JOIN classifiers c ON c.id = pc.classifier_id
                WHERE c.name LIKE '%' || ? || '%'
                ORDER BY p.machine_name
                "#,
            )
            .bind(name)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM projects ORDER BY machine_name")
                .fetch_all(pool)
                .await?
        }
    };

    let mut projects: Vec<Project> = rows.iter().map(project_from_row).collect();
    if let Some(q) = q {
        let needle = q.to_lowercase();
        projects.retain(|p| {
            p.machine_name.to_lowercase().contains(&needle)
                || p.title.to_lowercase().contains(&needle)
        });
    }
    Ok(projects)
}

pub async fn update_project(
    pool: &SqlitePool,
    machine_name: &str,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<Project> {
    let Some(mut project) = get_project(pool, machine_name).await? else {
        bail!("project not found: {}", machine_name);
    };

    if let Some(title) = title {
        if title.trim().is_empty() {
            bail!("project title must not be empty");
        }
        project.title = title.trim().to_string();
    }
    if let Some(description) = description {
        project.description = Some(description.to_string());
    }
    project.updated_at = Utc::now().timestamp();

    sqlx::query("UPDATE projects SET title = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.updated_at)
        .bind(&project.id)
        .execute(pool)
        .await?;

    Ok(project)
}

/// Delete a project and everything under it: versions, pages, images,
/// FTS rows, and stored media files.
pub async fn delete_project(
    pool: &SqlitePool,
    media_root: &std::path::Path,
    machine_name: &str,
) -> Result<bool> {
    let Some(project) = get_project(pool, machine_name).await? else {
        return Ok(false);
    };

    let versions = list_versions(pool, &project.id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM pages_fts WHERE version_id IN (SELECT id FROM versions WHERE project_id = ?)",
    )
    .bind(&project.id)
    .execute(&mut *tx)
    .await?;
    // Cascades take the versions, pages, images, classifiers M2M, and links.
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&project.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    for version in &versions {
        media::purge_version(media_root, machine_name, &version.version)?;
    }

    Ok(true)
}

pub async fn list_versions(pool: &SqlitePool, project_id: &str) -> Result<Vec<Version>> {
    let rows = sqlx::query("SELECT * FROM versions WHERE project_id = ?")
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    let mut versions: Vec<Version> = rows.iter().map(version_from_row).collect();
    versions.sort_by(|a, b| crate::models::compare_versions(&a.version, &b.version));
    Ok(versions)
}

pub async fn get_version(
    pool: &SqlitePool,
    project_id: &str,
    version: &str,
) -> Result<Option<Version>> {
    let row = sqlx::query("SELECT * FROM versions WHERE project_id = ? AND version = ?")
        .bind(project_id)
        .bind(version)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(version_from_row))
}

/// Delete one version: its pages, images, FTS rows, and media files,
/// then recompute which remaining version is latest.
pub async fn delete_version(
    pool: &SqlitePool,
    config: &Config,
    machine_name: &str,
    version: &str,
) -> Result<bool> {
    let Some(project) = get_project(pool, machine_name).await? else {
        return Ok(false);
    };
    let Some(found) = get_version(pool, &project.id, version).await? else {
        return Ok(false);
    };

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM pages_fts WHERE version_id = ?")
        .bind(&found.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM versions WHERE id = ?")
        .bind(&found.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    media::purge_version(&config.media.root, machine_name, version)?;
    crate::importer::recompute_latest(pool, config, &project.id).await?;

    Ok(true)
}

pub async fn related_links(pool: &SqlitePool, project_id: &str) -> Result<Vec<RelatedLink>> {
    let rows = sqlx::query("SELECT * FROM related_links WHERE project_id = ? ORDER BY title")
        .bind(project_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| RelatedLink {
            id: row.get("id"),
            project_id: row.get("project_id"),
            title: row.get("title"),
            uri: row.get("uri"),
        })
        .collect())
}

pub async fn add_related_link(
    pool: &SqlitePool,
    machine_name: &str,
    title: &str,
    uri: &str,
) -> Result<RelatedLink> {
    let Some(project) = get_project(pool, machine_name).await? else {
        bail!("project not found: {}", machine_name);
    };
    let link = RelatedLink {
        id: Uuid::new_v4().to_string(),
        project_id: project.id,
        title: title.to_string(),
        uri: uri.to_string(),
    };
    sqlx::query("INSERT INTO related_links (id, project_id, title, uri) VALUES (?, ?, ?, ?)")
        .bind(&link.id)
        .bind(&link.project_id)
        .bind(&link.title)
        .bind(&link.uri)
        .execute(pool)
        .await?;
    Ok(link)
}

// ============ CLI entry points ============

pub async fn run_project_add(
    config: &Config,
    machine_name: &str,
    title: &str,
    description: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let project = create_project(&pool, machine_name, title, description.as_deref()).await?;
    println!("Created project {} ({})", project.machine_name, project.title);
    pool.close().await;
    Ok(())
}

pub async fn run_project_list(
    config: &Config,
    classifier: Option<String>,
    q: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let projects = list_projects(&pool, classifier.as_deref(), q.as_deref()).await?;

    if projects.is_empty() {
        println!("No projects.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "{:<28} {:<36} {:>8} {:<12}",
        "MACHINE NAME", "TITLE", "VERSIONS", "LATEST"
    );
    println!("{}", "-".repeat(88));
    for project in &projects {
        let versions = list_versions(&pool, &project.id).await?;
        let latest = versions
            .iter()
            .find(|v| v.is_latest)
            .map(|v| v.version.clone())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<36} {:>8} {:<12}",
            project.machine_name,
            project.title,
            versions.len(),
            latest
        );
    }
    pool.close().await;
    Ok(())
}

pub async fn run_project_link(
    config: &Config,
    machine_name: &str,
    title: &str,
    uri: &str,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let link = add_related_link(&pool, machine_name, title, uri).await?;
    println!("Linked {} -> {}", link.title, link.uri);
    pool.close().await;
    Ok(())
}

pub async fn run_versions(config: &Config, machine_name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let Some(project) = get_project(&pool, machine_name).await? else {
        pool.close().await;
        bail!("project not found: {}", machine_name);
    };
    let versions = list_versions(&pool, &project.id).await?;

    if versions.is_empty() {
        println!("No versions imported for {}.", machine_name);
        pool.close().await;
        return Ok(());
    }

    println!("{:<16} {:<10} {:<10} {:<20}", "VERSION", "LATEST", "PAGES", "IMPORTED");
    println!("{}", "-".repeat(58));
    for version in &versions {
        let pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE version_id = ?")
            .bind(&version.id)
            .fetch_one(&pool)
            .await?;
        let imported = chrono::DateTime::from_timestamp(version.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<16} {:<10} {:<10} {:<20}",
            version.version,
            if version.is_latest { "yes" } else { "" },
            pages,
            imported
        );
    }
    pool.close().await;
    Ok(())
}

pub async fn run_version_delete(config: &Config, machine_name: &str, version: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let deleted = delete_version(&pool, config, machine_name, version).await?;
    if deleted {
        println!("Deleted {} {}", machine_name, version);
    } else {
        println!("No such version: {} {}", machine_name, version);
    }
    pool.close().await;
    Ok(())
}
