use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            machine_name TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifiers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_classifiers (
            project_id TEXT NOT NULL,
            classifier_id TEXT NOT NULL,
            UNIQUE(project_id, classifier_id),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE,
            FOREIGN KEY (classifier_id) REFERENCES classifiers(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS related_links (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            uri TEXT NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS versions (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            version TEXT NOT NULL,
            generator_version TEXT,
            head_page_id TEXT REFERENCES pages(id) ON DELETE SET NULL,
            global_toc TEXT,
            is_latest INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, version),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            orig_body TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            orig_local_toc TEXT,
            local_toc TEXT,
            searchable INTEGER NOT NULL DEFAULT 0,
            parent_id TEXT REFERENCES pages(id) ON DELETE SET NULL,
            next_page_id TEXT REFERENCES pages(id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(version_id, relative_path),
            FOREIGN KEY (version_id) REFERENCES versions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            orig_path TEXT NOT NULL,
            file_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            UNIQUE(version_id, orig_path),
            FOREIGN KEY (version_id) REFERENCES versions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='pages_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE pages_fts USING fts5(
                page_id UNINDEXED,
                version_id UNINDEXED,
                title,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_versions_project_id ON versions(project_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_version_id ON pages(version_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_title ON pages(version_id, title)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_version_id ON images(version_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
