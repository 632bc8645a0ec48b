//! Database statistics overview.
//!
//! A quick summary of what's hosted: project, version, page, and image
//! counts with a per-project breakdown. Used by `dock stats` to confirm
//! imports landed as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct ProjectStats {
    machine_name: String,
    version_count: i64,
    page_count: i64,
    image_count: i64,
    latest: Option<String>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_projects: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&pool)
        .await?;
    let total_versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM versions")
        .fetch_one(&pool)
        .await?;
    let total_pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
        .fetch_one(&pool)
        .await?;
    let total_searchable: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE searchable = 1")
            .fetch_one(&pool)
            .await?;
    let total_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docharbor — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Media root:  {}", config.media.root.display());
    println!();
    println!("  Projects:    {}", total_projects);
    println!("  Versions:    {}", total_versions);
    println!(
        "  Pages:       {} ({} searchable)",
        total_pages, total_searchable
    );
    println!("  Images:      {}", total_images);

    let project_rows = sqlx::query(
        r#"
        SELECT
            p.machine_name,
            COUNT(DISTINCT v.id) AS version_count,
            COUNT(DISTINCT pg.id) AS page_count,
            COUNT(DISTINCT i.id) AS image_count
        FROM projects p
        LEFT JOIN versions v ON v.project_id = p.id
        LEFT JOIN pages pg ON pg.version_id = v.id
        LEFT JOIN images i ON i.version_id = v.id
        GROUP BY p.machine_name
        ORDER BY page_count DESC, p.machine_name
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let latest_rows =
        sqlx::query(
            r#"
            SELECT p.machine_name, v.version FROM versions v
            JOIN projects p ON p.id = v.project_id
            WHERE v.is_latest = 1
            "#,
        )
        .fetch_all(&pool)
        .await?;

    let mut stats: Vec<ProjectStats> = Vec::new();
    for row in &project_rows {
        let machine_name: String = row.get("machine_name");
        let latest = latest_rows
            .iter()
            .find(|lr| {
                let lr_name: String = lr.get("machine_name");
                lr_name == machine_name
            })
            .map(|lr| lr.get::<String, _>("version"));
        stats.push(ProjectStats {
            machine_name,
            version_count: row.get("version_count"),
            page_count: row.get("page_count"),
            image_count: row.get("image_count"),
            latest,
        });
    }

    if !stats.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<28} {:>8} {:>8} {:>8}   {}",
            "PROJECT", "VERSIONS", "PAGES", "IMAGES", "LATEST"
        );
        println!("  {}", "-".repeat(70));
        for s in &stats {
            println!(
                "  {:<28} {:>8} {:>8} {:>8}   {}",
                s.machine_name,
                s.version_count,
                s.page_count,
                s.image_count,
                s.latest.as_deref().unwrap_or("-")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
