//! Hierarchical project classifiers.
//!
//! Classifier names are trove-style paths with ` :: ` separators, e.g.
//! `Language :: Rust` or `Audience :: Platform :: SRE`. They exist as flat
//! named rows; the hierarchy is reconstructed on demand for display and
//! faceting.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::Classifier;
use crate::projects;

pub const SEPARATOR: &str = " :: ";

/// One node of the reconstructed classifier hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierNode {
    pub segment: String,
    /// Full ` :: `-joined name if a classifier row ends at this node.
    pub name: Option<String>,
    pub children: Vec<ClassifierNode>,
}

pub async fn list_classifiers(pool: &SqlitePool) -> Result<Vec<Classifier>> {
    let rows = sqlx::query("SELECT id, name FROM classifiers ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| Classifier {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

/// Fetch or create a classifier by its full name.
pub async fn ensure_classifier(pool: &SqlitePool, name: &str) -> Result<Classifier> {
    let name = name.trim();
    if name.is_empty() {
        bail!("classifier name must not be empty");
    }
    if name.split(SEPARATOR).any(|s| s.trim().is_empty()) {
        bail!("classifier name has an empty segment: {}", name);
    }

    if let Some(row) = sqlx::query("SELECT id, name FROM classifiers WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(Classifier {
            id: row.get("id"),
            name: row.get("name"),
        });
    }

    let classifier = Classifier {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
    };
    sqlx::query("INSERT INTO classifiers (id, name) VALUES (?, ?)")
        .bind(&classifier.id)
        .bind(&classifier.name)
        .execute(pool)
        .await?;
    Ok(classifier)
}

/// Attach a classifier to a project, creating the classifier if needed.
pub async fn classify_project(pool: &SqlitePool, machine_name: &str, name: &str) -> Result<()> {
    let Some(project) = projects::get_project(pool, machine_name).await? else {
        bail!("project not found: {}", machine_name);
    };
    let classifier = ensure_classifier(pool, name).await?;
    sqlx::query(
        "INSERT OR IGNORE INTO project_classifiers (project_id, classifier_id) VALUES (?, ?)",
    )
    .bind(&project.id)
    .bind(&classifier.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Detach a classifier from a project. The classifier row itself stays.
pub async fn declassify_project(pool: &SqlitePool, machine_name: &str, name: &str) -> Result<bool> {
    let Some(project) = projects::get_project(pool, machine_name).await? else {
        bail!("project not found: {}", machine_name);
    };
    let result = sqlx::query(
        "DELETE FROM project_classifiers WHERE project_id = ? \
         AND classifier_id IN (SELECT id FROM classifiers WHERE name = ?)",
    )
    .bind(&project.id)
    .bind(name.trim())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn project_classifiers(pool: &SqlitePool, project_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT c.name FROM classifiers c
        JOIN project_classifiers pc ON pc.classifier_id = c.id
        WHERE pc.project_id = ?
        ORDER BY c.name
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|row| row.get("name")).collect())
}

/// Build the display hierarchy from a sorted list of classifier names.
pub fn build_tree(names: &[String]) -> Vec<ClassifierNode> {
    let mut roots: Vec<ClassifierNode> = Vec::new();
    for name in names {
        let segments: Vec<&str> = name.split(SEPARATOR).map(str::trim).collect();
        let mut level = &mut roots;
        for (depth, segment) in segments.iter().enumerate() {
            let pos = match level.iter().position(|n| n.segment == *segment) {
                Some(pos) => pos,
                None => {
                    level.push(ClassifierNode {
                        segment: segment.to_string(),
                        name: None,
                        children: Vec::new(),
                    });
                    level.len() - 1
                }
            };
            if depth == segments.len() - 1 {
                level[pos].name = Some(name.clone());
            }
            level = &mut level[pos].children;
        }
    }
    roots
}

// ============ CLI entry points ============

pub async fn run_classify(config: &Config, machine_name: &str, name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    classify_project(&pool, machine_name, name).await?;
    println!("Classified {} as {}", machine_name, name);
    pool.close().await;
    Ok(())
}

pub async fn run_declassify(config: &Config, machine_name: &str, name: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let removed = declassify_project(&pool, machine_name, name).await?;
    if removed {
        println!("Removed {} from {}", name, machine_name);
    } else {
        println!("{} was not classified as {}", machine_name, name);
    }
    pool.close().await;
    Ok(())
}

/// Print the classifier hierarchy with per-classifier project counts.
pub async fn run_classifiers(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let classifiers = list_classifiers(&pool).await?;

    if classifiers.is_empty() {
        println!("No classifiers.");
        pool.close().await;
        return Ok(());
    }

    let names: Vec<String> = classifiers.iter().map(|c| c.name.clone()).collect();
    let tree = build_tree(&names);

    let mut counts = std::collections::HashMap::new();
    for classifier in &classifiers {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM project_classifiers WHERE classifier_id = ?",
        )
        .bind(&classifier.id)
        .fetch_one(&pool)
        .await?;
        counts.insert(classifier.name.clone(), count);
    }

    fn print_level(
        nodes: &[ClassifierNode],
        indent: usize,
        counts: &std::collections::HashMap<String, i64>,
    ) {
        for node in nodes {
            match &node.name {
                Some(name) => println!(
                    "{}{} ({})",
                    "  ".repeat(indent),
                    node.segment,
                    counts.get(name).copied().unwrap_or(0)
                ),
                None => println!("{}{}", "  ".repeat(indent), node.segment),
            }
            print_level(&node.children, indent + 1, counts);
        }
    }
    print_level(&tree, 0, &counts);

    pool.close().await;
    Ok(())
}
