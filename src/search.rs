//! Full-text page search with faceted filtering.
//!
//! FTS5 handles the match and ranking (bm25 `rank`); project, version,
//! classifier, and latest-only filters are applied over the candidates,
//! and facet counts are computed over the filtered set so clients can
//! render drill-down filters.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Default, Clone)]
pub struct SearchFilters {
    pub project: Option<String>,
    pub version: Option<String>,
    pub classifier: Option<String>,
    pub latest: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub project: String,
    pub version: String,
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub is_latest: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FacetCount {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Matching pages before the limit was applied.
    pub total: usize,
    pub project_facets: Vec<FacetCount>,
    pub classifier_facets: Vec<FacetCount>,
}

struct Candidate {
    project_id: String,
    machine_name: String,
    version: String,
    is_latest: bool,
    path: String,
    title: String,
    snippet: String,
    rank: f64,
}

pub async fn search_pages(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    filters: &SearchFilters,
) -> Result<SearchResults> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let rows = sqlx::query(
        r#"
        SELECT pr.id AS project_id, pr.machine_name, v.version, v.is_latest,
               p.relative_path, p.title, f.rank,
               snippet(pages_fts, 3, '>>>', '<<<', '...', 32) AS snip
        FROM pages_fts f
        JOIN pages p ON p.id = f.page_id
        JOIN versions v ON v.id = p.version_id
        JOIN projects pr ON pr.id = v.project_id
        WHERE pages_fts MATCH ?
        ORDER BY rank
        "#,
    )
    .bind(query)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| Candidate {
            project_id: row.get("project_id"),
            machine_name: row.get("machine_name"),
            version: row.get("version"),
            is_latest: row.get("is_latest"),
            path: row.get("relative_path"),
            title: row.get("title"),
            snippet: row.get("snip"),
            rank: row.get("rank"),
        })
        .collect();

    // Classifier names per project, for the classifier filter and facets.
    let classifier_rows = sqlx::query(
        r#"
        SELECT pc.project_id, c.name FROM project_classifiers pc
        JOIN classifiers c ON c.id = pc.classifier_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    let mut project_classifiers: HashMap<String, Vec<String>> = HashMap::new();
    for row in &classifier_rows {
        project_classifiers
            .entry(row.get("project_id"))
            .or_default()
            .push(row.get("name"));
    }

    candidates.retain(|c| {
        if let Some(project) = &filters.project {
            if &c.machine_name != project {
                return false;
            }
        }
        if let Some(version) = &filters.version {
            if &c.version != version {
                return false;
            }
        }
        if filters.latest && !c.is_latest {
            return false;
        }
        if let Some(classifier) = &filters.classifier {
            let names = project_classifiers.get(&c.project_id);
            let matches = names
                .map(|names| names.iter().any(|n| n.contains(classifier.as_str())))
                .unwrap_or(false);
            if !matches {
                return false;
            }
        }
        true
    });

    // bm25 rank ascending is best-first; break ties deterministically.
    candidates.sort_by(|a, b| {
        a.rank
            .partial_cmp(&b.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.machine_name.cmp(&b.machine_name))
    });

    let mut project_counts: HashMap<&str, i64> = HashMap::new();
    let mut classifier_counts: HashMap<&str, i64> = HashMap::new();
    for candidate in &candidates {
        *project_counts
            .entry(candidate.machine_name.as_str())
            .or_default() += 1;
        if let Some(names) = project_classifiers.get(&candidate.project_id) {
            for name in names {
                *classifier_counts.entry(name.as_str()).or_default() += 1;
            }
        }
    }
    let mut project_facets: Vec<FacetCount> = project_counts
        .into_iter()
        .map(|(name, count)| FacetCount {
            name: name.to_string(),
            count,
        })
        .collect();
    project_facets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    let mut classifier_facets: Vec<FacetCount> = classifier_counts
        .into_iter()
        .map(|(name, count)| FacetCount {
            name: name.to_string(),
            count,
        })
        .collect();
    classifier_facets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

    let total = candidates.len();
    let limit = filters.limit.unwrap_or(config.search.limit).max(1) as usize;

    let hits: Vec<SearchHit> = candidates
        .into_iter()
        .take(limit)
        .map(|c| SearchHit {
            project: c.machine_name,
            version: c.version,
            path: c.path,
            title: c.title,
            // negate so higher = better
            score: -c.rank,
            snippet: c.snippet,
            is_latest: c.is_latest,
        })
        .collect();

    Ok(SearchResults {
        hits,
        total,
        project_facets,
        classifier_facets,
    })
}

/// CLI entry point for `dock search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    project: Option<String>,
    classifier: Option<String>,
    latest: bool,
    limit: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let filters = SearchFilters {
        project,
        classifier,
        latest,
        limit,
        ..Default::default()
    };
    let results = search_pages(&pool, config, query, &filters).await?;
    pool.close().await;

    if results.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.hits.iter().enumerate() {
        let latest_tag = if hit.is_latest { " (latest)" } else { "" };
        println!(
            "{}. [{:.2}] {} {}{} / {}",
            i + 1,
            hit.score,
            hit.project,
            hit.version,
            latest_tag,
            hit.title
        );
        println!("    path: {}", hit.path);
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!();
    }

    if results.total > results.hits.len() {
        println!("({} of {} matches shown)", results.hits.len(), results.total);
    }

    if !results.project_facets.is_empty() {
        let facets: Vec<String> = results
            .project_facets
            .iter()
            .map(|f| format!("{} ({})", f.name, f.count))
            .collect();
        println!("Projects: {}", facets.join(", "));
    }
    if !results.classifier_facets.is_empty() {
        let facets: Vec<String> = results
            .classifier_facets
            .iter()
            .map(|f| format!("{} ({})", f.name, f.count))
            .collect();
        println!("Classifiers: {}", facets.join(", "));
    }

    Ok(())
}
