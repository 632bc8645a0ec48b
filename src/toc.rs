//! Navigation tree reconstruction.
//!
//! Two trees exist per version. The **page tree** is rebuilt from the
//! stored next/parent linkage: reading order comes from the `next` chain,
//! nesting from `parent_id`. The **global TOC** is parsed out of the
//! version's stored contents HTML (nested `ul`/`li` lists), depth-limited
//! by config.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::projects;

/// A node of the reconstructed page tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub path: String,
    pub title: String,
    pub children: Vec<TreeNode>,
}

/// Page linkage as stored by the importer.
#[derive(Debug, Clone)]
pub struct PageLink {
    pub id: String,
    pub relative_path: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub next_page_id: Option<String>,
}

pub async fn page_links(pool: &SqlitePool, version_id: &str) -> Result<Vec<PageLink>> {
    let rows = sqlx::query(
        "SELECT id, relative_path, title, parent_id, next_page_id \
         FROM pages WHERE version_id = ? ORDER BY relative_path",
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| PageLink {
            id: row.get("id"),
            relative_path: row.get("relative_path"),
            title: row.get("title"),
            parent_id: row.get("parent_id"),
            next_page_id: row.get("next_page_id"),
        })
        .collect())
}

/// Rebuild the page tree for a version.
///
/// Reading order follows the `next` chain from the head page. Pages with a
/// parent nest under it; parentless pages (other than the head) nest under
/// the head. A visited set guards against linkage cycles, and pages the
/// chain never reaches are appended in path order so nothing is lost.
pub fn build_page_tree(pages: &[PageLink], head_id: &str) -> Option<TreeNode> {
    let by_id: HashMap<&str, &PageLink> = pages.iter().map(|p| (p.id.as_str(), p)).collect();
    let head = by_id.get(head_id)?;

    // Reading order: the next chain, then anything it never reached.
    let mut ordered: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut cursor = Some(head_id);
    while let Some(id) = cursor {
        if !seen.insert(id) {
            break;
        }
        ordered.push(id);
        cursor = by_id
            .get(id)
            .and_then(|p| p.next_page_id.as_deref())
            .filter(|next| by_id.contains_key(next));
    }
    for page in pages {
        if seen.insert(page.id.as_str()) {
            ordered.push(page.id.as_str());
        }
    }

    // Nesting: declared parent when it exists, otherwise the head.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &ordered {
        if *id == head_id {
            continue;
        }
        let parent = by_id
            .get(id)
            .and_then(|p| p.parent_id.as_deref())
            .filter(|parent| by_id.contains_key(parent) && *parent != *id)
            .unwrap_or(head_id);
        children.entry(parent).or_default().push(*id);
    }

    fn build(
        id: &str,
        by_id: &HashMap<&str, &PageLink>,
        children: &HashMap<&str, Vec<&str>>,
        visited: &mut HashSet<String>,
    ) -> Option<TreeNode> {
        if !visited.insert(id.to_string()) {
            return None;
        }
        let page = by_id.get(id)?;
        let child_nodes = children
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|child| build(child, by_id, children, visited))
                    .collect()
            })
            .unwrap_or_default();
        Some(TreeNode {
            path: page.relative_path.clone(),
            title: page.title.clone(),
            children: child_nodes,
        })
    }

    let mut visited = HashSet::new();
    build(head_id, &by_id, &children, &mut visited)
}

/// A node of the parsed global table of contents.
#[derive(Debug, Clone, Serialize)]
pub struct TocEntry {
    pub title: String,
    pub url: Option<String>,
    pub children: Vec<TocEntry>,
}

/// Parse a global-contents HTML fragment (nested `ul`/`li` lists) into a
/// tree, keeping at most `max_depth` levels.
pub fn parse_global_toc(html: &str, max_depth: usize) -> Result<Vec<TocEntry>> {
    if html.trim().is_empty() || max_depth == 0 {
        return Ok(Vec::new());
    }

    let fragment = Html::parse_fragment(html);
    let ul_selector =
        Selector::parse("ul").map_err(|e| anyhow!("bad contents selector: {e}"))?;
    let a_selector = Selector::parse("a").map_err(|e| anyhow!("bad contents selector: {e}"))?;

    let mut entries = Vec::new();
    for ul in fragment.select(&ul_selector) {
        let top_level = !ul
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|e| matches!(e.value().name(), "ul" | "li"));
        if top_level {
            entries.extend(parse_list(ul, 1, max_depth, &a_selector));
        }
    }
    Ok(entries)
}

fn parse_list(
    ul: ElementRef<'_>,
    depth: usize,
    max_depth: usize,
    a_selector: &Selector,
) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    for li in ul
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "li")
    {
        let Some(a) = li.select(a_selector).next() else {
            continue;
        };
        let title = a.text().collect::<String>().trim().to_string();
        let url = a.value().attr("href").map(|h| h.to_string());

        let children = if depth < max_depth {
            li.children()
                .filter_map(ElementRef::wrap)
                .filter(|e| e.value().name() == "ul")
                .flat_map(|nested| parse_list(nested, depth + 1, max_depth, a_selector))
                .collect()
        } else {
            Vec::new()
        };

        entries.push(TocEntry {
            title,
            url,
            children,
        });
    }
    entries
}

// ============ CLI entry points ============

async fn resolve_version(
    pool: &SqlitePool,
    machine_name: &str,
    version: &str,
) -> Result<crate::models::Version> {
    let Some(project) = projects::get_project(pool, machine_name).await? else {
        bail!("project not found: {}", machine_name);
    };
    let Some(found) = projects::get_version(pool, &project.id, version).await? else {
        bail!("version not found: {} {}", machine_name, version);
    };
    Ok(found)
}

/// Print the reconstructed page tree for a version.
pub async fn run_tree(config: &Config, machine_name: &str, version: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let found = resolve_version(&pool, machine_name, version).await?;

    let Some(head_id) = found.head_page_id else {
        println!("Version has no pages.");
        pool.close().await;
        return Ok(());
    };
    let pages = page_links(&pool, &found.id).await?;
    pool.close().await;

    let Some(tree) = build_page_tree(&pages, &head_id) else {
        println!("Version has no pages.");
        return Ok(());
    };

    fn print_node(node: &TreeNode, indent: usize) {
        println!("{}{}  [{}]", "  ".repeat(indent), node.title, node.path);
        for child in &node.children {
            print_node(child, indent + 1);
        }
    }
    print_node(&tree, 0);
    Ok(())
}

/// Print the parsed global table of contents for a version.
pub async fn run_toc(config: &Config, machine_name: &str, version: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let found = resolve_version(&pool, machine_name, version).await?;
    pool.close().await;

    let Some(html) = found.global_toc else {
        println!("Version has no global contents.");
        return Ok(());
    };
    let entries = parse_global_toc(&html, config.toc.max_depth)?;
    if entries.is_empty() {
        println!("Version has no global contents.");
        return Ok(());
    }

    fn print_entry(entry: &TocEntry, indent: usize) {
        match &entry.url {
            Some(url) => println!("{}{}  <{}>", "  ".repeat(indent), entry.title, url),
            None => println!("{}{}", "  ".repeat(indent), entry.title),
        }
        for child in &entry.children {
            print_entry(child, indent + 1);
        }
    }
    for entry in &entries {
        print_entry(entry, 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, path: &str, parent: Option<&str>, next: Option<&str>) -> PageLink {
        PageLink {
            id: id.to_string(),
            relative_path: path.to_string(),
            title: path.to_string(),
            parent_id: parent.map(|s| s.to_string()),
            next_page_id: next.map(|s| s.to_string()),
        }
    }

    #[test]
    fn tree_follows_next_chain_and_parents() {
        // index -> intro -> install, install nests under intro
        let pages = vec![
            page("h", "index", None, Some("a")),
            page("a", "intro", None, Some("b")),
            page("b", "intro/install", Some("a"), None),
        ];
        let tree = build_page_tree(&pages, "h").unwrap();
        assert_eq!(tree.path, "index");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].path, "intro");
        assert_eq!(tree.children[0].children[0].path, "intro/install");
    }

    #[test]
    fn orphan_pages_attach_to_head() {
        let pages = vec![
            page("h", "index", None, None),
            page("x", "floating", None, None),
        ];
        let tree = build_page_tree(&pages, "h").unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].path, "floating");
    }

    #[test]
    fn next_cycle_does_not_hang() {
        let pages = vec![
            page("h", "index", None, Some("a")),
            page("a", "one", None, Some("h")),
        ];
        let tree = build_page_tree(&pages, "h").unwrap();
        assert_eq!(tree.children.len(), 1);
    }

    #[test]
    fn missing_head_yields_none() {
        assert!(build_page_tree(&[], "nope").is_none());
    }

    #[test]
    fn global_toc_parses_nested_lists() {
        let html = r#"
            <ul>
              <li><a href="p/intro">Intro</a>
                <ul><li><a href="p/intro/install">Install</a></li></ul>
              </li>
              <li><a href="p/usage">Usage</a></li>
            </ul>"#;
        let entries = parse_global_toc(html, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Intro");
        assert_eq!(entries[0].url.as_deref(), Some("p/intro"));
        assert_eq!(entries[0].children.len(), 1);
        assert_eq!(entries[0].children[0].title, "Install");
    }

    #[test]
    fn global_toc_respects_max_depth() {
        let html = r#"
            <ul><li><a href="a">A</a>
              <ul><li><a href="b">B</a>
                <ul><li><a href="c">C</a></li></ul>
              </li></ul>
            </li></ul>"#;
        let entries = parse_global_toc(html, 2).unwrap();
        assert_eq!(entries[0].children.len(), 1);
        assert!(entries[0].children[0].children.is_empty());
    }

    #[test]
    fn empty_toc_html() {
        assert!(parse_global_toc("", 2).unwrap().is_empty());
        assert!(parse_global_toc("<p>no lists</p>", 2).unwrap().is_empty());
    }
}
