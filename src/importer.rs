//! Doc bundle import pipeline.
//!
//! A bundle is the JSON-builder output of a static site generator, either
//! zipped or as an unpacked build directory: a `globalcontext.json` with
//! project identity, one `.fjson` document per page, and image files under
//! `_images/`. Importing a bundle stores pages with rewritten bodies,
//! extracts images to the media root, records next/parent linkage, feeds
//! the search index, and recomputes which version of the project is latest.
//!
//! Linkage is reconciled in two passes because the bundle only names
//! parent/next pages by *title*: pass one stores every page and records the
//! referenced titles, pass two resolves titles to page ids.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::media;
use crate::models::{compare_versions, machine_name_slug, special_page_title, ODD_TITLES};
use crate::projects;
use crate::rewrite::{self, PageUrls};

/// Import failures the caller can act on. Everything else surfaces as a
/// plain [`anyhow::Error`].
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("bundle has no globalcontext.json")]
    MissingGlobalContext,

    #[error("no project registered with machine name '{0}'; run `dock project add` first")]
    UnknownProject(String),

    #[error("version {version} of {machine_name} is already imported; use force to replace it")]
    VersionExists {
        machine_name: String,
        version: String,
    },

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}

/// Generator-wide metadata from `globalcontext.json`.
#[derive(Debug, Deserialize)]
pub struct GlobalContext {
    pub project: String,
    pub release: String,
    #[serde(default)]
    pub sphinx_version: Option<String>,
    #[serde(default)]
    pub root_doc: Option<String>,
    #[serde(default)]
    pub master_doc: Option<String>,
}

impl GlobalContext {
    /// Relative path of the head page. Older generators call it
    /// `master_doc`; failing both, `index` is the conventional default.
    pub fn head_path(&self) -> &str {
        self.root_doc
            .as_deref()
            .or(self.master_doc.as_deref())
            .unwrap_or("index")
    }
}

/// One page document (`*.fjson`).
#[derive(Debug, Default, Deserialize)]
pub struct PageDoc {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub toc: Option<String>,
    #[serde(default)]
    pub parents: Vec<TitleRef>,
    #[serde(default)]
    pub next: Option<TitleRef>,
    #[serde(default)]
    pub globaltoc: Option<String>,
    #[serde(default)]
    pub indextitle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TitleRef {
    #[serde(default)]
    pub title: Option<String>,
}

/// An in-memory bundle: relative path to file bytes, with any containing
/// folder already stripped. Ordered by path so imports process pages the
/// same way every run.
pub struct Bundle {
    files: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    /// Load a bundle from a zip archive or an unpacked build directory.
    pub fn load(source: &Path) -> Result<Self> {
        let files = if source.is_dir() {
            Self::read_dir(source)?
        } else {
            Self::read_zip(source)?
        };
        Ok(Self {
            files: strip_container(files)?,
        })
    }

    fn read_zip(source: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
        let file = std::fs::File::open(source)
            .with_context(|| format!("Failed to open bundle {}", source.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive {}", source.display()))?;

        let mut files = BTreeMap::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if !entry.is_file() {
                continue;
            }
            let name = entry.name().replace('\\', "/");
            if name.split('/').any(|part| part == "..") {
                continue;
            }
            // The header-declared size is untrusted input; let the read
            // grow the buffer instead of preallocating from it.
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            files.insert(name, bytes);
        }
        Ok(files)
    }

    fn read_dir(source: &Path) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(source) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            files.insert(relative, bytes);
        }
        Ok(files)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|b| b.as_slice())
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Archives often wrap the build output in one containing folder; locate
/// `globalcontext.json` and strip its directory prefix from every entry.
fn strip_container(files: BTreeMap<String, Vec<u8>>) -> Result<BTreeMap<String, Vec<u8>>> {
    if files.contains_key("globalcontext.json") {
        return Ok(files);
    }

    let prefix = files
        .keys()
        .filter_map(|key| key.strip_suffix("globalcontext.json"))
        .filter(|prefix| prefix.ends_with('/'))
        .min_by_key(|prefix| prefix.len())
        .map(|prefix| prefix.to_string());

    let Some(prefix) = prefix else {
        return Err(ImportError::MissingGlobalContext.into());
    };

    Ok(files
        .into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(&prefix)
                .map(|stripped| (stripped.to_string(), value))
        })
        .collect())
}

/// Pick the page title, working around generator quirks: special pages get
/// fixed titles, odd placeholder titles fall back to `indextitle` and then
/// to the page path.
fn resolve_title(relative_path: &str, doc: &PageDoc) -> String {
    if let Some(title) = special_page_title(relative_path) {
        return title.to_string();
    }
    let title = doc.title.as_deref().unwrap_or("").trim();
    if !title.is_empty() && !ODD_TITLES.contains(&title) {
        return title.to_string();
    }
    if let Some(index_title) = doc.indextitle.as_deref() {
        let index_title = index_title.trim();
        if !index_title.is_empty() {
            return index_title.to_string();
        }
    }
    relative_path.to_string()
}

/// What an import produced, for reporting.
#[derive(Debug)]
pub struct ImportOutcome {
    pub machine_name: String,
    pub version: String,
    pub pages: usize,
    pub images: usize,
}

struct PendingLink {
    page_id: String,
    relative_path: String,
    parent_title: Option<String>,
    next_title: Option<String>,
    global_toc: Option<String>,
}

/// Import one bundle. The project must already exist; the version must not,
/// unless `force` replaces it.
pub async fn import_bundle(
    pool: &SqlitePool,
    config: &Config,
    source: &Path,
    force: bool,
) -> Result<ImportOutcome> {
    let bundle = Bundle::load(source)?;
    import_loaded_bundle(pool, config, &bundle, force).await
}

pub async fn import_loaded_bundle(
    pool: &SqlitePool,
    config: &Config,
    bundle: &Bundle,
    force: bool,
) -> Result<ImportOutcome> {
    let context_bytes = bundle
        .get("globalcontext.json")
        .ok_or(ImportError::MissingGlobalContext)?;
    let context: GlobalContext = serde_json::from_slice(context_bytes)
        .map_err(|e| ImportError::InvalidBundle(format!("globalcontext.json: {e}")))?;

    let machine_name = machine_name_slug(&context.project);
    if machine_name.is_empty() {
        return Err(ImportError::InvalidBundle("empty project name".to_string()).into());
    }
    let version = context.release.trim().to_string();
    if version.is_empty() {
        return Err(ImportError::InvalidBundle("empty release".to_string()).into());
    }

    if !bundle.files().any(|(path, _)| path.ends_with(".fjson")) {
        return Err(ImportError::InvalidBundle("bundle has no pages".to_string()).into());
    }

    let project = projects::get_project(pool, &machine_name)
        .await?
        .ok_or_else(|| ImportError::UnknownProject(machine_name.clone()))?;

    info!(project = %machine_name, %version, "importing bundle");

    let now = Utc::now().timestamp();
    let version_id = match projects::get_version(pool, &project.id, &version).await? {
        Some(_) if !force => {
            return Err(ImportError::VersionExists {
                machine_name,
                version,
            }
            .into());
        }
        Some(existing) => {
            // Replace in place: drop the old pages, images, index rows, and
            // media files, keep the version row.
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM pages_fts WHERE version_id = ?")
                .bind(&existing.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM pages WHERE version_id = ?")
                .bind(&existing.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM images WHERE version_id = ?")
                .bind(&existing.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "UPDATE versions SET generator_version = ?, head_page_id = NULL, \
                 global_toc = NULL, updated_at = ? WHERE id = ?",
            )
            .bind(&context.sphinx_version)
            .bind(now)
            .bind(&existing.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            media::purge_version(&config.media.root, &machine_name, &version)?;
            info!(project = %machine_name, %version, "replaced existing version");
            existing.id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO versions (id, project_id, version, generator_version, \
                 is_latest, archived, created_at, updated_at) VALUES (?, ?, ?, ?, 0, 0, ?, ?)",
            )
            .bind(&id)
            .bind(&project.id)
            .bind(&version)
            .bind(&context.sphinx_version)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            id
        }
    };

    let urls = PageUrls {
        machine_name: &machine_name,
        version: &version,
    };

    // Images first: bodies need the path-to-id map for src rewriting.
    let mut image_ids: HashMap<String, String> = HashMap::new();
    {
        let mut tx = pool.begin().await?;
        for (path, bytes) in bundle.files() {
            if !path.starts_with("_images/") {
                continue;
            }
            let (file_path, hash) =
                media::store_image(&config.media.root, &machine_name, &version, path, bytes)?;
            let image_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO images (id, version_id, orig_path, file_path, content_hash) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&image_id)
            .bind(&version_id)
            .bind(path)
            .bind(file_path.to_string_lossy().as_ref())
            .bind(&hash)
            .execute(&mut *tx)
            .await?;
            image_ids.insert(path.to_string(), image_id);
        }
        tx.commit().await?;
    }

    // Pass one: store every page, record title-keyed linkage.
    let mut titles: HashMap<String, String> = HashMap::new();
    let mut pending: Vec<PendingLink> = Vec::new();
    {
        let mut tx = pool.begin().await?;
        for (path, bytes) in bundle.files() {
            let Some(relative_path) = path.strip_suffix(".fjson") else {
                continue;
            };
            if relative_path.is_empty() {
                continue;
            }
            let doc: PageDoc = serde_json::from_slice(bytes)
                .map_err(|e| ImportError::InvalidBundle(format!("{path}: {e}")))?;

            let title = resolve_title(relative_path, &doc);
            let body = rewrite::rewrite_body(doc.body.as_deref().unwrap_or(""), &urls, &image_ids)?;
            let text = rewrite::extract_text(&body);
            let local_toc = match doc.toc.as_deref() {
                Some(toc) if !toc.trim().is_empty() => Some(rewrite::rewrite_toc(toc, &urls)?),
                _ => None,
            };
            let searchable = special_page_title(relative_path).is_none();

            let page_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO pages (id, version_id, relative_path, title, content, orig_body, \
                 body, orig_local_toc, local_toc, searchable, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&page_id)
            .bind(&version_id)
            .bind(relative_path)
            .bind(&title)
            .bind(String::from_utf8_lossy(bytes).as_ref())
            .bind(doc.body.as_deref().unwrap_or(""))
            .bind(&body)
            .bind(&doc.toc)
            .bind(&local_toc)
            .bind(searchable)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if searchable {
                sqlx::query(
                    "INSERT INTO pages_fts (page_id, version_id, title, text) VALUES (?, ?, ?, ?)",
                )
                .bind(&page_id)
                .bind(&version_id)
                .bind(&title)
                .bind(&text)
                .execute(&mut *tx)
                .await?;
            }

            // First page in bundle path order wins on duplicate titles.
            titles.entry(title.clone()).or_insert(page_id.clone());

            let global_toc = match doc.globaltoc.as_deref() {
                Some(toc) if !toc.trim().is_empty() => Some(rewrite::rewrite_toc(toc, &urls)?),
                _ => None,
            };
            pending.push(PendingLink {
                page_id,
                relative_path: relative_path.to_string(),
                parent_title: doc.parents.last().and_then(|p| p.title.clone()),
                next_title: doc.next.as_ref().and_then(|n| n.title.clone()),
                global_toc,
            });
        }
        tx.commit().await?;
    }

    // Pass two: resolve recorded titles to page ids.
    {
        let mut tx = pool.begin().await?;
        for link in &pending {
            let parent_id = match link.parent_title.as_deref() {
                Some(title) => match titles.get(title) {
                    Some(id) => Some(id.clone()),
                    None => {
                        warn!(page = %link.relative_path, %title, "parent title not found, skipping");
                        None
                    }
                },
                None => None,
            };
            let next_id = match link.next_title.as_deref() {
                Some(title) => match titles.get(title) {
                    Some(id) => Some(id.clone()),
                    None => {
                        warn!(page = %link.relative_path, %title, "next title not found, skipping");
                        None
                    }
                },
                None => None,
            };
            if parent_id.is_some() || next_id.is_some() {
                sqlx::query("UPDATE pages SET parent_id = ?, next_page_id = ? WHERE id = ?")
                    .bind(&parent_id)
                    .bind(&next_id)
                    .bind(&link.page_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        // Head page and the version-wide contents it carries.
        let head_path = context.head_path();
        match pending.iter().find(|p| p.relative_path == head_path) {
            Some(head) => {
                sqlx::query(
                    "UPDATE versions SET head_page_id = ?, global_toc = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(&head.page_id)
                .bind(&head.global_toc)
                .bind(now)
                .bind(&version_id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                warn!(project = %machine_name, %version, head = %head_path,
                    "head page missing from bundle");
            }
        }
        tx.commit().await?;
    }

    recompute_latest(pool, config, &project.id).await?;

    info!(
        project = %machine_name,
        %version,
        pages = pending.len(),
        images = image_ids.len(),
        "import complete"
    );

    Ok(ImportOutcome {
        machine_name,
        version,
        pages: pending.len(),
        images: image_ids.len(),
    })
}

/// Mark exactly one version of the project as latest.
///
/// Candidates are non-archived versions whose version string matches none
/// of the configured exclusion patterns; the maximum by version ordering
/// wins. If every version is excluded, the maximum over all non-archived
/// versions wins instead, so a project with versions always has a latest.
pub async fn recompute_latest(pool: &SqlitePool, config: &Config, project_id: &str) -> Result<()> {
    let patterns = config.import.exclude_patterns()?;
    let versions = projects::list_versions(pool, project_id).await?;

    let active: Vec<_> = versions.iter().filter(|v| !v.archived).collect();
    let pick = active
        .iter()
        .filter(|v| !patterns.iter().any(|p| p.is_match(&v.version)))
        .max_by(|a, b| compare_versions(&a.version, &b.version))
        .or_else(|| {
            active
                .iter()
                .max_by(|a, b| compare_versions(&a.version, &b.version))
        })
        .map(|v| v.id.clone());

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE versions SET is_latest = 0 WHERE project_id = ?")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    if let Some(id) = &pick {
        sqlx::query("UPDATE versions SET is_latest = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Force a specific version to be latest, bypassing the exclusion rules.
/// The next import or deletion for the project recomputes it.
pub async fn set_latest(
    pool: &SqlitePool,
    machine_name: &str,
    version: &str,
) -> Result<()> {
    let Some(project) = projects::get_project(pool, machine_name).await? else {
        anyhow::bail!("project not found: {}", machine_name);
    };
    let Some(found) = projects::get_version(pool, &project.id, version).await? else {
        anyhow::bail!("version not found: {} {}", machine_name, version);
    };

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE versions SET is_latest = 0 WHERE project_id = ?")
        .bind(&project.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE versions SET is_latest = 1 WHERE id = ?")
        .bind(&found.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

// ============ CLI entry points ============

pub async fn run_import(config: &Config, source: &Path, force: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let outcome = import_bundle(&pool, config, source, force).await?;
    println!(
        "Imported {} {} ({} pages, {} images)",
        outcome.machine_name, outcome.version, outcome.pages, outcome.images
    );
    pool.close().await;
    Ok(())
}

pub async fn run_latest(config: &Config, machine_name: &str, set: Option<String>) -> Result<()> {
    let pool = db::connect(config).await?;
    match set {
        Some(version) => {
            set_latest(&pool, machine_name, &version).await?;
            println!("Marked {} {} as latest", machine_name, version);
        }
        None => {
            let Some(project) = projects::get_project(&pool, machine_name).await? else {
                pool.close().await;
                anyhow::bail!("project not found: {}", machine_name);
            };
            let versions = projects::list_versions(&pool, &project.id).await?;
            match versions.iter().find(|v| v.is_latest) {
                Some(latest) => println!("{}", latest.version),
                None => println!("No versions imported for {}.", machine_name),
            }
        }
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn container_folder_is_stripped() {
        let stripped = strip_container(files(&[
            ("mydocs/globalcontext.json", "{}"),
            ("mydocs/index.fjson", "{}"),
            ("mydocs/_images/a.png", "png"),
        ]))
        .unwrap();
        assert!(stripped.contains_key("globalcontext.json"));
        assert!(stripped.contains_key("index.fjson"));
        assert!(stripped.contains_key("_images/a.png"));
    }

    #[test]
    fn flat_bundle_is_untouched() {
        let stripped = strip_container(files(&[
            ("globalcontext.json", "{}"),
            ("index.fjson", "{}"),
        ]))
        .unwrap();
        assert_eq!(stripped.len(), 2);
        assert!(stripped.contains_key("index.fjson"));
    }

    #[test]
    fn missing_globalcontext_is_typed() {
        let err = strip_container(files(&[("index.fjson", "{}")])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ImportError>(),
            Some(ImportError::MissingGlobalContext)
        ));
    }

    #[test]
    fn bundle_files_iterate_in_path_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("guide")).unwrap();
        for name in ["globalcontext.json", "zebra.fjson", "alpha.fjson"] {
            std::fs::write(tmp.path().join(name), "{}").unwrap();
        }
        std::fs::write(tmp.path().join("guide/setup.fjson"), "{}").unwrap();

        let bundle = Bundle::load(tmp.path()).unwrap();
        let paths: Vec<&str> = bundle.files().map(|(path, _)| path).collect();
        assert_eq!(
            paths,
            vec![
                "alpha.fjson",
                "globalcontext.json",
                "guide/setup.fjson",
                "zebra.fjson",
            ]
        );
    }

    #[test]
    fn zip_archive_entries_are_loaded() {
        use std::io::Write;

        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("docs.zip");
        let file = std::fs::File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        writer.start_file("globalcontext.json", options).unwrap();
        writer.write_all(b"{}").unwrap();
        writer.start_file("index.fjson", options).unwrap();
        // Larger than any size hint the header might carry
        let big = vec![b'x'; 2 * 1024 * 1024];
        writer.write_all(&big).unwrap();
        writer.finish().unwrap();

        let bundle = Bundle::load(&archive).unwrap();
        assert_eq!(bundle.get("index.fjson"), Some(big.as_slice()));
        assert_eq!(bundle.get("globalcontext.json"), Some(b"{}".as_slice()));
    }

    #[test]
    fn head_path_fallbacks() {
        let context: GlobalContext =
            serde_json::from_str(r#"{"project": "P", "release": "1.0", "root_doc": "home"}"#)
                .unwrap();
        assert_eq!(context.head_path(), "home");

        let context: GlobalContext =
            serde_json::from_str(r#"{"project": "P", "release": "1.0", "master_doc": "main"}"#)
                .unwrap();
        assert_eq!(context.head_path(), "main");

        let context: GlobalContext =
            serde_json::from_str(r#"{"project": "P", "release": "1.0"}"#).unwrap();
        assert_eq!(context.head_path(), "index");
    }

    #[test]
    fn title_fixups() {
        let doc = PageDoc {
            title: Some("Real Title".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_title("usage/intro", &doc), "Real Title");

        // Special pages override whatever the bundle says
        assert_eq!(resolve_title("genindex", &doc), "General Index");

        // Placeholder titles fall back to indextitle, then the path
        let doc = PageDoc {
            title: Some("&lt;no title&gt;".to_string()),
            indextitle: Some("Index Title".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_title("odd", &doc), "Index Title");

        let doc = PageDoc {
            title: None,
            ..Default::default()
        };
        assert_eq!(resolve_title("bare/page", &doc), "bare/page");
    }

    #[test]
    fn page_doc_tolerates_missing_keys() {
        let doc: PageDoc = serde_json::from_str(r#"{"title": "T", "body": null}"#).unwrap();
        assert_eq!(doc.title.as_deref(), Some("T"));
        assert!(doc.body.is_none());
        assert!(doc.parents.is_empty());
        assert!(doc.next.is_none());
    }
}
