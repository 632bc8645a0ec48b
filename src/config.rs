use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub media: MediaConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub toc: TocConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Root directory for extracted image files.
    pub root: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./media"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer tokens accepted by the API. Empty means no auth required.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Version strings matching any of these patterns are never marked
    /// latest (pre-releases, dev builds).
    #[serde(default = "default_latest_exclude")]
    pub latest_exclude: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            latest_exclude: default_latest_exclude(),
        }
    }
}

fn default_latest_exclude() -> Vec<String> {
    vec![r"(?i)(^|[.\-_])(dev|rc|alpha|beta|pre)\d*$".to_string()]
}

impl ImportConfig {
    /// Compile the exclusion patterns. Invalid patterns are a config error.
    pub fn exclude_patterns(&self) -> Result<Vec<Regex>> {
        self.latest_exclude
            .iter()
            .map(|p| {
                Regex::new(p).with_context(|| format!("invalid import.latest_exclude pattern: {p}"))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TocConfig {
    /// Maximum nesting depth kept when parsing the global table of contents.
    #[serde(default = "default_toc_depth")]
    pub max_depth: usize,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            max_depth: default_toc_depth(),
        }
    }
}

fn default_toc_depth() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Default number of search results returned.
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_search_limit(),
        }
    }
}

fn default_search_limit() -> i64 {
    20
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.search.limit < 1 {
        anyhow::bail!("search.limit must be >= 1");
    }

    if config.toc.max_depth < 1 {
        anyhow::bail!("toc.max_depth must be >= 1");
    }

    // Surface bad exclusion patterns at load time, not mid-import.
    config.import.exclude_patterns()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("docharbor.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "./data/docharbor.sqlite"

[server]
bind = "127.0.0.1:7340"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.search.limit, 20);
        assert_eq!(config.toc.max_depth, 2);
        assert!(config.server.api_keys.is_empty());
        assert_eq!(config.import.latest_exclude.len(), 1);
    }

    #[test]
    fn default_exclude_matches_prereleases() {
        let patterns = ImportConfig::default().exclude_patterns().unwrap();
        for v in ["1.0.0-rc1", "2.1-dev", "0.3.0_beta2", "1.0.0.pre"] {
            assert!(
                patterns.iter().any(|p| p.is_match(v)),
                "expected {v} to be excluded"
            );
        }
        for v in ["1.0.0", "2022.10", "0.3.1"] {
            assert!(
                !patterns.iter().any(|p| p.is_match(v)),
                "expected {v} to be eligible"
            );
        }
    }

    #[test]
    fn invalid_exclude_pattern_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "./data/docharbor.sqlite"

[server]
bind = "127.0.0.1:7340"

[import]
latest_exclude = ["("]
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn zero_search_limit_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "./data/docharbor.sqlite"

[server]
bind = "127.0.0.1:7340"

[search]
limit = 0
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
