//! Core data models used throughout docharbor.
//!
//! These types mirror the SQLite schema created by [`crate::migrate`] and
//! carry the identity and version-ordering rules the importer relies on.

use std::cmp::Ordering;

use serde::Serialize;

/// A project is what a documentation set describes: an application, a
/// library, a service. Projects own versions, versions own pages.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    /// Unique slug matching the `project` value in the generator config.
    pub machine_name: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One imported documentation set for a project.
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub id: String,
    pub project_id: String,
    pub version: String,
    /// Version of the generator that built the bundle, if recorded.
    pub generator_version: Option<String>,
    /// The root page of the documentation set, once imported.
    pub head_page_id: Option<String>,
    /// Rewritten global table-of-contents HTML, if the bundle carried one.
    pub global_toc: Option<String>,
    pub is_latest: bool,
    pub archived: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single page of a documentation set.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: String,
    pub version_id: String,
    /// Path of the page inside the bundle, without the `.fjson` suffix.
    pub relative_path: String,
    pub title: String,
    /// Rewritten HTML body. Empty for bodyless pages.
    pub body: String,
    /// Local (per-page heading) contents HTML, as shipped in the bundle.
    pub local_toc: Option<String>,
    pub searchable: bool,
    pub parent_id: Option<String>,
    pub next_page_id: Option<String>,
}

/// An image file referenced from page bodies, extracted from the bundle
/// and stored under the media root.
#[derive(Debug, Clone, Serialize)]
pub struct PageImage {
    pub id: String,
    pub version_id: String,
    /// Path of the image inside the bundle (`_images/...`).
    pub orig_path: String,
    /// Where the bytes live under the media root.
    pub file_path: String,
    pub content_hash: String,
}

/// A hierarchical project classifier, trove-style: segments joined by
/// ` :: `, e.g. `Language :: Rust`.
#[derive(Debug, Clone, Serialize)]
pub struct Classifier {
    pub id: String,
    pub name: String,
}

/// A curated external link attached to a project.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedLink {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub uri: String,
}

/// Pages whose titles in the bundle are useless; the importer replaces
/// them with fixed titles and excludes them from the search index.
pub const SPECIAL_PAGES: &[(&str, &str)] = &[
    ("genindex", "General Index"),
    ("py-modindex", "Module Index"),
    ("np-modindex", "Module Index"),
    ("search", "Search"),
    ("_modules/index", "Module code"),
];

/// Titles that some generators emit for pages with no real heading.
/// Pages with these titles fall back to their relative path.
pub const ODD_TITLES: &[&str] = &["&lt;no title&gt;"];

/// The fixed title for `path`, if it is a special page.
pub fn special_page_title(path: &str) -> Option<&'static str> {
    SPECIAL_PAGES
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(_, title)| *title)
}

/// Whether `name` is a valid project machine name: letters, digits,
/// hyphens, underscores, and periods.
pub fn valid_machine_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Slugify a generator project name into a machine name: lowercase,
/// whitespace runs become single hyphens, anything else invalid is dropped.
pub fn machine_name_slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            pending_sep = !out.is_empty();
        } else if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            if pending_sep {
                out.push('-');
                pending_sep = false;
            }
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// One piece of a version string for ordering purposes.
///
/// Numeric segments compare numerically and beat textual segments at the
/// same position, so `1.0.1 > 1.0.rc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Text(String),
    Number(u64),
}

fn version_segments(version: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    for part in version.split(['.', '-', '_', '+']) {
        let mut rest = part;
        while !rest.is_empty() {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits > 0 {
                let (num, tail) = rest.split_at(digits);
                // Absurdly long digit runs saturate rather than panic.
                segments.push(Segment::Number(num.parse().unwrap_or(u64::MAX)));
                rest = tail;
            } else {
                let letters = rest.chars().take_while(|c| !c.is_ascii_digit()).count();
                let (text, tail) = rest.split_at(letters);
                segments.push(Segment::Text(text.to_ascii_lowercase()));
                rest = tail;
            }
        }
    }
    segments
}

/// Numeric-aware ordering over arbitrary version strings.
///
/// `1.10.0 > 1.9.2`, and a trailing textual segment marks a pre-release:
/// `1.0.0-rc1 < 1.0.0`. Used to pick the latest version of a project.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let sa = version_segments(a);
    let sb = version_segments(b);
    let mut ia = sa.iter();
    let mut ib = sb.iter();
    loop {
        match (ia.next(), ib.next()) {
            (Some(x), Some(y)) => match x.cmp(y) {
                Ordering::Equal => continue,
                other => return other,
            },
            // A leftover textual segment is a pre-release marker, so the
            // shorter version wins; a leftover number extends the release.
            (Some(Segment::Text(_)), None) => return Ordering::Less,
            (Some(Segment::Number(_)), None) => return Ordering::Greater,
            (None, Some(Segment::Text(_))) => return Ordering::Greater,
            (None, Some(Segment::Number(_))) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_segments_compare_numerically() {
        assert_eq!(compare_versions("1.10.0", "1.9.2"), Ordering::Greater);
        assert_eq!(compare_versions("0.9", "0.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
    }

    #[test]
    fn prerelease_sorts_below_release() {
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0", "1.0.0-dev"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0-rc1", "1.0.0-rc2"), Ordering::Less);
    }

    #[test]
    fn longer_numeric_version_is_greater() {
        assert_eq!(compare_versions("2.0", "2.0.1"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0.1", "2.0"), Ordering::Greater);
    }

    #[test]
    fn calendar_style_versions_order() {
        assert_eq!(compare_versions("2022.10", "2022.9"), Ordering::Greater);
    }

    #[test]
    fn machine_name_validation() {
        assert!(valid_machine_name("my-project"));
        assert!(valid_machine_name("docs.example.com"));
        assert!(valid_machine_name("a_b.c-d1"));
        assert!(!valid_machine_name(""));
        assert!(!valid_machine_name("has space"));
        assert!(!valid_machine_name("caf\u{e9}"));
    }

    #[test]
    fn slugify_project_names() {
        assert_eq!(machine_name_slug("My Project"), "my-project");
        assert_eq!(machine_name_slug("  Spaced   Out  "), "spaced-out");
        assert_eq!(machine_name_slug("docs.example.com"), "docs.example.com");
        assert_eq!(machine_name_slug("Caf\u{e9} API"), "caf-api");
    }

    #[test]
    fn special_pages_and_odd_titles() {
        assert_eq!(special_page_title("genindex"), Some("General Index"));
        assert_eq!(special_page_title("_modules/index"), Some("Module code"));
        assert_eq!(special_page_title("intro/setup"), None);
        assert!(ODD_TITLES.contains(&"&lt;no title&gt;"));
    }
}
