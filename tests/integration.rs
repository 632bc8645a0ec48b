use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dock_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("dock");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docharbor.sqlite"

[media]
root = "{root}/media"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = root.join("docharbor.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dock(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dock_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dock binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Write an unpacked doc bundle directory for the given release.
fn write_bundle(dir: &Path, release: &str) {
    fs::create_dir_all(dir.join("usage")).unwrap();
    fs::create_dir_all(dir.join("_images")).unwrap();

    let context = serde_json::json!({
        "project": "My Service",
        "release": release,
        "sphinx_version": "7.2.6",
        "root_doc": "index",
    });
    fs::write(
        dir.join("globalcontext.json"),
        serde_json::to_vec(&context).unwrap(),
    )
    .unwrap();

    let index = serde_json::json!({
        "title": "Welcome",
        "body": "<h1>Welcome</h1><p>Start with <a class=\"reference internal\" \
                 href=\"usage/install/\">installation</a>.</p>\
                 <img src=\"_images/diagram.png\" alt=\"overview\"/>",
        "toc": "<ul><li><a href=\"#welcome\">Welcome</a></li></ul>",
        "parents": [],
        "next": {"title": "Installation"},
        "globaltoc": "<ul><li><a href=\"usage/install/\">Installation</a></li></ul>",
    });
    fs::write(dir.join("index.fjson"), serde_json::to_vec(&index).unwrap()).unwrap();

    let install = serde_json::json!({
        "title": "Installation",
        "body": "<h1>Installation</h1><p>Install the service with a package manager. \
                 The daemon reads its flux capacitor settings at startup.</p>",
        "toc": "",
        "parents": [{"title": "Welcome"}],
        "next": null,
    });
    fs::write(
        dir.join("usage/install.fjson"),
        serde_json::to_vec(&install).unwrap(),
    )
    .unwrap();

    let genindex = serde_json::json!({
        "title": "Index",
        "body": "<p>qqzzunsearchable entries live here</p>",
        "parents": [],
        "next": null,
    });
    fs::write(
        dir.join("genindex.fjson"),
        serde_json::to_vec(&genindex).unwrap(),
    )
    .unwrap();

    fs::write(dir.join("_images/diagram.png"), b"\x89PNG fake bytes").unwrap();
}

/// Zip a bundle directory under one containing folder, the way release
/// archives usually ship.
fn zip_bundle(dir: &Path, archive: &Path, container: &str) {
    let file = fs::File::create(archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap();
        let name = format!("{}/{}", container, relative.display()).replace('\\', "/");
        writer.start_file(name, options).unwrap();
        writer.write_all(&fs::read(entry.path()).unwrap()).unwrap();
    }
    writer.finish().unwrap();
}

fn setup_with_import(release: &str) -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    run_dock(&config_path, &["init"]);
    run_dock(&config_path, &["project", "add", "my-service", "My Service"]);

    let bundle = tmp.path().join(format!("bundle-{release}"));
    write_bundle(&bundle, release);
    let (stdout, stderr, success) =
        run_dock(&config_path, &["import", bundle.to_str().unwrap()]);
    assert!(success, "import failed: stdout={stdout}, stderr={stderr}");

    (tmp, config_path)
}

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_dock(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, first) = run_dock(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_dock(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn import_requires_registered_project() {
    let (tmp, config_path) = setup_test_env();
    run_dock(&config_path, &["init"]);

    let bundle = tmp.path().join("bundle");
    write_bundle(&bundle, "1.0.0");
    let (_, stderr, success) = run_dock(&config_path, &["import", bundle.to_str().unwrap()]);
    assert!(!success);
    assert!(
        stderr.contains("no project registered"),
        "unexpected error: {stderr}"
    );
}

#[test]
fn import_reports_pages_and_images() {
    let (tmp, config_path) = setup_test_env();
    run_dock(&config_path, &["init"]);
    run_dock(&config_path, &["project", "add", "my-service", "My Service"]);

    let bundle = tmp.path().join("bundle");
    write_bundle(&bundle, "1.0.0");
    let (stdout, stderr, success) =
        run_dock(&config_path, &["import", bundle.to_str().unwrap()]);
    assert!(success, "import failed: stdout={stdout}, stderr={stderr}");
    assert!(
        stdout.contains("Imported my-service 1.0.0 (3 pages, 1 images)"),
        "unexpected summary: {stdout}"
    );
}

#[test]
fn reimport_needs_force() {
    let (tmp, config_path) = setup_with_import("1.0.0");
    let bundle = tmp.path().join("bundle-1.0.0");

    let (_, stderr, success) = run_dock(&config_path, &["import", bundle.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("already imported"), "got: {stderr}");

    let (stdout, stderr, success) = run_dock(
        &config_path,
        &["import", bundle.to_str().unwrap(), "--force"],
    );
    assert!(success, "forced import failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Imported my-service 1.0.0 (3 pages, 1 images)"));
}

#[test]
fn import_zip_with_container_folder() {
    let (tmp, config_path) = setup_test_env();
    run_dock(&config_path, &["init"]);
    run_dock(&config_path, &["project", "add", "my-service", "My Service"]);

    let dir = tmp.path().join("bundle");
    write_bundle(&dir, "2.0.0");
    let archive = tmp.path().join("docs.zip");
    zip_bundle(&dir, &archive, "my-service-docs");

    let (stdout, stderr, success) =
        run_dock(&config_path, &["import", archive.to_str().unwrap()]);
    assert!(success, "zip import failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Imported my-service 2.0.0"));
}

#[test]
fn duplicate_titles_link_to_first_page_in_path_order() {
    let (tmp, config_path) = setup_test_env();
    run_dock(&config_path, &["init"]);
    run_dock(&config_path, &["project", "add", "my-service", "My Service"]);

    let dir = tmp.path().join("bundle");
    fs::create_dir_all(&dir).unwrap();
    let context = serde_json::json!({
        "project": "My Service",
        "release": "1.0.0",
        "root_doc": "index",
    });
    fs::write(
        dir.join("globalcontext.json"),
        serde_json::to_vec(&context).unwrap(),
    )
    .unwrap();

    let index = serde_json::json!({
        "title": "Welcome",
        "body": "<p>start</p>",
        "parents": [],
        "next": {"title": "Changelog"},
    });
    fs::write(dir.join("index.fjson"), serde_json::to_vec(&index).unwrap()).unwrap();

    // Two pages share a title; linkage must bind the first in path order
    for path in ["aa-changes", "zz-changes"] {
        let doc = serde_json::json!({
            "title": "Changelog",
            "body": "<p>changes</p>",
            "parents": [{"title": "Welcome"}],
            "next": null,
        });
        fs::write(
            dir.join(format!("{path}.fjson")),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();
    }

    let (stdout, stderr, success) = run_dock(&config_path, &["import", dir.to_str().unwrap()]);
    assert!(success, "import failed: stdout={stdout}, stderr={stderr}");

    let (stdout, _, success) = run_dock(&config_path, &["get", "my-service", "1.0.0", "index"]);
    assert!(success);
    assert!(
        stdout.contains("next:     Changelog [aa-changes]"),
        "next bound to the wrong page: {stdout}"
    );
}

#[test]
fn get_shows_rewritten_navigation() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, stderr, success) = run_dock(
        &config_path,
        &["get", "my-service", "1.0.0", "usage/install"],
    );
    assert!(success, "get failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("title:    Installation"));
    assert!(stdout.contains("parent:   Welcome [index]"));
    assert!(stdout.contains("prev:     Welcome [index]"));
    // First h1 is removed from the body
    assert!(!stdout.contains("<h1>Installation</h1>"));
}

#[test]
fn body_links_and_images_are_rewritten() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, _, success) = run_dock(&config_path, &["get", "my-service", "1.0.0", "index"]);
    assert!(success);
    assert!(
        stdout.contains("/api/v1/projects/my-service/versions/1.0.0/pages/usage/install"),
        "internal link not rewritten: {stdout}"
    );
    assert!(
        stdout.contains("/api/v1/projects/my-service/versions/1.0.0/images/"),
        "image src not rewritten: {stdout}"
    );
}

#[test]
fn tree_nests_pages_under_parents() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, stderr, success) = run_dock(&config_path, &["tree", "my-service", "1.0.0"]);
    assert!(success, "tree failed: stdout={stdout}, stderr={stderr}");

    let welcome_line = stdout.lines().position(|l| l.contains("Welcome")).unwrap();
    let install_line = stdout
        .lines()
        .position(|l| l.contains("Installation"))
        .unwrap();
    assert!(install_line > welcome_line);
    assert!(stdout
        .lines()
        .any(|l| l.starts_with("  ") && l.contains("Installation")));
}

#[test]
fn toc_prints_global_contents() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, stderr, success) = run_dock(&config_path, &["toc", "my-service", "1.0.0"]);
    assert!(success, "toc failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Installation"));
}

#[test]
fn search_finds_page_text() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, stderr, success) =
        run_dock(&config_path, &["search", "flux capacitor", "--latest"]);
    assert!(success, "search failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Installation"), "no hit: {stdout}");
    assert!(stdout.contains("path: usage/install"));
    assert!(stdout.contains("my-service"));
}

#[test]
fn special_pages_are_not_searchable() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, _, success) = run_dock(&config_path, &["search", "qqzzunsearchable"]);
    assert!(success);
    assert!(stdout.contains("No results."), "got: {stdout}");
}

#[test]
fn prerelease_is_not_marked_latest() {
    let (tmp, config_path) = setup_with_import("1.0.0");

    let bundle = tmp.path().join("bundle-rc");
    write_bundle(&bundle, "1.1.0-rc1");
    let (_, _, success) = run_dock(&config_path, &["import", bundle.to_str().unwrap()]);
    assert!(success);

    let (stdout, _, _) = run_dock(&config_path, &["latest", "my-service"]);
    assert_eq!(stdout.trim(), "1.0.0");

    // Manual override wins until the next recompute
    let (_, _, success) = run_dock(
        &config_path,
        &["latest", "my-service", "--set", "1.1.0-rc1"],
    );
    assert!(success);
    let (stdout, _, _) = run_dock(&config_path, &["latest", "my-service"]);
    assert_eq!(stdout.trim(), "1.1.0-rc1");
}

#[test]
fn newer_release_takes_over_latest() {
    let (tmp, config_path) = setup_with_import("1.9.0");

    let bundle = tmp.path().join("bundle-new");
    write_bundle(&bundle, "1.10.0");
    run_dock(&config_path, &["import", bundle.to_str().unwrap()]);

    let (stdout, _, _) = run_dock(&config_path, &["latest", "my-service"]);
    assert_eq!(stdout.trim(), "1.10.0");
}

#[test]
fn version_delete_recomputes_latest() {
    let (tmp, config_path) = setup_with_import("1.0.0");

    let bundle = tmp.path().join("bundle-new");
    write_bundle(&bundle, "2.0.0");
    run_dock(&config_path, &["import", bundle.to_str().unwrap()]);

    let (stdout, _, _) = run_dock(&config_path, &["latest", "my-service"]);
    assert_eq!(stdout.trim(), "2.0.0");

    let (stdout, _, success) =
        run_dock(&config_path, &["version", "delete", "my-service", "2.0.0"]);
    assert!(success, "delete failed: {stdout}");
    assert!(stdout.contains("Deleted my-service 2.0.0"));

    let (stdout, _, _) = run_dock(&config_path, &["latest", "my-service"]);
    assert_eq!(stdout.trim(), "1.0.0");

    let (stdout, _, _) = run_dock(&config_path, &["version", "list", "my-service"]);
    assert!(!stdout.contains("2.0.0"));
}

#[test]
fn classifiers_filter_project_list() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    run_dock(
        &config_path,
        &["project", "classify", "my-service", "Language :: Rust"],
    );
    run_dock(&config_path, &["project", "add", "other", "Other"]);

    let (stdout, _, success) = run_dock(&config_path, &["project", "list", "--classifier", "Rust"]);
    assert!(success);
    assert!(stdout.contains("my-service"));
    assert!(!stdout.contains("other"));

    let (stdout, _, success) = run_dock(&config_path, &["classifiers"]);
    assert!(success);
    assert!(stdout.contains("Language"));
    assert!(stdout.contains("Rust (1)"));
}

#[test]
fn stats_summarizes_holdings() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, stderr, success) = run_dock(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("Projects:    1"));
    assert!(stdout.contains("Versions:    1"));
    assert!(stdout.contains("my-service"));
}

#[test]
fn search_respects_limit() {
    let (_tmp, config_path) = setup_with_import("1.0.0");

    let (stdout, _, success) =
        run_dock(&config_path, &["search", "the", "--limit", "1"]);
    assert!(success);
    // At most one numbered result line
    let numbered = stdout.lines().filter(|l| l.starts_with("1. ")).count();
    assert!(numbered <= 1);
    assert!(!stdout.contains("\n2. "));
}
