//! # docharbor CLI (`dock`)
//!
//! The `dock` binary is the operator interface for docharbor. It provides
//! commands for database initialization, project management, documentation
//! bundle import, search, navigation inspection, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! dock --config ./docharbor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dock init` | Create the SQLite database and run schema migrations |
//! | `dock project add <name> <title>` | Register a project |
//! | `dock project list` | List projects with version counts |
//! | `dock import <bundle>` | Import a documentation bundle (zip or directory) |
//! | `dock search "<query>"` | Search indexed pages |
//! | `dock get <project> <version> <path>` | Print one page |
//! | `dock tree <project> <version>` | Print the reconstructed page tree |
//! | `dock latest <project>` | Show or override the latest version |
//! | `dock serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! dock init --config ./docharbor.toml
//!
//! # Register a project and import a bundle for it
//! dock project add my-service "My Service"
//! dock import ./build/json-docs.zip
//!
//! # Re-import, replacing the existing version
//! dock import ./build/json-docs.zip --force
//!
//! # Search only the latest versions
//! dock search "connection pool" --latest
//!
//! # Start the HTTP API
//! dock serve --config ./docharbor.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docharbor::{
    classifiers, config, get, importer, migrate, projects, search, server, stats, toc,
};

/// docharbor CLI — a self-hosted documentation publishing service for
/// versioned doc sets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docharbor.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dock",
    about = "docharbor — a self-hosted documentation publishing service",
    version,
    long_about = "docharbor ingests the JSON-builder output of static site generators for \
    versioned software projects, stores pages, images, and navigation metadata in SQLite, \
    and serves everything back through a CLI and an authenticated JSON HTTP API with \
    full-text search and faceted filtering."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./docharbor.toml`. Database, media, server, import,
    /// and search settings are read from this file.
    #[arg(long, global = true, default_value = "./docharbor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (projects,
    /// classifiers, versions, pages, images, pages_fts). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Manage projects.
    ///
    /// Projects must be registered before documentation can be imported
    /// for them: the importer matches the bundle's project name against
    /// registered machine names.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage imported versions of a project.
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Import a documentation bundle.
    ///
    /// The bundle is the JSON-builder output of a static site generator
    /// (e.g. `sphinx-build -b json`), either zipped or as an unpacked
    /// build directory. The target project and version are read from the
    /// bundle's `globalcontext.json`.
    Import {
        /// Path to the bundle: a zip archive or a build directory.
        path: PathBuf,

        /// Replace the version if it was already imported.
        #[arg(long)]
        force: bool,
    },

    /// Search indexed pages.
    ///
    /// Full-text search over page titles and bodies, with project,
    /// classifier, and latest-only filters. Results include facet counts.
    Search {
        /// The search query string.
        query: String,

        /// Restrict to one project (machine name).
        #[arg(long)]
        project: Option<String>,

        /// Restrict to projects with a matching classifier (substring).
        #[arg(long)]
        classifier: Option<String>,

        /// Restrict to versions marked latest.
        #[arg(long)]
        latest: bool,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print one page of a version.
    ///
    /// Shows the page title, navigation neighbors, local contents, and
    /// rewritten body HTML.
    Get {
        /// Project machine name.
        project: String,
        /// Version string.
        version: String,
        /// Page path inside the version (e.g. `usage/install`).
        path: String,
    },

    /// Print the reconstructed page tree of a version.
    Tree {
        /// Project machine name.
        project: String,
        /// Version string.
        version: String,
    },

    /// Print the parsed global table of contents of a version.
    Toc {
        /// Project machine name.
        project: String,
        /// Version string.
        version: String,
    },

    /// Show or override which version of a project is latest.
    ///
    /// Without `--set`, prints the current latest version. With `--set`,
    /// forces a specific version; the next import for the project
    /// recomputes it from the exclusion rules.
    Latest {
        /// Project machine name.
        project: String,

        /// Force this version to be latest.
        #[arg(long)]
        set: Option<String>,
    },

    /// Print the classifier hierarchy with project counts.
    Classifiers,

    /// Show database statistics.
    ///
    /// Project, version, page, and image counts with a per-project
    /// breakdown.
    Stats,

    /// Start the JSON HTTP API.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// the docharbor API endpoints.
    Serve,
}

/// Project management subcommands.
#[derive(Subcommand)]
enum ProjectAction {
    /// Register a new project.
    Add {
        /// Machine name: letters, digits, '-', '_', '.'.
        machine_name: String,
        /// Human-readable title.
        title: String,
        /// Optional description.
        #[arg(long)]
        description: Option<String>,
    },

    /// List projects with version counts.
    List {
        /// Only projects with a matching classifier (substring).
        #[arg(long)]
        classifier: Option<String>,
        /// Only projects whose name or title contains this string.
        #[arg(long)]
        q: Option<String>,
    },

    /// Attach a classifier to a project, creating it if needed.
    ///
    /// Classifier names are hierarchical with ` :: ` separators,
    /// e.g. `Language :: Rust`.
    Classify {
        /// Project machine name.
        machine_name: String,
        /// Classifier name.
        classifier: String,

        /// Remove the classifier instead of adding it.
        #[arg(long)]
        remove: bool,
    },

    /// Attach a related external link to a project.
    Link {
        /// Project machine name.
        machine_name: String,
        /// Link title.
        title: String,
        /// Link URI.
        uri: String,
    },
}

/// Version management subcommands.
#[derive(Subcommand)]
enum VersionAction {
    /// List imported versions of a project.
    List {
        /// Project machine name.
        machine_name: String,
    },

    /// Delete a version: pages, images, search rows, and media files.
    ///
    /// Recomputes which remaining version is latest.
    Delete {
        /// Project machine name.
        machine_name: String,
        /// Version string.
        version: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docharbor=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => match action {
            ProjectAction::Add {
                machine_name,
                title,
                description,
            } => {
                projects::run_project_add(&cfg, &machine_name, &title, description).await?;
            }
            ProjectAction::List { classifier, q } => {
                projects::run_project_list(&cfg, classifier, q).await?;
            }
            ProjectAction::Classify {
                machine_name,
                classifier,
                remove,
            } => {
                if remove {
                    classifiers::run_declassify(&cfg, &machine_name, &classifier).await?;
                } else {
                    classifiers::run_classify(&cfg, &machine_name, &classifier).await?;
                }
            }
            ProjectAction::Link {
                machine_name,
                title,
                uri,
            } => {
                projects::run_project_link(&cfg, &machine_name, &title, &uri).await?;
            }
        },
        Commands::Version { action } => match action {
            VersionAction::List { machine_name } => {
                projects::run_versions(&cfg, &machine_name).await?;
            }
            VersionAction::Delete {
                machine_name,
                version,
            } => {
                projects::run_version_delete(&cfg, &machine_name, &version).await?;
            }
        },
        Commands::Import { path, force } => {
            importer::run_import(&cfg, &path, force).await?;
        }
        Commands::Search {
            query,
            project,
            classifier,
            latest,
            limit,
        } => {
            search::run_search(&cfg, &query, project, classifier, latest, limit).await?;
        }
        Commands::Get {
            project,
            version,
            path,
        } => {
            get::run_get(&cfg, &project, &version, &path).await?;
        }
        Commands::Tree { project, version } => {
            toc::run_tree(&cfg, &project, &version).await?;
        }
        Commands::Toc { project, version } => {
            toc::run_toc(&cfg, &project, &version).await?;
        }
        Commands::Latest { project, set } => {
            importer::run_latest(&cfg, &project, set).await?;
        }
        Commands::Classifiers => {
            classifiers::run_classifiers(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
