//! hitcache CLI binary
//!
//! A thin command-line front end over `hitcache::SourceCache`.

use clap::{Parser, Subcommand};
use hitcache::config::CacheConfig;
use hitcache::{CacheError, SourceCache};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "hitcache")]
#[command(author = "hitcache contributors")]
#[command(version)]
#[command(about = "Content-addressed source cache: fetch, verify, and unpack", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a TOML config file (overrides $HITCACHE_CONFIG and the platform default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a known key, downloading from `--url` only if not already cached
    Fetch {
        /// Key of the form `<type>:<digest>`
        key: String,
        /// Source URL to fetch from if not already cached
        #[arg(long)]
        url: Option<String>,
        /// Logical project namespace (required for `git:` keys)
        #[arg(long)]
        project: Option<String>,
    },
    /// Download and ingest an archive whose key is not yet known
    FetchArchive {
        /// Archive URL
        url: String,
        /// Archive type (`tar.gz`, `tar.bz2`, `zip`); inferred from the URL if omitted
        #[arg(long = "type")]
        archive_type: Option<String>,
        /// Expected digest, if already known
        #[arg(long)]
        digest: Option<String>,
    },
    /// Resolve a VCS rev and fetch it into a project's mirror
    FetchVcs {
        /// Repository URL
        #[arg(long)]
        url: Option<String>,
        /// Rev to resolve against the remote (branch, tag, or symbolic ref)
        #[arg(long)]
        rev: Option<String>,
        /// Logical project namespace
        #[arg(long)]
        project: String,
        /// Already-resolved commit, if known
        #[arg(long)]
        commit: Option<String>,
    },
    /// Verify and extract `key` into `dir`
    Unpack {
        /// Key of the form `<type>:<digest>`
        key: String,
        /// Destination directory
        dir: PathBuf,
    },
    /// Hit-pack every file under `dir` and publish it as a `files:` key
    Put {
        /// Directory to pack, recursively
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("hitcache: error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        tracing::Level::ERROR
    } else {
        match verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> hitcache::Result<String> {
    let config = CacheConfig::load_or_default(cli.config.as_deref())?;
    let cache = SourceCache::init(&config.cache_dir, config.mirrors.clone(), config.create_dirs)?;

    match &cli.command {
        Commands::Fetch { key, url, project } => {
            let key = cache.fetch(key, url.as_deref(), project.as_deref())?;
            Ok(key)
        }
        Commands::FetchArchive { url, archive_type, digest } => {
            cache.fetch_archive(url, archive_type.as_deref(), digest.as_deref())
        }
        Commands::FetchVcs { url, rev, project, commit } => {
            cache.fetch_vcs(project, url.as_deref(), rev.as_deref(), commit.as_deref())
        }
        Commands::Unpack { key, dir } => {
            cache.unpack(key, dir)?;
            Ok(format!("unpacked {key} into {}", dir.display()))
        }
        Commands::Put { dir } => {
            let files = collect_files(dir)?;
            cache.put(files)
        }
    }
}

/// Read every regular file under `dir`, recursively, keyed by its path
/// relative to `dir` (with forward-slash separators, matching the
/// hit-pack filename convention regardless of host platform).
fn collect_files(dir: &std::path::Path) -> hitcache::Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    collect_files_into(dir, dir, &mut files)?;
    Ok(files)
}

fn collect_files_into(
    root: &std::path::Path,
    dir: &std::path::Path,
    out: &mut Vec<(String, Vec<u8>)>,
) -> hitcache::Result<()> {
    for entry in std::fs::read_dir(dir).map_err(CacheError::Io)? {
        let entry = entry.map_err(CacheError::Io)?;
        let path = entry.path();
        if path.is_dir() {
            collect_files_into(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .expect("path was walked from root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let contents = std::fs::read(&path).map_err(CacheError::Io)?;
            out.push((relative, contents));
        }
    }
    Ok(())
}
