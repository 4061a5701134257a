//! treefs command-line tool.
//!
//! ## Usage
//!
//! ```bash
//! # Create a volume in ./treefs.db
//! treefs init --label DATA --cluster-size 4096
//!
//! treefs mkdir docs/notes
//! echo hello | treefs write docs/notes/hello.txt
//! treefs cat docs/notes/hello.txt
//! treefs mv docs/notes/hello.txt docs
//! treefs tree
//!
//! # Another store, picked by config file or flag
//! treefs --config treefs.toml info --json
//! treefs --database /tmp/other.db --volume <UUID> ls
//!
//! # Self-contained walkthrough on an in-memory volume
//! treefs demo
//! ```
//!
//! Paths are relative to the volume root. Leading and trailing `/` are
//! ignored, and an empty path names the root.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use treefs_kernel::{FileSystem, FsError, FsResult, MemoryBackend, NodeId, SEPARATOR, StoreConfig, VolumeConfig};
use treefs_types::{NodeKind, VolumeId, VolumeRecord};

/// Database used when neither `--database` nor the config file names one.
const DEFAULT_DATABASE: &str = "treefs.db";

/// Transactional hierarchical file system on SQLite.
#[derive(Parser, Debug)]
#[command(name = "treefs", version)]
#[command(about = "Transactional hierarchical file system on SQLite")]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Volume to open; may be omitted when the store holds exactly one
    #[arg(long, global = true)]
    volume: Option<VolumeId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new volume
    Init {
        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        cluster_size: Option<u32>,

        /// Name of the root directory
        #[arg(long)]
        root_name: Option<String>,
    },

    /// Build a sample tree on an in-memory volume and print it
    Demo,

    #[command(flatten)]
    Volume(VolumeCommand),
}

/// Commands that operate on an existing volume.
#[derive(Subcommand, Debug)]
enum VolumeCommand {
    /// Show volume metadata
    Info {
        #[arg(long)]
        json: bool,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },

    /// Create a directory and any missing parents
    Mkdir { path: String },

    /// Create an empty file and any missing parent directories
    Touch { path: String },

    /// Replace a file's content with TEXT, or with stdin when TEXT is omitted
    Write { path: String, text: Option<String> },

    /// Print a file's content
    Cat { path: String },

    /// Delete a file or directory tree
    Rm { path: String },

    /// Move a node into another directory
    Mv { source: String, target: String },

    /// Copy a node (and its subtree) into another directory
    Cp { source: String, target: String },

    /// Give a node a new name
    Rename { path: String, name: String },

    /// Set the volume label
    Label { label: String },

    /// Print a directory tree
    Tree {
        #[arg(default_value = "")]
        path: String,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("treefs: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Demo => cmd_demo(&mut out),
        Command::Init {
            label,
            cluster_size,
            root_name,
        } => {
            let config = load_config(cli.config, cli.database)?;
            let mut volume = config.volume.clone();
            if let Some(label) = label {
                volume.label = label;
            }
            if let Some(size) = cluster_size {
                volume.cluster_size = size;
            }
            if let Some(name) = root_name {
                volume.root_name = name;
            }
            cmd_init(&config, volume, &mut out)
        }
        Command::Volume(command) => {
            let config = load_config(cli.config, cli.database)?;
            let mut fs = open_volume(&config, cli.volume)?;
            let result = run_volume_command(&mut fs, command, &mut out);
            fs.close();
            result
        }
    }
}

fn load_config(path: Option<PathBuf>, database: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(&path)?,
        None => StoreConfig::default(),
    };
    if database.is_some() {
        config.database = database;
    }
    if config.database.is_none() {
        config.database = Some(PathBuf::from(DEFAULT_DATABASE));
    }
    Ok(config)
}

fn open_volume(config: &StoreConfig, volume: Option<VolumeId>) -> Result<FileSystem> {
    let backend = config.open_backend().context("failed to open store")?;
    let fs = match volume {
        Some(id) => FileSystem::open(backend, id)?,
        None => FileSystem::open_sole(backend).context("pass --volume to pick a volume")?,
    };
    Ok(fs)
}

fn run_volume_command(fs: &mut FileSystem, command: VolumeCommand, out: &mut impl Write) -> Result<()> {
    match command {
        VolumeCommand::Info { json } => cmd_info(fs, json, out),
        VolumeCommand::Ls { path } => cmd_ls(fs, &path, out),
        VolumeCommand::Mkdir { path } => {
            let root = fs.root()?;
            fs.create_directory(root, relative(&path))?;
            Ok(())
        }
        VolumeCommand::Touch { path } => {
            let root = fs.root()?;
            fs.create_file(root, relative(&path))?;
            Ok(())
        }
        VolumeCommand::Write { path, text } => {
            let data = match text {
                Some(text) => text.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf).context("failed to read stdin")?;
                    buf
                }
            };
            cmd_write(fs, &path, &data)
        }
        VolumeCommand::Cat { path } => {
            let file = resolve(fs, &path)?;
            out.write_all(&fs.read(file)?)?;
            Ok(())
        }
        VolumeCommand::Rm { path } => {
            let node = resolve(fs, &path)?;
            fs.delete(node)?;
            Ok(())
        }
        VolumeCommand::Mv { source, target } => {
            let node = resolve(fs, &source)?;
            let target = resolve(fs, &target)?;
            fs.move_to(node, target)?;
            writeln!(out, "{}", fs.path(node)?)?;
            Ok(())
        }
        VolumeCommand::Cp { source, target } => {
            let node = resolve(fs, &source)?;
            let target = resolve(fs, &target)?;
            let copy = fs.copy_to(node, target)?;
            writeln!(out, "{}", fs.path(copy)?)?;
            Ok(())
        }
        VolumeCommand::Rename { path, name } => {
            let node = resolve(fs, &path)?;
            fs.rename(node, &name)?;
            writeln!(out, "{}", fs.path(node)?)?;
            Ok(())
        }
        VolumeCommand::Label { label } => {
            fs.set_volume_label(&label)?;
            Ok(())
        }
        VolumeCommand::Tree { path } => {
            let dir = resolve(fs, &path)?;
            writeln!(out, "{}", entry_label(fs, dir)?)?;
            print_tree(fs, dir, "", out)
        }
    }
}

// ============================================================================
// Path helpers
// ============================================================================

fn relative(path: &str) -> &str {
    path.trim_matches(SEPARATOR)
}

/// Resolve a path below the root, requiring every segment to match.
fn resolve(fs: &mut FileSystem, path: &str) -> Result<NodeId> {
    lookup(fs, path)?.ok_or_else(|| FsError::does_not_exist(relative(path)).into())
}

/// The node at exactly `path`, or `None` when nothing lives there.
fn lookup(fs: &mut FileSystem, path: &str) -> FsResult<Option<NodeId>> {
    let root = fs.root()?;
    let path = relative(path);
    if path.is_empty() {
        return Ok(Some(root));
    }

    let depth = path.split(SEPARATOR).count() + 1;
    match fs.get_path(root, path)? {
        Some(node) if fs.path(node)?.depth() == depth => Ok(Some(node)),
        _ => Ok(None),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_init(config: &StoreConfig, volume: VolumeConfig, out: &mut impl Write) -> Result<()> {
    let backend = config.open_backend().context("failed to open store")?;
    let mut fs = FileSystem::new(backend, volume)?;
    fs.create()?;
    fs.root()?;
    writeln!(out, "{}", fs.unique_id())?;
    fs.close();
    Ok(())
}

#[derive(Debug, Serialize)]
struct Info {
    id: VolumeId,
    label: String,
    cluster_size: u32,
    root_name: String,
    /// Every volume in the store, this one included.
    volumes: Vec<VolumeRecord>,
}

fn cmd_info(fs: &mut FileSystem, json: bool, out: &mut impl Write) -> Result<()> {
    let info = Info {
        id: fs.unique_id(),
        label: fs.volume_label().to_string(),
        cluster_size: fs.cluster_size(),
        root_name: fs.root_name().to_string(),
        volumes: fs.volumes()?,
    };

    if json {
        serde_json::to_writer_pretty(&mut *out, &info)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "id:           {}", info.id)?;
    writeln!(out, "label:        {}", info.label)?;
    writeln!(out, "cluster size: {}", info.cluster_size)?;
    writeln!(out, "root:         {}", info.root_name)?;
    if info.volumes.len() > 1 {
        writeln!(out, "volumes in store:")?;
        for v in &info.volumes {
            writeln!(out, "  {} {}", v.id, v.label)?;
        }
    }
    Ok(())
}

fn cmd_ls(fs: &mut FileSystem, path: &str, out: &mut impl Write) -> Result<()> {
    let dir = resolve(fs, path)?;
    for child in fs.children(dir)? {
        match fs.kind(child)? {
            NodeKind::Directory => writeln!(out, "d {:>10}  {}/", "-", fs.name(child)?)?,
            NodeKind::File => writeln!(out, "f {:>10}  {}", fs.size(child)?, fs.name(child)?)?,
        }
    }
    Ok(())
}

/// Write to an existing file, or create it first.
fn cmd_write(fs: &mut FileSystem, path: &str, data: &[u8]) -> Result<()> {
    let file = match lookup(fs, path)? {
        Some(file) => file,
        None => {
            let root = fs.root()?;
            fs.create_file(root, relative(path))?
        }
    };
    fs.set_data(file, data)?;
    Ok(())
}

fn entry_label(fs: &FileSystem, id: NodeId) -> Result<String> {
    let name = fs.name(id)?;
    Ok(match fs.kind(id)? {
        NodeKind::Directory => format!("{name}/"),
        NodeKind::File => format!("{name} ({} bytes)", fs.size(id)?),
    })
}

fn print_tree(fs: &mut FileSystem, dir: NodeId, prefix: &str, out: &mut impl Write) -> Result<()> {
    let children = fs.children(dir)?;
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        writeln!(out, "{prefix}{branch}{}", entry_label(fs, *child)?)?;
        if fs.is_directory(*child) {
            let extension = if last { "    " } else { "│   " };
            print_tree(fs, *child, &format!("{prefix}{extension}"), out)?;
        }
    }
    Ok(())
}

/// Build nested directories and a file, then copy the file's directory
/// into an ancestor.
fn cmd_demo(out: &mut impl Write) -> Result<()> {
    let mut fs = FileSystem::new(MemoryBackend::new(), VolumeConfig::new("DEMO").with_cluster_size(16))?;
    fs.create()?;
    let root = fs.root()?;

    let dir3 = fs.create_directory(root, "dir1/dir2/dir3")?;
    let dir4 = fs.create_directory(dir3, "dir4")?;
    let myfile = fs.create_file(dir4, "dir5/dir6/myfile")?;
    fs.set_data(myfile, b"The quick brown fox jumps over the lazy dog")?;
    let dir6 = fs.parent(myfile)?.context("file has no parent")?;

    writeln!(out, "{}", entry_label(&fs, root)?)?;
    print_tree(&mut fs, root, "", out)?;

    let copy = fs.copy_to(dir6, dir3)?;
    writeln!(out, "\ncopied {} -> {}\n", fs.path(dir6)?, fs.path(copy)?)?;

    writeln!(out, "{}", entry_label(&fs, root)?)?;
    print_tree(&mut fs, root, "", out)?;

    let copied = fs
        .get_path(copy, "myfile")?
        .context("copied file missing")?;
    writeln!(
        out,
        "\n{}: {} clusters of {} bytes",
        fs.path(copied)?,
        fs.cluster_count(copied)?,
        fs.cluster_size()
    )?;
    out.write_all(&fs.read(copied)?)?;
    writeln!(out)?;

    fs.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use treefs_kernel::{BackendOp, SqliteBackend};

    fn volume() -> (FileSystem, NodeId) {
        let mut fs = FileSystem::new(MemoryBackend::new(), VolumeConfig::default().with_cluster_size(4)).unwrap();
        fs.create().unwrap();
        let root = fs.root().unwrap();
        (fs, root)
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_volume_command() {
        let id = VolumeId::new();
        let cli = Cli::try_parse_from(["treefs", "--volume", &id.to_string(), "mv", "a/b", "c"]).unwrap();
        assert_eq!(cli.volume, Some(id));
        assert!(matches!(
            cli.command,
            Command::Volume(VolumeCommand::Mv { ref source, ref target }) if source == "a/b" && target == "c"
        ));

        let cli = Cli::try_parse_from(["treefs", "init", "--cluster-size", "512"]).unwrap();
        assert!(matches!(cli.command, Command::Init { cluster_size: Some(512), .. }));
    }

    #[test]
    fn test_resolve_requires_full_match() {
        let (mut fs, root) = volume();
        let file = fs.create_file(root, "docs/notes.txt").unwrap();

        assert_eq!(resolve(&mut fs, "").unwrap(), root);
        assert_eq!(resolve(&mut fs, "/").unwrap(), root);
        assert_eq!(resolve(&mut fs, "/docs/notes.txt/").unwrap(), file);
        assert!(resolve(&mut fs, "docs/notes.txt/extra").is_err());
        assert!(resolve(&mut fs, "missing").is_err());
    }

    #[test]
    fn test_write_creates_then_overwrites() {
        let (mut fs, _root) = volume();
        cmd_write(&mut fs, "a/b.txt", b"first").unwrap();
        cmd_write(&mut fs, "a/b.txt", b"second").unwrap();

        let file = resolve(&mut fs, "a/b.txt").unwrap();
        assert_eq!(fs.read(file).unwrap(), b"second");
    }

    #[test]
    fn test_write_surfaces_lookup_failure() {
        let backend = MemoryBackend::new();
        let shared = backend.clone();
        let mut fs = FileSystem::new(backend, VolumeConfig::default()).unwrap();
        fs.create().unwrap();
        fs.root().unwrap();

        let mut reopened = FileSystem::open(shared.clone(), fs.unique_id()).unwrap();
        reopened.root().unwrap();
        shared.fail_next(BackendOp::Select);

        let err = cmd_write(&mut reopened, "new.txt", b"x").unwrap_err();
        assert!(err.downcast_ref::<FsError>().is_some_and(FsError::is_persistence_failure));
        assert_eq!(shared.node_count(), 1);
    }

    #[test]
    fn test_ls_and_tree_output() {
        let (mut fs, root) = volume();
        let file = fs.create_file(root, "docs/a.txt").unwrap();
        fs.set_data(file, b"12345").unwrap();
        fs.create_directory(root, "empty").unwrap();

        let mut out = Vec::new();
        cmd_ls(&mut fs, "docs", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "f          5  a.txt\n");

        let mut out = Vec::new();
        run_volume_command(&mut fs, VolumeCommand::Tree { path: String::new() }, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "root/\n├── docs/\n│   └── a.txt (5 bytes)\n└── empty/\n"
        );
    }

    #[test]
    fn test_info_json() {
        let (mut fs, _root) = volume();
        let mut out = Vec::new();
        cmd_info(&mut fs, true, &mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["label"], "TREEFS");
        assert_eq!(value["cluster_size"], 4);
        assert_eq!(value["volumes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_demo_runs() {
        let mut out = Vec::new();
        cmd_demo(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("copied root/dir1/dir2/dir3/dir4/dir5/dir6 -> root/dir1/dir2/dir3/dir6"));
        assert!(text.ends_with("The quick brown fox jumps over the lazy dog\n"));
    }

    #[test]
    fn test_init_then_open_sole() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            database: Some(dir.path().join("store.db")),
            volume: VolumeConfig::new("DISK"),
        };

        let mut out = Vec::new();
        cmd_init(&config, config.volume.clone(), &mut out).unwrap();
        let id: VolumeId = String::from_utf8(out).unwrap().trim().parse().unwrap();

        let mut fs = open_volume(&config, None).unwrap();
        assert_eq!(fs.unique_id(), id);
        assert_eq!(fs.volume_label(), "DISK");
        fs.close();

        let backend = SqliteBackend::open(dir.path().join("store.db")).unwrap();
        assert!(FileSystem::open(backend, id).unwrap().exists().unwrap());
    }
}
