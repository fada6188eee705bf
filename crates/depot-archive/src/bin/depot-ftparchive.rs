use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use depot_archive::{
    walk_tree, CacheDb, ContentsWriter, OverrideTable, PackagesWriter, ReleaseWriter,
    SourcesWriter,
};
use depot_util::Configuration;

#[derive(Parser)]
#[command(name = "depot-ftparchive", about = "Generate repository index files")]
struct Cli {
    /// Set an arbitrary configuration option
    #[arg(short = 'o', value_name = "KEY=VALUE", global = true)]
    options: Vec<String>,

    /// Quietness level
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    quiet: u8,

    /// Cache database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a Packages index for a tree of binary packages
    Packages {
        tree: PathBuf,
        override_file: Option<PathBuf>,
        extra_override: Option<PathBuf>,
    },
    /// Write a Sources index for a tree of source control files
    Sources {
        tree: PathBuf,
        override_file: Option<PathBuf>,
    },
    /// Write a Contents listing for a tree of binary packages
    Contents { tree: PathBuf },
    /// Write a Release manifest over an index directory
    Release { dir: PathBuf },
}

fn open_db(cli: &Cli) -> anyhow::Result<CacheDb> {
    let path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from("./packages.db"));
    CacheDb::open(&path).with_context(|| format!("opening cache {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.quiet == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }

    let mut config = Configuration::new();
    for item in &cli.options {
        config
            .set_cli_item(item)
            .with_context(|| format!("bad -o item {item:?}"))?;
    }

    let stdout = std::io::stdout();
    match &cli.command {
        Command::Packages {
            tree,
            override_file,
            extra_override,
        } => {
            let mut db = open_db(&cli)?;
            let mut out = stdout.lock();
            let mut writer = PackagesWriter::new(&mut out, tree);
            if let Some(path) = override_file {
                writer = writer.with_overrides(OverrideTable::read_binary(path)?);
            }
            if let Some(path) = extra_override {
                let mut extra = OverrideTable::default();
                extra.read_extra(path)?;
                writer = writer.with_extra_overrides(extra);
            }
            for deb in walk_tree(tree, &["*.deb", "*.udeb"])? {
                if let Err(error) = writer.write_package(&mut db, &deb) {
                    tracing::warn!(deb = %deb.display(), %error, "skipping package");
                }
            }
            db.flush()?;
        }
        Command::Sources {
            tree,
            override_file,
        } => {
            let mut db = open_db(&cli)?;
            let mut out = stdout.lock();
            let mut writer = SourcesWriter::new(&mut out, tree);
            if let Some(path) = override_file {
                writer = writer.with_overrides(OverrideTable::read_source(path)?);
            }
            for dsc in walk_tree(tree, &["*.dsc"])? {
                if let Err(error) = writer.write_source(&mut db, &dsc) {
                    tracing::warn!(dsc = %dsc.display(), %error, "skipping source");
                }
            }
            db.flush()?;
        }
        Command::Contents { tree } => {
            let mut db = open_db(&cli)?;
            let mut contents = ContentsWriter::new();
            for deb in walk_tree(tree, &["*.deb", "*.udeb"])? {
                let name = deb
                    .file_stem()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let package = name.split('_').next().unwrap_or(&name).to_string();
                if let Err(error) = contents.add_package(&mut db, &deb, &package) {
                    tracing::warn!(deb = %deb.display(), %error, "skipping contents");
                }
            }
            contents.write(&mut stdout.lock())?;
            db.flush()?;
        }
        Command::Release { dir } => {
            let mut writer = ReleaseWriter::from_config(&config);
            for entry in walk_tree(dir, &["Packages*", "Sources*", "Contents*", "Translation*"])? {
                let relative = entry
                    .strip_prefix(dir)
                    .unwrap_or(&entry)
                    .to_string_lossy()
                    .into_owned();
                writer.add_file(dir, &relative)?;
            }
            let mut out = stdout.lock();
            writer.write(&mut out)?;
            out.flush()?;
            if config.find_bool("FTPArchive::Release::Acquire-By-Hash", false) {
                writer.link_by_hash(dir)?;
            }
        }
    }
    Ok(())
}
