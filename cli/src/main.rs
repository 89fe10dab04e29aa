use anyhow::Result;
use clap::{Parser, Subcommand};
use sticker_keywords::persist::keywords_path;
use sticker_keywords::{ItemId, KeywordStore};
use tracing_subscriber::{fmt, EnvFilter};

use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keywords")]
#[command(about = "Inspect and edit a sticker keywords file", long_about = None)]
struct Cli {
    /// Working directory holding tdata/sticker_keywords.json
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List items whose keywords match TEXT ("!" matches everything)
    Query {
        text: String,
        /// Match whole keywords only
        #[arg(long, default_value_t = false)]
        exact: bool,
    },
    /// Print the keywords of an item, most used first
    Get { id: ItemId },
    /// Replace the keyword set of an item (no keywords clears it)
    Set { id: ItemId, keywords: Vec<String> },
    /// Record that an item was picked through a keyword
    Hit { keyword: String, id: ItemId },
    /// Rewrite the file in the current format
    Migrate,
    /// Print the current document
    Dump,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
    let cli = Cli::parse();
    let stdout = io::stdout();
    run(cli, &mut stdout.lock())
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let path = keywords_path(&cli.workdir);
    let store = KeywordStore::new(&path);

    match cli.command {
        Commands::Query { text, exact } => {
            store.load()?;
            for hit in store.query(&text, exact) {
                writeln!(out, "{}\t{}\t{}\t{}", hit.id, hit.count, hit.total, hit.keyword)?;
            }
        }
        Commands::Get { id } => {
            store.load()?;
            for keyword in store.get_keywords(id) {
                writeln!(out, "{keyword}")?;
            }
        }
        Commands::Set { id, keywords } => {
            store.load()?;
            store.set_keywords(id, &keywords);
            // The store only logs failed writes; save again so they fail the command.
            store.save()?;
            tracing::info!(id, keywords = keywords.len(), "keywords set");
        }
        Commands::Hit { keyword, id } => {
            store.load()?;
            let total = store.record_hit(&keyword, id);
            // Same as `set`: surface a failed write as a non-zero exit.
            store.save()?;
            writeln!(out, "{total}")?;
        }
        Commands::Migrate => match store.load_version()? {
            Some(version) => {
                store.save()?;
                let current = sticker_keywords::FormatVersion::CURRENT;
                writeln!(out, "{}: {version} -> {current}", path.display())?;
            }
            None => writeln!(out, "{}: no keywords file", path.display())?,
        },
        Commands::Dump => {
            store.load()?;
            write!(out, "{}", store.to_document()?)?;
        }
    }
    Ok(())
}
