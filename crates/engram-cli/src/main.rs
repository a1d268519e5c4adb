//! Engram CLI
//!
//! Command-line interface for exercising the engram memory engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use engram_core::decay::PruneMode;
use engram_core::store::{JsonStore, MemoryStore};
use engram_core::{Candidate, Config, Engine, ForgetOptions, MergeOptions, Query, Store};

/// Engram - conversational memory engine CLI
#[derive(Parser)]
#[command(name = "engram")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the engram memory engine")]
struct Cli {
    /// Path to a store file. Omit for an ephemeral in-memory store. A
    /// `.db`/`.sqlite`/`.sqlite3` extension selects the SQLite backend when
    /// built with the `sqlite-store` feature; anything else is a JSON file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Active namespace.
    #[arg(long, global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a candidate through the admission pipeline directly.
    Store {
        content: String,
        #[arg(long, default_value = "fact")]
        category: String,
        #[arg(long)]
        explain: bool,
    },

    /// Recall memories relevant to a query.
    Recall {
        query: String,
        #[arg(long)]
        k: Option<usize>,
        /// Comma-separated category whitelist (e.g. `fact,skill`).
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long)]
        min_importance: Option<f32>,
        #[arg(long)]
        explain: bool,
    },

    /// Delete a memory by id.
    Forget { id: String },

    /// Bulk-forget memories by pruning policy and capacity pressure.
    Prune {
        #[arg(long, value_enum, default_value_t = PruneModeArg::Normal)]
        mode: PruneModeArg,
    },

    /// Merge near-duplicate memories within each category.
    Merge {
        #[arg(long, default_value_t = 0.85)]
        threshold: f32,
    },

    /// Show summary statistics for the active namespace.
    Stats,

    /// Export all memories in the active namespace.
    Export {
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },

    /// Import memories into the active namespace from a prior export.
    Import {
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = ImportFormat::Json)]
        format: ImportFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportFormat {
    Json,
    Markdown,
}

#[derive(Clone, Copy, ValueEnum)]
enum PruneModeArg {
    Gentle,
    Normal,
    Aggressive,
}

impl From<PruneModeArg> for PruneMode {
    fn from(mode: PruneModeArg) -> Self {
        match mode {
            PruneModeArg::Gentle => PruneMode::Gentle,
            PruneModeArg::Normal => PruneMode::Normal,
            PruneModeArg::Aggressive => PruneMode::Aggressive,
        }
    }
}

fn build_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let config = Config {
        namespace: cli.namespace.clone(),
        ..Config::default()
    };

    let store: Box<dyn Store> = match &cli.store {
        #[cfg(feature = "sqlite-store")]
        Some(path) if matches!(path.extension().and_then(|e| e.to_str()), Some("db" | "sqlite" | "sqlite3")) => {
            Box::new(engram_core::store::SqliteStore::open(path)?)
        }
        Some(path) => Box::new(JsonStore::open(path)?),
        None => Box::new(MemoryStore::new()),
    };

    Ok(Engine::new(config, store, None, None)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let engine = build_engine(&cli)?;

    match &cli.command {
        Commands::Store { content, category, explain } => {
            run_store(&engine, content, category, *explain)
        }
        Commands::Recall {
            query,
            k,
            categories,
            min_importance,
            explain,
        } => run_recall(&engine, query, *k, categories.clone(), *min_importance, *explain),
        Commands::Forget { id } => run_forget(&engine, id),
        Commands::Prune { mode } => run_prune(&engine, (*mode).into()),
        Commands::Merge { threshold } => run_merge(&engine, *threshold),
        Commands::Stats => run_stats(&engine),
        Commands::Export { output, format } => run_export(&engine, output, *format),
        Commands::Import { input, format } => run_import(&engine, input, *format),
    }
}

fn run_store(engine: &Engine, content: &str, category: &str, explain: bool) -> anyhow::Result<()> {
    match engine.store(Candidate::new(content, category), explain)? {
        Some(memory) => {
            println!("{} {}", "stored".green().bold(), memory.id);
            println!(
                "  {}: {:.3}  {}: {:.3}",
                "surprise".white().bold(),
                memory.surprise,
                "importance".white().bold(),
                memory.importance,
            );
        }
        None => println!("{}", "rejected: not sufficiently novel".yellow()),
    }
    Ok(())
}

fn run_recall(
    engine: &Engine,
    query: &str,
    k: Option<usize>,
    categories: Vec<String>,
    min_importance: Option<f32>,
    explain: bool,
) -> anyhow::Result<()> {
    let results = engine.recall(Query {
        text: query.to_string(),
        k,
        categories,
        min_importance,
        explain,
        ..Default::default()
    })?;

    if results.is_empty() {
        println!("{}", "no memories matched".yellow());
        return Ok(());
    }

    for result in &results {
        println!(
            "{} {:.3}  {} {:.3}  {}",
            "score".cyan().bold(),
            result.score,
            "decayed".white().bold(),
            result.decayed_importance,
            truncate(&result.memory.content, 80),
        );
        if let Some(explanation) = &result.explanation {
            println!("  {}", explanation.dimmed());
        }
    }
    Ok(())
}

fn run_forget(engine: &Engine, id: &str) -> anyhow::Result<()> {
    if engine.forget(id)? {
        println!("{} {}", "forgotten".red().bold(), id);
    } else {
        println!("{}", "no such memory".yellow());
    }
    Ok(())
}

fn run_prune(engine: &Engine, mode: PruneMode) -> anyhow::Result<()> {
    let removed = engine.forget_many(ForgetOptions { mode })?;
    if removed.is_empty() {
        println!("{}", "nothing to prune".yellow());
    } else {
        println!("{} {}", "pruned".red().bold(), removed.len());
        for id in &removed {
            println!("  {id}");
        }
    }
    Ok(())
}

fn run_merge(engine: &Engine, threshold: f32) -> anyhow::Result<()> {
    let outcome = engine.merge(MergeOptions { threshold })?;
    if outcome.kept.is_empty() {
        println!("{}", "no near-duplicates found".yellow());
        return Ok(());
    }
    for memory in &outcome.kept {
        println!("{} {} (v{})", "merged into".green().bold(), memory.id, memory.version);
    }
    println!("{} {}", "absorbed".dimmed(), outcome.absorbed.len());
    Ok(())
}

fn run_stats(engine: &Engine) -> anyhow::Result<()> {
    let stats = engine.stats()?;
    println!("{}", "=== Engram Memory Statistics ===".cyan().bold());
    println!("{}: {}", "Total Memories".white().bold(), stats.total);
    println!(
        "{}: {:.3}",
        "Average Importance".white().bold(),
        stats.average_importance
    );
    println!(
        "{}: {:.3}",
        "Average Decayed Importance".white().bold(),
        stats.average_decayed_importance
    );
    println!("{}: {:.3}", "Average Surprise".white().bold(), stats.average_surprise);
    println!("{}: {:.1}d", "Average Age".white().bold(), stats.average_age_days);
    if let Some(oldest) = &stats.oldest {
        println!("{}: {}", "Oldest".white().bold(), truncate(&oldest.content, 60));
    }
    if let Some(newest) = &stats.newest {
        println!("{}: {}", "Newest".white().bold(), truncate(&newest.content, 60));
    }

    if !stats.by_category.is_empty() {
        println!("{}", "=== By Category ===".yellow().bold());
        let mut categories: Vec<_> = stats.by_category.iter().collect();
        categories.sort_by_key(|(name, _)| name.clone());
        for (category, count) in categories {
            print_distribution_bar(category, *count, stats.total);
        }
    }

    if !stats.by_namespace.is_empty() {
        println!("{}", "=== By Namespace ===".yellow().bold());
        let mut namespaces: Vec<_> = stats.by_namespace.iter().collect();
        namespaces.sort_by_key(|(name, _)| name.clone());
        for (namespace, count) in namespaces {
            print_distribution_bar(namespace, *count, stats.total);
        }
    }
    Ok(())
}

fn run_export(engine: &Engine, output: &PathBuf, format: ExportFormat) -> anyhow::Result<()> {
    let memories = engine.list_all()?;
    let now = chrono::Utc::now().timestamp_millis();

    let rendered = match format {
        ExportFormat::Json => engram_core::export::export_json(&memories, &engine.config().namespace, now)?,
        ExportFormat::Markdown => {
            engram_core::export::export_markdown(&memories, &engine.config().namespace, now)
        }
        ExportFormat::Csv => engram_core::export::export_csv(&memories)?,
    };

    std::fs::write(output, rendered)?;
    println!("{} {}", "exported to".green().bold(), output.display());
    Ok(())
}

fn run_import(engine: &Engine, input: &PathBuf, format: ImportFormat) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(input)?;
    let now = chrono::Utc::now().timestamp_millis();
    let namespace = engine.config().namespace.clone();

    let memories = match format {
        ImportFormat::Json => engram_core::export::import_json(&contents)?,
        ImportFormat::Markdown => {
            let mut next = 0u64;
            engram_core::export::import_markdown(&contents, &namespace, now, || {
                next += 1;
                format!("{}-imported-{next}", uuid::Uuid::new_v4())
            })
        }
    };

    let count = engine.import_memories(memories)?;
    println!("{} {} {}", "imported".green().bold(), count, "memories");
    Ok(())
}

fn print_distribution_bar(label: &str, count: usize, total: usize) {
    const WIDTH: usize = 20;
    let filled = if total == 0 { 0 } else { (count * WIDTH) / total };
    let bar: String = "#".repeat(filled) + &"-".repeat(WIDTH - filled);
    println!("  {:<12} {} {}", label, bar.green(), count);
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
