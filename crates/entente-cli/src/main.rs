//! Entente CLI - knowledge graph conflict detection and resolution

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use entente_core::application::AppContext;
use entente_core::config::Config;
use entente_core::domain::conflict::{
    Conflict, ConflictFilter, ConflictRepository, ConflictStatus, ConflictType, NewConflict,
    ResolutionMethod, Severity,
};
use entente_core::domain::knowledge::GraphImport;
use entente_core::domain::quality::QualityReport;
use entente_core::domain::resolution::{ManualResolution, ResolutionOutcome};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "entente")]
#[command(author, version, about = "Entity conflict detection and resolution for knowledge graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// SQLite database file (overrides storage.database_path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load extracted documents, entities and relationships from JSON
    Import {
        /// File holding {documents, entities, relationships}
        file: PathBuf,
    },

    /// Run all detection passes
    Detect {
        /// Limit detection to these entities (repeatable)
        #[arg(long = "entity-id")]
        entity_ids: Vec<String>,
        /// Entities scanned when no ids are given
        #[arg(long)]
        batch_size: Option<usize>,
        /// Report conflicts without storing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Check each entity against its same-type peers
    BatchDetect {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Report conflicts without storing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect and manage conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },

    /// Resolve conflicts
    Resolve {
        #[command(subcommand)]
        action: ResolveAction,
    },

    /// Generate a data quality report
    Quality,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConflictAction {
    /// List conflicts, newest first
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<ConflictStatus>,
        #[arg(long = "type", value_parser = parse_type)]
        conflict_type: Option<ConflictType>,
        #[arg(long, value_parser = parse_severity)]
        severity: Option<Severity>,
        #[arg(long)]
        assigned_to: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Show conflict details
    Show { id: String },
    /// Show conflict counts
    Stats,
    /// Assign a conflict to an expert
    Assign {
        id: String,
        #[arg(long)]
        expert: String,
        #[arg(long)]
        by: String,
    },
    /// Reject a conflict as not a real inconsistency
    Reject {
        id: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
    /// Escalate a conflict
    Escalate {
        id: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand)]
enum ResolveAction {
    /// Resolve without a human (AI, then rules, then expert review)
    Auto {
        id: String,
        #[arg(long)]
        use_ai: bool,
        /// Minimum AI suggestion confidence
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Apply an expert's resolution
    Manual {
        id: String,
        #[arg(long, value_parser = parse_method)]
        method: ResolutionMethod,
        #[arg(long)]
        expert: String,
        #[arg(long)]
        reasoning: String,
        /// Method parameters as a JSON object
        #[arg(long)]
        actions: Option<String>,
        #[arg(long)]
        confidence: Option<f32>,
    },
    /// Preview candidate resolutions
    Suggest { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Show config file path
    Path,
}

fn parse_status(s: &str) -> Result<ConflictStatus, String> {
    ConflictStatus::parse(s).ok_or_else(|| format!("unknown status '{}'", s))
}

fn parse_type(s: &str) -> Result<ConflictType, String> {
    ConflictType::parse(s).ok_or_else(|| format!("unknown conflict type '{}'", s))
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    Severity::parse(s).ok_or_else(|| format!("unknown severity '{}'", s))
}

fn parse_method(s: &str) -> Result<ResolutionMethod, String> {
    ResolutionMethod::parse(s).ok_or_else(|| format!("unknown resolution method '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("entente=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { action } => cmd_config(action),
        command => {
            let mut config = Config::load()?;
            if let Some(path) = cli.database {
                config.storage.database_path = Some(path);
            }
            let ctx = AppContext::open(config).await?;
            run(&ctx, command, cli.format).await
        }
    }
}

async fn run(ctx: &AppContext, command: Commands, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Commands::Import { file } => cmd_import(ctx, &file, format).await,
        Commands::Detect {
            entity_ids,
            batch_size,
            dry_run,
        } => cmd_detect(ctx, entity_ids, batch_size, dry_run, format).await,
        Commands::BatchDetect { ids, dry_run } => cmd_batch_detect(ctx, &ids, dry_run, format).await,
        Commands::Conflicts { action } => cmd_conflicts(ctx, action, format).await,
        Commands::Resolve { action } => cmd_resolve(ctx, action, format).await,
        Commands::Quality => cmd_quality(ctx, format).await,
        Commands::Config { action } => cmd_config(action),
    }
}

// ============================================================================
// Output
// ============================================================================

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn conflict_line(conflict: &Conflict) -> String {
    let (a, b) = conflict.subject.ids();
    format!(
        "  {} [{}] {} {:.2} {} <-> {} ({})",
        conflict.id, conflict.severity, conflict.conflict_type, conflict.confidence_score, a, b,
        conflict.status
    )
}

fn print_candidates(conflicts: &[NewConflict]) {
    for c in conflicts {
        let (a, b) = c.subject.ids();
        println!(
            "  [{}] {} {:.2} {} <-> {}: {}",
            c.severity, c.conflict_type, c.confidence_score, a, b, c.description
        );
    }
}

fn print_outcome(outcome: &ResolutionOutcome) {
    if outcome.success {
        println!("Conflict {} resolved ({})", outcome.conflict_id, outcome.status);
        if let Some(method) = outcome.method {
            println!("  Method: {}", method);
        }
        if let Some(path) = outcome.path {
            println!("  Path: {:?}", path);
        }
    } else if outcome.assigned_for_review {
        println!(
            "Conflict {} needs expert review (assigned to {})",
            outcome.conflict_id,
            outcome.assigned_to.as_deref().unwrap_or("nobody")
        );
    } else {
        println!(
            "Resolution of {} failed: {}",
            outcome.conflict_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn print_report(report: &QualityReport) {
    println!("Data Quality Report");
    println!("===================");
    println!("Overall score: {:.2}", report.overall_score);
    println!();
    for dim in &report.dimensions {
        println!("  {:<13} {:.2}  {}", dim.dimension, dim.score, dim.details);
    }
    let summary = &report.conflict_summary;
    println!();
    println!(
        "Conflicts: {} total, {} open ({} high severity), {} pending review, {} resolved",
        summary.total, summary.open, summary.open_high_severity, summary.pending_review, summary.resolved
    );
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!(
                "  [{}] {}: {}",
                format!("{:?}", rec.priority).to_uppercase(),
                rec.area,
                rec.message
            );
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_import(ctx: &AppContext, file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let data: GraphImport = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", file.display()))?;

    let summary = ctx.graph_service().import(&data).await?;
    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => println!(
            "Imported {} documents, {} entities, {} relationships",
            summary.documents, summary.entities, summary.relationships
        ),
    }
    Ok(())
}

async fn cmd_detect(
    ctx: &AppContext,
    entity_ids: Vec<String>,
    batch_size: Option<usize>,
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let detector = ctx.detector();
    let scope = (!entity_ids.is_empty()).then_some(entity_ids.as_slice());
    let report = detector.detect_all_conflicts(scope, batch_size).await?;

    let stored = if dry_run {
        0
    } else {
        detector.detect_and_store(&report).await?.len()
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!(
                "Scanned {} entities and {} relationships",
                report.entities_scanned, report.relationships_scanned
            );
            for (pass, count) in &report.pass_counts {
                println!("  {:<26} {}", pass, count);
            }
            for failure in &report.pass_errors {
                println!("  {:<26} FAILED: {}", failure.pass, failure.message);
            }
            print_candidates(&report.conflicts);
            if dry_run {
                println!("Found {} conflicts (dry run, nothing stored)", report.conflicts.len());
            } else {
                println!("Stored {} new conflicts", stored);
            }
        }
    }
    Ok(())
}

async fn cmd_batch_detect(
    ctx: &AppContext,
    ids: &[String],
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let result = ctx.detector().batch_detect_conflicts(ids).await?;

    if !dry_run {
        let conflicts = ctx.conflicts();
        for candidate in &result.conflicts {
            conflicts.create_conflict(candidate.clone()).await?;
        }
    }

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => {
            print_candidates(&result.conflicts);
            for error in &result.errors {
                println!("  {}: FAILED: {}", error.entity_id, error.message);
            }
            println!(
                "Processed {} entities: {} conflicts, {} errors",
                result.stats.entities_processed, result.stats.conflicts_found, result.stats.errors
            );
        }
    }
    Ok(())
}

async fn cmd_conflicts(
    ctx: &AppContext,
    action: ConflictAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let engine = ctx.resolution_engine();

    match action {
        ConflictAction::List {
            status,
            conflict_type,
            severity,
            assigned_to,
            limit,
            skip,
        } => {
            let filter = ConflictFilter {
                status,
                conflict_type,
                severity,
                assigned_to,
                limit,
                skip,
            };
            let page = ctx.conflicts().list_conflicts(&filter).await?;
            match format {
                OutputFormat::Json => print_json(&page)?,
                OutputFormat::Text => {
                    if page.conflicts.is_empty() {
                        println!("No conflicts found.");
                        println!("\nRun detection with: entente detect");
                    } else {
                        println!(
                            "Conflicts {}-{} of {}:",
                            page.skip + 1,
                            page.skip + page.conflicts.len(),
                            page.total
                        );
                        for conflict in &page.conflicts {
                            println!("{}", conflict_line(conflict));
                        }
                    }
                }
            }
        }
        ConflictAction::Show { id } => {
            let conflict = ctx.conflicts().require_conflict(&id).await?;
            match format {
                OutputFormat::Json => print_json(&conflict)?,
                OutputFormat::Text => {
                    let (a, b) = conflict.subject.ids();
                    println!("Conflict: {}", conflict.id);
                    println!("  Type: {}", conflict.conflict_type);
                    println!("  Severity: {}", conflict.severity);
                    println!("  Status: {}", conflict.status);
                    println!("  Confidence: {:.2}", conflict.confidence_score);
                    println!("  Subject: {} <-> {}", a, b);
                    println!("  Description: {}", conflict.description);
                    if let Some(expert) = &conflict.assigned_to {
                        println!("  Assigned to: {}", expert);
                    }
                    if let Some(resolution) = &conflict.resolution {
                        println!(
                            "  Resolution: {} by {} ({})",
                            resolution.resolution_method,
                            resolution.resolved_by,
                            resolution.reasoning
                        );
                    }
                    println!("  Created: {}", conflict.created_at.format("%Y-%m-%d %H:%M:%S"));
                    println!("  Updated: {}", conflict.updated_at.format("%Y-%m-%d %H:%M:%S"));
                }
            }
        }
        ConflictAction::Stats => {
            let stats = ctx.conflicts().stats().await?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    println!("Total: {}", stats.total);
                    println!("Open: {} ({} high severity)", stats.open, stats.open_high_severity);
                    println!("Resolved: {}", stats.resolved);
                    for (label, counts) in [
                        ("By status", &stats.by_status),
                        ("By type", &stats.by_type),
                        ("By severity", &stats.by_severity),
                    ] {
                        println!("{}:", label);
                        for (key, count) in counts {
                            println!("  {:<26} {}", key, count);
                        }
                    }
                }
            }
        }
        ConflictAction::Assign { id, expert, by } => {
            let conflict = engine.assign_conflict(&id, &expert, &by).await?;
            print_transition(&conflict, format)?;
        }
        ConflictAction::Reject { id, by, reason } => {
            let conflict = engine.reject_conflict(&id, &by, &reason).await?;
            print_transition(&conflict, format)?;
        }
        ConflictAction::Escalate { id, by, reason } => {
            let conflict = engine.escalate_conflict(&id, &by, &reason).await?;
            print_transition(&conflict, format)?;
        }
    }
    Ok(())
}

fn print_transition(conflict: &Conflict, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(conflict),
        OutputFormat::Text => {
            println!("Conflict {} is now {}", conflict.id, conflict.status);
            Ok(())
        }
    }
}

async fn cmd_resolve(
    ctx: &AppContext,
    action: ResolveAction,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let engine = ctx.resolution_engine();

    match action {
        ResolveAction::Auto {
            id,
            use_ai,
            threshold,
        } => {
            if use_ai && !ctx.has_llm() {
                warn!("--use-ai given but no API key is set; falling back to rules");
            }
            let outcome = engine.resolve_automatically(&id, use_ai, threshold).await?;
            match format {
                OutputFormat::Json => print_json(&outcome)?,
                OutputFormat::Text => print_outcome(&outcome),
            }
        }
        ResolveAction::Manual {
            id,
            method,
            expert,
            reasoning,
            actions,
            confidence,
        } => {
            let actions: Map<String, Value> = match actions {
                Some(raw) => serde_json::from_str(&raw).context("--actions must be a JSON object")?,
                None => Map::new(),
            };
            let mut resolution = ManualResolution::new(method, reasoning).with_actions(actions);
            resolution.confidence = confidence;

            let outcome = engine.resolve_conflict_manually(&id, resolution, &expert).await?;
            match format {
                OutputFormat::Json => print_json(&outcome)?,
                OutputFormat::Text => print_outcome(&outcome),
            }
        }
        ResolveAction::Suggest { id } => {
            let suggestions = engine.suggest_resolutions(&id).await?;
            match format {
                OutputFormat::Json => print_json(&suggestions)?,
                OutputFormat::Text => {
                    println!("Suggestions for {}:", id);
                    for (i, s) in suggestions.iter().enumerate() {
                        println!(
                            "  {}. {} ({:.2}, {:?}): {}",
                            i + 1,
                            s.resolution_method,
                            s.confidence,
                            s.source,
                            s.reasoning
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_quality(ctx: &AppContext, format: OutputFormat) -> anyhow::Result<()> {
    let report = ctx.quality().generate_report().await?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("Set {} = {}", key, value);
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
