//! capreg - Capability Registry CLI
//!
//! Manage versioned Skill and Agent definitions from the shell.
//!
//! ## Commands
//!
//! - `create` / `derive`: store a new record, optionally with parents
//! - `get` / `list`: read records
//! - `update` / `delete` / `purge`: change or remove records
//! - `lineage` / `ancestors` / `descendants`: inspect derivation links
//! - `eval` / `history`: record and read evaluation scores
//! - `champion`: promote, roll back and inspect per-domain champions
//! - `render`: assemble records into prompt text

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use capreg_core::metrics::METRICS;
use capreg_core::{
    BackendKind, CapabilityContent, CapabilityPatch, CapabilityRecord, CapabilityRegistry,
    ChampionRecord, DeleteMode, DeriveRequest, EvaluationEvent, InjectionStyle, ListOrder,
    NewCapability, RecordFilter, RecordId, RecordKind, RegistryBackend, RegistryConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

type Registry = CapabilityRegistry<dyn RegistryBackend>;

#[derive(Parser)]
#[command(name = "capreg")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Versioned registry for AI Skill and Agent definitions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Registry root for the filesystem backend (overrides CAPREG_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Storage backend: fs or surreal (overrides CAPREG_BACKEND)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Command output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new record
    Create(CreateArgs),

    /// Store a child of one or more existing records
    Derive(DeriveArgs),

    /// Show one record
    Get {
        id: RecordId,

        /// Also show soft-deleted records
        #[arg(long)]
        include_deleted: bool,
    },

    /// List records, oldest first by default
    List(ListArgs),

    /// Change name, domain or content of a record
    Update(UpdateArgs),

    /// Soft-delete a record
    Delete {
        id: RecordId,

        /// Also delete every live descendant
        #[arg(long)]
        cascade: bool,
    },

    /// Physically remove a soft-deleted record; its id stays retired
    Purge { id: RecordId },

    /// Check whether a child may name the given parents
    Lineage {
        child: RecordId,

        #[arg(required = true)]
        parents: Vec<RecordId>,
    },

    /// Walk a record's ancestors, nearest first
    Ancestors {
        id: RecordId,

        /// Stop after this many levels (1 = parents only)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// List every record derived from a record
    Descendants { id: RecordId },

    /// Record an evaluation score in [0, 1]
    Eval {
        id: RecordId,

        score: f64,

        /// Score of the baseline this run was compared against
        #[arg(long)]
        baseline: Option<f64>,

        #[arg(long)]
        note: Option<String>,
    },

    /// Show the evaluation history of a record
    History { id: RecordId },

    /// Manage per-domain champions
    Champion {
        #[command(subcommand)]
        action: ChampionAction,
    },

    /// Append records to a base prompt
    Render {
        /// Records to render, in order
        ids: Vec<RecordId>,

        /// Base text
        #[arg(long, conflicts_with = "base_file")]
        base: Option<String>,

        /// Read the base text from a file
        #[arg(long)]
        base_file: Option<PathBuf>,

        /// full or summary
        #[arg(long, default_value = "full")]
        style: InjectionStyle,
    },
}

#[derive(Subcommand)]
enum ChampionAction {
    /// Make a record the champion of its domain
    Promote {
        domain: String,

        id: RecordId,

        /// Who is promoting
        #[arg(long, default_value = "cli")]
        by: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Re-appoint the previous champion
    Rollback { domain: String },

    /// Show the current champion
    Current { domain: String },

    /// Show every champion change, newest first
    History { domain: String },
}

#[derive(Args, Debug, Default)]
struct ContentArgs {
    /// Free-text instructions
    #[arg(long)]
    instruction: Option<String>,

    /// Behavioural rule (repeatable)
    #[arg(long = "rule")]
    rules: Vec<String>,

    /// Tool reference (repeatable)
    #[arg(long = "tool")]
    tools: Vec<String>,

    /// Knowledge reference (repeatable)
    #[arg(long = "knowledge")]
    knowledge: Vec<String>,

    /// Read the whole content block from a JSON file
    #[arg(long, conflicts_with_all = ["instruction", "rules", "tools", "knowledge"])]
    content_file: Option<PathBuf>,
}

impl ContentArgs {
    fn is_empty(&self) -> bool {
        self.instruction.is_none()
            && self.rules.is_empty()
            && self.tools.is_empty()
            && self.knowledge.is_empty()
            && self.content_file.is_none()
    }

    /// Build content, taking unspecified parts from `base`.
    fn resolve(self, base: Option<&CapabilityContent>) -> Result<Option<CapabilityContent>> {
        if let Some(path) = &self.content_file {
            return read_json_file(path).map(Some);
        }
        if self.is_empty() {
            return Ok(None);
        }
        let mut content = base.cloned().unwrap_or_default();
        if let Some(instruction) = self.instruction {
            content.instruction = instruction;
        }
        if !self.rules.is_empty() {
            content.rules = self.rules;
        }
        if !self.tools.is_empty() {
            content.tools = self.tools;
        }
        if !self.knowledge.is_empty() {
            content.knowledge = self.knowledge;
        }
        Ok(Some(content))
    }
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Record id (generated when omitted)
    #[arg(long)]
    id: Option<RecordId>,

    #[arg(long, required_unless_present = "file")]
    name: Option<String>,

    #[arg(long, required_unless_present = "file")]
    domain: Option<String>,

    /// skill or agent
    #[arg(long, default_value = "skill")]
    kind: RecordKind,

    /// Parent id (repeatable)
    #[arg(long = "parent")]
    parents: Vec<RecordId>,

    #[command(flatten)]
    content: ContentArgs,

    /// Read the whole record from a JSON file
    #[arg(long, conflicts_with_all = ["name", "domain", "parents"])]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DeriveArgs {
    /// Parent id (repeatable; the first one supplies defaults)
    #[arg(long = "parent", required = true)]
    parents: Vec<RecordId>,

    #[arg(long)]
    id: Option<RecordId>,

    #[arg(long)]
    name: Option<String>,

    #[command(flatten)]
    content: ContentArgs,
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    #[arg(long)]
    domain: Option<String>,

    #[arg(long)]
    kind: Option<RecordKind>,

    /// Only evaluated records scoring at least this much
    #[arg(long)]
    min_score: Option<f64>,

    #[arg(long)]
    min_generation: Option<u32>,

    #[arg(long)]
    max_generation: Option<u32>,

    #[arg(long)]
    include_deleted: bool,

    /// created, created-desc or score
    #[arg(long, default_value = "created")]
    order: ListOrder,

    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    id: RecordId,

    /// Version the change is based on
    #[arg(long = "expected-version")]
    expected_version: u64,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    domain: Option<String>,

    #[command(flatten)]
    content: ContentArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RegistryConfig::from_env().context("Invalid CAPREG_* configuration")?;
    if let Some(root) = cli.root {
        config.root = root;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    capreg_core::init_tracing(cli.json || config.json_logs, level);

    let backend = capreg_core::open_backend(&config)
        .await
        .context("Failed to open capability registry")?;
    let registry: Registry = CapabilityRegistry::new(backend);

    let result = run(&registry, cli.command, cli.output).await;
    METRICS.flush();
    result
}

async fn run(registry: &Registry, command: Commands, out: OutputFormat) -> Result<()> {
    match command {
        Commands::Create(args) => cmd_create(registry, args, out).await,
        Commands::Derive(args) => cmd_derive(registry, args, out).await,
        Commands::Get {
            id,
            include_deleted,
        } => cmd_get(registry, &id, include_deleted, out).await,
        Commands::List(args) => cmd_list(registry, args, out).await,
        Commands::Update(args) => cmd_update(registry, args, out).await,
        Commands::Delete { id, cascade } => cmd_delete(registry, &id, cascade, out).await,
        Commands::Purge { id } => cmd_purge(registry, &id, out).await,
        Commands::Lineage { child, parents } => cmd_lineage(registry, &child, &parents, out).await,
        Commands::Ancestors { id, max_depth } => {
            cmd_ancestors(registry, &id, max_depth, out).await
        }
        Commands::Descendants { id } => cmd_descendants(registry, &id, out).await,
        Commands::Eval {
            id,
            score,
            baseline,
            note,
        } => cmd_eval(registry, &id, score, baseline, note, out).await,
        Commands::History { id } => cmd_history(registry, &id, out).await,
        Commands::Champion { action } => match action {
            ChampionAction::Promote {
                domain,
                id,
                by,
                note,
            } => cmd_champion_promote(registry, &domain, &id, &by, note, out).await,
            ChampionAction::Rollback { domain } => {
                cmd_champion_rollback(registry, &domain, out).await
            }
            ChampionAction::Current { domain } => {
                cmd_champion_current(registry, &domain, out).await
            }
            ChampionAction::History { domain } => {
                cmd_champion_history(registry, &domain, out).await
            }
        },
        Commands::Render {
            ids,
            base,
            base_file,
            style,
        } => {
            let base = match (base, base_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read base text: {}", path.display()))?,
                (None, None) => String::new(),
            };
            cmd_render(registry, &ids, &base, style).await
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

async fn cmd_create(registry: &Registry, args: CreateArgs, out: OutputFormat) -> Result<()> {
    let new = match &args.file {
        Some(path) => {
            let mut new: NewCapability = read_json_file(path)?;
            if args.id.is_some() {
                new.id = args.id;
            }
            new
        }
        None => {
            let content = args
                .content
                .resolve(None)?
                .context("--instruction or --content-file is required")?;
            NewCapability {
                id: args.id,
                kind: args.kind,
                name: args.name.unwrap_or_default(),
                domain: args.domain.unwrap_or_default(),
                content,
                parent_ids: args.parents,
            }
        }
    };

    let id = registry.create(new).await?;
    info!(record_id = %id, "record created");
    let record = registry.get(&id).await?;
    emit(out, &record, || format!("Created {} (generation {})", id, record.generation))
}

async fn cmd_derive(registry: &Registry, args: DeriveArgs, out: OutputFormat) -> Result<()> {
    let content = args
        .content
        .resolve(None)?
        .context("--instruction or --content-file is required")?;
    let mut request = DeriveRequest::crossover(args.parents, content);
    request.id = args.id;
    request.name = args.name;

    let id = registry.derive(request).await?;
    let record = registry.get(&id).await?;
    emit(out, &record, || {
        format!(
            "Derived {} from {} (generation {})",
            id,
            join_ids(&record.parent_ids),
            record.generation
        )
    })
}

async fn cmd_get(
    registry: &Registry,
    id: &RecordId,
    include_deleted: bool,
    out: OutputFormat,
) -> Result<()> {
    let record = if include_deleted {
        registry.get_including_deleted(id).await?
    } else {
        registry.get(id).await?
    };
    emit(out, &record, || render_record_text(&record))
}

async fn cmd_list(registry: &Registry, args: ListArgs, out: OutputFormat) -> Result<()> {
    let records = registry.list(&list_filter(args)).await?;
    emit(out, &records, || {
        if records.is_empty() {
            return "No records found.".to_string();
        }
        records
            .iter()
            .map(record_row)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn list_filter(args: ListArgs) -> RecordFilter {
    RecordFilter {
        domain: args.domain,
        kind: args.kind,
        min_score: args.min_score,
        min_generation: args.min_generation,
        max_generation: args.max_generation,
        include_deleted: args.include_deleted,
        order: args.order,
        limit: args.limit,
    }
}

async fn cmd_update(registry: &Registry, args: UpdateArgs, out: OutputFormat) -> Result<()> {
    let content = if args.content.is_empty() {
        None
    } else {
        let current = registry.get(&args.id).await?;
        args.content.resolve(Some(&current.content))?
    };
    let patch = CapabilityPatch {
        name: args.name,
        domain: args.domain,
        content,
    };
    if patch.is_empty() {
        bail!("nothing to update: pass --name, --domain or content flags");
    }

    let record = registry
        .update(&args.id, args.expected_version, patch)
        .await?;
    emit(out, &record, || {
        format!("Updated {} to version {}", record.id, record.version)
    })
}

async fn cmd_delete(
    registry: &Registry,
    id: &RecordId,
    cascade: bool,
    out: OutputFormat,
) -> Result<()> {
    let mode = if cascade {
        DeleteMode::Cascade
    } else {
        DeleteMode::Restrict
    };
    let deleted = registry.soft_delete(id, mode).await?;
    emit(out, &deleted, || format!("Deleted {}", join_ids(&deleted)))
}

async fn cmd_purge(registry: &Registry, id: &RecordId, out: OutputFormat) -> Result<()> {
    registry.purge(id).await?;
    emit(out, &serde_json::json!({ "purged": id }), || {
        format!("Purged {id}; the id is retired")
    })
}

// ---------------------------------------------------------------------------
// Lineage
// ---------------------------------------------------------------------------

async fn cmd_lineage(
    registry: &Registry,
    child: &RecordId,
    parents: &[RecordId],
    out: OutputFormat,
) -> Result<()> {
    let plan = registry.record_lineage(child, parents).await?;
    emit(
        out,
        &serde_json::json!({
            "child": plan.child,
            "parents": parents,
            "generation": plan.generation,
        }),
        || format!("{} -> {}: valid, generation {}", join_ids(parents), child, plan.generation),
    )
}

async fn cmd_ancestors(
    registry: &Registry,
    id: &RecordId,
    max_depth: Option<usize>,
    out: OutputFormat,
) -> Result<()> {
    let mut walk = registry.ancestors(id, max_depth);
    match out {
        OutputFormat::Json => {
            let all = walk.collect_all().await?;
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
        OutputFormat::Text => {
            let mut any = false;
            while let Some(record) = walk.next().await? {
                any = true;
                println!("{}", record_row(&record));
            }
            if !any {
                println!("{id} has no ancestors.");
            }
        }
    }
    Ok(())
}

async fn cmd_descendants(registry: &Registry, id: &RecordId, out: OutputFormat) -> Result<()> {
    let records = registry.descendants(id).await?;
    emit(out, &records, || {
        if records.is_empty() {
            return format!("{id} has no descendants.");
        }
        records
            .iter()
            .map(record_row)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn cmd_eval(
    registry: &Registry,
    id: &RecordId,
    score: f64,
    baseline: Option<f64>,
    note: Option<String>,
    out: OutputFormat,
) -> Result<()> {
    let event = registry
        .record_evaluation(id, score, baseline, note)
        .await?;
    emit(out, &event, || {
        format!("Recorded evaluation #{} for {}: {:.3}", event.seq, id, event.score)
    })
}

async fn cmd_history(registry: &Registry, id: &RecordId, out: OutputFormat) -> Result<()> {
    let events = registry.history(id).await?;
    emit(out, &events, || {
        if events.is_empty() {
            return format!("{id} has not been evaluated.");
        }
        events.iter().map(event_row).collect::<Vec<_>>().join("\n")
    })
}

// ---------------------------------------------------------------------------
// Champions
// ---------------------------------------------------------------------------

async fn cmd_champion_promote(
    registry: &Registry,
    domain: &str,
    id: &RecordId,
    by: &str,
    note: Option<String>,
    out: OutputFormat,
) -> Result<()> {
    let champion = registry.promote(domain, id, by, note).await?;
    emit(out, &champion, || {
        format!("Promoted {} as champion of {} (#{})", id, domain, champion.seq)
    })
}

async fn cmd_champion_rollback(registry: &Registry, domain: &str, out: OutputFormat) -> Result<()> {
    let champion = registry.rollback_champion(domain).await?;
    emit(out, &champion, || {
        format!(
            "Rolled back {} to {} (#{})",
            domain, champion.record_id, champion.seq
        )
    })
}

async fn cmd_champion_current(registry: &Registry, domain: &str, out: OutputFormat) -> Result<()> {
    let champion = registry.champion(domain).await?;
    emit(out, &champion, || match &champion {
        Some(c) => champion_row(c),
        None => format!("No champion for {domain}."),
    })
}

async fn cmd_champion_history(registry: &Registry, domain: &str, out: OutputFormat) -> Result<()> {
    let history = registry.champion_history(domain).await?;
    emit(out, &history, || {
        if history.is_empty() {
            return format!("No champion history for {domain}.");
        }
        history
            .iter()
            .map(champion_row)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

async fn cmd_render(
    registry: &Registry,
    ids: &[RecordId],
    base: &str,
    style: InjectionStyle,
) -> Result<()> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        records.push(registry.get(id).await?);
    }
    println!("{}", capreg_core::render(base, &records, style));
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn emit<T: Serialize + ?Sized>(
    out: OutputFormat,
    value: &T,
    text: impl FnOnce() -> String,
) -> Result<()> {
    match out {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn join_ids(ids: &[RecordId]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(RecordId::as_str).collect::<Vec<_>>().join(", ")
}

fn score_text(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"))
}

fn record_row(record: &CapabilityRecord) -> String {
    format!(
        "{:<36}  v{:<3} gen {:<3} score {:>5}  {:<16} {}{}",
        record.id.as_str(),
        record.version,
        record.generation,
        score_text(record.performance_score),
        record.domain,
        record.name,
        if record.is_deleted() { "  (deleted)" } else { "" },
    )
}

fn render_record_text(record: &CapabilityRecord) -> String {
    let mut lines = vec![
        format!("id:          {}", record.id),
        format!("kind:        {}", record.kind),
        format!("name:        {}", record.name),
        format!("domain:      {}", record.domain),
        format!("version:     {}", record.version),
        format!("generation:  {}", record.generation),
        format!(
            "parents:     {}",
            if record.is_root() {
                "(root)".to_string()
            } else {
                join_ids(&record.parent_ids)
            }
        ),
        format!("score:       {}", score_text(record.performance_score)),
        format!("digest:      {}", &record.content_digest[..12.min(record.content_digest.len())]),
        format!("created:     {}", record.created_at.to_rfc3339()),
        format!("updated:     {}", record.updated_at.to_rfc3339()),
    ];
    if let Some(deleted) = record.deleted_at {
        lines.push(format!("deleted:     {}", deleted.to_rfc3339()));
    }
    lines.push(String::new());
    lines.push(record.content.instruction.clone());
    for (heading, items) in [
        ("rules", &record.content.rules),
        ("tools", &record.content.tools),
        ("knowledge", &record.content.knowledge),
    ] {
        if !items.is_empty() {
            lines.push(format!("\n{heading}:"));
            lines.extend(items.iter().map(|item| format!("  - {item}")));
        }
    }
    lines.join("\n")
}

fn event_row(event: &EvaluationEvent) -> String {
    let mut row = format!(
        "#{:<3} {}  score {:.3}",
        event.seq,
        event.timestamp.to_rfc3339(),
        event.score
    );
    if let Some(delta) = event.improvement() {
        row.push_str(&format!("  ({delta:+.3} vs baseline)"));
    }
    if let Some(note) = &event.note {
        row.push_str(&format!("  {note}"));
    }
    row
}

fn champion_row(champion: &ChampionRecord) -> String {
    format!(
        "#{:<3} {}  {}  by {}{}",
        champion.seq,
        champion.created_at.to_rfc3339(),
        champion.record_id,
        champion.metadata.promoted_by,
        champion
            .metadata
            .note
            .as_deref()
            .map(|n| format!("  {n}"))
            .unwrap_or_default(),
    )
}
