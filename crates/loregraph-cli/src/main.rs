//! Loregraph CLI - narrative knowledge graphs from scene text

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{FutureExt, StreamExt};
use loregraph_core::api::{Caller, ExportFormat, InterchangeGraph, LoregraphService};
use loregraph_core::config::Config;
use loregraph_core::domain::events::GraphEvent;
use loregraph_core::domain::extraction::{ExtractionJob, ExtractorKind, JobStatus};
use loregraph_core::domain::graph::{
    CentralityMeasure, Entity, EntityFilter, EntityType, GraphQuery, Relationship,
};
use loregraph_core::domain::scene::{DirectorySceneSource, Scene, SceneSource};
use loregraph_core::llm::{CompletionService, LlmClient};
use loregraph_core::storage::{Database, DatabaseConfig, migration_status};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "loregraph")]
#[command(author, version, about = "Narrative knowledge graphs from scene text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, global = true, default_value = "text")]
    output: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides storage.database_path)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract entities and relationships from one scene file
    Extract {
        /// Project ID
        project: String,
        /// Scene text file; its file stem is the scene id
        scene_file: PathBuf,
        /// Extractor (llm or ner)
        #[arg(short, long)]
        extractor: Option<String>,
    },

    /// Extract every `<scene_id>.txt` file in a directory
    ExtractAll {
        project: String,
        scenes_dir: PathBuf,
        #[arg(short, long)]
        extractor: Option<String>,
    },

    /// List entities
    Entities {
        project: String,
        /// Entity type filter (repeatable)
        #[arg(short = 't', long = "type")]
        entity_types: Vec<String>,
        /// Minimum mention count
        #[arg(short, long)]
        min_mentions: Option<u64>,
        /// Case-insensitive name substring
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show one entity with its relationships and neighbours
    Show {
        project: String,
        /// Entity id or name
        entity: String,
        /// Neighbourhood radius
        #[arg(long, default_value = "1")]
        hops: usize,
    },

    /// Shortest path between two entities
    Path {
        project: String,
        from: String,
        to: String,
    },

    /// Most central entities
    Central {
        project: String,
        #[arg(short, long, default_value = "10")]
        top: usize,
        /// degree or eigenvector
        #[arg(short, long, default_value = "degree")]
        measure: String,
    },

    /// Detect communities
    Communities { project: String },

    /// Graph statistics
    Stats { project: String },

    /// Export the graph
    Export {
        project: String,
        /// interchange, markdown or raw
        #[arg(short, long, default_value = "interchange")]
        format: String,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Merge a node-link JSON file into a project
    Import { project: String, file: PathBuf },

    /// Add an entity by hand
    AddEntity {
        project: String,
        name: String,
        #[arg(short = 't', long = "type", default_value = "character")]
        entity_type: String,
    },

    /// Add a relationship between two entities (ids or names)
    AddRelationship {
        project: String,
        source: String,
        target: String,
        relationship_type: String,
    },

    /// List extraction jobs
    Jobs {
        project: String,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Cancel an extraction job
    Cancel { job_id: String },

    /// Delete an entity and its relationships
    DeleteEntity {
        project: String,
        /// Entity id or name
        entity: String,
    },

    /// Delete one relationship
    DeleteRelationship {
        project: String,
        relationship_id: String,
    },

    /// Find entities by indexed attribute across projects
    Search {
        value: String,
        /// Indexed attribute (name, type or property:<key>)
        #[arg(short, long, default_value = "name")]
        attribute: String,
    },

    /// Print live events while extracting a directory of scenes
    Watch {
        project: String,
        scenes_dir: PathBuf,
        #[arg(short, long)]
        extractor: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Printing policy shared by every command
#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Print `value` as JSON, or run `text` for human output
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        if self.json() {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }

    fn note(&self, message: impl AsRef<str>) {
        if !self.quiet && !self.json() {
            println!("{}", message.as_ref());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loregraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.output,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => cmd_config(action, out),
        Commands::Doctor => cmd_doctor(cli.database.as_deref(), out).await,
        command => {
            let config = Config::load()?;
            let db = open_database(&config, cli.database.as_deref()).await?;
            let service = build_service(&db, &config)?;
            let result = run(&service, &config, command, out).await;
            db.close().await;
            result
        }
    }
}

async fn open_database(config: &Config, path: Option<&Path>) -> anyhow::Result<Database> {
    let db_config = match path {
        Some(path) => DatabaseConfig::with_path(path),
        None => DatabaseConfig::from_storage(&config.storage)?,
    };
    Database::new(db_config).await
}

fn build_service(db: &Database, config: &Config) -> anyhow::Result<LoregraphService> {
    let completion: Option<Arc<dyn CompletionService>> = match config.llm.resolved_api_key()? {
        Some(key) => Some(Arc::new(LlmClient::new(config.llm.clone(), key)?)),
        None => None,
    };
    Ok(LoregraphService::from_pool(
        db.pool().clone(),
        config,
        completion,
    )?)
}

async fn run(
    service: &LoregraphService,
    config: &Config,
    command: Commands,
    out: Output,
) -> anyhow::Result<()> {
    match command {
        Commands::Extract {
            project,
            scene_file,
            extractor,
        } => {
            let extractor = choose_extractor(service, config, extractor.as_deref())?;
            cmd_extract(service, &project, &scene_file, extractor, out).await
        }

        Commands::ExtractAll {
            project,
            scenes_dir,
            extractor,
        } => {
            let extractor = choose_extractor(service, config, extractor.as_deref())?;
            cmd_extract_all(service, &project, &scenes_dir, extractor, out).await
        }

        Commands::Entities {
            project,
            entity_types,
            min_mentions,
            name,
            offset,
            limit,
        } => {
            let filter = EntityFilter {
                entity_types: parse_entity_types(&entity_types)?,
                min_mentions,
                name_contains: name,
            };
            cmd_entities(service, &project, filter, offset, limit, out).await
        }

        Commands::Show {
            project,
            entity,
            hops,
        } => cmd_show(service, &project, &entity, hops, out).await,

        Commands::Path { project, from, to } => cmd_path(service, &project, &from, &to, out).await,

        Commands::Central {
            project,
            top,
            measure,
        } => {
            let measure = CentralityMeasure::parse(&measure).ok_or_else(|| {
                anyhow::anyhow!("Invalid measure: {}. Valid options: degree, eigenvector", measure)
            })?;
            cmd_central(service, &project, top, measure, out).await
        }

        Commands::Communities { project } => cmd_communities(service, &project, out).await,

        Commands::Stats { project } => cmd_stats(service, &project, out).await,

        Commands::Export {
            project,
            format,
            out: file,
        } => {
            let format = ExportFormat::parse(&format).ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid export format: {}. Valid options: interchange, markdown, raw",
                    format
                )
            })?;
            cmd_export(service, &project, format, file.as_deref(), out).await
        }

        Commands::Import { project, file } => cmd_import(service, &project, &file, out).await,

        Commands::AddEntity {
            project,
            name,
            entity_type,
        } => {
            let entity_type = parse_entity_type(&entity_type)?;
            let entity = service
                .add_entity(&Caller::local(&project), Entity::new(name, entity_type))
                .await?;
            out.emit(&entity, || {
                println!("{} ({}) - {}", entity.name, entity.entity_type.as_str(), entity.id)
            })
        }

        Commands::AddRelationship {
            project,
            source,
            target,
            relationship_type,
        } => {
            let caller = Caller::local(&project);
            let source = resolve_entity_id(service, &caller, &source).await?;
            let target = resolve_entity_id(service, &caller, &target).await?;
            let relationship = service
                .add_relationship(&caller, Relationship::new(source, target, relationship_type))
                .await?;
            out.emit(&relationship, || {
                println!("{} - {}", relationship.relationship_type, relationship.id)
            })
        }

        Commands::Jobs {
            project,
            status,
            limit,
        } => {
            let status = match status {
                Some(s) => Some(JobStatus::parse(&s).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Invalid status: {}. Valid options: pending, running, completed, failed",
                        s
                    )
                })?),
                None => None,
            };
            cmd_jobs(service, &project, status, limit, out).await
        }

        Commands::Cancel { job_id } => cmd_cancel(service, &job_id, out).await,

        Commands::DeleteEntity { project, entity } => {
            let caller = Caller::local(&project);
            let entity_id = resolve_entity_id(service, &caller, &entity).await?;
            let deleted = service.delete_entity(&caller, &entity_id).await?;
            out.emit(&deleted, || {
                println!(
                    "Deleted '{}' and {} relationship(s).",
                    deleted.entity.name,
                    deleted.relationships.len()
                )
            })
        }

        Commands::DeleteRelationship {
            project,
            relationship_id,
        } => {
            let removed = service
                .delete_relationship(&Caller::local(&project), &relationship_id)
                .await?;
            out.emit(&removed, || println!("Deleted relationship '{}'.", removed.id))
        }

        Commands::Search { value, attribute } => {
            // The index spans projects; the local caller may read all of them
            let hits = service
                .search(&Caller::local("*"), &attribute, &value)
                .await?;
            out.emit(&hits, || {
                if hits.is_empty() {
                    println!("No matches.");
                }
                for hit in &hits {
                    println!("  {}  {}  ({} = {})", hit.project_id, hit.entity_id, hit.attribute, hit.value);
                }
            })
        }

        Commands::Watch {
            project,
            scenes_dir,
            extractor,
        } => {
            let extractor = choose_extractor(service, config, extractor.as_deref())?;
            cmd_watch(service, &project, &scenes_dir, extractor, out).await
        }

        Commands::Config { .. } | Commands::Doctor => Ok(()),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Pick the extractor; without an API key the local one is the only choice
fn choose_extractor(
    service: &LoregraphService,
    config: &Config,
    requested: Option<&str>,
) -> anyhow::Result<ExtractorKind> {
    if let Some(name) = requested {
        return ExtractorKind::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Invalid extractor: {}. Valid options: llm, ner", name));
    }
    let preferred = config.extraction.default_extractor;
    if service.manager().has_extractor(preferred) {
        return Ok(preferred);
    }
    warn!(
        preferred = %preferred,
        "No API key configured (set LOREGRAPH_API_KEY); using the local extractor"
    );
    Ok(ExtractorKind::Ner)
}

fn parse_entity_type(name: &str) -> anyhow::Result<EntityType> {
    EntityType::parse(name).ok_or_else(|| {
        let valid: Vec<&str> = EntityType::all().iter().map(|t| t.as_str()).collect();
        anyhow::anyhow!("Invalid entity type: {}. Valid options: {}", name, valid.join(", "))
    })
}

fn parse_entity_types(names: &[String]) -> anyhow::Result<Vec<EntityType>> {
    names
        .iter()
        .flat_map(|n| n.split(','))
        .filter(|n| !n.trim().is_empty())
        .map(parse_entity_type)
        .collect()
}

async fn resolve_entity_id(
    service: &LoregraphService,
    caller: &Caller,
    id_or_name: &str,
) -> anyhow::Result<String> {
    let detail = service.get_entity(caller, id_or_name, 0).await?;
    Ok(detail.entity.entity.id)
}

fn print_job(job: &ExtractionJob) {
    let mut line = format!(
        "  {}  {:<9}  {:<4}  scene {}",
        job.id,
        job.status.as_str(),
        job.extractor.as_str(),
        job.scene_id
    );
    if job.status == JobStatus::Completed {
        line.push_str(&format!(
            "  ({} entities, {} relationships, ${:.4})",
            job.entities_found, job.relationships_found, job.cost
        ));
    }
    if let Some(message) = &job.error_message {
        line.push_str(&format!("  - {}", message));
    }
    println!("{}", line);
}

fn describe_event(event: &GraphEvent) -> String {
    match event {
        GraphEvent::EntityAdded {
            name, entity_type, ..
        } => format!("+ entity {} ({})", name, entity_type.as_str()),
        GraphEvent::RelationshipAdded {
            source,
            target,
            relationship_type,
            ..
        } => format!("+ relationship {} -[{}]-> {}", source, relationship_type, target),
        GraphEvent::EntityUpdated { name, .. } => format!("~ entity {}", name),
        GraphEvent::EntityDeleted { entity_id, .. } => format!("- entity {}", entity_id),
        GraphEvent::RelationshipDeleted {
            relationship_id, ..
        } => format!("- relationship {}", relationship_id),
        GraphEvent::JobStarted {
            job_id, scene_id, ..
        } => format!("> job {} started (scene {})", job_id, scene_id),
        GraphEvent::JobCompleted {
            job_id,
            scene_id,
            added_entities,
            added_relationships,
            ..
        } => format!(
            "< job {} completed (scene {}): {} new entities, {} new relationships",
            job_id,
            scene_id,
            added_entities.len(),
            added_relationships.len()
        ),
        GraphEvent::JobFailed {
            job_id,
            scene_id,
            error,
            ..
        } => format!("! job {} failed (scene {}): {}", job_id, scene_id, error),
    }
}

/// Wait for jobs, cancelling them all on Ctrl-C
async fn wait_for_jobs(
    service: &LoregraphService,
    caller: &Caller,
    jobs: &[ExtractionJob],
) -> anyhow::Result<Vec<ExtractionJob>> {
    let mut finished = Vec::with_capacity(jobs.len());
    for job in jobs {
        let done = tokio::select! {
            done = service.wait_for_job(caller, &job.id) => done?,
            _ = tokio::signal::ctrl_c() => {
                let cancelled = service.manager().cancel_all();
                warn!(cancelled, "Interrupted; cancelling in-flight jobs");
                service.wait_for_job(caller, &job.id).await?
            }
        };
        finished.push(done);
    }
    Ok(finished)
}

fn summarize_jobs(jobs: &[ExtractionJob]) {
    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    let cost: f64 = jobs.iter().map(|j| j.cost).sum();
    println!();
    println!(
        "{} of {} job(s) completed, total cost ${:.4}",
        completed,
        jobs.len(),
        cost
    );
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_extract(
    service: &LoregraphService,
    project: &str,
    scene_file: &Path,
    extractor: ExtractorKind,
    out: Output,
) -> anyhow::Result<()> {
    let scene_id = scene_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Cannot derive a scene id from {}", scene_file.display()))?;
    let text = std::fs::read_to_string(scene_file)
        .with_context(|| format!("Failed to read scene file: {}", scene_file.display()))?;

    let caller = Caller::local(project);
    out.note(format!("Extracting scene '{}' with {}...", scene_id, extractor));
    let job = service
        .extract_scene(&caller, Scene::new(scene_id, text), Some(extractor))
        .await?;
    let finished = wait_for_jobs(service, &caller, std::slice::from_ref(&job)).await?;
    let job = &finished[0];

    out.emit(job, || print_job(job))?;
    if job.status == JobStatus::Failed {
        return Err(anyhow::anyhow!(
            "Extraction failed: {}",
            job.error_message.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

async fn cmd_extract_all(
    service: &LoregraphService,
    project: &str,
    scenes_dir: &Path,
    extractor: ExtractorKind,
    out: Output,
) -> anyhow::Result<()> {
    let caller = Caller::local(project);
    let source = DirectorySceneSource::new(scenes_dir);
    let jobs = service
        .extract_all_from(&caller, &source, Some(extractor))
        .await?;
    if jobs.is_empty() {
        out.note(format!("No scene files found in {}", scenes_dir.display()));
        return out.emit(&jobs, || {});
    }
    out.note(format!("Submitted {} job(s); waiting...", jobs.len()));

    let finished = wait_for_jobs(service, &caller, &jobs).await?;
    out.emit(&finished, || {
        for job in &finished {
            print_job(job);
        }
        if !out.quiet {
            summarize_jobs(&finished);
        }
    })
}

async fn cmd_entities(
    service: &LoregraphService,
    project: &str,
    filter: EntityFilter,
    offset: usize,
    limit: Option<usize>,
    out: Output,
) -> anyhow::Result<()> {
    let query = GraphQuery {
        filter,
        offset,
        limit,
    };
    let page = service.get_graph(&Caller::local(project), &query).await?;

    out.emit(&page, || {
        if page.nodes.is_empty() {
            println!("No entities found.");
            return;
        }
        if !out.quiet {
            println!("Entities ({} of {}):", page.nodes.len(), page.total);
        }
        for view in &page.nodes {
            println!(
                "  {:<24} {:<12} mentions {:<4} importance {:.3}  {}",
                view.entity.name,
                view.entity.entity_type.as_str(),
                view.entity.mention_count,
                view.importance,
                view.entity.id
            );
        }
    })
}

async fn cmd_show(
    service: &LoregraphService,
    project: &str,
    entity: &str,
    hops: usize,
    out: Output,
) -> anyhow::Result<()> {
    let detail = service
        .get_entity(&Caller::local(project), entity, hops)
        .await?;

    out.emit(&detail, || {
        let e = &detail.entity.entity;
        println!("{} ({})", e.name, e.entity_type.as_str());
        println!("  ID: {}", e.id);
        println!("  Mentions: {}", e.mention_count);
        println!("  Importance: {:.3}", detail.entity.importance);
        if !e.source_scenes.is_empty() {
            println!("  Scenes: {}", e.source_scenes.join(", "));
        }
        for (key, value) in &e.properties {
            match value {
                serde_json::Value::String(s) => println!("  {}: {}", key, s),
                other => println!("  {}: {}", key, other),
            }
        }
        if !detail.relationships.is_empty() {
            println!("\nRelationships:");
            let name_of = |id: &str| {
                detail
                    .connected
                    .iter()
                    .find(|c| c.entity.id == id)
                    .map(|c| c.entity.name.clone())
                    .unwrap_or_else(|| id.to_string())
            };
            for rel in &detail.relationships {
                if rel.source == e.id {
                    println!("  -[{}]-> {}", rel.relationship_type, name_of(&rel.target));
                } else {
                    println!("  <-[{}]- {}", rel.relationship_type, name_of(&rel.source));
                }
            }
        }
        let neighbours: Vec<_> = detail.connected.iter().filter(|c| c.distance > 0).collect();
        if !neighbours.is_empty() {
            println!("\nWithin {} hop(s):", hops);
            for c in neighbours {
                println!("  {} ({}) at {}", c.entity.name, c.entity.entity_type.as_str(), c.distance);
            }
        }
    })
}

async fn cmd_path(
    service: &LoregraphService,
    project: &str,
    from: &str,
    to: &str,
    out: Output,
) -> anyhow::Result<()> {
    let path = service.find_path(&Caller::local(project), from, to).await?;
    out.emit(&path, || {
        println!("{}", path.describe());
        if !out.quiet {
            println!("({} hop(s))", path.relationships.len());
        }
    })
}

async fn cmd_central(
    service: &LoregraphService,
    project: &str,
    top: usize,
    measure: CentralityMeasure,
    out: Output,
) -> anyhow::Result<()> {
    let ranked = service
        .central_entities(&Caller::local(project), top, measure)
        .await?;
    out.emit(&ranked, || {
        if !out.quiet {
            println!("Top {} by {} centrality:", ranked.len(), measure.as_str());
        }
        for (i, r) in ranked.iter().enumerate() {
            println!(
                "  {:>2}. {:<24} {:.4}",
                i + 1,
                r.entity.entity.name,
                r.score
            );
        }
    })
}

async fn cmd_communities(
    service: &LoregraphService,
    project: &str,
    out: Output,
) -> anyhow::Result<()> {
    let detection = service.communities(&Caller::local(project)).await?;
    out.emit(&detection, || {
        if detection.communities.is_empty() {
            println!("No communities (the graph is empty).");
            return;
        }
        println!(
            "{} communities, modularity {:.3}",
            detection.communities.len(),
            detection.modularity
        );
        for c in &detection.communities {
            println!("  #{} ({} members): {}", c.id, c.size, c.label);
        }
    })
}

async fn cmd_stats(service: &LoregraphService, project: &str, out: Output) -> anyhow::Result<()> {
    let stats = service.stats(&Caller::local(project)).await?;
    out.emit(&stats, || {
        println!("Project: {}", stats.project_id);
        println!("  Entities: {}", stats.entity_count);
        for (t, n) in &stats.entities_by_type {
            println!("    {:<14} {}", t, n);
        }
        println!("  Relationships: {}", stats.relationship_count);
        for (t, n) in &stats.relationships_by_type {
            println!("    {:<14} {}", t, n);
        }
        println!("  Average degree: {:.2}", stats.average_degree);
        println!("  Density: {:.4}", stats.density);
        println!("  Connected components: {}", stats.connected_components);
        if !stats.most_mentioned.is_empty() {
            println!("  Most mentioned:");
            for m in &stats.most_mentioned {
                println!("    {} ({})", m.name, m.mention_count);
            }
        }
        println!("  Last updated: {}", stats.last_updated.format("%Y-%m-%d %H:%M:%S"));
    })
}

async fn cmd_export(
    service: &LoregraphService,
    project: &str,
    format: ExportFormat,
    file: Option<&Path>,
    out: Output,
) -> anyhow::Result<()> {
    let rendered = service.export(&Caller::local(project), format).await?;
    match file {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write export: {}", path.display()))?;
            out.note(format!("Exported {} to {}", format, path.display()));
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

async fn cmd_import(
    service: &LoregraphService,
    project: &str,
    file: &Path,
    out: Output,
) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read import file: {}", file.display()))?;
    let interchange: InterchangeGraph = serde_json::from_str(&contents)
        .with_context(|| format!("Not a node-link graph: {}", file.display()))?;
    let applied = service.import(&Caller::local(project), &interchange).await?;
    out.emit(&applied, || {
        println!(
            "Imported {} new entities ({} merged) and {} relationships.",
            applied.created_entities.len(),
            applied.merged_entities.len(),
            applied.relationships.len()
        )
    })
}

async fn cmd_jobs(
    service: &LoregraphService,
    project: &str,
    status: Option<JobStatus>,
    limit: Option<u32>,
    out: Output,
) -> anyhow::Result<()> {
    let caller = Caller::local(project);
    let jobs = service.list_jobs(&caller, status, limit).await?;
    out.emit(&jobs, || {
        if jobs.is_empty() {
            println!("No extraction jobs.");
            return;
        }
        for job in &jobs {
            print_job(job);
        }
    })?;

    if !out.quiet && !out.json() && !jobs.is_empty() {
        let summary = service.cost_summary(&caller).await?;
        println!(
            "\nTotal: {} job(s), {} completed, {} failed, ${:.4} ({} in / {} out tokens)",
            summary.total_jobs,
            summary.completed_jobs,
            summary.failed_jobs,
            summary.total_cost,
            summary.total_input_tokens,
            summary.total_output_tokens
        );
    }
    Ok(())
}

async fn cmd_cancel(service: &LoregraphService, job_id: &str, out: Output) -> anyhow::Result<()> {
    let cancelled = service.manager().cancel(job_id).await?;
    let job = service.manager().get_job(job_id).await?;
    out.emit(&serde_json::json!({ "cancelled": cancelled, "job": job }), || {
        if cancelled {
            println!("Cancellation requested for job {}.", job_id);
        } else {
            println!(
                "Job {} is not in flight in this process (status: {}).",
                job_id, job.status
            );
        }
    })
}

async fn cmd_watch(
    service: &LoregraphService,
    project: &str,
    scenes_dir: &Path,
    extractor: ExtractorKind,
    out: Output,
) -> anyhow::Result<()> {
    let caller = Caller::local(project);
    let source = DirectorySceneSource::new(scenes_dir);
    let scene_count = source.list_scenes(project).await?.len();

    let mut events = service.subscribe(&caller).await?.into_stream().boxed();
    let jobs = service
        .extract_all_from(&caller, &source, Some(extractor))
        .await?;
    info!(project_id = %project, scenes = scene_count, "Watching extraction");

    let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
    let done = service.manager().wait_all(&job_ids);
    tokio::pin!(done);

    let mut interrupted = false;
    let finished = loop {
        tokio::select! {
            finished = &mut done => break finished?,
            Some(event) = events.next() => print_event(&event, out)?,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let cancelled = service.manager().cancel_all();
                warn!(cancelled, "Interrupted; cancelling in-flight jobs");
            }
        }
    };

    // Events published before the last job finished are already queued
    while let Some(Some(event)) = events.next().now_or_never() {
        print_event(&event, out)?;
    }

    if !out.quiet && !out.json() {
        summarize_jobs(&finished);
    }
    Ok(())
}

fn print_event(event: &GraphEvent, out: Output) -> anyhow::Result<()> {
    if out.json() {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", describe_event(event));
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            out.emit(&serde_json::json!({ "key": key, "value": value }), || {
                println!("{}", value)
            })?;
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.note(format!("Set {} = {}", key, value));
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            let map: serde_json::Map<String, serde_json::Value> = items
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            out.emit(&map, || {
                for (key, value) in &items {
                    println!("{} = {}", key, value);
                }
            })?;
        }
        ConfigAction::Reset => {
            Config::reset()?;
            out.note("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            out.emit(&path, || println!("{}", path.display()))?;
        }
    }
    Ok(())
}

async fn cmd_doctor(database: Option<&Path>, out: Output) -> anyhow::Result<()> {
    let mut all_ok = true;
    if !out.quiet {
        println!("Loregraph Health Check");
        println!("======================\n");
    }

    let config = match Config::load() {
        Ok(config) => {
            println!("[OK] Configuration: Valid");
            config
        }
        Err(e) => {
            println!("[!!] Configuration: Error - {}", e);
            all_ok = false;
            Config::default()
        }
    };

    match config.llm.redacted_api_key() {
        Ok(Some(redacted)) => println!("[OK] API Key: Configured ({})", redacted),
        Ok(None) => {
            println!("[--] API Key: Not configured (only the local extractor is available)");
        }
        Err(e) => {
            all_ok = false;
            println!("[!!] API Key: Error - {}", e);
        }
    }

    match Config::config_path() {
        Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
        Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
        Err(e) => {
            all_ok = false;
            println!("[!!] Config file: Error - {}", e);
        }
    }

    match open_database(&config, database).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => println!("[OK] Database: {}", db.path().display()),
                Err(e) => {
                    all_ok = false;
                    println!("[!!] Database: Health check failed - {}", e);
                }
            }
            match migration_status(db.pool()).await {
                Ok(status) => println!(
                    "     Schema version: {} of {}",
                    status.current_version, status.target_version
                ),
                Err(e) => {
                    all_ok = false;
                    println!("[!!] Database: Could not read schema version - {}", e);
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            println!("[!!] Database: Failed to open - {}", e);
        }
    }

    if !out.quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(())
}
