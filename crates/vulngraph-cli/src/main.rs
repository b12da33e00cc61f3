//! vulngraph CLI
//!
//! Command-line driver for the knowledge-graph pipeline:
//! - ingesting the source catalogs (CWE, CAPEC, CVE, ATT&CK, KEV)
//! - materializing intra- and cross-source relationships
//! - refreshing the exploited-flag snapshot from the current KEV list
//! - building and querying the semantic similarity index
//!
//! Graph-server location and credentials come from the environment
//! (`NEO4J_HTTP_URL`, `NEO4J_DATABASE`, `NEO4J_USERNAME`, `NEO4J_PASSWORD`);
//! `--memory` swaps in the in-process store for smoke runs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::env;
use std::path::PathBuf;

use vulngraph_ingest::{kev, Orchestrator, Phase, RunReport, SourcePaths};
use vulngraph_semantic::{
    build_index, expand_hit, search, EmbedProfile, Embedder, HashEmbedder, OllamaEmbedder,
};
use vulngraph_store::{CypherGraph, GraphSession, HttpExecutor, Label, MemoryGraph, RelType};

#[derive(Parser)]
#[command(name = "vulngraph")]
#[command(
    author,
    version,
    about = "Cybersecurity knowledge graph: ingestion, cross-source linking, semantic search"
)]
struct Cli {
    /// Run against an in-process store instead of a graph server.
    #[arg(long, global = true)]
    memory: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load source catalogs into the graph (entity phase).
    Ingest {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Materialize intra- and cross-source relationships.
    ///
    /// Re-reads the configured source files; safe to re-run after a late
    /// source arrives to back-fill previously skipped edges.
    Link {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Reset-then-set the exploited flag from the current KEV catalog.
    RefreshExploited {
        /// KEV catalog JSON document.
        #[arg(long)]
        kev: PathBuf,
    },

    /// Build the semantic similarity index over embedded node text.
    Embed {
        /// Restrict to one label (default: every configured profile).
        #[arg(long)]
        label: Option<String>,
        #[command(flatten)]
        embedder: EmbedderArgs,
    },

    /// Cosine-similarity search over the semantic index.
    Search {
        /// Query text.
        query: String,
        /// Restrict to one label (default: all embedded nodes).
        #[arg(long)]
        label: Option<String>,
        /// Number of hits to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Expand each hit through shared technique usage.
        #[arg(long)]
        expand: bool,
        /// Relationship type for the expansion walk.
        #[arg(long, default_value = "USES_TTP")]
        expand_rel: String,
        #[command(flatten)]
        embedder: EmbedderArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Weakness catalog JSON export.
    #[arg(long)]
    cwe: Option<PathBuf>,
    /// Attack-pattern catalog JSON export.
    #[arg(long)]
    capec: Option<PathBuf>,
    /// Advisory tree root (year partition directories below it).
    #[arg(long)]
    cve: Option<PathBuf>,
    /// Comma-separated year partitions, or `all` for the whole tree.
    #[arg(long, default_value = "all")]
    years: String,
    /// ATT&CK interchange bundle.
    #[arg(long)]
    attack: Option<PathBuf>,
    /// KEV catalog JSON document.
    #[arg(long)]
    kev: Option<PathBuf>,
}

impl SourceArgs {
    fn into_paths(self) -> SourcePaths {
        let years = match self.years.trim() {
            "" | "all" => Vec::new(),
            list => list.split(',').map(|y| y.trim().to_string()).collect(),
        };
        SourcePaths {
            cwe: self.cwe,
            capec: self.capec,
            cve: self.cve,
            cve_years: years,
            attack: self.attack,
            kev: self.kev,
        }
    }
}

#[derive(Args)]
struct EmbedderArgs {
    /// Use the deterministic token-hash backend instead of a model server.
    #[arg(long)]
    hash: bool,
    /// Vector width for the token-hash backend.
    #[arg(long, default_value_t = 256)]
    hash_dim: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut session = open_session(cli.memory)?;

    match cli.command {
        Commands::Ingest { sources } => {
            let report = Orchestrator::new(sources.into_paths())
                .run(session.as_mut(), &[Phase::Entities])?;
            print_run_report(&report);
        }
        Commands::Link { sources } => {
            let report = Orchestrator::new(sources.into_paths())
                .run(session.as_mut(), &[Phase::IntraLinks, Phase::CrossLinks])?;
            print_run_report(&report);
        }
        Commands::RefreshExploited { kev } => {
            let report = kev::refresh_exploited(session.as_mut(), &kev)?;
            println!(
                "{} reset {} advisories, flagged {}, {} listed but absent",
                "exploited:".bold(),
                report.reset,
                report.flagged,
                report.absent
            );
        }
        Commands::Embed { label, embedder } => {
            let embedder = open_embedder(&embedder, cli.memory)?;
            let profiles = embed_profiles(label.as_deref())?;
            for profile in &profiles {
                let report = build_index(session.as_mut(), embedder.as_ref(), profile)?;
                println!(
                    "{} {}: embedded {}, no text {}, errors {}",
                    "embed".bold(),
                    profile.label,
                    report.embedded,
                    report.skipped_no_text,
                    report.errors
                );
            }
        }
        Commands::Search {
            query,
            label,
            top_k,
            expand,
            expand_rel,
            embedder,
        } => {
            let embedder = open_embedder(&embedder, cli.memory)?;
            let scope = label.as_deref().map(Label::new).transpose()?;
            let hits = search(
                session.as_mut(),
                embedder.as_ref(),
                &query,
                scope.as_ref(),
                top_k,
            )?;
            if hits.is_empty() {
                println!("{}", "no embedded nodes matched".yellow());
            }
            let rel = RelType::new(&expand_rel)?;
            for hit in &hits {
                println!(
                    "{} {:.4}  {}  {}",
                    hit.label.cyan(),
                    hit.score,
                    hit.display_id().bold(),
                    hit.props
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                );
                if expand {
                    let key_prop = key_prop_for(&hit.label);
                    for expansion in expand_hit(session.as_mut(), hit, key_prop, &rel)? {
                        println!(
                            "    via {}: {}",
                            display_key(&expansion.shared.props),
                            display_key(&expansion.related.props)
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn open_session(memory: bool) -> Result<Box<dyn GraphSession>> {
    if memory {
        return Ok(Box::new(MemoryGraph::new()));
    }
    let base_url =
        env::var("NEO4J_HTTP_URL").unwrap_or_else(|_| "http://localhost:7474".to_string());
    let database = env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string());
    let username = env::var("NEO4J_USERNAME").context("NEO4J_USERNAME is not set")?;
    let password = env::var("NEO4J_PASSWORD").context("NEO4J_PASSWORD is not set")?;
    let executor = HttpExecutor::new(&base_url, &database, &username, &password)?;
    Ok(Box::new(CypherGraph::new(executor)))
}

fn open_embedder(args: &EmbedderArgs, memory: bool) -> Result<Box<dyn Embedder>> {
    // The in-process store has no model server next to it; default to the
    // deterministic backend there.
    if args.hash || memory {
        return Ok(Box::new(HashEmbedder::new(args.hash_dim)));
    }
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost:11434".to_string());
    let model = env::var("EMBED_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string());
    Ok(Box::new(OllamaEmbedder::new(&host, &model)?))
}

fn embed_profiles(only: Option<&str>) -> Result<Vec<EmbedProfile>> {
    use vulngraph_model::vocab::{key, label};
    let all = vec![
        EmbedProfile::new(
            Label::new(label::CAPEC)?,
            key::CAPEC,
            &[
                "name",
                "description",
                "prerequisites",
                "consequences",
                "executionFlow",
            ],
        ),
        EmbedProfile::new(Label::new(label::TTP)?, key::TTP, &["name", "description"]),
        EmbedProfile::new(Label::new(label::CWE)?, key::CWE, &["name", "description"]),
        EmbedProfile::new(Label::new(label::CVE)?, key::CVE, &["description"]),
    ];
    Ok(match only {
        Some(name) => all
            .into_iter()
            .filter(|p| p.label.as_str() == name)
            .collect(),
        None => all,
    })
}

fn key_prop_for(label_name: &str) -> &'static str {
    use vulngraph_model::vocab::{key, label};
    match label_name {
        l if l == label::CVE => key::CVE,
        l if l == label::TTP => key::TTP,
        l if l == label::TACTIC => key::TACTIC,
        _ => key::CAPEC,
    }
}

fn display_key(props: &vulngraph_store::Props) -> String {
    for prop in ["id", "cveId", "externalId", "name"] {
        if let Some(value) = props.get(prop).and_then(|v| v.as_str()) {
            return value.to_string();
        }
    }
    "?".to_string()
}

fn print_run_report(report: &RunReport) {
    println!(
        "{} created {}, updated {}, skipped {}, errors {}",
        "entities:".bold(),
        report.entities.created,
        report.entities.updated,
        report.entities.skipped,
        report.entities.errors
    );
    println!(
        "{} created {}, existing {}, missing targets {}, errors {}",
        "links:".bold(),
        report.links.created + report.entities.links.created,
        report.links.existing + report.entities.links.existing,
        report.links.missing.len() + report.entities.links.missing.len(),
        report.links.errors + report.entities.links.errors
    );
    for missing in report.links.missing.iter().take(10) {
        println!(
            "  {} {} -[{}]-> {}",
            "missing:".yellow(),
            missing.src_key,
            missing.rel,
            missing.dst_key
        );
    }
    if report.links.missing.len() > 10 {
        println!("  ... and {} more", report.links.missing.len() - 10);
    }
}
