//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use specter_core::{
    CACHE_KEY, CacheSnapshot, Coordinator, DraftRequest, DraftSession, EnrichmentCache,
    PipelineDeps, PipelineProgress, RelatedCase, run_draft,
};
use specter_generation::OpenAiCompatClient;
use specter_scrape::FirecrawlClient;
use specter_search::{SearchProvider, SerpApiClient, build_query};
use specter_shared::{
    AppConfig, CandidateMatch, GenerationOptions, ScrapeOptions, SearchOptions, SpecterError,
    init_config, load_config, validate_api_key,
};
use specter_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::draft_file::{DraftFile, read_facts};
use crate::progress::{CliProgress, SnapshotForwarder};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Specter: draft class action complaints from extracted facts.
#[derive(Parser)]
#[command(
    name = "specter",
    version,
    about = "Find related class actions, enrich them, and draft a complaint.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search for related cases.
    Search {
        /// Search query. Derived from --facts (or the configured default) when omitted.
        query: Option<String>,

        /// JSON file of extracted facts.
        #[arg(long)]
        facts: Option<PathBuf>,

        /// Print matches as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search and enrich the matches, filling the local cache.
    Enrich {
        /// Search query. Derived from --facts (or the configured default) when omitted.
        query: Option<String>,

        /// JSON file of extracted facts.
        #[arg(long)]
        facts: Option<PathBuf>,

        /// Print the enriched contexts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a full complaint draft.
    Draft {
        /// JSON file of extracted facts.
        #[arg(long)]
        facts: PathBuf,

        /// Search query (derived from the facts when omitted).
        #[arg(short, long)]
        query: Option<String>,

        /// Draft against this match id only.
        #[arg(long = "match")]
        selected_match: Option<String>,

        /// Where to write the draft JSON.
        #[arg(short, long, default_value = "draft.json")]
        out: PathBuf,

        /// Also export the draft as Markdown.
        #[arg(long)]
        markdown: Option<PathBuf>,

        /// Print the draft to stdout while it streams.
        #[arg(long)]
        stream: bool,
    },

    /// Regenerate one section of an existing draft.
    Regenerate {
        /// Draft JSON written by `specter draft`.
        #[arg(long, default_value = "draft.json")]
        draft: PathBuf,

        /// Section id (e.g. section-parties).
        #[arg(long)]
        section: String,

        /// Print the section to stdout while it streams.
        #[arg(long)]
        stream: bool,
    },

    /// Enrichment cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List cached contexts.
    Show {
        /// Print the whole cache as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached context.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "specter=info",
        1 => "specter=debug",
        _ => "specter=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Search { query, facts, json } => cmd_search(query, facts.as_deref(), json).await,
        Command::Enrich { query, facts, json } => cmd_enrich(query, facts.as_deref(), json).await,
        Command::Draft {
            facts,
            query,
            selected_match,
            out,
            markdown,
            stream,
        } => {
            cmd_draft(
                &facts,
                query,
                selected_match,
                &out,
                markdown.as_deref(),
                stream,
            )
            .await
        }
        Command::Regenerate {
            draft,
            section,
            stream,
        } => cmd_regenerate(&draft, &section, stream).await,
        Command::Cache { action } => match action {
            CacheAction::Show { json } => cmd_cache_show(json).await,
            CacheAction::Clear => cmd_cache_clear().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Collaborator wiring
// ---------------------------------------------------------------------------

async fn open_cache(config: &AppConfig) -> Result<EnrichmentCache> {
    let path = config.defaults.cache_db_path();
    let storage = Storage::open(&path).await?;
    Ok(EnrichmentCache::load(Arc::new(storage)).await)
}

fn search_client(config: &AppConfig) -> Result<SerpApiClient> {
    validate_api_key(&config.search.api_key_env)?;
    Ok(SerpApiClient::new(SearchOptions::from(config))?)
}

fn build_coordinator(config: &AppConfig) -> Result<Coordinator> {
    let opts = ScrapeOptions::from(config);
    let max_concurrency = opts.max_concurrency;
    let fetcher = FirecrawlClient::new(opts)?;
    Ok(Coordinator::new(Arc::new(fetcher)).with_max_concurrency(max_concurrency))
}

fn draft_session(config: &AppConfig) -> Result<DraftSession> {
    let opts = GenerationOptions::from(config);
    let client = OpenAiCompatClient::new(&opts)?;
    Ok(DraftSession::new(Arc::new(client), opts.model.clone()).with_temperature(opts.temperature))
}

fn resolve_query(config: &AppConfig, query: Option<String>, facts: Option<&Path>) -> Result<String> {
    if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
        return Ok(query);
    }
    let facts = match facts {
        Some(path) => read_facts(path)?,
        None => Vec::new(),
    };
    Ok(build_query(&facts, &config.search.default_query))
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    token
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_search(query: Option<String>, facts: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config()?;
    let client = search_client(&config)?;
    let query = resolve_query(&config, query, facts)?;

    info!(%query, "searching");
    let matches = client.search(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&matches)?);
        return Ok(());
    }

    println!();
    println!("  Query: {query}");
    println!();
    print_matches(&matches);
    Ok(())
}

async fn cmd_enrich(query: Option<String>, facts: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config()?;
    let client = search_client(&config)?;
    let coordinator = build_coordinator(&config)?;
    let cache = open_cache(&config).await?;
    let query = resolve_query(&config, query, facts)?;
    let cancel = cancel_on_ctrl_c();

    let reporter = CliProgress::new(false);
    reporter.phase("Searching for related cases");
    let matches = client.search(&query).await?;
    let outcome = coordinator.enrich(&matches, &cache, &reporter, &cancel).await;
    reporter.finish();

    if json {
        let mut enriched = serde_json::Map::new();
        for candidate in &matches {
            if let Some(ctx) = outcome.snapshot.get(&candidate.id) {
                enriched.insert(candidate.id.clone(), serde_json::to_value(ctx)?);
            }
        }
        println!("{}", serde_json::to_string_pretty(&enriched)?);
        return Ok(());
    }

    println!();
    for (i, candidate) in matches.iter().enumerate() {
        let status = match outcome.snapshot.get(&candidate.id) {
            Some(ctx) if ctx.is_error() => format!("error: {}", ctx.error.as_deref().unwrap_or_default()),
            Some(ctx) => ctx
                .title
                .clone()
                .unwrap_or_else(|| "enriched".to_string()),
            None => "no source url".to_string(),
        };
        println!("  {:>2}. {}", i + 1, candidate.name);
        println!("      {status}");
    }
    println!();
    println!(
        "  Fetched: {}  Cached: {}  Failed: {}  Skipped: {}",
        outcome.fetched, outcome.cache_hits, outcome.failures, outcome.skipped_no_url
    );
    if outcome.cancelled {
        println!("  Enrichment was cancelled; settled contexts were kept.");
    }
    println!();
    Ok(())
}

async fn cmd_draft(
    facts_path: &Path,
    query: Option<String>,
    selected_match: Option<String>,
    out: &Path,
    markdown: Option<&Path>,
    stream: bool,
) -> Result<()> {
    let config = load_config()?;
    let facts = read_facts(facts_path)?;
    let search = search_client(&config)?;
    let coordinator = build_coordinator(&config)?;
    let cache = open_cache(&config).await?;
    let session = draft_session(&config)?;
    let cancel = cancel_on_ctrl_c();

    let request = DraftRequest {
        facts,
        query,
        selected_match,
    };
    let deps = PipelineDeps {
        search: &search,
        coordinator: &coordinator,
        cache: &cache,
        session: &session,
        default_query: &config.search.default_query,
    };

    info!(facts = request.facts.len(), "drafting complaint");
    let reporter = CliProgress::new(stream);
    let result = run_draft(&request, deps, &reporter, &cancel).await;
    reporter.finish();
    let outcome = result.map_err(draft_failure)?;

    let used: Vec<CandidateMatch> = outcome
        .matches
        .iter()
        .filter(|m| outcome.used_matches.contains(&m.id))
        .cloned()
        .collect();
    let file = DraftFile {
        query: outcome.query.clone(),
        facts: request.facts,
        matches: used,
        document: session.document(),
        generated_at: chrono::Utc::now(),
    };
    file.write(out)?;
    if let Some(path) = markdown {
        std::fs::write(path, file.document.to_markdown()).map_err(|e| SpecterError::io(path, e))?;
    }

    if stream {
        println!();
    }
    println!();
    println!("  Draft generated!");
    println!("  Query:    {}", outcome.query);
    println!(
        "  Matches:  {} found, {} used",
        outcome.matches.len(),
        outcome.used_matches.len()
    );
    println!("  Sections: {}", outcome.sections.len());
    for section in &outcome.sections {
        println!("    - {} ({})", section.title, section.id);
    }
    println!("  Path:     {}", out.display());
    println!("  Time:     {:.1}s", outcome.elapsed.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_regenerate(draft_path: &Path, section_id: &str, stream: bool) -> Result<()> {
    let config = load_config()?;
    let mut file = DraftFile::read(draft_path)?;
    let cache = open_cache(&config).await?;
    let snapshot = cache.snapshot();

    let cases: Vec<RelatedCase> = file
        .matches
        .iter()
        .filter_map(|m| {
            snapshot
                .get(&m.id)
                .filter(|ctx| !ctx.is_error())
                .map(|ctx| RelatedCase::new(m, ctx.clone()))
        })
        .collect();

    let session = draft_session(&config)?.with_document(file.document.clone());
    let cancel = cancel_on_ctrl_c();

    info!(section_id, cases = cases.len(), "regenerating section");
    let reporter = CliProgress::new(stream);
    reporter.phase(&format!("Regenerating {section_id}"));
    let mut observer = SnapshotForwarder(&reporter);
    let result = session
        .regenerate_section(section_id, &file.facts, &cases, &mut observer, &cancel)
        .await;
    reporter.finish();
    let section = result.map_err(draft_failure)?;

    file.document = session.document();
    file.write(draft_path)?;

    if stream {
        println!();
    }
    println!();
    println!("  Section regenerated: {} ({})", section.title, section.id);
    println!("  {} chars written to {}", section.content.len(), draft_path.display());
    println!();
    Ok(())
}

async fn cmd_cache_show(json: bool) -> Result<()> {
    let config = load_config()?;
    let path = config.defaults.cache_db_path();
    let (snapshot, updated_at) = if path.exists() {
        let storage = Arc::new(Storage::open_readonly(&path).await?);
        let updated_at = storage
            .list_keys()
            .await?
            .into_iter()
            .find_map(|(key, updated_at)| (key == CACHE_KEY).then_some(updated_at));
        (EnrichmentCache::load(storage).await.snapshot(), updated_at)
    } else {
        (CacheSnapshot::default(), None)
    };

    if json {
        let ordered: std::collections::BTreeMap<_, _> = snapshot.iter().collect();
        println!("{}", serde_json::to_string_pretty(&ordered)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("Enrichment cache is empty.");
        return Ok(());
    }

    let mut ids: Vec<&String> = snapshot.keys().collect();
    ids.sort();
    println!();
    for id in ids {
        let ctx = &snapshot[id];
        let fetched = ctx
            .fetched_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        match &ctx.error {
            Some(err) => println!("  [error] {id}\n          {err}"),
            None => println!(
                "  [ok]    {id}\n          {} ({fetched})",
                ctx.title.as_deref().unwrap_or("untitled")
            ),
        }
    }
    println!();
    println!("  {} entries in {}", snapshot.len(), path.display());
    if let Some(updated_at) = updated_at {
        println!("  last written {updated_at}");
    }
    println!();
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let config = load_config()?;
    let cache = open_cache(&config).await?;
    let count = cache.len();
    cache.clear().await?;
    println!("Cleared {count} cached contexts.");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_matches(matches: &[CandidateMatch]) {
    if matches.is_empty() {
        println!("  No matches found.");
        println!();
        return;
    }
    for (i, m) in matches.iter().enumerate() {
        println!("  {:>2}. {} [{:.0}%]", i + 1, m.name, m.confidence_score * 100.0);
        println!("      {}", m.description);
        let mut details = Vec::new();
        if let Some(source) = &m.source {
            details.push(source.clone());
        }
        if let Some(date) = &m.date_posted {
            details.push(date.clone());
        }
        if let Some(members) = m.member_count {
            details.push(format!("{members} members"));
        }
        if !details.is_empty() {
            println!("      {}", details.join(" · "));
        }
        println!("      id: {}", m.id);
    }
    println!();
}

/// Turn a draft error into a report, keeping any partial text visible.
fn draft_failure(err: SpecterError) -> color_eyre::eyre::Report {
    match err.partial_text() {
        Some(partial) if !partial.is_empty() => {
            eyre!("{err}\n\nPartial text before the failure:\n{partial}")
        }
        _ => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn draft_flags_parse() {
        let cli = Cli::try_parse_from([
            "specter", "-vv", "draft", "--facts", "facts.json", "--match", "https://a.example",
            "--stream",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Draft {
                selected_match,
                out,
                stream,
                ..
            } => {
                assert_eq!(selected_match.as_deref(), Some("https://a.example"));
                assert_eq!(out, PathBuf::from("draft.json"));
                assert!(stream);
            }
            _ => panic!("expected draft command"),
        }
    }
}
