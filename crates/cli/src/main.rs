use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kws::fusion::SystemHits;
use kws::pipeline::{self, to_hit_list};
use kws::{
    ConfusionMatrix, FusionEngine, FusionMethod, GraphemeMapper, KwsEngine, Lexicon,
    SystemRegistry, normalize_scores,
};
use kws_config::KwsSettings;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kws", version, about = "Spoken-term detection over time-aligned ASR output")]
struct Cli {
    /// Settings file layered over defaults and `kws.*` (env `KWS__*` wins).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a CTM file and search a query list, writing one system's hits.
    Search {
        #[arg(long)]
        ctm: PathBuf,
        /// JSON array of `{ "kwid": ..., "text": ... }`.
        #[arg(long)]
        queries: PathBuf,
        /// Name recorded as the source of every score.
        #[arg(long)]
        system: String,
        /// Decomposition dictionary applied to recognized words.
        #[arg(long)]
        lexicon: Option<PathBuf>,
        /// Decomposition dictionary applied to query terms.
        #[arg(long)]
        query_lexicon: Option<PathBuf>,
        /// In-vocabulary word list for OOV substitution.
        #[arg(long, requires = "confusion")]
        vocabulary: Option<PathBuf>,
        /// Grapheme confusion counts for OOV substitution.
        #[arg(long, requires = "vocabulary")]
        confusion: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Fuse the hit lists of several systems.
    Fuse {
        /// `SYSTEM=PATH`, repeated once per system.
        #[arg(long = "hits", value_parser = parse_system_path, required = true)]
        hits: Vec<(String, PathBuf)>,
        /// JSON object mapping system name to its quality metric.
        #[arg(long)]
        registry: PathBuf,
        /// SUM, MNZ, WEIGHTED_MNZ or POWER2 (overrides settings).
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Renormalize the scores of a hit list per query.
    Normalize {
        #[arg(long)]
        hits: PathBuf,
        /// STO, KST or QL (overrides settings).
        #[arg(long)]
        method: Option<String>,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long)]
        beta: Option<f64>,
        /// Total searched speech in seconds (KST).
        #[arg(long)]
        total_duration: Option<f64>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the effective settings.
    Settings,
}

fn parse_system_path(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((system, path)) if !system.is_empty() && !path.is_empty() => {
            Ok((system.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected SYSTEM=PATH, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings =
        KwsSettings::load_from(cli.settings.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Command::Search {
            ctm,
            queries,
            system,
            lexicon,
            query_lexicon,
            vocabulary,
            confusion,
            out,
        } => {
            let mut engine = KwsEngine::new(system, settings.index.clone());
            if let Some(path) = lexicon {
                engine = engine.with_event_decomposer(Arc::new(Lexicon::load(path)?));
            }
            if let Some(path) = query_lexicon {
                engine = engine.with_query_decomposer(Arc::new(Lexicon::load(path)?));
            }
            if let (Some(vocabulary), Some(confusion)) = (vocabulary, confusion) {
                let mapper = GraphemeMapper::new(
                    GraphemeMapper::load_vocabulary(vocabulary)?,
                    ConfusionMatrix::load(confusion)?,
                );
                engine = engine.with_term_mapper(Arc::new(mapper));
            }

            let events = pipeline::parse_ctm(&ctm)?;
            engine.index_documents(events).await?;

            let queries = pipeline::load_queries(&queries)?;
            let results = engine.search_queries(&queries)?;
            pipeline::write_hit_list(&out, &to_hit_list(&results))?;
            info!(out = %out.display(), "Hit list written");
        }
        Command::Fuse {
            hits,
            registry,
            method,
            out,
        } => {
            let mut config = settings.fusion.clone();
            if let Some(method) = method {
                config.method = method.parse::<FusionMethod>()?;
            }
            let registry = Arc::new(SystemRegistry::load(&registry)?);

            let mut per_query: BTreeMap<String, SystemHits> = BTreeMap::new();
            for (system, path) in &hits {
                for (kwid, system_hits) in pipeline::load_hit_list(path, system)? {
                    per_query
                        .entry(kwid)
                        .or_default()
                        .push((system.clone(), system_hits));
                }
            }

            let fused = FusionEngine::new(registry, config).fuse_document_set(&per_query)?;
            pipeline::write_hit_list(&out, &to_hit_list(&fused))?;
            info!(out = %out.display(), "Fused hit list written");
        }
        Command::Normalize {
            hits,
            method,
            alpha,
            beta,
            total_duration,
            out,
        } => {
            let mut config = settings.normalization.clone();
            config.method = method.unwrap_or(config.method);
            config.alpha = alpha.unwrap_or(config.alpha);
            config.beta = beta.unwrap_or(config.beta);
            config.total_duration_secs = total_duration.unwrap_or(config.total_duration_secs);
            let method = config.method()?;

            let mut list = pipeline::read_hit_list(&hits)?;
            for records in list.values_mut() {
                normalize_scores(records.as_mut_slice(), method)?;
            }
            pipeline::write_hit_list(&out, &list)?;
            info!(out = %out.display(), method = %config.method, "Normalized hit list written");
        }
        Command::Settings => {
            println!("{}", settings.to_pretty_json()?);
        }
    }

    Ok(())
}
