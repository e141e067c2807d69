use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use docsearch_core::config::Config;
use docsearch_core::{Chunk, Position, RankedCandidate};
use docsearch_hybrid::{extract_keywords, RetrievalEngine};

const COLLECTION: &str = "cli";

const USAGE: &str = "Usage:
  docsearch retrieve <query> [--dir DIR] [--k N] [--semantic-only] [--expand] [--hyde] [--decompose] [--no-rerank]
  docsearch compare <query> [--dir DIR] [--k N]
  docsearch health [--dir DIR]";

#[derive(Default)]
struct Args {
    cmd: String,
    query: Option<String>,
    data_dir: Option<PathBuf>,
    k: Option<usize>,
    semantic_only: bool,
    expand: bool,
    hyde: bool,
    decompose: bool,
    no_rerank: bool,
}

fn parse_args() -> Result<Args> {
    let mut raw = env::args().skip(1);
    let Some(cmd) = raw.next() else {
        bail!("{USAGE}");
    };
    let mut args = Args {
        cmd,
        ..Args::default()
    };
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--dir" | "-d" => {
                args.data_dir = Some(PathBuf::from(raw.next().context("--dir requires a path")?));
            }
            "--k" | "-k" => {
                let value = raw.next().context("--k requires a number")?;
                args.k = Some(value.parse().context("--k requires a number")?);
            }
            "--semantic-only" => args.semantic_only = true,
            "--expand" => args.expand = true,
            "--hyde" => args.hyde = true,
            "--decompose" => args.decompose = true,
            "--no-rerank" => args.no_rerank = true,
            "--help" | "-h" => bail!("{USAGE}"),
            _ if arg.starts_with('-') => bail!("unknown flag {arg}\n{USAGE}"),
            _ => match &mut args.query {
                Some(q) => {
                    q.push(' ');
                    q.push_str(&arg);
                }
                None => args.query = Some(arg),
            },
        }
    }
    Ok(args)
}

/// Non-empty paragraphs separated by blank lines, with their byte offsets.
fn paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut offset = 0;
    for part in text.split("\n\n") {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let lead = part.len() - part.trim_start().len();
            out.push((offset + lead, trimmed));
        }
        offset += part.len() + 2;
    }
    out
}

async fn load_dir(engine: &RetrievalEngine, dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        bail!("data directory {} does not exist", dir.display());
    }
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
        .collect();

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let mut total = 0;
    for path in &files {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let doc_id = path.strip_prefix(dir).unwrap_or(path).display().to_string();
        let chunks: Vec<Chunk> = paragraphs(&text)
            .into_iter()
            .enumerate()
            .map(|(n, (offset, para))| {
                Chunk::new(format!("{doc_id}#{n}"), doc_id.clone(), para)
                    .with_position(Position { page: None, offset })
            })
            .collect();
        pb.set_message(doc_id.clone());
        total += engine.add_chunks(COLLECTION, chunks).await?;
        pb.inc(1);
    }
    pb.finish_with_message("indexed");
    info!(files = files.len(), chunks = total, "collection loaded");
    Ok(total)
}

fn candidate_json(c: &RankedCandidate) -> Value {
    json!({
        "rank": c.rank,
        "id": c.chunk.id,
        "score": c.score,
        "source_document_id": c.chunk.source_document_id,
        "position": c.chunk.position,
        "text": c.chunk.text,
    })
}

fn candidates_json(list: &[RankedCandidate]) -> Value {
    Value::Array(list.iter().map(candidate_json).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = config.settings()?;
    let args = parse_args()?;
    let data_dir = args.data_dir.clone().unwrap_or_else(|| {
        let dir: String = config
            .get("data.raw_txt_dir")
            .unwrap_or_else(|_| "../dev_data/txt".to_string());
        PathBuf::from(dir)
    });

    let engine = RetrievalEngine::from_settings(&settings)?;
    engine.create_collection(COLLECTION)?;
    load_dir(&engine, &data_dir).await?;

    let output = match args.cmd.as_str() {
        "retrieve" => {
            let query = args.query.as_deref().context("retrieve needs a query")?;
            let mut options = engine.default_options();
            if let Some(k) = args.k {
                options.k = k;
                options.candidate_pool_size = options.candidate_pool_size.max(k);
            }
            options.use_hybrid = !args.semantic_only;
            options.use_query_expansion = args.expand;
            options.use_hyde = args.hyde;
            options.use_decomposition = args.decompose;
            if args.no_rerank {
                options.use_reranking = false;
            }
            let outcome = engine.retrieve(COLLECTION, query, options).await?;
            json!({
                "query": query,
                "keywords": extract_keywords(query),
                "from_cache": outcome.from_cache,
                "stages": outcome.stages,
                "results": candidates_json(&outcome.candidates),
            })
        }
        "compare" => {
            let query = args.query.as_deref().context("compare needs a query")?;
            let k = args.k.unwrap_or(engine.default_options().k);
            let cmp = engine.compare_methods(COLLECTION, query, k).await?;
            json!({
                "query": cmp.query,
                "keywords": cmp.keywords,
                "methods": {
                    "lexical_only": candidates_json(&cmp.lexical),
                    "semantic_only": candidates_json(&cmp.semantic),
                    "hybrid": candidates_json(&cmp.hybrid),
                },
            })
        }
        "health" => json!({
            "collections": engine.health_all(),
            "result_cache": {
                "entries": engine.cache().len(),
                "capacity": engine.cache().capacity(),
            },
            "embedding_cache": engine.embedding_cache().stats(),
        }),
        other => bail!("unknown command {other}\n{USAGE}"),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
