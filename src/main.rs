use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use askdoc::{
    Chunk,
    DataDir,
    Engine,
    Settings,
    answer::{AnswerGenerator, ExtractiveAnswerer},
    chunk::RankedChunk,
    error,
};
use clap::Parser;
use kdam::{BarExt, tqdm};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AskArgs, Cli, Command, IndexArgs, SearchArgs};

const SNIPPET_CHARS: usize = 80;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("ASKDOC_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let mut settings = Settings::from_env()?;
    if let Some(model) = cli.model {
        settings.model_id = model;
    }
    if let Some(embedder) = cli.embedder {
        settings.embedder = embedder;
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let engine = Engine::open(data_dir, settings)?;

    match cli.command {
        Command::Index(args) => cmd_index(&engine, &args, cli.quiet)?,
        Command::Search(args) => cmd_search(&engine, &args)?,
        Command::Ask(args) => cmd_ask(&engine, &args)?,
        Command::Remove(args) => {
            let report = engine.remove_chunks(&args.chunk_ids)?;
            println!(
                "Removed {} of {} chunk(s) from the vector index",
                report.vector_rows_removed, report.requested
            );
        }
        Command::Status(args) => cmd_status(&engine, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn read_chunks(path: &Path) -> error::Result<Vec<Chunk>> {
    let reader: Box<dyn Read> = if path == Path::new("-") {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(path)?))
    };
    Ok(serde_json::from_reader(reader)?)
}

fn cmd_index(
    engine: &Engine,
    args: &IndexArgs,
    quiet: bool,
) -> error::Result<()> {
    let chunks = read_chunks(&args.file)?;

    let mut pb = tqdm!(
        total = chunks.len(),
        desc = "Embedding",
        unit = " chunks",
        disable = quiet || args.json
    );
    let report = engine.build_indexes_with_progress(
        &chunks,
        args.reindex_all,
        &mut |n| {
            pb.update(n).ok();
        },
    )?;
    if !(quiet || args.json) {
        eprintln!();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Indexed {} chunk(s), {} already indexed",
            report.indexed, report.already_indexed
        );
        println!(
            "Lexical chunks: {}, vector rows: {}",
            report.lexical_chunks, report.vector_rows
        );
    }
    Ok(())
}

fn cmd_search(engine: &Engine, args: &SearchArgs) -> error::Result<()> {
    let params = args.retrieval.params(engine.settings());
    let candidates = engine.retrieve(&args.query, &params)?;
    let results = engine.context(&candidates)?;

    if args.json {
        let value = json!({ "query": args.query, "results": results });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if results.is_empty() {
        println!("No relevant context found.");
    } else {
        for (rank, result) in results.iter().enumerate() {
            print_ranked(rank + 1, result);
        }
    }
    Ok(())
}

fn cmd_ask(engine: &Engine, args: &AskArgs) -> error::Result<()> {
    let params = args.retrieval.params(engine.settings());
    let candidates = engine.retrieve(&args.question, &params)?;
    let context = engine.context(&candidates)?;
    let chunks: Vec<Chunk> = context.iter().map(|r| r.chunk.clone()).collect();
    let answer = ExtractiveAnswerer::default().generate(&args.question, &chunks)?;

    if args.json {
        let value = json!({
            "question": args.question,
            "answer": answer.text,
            "cited": answer.cited,
            "context": context,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", answer.text);
    if !answer.cited.is_empty() {
        println!();
        println!("Sources:");
        for chunk in chunks.iter().filter(|c| answer.cited.contains(&c.id)) {
            println!(
                "  #{} (document {}, page {})",
                chunk.id, chunk.document_id, chunk.page_number
            );
        }
    }
    Ok(())
}

fn cmd_status(engine: &Engine, json: bool) -> error::Result<()> {
    let status = engine.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Data directory: {}", status.data_dir.display());
    println!("Model: {}", status.model);
    println!("Lexical chunks: {}", status.lexical_chunks);
    match (status.vector_dimension, &status.vector_metric) {
        (Some(dimension), Some(metric)) => println!(
            "Vector rows: {} (dimension {dimension}, metric {metric})",
            status.vector_rows
        ),
        _ => println!("Vector rows: 0 (not built)"),
    }
    match status.cached_embeddings {
        Some(count) => println!("Cached embeddings: {count}"),
        None => println!("Cached embeddings: unavailable"),
    }
    Ok(())
}

fn print_ranked(rank: usize, result: &RankedChunk) {
    let snippet: String = result
        .chunk
        .text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SNIPPET_CHARS)
        .collect();
    println!(
        "{rank:>2}. {:.4}  #{}  doc {} p.{}  {snippet}",
        result.score,
        result.chunk.id,
        result.chunk.document_id,
        result.chunk.page_number
    );
}
