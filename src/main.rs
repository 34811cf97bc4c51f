use campusrag::{
    Config,
    DataDir,
    RagPipeline,
    error,
    insight,
    pipeline::{self, IngestReport, PipelineStats, QueryResponse},
    vector_store::MetadataFilter,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

/// Sources ingested when none are named.
const DEFAULT_SOURCES: &[&str] = &["web", "forum"];

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CAMPUSRAG_LOG") {
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
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(collection) = &cli.collection {
        config.collection_name = collection.clone();
    }
    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Ingest(args) => {
            config.show_progress = !args.no_progress && !cli.quiet;
            let rag = RagPipeline::from_config(config, data_dir)?;
            let report = if let Some(file) = &args.file {
                rag.ingest_file(file, args.source.as_deref().unwrap_or("web"))?
            } else {
                let sources: Vec<String> = if args.sources.is_empty() {
                    DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()
                } else {
                    args.sources
                };
                rag.ingest(&sources)?
            };
            print_ingest_report(&report);
        }
        Command::Query(args) => {
            let rag = RagPipeline::from_config(config, data_dir)?;
            let filter = args
                .source
                .as_deref()
                .map(|s| MetadataFilter::new().equals("source", s));
            let response = rag.query_filtered(&args.question, args.count, filter.as_ref());

            if args.insights {
                let enhanced = insight::enhance(&response);
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&enhanced)?);
                } else {
                    print_response(&response);
                    print_insights(&enhanced);
                }
            } else if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::Stats(args) => {
            config.validate_store()?;
            let store = pipeline::store_from_config(&config, &data_dir)?;
            let stats = PipelineStats::from_config(&config, store.stats()?);
            if args.json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                print_stats(&data_dir, &stats);
            }
        }
        Command::Clear(args) => {
            config.validate_store()?;
            let store = pipeline::store_from_config(&config, &data_dir)?;
            if args.delete {
                store.delete_collection()?;
                println!("Deleted collection '{}'", store.collection_name());
            } else {
                store.clear()?;
                println!("Cleared collection '{}'", store.collection_name());
            }
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_ingest_report(report: &IngestReport) {
    println!(
        "Ingested {} records from {} file(s): {} chunks, {} stored",
        report.records, report.files, report.chunks, report.stored
    );
    if report.rejected > 0 {
        println!("  {} record(s) rejected without an id", report.rejected);
    }
    if report.skipped > 0 || report.failed > 0 {
        println!(
            "  {} skipped without an embedding, {} failed to store",
            report.skipped, report.failed
        );
    }
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer);
    if response.sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for (i, source) in response.sources.iter().enumerate() {
        print!("  {}. [{}] {} ({:.3})", i + 1, source.source, source.title, source.score);
        if source.url.is_empty() {
            println!();
        } else {
            println!(" {}", source.url);
        }
    }
}

fn print_insights(enhanced: &insight::EnhancedResponse) {
    println!("\nConfidence: {:.0}%", enhanced.confidence * 100.0);
    let sections = [
        ("Follow-up questions", &enhanced.follow_up_questions),
        ("Related topics", &enhanced.related_topics),
        ("Next steps", &enhanced.action_items),
    ];
    for (heading, items) in sections {
        if items.is_empty() {
            continue;
        }
        println!("\n{heading}:");
        for item in items {
            println!("  - {item}");
        }
    }
    for clarification in &enhanced.clarification_questions {
        println!("\n{}", clarification.question);
        println!("  options: {}", clarification.options.join(", "));
    }
}

fn print_stats(data_dir: &DataDir, stats: &PipelineStats) {
    let store = &stats.vector_store;
    println!("Data directory: {}", data_dir.root().display());
    println!("Backend: {}", store.backend);
    println!("Collection: {}", store.collection_name);
    println!("Documents: {}", store.total_documents);
    println!("Vector size: {} ({})", store.vector_size, store.distance);
    println!("Embedding model: {}", stats.embedding_model);
    println!("LLM: {}", stats.llm_model);
    println!("Reranker: {}", stats.reranker_model);
    println!("Chunking: {} chars, {} overlap", stats.chunk_size, stats.chunk_overlap);
}
