//! erp-melt: Flatten paginated ERP object pages into relational tables
//!
//! Usage:
//!   # Pages from files, tables streamed to stdout
//!   erp-melt --config config.json page1.json page2.json
//!
//!   # Newline-delimited pages from stdin, one file per table
//!   cat pages.jsonl | erp-melt --config config.json --output-dir ./tables
//!
//!   # Keep column order stable across runs
//!   erp-melt --config config.json --state state.json -o ./tables pages.jsonl
//!
//!   # Show the filter conditions the page fetcher should use
//!   erp-melt --config config.json --print-conditions

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use erpmelt::{page_records, Extraction, Parameters, RunState, StreamWriter, TableFileWriter};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "erp-melt")]
#[command(about = "Flatten nested ERP object pages into relational tables", long_about = None)]
struct Args {
    /// Job configuration (JSON, with or without a "parameters" wrapper)
    #[arg(long, short = 'c', value_name = "FILE")]
    config: PathBuf,

    /// Page files: a JSON array per file, or one array per line (stdin if omitted)
    #[arg(value_name = "PAGES")]
    inputs: Vec<PathBuf>,

    /// Output directory for one .jsonl file and manifest per table.
    /// If omitted, writes every row to stdout tagged with its table
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// State file holding the previous run's columns; updated after the run
    #[arg(long, short = 's')]
    state: Option<PathBuf>,

    /// Override the configured field spec
    #[arg(long)]
    fields: Option<String>,

    /// Print the fetch conditions for the configured load and exit
    #[arg(long)]
    print_conditions: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut params = Parameters::from_path(&args.config)?;
    if let Some(fields) = args.fields {
        params.fields = Some(fields);
    }

    let state = match &args.state {
        Some(path) => RunState::load(path)?,
        None => RunState::default(),
    };

    let mut extraction = Extraction::resume(&params, &state)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;

    if args.print_conditions {
        println!("{}", extraction.fetch_conditions().unwrap_or_default());
        return Ok(());
    }

    tracing::info!(data_object = %params.data_object, "fetching data");

    if args.inputs.is_empty() {
        let pages = read_pages(Box::new(std::io::stdin()))?;
        for page in pages {
            extraction.process_page(page)?;
        }
    } else {
        for path in &args.inputs {
            let file = File::open(path)
                .with_context(|| format!("Failed to open page file: {}", path.display()))?;
            let pages = read_pages(Box::new(BufReader::new(file)))
                .with_context(|| format!("Failed to read pages from {}", path.display()))?;
            for page in pages {
                extraction.process_page(page)?;
            }
        }
    }

    let summary = if let Some(output_dir) = &args.output_dir {
        let mut writer = TableFileWriter::new(output_dir)?;
        let summary = extraction.finish_into(&mut writer)?;
        tracing::info!(
            files = writer.written().len(),
            dir = %output_dir.display(),
            "wrote tables"
        );
        summary
    } else {
        let stdout = std::io::stdout();
        let mut writer = StreamWriter::new(stdout.lock());
        extraction.finish_into(&mut writer)?
    };

    if let Some(path) = &args.state {
        summary.state.save(path)?;
    }

    tracing::info!(
        pages = summary.stats.pages,
        records = summary.stats.records,
        coerced = summary.stats.coerced_values,
        shadowed = summary.stats.shadowed_fields,
        "extraction finished"
    );

    Ok(())
}

/// Read every page from a reader using SIMD-accelerated JSON parsing when possible
fn read_pages(reader: Box<dyn Read>) -> Result<Vec<Vec<Value>>> {
    let mut content = Vec::new();
    let mut buf_reader = BufReader::new(reader);
    buf_reader.read_to_end(&mut content)?;
    parse_pages(content)
}

/// A whole document is one page; otherwise each non-blank line is a page
fn parse_pages(content: Vec<u8>) -> Result<Vec<Vec<Value>>> {
    // simd-json parses in place, keep the original bytes for the fallback
    let mut scratch = content.clone();
    if let Ok(page) = simd_json::serde::from_slice::<Value>(&mut scratch) {
        return Ok(vec![page_records(page)]);
    }

    // Fallback for newline-delimited pages
    let content_str = String::from_utf8_lossy(&content);
    let mut pages = Vec::new();
    for (idx, line) in content_str.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse page on line {}", idx + 1))?;
        pages.push(page_records(value));
    }

    Ok(pages)
}
