use anyhow::{Context, Result};
use clap::Parser;
use hymnal::catalog::{Catalog, HymnNumber, Missing, Totals};
use hymnal::cli::{Cli, Commands, OutputFormat};
use hymnal::config::{SUGGESTION_LIMIT, Settings};
use hymnal::equivalence::EquivalenceResolver;
use hymnal::query::HymnInfo;
use hymnal::recent::{list_recent, prune_oldest};
use hymnal::recorder::RecorderConfig;
use hymnal::report::{export_csv, summarize, write_csv};
use hymnal::session::Session;
use hymnal::stats::StatisticsStore;
use serde::Serialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.verbose);
    let settings = Settings::from_cli(&cli)?;
    settings.ensure_directories()?;

    match cli.command.clone() {
        Commands::Reset => {
            let stats = StatisticsStore::open(settings.stats_path.clone(), settings.max_hymns);
            stats.reset();
            print_json(&ResetOutput {
                stats_path: stats.path().to_string_lossy().to_string(),
                hymns: stats.max_hymns(),
                checksum: stats.checksum(),
                persisted: !stats.is_dirty(),
            })?;
        }
        Commands::Recent { prune, all } => {
            if prune {
                let report = prune_oldest(&settings.temp_dir, &settings.extension, settings.recent_limit, all)?;
                print_json(&report)?;
            } else {
                let files = list_recent(&settings.temp_dir, &settings.extension)?;
                print_json(&files)?;
            }
        }
        command => {
            let session = Session::open(settings)?;
            run_session_command(&session, command)?;
        }
    }

    Ok(())
}

fn parse_cli() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    Cli::parse_from(rewrite_args_for_implicit_query(args))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "hymnal=debug,info" } else { "hymnal=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Inserts `query` when the first positional argument is not a subcommand,
/// so `hymnal 001` and `hymnal "amazing"` work without typing it.
fn rewrite_args_for_implicit_query(mut args: Vec<String>) -> Vec<String> {
    if args.len() <= 1 {
        return args;
    }

    let subcommands = [
        "query", "resolve", "suggest", "catalog", "stats", "table", "launch", "recent", "reset", "help",
    ];
    let valued = ["--archive", "--stats", "--temp-dir", "--max-hymns", "--recent-limit"];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--" {
            idx += 1;
            break;
        }

        if valued.contains(&a) {
            idx += 2;
            continue;
        }

        if a.starts_with('-') {
            idx += 1;
            continue;
        }

        break;
    }

    if idx < args.len() {
        let token = args[idx].as_str();
        if !subcommands.contains(&token) {
            args.insert(idx, "query".to_string());
        }
    }

    args
}

fn run_session_command(session: &Session, command: Commands) -> Result<()> {
    let facade = session.facade();

    match command {
        Commands::Query {
            input,
            completion,
            format,
        } => {
            let completion = completion.or_else(|| default_completion(session, &input));
            let hymn = facade.query(&input, completion.as_deref());

            let recorded = match hymn.number {
                Some(number) if hymn.ready => {
                    let mut recorder = session.recorder(RecorderConfig::default());
                    recorder.submit(number);
                    recorder.shutdown_and_flush();
                    recorder.recorded_count() > 0
                }
                _ => false,
            };

            let hymn = match hymn.number {
                Some(number) if recorded => facade.info(number),
                _ => hymn,
            };
            let output = QueryOutput {
                suggestions: facade
                    .suggestions(&input, SUGGESTION_LIMIT)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                previous: hymn.number.and_then(|n| facade.step(Some(n), false)),
                next: hymn.number.and_then(|n| facade.step(Some(n), true)),
                hymn,
                recorded,
            };
            match format {
                OutputFormat::Json => print_json(&output)?,
                OutputFormat::Text => print!("{}", render_text(&output.hymn)),
            }
        }
        Commands::Resolve { number, category } => {
            let number: HymnNumber = number.parse()?;
            let resolution = EquivalenceResolver::new(session.catalog(), session.rule())
                .resolve(number, category.map(Into::into));
            print_json(&resolution)?;
        }
        Commands::Suggest { text, limit } => {
            let suggestions = facade.suggestions(&text, limit.unwrap_or(SUGGESTION_LIMIT));
            print_json(&SuggestOutput {
                count: suggestions.len(),
                suggestions,
                text,
            })?;
        }
        Commands::Catalog => {
            print_json(&CatalogOutput::new(session.catalog(), &session.settings().archive_path))?;
        }
        Commands::Stats => {
            let summary = summarize(session.catalog(), session.stats(), &session.settings().archive_path);
            print_json(&summary)?;
        }
        Commands::Table { output } => {
            let rows = facade.table();
            match output {
                Some(path) => {
                    export_csv(&rows, &path)?;
                    print_json(&TableOutput {
                        output: path.to_string_lossy().to_string(),
                        rows: rows.len(),
                    })?;
                }
                None => write_csv(&rows, std::io::stdout().lock())?,
            }
        }
        Commands::Launch { input, completion } => {
            let completion = completion.or_else(|| default_completion(session, &input));
            let outcome = session
                .launch(&input, completion.as_deref())
                .with_context(|| format!("Failed to launch {input:?}"))?;
            print_json(&outcome)?;
        }
        Commands::Recent { .. } | Commands::Reset => {}
    }

    Ok(())
}

/// First suggestion for the input, standing in for a UI completer.
fn default_completion(session: &Session, input: &str) -> Option<String> {
    session
        .facade()
        .suggestions(input, 1)
        .first()
        .map(|s| s.to_string())
}

fn render_text(hymn: &HymnInfo) -> String {
    if hymn.number.is_none() {
        return "no match\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!("{}\n", hymn.label()));
    if let (Some(n), Some(c)) = (hymn.equivalent_number, hymn.equivalent_category) {
        out.push_str(&format!("{c}: {n} {}\n", hymn.equivalent_title));
    }
    out.push_str(&format!("queries: {}, launches: {}\n", hymn.queries, hymn.launches));
    if !hymn.last_opened.is_empty() {
        out.push_str(&format!("{} ({})\n", hymn.last_opened, hymn.last_accessed_relative));
    }
    out.push_str(&format!("ready: {}\n", hymn.ready));
    out
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct QueryOutput {
    #[serde(flatten)]
    hymn: HymnInfo,
    recorded: bool,
    previous: Option<String>,
    next: Option<String>,
    suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SuggestOutput<'a> {
    text: String,
    count: usize,
    suggestions: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct CatalogOutput<'a> {
    archive: String,
    max_hymns: u16,
    totals: Totals,
    missing: &'a Missing,
    stray_files: &'a [String],
    unclassified: &'a [String],
    duplicates: &'a [String],
}

impl<'a> CatalogOutput<'a> {
    fn new(catalog: &'a Catalog, archive: &Path) -> Self {
        Self {
            archive: archive.to_string_lossy().to_string(),
            max_hymns: catalog.max_hymns(),
            totals: catalog.totals(),
            missing: catalog.missing(),
            stray_files: catalog.stray_files(),
            unclassified: catalog.unclassified(),
            duplicates: catalog.duplicates(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TableOutput {
    output: String,
    rows: usize,
}

#[derive(Debug, Serialize)]
struct ResetOutput {
    stats_path: String,
    hymns: u16,
    checksum: Option<String>,
    persisted: bool,
}
