use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::catalog::Category;

#[derive(Debug, Clone, Parser)]
#[command(name = "hymnal")]
#[command(about = "Browse a hymnal slide-deck archive and track how often each hymn is used")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Hymnal archive (zip container of `EN/001 Title.pptx` entries)
    #[arg(long, global = true, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Statistics JSON file
    #[arg(long, global = true, value_name = "FILE")]
    pub stats: Option<PathBuf>,

    /// Where launched presentations are extracted
    #[arg(long, global = true, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "N")]
    pub max_hymns: Option<u16>,

    /// Extracted presentations to keep (3-30)
    #[arg(long, global = true, value_name = "N")]
    pub recent_limit: Option<usize>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Query {
        input: String,

        /// Suggestion to fall back on when the input has no hymn number
        #[arg(long, value_name = "TEXT")]
        completion: Option<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    Resolve {
        number: String,

        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },
    Suggest {
        text: String,

        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },
    Catalog,
    Stats,
    Table {
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    Launch {
        input: String,

        #[arg(long, value_name = "TEXT")]
        completion: Option<String>,
    },
    Recent {
        #[arg(long)]
        prune: bool,

        /// With --prune, remove every extracted presentation
        #[arg(long)]
        all: bool,
    },
    Reset,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum CategoryArg {
    #[value(name = "EN", alias = "en")]
    En,
    #[value(name = "TL", alias = "tl")]
    Tl,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::En => Category::Primary,
            CategoryArg::Tl => Category::Secondary,
        }
    }
}
