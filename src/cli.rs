use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agilereview: review comments kept as tags inside source files
#[derive(Parser, Debug, Clone)]
#[command(name = "agilereview", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: .agilereview.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Key field separator used inside tags
    #[arg(long, global = true)]
    pub separator: Option<char>,

    /// Directory holding comment files
    #[arg(long, global = true)]
    pub store_dir: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Scan a file, repair corrupted tags and list comment positions
    Scan {
        file: PathBuf,

        /// Print positions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Tag a line range with a new comment
    Add {
        file: PathBuf,

        /// First line of the range (1-based)
        #[arg(long)]
        start_line: usize,

        /// Last line of the range (1-based, default: start line)
        #[arg(long)]
        end_line: Option<usize>,

        /// Review the comment belongs to
        #[arg(long)]
        review: Option<String>,

        /// Author of the comment
        #[arg(long)]
        author: Option<String>,

        /// Comment text
        #[arg(long, default_value = "")]
        text: String,
    },
    /// Remove comments and their tags
    Remove {
        file: PathBuf,

        /// Comment keys, e.g. R1|bob|3
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print the covered span of one comment
    Locate { file: PathBuf, key: String },
    /// Move a file and carry its comments along
    Mv { from: PathBuf, to: PathBuf },
}
