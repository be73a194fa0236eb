use clap::{Args, Parser, Subcommand};
use lifelike_core::{Boundary, Classification};
use std::path::PathBuf;

pub const DEFAULT_CHECKPOINT: &str = "lifelike-checkpoint.json";

#[derive(Parser, Debug)]
#[command(
    name = "lifelike",
    version,
    about = "Survey and measure the 262,144 Life-like cellular automata"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Measure every rule in a range, checkpointing as batches complete.
    Survey(SurveyArgs),
    /// Measure a single rule the way a survey worker does.
    Measure {
        /// Rule notation (B3/S23), rule id, or a known name such as `life`.
        rule: String,
        #[command(flatten)]
        measure: MeasureArgs,
        /// Emit the record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Damage-spreading exponent of one rule, trials run in parallel.
    Lambda {
        rule: String,
        #[command(flatten)]
        measure: MeasureArgs,
        /// Also print the per-generation Hamming curve of the first trial.
        #[arg(long)]
        curve: bool,
    },
    /// Run one rule to extinction, a cycle, or the step budget.
    Classify {
        rule: String,
        #[command(flatten)]
        measure: MeasureArgs,
        #[arg(long)]
        json: bool,
    },
    /// Sample dimension and BDM of one rule at chosen generations.
    Track {
        rule: String,
        #[command(flatten)]
        measure: MeasureArgs,
        /// Comma-separated generations to sample.
        #[arg(long, value_delimiter = ',', default_value = "0,10,100,1000")]
        at: Vec<u32>,
    },
    /// Write survey results as CSV.
    Export {
        #[command(flatten)]
        source: SourceArgs,
        /// Output file; standard output when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Filter stored results by measurement ranges.
    Query(QueryArgs),
    /// Summarise survey results.
    Stats {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        json: bool,
    },
    /// Convert between rule ids and B/S notation.
    Notation {
        /// A rule id, a notation, or a known rule name.
        value: String,
    },
}

#[derive(Args, Debug)]
pub struct SurveyArgs {
    /// JSON file holding a full or partial survey configuration.
    #[arg(long, env = "LIFELIKE_CONFIG")]
    pub config: Option<PathBuf>,
    #[arg(long, env = "LIFELIKE_CHECKPOINT", default_value = DEFAULT_CHECKPOINT)]
    pub checkpoint: PathBuf,
    /// Continue from the checkpoint instead of starting over.
    #[arg(long)]
    pub resume: bool,
    /// Also write results to this DuckDB database.
    #[arg(long, env = "LIFELIKE_DB")]
    pub db: Option<PathBuf>,
    /// Write the final results as CSV.
    #[arg(long)]
    pub csv: Option<PathBuf>,
    #[arg(long, env = "LIFELIKE_WORKERS")]
    pub workers: Option<usize>,
    #[arg(long, env = "LIFELIKE_BATCH_SIZE")]
    pub batch_size: Option<usize>,
    #[arg(long, env = "LIFELIKE_CHECKPOINT_INTERVAL")]
    pub checkpoint_interval: Option<usize>,
    /// First rule id (inclusive).
    #[arg(long)]
    pub start: Option<u32>,
    /// Last rule id (exclusive).
    #[arg(long)]
    pub end: Option<u32>,
    /// JSON complexity table loaded by every worker.
    #[arg(long, env = "LIFELIKE_COMPLEXITY_TABLE")]
    pub complexity_table: Option<PathBuf>,
    /// Stop once this many rules are complete; the checkpoint keeps the rest pending.
    #[arg(long)]
    pub stop_after: Option<usize>,
    /// Suppress progress lines.
    #[arg(short, long)]
    pub quiet: bool,
    #[command(flatten)]
    pub measure: MeasureArgs,
}

/// Overrides for individual measurement settings.
#[derive(Args, Debug, Default)]
pub struct MeasureArgs {
    #[arg(long, env = "LIFELIKE_ROWS")]
    pub rows: Option<usize>,
    #[arg(long, env = "LIFELIKE_COLS")]
    pub cols: Option<usize>,
    /// `wrap` or `fixed`.
    #[arg(long)]
    pub boundary: Option<Boundary>,
    #[arg(long, env = "LIFELIKE_STEPS")]
    pub steps: Option<u32>,
    #[arg(long, env = "LIFELIKE_CLASSIFICATION_STEPS")]
    pub classification_steps: Option<u32>,
    #[arg(long)]
    pub hash_window: Option<usize>,
    #[arg(long)]
    pub density: Option<f64>,
    #[arg(long)]
    pub lambda_trials: Option<u32>,
    #[arg(long, env = "LIFELIKE_SEED")]
    pub seed: Option<u64>,
}

/// Where to read records from: a checkpoint file or a DuckDB database.
#[derive(Args, Debug)]
pub struct SourceArgs {
    #[arg(long, conflicts_with = "db", default_value = DEFAULT_CHECKPOINT)]
    pub checkpoint: PathBuf,
    #[arg(long, env = "LIFELIKE_DB")]
    pub db: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[arg(long, env = "LIFELIKE_DB")]
    pub db: PathBuf,
    #[arg(long, allow_hyphen_values = true)]
    pub lambda_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub lambda_max: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub dimension_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub dimension_max: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub gamma_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub gamma_max: Option<f64>,
    /// Keep only these classes (repeatable or comma-separated).
    #[arg(long = "class", value_delimiter = ',')]
    pub classifications: Vec<Classification>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Print CSV instead of a table.
    #[arg(long)]
    pub csv: bool,
}
