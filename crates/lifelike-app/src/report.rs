//! Terminal output: survey progress lines and result tables.

use lifelike_core::MeasurementRecord;
use lifelike_survey::{
    FieldStats, RuleFailure, SurveyHandle, SurveyObserver, SurveyProgress, SurveyState,
    SurveyStats,
};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

const PROGRESS_EVERY: Duration = Duration::from_secs(1);

/// Prints throttled progress to stderr and requests a stop after `stop_after`
/// completed rules.
pub struct ProgressPrinter {
    handle: SurveyHandle,
    stop_after: Option<usize>,
    stop_requested: bool,
    quiet: bool,
    last_print: Option<Instant>,
}

impl ProgressPrinter {
    pub fn new(handle: SurveyHandle, stop_after: Option<usize>, quiet: bool) -> Self {
        Self {
            handle,
            stop_after,
            stop_requested: false,
            quiet,
            last_print: None,
        }
    }
}

impl SurveyObserver for ProgressPrinter {
    fn on_state(&mut self, state: SurveyState) {
        if !self.quiet {
            eprintln!("{} {}", "survey".bold().cyan(), state.as_str().bold());
        }
    }

    fn on_progress(&mut self, progress: &SurveyProgress) {
        if let Some(limit) = self.stop_after
            && !self.stop_requested
            && progress.completed >= limit
        {
            self.stop_requested = self.handle.stop();
        }
        if self.quiet {
            return;
        }
        let due = self
            .last_print
            .is_none_or(|at| at.elapsed() >= PROGRESS_EVERY);
        if due || progress.completed == progress.total {
            self.last_print = Some(Instant::now());
            eprintln!("  {progress}");
        }
    }

    fn on_error(&mut self, failure: &RuleFailure) {
        eprintln!(
            "{} rule {} on worker {}: {}",
            "failed".yellow().bold(),
            failure.rule_id,
            failure.worker,
            failure.message
        );
    }
}

pub fn print_record(record: &MeasurementRecord) {
    let period = record
        .period
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    println!(
        "{} {} (id {})",
        "rule".bold().cyan(),
        record.rule_string.bold(),
        record.rule_id
    );
    let rows = [
        ("classification", record.classification.to_string()),
        ("period", period),
        ("generations", record.generations.to_string()),
        ("population", record.population_final.to_string()),
        (
            "lambda",
            format!("{:.6} ± {:.6}", record.lambda, record.lambda_std_dev),
        ),
        (
            "dimension",
            format!("{:.4} (R² {:.4})", record.dimension, record.dimension_r_squared),
        ),
        ("gamma", format!("{:.4}", record.gamma)),
        (
            "bdm",
            format!("{:.2} -> {:.2}", record.bdm_initial, record.bdm_final),
        ),
        ("runtime", format!("{:.1} ms", record.runtime_ms)),
    ];
    for (label, value) in rows {
        println!("  {:<16} {}", label.dimmed(), value);
    }
}

pub fn print_record_table(records: &[MeasurementRecord]) {
    if records.is_empty() {
        println!("{}", "No matching rules".yellow());
        return;
    }
    println!(
        "{:<8} {:<22} {:>10} {:>8} {:>10} {:<10}",
        "ID".bold().cyan(),
        "RULE".bold().cyan(),
        "LAMBDA".bold().cyan(),
        "D".bold().cyan(),
        "GAMMA".bold().cyan(),
        "CLASS".bold().cyan()
    );
    println!("{}", "-".repeat(74).dimmed());
    for record in records {
        println!(
            "{:<8} {:<22} {:>10.4} {:>8.4} {:>10.4} {:<10}",
            record.rule_id,
            record.rule_string,
            record.lambda,
            record.dimension,
            record.gamma,
            record.classification.as_str()
        );
    }
    println!("{}", format!("{} rules", records.len()).dimmed());
}

fn print_field(label: &str, stats: Option<&FieldStats>) {
    match stats {
        Some(s) => println!(
            "  {:<12} mean {:>10.4}  std {:>10.4}  min {:>10.4}  max {:>10.4}",
            label.dimmed(),
            s.mean,
            s.std_dev,
            s.min,
            s.max
        ),
        None => println!("  {:<12} {}", label.dimmed(), "n/a".yellow()),
    }
}

pub fn print_stats(stats: &SurveyStats) {
    println!("{} {}", "rules".bold().cyan(), stats.count);
    print_field("lambda", stats.lambda.as_ref());
    println!("  {:<12} {}", "healed".dimmed(), stats.healed);
    print_field("dimension", Some(&stats.dimension));
    print_field("gamma", Some(&stats.gamma));
    for (class, count) in &stats.classifications {
        println!("  {:<12} {}", class.as_str().dimmed(), count);
    }
}
