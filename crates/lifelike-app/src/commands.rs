use crate::cli::{Cli, Command, MeasureArgs, QueryArgs, SourceArgs, SurveyArgs};
use crate::report::{ProgressPrinter, print_record, print_record_table, print_stats};
use anyhow::{Context, Result, bail};
use lifelike_core::{
    Bounds, Lattice, MeasurementRecord, RangeQuery, ResultStore, Rule, rule_id_to_notation,
    run_with_periodicity,
};
use lifelike_measure::{
    ComplexityCache, MeasureConfig, bdm_over_time, dimension_over_time, measure_lambda_detailed,
    measure_lambda_parallel, measure_rule,
};
use lifelike_storage::{ResultStorage, StoragePipeline};
use lifelike_survey::{
    CheckpointStore, JsonFileCheckpointStore, RuleSpace, StartMode, SurveyConfig, SurveyEngine,
    SurveyState, SurveyStats, write_csv,
};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use tracing::info;

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Survey(args) => survey(args),
        Command::Measure {
            rule,
            measure,
            json,
        } => measure_command(&rule, &measure, json),
        Command::Lambda {
            rule,
            measure,
            curve,
        } => lambda_command(&rule, &measure, curve),
        Command::Classify {
            rule,
            measure,
            json,
        } => classify_command(&rule, &measure, json),
        Command::Track { rule, measure, at } => track_command(&rule, &measure, &at),
        Command::Export { source, output } => export_command(&source, output.as_deref()),
        Command::Query(args) => query_command(&args),
        Command::Stats { source, json } => stats_command(&source, json),
        Command::Notation { value } => notation_command(&value),
    }
}

impl MeasureArgs {
    fn apply(&self, config: &mut MeasureConfig) {
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(cols) = self.cols {
            config.cols = cols;
        }
        if let Some(boundary) = self.boundary {
            config.boundary = boundary;
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if let Some(steps) = self.classification_steps {
            config.classification_steps = steps;
        }
        if let Some(window) = self.hash_window {
            config.hash_window = window;
        }
        if let Some(density) = self.density {
            config.density = density;
        }
        if let Some(trials) = self.lambda_trials {
            config.lambda_trials = trials;
        }
        if let Some(seed) = self.seed {
            config.base_seed = seed;
        }
    }

    fn config(&self) -> Result<MeasureConfig> {
        let mut config = MeasureConfig::default();
        self.apply(&mut config);
        config.validate().context("invalid measurement settings")?;
        Ok(config)
    }
}

/// Accepts a rule id, a known rule name, or B/S notation.
fn parse_rule(value: &str) -> Result<Rule> {
    let value = value.trim();
    if let Ok(id) = value.parse::<u32>() {
        return Rule::from_id(id).with_context(|| format!("invalid rule id `{value}`"));
    }
    Rule::lookup(value).with_context(|| format!("unrecognised rule `{value}`"))
}

fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path {} is not valid UTF-8", path.display()))
}

fn load_survey_config(path: &Path) -> Result<SurveyConfig> {
    let file = File::open(path)
        .with_context(|| format!("failed to open survey config {}", path.display()))?;
    serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("failed to parse survey config {}", path.display()))
}

fn survey(args: SurveyArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => load_survey_config(path)?,
        None => SurveyConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(batch) = args.batch_size {
        config.batch_size = batch;
    }
    if let Some(interval) = args.checkpoint_interval {
        config.checkpoint_interval = interval;
    }
    if args.start.is_some() || args.end.is_some() {
        config.rule_space = RuleSpace::new(
            args.start.unwrap_or(config.rule_space.start),
            args.end.unwrap_or(config.rule_space.end),
        );
    }
    if let Some(table) = &args.complexity_table {
        config.complexity_table = Some(table.clone());
    }
    args.measure.apply(&mut config.measure);

    let store = JsonFileCheckpointStore::new(&args.checkpoint);
    let engine = SurveyEngine::new(config, store).context("invalid survey configuration")?;
    let printer = ProgressPrinter::new(engine.handle(), args.stop_after, args.quiet);
    let mut engine = engine.with_observer(printer);
    if let Some(db) = &args.db {
        let pipeline = StoragePipeline::new(utf8_path(db)?)
            .with_context(|| format!("failed to open result database {}", db.display()))?;
        engine = engine.with_sink(pipeline);
    }

    let mode = if args.resume {
        StartMode::Resume
    } else {
        StartMode::Fresh
    };
    info!(?mode, checkpoint = %args.checkpoint.display(), "starting survey");
    let outcome = engine.run(mode).context("survey failed")?;

    let status = match outcome.state {
        SurveyState::Completed => "completed".green().bold().to_string(),
        other => other.as_str().yellow().bold().to_string(),
    };
    println!(
        "{status} {} rules this run in {:.1}s; {}",
        outcome.completed_this_run,
        outcome.elapsed.as_secs_f64(),
        outcome.progress
    );
    for failure in &outcome.failures {
        println!(
            "  {} rule {}: {}",
            "pending".yellow(),
            failure.rule_id,
            failure.message
        );
    }

    if let Some(path) = &args.csv {
        let mut records = engine.session().results().to_vec();
        records.sort_by_key(|record| record.rule_id);
        write_csv_file(path, &records)?;
        println!("wrote {} rows to {}", records.len(), path.display());
    }
    Ok(())
}

fn measure_command(rule: &str, args: &MeasureArgs, json: bool) -> Result<()> {
    let rule = parse_rule(rule)?;
    let config = args.config()?;
    let mut cache = ComplexityCache::new();
    let record = measure_rule(rule.id(), &config, &mut cache)
        .with_context(|| format!("failed to measure {rule}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}

fn lambda_command(rule: &str, args: &MeasureArgs, curve: bool) -> Result<()> {
    let rule = parse_rule(rule)?;
    let config = args.config()?;
    let seed = MeasureConfig::lambda_seed(config.rule_seed(rule.id()));
    let result = measure_lambda_parallel(&rule, &config, seed)?;
    println!(
        "{} {} lambda {:.6} ± {:.6}",
        "rule".bold().cyan(),
        rule,
        result.lambda,
        result.std_dev
    );
    for trial in &result.trials {
        println!(
            "  seed {:<12} lambda {:>10.6}  distance {} -> {}",
            trial.seed, trial.lambda, trial.initial_distance, trial.final_distance
        );
    }
    if curve {
        let detail = measure_lambda_detailed(&rule, &config, seed)?;
        let distances: Vec<String> = detail.distances.iter().map(ToString::to_string).collect();
        println!("{} {}", "curve".dimmed(), distances.join(","));
    }
    Ok(())
}

#[derive(Serialize)]
struct Classified {
    rule_id: u32,
    rule_string: String,
    classification: String,
    period: Option<u32>,
    generations: u32,
    population: usize,
}

fn classify_command(rule: &str, args: &MeasureArgs, json: bool) -> Result<()> {
    let rule = parse_rule(rule)?;
    let config = args.config()?;
    let lattice = Lattice::random(
        config.rows,
        config.cols,
        config.boundary,
        config.density,
        config.rule_seed(rule.id()),
    )?;
    let report = run_with_periodicity(
        &lattice,
        &rule,
        config.classification_steps,
        config.hash_window,
    );
    let classified = Classified {
        rule_id: rule.id(),
        rule_string: rule.to_string(),
        classification: report.classification.as_str().to_string(),
        period: report.period,
        generations: report.generations,
        population: report.lattice.population(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&classified)?);
        return Ok(());
    }
    let period = classified
        .period
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    println!(
        "{} {} is {} (period {}, {} generations, population {})",
        "rule".bold().cyan(),
        classified.rule_string.bold(),
        classified.classification.green(),
        period,
        classified.generations,
        classified.population
    );
    Ok(())
}

fn track_command(rule: &str, args: &MeasureArgs, at: &[u32]) -> Result<()> {
    let rule = parse_rule(rule)?;
    let config = args.config()?;
    let lattice = Lattice::random(
        config.rows,
        config.cols,
        config.boundary,
        config.density,
        config.rule_seed(rule.id()),
    )?;
    let mut cache = ComplexityCache::new();
    let dimensions = dimension_over_time(&lattice, &rule, at);
    let bdms = bdm_over_time(&lattice, &rule, at, &mut cache);

    println!(
        "{:>10} {:>10} {:>8} {:>12} {:>8}",
        "GEN".bold().cyan(),
        "D".bold().cyan(),
        "R²".bold().cyan(),
        "BDM".bold().cyan(),
        "BLOCKS".bold().cyan()
    );
    for ((generation, dimension), (_, bdm)) in dimensions.iter().zip(&bdms) {
        println!(
            "{:>10} {:>10.4} {:>8.4} {:>12.2} {:>8}",
            generation, dimension.dimension, dimension.r_squared, bdm.bdm, bdm.unique_blocks
        );
    }
    Ok(())
}

/// Records from a DuckDB database or a checkpoint, sorted by rule id.
fn load_records(source: &SourceArgs) -> Result<Vec<MeasurementRecord>> {
    if let Some(db) = &source.db {
        let storage = ResultStorage::open(utf8_path(db)?)
            .with_context(|| format!("failed to open result database {}", db.display()))?;
        return storage
            .query(&RangeQuery::default())
            .context("failed to read results");
    }

    let store = JsonFileCheckpointStore::new(&source.checkpoint);
    let Some(checkpoint) = store
        .load()
        .with_context(|| format!("failed to read checkpoint {}", source.checkpoint.display()))?
    else {
        bail!("no checkpoint found at {}", source.checkpoint.display());
    };
    let mut records = checkpoint.results;
    records.sort_by_key(|record| record.rule_id);
    records.dedup_by_key(|record| record.rule_id);
    Ok(records)
}

fn write_csv_file(path: &Path, records: &[MeasurementRecord]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_csv(BufWriter::new(file), records)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn export_command(source: &SourceArgs, output: Option<&Path>) -> Result<()> {
    let records = load_records(source)?;
    match output {
        Some(path) => {
            write_csv_file(path, &records)?;
            eprintln!("wrote {} rows to {}", records.len(), path.display());
        }
        None => write_csv(io::stdout().lock(), &records).context("failed to write CSV")?,
    }
    Ok(())
}

fn query_command(args: &QueryArgs) -> Result<()> {
    let storage = ResultStorage::open(utf8_path(&args.db)?)
        .with_context(|| format!("failed to open result database {}", args.db.display()))?;
    let query = RangeQuery {
        lambda: Bounds::new(args.lambda_min, args.lambda_max),
        dimension: Bounds::new(args.dimension_min, args.dimension_max),
        gamma: Bounds::new(args.gamma_min, args.gamma_max),
        classifications: args.classifications.clone(),
        limit: args.limit,
    };
    let records = storage.query(&query).context("query failed")?;
    if args.csv {
        write_csv(io::stdout().lock(), &records).context("failed to write CSV")?;
    } else {
        print_record_table(&records);
    }
    Ok(())
}

fn stats_command(source: &SourceArgs, json: bool) -> Result<()> {
    let records = load_records(source)?;
    let Some(stats) = SurveyStats::from_records(&records) else {
        bail!("no survey results to summarise");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

fn notation_command(value: &str) -> Result<()> {
    let value = value.trim();
    if let Ok(id) = value.parse::<u32>() {
        let notation =
            rule_id_to_notation(id).with_context(|| format!("invalid rule id `{value}`"))?;
        println!("{id} {notation}");
        return Ok(());
    }
    let rule = parse_rule(value)?;
    println!("{} {rule}", rule.id());
    Ok(())
}
