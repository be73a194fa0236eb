//! CSV export and summary statistics over survey records.

use lifelike_core::{Classification, MeasurementRecord};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Header row, in record field order.
pub const CSV_COLUMNS: [&str; 15] = [
    "rule_id",
    "birth_mask",
    "survival_mask",
    "rule_string",
    "lambda",
    "D",
    "D_r_squared",
    "gamma",
    "bdm_initial",
    "bdm_final",
    "population_final",
    "period",
    "classification",
    "generations",
    "runtime_ms",
];

/// One CSV row, without the trailing newline.
#[must_use]
pub fn csv_row(record: &MeasurementRecord) -> String {
    let mut row = String::with_capacity(128);
    let period = record.period.map(|p| p.to_string()).unwrap_or_default();
    let _ = write!(
        row,
        "{},{},{},\"{}\",{:.6},{:.4},{:.4},{:.4},{:.2},{:.2},{},{},{},{},{:.1}",
        record.rule_id,
        record.birth_mask,
        record.survival_mask,
        record.rule_string,
        record.lambda,
        record.dimension,
        record.dimension_r_squared,
        record.gamma,
        record.bdm_initial,
        record.bdm_final,
        record.population_final,
        period,
        record.classification,
        record.generations,
        record.runtime_ms,
    );
    row
}

/// Write the header and one row per record.
pub fn write_csv<W: Write>(mut writer: W, records: &[MeasurementRecord]) -> io::Result<()> {
    writeln!(writer, "{}", CSV_COLUMNS.join(","))?;
    for record in records {
        writeln!(writer, "{}", csv_row(record))?;
    }
    writer.flush()
}

#[must_use]
pub fn to_csv_string(records: &[MeasurementRecord]) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_csv(&mut out, records);
    String::from_utf8_lossy(&out).into_owned()
}

/// Mean, population standard deviation and range of one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStats {
    /// `None` for an empty input.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let min = values.iter().copied().map(OrderedFloat).min()?.into_inner();
        let max = values.iter().copied().map(OrderedFloat).max()?.into_inner();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            min,
            max,
        })
    }
}

/// Summary over a set of survey records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyStats {
    pub count: usize,
    /// Lambda over records that did not heal; `None` if every one healed.
    pub lambda: Option<FieldStats>,
    pub healed: usize,
    pub dimension: FieldStats,
    pub gamma: FieldStats,
    pub classifications: Vec<(Classification, usize)>,
}

impl SurveyStats {
    /// `None` when there are no records.
    #[must_use]
    pub fn from_records(records: &[MeasurementRecord]) -> Option<Self> {
        let lambdas: Vec<f64> = records
            .iter()
            .filter(|r| !r.lambda_is_sentinel())
            .map(|r| r.lambda)
            .collect();
        let dimensions: Vec<f64> = records.iter().map(|r| r.dimension).collect();
        let gammas: Vec<f64> = records.iter().map(|r| r.gamma).collect();

        let classifications = Classification::ALL
            .into_iter()
            .map(|class| {
                let count = records.iter().filter(|r| r.classification == class).count();
                (class, count)
            })
            .collect();

        Some(Self {
            count: records.len(),
            lambda: FieldStats::from_values(&lambdas),
            healed: records.len() - lambdas.len(),
            dimension: FieldStats::from_values(&dimensions)?,
            gamma: FieldStats::from_values(&gammas)?,
            classifications,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelike_core::{LAMBDA_HEALED, Rule};

    fn sample(rule: Rule, lambda: f64, dimension: f64, class: Classification) -> MeasurementRecord {
        let mut record = MeasurementRecord::empty(rule);
        record.lambda = lambda;
        record.dimension = dimension;
        record.gamma = dimension * 10.0;
        record.classification = class;
        record
    }

    #[test]
    fn csv_rows_follow_column_order_and_precision() {
        let mut record = MeasurementRecord::empty(Rule::LIFE);
        record.lambda = 0.123_456_78;
        record.dimension = 1.5;
        record.dimension_r_squared = 0.999_99;
        record.gamma = -2.0;
        record.bdm_initial = 1234.567;
        record.bdm_final = 99.0;
        record.population_final = 42;
        record.period = Some(2);
        record.classification = Classification::Periodic;
        record.generations = 77;
        record.runtime_ms = 12.34;
        assert_eq!(
            csv_row(&record),
            "4108,8,12,\"B3/S23\",0.123457,1.5000,1.0000,-2.0000,1234.57,99.00,42,2,periodic,77,12.3"
        );

        record.period = None;
        assert!(csv_row(&record).contains(",42,,periodic,"));
    }

    #[test]
    fn csv_document_has_header_and_rows() {
        let records = vec![
            MeasurementRecord::empty(Rule::LIFE),
            MeasurementRecord::empty(Rule::SEEDS),
        ];
        let csv = to_csv_string(&records);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert!(lines[2].starts_with("2048,4,0,\"B2/S\","));
    }

    #[test]
    fn stats_exclude_healed_lambda() {
        let records = vec![
            sample(Rule::LIFE, 0.1, 1.5, Classification::Periodic),
            sample(Rule::SEEDS, 0.3, 1.9, Classification::Aperiodic),
            sample(Rule::MAZE, LAMBDA_HEALED, 1.0, Classification::Fixed),
        ];
        let stats = SurveyStats::from_records(&records).expect("stats");
        assert_eq!(stats.count, 3);
        assert_eq!(stats.healed, 1);
        let lambda = stats.lambda.expect("lambda stats");
        assert!((lambda.mean - 0.2).abs() < 1e-12);
        assert!((lambda.std_dev - 0.1).abs() < 1e-12);
        assert_eq!(lambda.min, 0.1);
        assert_eq!(lambda.max, 0.3);
        assert_eq!(stats.dimension.min, 1.0);
        assert_eq!(stats.dimension.max, 1.9);
        assert_eq!(
            stats.classifications,
            vec![
                (Classification::Extinct, 0),
                (Classification::Fixed, 1),
                (Classification::Periodic, 1),
                (Classification::Aperiodic, 1),
            ]
        );
    }

    #[test]
    fn empty_input_has_no_stats() {
        assert!(SurveyStats::from_records(&[]).is_none());
        let all_healed = vec![sample(Rule::LIFE, LAMBDA_HEALED, 0.0, Classification::Extinct)];
        let stats = SurveyStats::from_records(&all_healed).expect("stats");
        assert!(stats.lambda.is_none());
        assert_eq!(stats.healed, 1);
    }
}
