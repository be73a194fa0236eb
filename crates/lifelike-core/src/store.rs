//! Result-store and result-sink seams plus an in-memory store.

use crate::record::MeasurementRecord;
use crate::stepper::Classification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by the in-memory store and shared record validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record's rule id does not match its birth/survival masks.
    #[error("record for rule {rule_id} has masks B{birth_mask}/S{survival_mask} that encode a different id")]
    InconsistentRecord {
        rule_id: u32,
        birth_mask: u16,
        survival_mask: u16,
    },
    #[error("batch size must be non-zero")]
    ZeroBatchSize,
}

/// Reject records whose natural key disagrees with their masks.
pub fn validate_record(record: &MeasurementRecord) -> Result<(), StoreError> {
    let encoded = u32::from(record.birth_mask) * 512 + u32::from(record.survival_mask);
    if encoded != record.rule_id || record.birth_mask >= 512 || record.survival_mask >= 512 {
        return Err(StoreError::InconsistentRecord {
            rule_id: record.rule_id,
            birth_mask: record.birth_mask,
            survival_mask: record.survival_mask,
        });
    }
    Ok(())
}

/// Inclusive bounds on one numeric field. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    #[must_use]
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Range filters on lambda, dimension and gamma plus a classification set.
///
/// An empty classification list matches every class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub lambda: Bounds,
    pub dimension: Bounds,
    pub gamma: Bounds,
    pub classifications: Vec<Classification>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    #[must_use]
    pub fn matches(&self, record: &MeasurementRecord) -> bool {
        self.lambda.contains(record.lambda)
            && self.dimension.contains(record.dimension)
            && self.gamma.contains(record.gamma)
            && (self.classifications.is_empty()
                || self.classifications.contains(&record.classification))
    }
}

/// Keyed storage for measurement records. `rule_id` is the natural key; a
/// second `put` for the same rule replaces the first.
pub trait ResultStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(&self, rule_id: u32) -> Result<Option<MeasurementRecord>, Self::Error>;

    fn put(&mut self, record: &MeasurementRecord) -> Result<(), Self::Error>;

    /// Store many records, committing every `batch_size` records. Returns the
    /// number written.
    fn bulk_put(
        &mut self,
        records: &[MeasurementRecord],
        batch_size: usize,
    ) -> Result<usize, Self::Error>;

    /// Records matching `query`, ordered by rule id.
    fn query(&self, query: &RangeQuery) -> Result<Vec<MeasurementRecord>, Self::Error>;

    fn count(&self) -> Result<usize, Self::Error>;

    fn contains(&self, rule_id: u32) -> Result<bool, Self::Error> {
        Ok(self.get(rule_id)?.is_some())
    }

    /// Sorted ids of every stored rule.
    fn surveyed_rule_ids(&self) -> Result<Vec<u32>, Self::Error>;

    /// Remove one record; returns whether it existed.
    fn delete(&mut self, rule_id: u32) -> Result<bool, Self::Error>;

    fn clear(&mut self) -> Result<(), Self::Error>;

    /// Number of stored records per class, in [`Classification::ALL`] order.
    fn classification_counts(&self) -> Result<Vec<(Classification, usize)>, Self::Error>;
}

/// Receives completed survey batches as they arrive.
pub trait ResultSink: Send {
    fn on_batch(&mut self, records: &[MeasurementRecord]);

    /// Called once when the survey stops or completes.
    fn flush(&mut self) {}
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn on_batch(&mut self, _records: &[MeasurementRecord]) {}
}

/// Ordered in-memory result store.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    records: BTreeMap<u32, MeasurementRecord>,
}

impl MemoryResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementRecord> {
        self.records.values()
    }
}

impl ResultStore for MemoryResultStore {
    type Error = StoreError;

    fn get(&self, rule_id: u32) -> Result<Option<MeasurementRecord>, StoreError> {
        Ok(self.records.get(&rule_id).cloned())
    }

    fn put(&mut self, record: &MeasurementRecord) -> Result<(), StoreError> {
        validate_record(record)?;
        self.records.insert(record.rule_id, record.clone());
        Ok(())
    }

    fn bulk_put(
        &mut self,
        records: &[MeasurementRecord],
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        if batch_size == 0 {
            return Err(StoreError::ZeroBatchSize);
        }
        let mut written = 0;
        for chunk in records.chunks(batch_size) {
            chunk.iter().try_for_each(validate_record)?;
            for record in chunk {
                self.records.insert(record.rule_id, record.clone());
            }
            written += chunk.len();
        }
        Ok(written)
    }

    fn query(&self, query: &RangeQuery) -> Result<Vec<MeasurementRecord>, StoreError> {
        let matching = self.records.values().filter(|record| query.matches(record));
        Ok(match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        })
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    fn contains(&self, rule_id: u32) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(&rule_id))
    }

    fn surveyed_rule_ids(&self) -> Result<Vec<u32>, StoreError> {
        Ok(self.records.keys().copied().collect())
    }

    fn delete(&mut self, rule_id: u32) -> Result<bool, StoreError> {
        Ok(self.records.remove(&rule_id).is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }

    fn classification_counts(&self) -> Result<Vec<(Classification, usize)>, StoreError> {
        Ok(Classification::ALL
            .into_iter()
            .map(|class| {
                let count = self
                    .records
                    .values()
                    .filter(|record| record.classification == class)
                    .count();
                (class, count)
            })
            .collect())
    }
}

impl ResultSink for MemoryResultStore {
    fn on_batch(&mut self, records: &[MeasurementRecord]) {
        for record in records {
            self.records.insert(record.rule_id, record.clone());
        }
    }
}
