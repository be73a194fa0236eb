//! DuckDB-backed persistence for survey results.

#[cfg(target_os = "windows")]
#[link(name = "rstrtmgr")]
unsafe extern "system" {}

use duckdb::types::Value;
use duckdb::{Connection, Transaction, params, params_from_iter};
use lifelike_core::{
    Bounds, Classification, MeasurementRecord, RangeQuery, ResultSink, ResultStore, StoreError,
    validate_record,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use thiserror::Error;
use tracing::{debug, warn};

/// Records buffered by the pipeline before a write.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 256;

const RESULT_COLUMNS: &[&str] = &[
    "rule_id",
    "birth_mask",
    "survival_mask",
    "rule_string",
    "lambda",
    "lambda_std_dev",
    "dimension",
    "dimension_r_squared",
    "gamma",
    "bdm_initial",
    "bdm_final",
    "population_final",
    "period",
    "classification",
    "generations",
    "runtime_ms",
];

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored row for rule {rule_id} is invalid: {reason}")]
    InvalidRow { rule_id: i64, reason: String },
}

/// Row shape of the `results` table.
#[derive(Debug, Clone)]
struct ResultRow {
    rule_id: i64,
    birth_mask: i64,
    survival_mask: i64,
    rule_string: String,
    lambda: f64,
    lambda_std_dev: f64,
    dimension: f64,
    dimension_r_squared: f64,
    gamma: f64,
    bdm_initial: f64,
    bdm_final: f64,
    population_final: i64,
    period: Option<i64>,
    classification: String,
    generations: i64,
    runtime_ms: f64,
}

impl ResultRow {
    fn from_record(record: &MeasurementRecord) -> Self {
        Self {
            rule_id: i64::from(record.rule_id),
            birth_mask: i64::from(record.birth_mask),
            survival_mask: i64::from(record.survival_mask),
            rule_string: record.rule_string.clone(),
            lambda: record.lambda,
            lambda_std_dev: record.lambda_std_dev,
            dimension: record.dimension,
            dimension_r_squared: record.dimension_r_squared,
            gamma: record.gamma,
            bdm_initial: record.bdm_initial,
            bdm_final: record.bdm_final,
            population_final: i64::try_from(record.population_final).unwrap_or(i64::MAX),
            period: record.period.map(i64::from),
            classification: record.classification.as_str().to_string(),
            generations: i64::from(record.generations),
            runtime_ms: record.runtime_ms,
        }
    }

    fn read(row: &duckdb::Row<'_>) -> Result<Self, duckdb::Error> {
        Ok(Self {
            rule_id: row.get(0)?,
            birth_mask: row.get(1)?,
            survival_mask: row.get(2)?,
            rule_string: row.get(3)?,
            lambda: row.get(4)?,
            lambda_std_dev: row.get(5)?,
            dimension: row.get(6)?,
            dimension_r_squared: row.get(7)?,
            gamma: row.get(8)?,
            bdm_initial: row.get(9)?,
            bdm_final: row.get(10)?,
            population_final: row.get(11)?,
            period: row.get(12)?,
            classification: row.get(13)?,
            generations: row.get(14)?,
            runtime_ms: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<MeasurementRecord, StorageError> {
        let rule_id = self.rule_id;
        let invalid = |reason: String| StorageError::InvalidRow { rule_id, reason };
        let classification = self
            .classification
            .parse::<Classification>()
            .map_err(invalid)?;
        let narrow = |value: i64, field: &str| {
            u32::try_from(value).map_err(|_| invalid(format!("{field} {value} out of range")))
        };
        let mask = |value: i64, field: &str| {
            u16::try_from(value).map_err(|_| invalid(format!("{field} {value} out of range")))
        };
        Ok(MeasurementRecord {
            rule_id: narrow(self.rule_id, "rule_id")?,
            birth_mask: mask(self.birth_mask, "birth_mask")?,
            survival_mask: mask(self.survival_mask, "survival_mask")?,
            rule_string: self.rule_string,
            lambda: self.lambda,
            lambda_std_dev: self.lambda_std_dev,
            dimension: self.dimension,
            dimension_r_squared: self.dimension_r_squared,
            gamma: self.gamma,
            bdm_initial: self.bdm_initial,
            bdm_final: self.bdm_final,
            population_final: u64::try_from(self.population_final).unwrap_or(0),
            period: self.period.map(|p| narrow(p, "period")).transpose()?,
            classification,
            generations: narrow(self.generations, "generations")?,
            runtime_ms: self.runtime_ms,
        })
    }
}

/// Survey results stored in a DuckDB `results` table keyed by rule id.
pub struct ResultStorage {
    conn: Connection,
}

impl ResultStorage {
    /// Open or create a DuckDB database at the provided path.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// A private in-memory database; contents are lost on drop.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Self { conn };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), StorageError> {
        self.conn.execute(
            "create table if not exists results (
                rule_id bigint primary key,
                birth_mask bigint not null,
                survival_mask bigint not null,
                rule_string text not null,
                lambda double,
                lambda_std_dev double,
                dimension double,
                dimension_r_squared double,
                gamma double,
                bdm_initial double,
                bdm_final double,
                population_final bigint,
                period bigint,
                classification text not null,
                generations bigint,
                runtime_ms double
            )",
            [],
        )?;
        Ok(())
    }

    fn insert_sql() -> String {
        let placeholders = vec!["?"; RESULT_COLUMNS.len()].join(", ");
        format!(
            "insert or replace into results ({}) values ({placeholders})",
            RESULT_COLUMNS.join(", ")
        )
    }

    fn select_sql() -> String {
        format!("select {} from results", RESULT_COLUMNS.join(", "))
    }

    fn insert_rows(tx: &Transaction<'_>, rows: &[ResultRow]) -> Result<(), duckdb::Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut stmt = tx.prepare(&Self::insert_sql())?;
        for row in rows {
            stmt.execute(params![
                row.rule_id,
                row.birth_mask,
                row.survival_mask,
                row.rule_string,
                row.lambda,
                row.lambda_std_dev,
                row.dimension,
                row.dimension_r_squared,
                row.gamma,
                row.bdm_initial,
                row.bdm_final,
                row.population_final,
                row.period,
                row.classification,
                row.generations,
                row.runtime_ms,
            ])?;
        }
        Ok(())
    }

    /// Write one chunk in a single transaction. A rule repeated inside the
    /// chunk keeps its last record.
    fn write_chunk(&mut self, chunk: &[MeasurementRecord]) -> Result<(), StorageError> {
        chunk.iter().try_for_each(validate_record)?;
        let latest: BTreeMap<u32, &MeasurementRecord> =
            chunk.iter().map(|record| (record.rule_id, record)).collect();
        let rows: Vec<ResultRow> = latest.into_values().map(ResultRow::from_record).collect();

        let tx = self.conn.transaction()?;
        Self::insert_rows(&tx, &rows)?;
        tx.commit()?;
        Ok(())
    }

    fn select(&self, sql: &str, values: Vec<Value>) -> Result<Vec<MeasurementRecord>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut raw = Vec::new();
        while let Some(row) = rows.next()? {
            raw.push(ResultRow::read(row)?);
        }
        raw.into_iter().map(ResultRow::into_record).collect()
    }

    /// Run database maintenance to compact storage.
    pub fn optimize(&mut self) -> Result<(), StorageError> {
        self.conn.execute("PRAGMA optimize;", [])?;
        self.conn.execute("VACUUM;", [])?;
        Ok(())
    }
}

fn push_bounds(column: &str, bounds: &Bounds, clauses: &mut Vec<String>, values: &mut Vec<Value>) {
    if let Some(min) = bounds.min {
        clauses.push(format!("{column} >= ?"));
        values.push(Value::Double(min));
    }
    if let Some(max) = bounds.max {
        clauses.push(format!("{column} <= ?"));
        values.push(Value::Double(max));
    }
}

impl ResultStore for ResultStorage {
    type Error = StorageError;

    fn get(&self, rule_id: u32) -> Result<Option<MeasurementRecord>, StorageError> {
        let sql = format!("{} where rule_id = ?", Self::select_sql());
        let mut found = self.select(&sql, vec![Value::BigInt(i64::from(rule_id))])?;
        Ok(found.pop())
    }

    fn put(&mut self, record: &MeasurementRecord) -> Result<(), StorageError> {
        self.write_chunk(std::slice::from_ref(record))
    }

    fn bulk_put(
        &mut self,
        records: &[MeasurementRecord],
        batch_size: usize,
    ) -> Result<usize, StorageError> {
        if batch_size == 0 {
            return Err(StoreError::ZeroBatchSize.into());
        }
        let mut written = 0;
        for chunk in records.chunks(batch_size) {
            self.write_chunk(chunk)?;
            written += chunk.len();
        }
        debug!(written, batch_size, "stored survey results");
        Ok(written)
    }

    fn query(&self, query: &RangeQuery) -> Result<Vec<MeasurementRecord>, StorageError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        push_bounds("lambda", &query.lambda, &mut clauses, &mut values);
        push_bounds("dimension", &query.dimension, &mut clauses, &mut values);
        push_bounds("gamma", &query.gamma, &mut clauses, &mut values);
        if !query.classifications.is_empty() {
            let placeholders = vec!["?"; query.classifications.len()].join(", ");
            clauses.push(format!("classification in ({placeholders})"));
            values.extend(
                query
                    .classifications
                    .iter()
                    .map(|class| Value::Text(class.as_str().to_string())),
            );
        }

        let mut sql = Self::select_sql();
        if !clauses.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&clauses.join(" and "));
        }
        sql.push_str(" order by rule_id");
        if let Some(limit) = query.limit {
            sql.push_str(" limit ?");
            values.push(Value::BigInt(i64::try_from(limit).unwrap_or(i64::MAX)));
        }
        self.select(&sql, values)
    }

    fn count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn
            .query_row("select count(*) from results", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn contains(&self, rule_id: u32) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "select count(*) from results where rule_id = ?",
            params![i64::from(rule_id)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn surveyed_rule_ids(&self) -> Result<Vec<u32>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("select rule_id from results order by rule_id")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            ids.push(u32::try_from(id).map_err(|_| StorageError::InvalidRow {
                rule_id: id,
                reason: "rule id out of range".to_string(),
            })?);
        }
        Ok(ids)
    }

    fn delete(&mut self, rule_id: u32) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "delete from results where rule_id = ?",
            params![i64::from(rule_id)],
        )?;
        Ok(removed > 0)
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.conn.execute("delete from results", [])?;
        Ok(())
    }

    fn classification_counts(&self) -> Result<Vec<(Classification, usize)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("select classification, count(*) from results group by classification")?;
        let mut rows = stmt.query([])?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let class: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(class, usize::try_from(count).unwrap_or(0));
        }
        Ok(Classification::ALL
            .into_iter()
            .map(|class| (class, counts.get(class.as_str()).copied().unwrap_or(0)))
            .collect())
    }
}

impl ResultSink for ResultStorage {
    fn on_batch(&mut self, records: &[MeasurementRecord]) {
        if records.is_empty() {
            return;
        }
        if let Err(err) = self.bulk_put(records, records.len()) {
            warn!(error = %err, records = records.len(), "failed to store survey batch");
        }
    }
}

#[derive(Debug)]
enum StorageCommand {
    Persist(Vec<MeasurementRecord>),
    /// Write everything pending; report the outcome on the sender if present.
    Flush(Option<mpsc::Sender<Result<(), StorageError>>>),
    Shutdown,
}

/// Background writer: survey batches are queued on a channel and written to
/// DuckDB by a dedicated thread in chunks of `flush_threshold` records.
pub struct StoragePipeline {
    tx: mpsc::Sender<StorageCommand>,
    storage: Arc<Mutex<ResultStorage>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StoragePipeline {
    /// Create an asynchronous pipeline using the default flush threshold.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        Self::with_threshold(path, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(path: &str, flush_threshold: usize) -> Result<Self, StorageError> {
        let storage = ResultStorage::open(path)?;
        Self::from_storage(storage, flush_threshold)
    }

    pub fn from_storage(storage: ResultStorage, flush_threshold: usize) -> Result<Self, StorageError> {
        let threshold = flush_threshold.max(1);
        let shared = Arc::new(Mutex::new(storage));
        let (tx, rx) = mpsc::channel::<StorageCommand>();
        let worker_storage = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("lifelike-storage-worker".into())
            .spawn(move || {
                let mut pending: Vec<MeasurementRecord> = Vec::new();
                while let Ok(command) = rx.recv() {
                    match command {
                        StorageCommand::Persist(records) => {
                            pending.extend(records);
                            if pending.len() >= threshold
                                && let Err(err) =
                                    write_pending(&worker_storage, &mut pending, threshold)
                            {
                                warn!(
                                    error = %err,
                                    records = pending.len(),
                                    "failed to persist survey results; keeping them queued"
                                );
                            }
                        }
                        StorageCommand::Flush(ack) => {
                            let result = write_pending(&worker_storage, &mut pending, threshold);
                            match ack {
                                Some(ack) => {
                                    let _ = ack.send(result);
                                }
                                None => {
                                    if let Err(err) = result {
                                        warn!(
                                            error = %err,
                                            records = pending.len(),
                                            "failed to persist survey results; keeping them queued"
                                        );
                                    }
                                }
                            }
                        }
                        StorageCommand::Shutdown => {
                            if let Err(err) =
                                write_pending(&worker_storage, &mut pending, threshold)
                            {
                                warn!(
                                    error = %err,
                                    records = pending.len(),
                                    "survey results lost at shutdown"
                                );
                            }
                            break;
                        }
                    }
                }
            })
            .map_err(|err| {
                StorageError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;

        Ok(Self {
            tx,
            storage: shared,
            handle: Some(handle),
        })
    }

    /// Exposes shared access to the underlying storage for queries.
    #[must_use]
    pub fn storage(&self) -> Arc<Mutex<ResultStorage>> {
        Arc::clone(&self.storage)
    }

    /// Request a write of everything queued so far without waiting.
    pub fn flush(&self) {
        let _ = self.tx.send(StorageCommand::Flush(None));
    }

    /// Write everything queued so far and wait for the outcome. On error the
    /// queued records stay pending and the next flush retries them.
    pub fn sync(&self) -> Result<(), StorageError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(StorageCommand::Flush(Some(ack_tx)))
            .map_err(|_| StorageError::Worker("storage worker channel closed".into()))?;
        ack_rx
            .recv()
            .map_err(|_| StorageError::Worker("storage worker exited before flushing".into()))?
    }
}

fn write_pending(
    storage: &Mutex<ResultStorage>,
    pending: &mut Vec<MeasurementRecord>,
    batch_size: usize,
) -> Result<(), StorageError> {
    if pending.is_empty() {
        return Ok(());
    }
    let mut storage = storage.lock().unwrap_or_else(|poisoned| {
        warn!("storage mutex poisoned; continuing with inner value");
        PoisonError::into_inner(poisoned)
    });
    storage.bulk_put(pending, batch_size)?;
    pending.clear();
    Ok(())
}

impl ResultSink for StoragePipeline {
    fn on_batch(&mut self, records: &[MeasurementRecord]) {
        if records.is_empty() {
            return;
        }
        if self
            .tx
            .send(StorageCommand::Persist(records.to_vec()))
            .is_err()
        {
            warn!(records = records.len(), "storage worker channel closed; batch dropped");
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.sync() {
            warn!(error = %err, "failed to flush storage pipeline");
        }
    }
}

impl Drop for StoragePipeline {
    fn drop(&mut self) {
        let _ = self.tx.send(StorageCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(err) = handle.join()
        {
            warn!(?err, "storage worker thread panicked");
        }
    }
}
