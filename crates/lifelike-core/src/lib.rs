//! Core types shared across the lifelike workspace: lattices, rule encoding,
//! generation stepping and the result-record seams.

pub mod lattice;
pub mod record;
pub mod rule;
pub mod stepper;
pub mod store;

pub use lattice::{Boundary, Lattice, LatticeError, MAX_AGE};
pub use record::{LAMBDA_HEALED, MeasurementRecord};
pub use rule::{
    KNOWN_RULES, KnownRule, MASK_LIMIT, MAX_NEIGHBORS, RULE_COUNT, Rule, RuleError, known_rule,
    notation_to_rule_id, rule_id_to_notation,
};
pub use stepper::{
    Classification, ParallelRun, PeriodicityReport, run, run_parallel, run_with_periodicity, step,
    step_into,
};
pub use store::{
    Bounds, MemoryResultStore, NullSink, RangeQuery, ResultSink, ResultStore, StoreError,
    validate_record,
};
