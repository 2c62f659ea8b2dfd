//! Import result aggregation
//!
//! One [`ImportReport`] per import call, immutable after the call returns.
//! The serialized field names are part of the caller contract and must not
//! change.

use serde::Serialize;
use std::time::Duration;

use crate::import::strategy::ExecutionPhase;
use crate::security::FieldRejection;

/// Overall call outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// At least one row persisted
    Success,
    /// Nothing persisted, but only because rows were skipped or dropped
    Warning,
    /// Nothing persisted and nothing to explain it
    Error,
}

/// A rejected input record (excluded from persistence, never fatal)
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Zero-based index of the record in the input sequence
    pub row: usize,
    /// Name of the field that failed its check
    pub field: String,
    /// Identifier of the rule that fired
    pub rule: &'static str,
}

impl Rejection {
    /// Attach the input position to a field-level rejection
    pub fn at_row(row: usize, rejection: FieldRejection) -> Self {
        Self {
            row,
            field: rejection.field,
            rule: rejection.rule,
        }
    }
}

/// Throughput block of the report
#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    /// Wall-clock seconds for the whole call
    pub execution_time_seconds: f64,
    /// Persisted rows per second
    pub records_per_second: f64,
    /// The phase the strategy selector chose
    pub optimization_phase: ExecutionPhase,
}

/// Aggregate outcome of one import call
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Overall outcome
    pub status: ImportStatus,
    /// Destination table
    pub table: String,
    /// Rows seen in the input
    pub total_rows: usize,
    /// Rows persisted (inserted + updated)
    pub processed_rows: usize,
    /// Rows excluded (rejected by validation or dropped on id routing)
    pub skipped_rows: usize,
    /// Rows inserted
    pub inserted_rows: usize,
    /// Rows updated
    pub updated_rows: usize,
    /// Ids that were carried by input rows but matched nothing
    pub dropped_ids: Vec<String>,
    /// Validation rejections (field + rule, values withheld)
    pub rejections: Vec<Rejection>,
    /// Human-readable notes about skipped rows
    pub warnings: Vec<String>,
    /// Timing and phase
    pub performance: Performance,
}

impl ImportReport {
    /// Assemble the report; `processed + skipped == total` holds by
    /// construction because skipped is derived, not counted separately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: String,
        total_rows: usize,
        inserted_rows: usize,
        updated_rows: usize,
        dropped_ids: Vec<String>,
        rejections: Vec<Rejection>,
        warnings: Vec<String>,
        phase: ExecutionPhase,
        elapsed: Duration,
    ) -> Self {
        let processed_rows = inserted_rows + updated_rows;
        let skipped_rows = total_rows.saturating_sub(processed_rows);

        let status = if processed_rows > 0 {
            ImportStatus::Success
        } else if !dropped_ids.is_empty() || !rejections.is_empty() || !warnings.is_empty() {
            ImportStatus::Warning
        } else {
            ImportStatus::Error
        };

        let secs = elapsed.as_secs_f64();
        let records_per_second = if secs > 0.0 {
            (processed_rows as f64 / secs * 10.0).round() / 10.0
        } else {
            0.0
        };

        Self {
            status,
            table,
            total_rows,
            processed_rows,
            skipped_rows,
            inserted_rows,
            updated_rows,
            dropped_ids,
            rejections,
            warnings,
            performance: Performance {
                execution_time_seconds: (secs * 100.0).round() / 100.0,
                records_per_second,
                optimization_phase: phase,
            },
        }
    }
}
