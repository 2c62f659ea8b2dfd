//! Execution strategy selection
//!
//! Picks the write path for one import call before any row is written.
//! The choice is a pure function of the accepted row count and a cheap
//! destination probe, so identical inputs always reproduce the same phase
//! in tests and in logs.

use serde::Serialize;

use crate::config::ImportSettings;

/// The write path chosen for one import call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// One statement per record; simplicity over throughput for tiny inputs
    SingleRow,
    /// Multi-row parameterized statements in fixed-size batches
    Batched,
    /// COPY streaming, bypassing per-statement overhead entirely
    FullBulk,
}

impl ExecutionPhase {
    /// Stable label used in reports and logs
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionPhase::SingleRow => "single_row",
            ExecutionPhase::Batched => "batched",
            ExecutionPhase::FullBulk => "full_bulk",
        }
    }
}

/// Precomputed summary of the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationProbe {
    /// The destination holds no rows at all
    pub is_empty: bool,
    /// At least one incoming record id already exists in the destination
    pub has_candidate_keys: bool,
}

/// Choose the execution phase for an import call.
///
/// COPY cannot upsert, so the full-bulk path additionally requires that no
/// incoming id matches an existing row; large workloads that need updates
/// stay on the batched path.
pub fn select_phase(
    accepted_count: usize,
    probe: DestinationProbe,
    settings: &ImportSettings,
) -> ExecutionPhase {
    if accepted_count <= settings.single_row_max {
        ExecutionPhase::SingleRow
    } else if accepted_count >= settings.full_bulk_min && !probe.has_candidate_keys {
        ExecutionPhase::FullBulk
    } else {
        ExecutionPhase::Batched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ImportSettings {
        ImportSettings::default()
    }

    const EMPTY: DestinationProbe = DestinationProbe {
        is_empty: true,
        has_candidate_keys: false,
    };

    const POPULATED_WITH_MATCHES: DestinationProbe = DestinationProbe {
        is_empty: false,
        has_candidate_keys: true,
    };

    #[test]
    fn test_tiny_input_is_single_row() {
        assert_eq!(select_phase(2, EMPTY, &settings()), ExecutionPhase::SingleRow);
        assert_eq!(
            select_phase(10, EMPTY, &settings()),
            ExecutionPhase::SingleRow
        );
    }

    #[test]
    fn test_medium_input_is_batched() {
        assert_eq!(select_phase(11, EMPTY, &settings()), ExecutionPhase::Batched);
        assert_eq!(
            select_phase(10_000, EMPTY, &settings()),
            ExecutionPhase::Batched
        );
    }

    #[test]
    fn test_large_input_is_full_bulk() {
        assert_eq!(
            select_phase(20_000, EMPTY, &settings()),
            ExecutionPhase::FullBulk
        );
        assert_eq!(
            select_phase(100_000, EMPTY, &settings()),
            ExecutionPhase::FullBulk
        );
    }

    #[test]
    fn test_candidate_keys_force_batched() {
        // COPY cannot upsert: matching keys keep even huge workloads batched
        assert_eq!(
            select_phase(100_000, POPULATED_WITH_MATCHES, &settings()),
            ExecutionPhase::Batched
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        for count in [0, 1, 10, 11, 999, 20_000, 1_000_000] {
            for probe in [EMPTY, POPULATED_WITH_MATCHES] {
                let first = select_phase(count, probe, &settings());
                let second = select_phase(count, probe, &settings());
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_thresholds_come_from_settings() {
        let custom = ImportSettings {
            single_row_max: 2,
            full_bulk_min: 100,
            ..ImportSettings::default()
        };
        assert_eq!(select_phase(3, EMPTY, &custom), ExecutionPhase::Batched);
        assert_eq!(select_phase(100, EMPTY, &custom), ExecutionPhase::FullBulk);
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(ExecutionPhase::SingleRow.label(), "single_row");
        assert_eq!(ExecutionPhase::Batched.label(), "batched");
        assert_eq!(ExecutionPhase::FullBulk.label(), "full_bulk");
    }
}
