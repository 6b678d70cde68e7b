//! # Run Report
//!
//! A JSON record of one coupled run, written when the run ends so that the
//! exchange history can be inspected or plotted later without re-running
//! the models.
//!
//! ## Contents
//! - **Identity**: coupling mode, boundary string, generation timestamp
//! - **Timings**: wall time spent in initialisation, the loop and finalisation
//! - **Statistics**: iterations, invocation counts per side, final clocks
//! - **History**: every exchanged sample (time, value, slope, area, volume)
//! - **Warnings**: every non-fatal exchange condition
//!
//! Reports are plain `serde_json`; loading one back gives an identical value.

use crate::exchange::ExchangeWarning;
use crate::scheduler::{ExchangeSample, RunSummary, SchedulerState};
use crate::{CouplingError, CouplingMode, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Wall-clock time of each phase, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub init_seconds: f64,
    pub run_seconds: f64,
    pub finalize_seconds: f64,
}

impl PhaseTimings {
    pub fn new(init: Duration, run: Duration, finalize: Duration) -> Self {
        PhaseTimings {
            init_seconds: init.as_secs_f64(),
            run_seconds: run.as_secs_f64(),
            finalize_seconds: finalize.as_secs_f64(),
        }
    }

    pub fn total_seconds(&self) -> f64 {
        self.init_seconds + self.run_seconds + self.finalize_seconds
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub mode: CouplingMode,
    pub driving_side: Side,
    /// 1-based boundary string id
    pub boundary: usize,
    pub boundary_name: String,
    pub state: SchedulerState,
    pub timings: PhaseTimings,
    pub iterations: usize,
    pub driving_invocations: usize,
    pub driven_invocations: usize,
    pub final_driving_clock: f64,
    pub final_driven_clock: f64,
    pub warnings: Vec<ExchangeWarning>,
    pub history: Vec<ExchangeSample>,
}

impl RunReport {
    pub fn new(
        summary: RunSummary,
        boundary: usize,
        boundary_name: impl Into<String>,
        timings: PhaseTimings,
        generated_at: DateTime<Utc>,
    ) -> Self {
        RunReport {
            generated_at,
            mode: summary.mode,
            driving_side: summary.driving_side,
            boundary,
            boundary_name: boundary_name.into(),
            state: summary.state,
            timings,
            iterations: summary.iterations,
            driving_invocations: summary.driving_invocations,
            driven_invocations: summary.driven_invocations,
            final_driving_clock: summary.final_driving_clock,
            final_driven_clock: summary.final_driven_clock,
            warnings: summary.warnings,
            history: summary.history,
        }
    }

    /// Total volume carried across the boundary over the run (m³ for flux).
    pub fn total_volume(&self) -> f64 {
        self.history.iter().map(|s| s.volume).sum()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CouplingError> {
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CouplingError> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    /// Test helper: a short two-exchange report
    fn sample_report() -> RunReport {
        let summary = RunSummary {
            mode: CouplingMode::DrivenByDriving,
            driving_side: Side::Surrogate,
            state: SchedulerState::BothFinished,
            iterations: 2,
            driving_invocations: 2,
            driven_invocations: 2,
            final_driving_clock: 7200.0,
            final_driven_clock: 7200.0,
            warnings: vec![ExchangeWarning::NegativeInflow {
                time: 7200.0,
                volume: 10.0,
                previous_volume: 12.0,
            }],
            history: vec![
                ExchangeSample {
                    iteration: 1,
                    time: 3600.0,
                    value: 1.0,
                    slope: 0.25,
                    area: 1800.0,
                    volume: 12.0,
                },
                ExchangeSample {
                    iteration: 2,
                    time: 7200.0,
                    value: 0.5,
                    slope: -0.125,
                    area: 2700.0,
                    volume: 10.0,
                },
            ],
        };
        let generated_at = Utc.with_ymd_and_hms(2025, 7, 24, 0, 0, 0).unwrap();
        RunReport::new(
            summary,
            1,
            "river inflow",
            PhaseTimings::new(
                Duration::from_millis(250),
                Duration::from_secs(3),
                Duration::from_millis(500),
            ),
            generated_at,
        )
    }

    #[test]
    fn test_report_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let report = sample_report();

        report.save(temp_file.path()).unwrap();
        let loaded = RunReport::load(temp_file.path()).unwrap();

        assert_eq!(loaded, report);
    }

    #[test]
    fn test_report_totals() {
        let report = sample_report();
        assert_eq!(report.total_volume(), 22.0);
        assert_eq!(report.timings.total_seconds(), 3.75);
    }

    #[test]
    fn test_load_corrupt_report() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), b"{ not json").unwrap();
        assert!(matches!(
            RunReport::load(temp_file.path()),
            Err(CouplingError::Report(_))
        ));
    }
}
