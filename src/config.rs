//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the coupler.toml file.
//! It collects the coupling tolerances, both models' clocks and units, the coupled
//! boundary strings and the output locations in one place.

use crate::feedback::{FeedbackPolicy, MIN_SERIES_LENGTH};
use crate::planner::TIME_TOL;
use crate::scheduler::{check_non_negative, check_positive, CouplingSettings};
use crate::{CouplingError, Quantity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default configuration file name
pub const CONFIG_FILE: &str = "coupler.toml";

/// Application configuration loaded from coupler.toml
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CouplerConfig {
    /// Coupling tolerances and feedback settings
    pub coupling: CouplingConfig,
    /// Sequence predictor clock and units
    pub surrogate: SurrogateConfig,
    /// Hydrodynamic model clock, forcing and boundary strings
    pub hydro: HydroConfig,
    /// Output file locations
    pub output: OutputConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CouplingConfig {
    /// Tolerance on time comparisons in seconds
    pub time_tolerance: f64,
    /// Samples kept in the rolling feedback window (at least 4)
    pub series_length: usize,
    /// Idle boundary increment as a multiple of the driven final time
    pub idle_increment_factor: f64,
    pub feedback_policy: FeedbackPolicy,
}

/// Sequence predictor configuration.
///
/// The predictor works in hours and feet; `time_factor` and `length_factor`
/// convert to seconds and meters at the coupling interface.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SurrogateConfig {
    pub dt_hours: f64,
    /// Seconds per native time unit
    pub time_factor: f64,
    /// Meters per native length unit (0.3048 for feet)
    pub length_factor: f64,
    /// Number of prediction steps in the run
    pub iterations: usize,
    pub start_hours: f64,
    /// Quantity the predictor exports
    pub quantity: Quantity,
    /// Base of the hydrograph in native units
    pub base_level: f64,
    /// Rise of the hydrograph peak above its base, native units
    pub amplitude: f64,
    pub period_hours: f64,
    /// Weight of observed boundary values blended into each prediction
    pub feedback_weight: f64,
}

/// Hydrodynamic model configuration (SI units).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HydroConfig {
    pub dt_seconds: f64,
    pub start_seconds: f64,
    pub final_seconds: f64,
    /// Time scale of the level relaxation toward an imposed elevation
    pub relaxation_seconds: f64,
    /// Basin width receiving an imposed per-unit-width flux
    pub basin_width_m: f64,
    pub initial_level_m: f64,
    /// Open-boundary tide used while no boundary series is imposed
    pub tide_amplitude_m: f64,
    pub tide_period_hours: f64,
    /// Candidate coupled boundary strings, selected by 1-based id
    pub boundaries: Vec<BoundaryConfig>,
}

/// One coupled boundary string of the hydro mesh.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BoundaryConfig {
    pub name: String,
    pub node_count: usize,
    /// Total length of the string in meters
    pub length_m: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Boundary file read by the hydro model
    pub boundary_file: String,
    /// JSON run report
    pub report_file: String,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        CouplingConfig {
            time_tolerance: TIME_TOL,
            series_length: MIN_SERIES_LENGTH,
            idle_increment_factor: 10.0,
            feedback_policy: FeedbackPolicy::Average,
        }
    }
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        SurrogateConfig {
            dt_hours: 1.0,
            time_factor: 3600.0,
            length_factor: 0.3048, // ft -> m
            iterations: 144,
            start_hours: 0.0,
            quantity: Quantity::Elevation,
            base_level: 2.0,
            amplitude: 6.0,
            period_hours: 48.0,
            feedback_weight: 0.25,
        }
    }
}

impl Default for HydroConfig {
    fn default() -> Self {
        HydroConfig {
            dt_seconds: 60.0,
            start_seconds: 0.0,
            final_seconds: 144.0 * 3600.0,
            relaxation_seconds: 1800.0,
            basin_width_m: 500.0,
            initial_level_m: 0.0,
            tide_amplitude_m: 0.5,
            tide_period_hours: 12.42, // M2
            boundaries: vec![
                BoundaryConfig {
                    name: "river inflow".to_string(),
                    node_count: 12,
                    length_m: 150.0,
                },
                BoundaryConfig {
                    name: "estuary mouth".to_string(),
                    node_count: 40,
                    length_m: 2400.0,
                },
            ],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            boundary_file: "fort.20".to_string(),
            report_file: "coupling-report.json".to_string(),
        }
    }
}

impl CouplerConfig {
    /// Load configuration from coupler.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<CouplerConfig>(&contents) {
                Ok(config) => {
                    info!(
                        "Loaded configuration from {} ({} boundary strings)",
                        path.as_ref().display(),
                        config.hydro.boundaries.len()
                    );
                    config
                }
                Err(e) => {
                    warn!("Invalid config file format: {}", e);
                    warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                info!(
                    "No config file found at {}, using default configuration",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }

    /// Save current configuration to coupler.toml
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to_path(CONFIG_FILE)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Boundary string by 1-based id.
    pub fn boundary(&self, id: usize) -> Result<&BoundaryConfig, CouplingError> {
        id.checked_sub(1)
            .and_then(|index| self.hydro.boundaries.get(index))
            .ok_or(CouplingError::UnknownBoundary {
                id,
                available: self.hydro.boundaries.len(),
            })
    }

    /// Reject values that would stall the planner or divide by zero.
    fn validate(&self, boundary: &BoundaryConfig) -> Result<(), CouplingError> {
        check_non_negative("time tolerance", self.coupling.time_tolerance)?;
        check_positive("idle increment factor", self.coupling.idle_increment_factor)?;

        let surrogate = &self.surrogate;
        check_positive("surrogate dt_hours", surrogate.dt_hours)?;
        check_positive("surrogate time_factor", surrogate.time_factor)?;
        check_positive("surrogate length_factor", surrogate.length_factor)?;
        check_positive("surrogate period_hours", surrogate.period_hours)?;

        let hydro = &self.hydro;
        check_positive("hydro dt_seconds", hydro.dt_seconds)?;
        check_non_negative("hydro start_seconds", hydro.start_seconds)?;
        check_positive("hydro final_seconds", hydro.final_seconds)?;
        check_positive("hydro relaxation_seconds", hydro.relaxation_seconds)?;
        check_positive("hydro basin_width_m", hydro.basin_width_m)?;
        check_positive("hydro tide_period_hours", hydro.tide_period_hours)?;

        check_positive("boundary length_m", boundary.length_m)?;
        check_positive("boundary node_count", boundary.node_count as f64)
    }

    /// Scheduler settings for the boundary string `boundary_id`.
    pub fn settings(&self, boundary_id: usize) -> Result<CouplingSettings, CouplingError> {
        if self.coupling.series_length < MIN_SERIES_LENGTH {
            return Err(CouplingError::WindowTooShort {
                len: self.coupling.series_length,
                min: MIN_SERIES_LENGTH,
            });
        }
        let boundary = self.boundary(boundary_id)?;
        self.validate(boundary)?;
        Ok(CouplingSettings {
            tolerance: self.coupling.time_tolerance,
            series_length: self.coupling.series_length,
            idle_increment_factor: self.coupling.idle_increment_factor,
            feedback_policy: self.coupling.feedback_policy,
            boundary_nodes: boundary.node_count,
            boundary_length: boundary.length_m,
        })
    }
}
