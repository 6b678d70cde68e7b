//! # Reference Model Adapters
//!
//! Deterministic stand-ins for the two coupled models, used by the binary and
//! the scenario tests. Both are small closed-form models, so a coupled run is
//! reproducible to the last bit on any number of ranks.
//!
//! ## HydrographSurrogate
//!
//! A serial sequence predictor working in hours and feet, like the trained
//! network it replaces. Each prediction is a raised-cosine hydrograph
//!
//! ```text
//! h(t) = base + amplitude * (1 - cos(2π t / period)) / 2
//! ```
//!
//! blended with the latest observed boundary value when the other side feeds
//! one back. Only rank 0 runs it.
//!
//! ## ReservoirHydro
//!
//! A domain-decomposed linear reservoir: every boundary node relaxes toward
//! the imposed elevation with time scale τ, or fills with an imposed
//! per-unit-width flux. Nodes are dealt to ranks round-robin; node 0 is the
//! coupling gauge whose level is exported.

use crate::config::{BoundaryConfig, HydroConfig, SurrogateConfig};
use crate::model::{BoundarySeries, ModelAdapter, SeriesWindow, StepReport};
use crate::time_series::TimeSeriesBuffer;
use crate::{CouplingError, Quantity};
use std::f64::consts::TAU;
use tracing::debug;

/// Boundary input received from the other side.
#[derive(Clone, Debug)]
enum Observed {
    /// Two-point series (this model is driven)
    Series(BoundarySeries),
    /// Rolling feedback window (this model is driving)
    Window(Quantity, TimeSeriesBuffer),
}

impl Observed {
    fn quantity(&self) -> Quantity {
        match self {
            Observed::Series(series) => series.quantity,
            Observed::Window(quantity, _) => *quantity,
        }
    }

    /// Observed value at node `node` and time `t`, held after the last sample.
    fn value_at(&mut self, node: usize, t: f64) -> Result<f64, CouplingError> {
        match self {
            Observed::Series(series) => Ok(series.value_at(node, t)),
            Observed::Window(_, window) => {
                if t >= window.last_time() {
                    Ok(window.last_value())
                } else {
                    window.sample_at(t)
                }
            }
        }
    }

    fn from_window(quantity: Quantity, window: SeriesWindow) -> Result<Self, CouplingError> {
        let buffer = TimeSeriesBuffer::new(window.times, window.values, window.time)?;
        Ok(Observed::Window(quantity, buffer))
    }
}

/// Hourly hydrograph predictor in feet.
#[derive(Clone, Debug)]
pub struct HydrographSurrogate {
    config: SurrogateConfig,
    rank: usize,
    steps_taken: usize,
    /// Latest prediction in native units
    native_value: f64,
    observed: Option<Observed>,
}

impl HydrographSurrogate {
    pub fn new(config: SurrogateConfig, rank: usize) -> Self {
        let native_value = config.base_level;
        HydrographSurrogate {
            config,
            rank,
            steps_taken: 0,
            native_value,
            observed: None,
        }
    }

    /// Native-to-SI factor of the exported quantity.
    pub fn unit_factor(&self) -> f64 {
        match self.config.quantity {
            Quantity::Elevation => self.config.length_factor,
            Quantity::Flux => self.config.length_factor.powi(3),
        }
    }

    /// Hydrograph in native units at `hours`.
    pub fn hydrograph(&self, hours: f64) -> f64 {
        let phase = TAU * (hours - self.config.start_hours) / self.config.period_hours;
        self.config.base_level + self.config.amplitude * (1.0 - phase.cos()) / 2.0
    }

    fn clock_hours(&self) -> f64 {
        self.config.start_hours + self.steps_taken as f64 * self.config.dt_hours
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }
}

impl ModelAdapter for HydrographSurrogate {
    fn name(&self) -> &str {
        "surrogate"
    }

    fn quantity(&self) -> Quantity {
        self.config.quantity
    }

    fn native_dt(&self) -> f64 {
        self.config.dt_hours * self.config.time_factor
    }

    fn start_time(&self) -> f64 {
        self.config.start_hours * self.config.time_factor
    }

    fn final_time(&self) -> f64 {
        (self.config.start_hours + self.config.iterations as f64 * self.config.dt_hours)
            * self.config.time_factor
    }

    fn clock(&self) -> f64 {
        self.clock_hours() * self.config.time_factor
    }

    fn current_scalar(&self) -> f64 {
        self.native_value * self.unit_factor()
    }

    fn step(&mut self, n_substeps: usize) -> Result<StepReport, CouplingError> {
        let factor = self.unit_factor();
        for _ in 0..n_substeps {
            if self.steps_taken >= self.config.iterations {
                break;
            }
            self.steps_taken += 1;
            let hours = self.clock_hours();
            let mut value = self.hydrograph(hours);

            if let Some(observed) = self.observed.as_mut() {
                let observed_native = observed.value_at(0, hours * self.config.time_factor)? / factor;
                let w = self.config.feedback_weight;
                value = (1.0 - w) * value + w * observed_native;
            }
            self.native_value = value;
        }

        Ok(StepReport {
            clock: self.clock(),
            scalar: self.current_scalar(),
        })
    }

    fn is_finished(&self) -> bool {
        self.steps_taken >= self.config.iterations
    }

    fn runs_on_all_ranks(&self) -> bool {
        false
    }

    fn owns_coupled_boundary(&self) -> bool {
        self.rank == 0
    }

    fn boundary_node_values(&self) -> Vec<f64> {
        vec![self.current_scalar()]
    }

    fn apply_boundary(&mut self, series: &BoundarySeries) -> Result<(), CouplingError> {
        self.observed = Some(Observed::Series(series.clone()));
        Ok(())
    }

    fn feed_boundary(&mut self, quantity: Quantity, window: SeriesWindow) -> Result<(), CouplingError> {
        self.observed = Some(Observed::from_window(quantity, window)?);
        Ok(())
    }
}

/// Linear-reservoir hydro model over one boundary string.
#[derive(Clone, Debug)]
pub struct ReservoirHydro {
    config: HydroConfig,
    node_count: usize,
    rank: usize,
    /// Global indices of the nodes held by this rank
    nodes: Vec<usize>,
    levels: Vec<f64>,
    clock: f64,
    forcing: Option<Observed>,
}

impl ReservoirHydro {
    pub fn new(config: HydroConfig, boundary: &BoundaryConfig, rank: usize, size: usize) -> Self {
        let size = size.max(1);
        let nodes: Vec<usize> = (0..boundary.node_count).filter(|n| n % size == rank).collect();
        let levels = vec![config.initial_level_m; nodes.len()];
        let clock = config.start_seconds;
        debug!(
            "Rank {} holds {} of {} nodes on boundary '{}'",
            rank,
            nodes.len(),
            boundary.node_count,
            boundary.name
        );
        ReservoirHydro {
            config,
            node_count: boundary.node_count,
            rank,
            nodes,
            levels,
            clock,
            forcing: None,
        }
    }

    /// Open-boundary tide used before any series is imposed.
    pub fn tide(&self, t: f64) -> f64 {
        let period = self.config.tide_period_hours * 3600.0;
        self.config.initial_level_m + self.config.tide_amplitude_m * (TAU * t / period).sin()
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl ModelAdapter for ReservoirHydro {
    fn name(&self) -> &str {
        "hydro"
    }

    fn quantity(&self) -> Quantity {
        Quantity::Elevation
    }

    fn native_dt(&self) -> f64 {
        self.config.dt_seconds
    }

    fn start_time(&self) -> f64 {
        self.config.start_seconds
    }

    fn final_time(&self) -> f64 {
        self.config.final_seconds
    }

    fn clock(&self) -> f64 {
        self.clock
    }

    fn current_scalar(&self) -> f64 {
        self.levels
            .first()
            .copied()
            .unwrap_or(self.config.initial_level_m)
    }

    fn step(&mut self, n_substeps: usize) -> Result<StepReport, CouplingError> {
        for _ in 0..n_substeps {
            if self.clock >= self.config.final_seconds {
                break;
            }
            let t = (self.clock + self.config.dt_seconds).min(self.config.final_seconds);
            let h = t - self.clock;
            let relax = 1.0 - (-h / self.config.relaxation_seconds).exp();
            let tide = self.tide(t);

            for (level, &node) in self.levels.iter_mut().zip(&self.nodes) {
                match self.forcing.as_mut() {
                    Some(observed) if observed.quantity() == Quantity::Flux => {
                        let q = observed.value_at(node, t)?;
                        *level += q * h / self.config.basin_width_m;
                    }
                    Some(observed) => {
                        let target = observed.value_at(node, t)?;
                        *level += (target - *level) * relax;
                    }
                    None => *level += (tide - *level) * relax,
                }
            }
            self.clock = t;
        }

        Ok(StepReport {
            clock: self.clock,
            scalar: self.current_scalar(),
        })
    }

    fn is_finished(&self) -> bool {
        self.clock >= self.config.final_seconds
    }

    fn owns_coupled_boundary(&self) -> bool {
        self.nodes.first() == Some(&0)
    }

    fn boundary_node_values(&self) -> Vec<f64> {
        self.levels.clone()
    }

    fn apply_boundary(&mut self, series: &BoundarySeries) -> Result<(), CouplingError> {
        if series.node_count() != self.node_count {
            return Err(CouplingError::LengthMismatch {
                times: self.node_count,
                values: series.node_count(),
            });
        }
        self.forcing = Some(Observed::Series(series.clone()));
        Ok(())
    }

    fn feed_boundary(&mut self, quantity: Quantity, window: SeriesWindow) -> Result<(), CouplingError> {
        // A fed-back window carries one value for the whole string
        let observed = Observed::from_window(quantity, window)?;
        self.forcing = Some(observed);
        Ok(())
    }
}
