//! # Model Adapter Interface
//!
//! The scheduler never reaches into either model. It talks to both through
//! [`ModelAdapter`], and hands them *copies* of exchanged data:
//!
//! - [`BoundarySeries`]: the two-point boundary series the driven model reads
//!   between coupling iterations
//! - [`SeriesWindow`]: the rolling window of fed-back values the driving model
//!   reads in two-way runs, already interpolated at its clock
//!
//! Adapters work in seconds and SI units at this interface; any conversion to
//! a model's native units (hours, feet, ...) happens inside the adapter.

use crate::{CouplingError, Quantity};
use serde::{Deserialize, Serialize};

/// Result of advancing a model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Model clock after the step (seconds)
    pub clock: f64,
    /// Latest value of the model's coupled quantity
    pub scalar: f64,
}

/// Two-point boundary series imposed on the driven model.
///
/// Values are linear in time between `time1` and `time2`. The driven model
/// expects the next series `time_increment` after `time1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundarySeries {
    pub quantity: Quantity,
    /// Per-node values at `time1`
    pub values1: Vec<f64>,
    /// Per-node values at `time2`
    pub values2: Vec<f64>,
    pub time1: f64,
    pub time2: f64,
    pub time_increment: f64,
}

impl BoundarySeries {
    /// Value of node `node` at time `t`, held constant outside `[time1, time2]`.
    pub fn value_at(&self, node: usize, t: f64) -> f64 {
        let (v1, v2) = (self.values1[node], self.values2[node]);
        if t <= self.time1 || self.time2 <= self.time1 {
            return if t <= self.time1 { v1 } else { v2 };
        }
        if t >= self.time2 {
            return v2;
        }
        v1 + (v2 - v1) * (t - self.time1) / (self.time2 - self.time1)
    }

    pub fn node_count(&self) -> usize {
        self.values2.len()
    }
}

/// Copy of a rolling feedback window, plus its value at the receiver's clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesWindow {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
    /// Clock of the receiving model when the window was sampled
    pub time: f64,
    /// Window interpolated at `time`
    pub value: f64,
}

/// Narrow interface to one of the coupled models.
pub trait ModelAdapter {
    fn name(&self) -> &str;

    /// Quantity this model exports to the other side.
    fn quantity(&self) -> Quantity;

    /// Native (effective) time step in seconds.
    fn native_dt(&self) -> f64;

    fn start_time(&self) -> f64;

    fn final_time(&self) -> f64;

    fn clock(&self) -> f64;

    /// Latest value of the exported quantity on this rank.
    fn current_scalar(&self) -> f64;

    /// Advance `n_substeps` native steps, stopping at the final time.
    fn step(&mut self, n_substeps: usize) -> Result<StepReport, CouplingError>;

    fn is_finished(&self) -> bool;

    /// Domain-decomposed models run on every rank; serial ones only on rank 0.
    fn runs_on_all_ranks(&self) -> bool {
        true
    }

    /// Whether this rank holds the exported scalar (the coupling gauge).
    fn owns_coupled_boundary(&self) -> bool {
        true
    }

    /// Values of the coupled boundary nodes held by this rank, for two-way
    /// aggregation. Ranks holding no nodes return an empty vector.
    fn boundary_node_values(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Impose the exchanged boundary series (this model is driven).
    fn apply_boundary(&mut self, series: &BoundarySeries) -> Result<(), CouplingError>;

    /// Receive fed-back boundary values (this model is driving, two-way runs).
    fn feed_boundary(&mut self, quantity: Quantity, window: SeriesWindow) -> Result<(), CouplingError>;
}
