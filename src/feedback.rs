//! # Two-way Feedback
//!
//! In two-way runs the driven model's boundary state flows back into the
//! driving model. Each iteration:
//!
//! 1. every rank reduces its share of the coupled boundary nodes (sum of the
//!    values, node count, and the extreme per-node changes)
//! 2. the change since the previous iteration is appended to a rolling
//!    [`TimeSeriesBuffer`] window
//! 3. the window is sampled at the driving clock and a copy is handed to the
//!    driving model as a [`SeriesWindow`]
//!
//! All ranks run the same four reductions on every call, whether or not they
//! hold boundary nodes.

use crate::collective::{ReduceOp, Reducer, MAX_SENTINEL, MIN_SENTINEL};
use crate::model::{ModelAdapter, SeriesWindow};
use crate::planner::SuperstepPlanner;
use crate::time_series::TimeSeriesBuffer;
use crate::{CouplingError, CouplingMode, Quantity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest window that keeps an interpolation bracket on both sides of
/// the driving clock.
pub const MIN_SERIES_LENGTH: usize = 4;

/// How the per-iteration boundary change is derived from the node values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPolicy {
    /// Change of the node average
    #[default]
    Average,
    /// Whichever extreme per-node change lies closer to zero
    NearestExtreme,
}

/// Boundary state reduced over all ranks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryAggregate {
    pub average: f64,
    pub node_count: usize,
    pub max_delta: f64,
    pub min_delta: f64,
}

impl BoundaryAggregate {
    /// Change since `previous` under `policy`.
    pub fn delta(&self, policy: FeedbackPolicy, previous: f64) -> f64 {
        match policy {
            FeedbackPolicy::Average => self.average - previous,
            FeedbackPolicy::NearestExtreme => {
                if self.max_delta.abs() <= self.min_delta.abs() {
                    self.max_delta
                } else {
                    self.min_delta
                }
            }
        }
    }
}

/// Reduce the local node values of every rank against the previous average.
pub fn aggregate_boundary(
    reducer: &dyn Reducer,
    quantity: Quantity,
    local_values: &[f64],
    previous: f64,
) -> Result<BoundaryAggregate, CouplingError> {
    let local_sum: f64 = local_values.iter().sum();
    let local_max = local_values
        .iter()
        .map(|v| v - previous)
        .fold(MAX_SENTINEL, f64::max);
    let local_min = local_values
        .iter()
        .map(|v| v - previous)
        .fold(MIN_SENTINEL, f64::min);

    let sum = reducer.reduce(local_sum, ReduceOp::Sum)?;
    let count = reducer.reduce(local_values.len() as f64, ReduceOp::Sum)?;
    let max_delta = reducer.reduce(local_max, ReduceOp::Max)?;
    let min_delta = reducer.reduce(local_min, ReduceOp::Min)?;

    if count < 1.0 {
        return Err(CouplingError::EmptyBoundary(quantity));
    }

    Ok(BoundaryAggregate {
        average: sum / count,
        node_count: count as usize,
        max_delta,
        min_delta,
    })
}

/// Rolling feedback window fed to the driving model.
#[derive(Clone, Debug)]
pub struct DepthFeedback {
    policy: FeedbackPolicy,
    quantity: Quantity,
    /// Place new samples one look-ahead past the driving clock
    lead: bool,
    previous_average: f64,
    last_delta: f64,
    window: TimeSeriesBuffer,
}

impl DepthFeedback {
    /// Build the window from the driven model's initial boundary state.
    ///
    /// The window holds `series_length` copies of the initial average, spaced
    /// by the planner's feedback span and ending at the driving clock (one
    /// span later when the surrogate runs first). Returns the first copy for
    /// the driving model.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        reducer: &dyn Reducer,
        driven: &dyn ModelAdapter,
        driven_active: bool,
        planner: &SuperstepPlanner,
        mode: CouplingMode,
        policy: FeedbackPolicy,
        series_length: usize,
        driving_clock: f64,
    ) -> Result<(Self, SeriesWindow), CouplingError> {
        if series_length < MIN_SERIES_LENGTH {
            return Err(CouplingError::WindowTooShort {
                len: series_length,
                min: MIN_SERIES_LENGTH,
            });
        }

        let quantity = driven.quantity();
        let local = local_nodes(driven, driven_active);
        let initial = aggregate_boundary(reducer, quantity, &local, 0.0)?;

        let lead = mode == CouplingMode::TwoWayDrivenFirst;
        let span = planner.feedback_span(driven.start_time());
        let end = if lead { driving_clock + span } else { driving_clock };
        let times: Vec<f64> = (0..series_length)
            .map(|i| end - (series_length - 1 - i) as f64 * span)
            .collect();
        let values = vec![initial.average; series_length];

        let mut feedback = DepthFeedback {
            policy,
            quantity,
            lead,
            previous_average: initial.average,
            last_delta: 0.0,
            window: TimeSeriesBuffer::new(times, values, driving_clock)?,
        };
        debug!(
            "Feedback window for {} initialised over {} nodes at {} (span {})",
            quantity, initial.node_count, initial.average, span
        );
        let snapshot = feedback.snapshot(driving_clock)?;
        Ok((feedback, snapshot))
    }

    /// Append this iteration's boundary change and sample at the driving clock.
    ///
    /// Once the driven model has finished, its boundary state is frozen: the
    /// window is extended with the last value until it covers the driving
    /// clock and no reductions are made.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        reducer: &dyn Reducer,
        driven: &dyn ModelAdapter,
        driven_active: bool,
        driven_finished: bool,
        planner: &SuperstepPlanner,
        driving_clock: f64,
        driven_clock: f64,
    ) -> Result<SeriesWindow, CouplingError> {
        if driven_finished {
            self.extend_to(driving_clock)?;
            return self.snapshot(driving_clock);
        }

        let local = local_nodes(driven, driven_active);
        let aggregate = aggregate_boundary(reducer, self.quantity, &local, self.previous_average)?;
        let delta = aggregate.delta(self.policy, self.previous_average);
        self.previous_average = aggregate.average;
        self.last_delta = delta;

        let candidate = if self.lead {
            driving_clock + planner.lookahead(driving_clock, driven_clock)
        } else {
            driven_clock.max(driving_clock)
        };
        let last_time = self.window.last_time();
        let new_time = if candidate > last_time {
            candidate
        } else {
            last_time + planner.driving_dt
        };
        let new_value = self.window.last_value() + delta;
        self.window.shift_and_append(new_time, new_value)?;

        debug!(
            "Feedback {} = {} at t = {} (delta {})",
            self.quantity, new_value, new_time, delta
        );
        self.snapshot(driving_clock)
    }

    fn extend_to(&mut self, t: f64) -> Result<(), CouplingError> {
        let value = self.window.last_value();
        let spacing = self.window.last_spacing();
        while self.window.last_time() < t {
            let next = self.window.last_time() + spacing;
            self.window.shift_and_append(next, value)?;
        }
        Ok(())
    }

    fn snapshot(&mut self, t: f64) -> Result<SeriesWindow, CouplingError> {
        let value = self.window.sample_at(t)?;
        Ok(SeriesWindow {
            times: self.window.times().to_vec(),
            values: self.window.values().to_vec(),
            time: t,
            value,
        })
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn policy(&self) -> FeedbackPolicy {
        self.policy
    }

    pub fn previous_average(&self) -> f64 {
        self.previous_average
    }

    pub fn last_delta(&self) -> f64 {
        self.last_delta
    }

    pub fn window(&self) -> &TimeSeriesBuffer {
        &self.window
    }
}

fn local_nodes(driven: &dyn ModelAdapter, active: bool) -> Vec<f64> {
    if active {
        driven.boundary_node_values()
    } else {
        Vec::new()
    }
}
