//! # Boundary Exchange
//!
//! Turns the driving model's newest scalar into the driven model's boundary
//! condition, once per coupling iteration, and keeps the conservation
//! bookkeeping for the window between the last two exchanged samples.
//!
//! ## Exchange Pipeline
//!
//! 1. **Aggregate**: the caller has already max-reduced the scalar over ranks
//! 2. **Convert**: elevations pass through; fluxes are spread over the coupled
//!    boundary length to give a per-unit-width rate
//! 3. **Record**: shift the [`ExchangeRecord`] and recompute slope and area
//! 4. **Emit**: write the two-point series to a [`BoundarySink`] and return it
//!    so the scheduler can hand a copy to the driven model
//!
//! Once the driving model has finished, [`BoundaryExchange::hold`] replaces
//! the push: the last value is repeated and the series increment is widened
//! to a sentinel so the driven model treats the boundary as constant.
//!
//! ## Persisted Form
//!
//! [`SeriesFileSink`] writes the flat file the hydro model reads: one scalar
//! per line (`{:10.6}`), one block of per-node values per series entry. The
//! first write primes the whole series; later writes bracket the two time
//! stamps with two identical blocks.

use crate::model::BoundarySeries;
use crate::planner::SuperstepPlanner;
use crate::{CouplingError, Quantity};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Two newest samples of one coupled quantity and their derived terms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    quantity: Quantity,
    prev_value: f64,
    prev_time: f64,
    curr_value: f64,
    curr_time: f64,
    slope: f64,
    window_area: f64,
    node_count: usize,
    conserves_sign: bool,
}

impl ExchangeRecord {
    /// Record with a zeroed prior sample spanning `[prev_time, curr_time]`.
    pub fn zeroed(quantity: Quantity, node_count: usize, prev_time: f64, curr_time: f64) -> Self {
        ExchangeRecord {
            quantity,
            prev_value: 0.0,
            prev_time,
            curr_value: 0.0,
            curr_time,
            slope: 0.0,
            window_area: 0.0,
            node_count,
            conserves_sign: true,
        }
    }

    /// Shift the current sample to previous and store the new one.
    ///
    /// Slope and area are always recomputed together, and only after the new
    /// time has been checked to lie strictly after the current one.
    pub fn push_sample(&mut self, new_time: f64, new_value: f64) -> Result<(), CouplingError> {
        if new_time <= self.curr_time {
            return Err(CouplingError::NonMonotonicExchange {
                quantity: self.quantity,
                new_time,
                current_time: self.curr_time,
            });
        }

        self.prev_value = self.curr_value;
        self.prev_time = self.curr_time;
        self.curr_value = new_value;
        self.curr_time = new_time;

        let span = self.curr_time - self.prev_time;
        self.slope = (self.curr_value - self.prev_value) / span;
        self.window_area = 0.5 * (self.curr_value + self.prev_value) * span;
        Ok(())
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn prev_value(&self) -> f64 {
        self.prev_value
    }

    pub fn prev_time(&self) -> f64 {
        self.prev_time
    }

    pub fn curr_value(&self) -> f64 {
        self.curr_value
    }

    pub fn curr_time(&self) -> f64 {
        self.curr_time
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Volume per unit width carried over the last window.
    pub fn window_area(&self) -> f64 {
        self.window_area
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn conserves_sign(&self) -> bool {
        self.conserves_sign
    }
}

/// Non-fatal conditions found while exchanging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExchangeWarning {
    /// Inflow volume of this window is smaller than the previous one
    NegativeInflow {
        time: f64,
        volume: f64,
        previous_volume: f64,
    },
    /// A flux exchange imposes outflow on an inflow-only boundary
    OutflowImposed { time: f64, rate: f64 },
}

/// What one exchange produced.
#[derive(Clone, Debug)]
pub struct ExchangeOutcome {
    pub series: BoundarySeries,
    pub warnings: Vec<ExchangeWarning>,
    /// Volume carried by the window over the whole coupled boundary
    pub volume: f64,
}

/// Receives the boundary series written for the driven model.
pub trait BoundarySink {
    fn write_boundary_series(
        &mut self,
        quantity: Quantity,
        per_node_values: &[f64],
        time1: f64,
        time2: f64,
        time_increment: f64,
    ) -> Result<(), CouplingError>;
}

/// One write received by a [`MemorySink`].
#[derive(Clone, Debug, PartialEq)]
pub struct SinkWrite {
    pub quantity: Quantity,
    pub values: Vec<f64>,
    pub time1: f64,
    pub time2: f64,
    pub time_increment: f64,
}

/// Keeps every written series in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub writes: Vec<SinkWrite>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&SinkWrite> {
        self.writes.last()
    }
}

impl BoundarySink for MemorySink {
    fn write_boundary_series(
        &mut self,
        quantity: Quantity,
        per_node_values: &[f64],
        time1: f64,
        time2: f64,
        time_increment: f64,
    ) -> Result<(), CouplingError> {
        self.writes.push(SinkWrite {
            quantity,
            values: per_node_values.to_vec(),
            time1,
            time2,
            time_increment,
        });
        Ok(())
    }
}

/// Rewrites the hydro model's boundary file on every exchange.
#[derive(Debug)]
pub struct SeriesFileSink {
    path: PathBuf,
    series_length: usize,
    primed: bool,
}

impl SeriesFileSink {
    pub fn new<P: AsRef<Path>>(path: P, series_length: usize) -> Self {
        SeriesFileSink {
            path: path.as_ref().to_path_buf(),
            series_length: series_length.max(2),
            primed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BoundarySink for SeriesFileSink {
    fn write_boundary_series(
        &mut self,
        quantity: Quantity,
        per_node_values: &[f64],
        time1: f64,
        time2: f64,
        time_increment: f64,
    ) -> Result<(), CouplingError> {
        let blocks = if self.primed { 2 } else { self.series_length };

        let mut file = BufWriter::new(fs::File::create(&self.path)?);
        for _ in 0..blocks {
            for value in per_node_values {
                writeln!(file, "{:10.6}", value)?;
            }
        }
        file.flush()?;
        self.primed = true;

        debug!(
            "Wrote {} boundary series to {} ({} blocks, t1 = {}, t2 = {}, increment = {})",
            quantity,
            self.path.display(),
            blocks,
            time1,
            time2,
            time_increment
        );
        Ok(())
    }
}

/// Start of the boundary series before the first exchange.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BootstrapTimes {
    pub time1: f64,
    pub time2: f64,
    pub time_increment: f64,
}

impl BootstrapTimes {
    /// Initial series times for a driven model starting at `driven_start`.
    ///
    /// The series ends at the driven start and spans one bootstrap increment.
    /// A late driven start stretches the first window back to cover it.
    pub fn for_driven_start(planner: &SuperstepPlanner, driven_start: f64) -> Self {
        let increment = planner.bootstrap_increment(driven_start);
        let mut times = BootstrapTimes {
            time1: driven_start - increment,
            time2: driven_start,
            time_increment: increment,
        };
        if driven_start > 0.0 {
            times.time1 -= driven_start;
            times.time_increment += driven_start;
        }
        times
    }
}

/// Exchange state for one coupled quantity on the driven model's boundary.
#[derive(Clone, Debug)]
pub struct BoundaryExchange {
    record: ExchangeRecord,
    /// Total length of the coupled boundary (m)
    boundary_length: f64,
    prev_node_values: Vec<f64>,
    node_values: Vec<f64>,
    time_increment: f64,
    idle_increment_factor: f64,
    driven_final: f64,
    idle: bool,
}

impl BoundaryExchange {
    /// Set up the zero boundary series and write it to `sink`.
    pub fn initialize(
        quantity: Quantity,
        node_count: usize,
        boundary_length: f64,
        bootstrap: BootstrapTimes,
        driven_final: f64,
        sink: &mut dyn BoundarySink,
    ) -> Result<Self, CouplingError> {
        let exchange = BoundaryExchange {
            record: ExchangeRecord::zeroed(quantity, node_count, bootstrap.time1, bootstrap.time2),
            boundary_length,
            prev_node_values: vec![0.0; node_count],
            node_values: vec![0.0; node_count],
            time_increment: bootstrap.time_increment,
            idle_increment_factor: 10.0,
            driven_final,
            idle: false,
        };

        sink.write_boundary_series(
            quantity,
            &exchange.node_values,
            bootstrap.time1,
            bootstrap.time2,
            bootstrap.time_increment,
        )?;
        debug!(
            "Boundary series for {} initialised: t1 = {}, t2 = {}, increment = {}",
            quantity, bootstrap.time1, bootstrap.time2, bootstrap.time_increment
        );
        Ok(exchange)
    }

    pub fn with_idle_increment_factor(mut self, factor: f64) -> Self {
        self.idle_increment_factor = factor;
        self
    }

    /// Convert one driving-side value into the driven model's units.
    pub fn convert(&self, value: f64) -> f64 {
        match self.record.quantity {
            Quantity::Elevation => value,
            Quantity::Flux => value / self.boundary_length,
        }
    }

    /// Exchange a scalar, broadcast uniformly over the coupled nodes.
    pub fn push_sample(
        &mut self,
        new_time: f64,
        new_value: f64,
        sink: &mut dyn BoundarySink,
    ) -> Result<ExchangeOutcome, CouplingError> {
        let converted = self.convert(new_value);
        let nodes = vec![converted; self.record.node_count];
        self.exchange(new_time, converted, nodes, sink)
    }

    /// Exchange node-resolved values; the record tracks their mean.
    pub fn push_node_samples(
        &mut self,
        new_time: f64,
        node_values: &[f64],
        sink: &mut dyn BoundarySink,
    ) -> Result<ExchangeOutcome, CouplingError> {
        if node_values.len() != self.record.node_count {
            return Err(CouplingError::LengthMismatch {
                times: self.record.node_count,
                values: node_values.len(),
            });
        }
        if node_values.is_empty() {
            return Err(CouplingError::EmptyBoundary(self.record.quantity));
        }
        let nodes: Vec<f64> = node_values.iter().map(|&v| self.convert(v)).collect();
        let mean = nodes.iter().sum::<f64>() / nodes.len() as f64;
        self.exchange(new_time, mean, nodes, sink)
    }

    fn exchange(
        &mut self,
        new_time: f64,
        converted: f64,
        nodes: Vec<f64>,
        sink: &mut dyn BoundarySink,
    ) -> Result<ExchangeOutcome, CouplingError> {
        let previous_volume = self.volume();
        self.record.push_sample(new_time, converted)?;
        self.prev_node_values = std::mem::replace(&mut self.node_values, nodes);
        self.time_increment = self.record.curr_time - self.record.prev_time;
        self.idle = false;

        let mut warnings = Vec::new();
        let volume = self.volume();
        if self.record.quantity == Quantity::Flux {
            self.record.conserves_sign = converted >= 0.0;
            if !self.record.conserves_sign {
                warn!(
                    "Flux exchange at t = {} imposes outflow ({} m²/s) on an inflow boundary",
                    new_time, converted
                );
                warnings.push(ExchangeWarning::OutflowImposed {
                    time: new_time,
                    rate: converted,
                });
            }
            if volume < previous_volume {
                warn!(
                    "Inflow volume decreased at t = {}: {} m³ after {} m³",
                    new_time, volume, previous_volume
                );
                warnings.push(ExchangeWarning::NegativeInflow {
                    time: new_time,
                    volume,
                    previous_volume,
                });
            }
        }

        sink.write_boundary_series(
            self.record.quantity,
            &self.node_values,
            self.record.prev_time,
            self.record.curr_time,
            self.time_increment,
        )?;

        debug!(
            "Exchanged {} = {} at t = {} (slope = {}, area = {}, volume = {})",
            self.record.quantity,
            converted,
            new_time,
            self.record.slope,
            self.record.window_area,
            volume
        );

        Ok(ExchangeOutcome {
            series: self.series(),
            warnings,
            volume,
        })
    }

    /// Terminal mode: repeat the last value and widen the series increment.
    ///
    /// Repeated calls leave the record untouched; the increment only grows.
    pub fn hold(&mut self, sink: &mut dyn BoundarySink) -> Result<BoundarySeries, CouplingError> {
        let sentinel = self.idle_increment_factor * self.driven_final.abs();
        self.time_increment = self.time_increment.max(sentinel);
        if !self.idle {
            debug!(
                "Driving side finished; holding {} at {} with increment {}",
                self.record.quantity, self.record.curr_value, self.time_increment
            );
        }
        self.idle = true;

        let series = self.series();
        sink.write_boundary_series(
            self.record.quantity,
            &series.values2,
            series.time1,
            series.time2,
            series.time_increment,
        )?;
        Ok(series)
    }

    /// Copy of the boundary series the driven model should read now.
    pub fn series(&self) -> BoundarySeries {
        if self.idle {
            BoundarySeries {
                quantity: self.record.quantity,
                values1: self.node_values.clone(),
                values2: self.node_values.clone(),
                time1: self.record.curr_time,
                time2: self.record.curr_time + self.time_increment,
                time_increment: self.time_increment,
            }
        } else {
            BoundarySeries {
                quantity: self.record.quantity,
                values1: self.prev_node_values.clone(),
                values2: self.node_values.clone(),
                time1: self.record.prev_time,
                time2: self.record.curr_time,
                time_increment: self.time_increment,
            }
        }
    }

    /// Volume over the last window for the whole coupled boundary.
    pub fn volume(&self) -> f64 {
        self.record.window_area * self.boundary_length
    }

    pub fn record(&self) -> &ExchangeRecord {
        &self.record
    }

    pub fn time_increment(&self) -> f64 {
        self.time_increment
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub fn boundary_length(&self) -> f64 {
        self.boundary_length
    }
}
