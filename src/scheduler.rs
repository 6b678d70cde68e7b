//! # Coupling Scheduler
//!
//! Runs the coupled loop for one [`CouplingMode`]. Per iteration:
//!
//! 1. **Drive**: plan a super-step, step the driving model, max-reduce its
//!    clock and exported scalar over all ranks
//! 2. **Exchange**: push the scalar into the [`BoundaryExchange`] and hand the
//!    resulting boundary series to the driven model (or, once the driving
//!    model has finished, hold the last value)
//! 3. **Follow**: step the driven model through the super-step, never past
//!    the driving clock (to its end once the driving model is done), and
//!    reduce its clock
//! 4. **Feed back** (two-way only): aggregate the driven boundary and feed the
//!    window to the driving model
//!
//! The loop ends only when both reduced clocks have reached their final
//! times. A clock that moves backwards, or a model that stops advancing
//! before its end, aborts the run with [`CouplingError::ClockInvariant`].
//!
//! ## State Machine
//!
//! ```text
//! Idle ──► DrivingRunning ──► Exchanging ──► DrivenRunning ──► Idle
//!  │                              ▲                             │
//!  └──── (driving finished) ──────┘            (both done) ──► BothFinished
//! ```

use crate::collective::{ReduceOp, Reducer, MAX_SENTINEL};
use crate::exchange::{BootstrapTimes, BoundaryExchange, BoundarySink, ExchangeOutcome, ExchangeWarning};
use crate::feedback::{DepthFeedback, FeedbackPolicy, MIN_SERIES_LENGTH};
use crate::model::ModelAdapter;
use crate::planner::{SuperstepPlanner, TIME_TOL};
use crate::{CouplingError, CouplingMode, Side};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tunables of one coupled run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CouplingSettings {
    pub tolerance: f64,
    pub series_length: usize,
    pub idle_increment_factor: f64,
    pub feedback_policy: FeedbackPolicy,
    /// Nodes on the coupled hydro boundary string
    pub boundary_nodes: usize,
    /// Length of the coupled hydro boundary string (m)
    pub boundary_length: f64,
}

impl Default for CouplingSettings {
    fn default() -> Self {
        CouplingSettings {
            tolerance: TIME_TOL,
            series_length: MIN_SERIES_LENGTH,
            idle_increment_factor: 10.0,
            feedback_policy: FeedbackPolicy::Average,
            boundary_nodes: 1,
            boundary_length: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    DrivingRunning,
    DrivenRunning,
    Exchanging,
    BothFinished,
}

/// Reduced clocks of both models and their time frames (seconds).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SuperstepState {
    pub mode: CouplingMode,
    pub driving_dt: f64,
    pub driven_dt: f64,
    pub driving_clock: f64,
    pub driven_clock: f64,
    pub driving_start: f64,
    pub driven_start: f64,
    pub driving_final: f64,
    pub driven_final: f64,
}

impl SuperstepState {
    pub fn driving_finished(&self, tolerance: f64) -> bool {
        self.driving_clock >= self.driving_final - tolerance
    }

    pub fn driven_finished(&self, tolerance: f64) -> bool {
        self.driven_clock >= self.driven_final - tolerance
    }

    pub fn both_finished(&self, tolerance: f64) -> bool {
        self.driving_finished(tolerance) && self.driven_finished(tolerance)
    }
}

/// One entry of the exchange history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSample {
    pub iteration: usize,
    pub time: f64,
    pub value: f64,
    pub slope: f64,
    pub area: f64,
    pub volume: f64,
}

/// Everything the scheduler owns between iterations.
#[derive(Clone, Debug)]
pub struct CouplingContext {
    pub clocks: SuperstepState,
    pub planner: SuperstepPlanner,
    pub exchange: BoundaryExchange,
    pub feedback: Option<DepthFeedback>,
    pub iterations: usize,
    pub driving_invocations: usize,
    pub driven_invocations: usize,
    pub warnings: Vec<ExchangeWarning>,
    pub history: Vec<ExchangeSample>,
    driving_idle: bool,
}

impl CouplingContext {
    fn record(&mut self, outcome: &ExchangeOutcome) {
        let record = self.exchange.record();
        self.history.push(ExchangeSample {
            iteration: self.iterations + 1,
            time: record.curr_time(),
            value: record.curr_value(),
            slope: record.slope(),
            area: record.window_area(),
            volume: outcome.volume,
        });
        self.warnings.extend(outcome.warnings.iter().cloned());
    }
}

/// Statistics of a finished (or interrupted) run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: CouplingMode,
    pub driving_side: Side,
    pub state: SchedulerState,
    pub iterations: usize,
    pub driving_invocations: usize,
    pub driven_invocations: usize,
    pub final_driving_clock: f64,
    pub final_driven_clock: f64,
    pub warnings: Vec<ExchangeWarning>,
    pub history: Vec<ExchangeSample>,
}

/// Owns both model adapters, the boundary sink and the coupling state of
/// one rank.
pub struct CouplingScheduler<R: Reducer> {
    mode: CouplingMode,
    settings: CouplingSettings,
    reducer: R,
    hydro: Box<dyn ModelAdapter>,
    surrogate: Box<dyn ModelAdapter>,
    sink: Box<dyn BoundarySink>,
    context: Option<CouplingContext>,
    state: SchedulerState,
}

impl<R: Reducer> CouplingScheduler<R> {
    pub fn new(
        mode: CouplingMode,
        settings: CouplingSettings,
        reducer: R,
        hydro: Box<dyn ModelAdapter>,
        surrogate: Box<dyn ModelAdapter>,
        sink: Box<dyn BoundarySink>,
    ) -> Self {
        CouplingScheduler {
            mode,
            settings,
            reducer,
            hydro,
            surrogate,
            sink,
            context: None,
            state: SchedulerState::Idle,
        }
    }

    /// Write the bootstrap boundary series and build the coupling context.
    ///
    /// Collective: every rank must call it. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<(), CouplingError> {
        if self.context.is_some() {
            return Ok(());
        }

        let is_root = self.reducer.is_root();
        let settings = self.settings;
        let (driving, driven) = split_sides(self.mode, self.hydro.as_mut(), self.surrogate.as_mut());
        let driving_active = driving.runs_on_all_ranks() || is_root;
        let driven_active = driven.runs_on_all_ranks() || is_root;

        check_non_negative("time tolerance", settings.tolerance)?;
        check_positive("boundary length", settings.boundary_length)?;
        check_positive("driving time step", driving.native_dt())?;
        check_positive("driven time step", driven.native_dt())?;

        let planner = SuperstepPlanner::new(driving.native_dt(), driven.native_dt())
            .with_tolerance(settings.tolerance)
            .with_driving_start(driving.start_time());
        let clocks = SuperstepState {
            mode: self.mode,
            driving_dt: driving.native_dt(),
            driven_dt: driven.native_dt(),
            driving_clock: driving.start_time(),
            driven_clock: driven.start_time(),
            driving_start: driving.start_time(),
            driven_start: driven.start_time(),
            driving_final: driving.final_time(),
            driven_final: driven.final_time(),
        };

        let node_count = match self.mode.driven_side() {
            Side::Hydro => settings.boundary_nodes,
            Side::Surrogate => 1,
        };
        let bootstrap = BootstrapTimes::for_driven_start(&planner, clocks.driven_start);
        let exchange = BoundaryExchange::initialize(
            driving.quantity(),
            node_count,
            settings.boundary_length,
            bootstrap,
            clocks.driven_final,
            self.sink.as_mut(),
        )?
        .with_idle_increment_factor(settings.idle_increment_factor);
        if driven_active {
            driven.apply_boundary(&exchange.series())?;
        }

        let feedback = if self.mode.is_two_way() {
            let (feedback, window) = DepthFeedback::initialize(
                &self.reducer,
                &*driven,
                driven_active,
                &planner,
                self.mode,
                settings.feedback_policy,
                settings.series_length,
                clocks.driving_clock,
            )?;
            if driving_active {
                driving.feed_boundary(feedback.quantity(), window)?;
            }
            Some(feedback)
        } else {
            None
        };

        if is_root {
            info!("Coupling mode {}: {}", self.mode, self.mode.description());
            info!(
                "{} dt = {} s, {} dt = {} s, {} boundary nodes",
                driving.name(),
                clocks.driving_dt,
                driven.name(),
                clocks.driven_dt,
                node_count
            );
        }

        self.context = Some(CouplingContext {
            clocks,
            planner,
            exchange,
            feedback,
            iterations: 0,
            driving_invocations: 0,
            driven_invocations: 0,
            warnings: Vec::new(),
            history: Vec::new(),
            driving_idle: false,
        });
        self.state = SchedulerState::Idle;
        Ok(())
    }

    /// Run one coupling iteration. Collective.
    pub fn step_iteration(&mut self) -> Result<SchedulerState, CouplingError> {
        self.initialize()?;
        if self.state == SchedulerState::BothFinished {
            return Ok(self.state);
        }

        let tol = self.settings.tolerance;
        let is_root = self.reducer.is_root();
        let reducer = &self.reducer;
        let sink = self.sink.as_mut();
        let (driving, driven) = split_sides(self.mode, self.hydro.as_mut(), self.surrogate.as_mut());
        let driving_active = driving.runs_on_all_ranks() || is_root;
        let driven_active = driven.runs_on_all_ranks() || is_root;
        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| CouplingError::ClockInvariant("coupling context missing".to_string()))?;

        let driving_done = ctx.clocks.driving_finished(tol);
        let mut super_dt = 0.0;
        if !driving_done {
            self.state = SchedulerState::DrivingRunning;
            super_dt = ctx.planner.plan(
                ctx.clocks.driving_clock,
                ctx.clocks.driven_clock,
                ctx.iterations == 0,
            );
            let substeps = ctx.planner.driving_substeps(super_dt);

            let (local_clock, local_scalar) = if driving_active {
                let report = driving.step(substeps)?;
                let scalar = if driving.owns_coupled_boundary() {
                    report.scalar
                } else {
                    MAX_SENTINEL
                };
                (report.clock, scalar)
            } else {
                (MAX_SENTINEL, MAX_SENTINEL)
            };
            let clock = reducer.reduce(local_clock, ReduceOp::Max)?;
            let scalar = reducer.reduce(local_scalar, ReduceOp::Max)?;
            ctx.driving_invocations += 1;

            check_clock(driving.name(), ctx.clocks.driving_clock, clock)?;
            if scalar == MAX_SENTINEL {
                return Err(CouplingError::EmptyBoundary(driving.quantity()));
            }
            ctx.clocks.driving_clock = clock;
            debug!(
                "Super-step {} s ({} substeps): {} at {} s",
                super_dt,
                substeps,
                driving.name(),
                clock
            );

            self.state = SchedulerState::Exchanging;
            let outcome = ctx.exchange.push_sample(clock, scalar, sink)?;
            ctx.record(&outcome);
            if driven_active {
                driven.apply_boundary(&outcome.series)?;
            }
        } else {
            if !ctx.driving_idle {
                info!(
                    "{} finished at {} s; holding the boundary",
                    driving.name(),
                    ctx.clocks.driving_clock
                );
                ctx.driving_idle = true;
            }
            self.state = SchedulerState::Exchanging;
            let series = ctx.exchange.hold(sink)?;
            if driven_active {
                driven.apply_boundary(&series)?;
            }
        }

        if !ctx.clocks.driven_finished(tol) {
            self.state = SchedulerState::DrivenRunning;
            let substeps = if driving_done {
                ctx.planner
                    .driven_steps_to_finish(ctx.clocks.driven_clock, ctx.clocks.driven_final)
            } else {
                ctx.planner.driven_substeps_within(
                    super_dt,
                    ctx.clocks.driving_clock,
                    ctx.clocks.driven_clock,
                )
            };

            let local_clock = if driven_active {
                driven.step(substeps)?.clock
            } else {
                MAX_SENTINEL
            };
            let clock = reducer.reduce(local_clock, ReduceOp::Max)?;
            ctx.driven_invocations += 1;

            check_clock(driven.name(), ctx.clocks.driven_clock, clock)?;
            ctx.clocks.driven_clock = clock;
            debug!("{} stepped {} substeps to {} s", driven.name(), substeps, clock);
        }

        if let Some(feedback) = ctx.feedback.as_mut() {
            if !ctx.clocks.driving_finished(tol) {
                let window = feedback.update(
                    reducer,
                    &*driven,
                    driven_active,
                    ctx.clocks.driven_finished(tol),
                    &ctx.planner,
                    ctx.clocks.driving_clock,
                    ctx.clocks.driven_clock,
                )?;
                if driving_active {
                    driving.feed_boundary(feedback.quantity(), window)?;
                }
            }
        }

        ctx.iterations += 1;
        self.state = if ctx.clocks.both_finished(tol) {
            if is_root {
                info!(
                    "Both models finished after {} iterations ({} driving, {} driven invocations)",
                    ctx.iterations, ctx.driving_invocations, ctx.driven_invocations
                );
            }
            SchedulerState::BothFinished
        } else {
            SchedulerState::Idle
        };
        Ok(self.state)
    }

    /// Iterate until both models have finished.
    pub fn run(&mut self) -> Result<RunSummary, CouplingError> {
        self.initialize()?;
        while self.step_iteration()? != SchedulerState::BothFinished {}
        self.summary()
            .ok_or_else(|| CouplingError::ClockInvariant("coupling context missing".to_string()))
    }

    /// Statistics so far, once initialised.
    pub fn summary(&self) -> Option<RunSummary> {
        self.context.as_ref().map(|ctx| RunSummary {
            mode: self.mode,
            driving_side: self.mode.driving_side(),
            state: self.state,
            iterations: ctx.iterations,
            driving_invocations: ctx.driving_invocations,
            driven_invocations: ctx.driven_invocations,
            final_driving_clock: ctx.clocks.driving_clock,
            final_driven_clock: ctx.clocks.driven_clock,
            warnings: ctx.warnings.clone(),
            history: ctx.history.clone(),
        })
    }

    pub fn mode(&self) -> CouplingMode {
        self.mode
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn context(&self) -> Option<&CouplingContext> {
        self.context.as_ref()
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn hydro(&self) -> &dyn ModelAdapter {
        self.hydro.as_ref()
    }

    pub fn surrogate(&self) -> &dyn ModelAdapter {
        self.surrogate.as_ref()
    }
}

/// Borrow both adapters as (driving, driven) for `mode`.
fn split_sides<'m>(
    mode: CouplingMode,
    hydro: &'m mut dyn ModelAdapter,
    surrogate: &'m mut dyn ModelAdapter,
) -> (&'m mut dyn ModelAdapter, &'m mut dyn ModelAdapter) {
    match mode.driving_side() {
        Side::Hydro => (hydro, surrogate),
        Side::Surrogate => (surrogate, hydro),
    }
}

/// Step sizes and lengths must be finite and strictly positive.
pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<(), CouplingError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CouplingError::InvalidSetting { name, value })
    }
}

pub(crate) fn check_non_negative(name: &'static str, value: f64) -> Result<(), CouplingError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(CouplingError::InvalidSetting { name, value })
    }
}

/// Reduced clocks never decrease, and a stepped model must advance.
fn check_clock(name: &str, previous: f64, reduced: f64) -> Result<(), CouplingError> {
    if reduced < previous {
        return Err(CouplingError::ClockInvariant(format!(
            "{name} clock moved backwards from {previous} s to {reduced} s"
        )));
    }
    if reduced == previous {
        return Err(CouplingError::ClockInvariant(format!(
            "{name} did not advance past {previous} s before its final time"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::SerialReducer;
    use crate::exchange::MemorySink;
    use crate::model::{BoundarySeries, SeriesWindow, StepReport};
    use crate::Quantity;

    /// Fixed-step model with a linear exported scalar.
    struct Ramp {
        dt: f64,
        start: f64,
        final_time: f64,
        clock: f64,
        stall: bool,
    }

    impl Ramp {
        fn boxed(dt: f64, final_time: f64) -> Box<dyn ModelAdapter> {
            Self::starting_at(dt, 0.0, final_time)
        }

        fn starting_at(dt: f64, start: f64, final_time: f64) -> Box<dyn ModelAdapter> {
            Box::new(Ramp {
                dt,
                start,
                final_time,
                clock: start,
                stall: false,
            })
        }
    }

    impl ModelAdapter for Ramp {
        fn name(&self) -> &str {
            "ramp"
        }
        fn quantity(&self) -> Quantity {
            Quantity::Elevation
        }
        fn native_dt(&self) -> f64 {
            self.dt
        }
        fn start_time(&self) -> f64 {
            self.start
        }
        fn final_time(&self) -> f64 {
            self.final_time
        }
        fn clock(&self) -> f64 {
            self.clock
        }
        fn current_scalar(&self) -> f64 {
            self.clock / 3600.0
        }
        fn step(&mut self, n_substeps: usize) -> Result<StepReport, CouplingError> {
            if !self.stall {
                self.clock = (self.clock + n_substeps as f64 * self.dt).min(self.final_time);
            }
            Ok(StepReport {
                clock: self.clock,
                scalar: self.current_scalar(),
            })
        }
        fn is_finished(&self) -> bool {
            self.clock >= self.final_time
        }
        fn boundary_node_values(&self) -> Vec<f64> {
            vec![self.current_scalar()]
        }
        fn apply_boundary(&mut self, _series: &BoundarySeries) -> Result<(), CouplingError> {
            Ok(())
        }
        fn feed_boundary(&mut self, _q: Quantity, _w: SeriesWindow) -> Result<(), CouplingError> {
            Ok(())
        }
    }

    fn scheduler(
        mode: CouplingMode,
        hydro: Box<dyn ModelAdapter>,
        surrogate: Box<dyn ModelAdapter>,
    ) -> CouplingScheduler<SerialReducer> {
        CouplingScheduler::new(
            mode,
            CouplingSettings::default(),
            SerialReducer,
            hydro,
            surrogate,
            Box::new(MemorySink::new()),
        )
    }

    #[test]
    fn test_superstep_state_finished() {
        let state = SuperstepState {
            mode: CouplingMode::DrivenByDriving,
            driving_dt: 1.0,
            driven_dt: 6.0,
            driving_clock: 143.9995,
            driven_clock: 100.0,
            driving_start: 0.0,
            driven_start: 0.0,
            driving_final: 144.0,
            driven_final: 144.0,
        };
        assert!(state.driving_finished(TIME_TOL));
        assert!(!state.driven_finished(TIME_TOL));
        assert!(!state.both_finished(TIME_TOL));
    }

    #[test]
    fn test_iteration_states() {
        let mut scheduler = scheduler(
            CouplingMode::DrivenByDriving,
            Ramp::boxed(21600.0, 43200.0),
            Ramp::boxed(3600.0, 43200.0),
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.step_iteration().unwrap(), SchedulerState::Idle);
        assert_eq!(scheduler.step_iteration().unwrap(), SchedulerState::BothFinished);
        // Further calls are no-ops
        assert_eq!(scheduler.step_iteration().unwrap(), SchedulerState::BothFinished);

        let ctx = scheduler.context().unwrap();
        assert_eq!(ctx.clocks.driving_clock, 43200.0);
        assert_eq!(ctx.clocks.driven_clock, 43200.0);
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[1].value, 12.0);
    }

    #[test]
    fn test_driving_side_follows_mode() {
        let mut scheduler = scheduler(
            CouplingMode::DrivingByDriven,
            Ramp::boxed(1800.0, 7200.0),
            Ramp::boxed(3600.0, 7200.0),
        );
        let summary = scheduler.run().unwrap();
        assert_eq!(summary.driving_side, Side::Hydro);
        // Two hydro substeps per invocation keep it one surrogate step ahead
        assert_eq!(summary.driving_invocations, 2);
        assert_eq!(summary.driven_invocations, 2);
        assert_eq!(summary.history[0].time, 3600.0);
    }

    #[test]
    fn test_driven_runs_to_completion_after_driving() {
        let mut scheduler = scheduler(
            CouplingMode::DrivenByDriving,
            Ramp::boxed(3600.0, 36000.0),
            Ramp::boxed(3600.0, 7200.0),
        );
        let summary = scheduler.run().unwrap();
        assert_eq!(summary.state, SchedulerState::BothFinished);
        assert_eq!(summary.final_driven_clock, 36000.0);
        // Two coupled iterations, then one idle iteration finishing the hydro side
        assert_eq!(summary.iterations, 3);
        assert_eq!(summary.driving_invocations, 2);
        assert_eq!(summary.driven_invocations, 3);
        assert!(scheduler.context().unwrap().exchange.is_idle());
    }

    #[test]
    fn test_stalled_model_is_fatal() {
        let stalled = Box::new(Ramp {
            dt: 3600.0,
            start: 0.0,
            final_time: 7200.0,
            clock: 0.0,
            stall: true,
        });
        let mut scheduler = scheduler(CouplingMode::DrivenByDriving, Ramp::boxed(3600.0, 7200.0), stalled);
        let err = scheduler.step_iteration().unwrap_err();
        assert!(matches!(err, CouplingError::ClockInvariant(_)));
    }

    #[test]
    fn test_late_driving_start_takes_one_bridging_step() {
        let mut scheduler = scheduler(
            CouplingMode::DrivenByDriving,
            Ramp::boxed(21600.0, 518400.0),
            Ramp::starting_at(3600.0, 36000.0, 554400.0),
        );
        scheduler.step_iteration().unwrap();

        let clocks = scheduler.context().unwrap().clocks;
        assert_eq!(clocks.driving_clock, 57600.0);
        assert_eq!(clocks.driven_clock, 21600.0);
    }

    #[test]
    fn test_driven_clock_stays_behind_driving_clock() {
        let mut scheduler = scheduler(
            CouplingMode::DrivenByDriving,
            Ramp::boxed(5400.0, 86400.0),
            Ramp::starting_at(3600.0, 7200.0, 93600.0),
        );
        while scheduler.step_iteration().unwrap() != SchedulerState::BothFinished {
            let clocks = scheduler.context().unwrap().clocks;
            if !clocks.driving_finished(TIME_TOL) {
                assert!(clocks.driven_clock <= clocks.driving_clock + TIME_TOL);
            }
        }
        let clocks = scheduler.context().unwrap().clocks;
        assert_eq!(clocks.driven_clock, 86400.0);
    }

    #[test]
    fn test_zero_time_step_rejected() {
        let mut scheduler = scheduler(
            CouplingMode::DrivenByDriving,
            Ramp::boxed(0.0, 7200.0),
            Ramp::boxed(3600.0, 7200.0),
        );
        assert!(matches!(
            scheduler.run(),
            Err(CouplingError::InvalidSetting { name: "driven time step", .. })
        ));
        assert!(scheduler.context().is_none());
    }

    #[test]
    fn test_check_clock() {
        assert!(check_clock("m", 1.0, 2.0).is_ok());
        assert!(check_clock("m", 2.0, 1.0).is_err());
        assert!(check_clock("m", 2.0, 2.0).is_err());
        // A reduction nobody contributed to
        assert!(check_clock("m", 0.0, MAX_SENTINEL).is_err());
    }
}
