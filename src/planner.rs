//! # Super-step Planning
//!
//! Reconciles the native time steps of the driving and driven models. The
//! driving model always moves by whole multiples of its own step; the planner
//! picks the smallest such multiple that keeps it at least one driven step
//! ahead of the driven clock, within a fixed tolerance.
//!
//! All times are in seconds. Adapters convert from their native units.

/// Default tolerance on time comparisons (seconds).
pub const TIME_TOL: f64 = 1.0e-3;

/// Computes super-steps and sub-step counts for one driving/driven pair.
#[derive(Clone, Copy, Debug)]
pub struct SuperstepPlanner {
    /// Native step of the driving model (its effective step, in seconds)
    pub driving_dt: f64,
    /// Native step of the driven model
    pub driven_dt: f64,
    pub tolerance: f64,
    /// Start time of the driving model
    pub driving_start: f64,
}

impl SuperstepPlanner {
    pub fn new(driving_dt: f64, driven_dt: f64) -> Self {
        Self {
            driving_dt,
            driven_dt,
            tolerance: TIME_TOL,
            driving_start: 0.0,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_driving_start(mut self, start: f64) -> Self {
        self.driving_start = start;
        self
    }

    /// Length of the next super-step.
    ///
    /// Never shorter than one driving step, and never more than one driving
    /// step past `driven_clock + driven_dt - tolerance`. When the driving
    /// model starts after time zero, the first super-step is a single driven
    /// step that bridges the delayed start.
    pub fn plan(&self, driving_clock: f64, driven_clock: f64, first: bool) -> f64 {
        if first && self.driving_start > 0.0 {
            return self.driven_dt;
        }

        let target = driven_clock + self.driven_dt - self.tolerance;
        let mut super_dt = self.driving_dt;
        while driving_clock + super_dt < target {
            super_dt += self.driving_dt;
        }
        super_dt
    }

    /// Native driving steps covering `super_dt`.
    pub fn driving_substeps(&self, super_dt: f64) -> usize {
        steps_in(super_dt, self.driving_dt)
    }

    /// Native driven steps consuming an elapsed span, at least one.
    pub fn driven_substeps(&self, span: f64) -> usize {
        steps_in(span, self.driven_dt)
    }

    /// Driven steps following one super-step: `round(super_dt / driven_dt)`,
    /// at least one, capped so the driven clock does not pass the driving
    /// clock (the last exchanged boundary time).
    pub fn driven_substeps_within(&self, super_dt: f64, driving_clock: f64, driven_clock: f64) -> usize {
        let room = ((driving_clock - driven_clock + self.tolerance) / self.driven_dt)
            .floor()
            .max(1.0) as usize;
        self.driven_substeps(super_dt).min(room)
    }

    /// Driven steps left until `final_time`, used once the driving side is done.
    pub fn driven_steps_to_finish(&self, driven_clock: f64, final_time: f64) -> usize {
        let remaining = (final_time - driven_clock) / self.driven_dt;
        (remaining - self.tolerance / self.driven_dt).ceil().max(1.0) as usize
    }

    /// Time increment of the very first boundary series seen by the driven side.
    ///
    /// A driven model starting after time zero gets exactly one of its own
    /// steps. Otherwise the increment is the smallest multiple of the driven
    /// step, counted from its start, that covers one driving step.
    pub fn bootstrap_increment(&self, driven_start: f64) -> f64 {
        if driven_start > 0.0 {
            return self.driven_dt;
        }
        let mut superdt = driven_start;
        while superdt < self.driving_dt - self.tolerance {
            superdt += self.driven_dt;
        }
        superdt - driven_start
    }

    /// Spacing of the initial feedback window: whole driving steps reaching
    /// the end of the driven model's first step.
    pub fn feedback_span(&self, driven_start: f64) -> f64 {
        let mut span = 0.0;
        while span < driven_start + self.driven_dt {
            span += self.driving_dt;
        }
        span
    }

    /// Whole driving steps (possibly none) from `driving_clock` to the driven
    /// model's next requested time.
    pub fn lookahead(&self, driving_clock: f64, driven_clock: f64) -> f64 {
        let target = driven_clock + self.driven_dt - self.tolerance;
        let mut dt = 0.0;
        while driving_clock + dt < target {
            dt += self.driving_dt;
        }
        dt
    }
}

fn steps_in(span: f64, dt: f64) -> usize {
    (span / dt).round().max(1.0) as usize
}
