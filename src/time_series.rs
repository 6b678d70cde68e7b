//! # Rolling Boundary Time Series
//!
//! A short, strictly increasing time series with an interpolation cursor.
//! The coupler keeps one of these for every quantity a model *reads* through
//! interpolation (the fed-back boundary level of the surrogate in two-way runs).
//!
//! ## Cursor Semantics
//!
//! Intervals are open on the left and closed on the right: the cursor `i`
//! brackets a query time `t` when `times[i] < t <= times[i + 1]`. A query equal
//! to a sample time therefore belongs to the interval *ending* at that sample.
//!
//! - [`TimeSeriesBuffer::locate`] finds the bracket by binary search. It runs
//!   once, when the buffer is built.
//! - [`TimeSeriesBuffer::advance_to`] moves the cursor forward only, which is
//!   amortised O(1) over a monotone sequence of query times.
//! - [`TimeSeriesBuffer::shift_and_append`] drops the oldest sample and appends
//!   a new one; the cursor follows its bracket back by one position.

use crate::CouplingError;

/// Find `i` such that `times[i] < t <= times[i + 1]`.
///
/// Times at or before the first sample map to bracket 0, so that values can be
/// extrapolated backward from the first interval. Times after the last sample
/// are rejected.
pub fn bracket_index(times: &[f64], t: f64) -> Result<usize, CouplingError> {
    let last = *times.last().ok_or(CouplingError::EmptySeries)?;
    if t > last {
        return Err(CouplingError::OutOfRange { time: t, last });
    }

    let mut left = 0;
    let mut span = times.len();
    while span != 1 {
        let mid = span / 2;
        if t <= times[left + mid] {
            span = mid;
        } else {
            span -= mid;
            left += mid;
        }
    }

    Ok(left.min(times.len().saturating_sub(2)))
}

/// Fixed-length window of `(time, value)` samples with a forward-only cursor.
///
/// # Example
/// ```
/// use tide_coupler_lib::time_series::TimeSeriesBuffer;
///
/// let times = vec![0.0, 1.0, 2.0, 4.0, 8.0, 16.0];
/// let values = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0];
/// let mut series = TimeSeriesBuffer::new(times, values, 0.0).unwrap();
///
/// series.advance_to(3.0).unwrap();
/// assert_eq!(series.interpolate(3.0), 6.0);
/// ```
#[derive(Clone, Debug)]
pub struct TimeSeriesBuffer {
    times: Vec<f64>,
    values: Vec<f64>,
    cursor: usize,
}

impl TimeSeriesBuffer {
    /// Build a buffer and place the cursor on the bracket of `start_time`.
    ///
    /// Fails when the series is empty, shorter than two samples, the lengths
    /// differ, the times are not strictly increasing, or `start_time` lies
    /// beyond the last sample.
    pub fn new(times: Vec<f64>, values: Vec<f64>, start_time: f64) -> Result<Self, CouplingError> {
        if times.is_empty() {
            return Err(CouplingError::EmptySeries);
        }
        if times.len() != values.len() {
            return Err(CouplingError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if times.len() < 2 {
            return Err(CouplingError::WindowTooShort {
                len: times.len(),
                min: 2,
            });
        }
        if let Some(index) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(CouplingError::NotIncreasing { index: index + 1 });
        }

        let mut series = TimeSeriesBuffer {
            times,
            values,
            cursor: 0,
        };
        series.cursor = series.locate(start_time)?;
        Ok(series)
    }

    /// Binary search for the bracket of `t` over the whole window.
    pub fn locate(&self, t: f64) -> Result<usize, CouplingError> {
        bracket_index(&self.times, t)
    }

    /// Move the cursor forward until it brackets `t`.
    ///
    /// Query times must not decrease between calls; the cursor never moves
    /// backward. No extrapolation past the last sample is allowed.
    pub fn advance_to(&mut self, t: f64) -> Result<usize, CouplingError> {
        let last = self.last_time();
        if t > last {
            return Err(CouplingError::OutOfRange { time: t, last });
        }
        while self.times[self.cursor + 1] < t {
            self.cursor += 1;
        }
        Ok(self.cursor)
    }

    /// Linear interpolation on the current bracket.
    ///
    /// Only meaningful for a `t` inside the bracket established by
    /// [`advance_to`](Self::advance_to) (or before the first sample, which
    /// extrapolates backward).
    pub fn interpolate(&self, t: f64) -> f64 {
        let i = self.cursor;
        let slope = (self.values[i + 1] - self.values[i]) / (self.times[i + 1] - self.times[i]);
        self.values[i] + slope * (t - self.times[i])
    }

    /// Advance to `t` and interpolate there.
    pub fn sample_at(&mut self, t: f64) -> Result<f64, CouplingError> {
        self.advance_to(t)?;
        Ok(self.interpolate(t))
    }

    /// Drop the oldest sample and append `(new_time, new_value)`.
    pub fn shift_and_append(&mut self, new_time: f64, new_value: f64) -> Result<(), CouplingError> {
        let last_index = self.times.len() - 1;
        if new_time <= self.times[last_index] {
            return Err(CouplingError::NotIncreasing { index: last_index });
        }

        self.times.rotate_left(1);
        self.values.rotate_left(1);
        self.times[last_index] = new_time;
        self.values[last_index] = new_value;
        self.cursor = self.cursor.saturating_sub(1);
        Ok(())
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn last_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn last_value(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Spacing of the two newest samples.
    pub fn last_spacing(&self) -> f64 {
        let n = self.times.len();
        self.times[n - 1] - self.times[n - 2]
    }
}
